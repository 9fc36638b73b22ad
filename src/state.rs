use std::sync::Arc;

use sea_orm::DatabaseConnection;
use uuid::Uuid;

use crate::{
    clock::{Clock, SystemClock},
    config::AppConfig,
    locks::KeyedLocks,
};

#[derive(Clone)]
pub struct AppState {
    pub orm: DatabaseConnection,
    pub config: Arc<AppConfig>,
    pub clock: Arc<dyn Clock>,
    /// Serializes cart mutations per (user id, product slug).
    pub cart_locks: Arc<KeyedLocks<(Uuid, String)>>,
}

impl AppState {
    pub fn new(orm: DatabaseConnection, config: AppConfig) -> Self {
        Self::with_clock(orm, config, Arc::new(SystemClock))
    }

    pub fn with_clock(orm: DatabaseConnection, config: AppConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            orm,
            config: Arc::new(config),
            clock,
            cart_locks: Arc::new(KeyedLocks::new()),
        }
    }
}
