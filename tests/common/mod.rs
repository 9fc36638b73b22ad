#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use repairshop_api::{
    clock::ManualClock,
    config::AppConfig,
    db::{create_orm_conn, run_migrations},
    entity::{
        products::{ActiveModel as ProductActive, Entity as Products, Model as ProductModel},
        users::ActiveModel as UserActive,
    },
    middleware::auth::{AuthUser, ROLE_ADMIN, ROLE_USER},
    state::AppState,
};
use sea_orm::{ActiveModelTrait, EntityTrait, Set};
use uuid::Uuid;

pub const JWT_SECRET: &str = "integration-secret";

pub struct TestApp {
    pub state: AppState,
    pub clock: Arc<ManualClock>,
}

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0)
        .single()
        .expect("valid start time")
}

/// Uses `TEST_DATABASE_URL` when set, otherwise a private in-memory SQLite
/// database. Every helper generates unique slugs and emails so tests can
/// share a real database.
pub async fn setup() -> anyhow::Result<TestApp> {
    setup_with(|_| {}).await
}

pub async fn setup_with(tweak: impl FnOnce(&mut AppConfig)) -> anyhow::Result<TestApp> {
    let database_url =
        std::env::var("TEST_DATABASE_URL").unwrap_or_else(|_| "sqlite::memory:".to_string());
    let orm = create_orm_conn(&database_url).await?;
    run_migrations(&orm).await?;

    let mut config = AppConfig::new(database_url, JWT_SECRET);
    tweak(&mut config);

    let clock = Arc::new(ManualClock::new(start_time()));
    let state = AppState::with_clock(orm, config, clock.clone());
    Ok(TestApp { state, clock })
}

pub async fn create_user(state: &AppState, role: &str) -> anyhow::Result<AuthUser> {
    let id = Uuid::new_v4();
    UserActive {
        id: Set(id),
        email: Set(format!("{id}@example.com")),
        role: Set(role.to_string()),
        created_at: Set(Utc::now().into()),
    }
    .insert(&state.orm)
    .await?;
    Ok(AuthUser {
        user_id: id,
        role: role.to_string(),
    })
}

pub async fn customer(state: &AppState) -> anyhow::Result<AuthUser> {
    create_user(state, ROLE_USER).await
}

pub async fn admin(state: &AppState) -> anyhow::Result<AuthUser> {
    create_user(state, ROLE_ADMIN).await
}

pub fn unique_slug(prefix: &str) -> String {
    format!("{prefix}-{}", &Uuid::new_v4().simple().to_string()[..8])
}

pub async fn create_product(
    state: &AppState,
    prefix: &str,
    price: i64,
    total_quantity: i32,
) -> anyhow::Result<ProductModel> {
    let now = Utc::now();
    let product = ProductActive {
        id: Set(Uuid::new_v4()),
        slug: Set(unique_slug(prefix)),
        name: Set(format!("Test {prefix}")),
        description: Set(None),
        price: Set(price),
        total_quantity: Set(total_quantity),
        reserved_quantity: Set(0),
        is_active: Set(true),
        created_at: Set(now.into()),
        updated_at: Set(now.into()),
    }
    .insert(&state.orm)
    .await?;
    Ok(product)
}

pub async fn reload(state: &AppState, product: &ProductModel) -> anyhow::Result<ProductModel> {
    Products::find_by_id(product.id)
        .one(&state.orm)
        .await?
        .ok_or_else(|| anyhow::anyhow!("product {} vanished", product.slug))
}

/// `(total, reserved)` for a product.
pub async fn counters(state: &AppState, product: &ProductModel) -> anyhow::Result<(i32, i32)> {
    let current = reload(state, product).await?;
    Ok((current.total_quantity, current.reserved_quantity))
}
