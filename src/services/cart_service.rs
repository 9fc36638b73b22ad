use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use sea_orm::{ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder};
use uuid::Uuid;

use crate::{
    dto::cart::CartView,
    entity::reservations::{Column as ResCol, Entity as Reservations, ReservationStatus},
    error::AppResult,
    middleware::auth::AuthUser,
    state::AppState,
};

/// The user's cart as of now: live holds only. Reading never releases
/// anything; lapsed holds are left for the sweeper.
pub async fn get_cart(state: &AppState, user: &AuthUser) -> AppResult<CartView> {
    let cart = cart_lines(&state.orm, user.user_id, state.clock.now()).await?;
    Ok(CartView { cart })
}

pub async fn cart_lines<C: ConnectionTrait>(
    conn: &C,
    user_id: Uuid,
    now: DateTime<Utc>,
) -> AppResult<BTreeMap<String, i32>> {
    let now: sea_orm::prelude::DateTimeWithTimeZone = now.into();
    let rows = Reservations::find()
        .filter(ResCol::UserId.eq(user_id))
        .filter(ResCol::Status.eq(ReservationStatus::Reserved))
        .filter(ResCol::ExpiresAt.gt(now))
        .order_by_asc(ResCol::CreatedAt)
        .all(conn)
        .await?;

    let mut cart = BTreeMap::new();
    for row in rows {
        *cart.entry(row.product_slug).or_insert(0) += row.quantity;
    }
    Ok(cart)
}
