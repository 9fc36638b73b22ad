//! Per-user stock holds ("the cart").
//!
//! Each cart mutation runs under the (user, slug) lock and inside one
//! transaction, so the ledger counter and the reservation row move together.
//! Status changes out of `reserved` are compare-and-set updates; the ledger
//! is only released by whichever caller won the flip.

use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, EntityTrait, QueryFilter,
    QueryOrder, QuerySelect, Set, TransactionTrait, prelude::DateTimeWithTimeZone,
    sea_query::Expr,
};
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    audit::log_audit_best_effort,
    entity::{
        products::{Column as ProdCol, Entity as Products, Model as ProductModel},
        reservations::{
            ActiveModel as ReservationActive, Column as ResCol, Entity as Reservations,
            Model as ReservationModel, ReservationStatus,
        },
    },
    error::{AppError, AppResult},
    middleware::auth::AuthUser,
    models::Reservation,
    services::ledger::{self, ReleaseOutcome},
    state::AppState,
};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
pub struct ExpirySummary {
    pub released_reservations: u64,
    pub released_units: i64,
    pub clamped: u64,
}

pub async fn add_to_cart(
    state: &AppState,
    user: &AuthUser,
    slug: &str,
    delta: i32,
) -> AppResult<Reservation> {
    if delta < 1 {
        return Err(AppError::BadRequest(
            "quantity must be greater than 0".to_string(),
        ));
    }

    let _guard = state
        .cart_locks
        .acquire((user.user_id, slug.to_string()))
        .await;
    let now = state.clock.now();
    let expires_at = now + state.config.hold_duration();

    let txn = state.orm.begin().await?;
    let product = find_active_product(&txn, slug).await?;
    let existing = live_reservation(&txn, user.user_id, product.id, now).await?;

    // The hold row is written before the product counter, the same order
    // settlement and the sweeper lock them in.
    let reservation = match existing {
        Some(current) => {
            let quantity = current
                .quantity
                .checked_add(delta)
                .ok_or_else(|| AppError::BadRequest("quantity out of range".into()))?;
            update_hold(&txn, current, quantity, expires_at, now).await?
        }
        None => insert_hold(&txn, user.user_id, &product, delta, expires_at, now).await?,
    };
    if !ledger::try_reserve(&txn, product.id, delta).await? {
        return Err(AppError::InsufficientStock(slug.to_string()));
    }
    txn.commit().await?;

    log_audit_best_effort(
        &state.orm,
        now,
        Some(user.user_id),
        "cart_add",
        Some("reservations"),
        Some(serde_json::json!({ "product": slug, "delta": delta, "quantity": reservation.quantity })),
    )
    .await;

    Ok(reservation.into())
}

/// Set the held quantity for a product. Zero drops the reservation.
pub async fn set_quantity(
    state: &AppState,
    user: &AuthUser,
    slug: &str,
    quantity: i32,
) -> AppResult<Option<Reservation>> {
    if quantity < 0 {
        return Err(AppError::BadRequest("quantity must not be negative".into()));
    }

    let _guard = state
        .cart_locks
        .acquire((user.user_id, slug.to_string()))
        .await;
    let now = state.clock.now();
    let expires_at = now + state.config.hold_duration();

    let txn = state.orm.begin().await?;
    let product = find_product(&txn, slug).await?;
    let existing = live_reservation(&txn, user.user_id, product.id, now).await?;

    let result = match existing {
        None if quantity == 0 => None,
        None => {
            if !product.is_active {
                return Err(AppError::not_found(format!("product {slug}")));
            }
            let inserted = insert_hold(&txn, user.user_id, &product, quantity, expires_at, now).await?;
            if !ledger::try_reserve(&txn, product.id, quantity).await? {
                return Err(AppError::InsufficientStock(slug.to_string()));
            }
            Some(inserted)
        }
        Some(current) if quantity == 0 => {
            release_hold(&txn, &current, now, false).await?;
            None
        }
        Some(current) => {
            let delta = quantity - current.quantity;
            let updated = update_hold(&txn, current, quantity, expires_at, now).await?;
            if delta > 0 && !ledger::try_reserve(&txn, product.id, delta).await? {
                return Err(AppError::InsufficientStock(slug.to_string()));
            }
            if delta < 0 {
                ledger::release(&txn, product.id, -delta).await?;
            }
            Some(updated)
        }
    };
    txn.commit().await?;

    log_audit_best_effort(
        &state.orm,
        now,
        Some(user.user_id),
        "cart_set_quantity",
        Some("reservations"),
        Some(serde_json::json!({ "product": slug, "quantity": quantity })),
    )
    .await;

    Ok(result.map(Reservation::from))
}

/// Drop one unit from the cart; the last unit releases the reservation.
pub async fn remove_one(
    state: &AppState,
    user: &AuthUser,
    slug: &str,
) -> AppResult<Option<Reservation>> {
    let _guard = state
        .cart_locks
        .acquire((user.user_id, slug.to_string()))
        .await;
    let now = state.clock.now();

    let txn = state.orm.begin().await?;
    let product = find_product(&txn, slug).await?;
    let current = live_reservation(&txn, user.user_id, product.id, now)
        .await?
        .ok_or_else(|| AppError::not_found(format!("cart item {slug}")))?;

    let result = if current.quantity <= 1 {
        release_hold(&txn, &current, now, false).await?;
        None
    } else {
        let quantity = current.quantity - 1;
        let expires_at = current.expires_at;
        let updated = update_hold(&txn, current, quantity, expires_at.with_timezone(&Utc), now).await?;
        ledger::release(&txn, product.id, 1).await?;
        Some(updated)
    };
    txn.commit().await?;

    log_audit_best_effort(
        &state.orm,
        now,
        Some(user.user_id),
        "cart_remove",
        Some("reservations"),
        Some(serde_json::json!({ "product": slug })),
    )
    .await;

    Ok(result.map(Reservation::from))
}

/// Release every open hold the user has. Each reservation is released in its
/// own transaction.
pub async fn clear_cart(state: &AppState, user: &AuthUser) -> AppResult<u64> {
    let now = state.clock.now();
    let open = Reservations::find()
        .filter(ResCol::UserId.eq(user.user_id))
        .filter(ResCol::Status.eq(ReservationStatus::Reserved))
        .all(&state.orm)
        .await?;

    let mut released = 0;
    for reservation in open {
        let _guard = state
            .cart_locks
            .acquire((user.user_id, reservation.product_slug.clone()))
            .await;
        let txn = state.orm.begin().await?;
        if release_hold(&txn, &reservation, now, false).await?.is_some() {
            released += 1;
        }
        txn.commit().await?;
    }

    if released > 0 {
        log_audit_best_effort(
            &state.orm,
            now,
            Some(user.user_id),
            "cart_clear",
            Some("reservations"),
            Some(serde_json::json!({ "released": released })),
        )
        .await;
    }

    Ok(released)
}

/// Release every `reserved` hold whose expiry has passed. Safe to run
/// repeatedly and concurrently with cart traffic: a hold that was refreshed,
/// purchased or released in the meantime no longer matches the
/// compare-and-set and is skipped.
pub async fn expire_stale(state: &AppState) -> AppResult<ExpirySummary> {
    let now = state.clock.now();
    let cutoff: DateTimeWithTimeZone = now.into();
    let batch_size = state.config.sweep_batch_size.max(1);
    let mut summary = ExpirySummary::default();

    loop {
        let lapsed = Reservations::find()
            .filter(ResCol::Status.eq(ReservationStatus::Reserved))
            .filter(ResCol::ExpiresAt.lte(cutoff))
            .order_by_asc(ResCol::ExpiresAt)
            .limit(batch_size)
            .all(&state.orm)
            .await?;
        let fetched = lapsed.len() as u64;

        for reservation in lapsed {
            let txn = state.orm.begin().await?;
            match release_hold(&txn, &reservation, now, true).await? {
                Some(outcome) => {
                    summary.released_reservations += 1;
                    summary.released_units += i64::from(reservation.quantity);
                    if outcome != ReleaseOutcome::Released {
                        summary.clamped += 1;
                    }
                }
                None => {
                    tracing::debug!(reservation_id = %reservation.id, "hold changed before expiry, skipped");
                }
            }
            txn.commit().await?;
        }

        if fetched < batch_size {
            break;
        }
    }

    if summary.released_reservations > 0 {
        tracing::info!(
            released = summary.released_reservations,
            units = summary.released_units,
            "expired reservations released"
        );
    }

    Ok(summary)
}

/// Flip a `reserved` row to `to`. Returns whether this caller won the flip.
/// With `lapsed_only`, the row must also still be past its expiry.
pub async fn claim<C: ConnectionTrait>(
    conn: &C,
    reservation_id: Uuid,
    to: ReservationStatus,
    now: DateTime<Utc>,
    lapsed_only: bool,
) -> AppResult<bool> {
    let now: DateTimeWithTimeZone = now.into();
    let mut condition = Condition::all()
        .add(ResCol::Id.eq(reservation_id))
        .add(ResCol::Status.eq(ReservationStatus::Reserved));
    if lapsed_only {
        condition = condition.add(ResCol::ExpiresAt.lte(now));
    }

    let result = Reservations::update_many()
        .col_expr(ResCol::Status, Expr::value(to))
        .col_expr(ResCol::UpdatedAt, Expr::value(now))
        .filter(condition)
        .exec(conn)
        .await?;
    Ok(result.rows_affected == 1)
}

/// The user's `reserved` row for a product, lapsed or not.
pub async fn open_reservation<C: ConnectionTrait>(
    conn: &C,
    user_id: Uuid,
    product_id: Uuid,
) -> AppResult<Option<ReservationModel>> {
    let found = Reservations::find()
        .filter(ResCol::UserId.eq(user_id))
        .filter(ResCol::ProductId.eq(product_id))
        .filter(ResCol::Status.eq(ReservationStatus::Reserved))
        .one(conn)
        .await?;
    Ok(found)
}

pub async fn find_product<C: ConnectionTrait>(conn: &C, slug: &str) -> AppResult<ProductModel> {
    Products::find()
        .filter(ProdCol::Slug.eq(slug))
        .one(conn)
        .await?
        .ok_or_else(|| AppError::not_found(format!("product {slug}")))
}

async fn find_active_product<C: ConnectionTrait>(conn: &C, slug: &str) -> AppResult<ProductModel> {
    let product = find_product(conn, slug).await?;
    if !product.is_active {
        return Err(AppError::not_found(format!("product {slug}")));
    }
    Ok(product)
}

/// The user's live hold on a product. A lapsed hold that the sweeper has not
/// reached yet is released here rather than revived.
async fn live_reservation<C: ConnectionTrait>(
    conn: &C,
    user_id: Uuid,
    product_id: Uuid,
    now: DateTime<Utc>,
) -> AppResult<Option<ReservationModel>> {
    match open_reservation(conn, user_id, product_id).await? {
        Some(current) if current.is_live_at(now.into()) => Ok(Some(current)),
        Some(lapsed) => {
            release_hold(conn, &lapsed, now, true).await?;
            Ok(None)
        }
        None => Ok(None),
    }
}

/// Mark a hold `released` and hand its units back to the ledger. `None` when
/// another caller got there first.
async fn release_hold<C: ConnectionTrait>(
    conn: &C,
    reservation: &ReservationModel,
    now: DateTime<Utc>,
    lapsed_only: bool,
) -> AppResult<Option<ReleaseOutcome>> {
    if !claim(conn, reservation.id, ReservationStatus::Released, now, lapsed_only).await? {
        return Ok(None);
    }
    let outcome = ledger::release(conn, reservation.product_id, reservation.quantity).await?;
    Ok(Some(outcome))
}

async fn insert_hold<C: ConnectionTrait>(
    conn: &C,
    user_id: Uuid,
    product: &ProductModel,
    quantity: i32,
    expires_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> AppResult<ReservationModel> {
    ReservationActive {
        id: Set(Uuid::new_v4()),
        user_id: Set(user_id),
        product_id: Set(product.id),
        product_slug: Set(product.slug.clone()),
        quantity: Set(quantity),
        status: Set(ReservationStatus::Reserved),
        expires_at: Set(expires_at.into()),
        created_at: Set(now.into()),
        updated_at: Set(now.into()),
    }
    .insert(conn)
    .await
    .map_err(|err| AppError::from_write(err, "reservation"))
}

async fn update_hold<C: ConnectionTrait>(
    conn: &C,
    current: ReservationModel,
    quantity: i32,
    expires_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> AppResult<ReservationModel> {
    let expires_at: DateTimeWithTimeZone = expires_at.into();
    let now: DateTimeWithTimeZone = now.into();

    let result = Reservations::update_many()
        .col_expr(ResCol::Quantity, Expr::value(quantity))
        .col_expr(ResCol::ExpiresAt, Expr::value(expires_at))
        .col_expr(ResCol::UpdatedAt, Expr::value(now))
        .filter(ResCol::Id.eq(current.id))
        .filter(ResCol::Status.eq(ReservationStatus::Reserved))
        .filter(ResCol::Quantity.eq(current.quantity))
        .exec(conn)
        .await?;
    if result.rows_affected != 1 {
        return Err(AppError::Conflict(format!(
            "reservation for {} changed concurrently",
            current.product_slug
        )));
    }

    Ok(ReservationModel {
        quantity,
        expires_at,
        updated_at: now,
        ..current
    })
}
