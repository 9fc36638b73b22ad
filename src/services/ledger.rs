//! Inventory ledger: the `total_quantity` / `reserved_quantity` counters on
//! `products`.
//!
//! Every mutation here is a single conditional `UPDATE` whose `WHERE` clause
//! carries the invariant `0 <= reserved_quantity <= total_quantity`. Success
//! is read from the affected row count, so concurrent callers can never both
//! pass a check that only one of them should pass. Callers pass either the
//! pool or an open transaction.

use sea_orm::{ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, sea_query::Expr};
use uuid::Uuid;

use crate::{
    entity::products::{Column as ProdCol, Entity as Products},
    error::{AppError, AppResult},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    Released,
    /// The release would have driven `reserved_quantity` below zero; it was
    /// clamped to zero instead.
    Clamped,
    /// No such product.
    Missing,
}

/// Hold `delta` more units, if that many are still unreserved.
pub async fn try_reserve<C: ConnectionTrait>(
    conn: &C,
    product_id: Uuid,
    delta: i32,
) -> AppResult<bool> {
    if delta <= 0 {
        return Err(AppError::BadRequest("reserve delta must be positive".into()));
    }

    let result = Products::update_many()
        .col_expr(
            ProdCol::ReservedQuantity,
            Expr::col(ProdCol::ReservedQuantity).add(delta),
        )
        .filter(ProdCol::Id.eq(product_id))
        .filter(ProdCol::IsActive.eq(true))
        .filter(
            Expr::expr(Expr::col(ProdCol::TotalQuantity).sub(Expr::col(ProdCol::ReservedQuantity)))
                .gte(delta),
        )
        .exec(conn)
        .await?;

    let reserved = result.rows_affected == 1;
    tracing::debug!(%product_id, delta, reserved, "ledger reserve");
    Ok(reserved)
}

/// Give back `delta` held units. Never fails on underflow: the counter is
/// clamped at zero and the fault is logged.
pub async fn release<C: ConnectionTrait>(
    conn: &C,
    product_id: Uuid,
    delta: i32,
) -> AppResult<ReleaseOutcome> {
    if delta <= 0 {
        return Ok(ReleaseOutcome::Released);
    }

    // Two rounds: a concurrent reserve can land between the guarded
    // decrement and the clamp, making neither statement match once.
    for _ in 0..2 {
        let decremented = Products::update_many()
            .col_expr(
                ProdCol::ReservedQuantity,
                Expr::col(ProdCol::ReservedQuantity).sub(delta),
            )
            .filter(ProdCol::Id.eq(product_id))
            .filter(ProdCol::ReservedQuantity.gte(delta))
            .exec(conn)
            .await?;
        if decremented.rows_affected == 1 {
            tracing::debug!(%product_id, delta, "ledger release");
            return Ok(ReleaseOutcome::Released);
        }

        let clamped = Products::update_many()
            .col_expr(ProdCol::ReservedQuantity, Expr::value(0))
            .filter(ProdCol::Id.eq(product_id))
            .filter(ProdCol::ReservedQuantity.lt(delta))
            .exec(conn)
            .await?;
        if clamped.rows_affected == 1 {
            tracing::error!(
                %product_id,
                delta,
                "consistency fault: release exceeded reserved quantity, clamped to zero"
            );
            return Ok(ReleaseOutcome::Clamped);
        }
    }

    let exists = Products::find_by_id(product_id).one(conn).await?.is_some();
    if !exists {
        tracing::error!(%product_id, delta, "consistency fault: release for unknown product");
        return Ok(ReleaseOutcome::Missing);
    }

    Err(AppError::Conflict(format!(
        "reserved quantity of product {product_id} kept changing during release"
    )))
}

/// Turn `quantity` units into a sale. `held` is how much of that quantity the
/// buyer already had reserved; those units leave `reserved_quantity` along
/// with `total_quantity`. The update only applies if the unheld remainder is
/// covered by unreserved stock.
pub async fn commit_purchase<C: ConnectionTrait>(
    conn: &C,
    product_id: Uuid,
    quantity: i32,
    held: i32,
) -> AppResult<bool> {
    if quantity <= 0 || held < 0 {
        return Err(AppError::BadRequest("invalid purchase quantity".into()));
    }

    let result = Products::update_many()
        .col_expr(
            ProdCol::TotalQuantity,
            Expr::col(ProdCol::TotalQuantity).sub(quantity),
        )
        .col_expr(
            ProdCol::ReservedQuantity,
            Expr::col(ProdCol::ReservedQuantity).sub(held),
        )
        .filter(ProdCol::Id.eq(product_id))
        .filter(ProdCol::IsActive.eq(true))
        .filter(ProdCol::ReservedQuantity.gte(held))
        .filter(
            Expr::expr(Expr::col(ProdCol::TotalQuantity).sub(Expr::col(ProdCol::ReservedQuantity)))
                .gte(quantity - held),
        )
        .exec(conn)
        .await?;

    let committed = result.rows_affected == 1;
    tracing::debug!(%product_id, quantity, held, committed, "ledger commit purchase");
    Ok(committed)
}

/// Add (or with a negative delta, remove) stock on hand. Removal may not cut
/// into units that are currently reserved, and the result must still fit the
/// `i32` column.
pub async fn restock<C: ConnectionTrait>(
    conn: &C,
    product_id: Uuid,
    delta: i32,
) -> AppResult<bool> {
    let shortfall = delta
        .checked_neg()
        .ok_or_else(|| AppError::BadRequest("restock delta out of range".into()))?;

    let mut update = Products::update_many()
        .col_expr(
            ProdCol::TotalQuantity,
            Expr::col(ProdCol::TotalQuantity).add(delta),
        )
        .filter(ProdCol::Id.eq(product_id))
        .filter(
            Expr::expr(Expr::col(ProdCol::TotalQuantity).sub(Expr::col(ProdCol::ReservedQuantity)))
                .gte(shortfall),
        );
    if delta > 0 {
        update = update.filter(ProdCol::TotalQuantity.lte(i32::MAX - delta));
    }
    let result = update.exec(conn).await?;

    let applied = result.rows_affected == 1;
    tracing::debug!(%product_id, delta, applied, "ledger restock");
    Ok(applied)
}
