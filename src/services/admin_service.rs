use sea_orm::{
    ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set,
    TransactionTrait, ActiveModelTrait, sea_query::Expr,
};
use uuid::Uuid;

use crate::{
    audit::log_audit_best_effort,
    dto::orders::{OrderWithItems, UpdateOrderStatusRequest},
    entity::{
        order_items::{Column as OrderItemCol, Entity as OrderItems},
        order_status_history::ActiveModel as HistoryActive,
        orders::{Column as OrderCol, Entity as Orders, OrderStatus, PaymentStatus},
        products::{Column as ProdCol, Entity as Products},
    },
    error::{AppError, AppResult},
    middleware::auth::{AuthUser, ensure_admin},
    models::Product,
    response::{ApiResponse, Meta},
    dto::products::{InventoryAdjustRequest, LowStockQuery, ProductList},
    services::{
        ledger,
        order_service::load_order_details,
        reservation_service::{self, ExpirySummary, find_product},
    },
    state::AppState,
};

/// Move an order along its lifecycle. The transition, the history row and
/// any restocking commit together.
pub async fn update_order_status(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
    payload: UpdateOrderStatusRequest,
) -> AppResult<OrderWithItems> {
    ensure_admin(user)?;
    let now = state.clock.now();
    let next = payload.status;

    let txn = state.orm.begin().await?;
    let order = Orders::find_by_id(id)
        .one(&txn)
        .await?
        .ok_or_else(|| AppError::not_found(format!("order {id}")))?;

    let previous = order.status;
    if previous.is_terminal() {
        return Err(AppError::BadRequest(format!(
            "order {} is already {}",
            order.order_number,
            previous.as_str()
        )));
    }
    if !previous.can_transition_to(next) {
        return Err(AppError::BadRequest(format!(
            "cannot move order from {} to {}",
            previous.as_str(),
            next.as_str()
        )));
    }

    let payment_status = match (next, payload.payment_status) {
        (OrderStatus::Refunded, _) => PaymentStatus::Refunded,
        (_, Some(requested)) => requested,
        (_, None) => order.payment_status,
    };

    let result = Orders::update_many()
        .col_expr(OrderCol::Status, Expr::value(next))
        .col_expr(OrderCol::PaymentStatus, Expr::value(payment_status))
        .col_expr(
            OrderCol::UpdatedAt,
            Expr::value(sea_orm::prelude::DateTimeWithTimeZone::from(now)),
        )
        .filter(OrderCol::Id.eq(id))
        .filter(OrderCol::Status.eq(previous))
        .exec(&txn)
        .await?;
    if result.rows_affected != 1 {
        return Err(AppError::Conflict(format!(
            "order {} changed concurrently",
            order.order_number
        )));
    }

    HistoryActive {
        id: Set(Uuid::new_v4()),
        order_id: Set(id),
        status: Set(next),
        note: Set(payload.note.clone()),
        changed_by: Set(Some(user.user_id)),
        created_at: Set(now.into()),
    }
    .insert(&txn)
    .await?;

    if next == OrderStatus::Cancelled {
        let items = OrderItems::find()
            .filter(OrderItemCol::OrderId.eq(id))
            .order_by_asc(OrderItemCol::ProductSlug)
            .all(&txn)
            .await?;
        for item in items {
            if !ledger::restock(&txn, item.product_id, item.quantity).await? {
                tracing::warn!(
                    order = %order.order_number,
                    product = %item.product_slug,
                    "cancelled line could not be restocked"
                );
            }
        }
    }

    let updated = Orders::find_by_id(id)
        .one(&txn)
        .await?
        .ok_or_else(|| AppError::not_found(format!("order {id}")))?;
    let details = load_order_details(&txn, updated).await?;
    txn.commit().await?;

    tracing::info!(
        order = %details.order.order_number,
        from = previous.as_str(),
        to = next.as_str(),
        "order status changed"
    );
    log_audit_best_effort(
        &state.orm,
        now,
        Some(user.user_id),
        "order_status_update",
        Some("orders"),
        Some(serde_json::json!({ "order_id": id, "from": previous.as_str(), "to": next.as_str() })),
    )
    .await;

    Ok(details)
}

/// Active products whose unreserved stock is at or below the threshold.
pub async fn list_low_stock(
    state: &AppState,
    user: &AuthUser,
    query: LowStockQuery,
) -> AppResult<ApiResponse<ProductList>> {
    ensure_admin(user)?;
    let threshold = query.threshold.unwrap_or(5);
    let window = query.window();

    let finder = Products::find()
        .filter(ProdCol::IsActive.eq(true))
        .filter(
            Expr::expr(Expr::col(ProdCol::TotalQuantity).sub(Expr::col(ProdCol::ReservedQuantity)))
                .lte(threshold),
        )
        .order_by_asc(ProdCol::TotalQuantity)
        .order_by_asc(ProdCol::Slug);

    let total = finder.clone().count(&state.orm).await?;

    let items = finder
        .limit(window.per_page as u64)
        .offset(window.offset as u64)
        .all(&state.orm)
        .await?
        .into_iter()
        .map(Product::from)
        .collect();

    Ok(ApiResponse::success(
        "Low stock",
        ProductList { items },
        Some(Meta::for_window(&window, total)),
    ))
}

/// Restock (positive delta) or write off (negative delta) stock on hand.
pub async fn adjust_inventory(
    state: &AppState,
    user: &AuthUser,
    slug: &str,
    payload: InventoryAdjustRequest,
) -> AppResult<Product> {
    ensure_admin(user)?;
    if payload.delta == 0 || payload.delta.checked_neg().is_none() {
        return Err(AppError::BadRequest("delta must be a non-zero stock change".into()));
    }

    let product = find_product(&state.orm, slug).await?;
    if !ledger::restock(&state.orm, product.id, payload.delta).await? {
        return Err(AppError::BadRequest(
            "stock must stay between the reserved quantity and the stock limit".into(),
        ));
    }
    let updated = find_product(&state.orm, slug).await?;

    log_audit_best_effort(
        &state.orm,
        state.clock.now(),
        Some(user.user_id),
        "inventory_adjust",
        Some("products"),
        Some(serde_json::json!({ "product_id": updated.id, "delta": payload.delta })),
    )
    .await;

    Ok(updated.into())
}

/// Run the expiry sweep now instead of waiting for the next tick.
pub async fn run_expiry_sweep(state: &AppState, user: &AuthUser) -> AppResult<ExpirySummary> {
    ensure_admin(user)?;
    reservation_service::expire_stale(state).await
}
