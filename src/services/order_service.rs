use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, DatabaseTransaction, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set, TransactionTrait,
};
use uuid::Uuid;

use crate::{
    audit::log_audit_best_effort,
    dto::orders::{OrderList, OrderWithItems, PlaceOrderRequest},
    entity::{
        order_items::{ActiveModel as OrderItemActive, Column as OrderItemCol, Entity as OrderItems},
        order_status_history::{
            ActiveModel as HistoryActive, Column as HistoryCol, Entity as OrderStatusHistory,
        },
        orders::{
            ActiveModel as OrderActive, Column as OrderCol, Entity as Orders, Model as OrderModel,
            OrderStatus, PaymentStatus,
        },
        products::{Column as ProdCol, Entity as Products, Model as ProductModel},
        reservations::{Model as ReservationModel, ReservationStatus},
    },
    error::{AppError, AppResult},
    middleware::auth::AuthUser,
    models::{Order, OrderItem},
    response::{ApiResponse, Meta},
    routes::params::{OrderListQuery, SortOrder},
    services::{cart_service, ledger, pricing, reservation_service},
    state::AppState,
};

const DEFAULT_PAYMENT_METHOD: &str = "cash";

/// A validated line, ready to be committed.
struct SettlementLine {
    product: ProductModel,
    hold: Option<ReservationModel>,
    quantity: i32,
}

/// Convert the requested lines (or, with none given, the caller's cart) into
/// an order. Stock checks, ledger commits, reservation consumption and the
/// order rows all happen in one transaction: either the whole order exists
/// and inventory is reduced, or nothing changed.
pub async fn place_order(
    state: &AppState,
    user: &AuthUser,
    payload: PlaceOrderRequest,
) -> AppResult<OrderWithItems> {
    let now = state.clock.now();
    let payment_method = payment_method(payload.payment_method.as_deref())?;
    let lines = requested_lines(state, user, &payload, now).await?;

    // Same per-pair locks as the cart, taken in slug order.
    let mut _guards = Vec::with_capacity(lines.len());
    for slug in lines.keys() {
        _guards.push(state.cart_locks.acquire((user.user_id, slug.clone())).await);
    }

    let txn = state.orm.begin().await?;

    // Validate every line before writing anything.
    let mut plan = Vec::with_capacity(lines.len());
    for (slug, quantity) in lines {
        let product = match Products::find()
            .filter(ProdCol::Slug.eq(slug.as_str()))
            .one(&txn)
            .await?
        {
            Some(product) if product.is_active => product,
            _ => return Err(AppError::InsufficientStock(slug)),
        };
        let hold = reservation_service::open_reservation(&txn, user.user_id, product.id).await?;
        let held = hold.as_ref().map_or(0, |r| r.quantity);
        if product.total_quantity - product.reserved_quantity + held < quantity {
            return Err(AppError::InsufficientStock(slug));
        }
        plan.push(SettlementLine {
            product,
            hold,
            quantity,
        });
    }

    let settled = settle(state, &txn, user, &plan, &payment_method, payload.note, now)
        .await
        .map_err(|err| match err {
            AppError::OrderFailed(_) | AppError::BadRequest(_) => err,
            other => {
                tracing::error!(error = ?other, user_id = %user.user_id, "settlement aborted");
                AppError::OrderFailed("order could not be completed".into())
            }
        })?;

    txn.commit().await.map_err(|err| {
        tracing::error!(error = %err, user_id = %user.user_id, "settlement commit failed");
        AppError::OrderFailed("order could not be completed".into())
    })?;

    tracing::info!(
        order_number = %settled.order.order_number,
        user_id = %user.user_id,
        total = settled.order.total,
        "order placed"
    );
    log_audit_best_effort(
        &state.orm,
        now,
        Some(user.user_id),
        "order_placed",
        Some("orders"),
        Some(serde_json::json!({
            "order_id": settled.order.id,
            "order_number": settled.order.order_number,
        })),
    )
    .await;

    Ok(settled)
}

async fn settle(
    state: &AppState,
    txn: &DatabaseTransaction,
    user: &AuthUser,
    plan: &[SettlementLine],
    payment_method: &str,
    note: Option<String>,
    now: DateTime<Utc>,
) -> AppResult<OrderWithItems> {
    let mut subtotal: i64 = 0;
    for line in plan {
        let line_total = pricing::line_total(line.product.price, line.quantity)
            .ok_or_else(|| AppError::BadRequest("order total out of range".into()))?;
        subtotal = subtotal
            .checked_add(line_total)
            .ok_or_else(|| AppError::BadRequest("order total out of range".into()))?;
    }
    let summary = pricing::summarize(&state.config, subtotal)
        .ok_or_else(|| AppError::BadRequest("order total out of range".into()))?;

    for line in plan {
        // Consume the buyer's hold first; if the sweeper or a cart action
        // already released it, the purchase must be covered by free stock.
        let held = match &line.hold {
            Some(hold) => {
                let claimed = reservation_service::claim(
                    txn,
                    hold.id,
                    ReservationStatus::Purchased,
                    now,
                    false,
                )
                .await?;
                if claimed { hold.quantity } else { 0 }
            }
            None => 0,
        };

        if !ledger::commit_purchase(txn, line.product.id, line.quantity, held).await? {
            tracing::warn!(
                product = %line.product.slug,
                quantity = line.quantity,
                "stock changed during settlement"
            );
            return Err(AppError::OrderFailed(format!(
                "stock for {} changed during checkout",
                line.product.slug
            )));
        }
    }

    let order_id = Uuid::new_v4();
    let order = OrderActive {
        id: Set(order_id),
        order_number: Set(build_order_number(now)),
        user_id: Set(user.user_id),
        subtotal: Set(summary.subtotal),
        shipping: Set(summary.shipping),
        discount: Set(summary.discount),
        tax: Set(summary.tax),
        total: Set(summary.total),
        status: Set(OrderStatus::Pending),
        payment_method: Set(payment_method.to_string()),
        payment_status: Set(PaymentStatus::Unpaid),
        note: Set(note),
        created_at: Set(now.into()),
        updated_at: Set(now.into()),
    }
    .insert(txn)
    .await?;

    let mut items: Vec<OrderItem> = Vec::with_capacity(plan.len());
    for line in plan {
        let item = OrderItemActive {
            id: Set(Uuid::new_v4()),
            order_id: Set(order.id),
            product_id: Set(line.product.id),
            product_slug: Set(line.product.slug.clone()),
            product_name: Set(line.product.name.clone()),
            unit_price: Set(line.product.price),
            quantity: Set(line.quantity),
            line_total: Set(line.product.price * i64::from(line.quantity)),
            created_at: Set(now.into()),
        }
        .insert(txn)
        .await?;
        items.push(item.into());
    }

    let history = HistoryActive {
        id: Set(Uuid::new_v4()),
        order_id: Set(order.id),
        status: Set(OrderStatus::Pending),
        note: Set(Some("Order placed".to_string())),
        changed_by: Set(Some(user.user_id)),
        created_at: Set(now.into()),
    }
    .insert(txn)
    .await?;

    Ok(OrderWithItems {
        order: order.into(),
        items,
        history: vec![history.into()],
    })
}

/// Lines to settle, merged by slug. Falls back to the live cart when the
/// request names no products.
async fn requested_lines(
    state: &AppState,
    user: &AuthUser,
    payload: &PlaceOrderRequest,
    now: DateTime<Utc>,
) -> AppResult<BTreeMap<String, i32>> {
    if payload.products.is_empty() {
        let cart = cart_service::cart_lines(&state.orm, user.user_id, now).await?;
        if cart.is_empty() {
            return Err(AppError::BadRequest("Cart is empty".into()));
        }
        return Ok(cart);
    }

    let mut lines = BTreeMap::new();
    for line in &payload.products {
        let slug = line.slug.trim();
        if slug.is_empty() {
            return Err(AppError::BadRequest("product slug is required".into()));
        }
        if line.quantity <= 0 {
            return Err(AppError::BadRequest(format!(
                "quantity for {slug} must be greater than 0"
            )));
        }
        let entry: &mut i32 = lines.entry(slug.to_string()).or_insert(0);
        *entry = entry
            .checked_add(line.quantity)
            .ok_or_else(|| AppError::BadRequest(format!("quantity for {slug} out of range")))?;
    }
    Ok(lines)
}

fn payment_method(requested: Option<&str>) -> AppResult<String> {
    match requested.map(str::trim) {
        None | Some("") => Ok(DEFAULT_PAYMENT_METHOD.to_string()),
        Some(method) if method.len() <= 32 => Ok(method.to_string()),
        Some(_) => Err(AppError::BadRequest("payment method is too long".into())),
    }
}

pub async fn list_orders(
    state: &AppState,
    user: &AuthUser,
    query: OrderListQuery,
) -> AppResult<ApiResponse<OrderList>> {
    let window = query.window();
    let mut condition = Condition::all();
    if !user.is_admin() {
        condition = condition.add(OrderCol::UserId.eq(user.user_id));
    }
    if let Some(status) = query.status {
        condition = condition.add(OrderCol::Status.eq(status));
    }

    let sort_order = query.sort_order.unwrap_or(SortOrder::Desc);

    let mut finder = Orders::find().filter(condition);
    finder = match sort_order {
        SortOrder::Asc => finder.order_by_asc(OrderCol::CreatedAt),
        SortOrder::Desc => finder.order_by_desc(OrderCol::CreatedAt),
    };

    let total = finder.clone().count(&state.orm).await?;

    let orders = finder
        .limit(window.per_page as u64)
        .offset(window.offset as u64)
        .all(&state.orm)
        .await?
        .into_iter()
        .map(Order::from)
        .collect();

    Ok(ApiResponse::success(
        "Ok",
        OrderList { orders },
        Some(Meta::for_window(&window, total)),
    ))
}

/// Owners see their own orders, admins see all; anything else is a 404.
pub async fn get_order(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<OrderWithItems> {
    let order = Orders::find_by_id(id)
        .one(&state.orm)
        .await?
        .filter(|order| user.is_admin() || order.user_id == user.user_id)
        .ok_or_else(|| AppError::not_found(format!("order {id}")))?;

    load_order_details(&state.orm, order).await
}

pub async fn load_order_details<C: ConnectionTrait>(
    conn: &C,
    order: OrderModel,
) -> AppResult<OrderWithItems> {
    let items = OrderItems::find()
        .filter(OrderItemCol::OrderId.eq(order.id))
        .order_by_asc(OrderItemCol::ProductSlug)
        .all(conn)
        .await?
        .into_iter()
        .map(OrderItem::from)
        .collect();

    let history = OrderStatusHistory::find()
        .filter(HistoryCol::OrderId.eq(order.id))
        .order_by_asc(HistoryCol::CreatedAt)
        .all(conn)
        .await?
        .into_iter()
        .map(Into::into)
        .collect();

    Ok(OrderWithItems {
        order: order.into(),
        items,
        history,
    })
}

pub fn build_order_number(now: DateTime<Utc>) -> String {
    let stamp = now.format("%Y%m%d%H%M%S");
    let suffix = Uuid::new_v4().simple().to_string();
    format!("ORD-{}-{}", stamp, suffix[..6].to_uppercase())
}
