mod common;

use chrono::Duration;
use repairshop_api::{
    dto::orders::{PlaceOrderRequest, UpdateOrderStatusRequest},
    entity::{
        orders::{Column as OrderCol, Entity as Orders, OrderStatus, PaymentStatus},
        reservations::{Column as ResCol, Entity as Reservations, ReservationStatus},
    },
    error::AppError,
    routes::params::OrderListQuery,
    services::{admin_service, order_service, reservation_service},
};
use sea_orm::{
    ColumnTrait, ConnectionTrait, DatabaseBackend, EntityTrait, PaginatorTrait, QueryFilter,
};

use common::{admin, counters, create_product, customer, setup, setup_with};

fn order_for(lines: &[(&str, i32)]) -> PlaceOrderRequest {
    let products: Vec<_> = lines
        .iter()
        .map(|(slug, quantity)| serde_json::json!({ "slug": slug, "quantity": quantity }))
        .collect();
    serde_json::from_value(serde_json::json!({ "products": products }))
        .expect("valid order request")
}

fn status_change(status: OrderStatus) -> UpdateOrderStatusRequest {
    UpdateOrderStatusRequest {
        status,
        note: None,
        payment_status: None,
    }
}

#[tokio::test]
async fn order_from_cart_consumes_the_holds() -> anyhow::Result<()> {
    let app = setup_with(|config| {
        config.shipping_fee = 1_500;
        config.tax_rate_bps = 1_000;
    })
    .await?;
    let screen = create_product(&app.state, "screen", 20_000, 4).await?;
    let paste = create_product(&app.state, "paste", 600, 10).await?;
    let user = customer(&app.state).await?;

    let held = reservation_service::add_to_cart(&app.state, &user, &screen.slug, 1).await?;
    reservation_service::add_to_cart(&app.state, &user, &paste.slug, 3).await?;

    let placed = order_service::place_order(
        &app.state,
        &user,
        serde_json::from_value(serde_json::json!({}))?,
    )
    .await?;

    assert_eq!(placed.order.subtotal, 21_800);
    assert_eq!(placed.order.shipping, 1_500);
    assert_eq!(placed.order.tax, 2_180);
    assert_eq!(placed.order.discount, 0);
    assert_eq!(placed.order.total, 25_480);
    assert_eq!(placed.order.status, OrderStatus::Pending);
    assert_eq!(placed.order.payment_status, PaymentStatus::Unpaid);
    assert_eq!(placed.order.payment_method, "cash");
    assert_eq!(placed.items.len(), 2);
    assert_eq!(placed.history.len(), 1);

    assert_eq!(counters(&app.state, &screen).await?, (3, 0));
    assert_eq!(counters(&app.state, &paste).await?, (7, 0));

    let consumed = Reservations::find_by_id(held.id).one(&app.state.orm).await?;
    assert_eq!(consumed.map(|r| r.status), Some(ReservationStatus::Purchased));
    Ok(())
}

#[tokio::test]
async fn empty_cart_is_rejected() -> anyhow::Result<()> {
    let app = setup().await?;
    let user = customer(&app.state).await?;

    let err = order_service::place_order(&app.state, &user, order_for(&[]))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::BadRequest(ref msg) if msg == "Cart is empty"));
    Ok(())
}

#[tokio::test]
async fn failing_line_leaves_every_line_untouched() -> anyhow::Result<()> {
    let app = setup().await?;
    let plenty = create_product(&app.state, "plenty", 100, 10).await?;
    let scarce = create_product(&app.state, "scarce", 100, 1).await?;
    let user = customer(&app.state).await?;

    let err = order_service::place_order(
        &app.state,
        &user,
        order_for(&[(plenty.slug.as_str(), 4), (scarce.slug.as_str(), 2)]),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::InsufficientStock(ref slug) if *slug == scarce.slug));

    assert_eq!(counters(&app.state, &plenty).await?, (10, 0));
    assert_eq!(counters(&app.state, &scarce).await?, (1, 0));
    let orders = Orders::find()
        .filter(OrderCol::UserId.eq(user.user_id))
        .count(&app.state.orm)
        .await?;
    assert_eq!(orders, 0);
    Ok(())
}

/// Makes every `UPDATE` of one product's row a silent no-op, so the ledger
/// sees its conditional update match nothing mid-settlement.
async fn jam_product_updates(app: &common::TestApp, slug: &str) -> anyhow::Result<()> {
    let name = format!("jam_{}", slug.replace('-', "_"));
    let statements = match app.state.orm.get_database_backend() {
        DatabaseBackend::Postgres => vec![
            format!(
                "CREATE FUNCTION {name}() RETURNS trigger AS $$ BEGIN RETURN NULL; END $$ LANGUAGE plpgsql"
            ),
            format!(
                "CREATE TRIGGER {name} BEFORE UPDATE ON products FOR EACH ROW \
                 WHEN (OLD.slug = '{slug}') EXECUTE FUNCTION {name}()"
            ),
        ],
        _ => vec![format!(
            "CREATE TRIGGER {name} BEFORE UPDATE ON products WHEN OLD.slug = '{slug}' \
             BEGIN SELECT RAISE(IGNORE); END"
        )],
    };
    for sql in statements {
        app.state.orm.execute_unprepared(&sql).await?;
    }
    Ok(())
}

#[tokio::test]
async fn stock_lost_mid_settlement_rolls_back_every_line() -> anyhow::Result<()> {
    let app = setup().await?;
    // Slug order decides settlement order: the held line commits first.
    let held = create_product(&app.state, "aaa-bracket", 400, 10).await?;
    let jammed = create_product(&app.state, "zzz-gasket", 150, 10).await?;
    let user = customer(&app.state).await?;

    let hold = reservation_service::add_to_cart(&app.state, &user, &held.slug, 2).await?;
    jam_product_updates(&app, &jammed.slug).await?;

    let err = order_service::place_order(
        &app.state,
        &user,
        order_for(&[(held.slug.as_str(), 2), (jammed.slug.as_str(), 1)]),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::OrderFailed(_)));

    assert_eq!(counters(&app.state, &held).await?, (10, 2));
    assert_eq!(counters(&app.state, &jammed).await?, (10, 0));
    let still_held = Reservations::find_by_id(hold.id).one(&app.state.orm).await?;
    assert_eq!(still_held.map(|r| r.status), Some(ReservationStatus::Reserved));
    let orders = Orders::find()
        .filter(OrderCol::UserId.eq(user.user_id))
        .count(&app.state.orm)
        .await?;
    assert_eq!(orders, 0);
    Ok(())
}

#[tokio::test]
async fn checkout_racing_cart_edits_keeps_the_ledger_consistent() -> anyhow::Result<()> {
    let app = setup().await?;
    let part = create_product(&app.state, "spring", 80, 40).await?;
    let user = customer(&app.state).await?;

    let mut ordered = 0;
    for _ in 0..4 {
        reservation_service::add_to_cart(&app.state, &user, &part.slug, 1).await?;

        let adder = {
            let state = app.state.clone();
            let user = user.clone();
            let slug = part.slug.clone();
            tokio::spawn(async move { reservation_service::add_to_cart(&state, &user, &slug, 1).await })
        };
        let buyer = {
            let state = app.state.clone();
            let user = user.clone();
            tokio::spawn(async move {
                order_service::place_order(&state, &user, serde_json::from_value(serde_json::json!({}))?)
                    .await
                    .map_err(anyhow::Error::from)
            })
        };

        adder.await??;
        let placed = buyer.await??;
        ordered += placed.items.iter().map(|item| item.quantity).sum::<i32>();
    }

    let live: i32 = Reservations::find()
        .filter(ResCol::UserId.eq(user.user_id))
        .filter(ResCol::ProductId.eq(part.id))
        .filter(ResCol::Status.eq(ReservationStatus::Reserved))
        .all(&app.state.orm)
        .await?
        .iter()
        .map(|r| r.quantity)
        .sum();
    assert!(ordered >= 4);
    assert_eq!(counters(&app.state, &part).await?, (40 - ordered, live));
    Ok(())
}

#[tokio::test]
async fn oversized_order_total_is_rejected_without_touching_stock() -> anyhow::Result<()> {
    let app = setup_with(|config| config.tax_rate_bps = 1_000).await?;
    let part = create_product(&app.state, "ingot", i64::MAX / 2, 5).await?;
    let user = customer(&app.state).await?;

    let err = order_service::place_order(&app.state, &user, order_for(&[(part.slug.as_str(), 1)]))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::BadRequest(_)));
    assert_eq!(counters(&app.state, &part).await?, (5, 0));
    Ok(())
}

#[tokio::test]
async fn missing_product_is_unavailable() -> anyhow::Result<()> {
    let app = setup().await?;
    let user = customer(&app.state).await?;

    let err = order_service::place_order(&app.state, &user, order_for(&[("ghost-part", 1)]))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InsufficientStock(ref slug) if slug == "ghost-part"));
    Ok(())
}

#[tokio::test]
async fn direct_order_cannot_take_units_held_by_others() -> anyhow::Result<()> {
    let app = setup().await?;
    let part = create_product(&app.state, "relay", 700, 3).await?;
    let holder = customer(&app.state).await?;
    let buyer = customer(&app.state).await?;

    reservation_service::add_to_cart(&app.state, &holder, &part.slug, 2).await?;

    let err = order_service::place_order(&app.state, &buyer, order_for(&[(part.slug.as_str(), 2)]))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InsufficientStock(_)));

    let placed =
        order_service::place_order(&app.state, &buyer, order_for(&[(part.slug.as_str(), 1)])).await?;
    assert_eq!(placed.order.total, 700);
    assert_eq!(counters(&app.state, &part).await?, (2, 2));
    Ok(())
}

#[tokio::test]
async fn duplicate_lines_are_merged() -> anyhow::Result<()> {
    let app = setup().await?;
    let part = create_product(&app.state, "washer", 25, 10).await?;
    let user = customer(&app.state).await?;

    let placed = order_service::place_order(
        &app.state,
        &user,
        order_for(&[(part.slug.as_str(), 2), (part.slug.as_str(), 3)]),
    )
    .await?;
    assert_eq!(placed.items.len(), 1);
    assert_eq!(placed.items[0].quantity, 5);
    assert_eq!(placed.items[0].line_total, 125);
    assert_eq!(counters(&app.state, &part).await?, (5, 0));
    Ok(())
}

#[tokio::test]
async fn lifecycle_appends_history_and_refund_marks_payment() -> anyhow::Result<()> {
    let app = setup().await?;
    let part = create_product(&app.state, "motor", 5_000, 3).await?;
    let user = customer(&app.state).await?;
    let boss = admin(&app.state).await?;

    let placed =
        order_service::place_order(&app.state, &user, order_for(&[(part.slug.as_str(), 1)])).await?;
    let id = placed.order.id;

    for next in [
        OrderStatus::Confirmed,
        OrderStatus::Processing,
        OrderStatus::Shipped,
        OrderStatus::Delivered,
    ] {
        app.clock.advance(Duration::minutes(1));
        admin_service::update_order_status(&app.state, &boss, id, status_change(next)).await?;
    }

    app.clock.advance(Duration::minutes(1));
    let refunded =
        admin_service::update_order_status(&app.state, &boss, id, status_change(OrderStatus::Refunded))
            .await?;
    assert_eq!(refunded.order.status, OrderStatus::Refunded);
    assert_eq!(refunded.order.payment_status, PaymentStatus::Refunded);

    let statuses: Vec<_> = refunded.history.iter().map(|h| h.status).collect();
    assert_eq!(
        statuses,
        vec![
            OrderStatus::Pending,
            OrderStatus::Confirmed,
            OrderStatus::Processing,
            OrderStatus::Shipped,
            OrderStatus::Delivered,
            OrderStatus::Refunded,
        ]
    );
    assert_eq!(refunded.history[1].changed_by, Some(boss.user_id));

    // Refunds do not put stock back on the shelf.
    assert_eq!(counters(&app.state, &part).await?, (2, 0));
    Ok(())
}

#[tokio::test]
async fn illegal_transitions_and_non_admins_are_rejected() -> anyhow::Result<()> {
    let app = setup().await?;
    let part = create_product(&app.state, "pump", 900, 3).await?;
    let user = customer(&app.state).await?;
    let boss = admin(&app.state).await?;

    let placed =
        order_service::place_order(&app.state, &user, order_for(&[(part.slug.as_str(), 1)])).await?;
    let id = placed.order.id;

    let err = admin_service::update_order_status(&app.state, &boss, id, status_change(OrderStatus::Shipped))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::BadRequest(_)));

    let err = admin_service::update_order_status(&app.state, &user, id, status_change(OrderStatus::Confirmed))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Forbidden));

    let err = admin_service::update_order_status(
        &app.state,
        &boss,
        uuid::Uuid::new_v4(),
        status_change(OrderStatus::Confirmed),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
    Ok(())
}

#[tokio::test]
async fn cancelling_restocks_the_lines() -> anyhow::Result<()> {
    let app = setup().await?;
    let part = create_product(&app.state, "belt", 1_200, 5).await?;
    let user = customer(&app.state).await?;
    let boss = admin(&app.state).await?;

    let placed =
        order_service::place_order(&app.state, &user, order_for(&[(part.slug.as_str(), 3)])).await?;
    assert_eq!(counters(&app.state, &part).await?, (2, 0));

    app.clock.advance(Duration::minutes(5));
    let cancelled = admin_service::update_order_status(
        &app.state,
        &boss,
        placed.order.id,
        UpdateOrderStatusRequest {
            status: OrderStatus::Cancelled,
            note: Some("customer called".into()),
            payment_status: None,
        },
    )
    .await?;
    assert_eq!(cancelled.order.status, OrderStatus::Cancelled);
    assert_eq!(cancelled.history.last().and_then(|h| h.note.clone()).as_deref(), Some("customer called"));
    assert_eq!(counters(&app.state, &part).await?, (5, 0));

    let err = admin_service::update_order_status(
        &app.state,
        &boss,
        placed.order.id,
        status_change(OrderStatus::Confirmed),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::BadRequest(_)));
    Ok(())
}

#[tokio::test]
async fn orders_are_scoped_to_their_owner() -> anyhow::Result<()> {
    let app = setup().await?;
    let part = create_product(&app.state, "filter", 300, 10).await?;
    let owner = customer(&app.state).await?;
    let stranger = customer(&app.state).await?;
    let boss = admin(&app.state).await?;

    let placed =
        order_service::place_order(&app.state, &owner, order_for(&[(part.slug.as_str(), 1)])).await?;
    order_service::place_order(&app.state, &owner, order_for(&[(part.slug.as_str(), 2)])).await?;

    let err = order_service::get_order(&app.state, &stranger, placed.order.id)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
    let seen = order_service::get_order(&app.state, &boss, placed.order.id).await?;
    assert_eq!(seen.order.id, placed.order.id);

    let own = order_service::list_orders(&app.state, &owner, OrderListQuery::default()).await?;
    assert_eq!(own.data.map(|d| d.orders.len()), Some(2));
    let theirs = order_service::list_orders(&app.state, &stranger, OrderListQuery::default()).await?;
    assert_eq!(theirs.data.map(|d| d.orders.len()), Some(0));

    let all = order_service::list_orders(&app.state, &boss, OrderListQuery::default()).await?;
    assert!(all.meta.and_then(|m| m.total).unwrap_or_default() >= 2);
    Ok(())
}
