use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder,
    QuerySelect, Set,
    sea_query::{Expr, Func, LikeExpr},
};
use uuid::Uuid;

use crate::{
    audit::log_audit_best_effort,
    dto::products::{CreateProductRequest, ProductList, UpdateProductRequest},
    entity::products::{ActiveModel, Column, Entity as Products},
    error::{AppError, AppResult},
    middleware::auth::{AuthUser, ensure_admin},
    models::Product,
    response::{ApiResponse, Meta},
    routes::params::{ProductQuery, ProductSortBy, SortOrder},
    services::reservation_service::find_product,
    state::AppState,
};

/// Public catalog listing: active products only.
pub async fn list_products(
    state: &AppState,
    query: ProductQuery,
) -> AppResult<ApiResponse<ProductList>> {
    let window = query.window();
    let mut condition = Condition::all().add(Column::IsActive.eq(true));

    if let Some(search) = query.q.as_ref().map(|s| s.trim()).filter(|s| !s.is_empty()) {
        let pattern = search_pattern(search);
        let matches_term = |column: Column| {
            Expr::expr(Func::lower(Expr::col(column)))
                .like(LikeExpr::new(pattern.clone()).escape('\\'))
        };
        condition = condition.add(
            Condition::any()
                .add(matches_term(Column::Name))
                .add(matches_term(Column::Slug))
                .add(matches_term(Column::Description)),
        );
    }

    if let Some(min_price) = query.min_price {
        condition = condition.add(Column::Price.gte(min_price));
    }

    if let Some(max_price) = query.max_price {
        condition = condition.add(Column::Price.lte(max_price));
    }

    let sort_col = match query.sort_by.as_ref().unwrap_or(&ProductSortBy::CreatedAt) {
        ProductSortBy::CreatedAt => Column::CreatedAt,
        ProductSortBy::Price => Column::Price,
        ProductSortBy::Name => Column::Name,
    };

    let mut finder = Products::find().filter(condition);
    finder = match query.sort_order.unwrap_or(SortOrder::Desc) {
        SortOrder::Asc => finder.order_by_asc(sort_col),
        SortOrder::Desc => finder.order_by_desc(sort_col),
    };

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
        "Products",
        ProductList { items },
        Some(Meta::for_window(&window, total)),
    ))
}

/// Lowercased `%term%` pattern with LIKE wildcards in the term escaped, so
/// matching is case-insensitive on every backend.
fn search_pattern(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len() + 2);
    escaped.push('%');
    for c in term.to_lowercase().chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('%');
    escaped
}

pub async fn get_product(state: &AppState, slug: &str) -> AppResult<Product> {
    let product = find_product(&state.orm, slug).await?;
    if !product.is_active {
        return Err(AppError::not_found(format!("product {slug}")));
    }
    Ok(product.into())
}

pub async fn create_product(
    state: &AppState,
    user: &AuthUser,
    payload: CreateProductRequest,
) -> AppResult<Product> {
    ensure_admin(user)?;
    let slug = payload.slug.trim().to_lowercase();
    if slug.is_empty() || !slug.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
        return Err(AppError::BadRequest(
            "slug must be lowercase letters, digits and dashes".into(),
        ));
    }
    if payload.price < 0 || payload.total_quantity < 0 {
        return Err(AppError::BadRequest(
            "price and quantity must not be negative".into(),
        ));
    }

    let now = state.clock.now();
    let product = ActiveModel {
        id: Set(Uuid::new_v4()),
        slug: Set(slug),
        name: Set(payload.name),
        description: Set(payload.description),
        price: Set(payload.price),
        total_quantity: Set(payload.total_quantity),
        reserved_quantity: Set(0),
        is_active: Set(payload.is_active.unwrap_or(true)),
        created_at: Set(now.into()),
        updated_at: Set(now.into()),
    }
    .insert(&state.orm)
    .await
    .map_err(|err| AppError::from_write(err, "product slug"))?;

    log_audit_best_effort(
        &state.orm,
        now,
        Some(user.user_id),
        "product_create",
        Some("products"),
        Some(serde_json::json!({ "product_id": product.id, "slug": product.slug })),
    )
    .await;

    Ok(product.into())
}

/// Catalog edits. Stock levels are not editable here; they only move through
/// the inventory ledger.
pub async fn update_product(
    state: &AppState,
    user: &AuthUser,
    slug: &str,
    payload: UpdateProductRequest,
) -> AppResult<Product> {
    ensure_admin(user)?;
    if payload.price.is_some_and(|price| price < 0) {
        return Err(AppError::BadRequest("price must not be negative".into()));
    }

    let existing = find_product(&state.orm, slug).await?;
    let now = state.clock.now();

    let mut active: ActiveModel = existing.into();
    if let Some(name) = payload.name {
        active.name = Set(name);
    }
    if let Some(description) = payload.description {
        active.description = Set(Some(description));
    }
    if let Some(price) = payload.price {
        active.price = Set(price);
    }
    if let Some(is_active) = payload.is_active {
        active.is_active = Set(is_active);
    }
    active.updated_at = Set(now.into());

    // Only the columns set above are written, so concurrent ledger updates
    // to the quantity columns are not overwritten.
    let product = active.update(&state.orm).await?;

    log_audit_best_effort(
        &state.orm,
        now,
        Some(user.user_id),
        "product_update",
        Some("products"),
        Some(serde_json::json!({ "product_id": product.id })),
    )
    .await;

    Ok(product.into())
}
