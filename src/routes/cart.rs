use axum::{
    Json, Router,
    extract::State,
    routing::{get, post},
};

use crate::{
    dto::cart::{
        AddToCartRequest, CartMutation, CartView, ClearCartResult, RemoveFromCartRequest,
        UpdateCartRequest,
    },
    error::AppResult,
    middleware::auth::AuthUser,
    response::ApiResponse,
    services::{cart_service, reservation_service},
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(get_cart))
        .route("/add", post(add_to_cart))
        .route("/update", post(update_cart))
        .route("/remove", post(remove_from_cart))
        .route("/clear", post(clear_cart))
}

#[utoipa::path(
    get,
    path = "/api/cart",
    responses(
        (status = 200, description = "Unexpired holds of the current user, by product slug", body = ApiResponse<CartView>),
        (status = 401, description = "Unauthorized"),
    ),
    security(("bearer_auth" = [])),
    tag = "Cart"
)]
pub async fn get_cart(
    State(state): State<AppState>,
    user: AuthUser,
) -> AppResult<Json<ApiResponse<CartView>>> {
    let cart = cart_service::get_cart(&state, &user).await?;
    Ok(Json(ApiResponse::ok(cart)))
}

#[utoipa::path(
    post,
    path = "/api/cart/add",
    request_body = AddToCartRequest,
    responses(
        (status = 200, description = "Stock reserved", body = ApiResponse<CartMutation>),
        (status = 400, description = "Bad request or insufficient stock"),
        (status = 404, description = "Unknown product"),
    ),
    security(("bearer_auth" = [])),
    tag = "Cart"
)]
pub async fn add_to_cart(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<AddToCartRequest>,
) -> AppResult<Json<ApiResponse<CartMutation>>> {
    let reservation =
        reservation_service::add_to_cart(&state, &user, &payload.item_slug, payload.quantity)
            .await?;
    Ok(Json(ApiResponse::ok(CartMutation {
        success: true,
        reservation: Some(reservation),
    })))
}

#[utoipa::path(
    post,
    path = "/api/cart/update",
    request_body = UpdateCartRequest,
    responses(
        (status = 200, description = "Held quantity set; 0 removes the hold", body = ApiResponse<CartMutation>),
        (status = 400, description = "Bad request or insufficient stock"),
        (status = 404, description = "Unknown product"),
    ),
    security(("bearer_auth" = [])),
    tag = "Cart"
)]
pub async fn update_cart(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<UpdateCartRequest>,
) -> AppResult<Json<ApiResponse<CartMutation>>> {
    let reservation =
        reservation_service::set_quantity(&state, &user, &payload.item_slug, payload.quantity)
            .await?;
    Ok(Json(ApiResponse::ok(CartMutation {
        success: true,
        reservation,
    })))
}

#[utoipa::path(
    post,
    path = "/api/cart/remove",
    request_body = RemoveFromCartRequest,
    responses(
        (status = 200, description = "One unit released", body = ApiResponse<CartMutation>),
        (status = 404, description = "Nothing held for this product"),
    ),
    security(("bearer_auth" = [])),
    tag = "Cart"
)]
pub async fn remove_from_cart(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<RemoveFromCartRequest>,
) -> AppResult<Json<ApiResponse<CartMutation>>> {
    let reservation = reservation_service::remove_one(&state, &user, &payload.item_slug).await?;
    Ok(Json(ApiResponse::ok(CartMutation {
        success: true,
        reservation,
    })))
}

#[utoipa::path(
    post,
    path = "/api/cart/clear",
    responses(
        (status = 200, description = "Every hold released", body = ApiResponse<ClearCartResult>),
    ),
    security(("bearer_auth" = [])),
    tag = "Cart"
)]
pub async fn clear_cart(
    State(state): State<AppState>,
    user: AuthUser,
) -> AppResult<Json<ApiResponse<ClearCartResult>>> {
    let released = reservation_service::clear_cart(&state, &user).await?;
    Ok(Json(ApiResponse::ok(ClearCartResult {
        success: true,
        released_reservations: released,
    })))
}
