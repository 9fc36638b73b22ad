use utoipa::{
    Modify, OpenApi,
    openapi::{
        self,
        OpenApi as OpenApiSpec,
        security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    },
};
use utoipa_scalar::{Scalar, Servable};

use crate::{
    dto::{
        cart::{
            AddToCartRequest, CartMutation, CartView, ClearCartResult, RemoveFromCartRequest,
            UpdateCartRequest,
        },
        orders::{
            OrderLineRequest, OrderList, OrderWithItems, PlaceOrderRequest,
            UpdateOrderStatusRequest,
        },
        products::{
            CreateProductRequest, InventoryAdjustRequest, LowStockQuery, ProductList,
            UpdateProductRequest,
        },
    },
    entity::{
        orders::{OrderStatus, PaymentStatus},
        reservations::ReservationStatus,
    },
    models::{Order, OrderItem, Product, Reservation, StatusHistoryEntry},
    response::{ApiResponse, Meta},
    routes::{admin, cart, health, orders, params, products},
    services::{pricing::PriceSummary, reservation_service::ExpirySummary},
};

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health_check,
        products::list_products,
        products::get_product,
        cart::get_cart,
        cart::add_to_cart,
        cart::update_cart,
        cart::remove_from_cart,
        cart::clear_cart,
        orders::place_order,
        orders::list_orders,
        orders::get_order,
        orders::update_order_status,
        admin::create_product,
        admin::update_product,
        admin::list_low_stock,
        admin::adjust_inventory,
        admin::expire_reservations
    ),
    components(
        schemas(
            Product,
            Reservation,
            ReservationStatus,
            Order,
            OrderItem,
            OrderStatus,
            PaymentStatus,
            StatusHistoryEntry,
            PriceSummary,
            ExpirySummary,
            AddToCartRequest,
            UpdateCartRequest,
            RemoveFromCartRequest,
            CartView,
            CartMutation,
            ClearCartResult,
            OrderLineRequest,
            PlaceOrderRequest,
            UpdateOrderStatusRequest,
            OrderList,
            OrderWithItems,
            CreateProductRequest,
            UpdateProductRequest,
            ProductList,
            InventoryAdjustRequest,
            LowStockQuery,
            params::Pagination,
            params::ProductQuery,
            params::OrderListQuery,
            Meta,
            ApiResponse<Product>,
            ApiResponse<ProductList>,
            ApiResponse<CartView>,
            ApiResponse<CartMutation>,
            ApiResponse<OrderWithItems>,
            ApiResponse<OrderList>,
            ApiResponse<ExpirySummary>
        )
    ),
    security(
        ("bearer_auth" = [])
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Health", description = "Health check endpoint"),
        (name = "Products", description = "Product catalogue with live availability"),
        (name = "Cart", description = "Stock reservations held by the current user"),
        (name = "Orders", description = "Order settlement and lifecycle"),
        (name = "Admin", description = "Catalogue, inventory and sweep administration"),
    )
)]
pub struct ApiDoc;

pub fn scalar_docs() -> Scalar<OpenApiSpec> {
    Scalar::with_url("/docs", ApiDoc::openapi())
}
