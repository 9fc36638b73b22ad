use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::entity::orders::{OrderStatus, PaymentStatus};
use crate::models::{Order, OrderItem, StatusHistoryEntry};

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct OrderLineRequest {
    pub slug: String,
    pub quantity: i32,
}

/// Client-supplied prices or totals are ignored; only slugs and quantities
/// are read.
#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PlaceOrderRequest {
    #[serde(default)]
    pub products: Vec<OrderLineRequest>,
    pub payment_method: Option<String>,
    pub note: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdateOrderStatusRequest {
    pub status: OrderStatus,
    pub note: Option<String>,
    pub payment_status: Option<PaymentStatus>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OrderWithItems {
    pub order: Order,
    pub items: Vec<OrderItem>,
    pub history: Vec<StatusHistoryEntry>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OrderList {
    pub orders: Vec<Order>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_totals_are_not_part_of_the_request() {
        let req: PlaceOrderRequest = serde_json::from_str(
            r#"{"products":[{"slug":"widget-1","quantity":2,"price":1}],"total":1,"paymentMethod":"cash"}"#,
        )
        .unwrap();
        assert_eq!(req.products.len(), 1);
        assert_eq!(req.products[0].quantity, 2);
        assert_eq!(req.payment_method.as_deref(), Some("cash"));
    }

    #[test]
    fn status_update_parses_snake_case() {
        let req: UpdateOrderStatusRequest =
            serde_json::from_str(r#"{"status":"shipped","paymentStatus":"paid"}"#).unwrap();
        assert_eq!(req.status, OrderStatus::Shipped);
        assert_eq!(req.payment_status, Some(PaymentStatus::Paid));
    }
}
