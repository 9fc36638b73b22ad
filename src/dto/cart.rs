use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::models::Reservation;

fn one() -> i32 {
    1
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AddToCartRequest {
    pub item_slug: String,
    #[serde(default = "one")]
    pub quantity: i32,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdateCartRequest {
    pub item_slug: String,
    pub quantity: i32,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RemoveFromCartRequest {
    pub item_slug: String,
}

/// Product slug to held quantity.
#[derive(Debug, Serialize, ToSchema)]
pub struct CartView {
    pub cart: BTreeMap<String, i32>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CartMutation {
    pub success: bool,
    pub reservation: Option<Reservation>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClearCartResult {
    pub success: bool,
    pub released_reservations: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_defaults_to_a_single_unit() {
        let req: AddToCartRequest = serde_json::from_str(r#"{"itemSlug":"widget-1"}"#).unwrap();
        assert_eq!(req.item_slug, "widget-1");
        assert_eq!(req.quantity, 1);
    }
}
