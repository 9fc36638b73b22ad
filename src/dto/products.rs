use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::{
    models::Product,
    routes::params::{PageWindow, Pagination},
};

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateProductRequest {
    pub slug: String,
    pub name: String,
    pub description: Option<String>,
    pub price: i64,
    pub total_quantity: i32,
    pub is_active: Option<bool>,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct UpdateProductRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub price: Option<i64>,
    pub is_active: Option<bool>,
}

#[derive(Serialize, ToSchema)]
#[serde(transparent)]
pub struct ProductList {
    #[schema(value_type = Vec<Product>)]
    pub items: Vec<Product>,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct LowStockQuery {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
    pub threshold: Option<i32>,
}

impl LowStockQuery {
    pub fn window(&self) -> PageWindow {
        Pagination {
            page: self.page,
            per_page: self.per_page,
        }
        .normalize()
    }
}

/// Positive values restock, negative values write stock off.
#[derive(Debug, Deserialize, ToSchema)]
pub struct InventoryAdjustRequest {
    pub delta: i32,
}
