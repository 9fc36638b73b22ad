pub mod admin_service;
pub mod cart_service;
pub mod ledger;
pub mod order_service;
pub mod pricing;
pub mod product_service;
pub mod reservation_service;
