pub mod audit_logs;
pub mod order_items;
pub mod order_status_history;
pub mod orders;
pub mod products;
pub mod reservations;
pub mod users;

pub use audit_logs::Entity as AuditLogs;
pub use order_items::Entity as OrderItems;
pub use order_status_history::Entity as OrderStatusHistory;
pub use orders::Entity as Orders;
pub use products::Entity as Products;
pub use reservations::Entity as Reservations;
pub use users::Entity as Users;
