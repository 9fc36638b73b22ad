use sea_orm::{EntityTrait, Schema};
use sea_orm_migration::prelude::*;

use crate::entity::{
    AuditLogs, OrderItems, OrderStatusHistory, Orders, Products, Reservations, Users,
};

#[derive(DeriveMigrationName)]
pub struct Migration;

// Statements that the entity-derived schema cannot express. Both Postgres and
// SQLite accept this syntax, including the partial unique index.
const INDEXES: [&str; 5] = [
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_reservations_live_pair \
     ON reservations (user_id, product_id) WHERE status = 'reserved'",
    "CREATE INDEX IF NOT EXISTS idx_reservations_status_expires \
     ON reservations (status, expires_at)",
    "CREATE INDEX IF NOT EXISTS idx_orders_user_created ON orders (user_id, created_at)",
    "CREATE INDEX IF NOT EXISTS idx_order_items_order ON order_items (order_id)",
    "CREATE INDEX IF NOT EXISTS idx_order_status_history_order \
     ON order_status_history (order_id, created_at)",
];

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let schema = Schema::new(manager.get_database_backend());

        // parents before children so foreign keys resolve
        create(manager, &schema, Users).await?;
        create(manager, &schema, Products).await?;
        create(manager, &schema, Reservations).await?;
        create(manager, &schema, Orders).await?;
        create(manager, &schema, OrderItems).await?;
        create(manager, &schema, OrderStatusHistory).await?;
        create(manager, &schema, AuditLogs).await?;

        let conn = manager.get_connection();
        for stmt in INDEXES {
            conn.execute_unprepared(stmt).await?;
        }

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        for table in [
            "audit_logs",
            "order_status_history",
            "order_items",
            "orders",
            "reservations",
            "products",
            "users",
        ] {
            manager
                .drop_table(Table::drop().table(Alias::new(table)).if_exists().to_owned())
                .await?;
        }
        Ok(())
    }
}

async fn create<E: EntityTrait>(
    manager: &SchemaManager<'_>,
    schema: &Schema,
    entity: E,
) -> Result<(), DbErr> {
    manager
        .create_table(schema.create_table_from_entity(entity).if_not_exists().to_owned())
        .await
}
