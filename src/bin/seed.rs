use chrono::{Duration, Utc};
use repairshop_api::{
    config::AppConfig,
    db::{create_orm_conn, run_migrations},
    entity::{
        products::{ActiveModel as ProductActive, Column as ProdCol, Entity as Products},
        users::{ActiveModel as UserActive, Column as UserCol, Entity as Users},
    },
    middleware::auth::{ROLE_ADMIN, ROLE_USER, issue_token},
};
use sea_orm::{ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set};
use uuid::Uuid;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = AppConfig::from_env()?;

    let orm = create_orm_conn(&config.database_url).await?;
    run_migrations(&orm).await?;

    let admin_id = ensure_user(&orm, "admin@example.com", ROLE_ADMIN).await?;
    let user_id = ensure_user(&orm, "user@example.com", ROLE_USER).await?;
    seed_products(&orm).await?;

    let now = Utc::now();
    let ttl = Duration::days(7);
    println!("Seed completed. Admin ID: {admin_id}, User ID: {user_id}");
    println!(
        "Admin token: {}",
        issue_token(admin_id, ROLE_ADMIN, &config.jwt_secret, now, ttl)?
    );
    println!(
        "User token: {}",
        issue_token(user_id, ROLE_USER, &config.jwt_secret, now, ttl)?
    );
    Ok(())
}

async fn ensure_user(orm: &DatabaseConnection, email: &str, role: &str) -> anyhow::Result<Uuid> {
    if let Some(existing) = Users::find()
        .filter(UserCol::Email.eq(email))
        .one(orm)
        .await?
    {
        return Ok(existing.id);
    }

    let user = UserActive {
        id: Set(Uuid::new_v4()),
        email: Set(email.to_string()),
        role: Set(role.to_string()),
        created_at: Set(Utc::now().into()),
    }
    .insert(orm)
    .await?;

    println!("Ensured user {email} (role={role})");
    Ok(user.id)
}

async fn seed_products(orm: &DatabaseConnection) -> anyhow::Result<()> {
    let products = [
        ("widget-1", "Hinge Repair Widget", "Replacement hinge for laptop lids", 45_000, 3),
        ("screen-13", "13\" Display Panel", "Matte IPS panel, 1920x1080", 1_250_000, 12),
        ("battery-kit", "Battery Replacement Kit", "Cells, adhesive strips and tools", 380_000, 25),
        ("thermal-paste", "Thermal Paste", "4g syringe", 60_000, 200),
    ];

    for (slug, name, description, price, stock) in products {
        let exists = Products::find()
            .filter(ProdCol::Slug.eq(slug))
            .one(orm)
            .await?
            .is_some();
        if exists {
            continue;
        }

        let now = Utc::now();
        ProductActive {
            id: Set(Uuid::new_v4()),
            slug: Set(slug.to_string()),
            name: Set(name.to_string()),
            description: Set(Some(description.to_string())),
            price: Set(price),
            total_quantity: Set(stock),
            reserved_quantity: Set(0),
            is_active: Set(true),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
        }
        .insert(orm)
        .await?;
    }

    println!("Seeded products");
    Ok(())
}
