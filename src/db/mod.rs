use anyhow::Result;
use sqlx::postgres::PgPoolOptions;
use sqlx::{Pool, Postgres};
use tracing::info;

pub mod queries;

pub type DbPool = Pool<Postgres>;

pub async fn init_pool(database_url: &str, max_connections: u32) -> Result<DbPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await?;
    Ok(pool)
}

/// Creates the location table and its lookup index when they are missing.
pub async fn ensure_schema(pool: &DbPool) -> Result<()> {
    sqlx::query(queries::CREATE_LOCATIONS_TABLE)
        .execute(pool)
        .await?;
    sqlx::query(queries::CREATE_LOCATIONS_BUS_INDEX)
        .execute(pool)
        .await?;
    info!("Location schema ready");
    Ok(())
}
