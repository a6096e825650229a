use anyhow::Result;
use sqlx::postgres::PgPoolOptions;
use sqlx::{Pool, Postgres};

use crate::config::DatabaseConfig;

pub type Db = Pool<Postgres>;

pub async fn connect(cfg: &DatabaseConfig) -> Result<Db> {
    let pool = PgPoolOptions::new()
        .max_connections(cfg.max_connections)
        .connect(&cfg.url)
        .await?;
    tracing::info!("database connection established");
    Ok(pool)
}
