pub mod order_repo;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use thiserror::Error;

pub use order_repo::{OrderStore, PgOrderStore};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("row not found")]
    NotFound,

    /// More open rows than the single-position model allows.
    #[error("expected at most one open order, found {0}")]
    Conflict(usize),

    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

pub async fn init_pool(database_url: &str) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await?;

    // Verify connectivity
    sqlx::query("SELECT 1").execute(&pool).await?;

    sqlx::migrate!("./migrations").run(&pool).await?;

    Ok(pool)
}
