use async_trait::async_trait;
use chrono::Utc;
use sqlx::{PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use super::StoreError;
use crate::models::{NewOrder, Order, OrderPatch, TradeResult};

/// Persistence seam for the lifecycle manager. The production
/// implementation is [`PgOrderStore`]; tests swap in an in-memory double.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// The singleton open row for the given sizing profile, if any. More
    /// than one open row violates the single-position model and is
    /// reported as [`StoreError::Conflict`].
    async fn find_open(&self, reverse: bool) -> Result<Option<Order>, StoreError>;

    async fn insert(&self, new: &NewOrder, entry_order_id: &str) -> Result<Order, StoreError>;

    /// Apply a patch as a single UPDATE and return the fresh row.
    async fn update(&self, id: Uuid, patch: OrderPatch) -> Result<Order, StoreError>;

    async fn delete(&self, id: Uuid) -> Result<(), StoreError>;

    /// Aggregate spent/received over all closed rows.
    async fn trade_result(&self) -> Result<TradeResult, StoreError>;
}

#[derive(Debug, Clone)]
pub struct PgOrderStore {
    pool: PgPool,
}

impl PgOrderStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OrderStore for PgOrderStore {
    async fn find_open(&self, reverse: bool) -> Result<Option<Order>, StoreError> {
        let rows = sqlx::query_as::<_, Order>(
            r#"
            SELECT * FROM orders
            WHERE close_at IS NULL AND reverse = $1
            ORDER BY created_at
            "#,
        )
        .bind(reverse)
        .fetch_all(&self.pool)
        .await?;

        if rows.len() > 1 {
            return Err(StoreError::Conflict(rows.len()));
        }
        Ok(rows.into_iter().next())
    }

    async fn insert(&self, new: &NewOrder, entry_order_id: &str) -> Result<Order, StoreError> {
        let order = sqlx::query_as::<_, Order>(
            r#"
            INSERT INTO orders (
                order_type, value, value_tokens, leverage,
                price_open, price_tp1, price_tp2, price_sl,
                entry_order_id, reverse
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING *
            "#,
        )
        .bind(new.order_type)
        .bind(new.value)
        .bind(new.value_tokens)
        .bind(new.leverage)
        .bind(new.price_open)
        .bind(new.price_tp1)
        .bind(new.price_tp2)
        .bind(new.price_sl)
        .bind(entry_order_id)
        .bind(new.reverse)
        .fetch_one(&self.pool)
        .await?;

        Ok(order)
    }

    async fn update(&self, id: Uuid, patch: OrderPatch) -> Result<Order, StoreError> {
        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new("UPDATE orders SET updated_at = ");
        qb.push_bind(Utc::now());

        if let Some(v) = patch.price_open {
            qb.push(", price_open = ").push_bind(v);
        }
        if let Some(v) = patch.price_tp1 {
            qb.push(", price_tp1 = ").push_bind(v);
        }
        if let Some(v) = patch.price_tp2 {
            qb.push(", price_tp2 = ").push_bind(v);
        }
        if let Some(v) = patch.price_sl {
            qb.push(", price_sl = ").push_bind(v);
        }
        if let Some(v) = patch.price_close {
            qb.push(", price_close = ").push_bind(v);
        }
        if let Some(v) = patch.open_at {
            qb.push(", open_at = ").push_bind(v);
        }
        if let Some(v) = patch.tp1_at {
            qb.push(", tp1_at = ").push_bind(v);
        }
        if let Some(v) = patch.tp2_at {
            qb.push(", tp2_at = ").push_bind(v);
        }
        if let Some(v) = patch.sl_at {
            qb.push(", sl_at = ").push_bind(v);
        }
        if let Some(v) = patch.close_at {
            qb.push(", close_at = ").push_bind(v);
        }
        if let Some(v) = patch.tp1_executed_at {
            qb.push(", tp1_executed_at = ").push_bind(v);
        }
        if let Some(v) = patch.tp2_executed_at {
            qb.push(", tp2_executed_at = ").push_bind(v);
        }
        if let Some(v) = patch.sl_executed_at {
            qb.push(", sl_executed_at = ").push_bind(v);
        }
        if let Some(v) = patch.tp1_order_id {
            qb.push(", tp1_order_id = ").push_bind(v);
        }
        if let Some(v) = patch.tp2_order_id {
            qb.push(", tp2_order_id = ").push_bind(v);
        }
        if let Some(v) = patch.sl_order_id {
            qb.push(", sl_order_id = ").push_bind(v);
        }
        if let Some(v) = patch.close_order_id {
            qb.push(", close_order_id = ").push_bind(v);
        }

        qb.push(" WHERE id = ").push_bind(id);
        qb.push(" RETURNING *");

        qb.build_query_as::<Order>()
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound)
    }

    async fn delete(&self, id: Uuid) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM orders WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn trade_result(&self) -> Result<TradeResult, StoreError> {
        let result = sqlx::query_as::<_, TradeResult>(
            r#"
            SELECT
                COALESCE(SUM(value * price_open), 0)  AS spent,
                COALESCE(SUM(value * price_close), 0) AS received
            FROM orders
            WHERE close_at IS NOT NULL
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(result)
    }
}
