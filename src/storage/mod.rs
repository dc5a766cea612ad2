//! Purchase record storage
//!
//! Purchases are written once per confirmation and never updated.
//! Postgres is used when a database URL is configured, otherwise records
//! stay in memory for the lifetime of the process.

use crate::error::GoldAgentError;
use crate::models::{NewPurchase, PurchaseRecord};
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{PgPool, Row};
use std::sync::Arc;
use tokio::sync::{OnceCell, RwLock};
use tracing::{info, warn};

/// Trait for purchase persistence
#[async_trait]
pub trait PurchaseStore: Send + Sync {
    async fn insert_purchase(&self, purchase: NewPurchase) -> Result<PurchaseRecord>;
    /// All purchases, newest first
    async fn list_purchases(&self) -> Result<Vec<PurchaseRecord>>;
}

/// In-memory purchase store for development
pub struct InMemoryPurchaseStore {
    records: Arc<RwLock<Vec<PurchaseRecord>>>,
}

impl InMemoryPurchaseStore {
    pub fn new() -> Self {
        Self {
            records: Arc::new(RwLock::new(Vec::new())),
        }
    }
}

impl Default for InMemoryPurchaseStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PurchaseStore for InMemoryPurchaseStore {
    async fn insert_purchase(&self, purchase: NewPurchase) -> Result<PurchaseRecord> {
        let mut records = self.records.write().await;

        let record = PurchaseRecord {
            id: records.len() as i64 + 1,
            user_name: purchase.user_name,
            phone: purchase.phone,
            email: purchase.email,
            grams: purchase.grams,
            amount_currency: purchase.amount_currency,
            price_per_gram: purchase.price_per_gram,
            created_at: Utc::now(),
        };

        records.push(record.clone());
        Ok(record)
    }

    async fn list_purchases(&self) -> Result<Vec<PurchaseRecord>> {
        let records = self.records.read().await;
        let mut items = records.clone();
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(items)
    }
}

/// Postgres-backed purchase store
pub struct PostgresPurchaseStore {
    pool: PgPool,
    schema_ready: Arc<OnceCell<()>>,
}

impl PostgresPurchaseStore {
    /// Build a store with a lazily connected pool
    pub fn connect_lazy(database_url: &str) -> Result<Self> {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(5)
            .connect_lazy(database_url)
            .map_err(|e| {
                GoldAgentError::DatabaseError(format!("Invalid purchase database URL: {}", e))
            })?;

        Ok(Self::new(pool))
    }

    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            schema_ready: Arc::new(OnceCell::new()),
        }
    }

    async fn ensure_schema(&self) -> Result<()> {
        self.schema_ready
            .get_or_try_init(|| async {
                sqlx::query(
                    r#"
                    CREATE TABLE IF NOT EXISTS gold_purchases (
                      id BIGSERIAL PRIMARY KEY,
                      user_name TEXT NOT NULL,
                      phone TEXT NOT NULL,
                      email TEXT NOT NULL,
                      grams NUMERIC NOT NULL,
                      amount_inr NUMERIC NOT NULL,
                      price_per_gram NUMERIC NOT NULL,
                      purchase_time TIMESTAMPTZ NOT NULL DEFAULT NOW()
                    );
                    "#,
                )
                .execute(&self.pool)
                .await?;

                Ok::<(), sqlx::Error>(())
            })
            .await
            .map_err(|e| {
                GoldAgentError::DatabaseError(format!(
                    "Failed to initialize gold_purchases schema: {}",
                    e
                ))
            })?;

        Ok(())
    }
}

fn record_from_row(row: &sqlx::postgres::PgRow) -> Result<PurchaseRecord> {
    Ok(PurchaseRecord {
        id: row.try_get::<i64, _>("id")?,
        user_name: row.try_get::<String, _>("user_name")?,
        phone: row.try_get::<String, _>("phone")?,
        email: row.try_get::<String, _>("email")?,
        grams: row.try_get::<Decimal, _>("grams")?,
        amount_currency: row.try_get::<Decimal, _>("amount_inr")?,
        price_per_gram: row.try_get::<Decimal, _>("price_per_gram")?,
        created_at: row.try_get::<DateTime<Utc>, _>("purchase_time")?,
    })
}

#[async_trait]
impl PurchaseStore for PostgresPurchaseStore {
    async fn insert_purchase(&self, purchase: NewPurchase) -> Result<PurchaseRecord> {
        self.ensure_schema().await?;

        let row = sqlx::query(
            r#"
            INSERT INTO gold_purchases
              (user_name, phone, email, grams, amount_inr, price_per_gram)
            VALUES
              ($1, $2, $3, $4, $5, $6)
            RETURNING id, user_name, phone, email, grams, amount_inr, price_per_gram, purchase_time
            "#,
        )
        .bind(&purchase.user_name)
        .bind(&purchase.phone)
        .bind(&purchase.email)
        .bind(purchase.grams)
        .bind(purchase.amount_currency)
        .bind(purchase.price_per_gram)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| GoldAgentError::DatabaseError(format!("Failed to insert purchase: {}", e)))?;

        let Some(row) = row else {
            return Err(GoldAgentError::StorageError(
                "Insert returned no purchase row".to_string(),
            ));
        };

        let record = record_from_row(&row)?;
        info!(purchase_id = record.id, "Purchase saved to database");
        Ok(record)
    }

    async fn list_purchases(&self) -> Result<Vec<PurchaseRecord>> {
        self.ensure_schema().await?;

        let rows = sqlx::query(
            r#"
            SELECT id, user_name, phone, email, grams, amount_inr, price_per_gram, purchase_time
            FROM gold_purchases
            ORDER BY purchase_time DESC, id DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| GoldAgentError::DatabaseError(format!("Failed to load purchases: {}", e)))?;

        rows.iter().map(record_from_row).collect()
    }
}

/// Pick the purchase store from configuration
pub fn build_store(database_url: Option<&str>) -> Arc<dyn PurchaseStore> {
    if let Some(url) = database_url {
        match PostgresPurchaseStore::connect_lazy(url) {
            Ok(store) => {
                info!("Purchase store backend: postgres");
                return Arc::new(store);
            }
            Err(error) => {
                warn!(
                    "Failed to initialize postgres purchase store, falling back to in-memory: {}",
                    error
                );
            }
        }
    }

    info!("Purchase store backend: in-memory");
    Arc::new(InMemoryPurchaseStore::new())
}
