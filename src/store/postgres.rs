//! PostgreSQL store backend
//!
//! Sets, hashes and counters map onto the `kv_sets`, `kv_hashes` and
//! `kv_counters` tables created by the migrations.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use sqlx::PgPool;
use tracing::instrument;

use super::ProxyStore;
use crate::error::{Result, RotatorError};

/// Store backed by a PostgreSQL connection pool
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProxyStore for PgStore {
    #[instrument(skip(self))]
    async fn members(&self, set: &str) -> Result<Vec<String>> {
        sqlx::query_scalar::<_, String>("SELECT member FROM kv_sets WHERE key = $1")
            .bind(set)
            .fetch_all(&self.pool)
            .await
            .map_err(RotatorError::store)
    }

    #[instrument(skip(self))]
    async fn add_to_set(&self, set: &str, member: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO kv_sets (key, member) VALUES ($1, $2) ON CONFLICT (key, member) DO NOTHING",
        )
        .bind(set)
        .bind(member)
        .execute(&self.pool)
        .await
        .map_err(RotatorError::store)?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_fields(&self, hash: &str, fields: &[&str]) -> Result<Vec<Option<String>>> {
        let names: Vec<String> = fields.iter().map(|f| f.to_string()).collect();

        let rows = sqlx::query_as::<_, (String, String)>(
            "SELECT field, value FROM kv_hashes WHERE key = $1 AND field = ANY($2)",
        )
        .bind(hash)
        .bind(&names)
        .fetch_all(&self.pool)
        .await
        .map_err(RotatorError::store)?;

        let mut found: HashMap<String, String> = rows.into_iter().collect();
        Ok(fields.iter().map(|f| found.remove(*f)).collect())
    }

    #[instrument(skip(self, fields))]
    async fn set_fields(&self, hash: &str, fields: &BTreeMap<String, String>) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(RotatorError::store)?;

        for (field, value) in fields {
            sqlx::query(
                r#"
                INSERT INTO kv_hashes (key, field, value) VALUES ($1, $2, $3)
                ON CONFLICT (key, field) DO UPDATE SET value = EXCLUDED.value
                "#,
            )
            .bind(hash)
            .bind(field)
            .bind(value)
            .execute(&mut *tx)
            .await
            .map_err(RotatorError::store)?;
        }

        tx.commit().await.map_err(RotatorError::store)?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn set_field(&self, hash: &str, field: &str, value: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO kv_hashes (key, field, value) VALUES ($1, $2, $3)
            ON CONFLICT (key, field) DO UPDATE SET value = EXCLUDED.value
            "#,
        )
        .bind(hash)
        .bind(field)
        .bind(value)
        .execute(&self.pool)
        .await
        .map_err(RotatorError::store)?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_field(&self, hash: &str, field: &str) -> Result<Option<String>> {
        sqlx::query_scalar::<_, String>(
            "SELECT value FROM kv_hashes WHERE key = $1 AND field = $2",
        )
        .bind(hash)
        .bind(field)
        .fetch_optional(&self.pool)
        .await
        .map_err(RotatorError::store)
    }

    #[instrument(skip(self))]
    async fn increment(&self, counter: &str) -> Result<i64> {
        sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO kv_counters (key, value) VALUES ($1, 1)
            ON CONFLICT (key) DO UPDATE SET value = kv_counters.value + 1
            RETURNING value
            "#,
        )
        .bind(counter)
        .fetch_one(&self.pool)
        .await
        .map_err(RotatorError::store)
    }

    fn backend_name(&self) -> &'static str {
        "postgres"
    }
}
