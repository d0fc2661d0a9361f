use crate::error::Result;
use sqlx::{Executor, PgPool};
use tracing::info;

/// Run all database migrations
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    create_migrations_table(pool).await?;

    for (version, name, sql) in get_migrations() {
        if !is_migration_applied(pool, version).await? {
            info!(version = version, name = name, "Applying migration");

            // Multi-statement migrations go through the simple query protocol.
            pool.execute(sql).await?;

            record_migration(pool, version, name).await?;

            info!(version = version, name = name, "Migration applied successfully");
        }
    }

    Ok(())
}

/// Create the migrations tracking table
async fn create_migrations_table(pool: &PgPool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            name VARCHAR(255) NOT NULL,
            applied_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Check if a migration has been applied
async fn is_migration_applied(pool: &PgPool, version: i32) -> Result<bool> {
    let result = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM schema_migrations WHERE version = $1",
    )
    .bind(version)
    .fetch_one(pool)
    .await?;

    Ok(result > 0)
}

/// Record a migration as applied
async fn record_migration(pool: &PgPool, version: i32, name: &str) -> Result<()> {
    sqlx::query("INSERT INTO schema_migrations (version, name) VALUES ($1, $2)")
        .bind(version)
        .bind(name)
        .execute(pool)
        .await?;

    Ok(())
}

/// Get all migrations in order
fn get_migrations() -> Vec<(i32, &'static str, &'static str)> {
    vec![(1, "key_value_schema", MIGRATION_001_KEY_VALUE_SCHEMA)]
}

// Migration 1: sets, hashes and counters backing the proxy store
const MIGRATION_001_KEY_VALUE_SCHEMA: &str = r#"
-- Set members (proxies)
CREATE TABLE IF NOT EXISTS kv_sets (
    key VARCHAR(255) NOT NULL,
    member VARCHAR(255) NOT NULL,
    PRIMARY KEY (key, member)
);

-- Hash fields (proxy:<id>, proxies_ids)
CREATE TABLE IF NOT EXISTS kv_hashes (
    key VARCHAR(255) NOT NULL,
    field VARCHAR(255) NOT NULL,
    value TEXT NOT NULL,
    PRIMARY KEY (key, field)
);

-- Counters (proxies_next_id)
CREATE TABLE IF NOT EXISTS kv_counters (
    key VARCHAR(255) PRIMARY KEY,
    value BIGINT NOT NULL DEFAULT 0
);
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_are_ordered_and_unique() {
        let migrations = get_migrations();
        let versions: Vec<i32> = migrations.iter().map(|(v, _, _)| *v).collect();

        let mut sorted = versions.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(versions, sorted);
    }

    #[test]
    fn test_key_value_schema_covers_store_tables() {
        for table in ["kv_sets", "kv_hashes", "kv_counters"] {
            assert!(MIGRATION_001_KEY_VALUE_SCHEMA.contains(table));
        }
    }
}
