//! PostgreSQL storage backend
//!
//! Pool creation, migrations, health checks, and `PgBackend`, which keeps
//! each ledger collection as one JSONB row.

use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;
use std::time::Duration;

use crate::config::Config;
use crate::store::{StorageBackend, StoreError};

/// Database connection error
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("DATABASE_URL is not set")]
    MissingUrl,

    #[error("Failed to connect to database: {0}")]
    ConnectionError(String),

    #[error("Failed to run migrations: {0}")]
    MigrationError(String),

    #[error("Database health check failed: {0}")]
    HealthCheckError(String),
}

/// Create a database connection pool
pub async fn create_pool(config: &Config) -> Result<PgPool, DbError> {
    let url = config.database_url.as_deref().ok_or(DbError::MissingUrl)?;
    tracing::info!(
        url = %config.database_url_masked().unwrap_or_default(),
        "Connecting to database"
    );

    let pool = PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .acquire_timeout(Duration::from_secs(5))
        .idle_timeout(Duration::from_secs(600))
        .connect(url)
        .await
        .map_err(|e| DbError::ConnectionError(e.to_string()))?;

    tracing::info!("Database connection pool created successfully");

    Ok(pool)
}

/// Run database migrations
pub async fn run_migrations(pool: &PgPool) -> Result<(), DbError> {
    tracing::info!("Running database migrations...");

    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| DbError::MigrationError(e.to_string()))?;

    tracing::info!("Database migrations completed successfully");

    Ok(())
}

/// Check database connectivity (for health checks)
pub async fn check_health(pool: &PgPool) -> Result<(), DbError> {
    sqlx::query("SELECT 1")
        .fetch_one(pool)
        .await
        .map_err(|e| DbError::HealthCheckError(e.to_string()))?;

    Ok(())
}

/// Ledger collections stored in `ledger_collections`
#[derive(Clone)]
pub struct PgBackend {
    pool: PgPool,
}

impl PgBackend {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl StorageBackend for PgBackend {
    async fn load(&self, collection: &str) -> Result<Option<Value>, StoreError> {
        let row = sqlx::query("SELECT body FROM ledger_collections WHERE name = $1")
            .bind(collection)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| r.try_get::<Value, _>("body"))
            .transpose()
            .map_err(StoreError::from)
    }

    async fn save(&self, collection: &str, body: &Value) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO ledger_collections (name, body, updated_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (name) DO UPDATE SET body = EXCLUDED.body, updated_at = NOW()
            "#,
        )
        .bind(collection)
        .bind(body)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    fn describe(&self) -> String {
        "postgres (ledger_collections)".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_pool() -> Option<PgPool> {
        let url = std::env::var("TEST_DATABASE_URL").ok()?;
        let pool = PgPoolOptions::new().max_connections(2).connect(&url).await.ok()?;
        run_migrations(&pool).await.ok()?;
        Some(pool)
    }

    #[tokio::test]
    #[ignore = "needs TEST_DATABASE_URL"]
    async fn test_pg_backend_upsert_roundtrip() {
        let Some(pool) = test_pool().await else {
            return;
        };
        let backend = PgBackend::new(pool);
        let name = format!("test_{}", uuid::Uuid::new_v4().simple());

        assert!(backend.load(&name).await.unwrap().is_none());
        backend.save(&name, &serde_json::json!([1])).await.unwrap();
        backend.save(&name, &serde_json::json!([1, 2])).await.unwrap();
        assert_eq!(
            backend.load(&name).await.unwrap(),
            Some(serde_json::json!([1, 2]))
        );

        sqlx::query("DELETE FROM ledger_collections WHERE name = $1")
            .bind(&name)
            .execute(backend.pool())
            .await
            .unwrap();
    }
}
