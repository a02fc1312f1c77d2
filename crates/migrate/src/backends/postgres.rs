//! PostgreSQL Backend Implementation
//!
//! Runs migrations through a sqlx connection pool. Script statements are sent
//! unprepared so a single statement may carry several commands. The run lock
//! is a session-level advisory lock held on a dedicated pooled connection.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::pool::PoolConnection;
use sqlx::postgres::PgPoolOptions;
use sqlx::{Executor, Pool, Postgres, Row};
use std::time::Duration;
use tokio::sync::Mutex;

use super::core::*;
use crate::backends::BackendType;
use crate::change::{Change, ChangeId};
use crate::error::{MigrateError, MigrateResult};

const MAX_CONNECTIONS: u32 = 4;
const ACQUIRE_TIMEOUT_SECS: u64 = 30;

/// PostgreSQL migration backend
pub struct PostgresBackend {
    pool: Pool<Postgres>,
    lock_connection: Mutex<Option<PoolConnection<Postgres>>>,
}

impl PostgresBackend {
    /// Open a connection pool for `database_url`
    pub async fn connect(database_url: &str) -> MigrateResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .acquire_timeout(Duration::from_secs(ACQUIRE_TIMEOUT_SECS))
            .connect(database_url)
            .await
            .map_err(|e| {
                MigrateError::Database(format!("Failed to connect to PostgreSQL: {}", e))
            })?;

        Ok(Self::from_pool(pool))
    }

    /// Use an existing pool
    pub fn from_pool(pool: Pool<Postgres>) -> Self {
        Self {
            pool,
            lock_connection: Mutex::new(None),
        }
    }
}

#[async_trait]
impl MigrationBackend for PostgresBackend {
    fn backend_type(&self) -> BackendType {
        BackendType::PostgreSQL
    }

    async fn begin(&self) -> MigrateResult<Box<dyn MigrationTransaction>> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| MigrateError::Database(format!("Failed to begin transaction: {}", e)))?;
        Ok(Box::new(PostgresTransaction { tx: Some(tx) }))
    }

    async fn changelog_exists(&self, table: &str) -> MigrateResult<bool> {
        let exists: bool = sqlx::query_scalar("SELECT to_regclass($1) IS NOT NULL")
            .bind(table)
            .fetch_one(&self.pool)
            .await?;
        Ok(exists)
    }

    async fn create_changelog(&self, table: &str) -> MigrateResult<()> {
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {} (\n    \
             id BIGINT PRIMARY KEY,\n    \
             applied_at TIMESTAMPTZ NOT NULL,\n    \
             description VARCHAR(255) NOT NULL\n)",
            table
        );
        self.pool.execute(sql.as_str()).await?;
        Ok(())
    }

    async fn select_changes(&self, table: &str) -> MigrateResult<Vec<Change>> {
        let sql = format!(
            "SELECT id, applied_at, description FROM {} ORDER BY id",
            table
        );
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;

        rows.iter()
            .map(|row| {
                let raw_id: i64 = row.try_get("id")?;
                let applied_at: DateTime<Utc> = row.try_get("applied_at")?;
                let description: String = row.try_get("description")?;
                let id = ChangeId::from_i64(raw_id).ok_or_else(|| {
                    MigrateError::persistence(format!("negative change id {} in {}", raw_id, table))
                })?;
                Ok(Change::applied(id, description, applied_at))
            })
            .collect()
    }

    async fn try_lock(&self, key: i64) -> MigrateResult<bool> {
        let mut held = self.lock_connection.lock().await;
        if held.is_some() {
            return Ok(false);
        }

        let mut connection = self.pool.acquire().await?;
        let acquired: bool = sqlx::query_scalar("SELECT pg_try_advisory_lock($1)")
            .bind(key)
            .fetch_one(&mut *connection)
            .await?;

        if acquired {
            *held = Some(connection);
        }
        Ok(acquired)
    }

    async fn unlock(&self, key: i64) -> MigrateResult<()> {
        let Some(mut connection) = self.lock_connection.lock().await.take() else {
            return Ok(());
        };
        let released: bool = sqlx::query_scalar("SELECT pg_advisory_unlock($1)")
            .bind(key)
            .fetch_one(&mut *connection)
            .await?;
        if !released {
            tracing::warn!(key, "Advisory lock was not held at release");
        }
        Ok(())
    }

    async fn close(&self) -> MigrateResult<()> {
        self.pool.close().await;
        Ok(())
    }
}

/// PostgreSQL transaction implementation
pub struct PostgresTransaction {
    tx: Option<sqlx::Transaction<'static, Postgres>>,
}

impl PostgresTransaction {
    fn active(&mut self) -> MigrateResult<&mut sqlx::Transaction<'static, Postgres>> {
        self.tx
            .as_mut()
            .ok_or_else(|| MigrateError::Database("Transaction already completed".to_string()))
    }
}

#[async_trait]
impl MigrationTransaction for PostgresTransaction {
    async fn execute(&mut self, sql: &str) -> MigrateResult<u64> {
        let tx = self.active()?;
        let result = (&mut **tx).execute(sql).await?;
        Ok(result.rows_affected())
    }

    async fn insert_change(&mut self, table: &str, change: &Change) -> MigrateResult<()> {
        let sql = format!(
            "INSERT INTO {} (id, applied_at, description) VALUES ($1, $2, $3)",
            table
        );
        let tx = self.active()?;
        sqlx::query(&sql)
            .bind(change.id.as_i64())
            .bind(change.applied_at.unwrap_or_else(Utc::now))
            .bind(&change.description)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    async fn delete_change(&mut self, table: &str, id: ChangeId) -> MigrateResult<bool> {
        let sql = format!("DELETE FROM {} WHERE id = $1", table);
        let tx = self.active()?;
        let result = sqlx::query(&sql).bind(id.as_i64()).execute(&mut **tx).await?;
        Ok(result.rows_affected() > 0)
    }

    async fn commit(mut self: Box<Self>) -> MigrateResult<()> {
        let tx = self
            .tx
            .take()
            .ok_or_else(|| MigrateError::Database("Transaction already completed".to_string()))?;
        tx.commit()
            .await
            .map_err(|e| MigrateError::Database(format!("Transaction commit failed: {}", e)))
    }

    async fn rollback(mut self: Box<Self>) -> MigrateResult<()> {
        let tx = self
            .tx
            .take()
            .ok_or_else(|| MigrateError::Database("Transaction already completed".to_string()))?;
        tx.rollback()
            .await
            .map_err(|e| MigrateError::Database(format!("Transaction rollback failed: {}", e)))
    }
}
