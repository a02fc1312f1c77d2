//! Run lock keeping concurrent migration runs against one database apart

use std::sync::Arc;
use tracing::warn;

use crate::backends::MigrationBackend;
use crate::error::{MigrateError, MigrateResult};

/// Exclusive hold on the migration lock of a database.
///
/// Acquisition never waits: a held lock fails with
/// [`MigrateError::ConcurrentMigration`]. Release with [`RunLock::release`].
pub struct RunLock {
    backend: Arc<dyn MigrationBackend>,
    key: i64,
    released: bool,
}

impl RunLock {
    pub async fn acquire(backend: Arc<dyn MigrationBackend>, key: i64) -> MigrateResult<Self> {
        if !backend.try_lock(key).await? {
            return Err(MigrateError::ConcurrentMigration { key });
        }
        tracing::debug!(key, "Acquired migration lock");
        Ok(Self {
            backend,
            key,
            released: false,
        })
    }

    pub fn key(&self) -> i64 {
        self.key
    }

    pub async fn release(mut self) -> MigrateResult<()> {
        self.released = true;
        self.backend.unlock(self.key).await?;
        tracing::debug!(key = self.key, "Released migration lock");
        Ok(())
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if !self.released {
            // Can't await here; the lock lives until its connection closes
            warn!(
                key = self.key,
                "Migration lock dropped without release - it stays held until the connection closes"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::MemoryBackend;

    #[tokio::test]
    async fn test_second_acquire_fails_until_release() {
        let backend: Arc<dyn MigrationBackend> = Arc::new(MemoryBackend::new());

        let lock = RunLock::acquire(Arc::clone(&backend), 1).await.unwrap();
        assert!(matches!(
            RunLock::acquire(Arc::clone(&backend), 1).await,
            Err(MigrateError::ConcurrentMigration { key: 1 })
        ));

        // Different keys do not conflict
        let other = RunLock::acquire(Arc::clone(&backend), 2).await.unwrap();
        other.release().await.unwrap();

        lock.release().await.unwrap();
        let again = RunLock::acquire(backend, 1).await.unwrap();
        assert_eq!(again.key(), 1);
        again.release().await.unwrap();
    }
}
