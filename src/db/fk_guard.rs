use sqlx::pool::PoolConnection;
use sqlx::{Sqlite, SqliteConnection, SqlitePool};
use tracing::{debug, error, warn};

use crate::{AppError, AppResult};

/// Exclusive connection with foreign-key enforcement switched off.
///
/// `PRAGMA foreign_keys` is ignored inside an open transaction, so the guard
/// flips it before the caller begins and restores it in [`release`] after the
/// caller has committed or rolled back. A guard dropped without `release`
/// (early return, panic, cancelled future) marks its connection to be closed
/// instead of returned to the pool, so no pooled connection ever keeps checks
/// disabled.
///
/// [`release`]: ForeignKeyGuard::release
pub struct ForeignKeyGuard {
    conn: PoolConnection<Sqlite>,
    operation: &'static str,
    armed: bool,
}

impl ForeignKeyGuard {
    pub async fn acquire(pool: &SqlitePool, operation: &'static str) -> AppResult<Self> {
        let mut conn = pool
            .acquire()
            .await
            .map_err(|err| AppError::from(err).with_context("operation", operation))?;
        sqlx::query("PRAGMA foreign_keys=OFF")
            .execute(conn.as_mut())
            .await
            .map_err(|err| {
                AppError::from(err)
                    .with_context("operation", operation)
                    .with_context("step", "disable_foreign_keys")
            })?;
        debug!(target: "faena", event = "fk_checks_disabled", operation);
        Ok(Self {
            conn,
            operation,
            armed: true,
        })
    }

    pub fn connection(&mut self) -> &mut SqliteConnection {
        self.conn.as_mut()
    }

    /// Re-enables checks and hands the connection back to the pool. A failure
    /// here is logged and swallowed so it cannot replace the outcome of the
    /// work done under the guard; the connection is discarded instead.
    pub async fn release(mut self) {
        match self.restore().await {
            Ok(()) => {
                debug!(
                    target: "faena",
                    event = "fk_checks_enabled",
                    operation = self.operation
                );
            }
            Err(err) => {
                error!(
                    target: "faena",
                    event = "constraint_toggle_failure",
                    operation = self.operation,
                    error = %err
                );
                self.conn.close_on_drop();
            }
        }
        self.armed = false;
    }

    async fn restore(&mut self) -> AppResult<()> {
        sqlx::query("PRAGMA foreign_keys=ON")
            .execute(self.conn.as_mut())
            .await?;
        let (enabled,): (i64,) = sqlx::query_as("PRAGMA foreign_keys")
            .fetch_one(self.conn.as_mut())
            .await?;
        if enabled != 1 {
            return Err(AppError::new(
                "DB/FK_TOGGLE",
                "foreign_keys is still off; a transaction was left open on the connection",
            ));
        }
        Ok(())
    }
}

impl Drop for ForeignKeyGuard {
    fn drop(&mut self) {
        if self.armed {
            warn!(
                target: "faena",
                event = "fk_guard_dropped_armed",
                operation = self.operation
            );
            self.conn.close_on_drop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
    use tempfile::TempDir;

    async fn file_pool() -> (TempDir, SqlitePool) {
        let dir = tempfile::tempdir().expect("tempdir");
        let opts = SqliteConnectOptions::new()
            .filename(dir.path().join("guard.sqlite3"))
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(opts)
            .await
            .expect("pool");
        (dir, pool)
    }

    async fn fk_state(conn: &mut SqliteConnection) -> i64 {
        let (value,): (i64,) = sqlx::query_as("PRAGMA foreign_keys")
            .fetch_one(conn)
            .await
            .expect("pragma");
        value
    }

    #[tokio::test]
    async fn release_restores_checks_on_the_pooled_connection() {
        let (_dir, pool) = file_pool().await;
        let mut guard = ForeignKeyGuard::acquire(&pool, "test").await.expect("guard");
        assert_eq!(fk_state(guard.connection()).await, 0);
        guard.release().await;

        let mut conn = pool.acquire().await.expect("conn");
        assert_eq!(fk_state(conn.as_mut()).await, 1);
    }

    #[tokio::test]
    async fn dropped_guard_never_returns_a_disabled_connection() {
        let (_dir, pool) = file_pool().await;
        {
            let mut guard = ForeignKeyGuard::acquire(&pool, "test").await.expect("guard");
            assert_eq!(fk_state(guard.connection()).await, 0);
        }

        let mut conn = pool.acquire().await.expect("fresh conn");
        assert_eq!(fk_state(conn.as_mut()).await, 1);
    }
}
