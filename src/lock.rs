use sea_orm::{
    ConnectionTrait, DatabaseConnection, DatabaseTransaction, DbBackend, Statement,
    TransactionTrait, Value,
};
use tracing::warn;

use crate::config::{AdvisoryLockStrategy, ClosureTreeConfig};
use crate::error::ClosureTreeError;

/// A database transaction that holds the hierarchy's advisory lock for its
/// whole lifetime (PostgreSQL only).
///
/// The lock is transaction-scoped, so PostgreSQL releases it on commit or
/// rollback. Dropping the guard without calling [`commit`](Self::commit)
/// rolls the transaction back and frees the lock with it.
pub struct LockedTransaction {
    txn: DatabaseTransaction,
}

impl LockedTransaction {
    pub async fn acquire(
        config: &ClosureTreeConfig,
        db: &DatabaseConnection,
    ) -> Result<Self, ClosureTreeError> {
        let backend = ensure_supported(db)?;

        // SQLite serializes writers on its own.
        let (isolation, key) = match backend {
            DbBackend::Postgres => {
                let key = match config.advisory_lock_strategy() {
                    AdvisoryLockStrategy::Disabled => None,
                    AdvisoryLockStrategy::Namespaced(key) => Some(key.as_str().to_owned()),
                };
                (config.isolation().map(Into::into), key)
            }
            _ => (None, None),
        };

        let txn = db.begin_with_config(isolation, None).await?;

        if let Some(ref key) = key {
            if let Err(err) = acquire_lock(&txn, key).await {
                let _ = txn.rollback().await;
                return Err(err);
            }
        }

        Ok(Self { txn })
    }

    pub fn connection(&self) -> &DatabaseTransaction {
        &self.txn
    }

    pub async fn commit(self) -> Result<(), ClosureTreeError> {
        self.txn.commit().await?;
        Ok(())
    }

    pub async fn rollback(self) -> Result<(), ClosureTreeError> {
        self.txn.rollback().await?;
        Ok(())
    }

    /// Commit on success, roll back on failure, and hand back the result.
    pub async fn finish<T>(
        self,
        result: Result<T, ClosureTreeError>,
    ) -> Result<T, ClosureTreeError> {
        match result {
            Ok(value) => {
                self.commit().await?;
                Ok(value)
            }
            Err(err) => {
                warn!(error = %err, "rolling back closure-table transaction");
                let _ = self.rollback().await;
                Err(err)
            }
        }
    }
}

/// Return the connection's backend if closure-table can drive it.
pub(crate) fn ensure_supported(
    conn: &impl ConnectionTrait,
) -> Result<DbBackend, ClosureTreeError> {
    match conn.get_database_backend() {
        backend @ (DbBackend::Postgres | DbBackend::Sqlite) => Ok(backend),
        _ => Err(ClosureTreeError::UnsupportedBackend),
    }
}

fn lock_statement(key: &str) -> Statement {
    Statement::from_sql_and_values(
        DbBackend::Postgres,
        "SELECT pg_advisory_xact_lock(hashtext($1), 0)",
        vec![Value::from(key)],
    )
}

async fn acquire_lock(txn: &DatabaseTransaction, key: &str) -> Result<(), ClosureTreeError> {
    txn.execute(lock_statement(key)).await?;
    Ok(())
}
