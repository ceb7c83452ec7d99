/*!
 * Transaction helpers
 *
 * Write paths run inside `with_transaction`; read paths that issue more than one
 * query open a `snapshot` so every query observes the same ledger state.
 */

use crate::errors::ServiceError;
use sea_orm::{
    AccessMode, ConnectionTrait, DatabaseConnection, DatabaseTransaction, DbBackend, DbErr,
    IsolationLevel, TransactionError, TransactionTrait,
};
use std::future::Future;
use std::pin::Pin;

/// Type alias for boxed future used in transactions
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Execute a function within a database transaction
///
/// Commits when the closure returns `Ok`, rolls back otherwise. The closure's own
/// `ServiceError` is returned unchanged so callers can match on its variant.
///
/// ```rust,ignore
/// let adjustment = with_transaction(&db, |txn| {
///     Box::pin(async move {
///         let saved = adjustment.insert(txn).await?;
///         audit.insert(txn).await?;
///         Ok(saved)
///     })
/// })
/// .await?;
/// ```
pub async fn with_transaction<F, T>(db: &DatabaseConnection, f: F) -> Result<T, ServiceError>
where
    F: for<'a> FnOnce(&'a DatabaseTransaction) -> BoxFuture<'a, Result<T, ServiceError>> + Send,
    T: Send,
{
    db.transaction::<F, T, ServiceError>(f)
        .await
        .map_err(|e| match e {
            TransactionError::Connection(db_err) => ServiceError::DatabaseError(db_err),
            TransactionError::Transaction(err) => err,
        })
}

/// Opens a read-only transaction used as a consistent snapshot.
///
/// Postgres gets `REPEATABLE READ, READ ONLY`; SQLite transactions already read from a
/// single snapshot once the first statement runs.
pub async fn snapshot(db: &DatabaseConnection) -> Result<DatabaseTransaction, DbErr> {
    match db.get_database_backend() {
        DbBackend::Postgres => {
            db.begin_with_config(
                Some(IsolationLevel::RepeatableRead),
                Some(AccessMode::ReadOnly),
            )
            .await
        }
        _ => db.begin().await,
    }
}
