//! Request-scoped transaction handle.
//!
//! A [`Session`] wraps the shared connection pool and begins a transaction on
//! first use. Every active-record operation runs inside that transaction.
//! Mutations either commit at the end of the call ([`CommitMode::Immediate`])
//! or leave the work pending for the caller ([`CommitMode::Deferred`]).
//! A session dropped without commit rolls back.

use futures::future::BoxFuture;
use sea_orm::{DatabaseConnection, DatabaseTransaction, DbErr, TransactionTrait};

use crate::errors::OrmError;

/// Whether a mutating call commits on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CommitMode {
    /// Commit at the end of the call.
    #[default]
    Immediate,
    /// Statements run in the open transaction; the caller commits.
    Deferred,
}

pub struct Session {
    db: DatabaseConnection,
    txn: Option<DatabaseTransaction>,
}

impl Session {
    #[must_use]
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db, txn: None }
    }

    #[must_use]
    pub fn db(&self) -> &DatabaseConnection {
        &self.db
    }

    #[must_use]
    pub fn in_transaction(&self) -> bool {
        self.txn.is_some()
    }

    /// The open transaction, begun on first call.
    ///
    /// # Errors
    /// Propagates the failure to begin a transaction.
    pub async fn conn(&mut self) -> Result<&DatabaseTransaction, DbErr> {
        if self.txn.is_none() {
            tracing::trace!("beginning session transaction");
            self.txn = Some(self.db.begin().await?);
        }
        self.txn
            .as_ref()
            .ok_or_else(|| DbErr::Custom("session transaction unavailable".to_string()))
    }

    /// Commits pending work. A session without an open transaction is a no-op.
    ///
    /// # Errors
    /// Propagates the commit failure; the transaction is gone either way.
    pub async fn commit(&mut self) -> Result<(), DbErr> {
        match self.txn.take() {
            Some(txn) => txn.commit().await,
            None => Ok(()),
        }
    }

    /// Discards pending work. A session without an open transaction is a no-op.
    ///
    /// # Errors
    /// Propagates the rollback failure.
    pub async fn rollback(&mut self) -> Result<(), DbErr> {
        match self.txn.take() {
            Some(txn) => {
                tracing::debug!("rolling back session transaction");
                txn.rollback().await
            }
            None => Ok(()),
        }
    }

    /// Ends a mutating call: commits when `mode` is immediate.
    pub(crate) async fn settle(&mut self, mode: CommitMode) -> Result<(), OrmError> {
        if mode == CommitMode::Deferred {
            return Ok(());
        }
        let result = self.commit().await;
        result.map_err(|err| OrmError::persistence("Commit failed", err))
    }

    /// Rolls back after a failed write and wraps the cause.
    pub(crate) async fn fail(&mut self, message: impl Into<String>, err: DbErr) -> OrmError {
        let message = message.into();
        tracing::error!(error = %err, "{message}; rolling back");
        if let Err(rollback) = self.rollback().await {
            tracing::error!(error = %rollback, "rollback failed");
        }
        OrmError::persistence(message, err)
    }
}

/// Runs `f` in a fresh session: commits on `Ok`, rolls back on `Err`.
///
/// ```rust,ignore
/// let income = transact(&db, |s| Box::pin(async move {
///     income::Entity::create(s, attrs, &[], Relations::None, CommitMode::Deferred).await
/// }))
/// .await?;
/// ```
///
/// # Errors
/// Whatever `f` returns, or a persistence error if the final commit fails.
pub async fn transact<T, E, F>(db: &DatabaseConnection, f: F) -> Result<T, E>
where
    F: for<'s> FnOnce(&'s mut Session) -> BoxFuture<'s, Result<T, E>>,
    E: From<OrmError>,
{
    let mut session = Session::new(db.clone());
    match f(&mut session).await {
        Ok(value) => {
            session
                .commit()
                .await
                .map_err(|err| E::from(OrmError::persistence("Commit failed", err)))?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback) = session.rollback().await {
                tracing::error!(error = %rollback, "rollback failed");
            }
            Err(err)
        }
    }
}
