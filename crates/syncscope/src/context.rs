//! Connection and transaction scope.
//!
//! Every orchestrated operation runs inside one [`ScopeContext`]. The context
//! either borrows a caller's connection or opens its own, and decides once,
//! at open, whether it owns the transaction it runs in.
//!
//! | Caller passes | Connection | Transaction |
//! |---------------|------------|-------------|
//! | nothing | opened and owned | begun and owned |
//! | a connection with no transaction | borrowed | begun and owned |
//! | a connection inside a transaction | borrowed | borrowed |
//!
//! An owned transaction is committed by [`ScopeContext::complete`] on
//! success and rolled back on failure. A borrowed one is never touched; the
//! caller commits or rolls back. A context dropped before `complete` (a
//! panic, or a future dropped mid-await) rolls an owned transaction back
//! synchronously.

use std::sync::Arc;

use syncscope_store::{Connection, SyncProvider};

use crate::cancel::CancellationSignal;
use crate::error::{SyncError, SyncStage};
use crate::progress::{ProgressEvent, ProgressSink};

enum ConnectionHandle<'a, C> {
    Owned(C),
    Borrowed(&'a mut C),
}

impl<C> ConnectionHandle<'_, C> {
    fn get(&mut self) -> &mut C {
        match self {
            Self::Owned(conn) => conn,
            Self::Borrowed(conn) => conn,
        }
    }

    fn is_owned(&self) -> bool {
        matches!(self, Self::Owned(_))
    }
}

/// A unit of work on one connection.
pub struct ScopeContext<'a, C: Connection> {
    conn: ConnectionHandle<'a, C>,
    stage: SyncStage,
    owns_transaction: bool,
    finished: bool,
    cancellation: CancellationSignal,
    progress: Arc<dyn ProgressSink>,
}

impl<'a, C: Connection> ScopeContext<'a, C> {
    /// Open a context on `connection`, or on a fresh connection from `provider`.
    pub async fn open<P>(
        provider: &P,
        stage: SyncStage,
        connection: Option<&'a mut C>,
        cancellation: &CancellationSignal,
        progress: Arc<dyn ProgressSink>,
    ) -> Result<Self, SyncError>
    where
        P: SyncProvider<Connection = C>,
    {
        cancellation.check(stage)?;
        let storage = SyncError::storage(stage);
        let mut conn = match connection {
            Some(conn) => ConnectionHandle::Borrowed(conn),
            None => ConnectionHandle::Owned(provider.connect().await.map_err(&storage)?),
        };

        let owns_transaction = if conn.get().in_transaction() {
            false
        } else {
            conn.get().begin().await.map_err(&storage)?;
            true
        };

        tracing::debug!(
            backend = provider.name(),
            %stage,
            owns_connection = conn.is_owned(),
            owns_transaction,
            "scope opened"
        );

        Ok(Self {
            conn,
            stage,
            owns_transaction,
            finished: false,
            cancellation: cancellation.clone(),
            progress,
        })
    }

    /// The connection statements run on.
    pub fn connection(&mut self) -> &mut C {
        self.conn.get()
    }

    pub fn stage(&self) -> SyncStage {
        self.stage
    }

    /// Move to another stage. Later cancellations report it.
    pub fn enter(&mut self, stage: SyncStage) {
        self.stage = stage;
    }

    /// Whether `complete` will commit or roll back.
    pub fn owns_transaction(&self) -> bool {
        self.owns_transaction
    }

    /// Fail with [`SyncError::Cancelled`] if cancellation was requested.
    ///
    /// Called before every database round trip.
    pub fn checkpoint(&self) -> Result<(), SyncError> {
        self.cancellation.check(self.stage)
    }

    /// Forward `event` to the progress sink under the current stage.
    pub fn report(&self, event: ProgressEvent) {
        self.progress.report(self.stage, &event);
    }

    /// Finish the unit of work with the outcome of its body.
    ///
    /// `Ok` commits an owned transaction; a failed commit is returned as a
    /// storage error and the transaction is rolled back on drop. `Err` rolls
    /// an owned transaction back and returns the original error. If that
    /// rollback fails, the transaction is aborted so the connection never
    /// stays inside it.
    pub async fn complete<T>(mut self, result: Result<T, SyncError>) -> Result<T, SyncError> {
        match result {
            Ok(value) => {
                if self.owns_transaction {
                    self.conn
                        .get()
                        .commit()
                        .await
                        .map_err(SyncError::storage(self.stage))?;
                    tracing::debug!(stage = %self.stage, "scope committed");
                }
                self.finished = true;
                Ok(value)
            }
            Err(err) => {
                if self.owns_transaction {
                    if let Err(rollback) = self.conn.get().rollback().await {
                        tracing::warn!(
                            stage = %self.stage,
                            error = %rollback,
                            cause = %err,
                            "rollback failed, aborting"
                        );
                        self.conn.get().abort();
                    } else {
                        tracing::debug!(stage = %self.stage, error = %err, "scope rolled back");
                    }
                }
                self.finished = true;
                Err(err)
            }
        }
    }
}

impl<C: Connection> Drop for ScopeContext<'_, C> {
    fn drop(&mut self) {
        if !self.finished && self.owns_transaction {
            tracing::warn!(stage = %self.stage, "scope dropped before completion, rolling back");
            self.conn.get().abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use syncscope_store::{MemoryProvider, Operation};

    use super::*;
    use crate::progress::NoopProgress;

    fn noop() -> Arc<dyn ProgressSink> {
        Arc::new(NoopProgress)
    }

    #[tokio::test]
    async fn owned_scope_commits() {
        let provider = MemoryProvider::new();
        let ctx = ScopeContext::open(
            &provider,
            SyncStage::Upgrading,
            None,
            &CancellationSignal::new(),
            noop(),
        )
        .await
        .unwrap();
        assert!(ctx.owns_transaction());
        assert_eq!(ctx.complete(Ok(7)).await.unwrap(), 7);
        assert_eq!(
            provider.journal(),
            vec![Operation::Connect, Operation::Begin, Operation::Commit]
        );
    }

    #[tokio::test]
    async fn owned_scope_rolls_back_and_rethrows() {
        let provider = MemoryProvider::new();
        let ctx = ScopeContext::open(
            &provider,
            SyncStage::Upgrading,
            None,
            &CancellationSignal::new(),
            noop(),
        )
        .await
        .unwrap();
        let err = ctx
            .complete::<()>(Err(SyncError::MissingTables))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::MissingTables));
        assert_eq!(provider.journal().last(), Some(&Operation::Rollback));
    }

    #[tokio::test]
    async fn borrowed_transaction_is_left_to_caller() {
        let provider = MemoryProvider::new();
        let mut conn = provider.connect().await.unwrap();
        conn.begin().await.unwrap();
        provider.clear_journal();

        let ctx = ScopeContext::open(
            &provider,
            SyncStage::Upgrading,
            Some(&mut conn),
            &CancellationSignal::new(),
            noop(),
        )
        .await
        .unwrap();
        assert!(!ctx.owns_transaction());
        ctx.complete::<()>(Err(SyncError::MissingTables))
            .await
            .unwrap_err();

        assert!(provider.journal().is_empty());
        assert!(conn.in_transaction());
    }

    #[tokio::test]
    async fn borrowed_connection_without_transaction_gets_one() {
        let provider = MemoryProvider::new();
        let mut conn = provider.connect().await.unwrap();
        provider.clear_journal();

        let ctx = ScopeContext::open(
            &provider,
            SyncStage::Upgrading,
            Some(&mut conn),
            &CancellationSignal::new(),
            noop(),
        )
        .await
        .unwrap();
        assert!(ctx.owns_transaction());
        ctx.complete(Ok(())).await.unwrap();

        assert_eq!(
            provider.journal(),
            vec![Operation::Begin, Operation::Commit]
        );
        assert!(!conn.in_transaction());
    }

    #[tokio::test]
    async fn dropped_scope_aborts() {
        let provider = MemoryProvider::new();
        {
            let _ctx = ScopeContext::open(
                &provider,
                SyncStage::Provisioning,
                None,
                &CancellationSignal::new(),
                noop(),
            )
            .await
            .unwrap();
        }
        assert_eq!(provider.journal().last(), Some(&Operation::Rollback));
    }

    #[tokio::test]
    async fn cancelled_before_open_touches_nothing() {
        let provider = MemoryProvider::new();
        let cancel = CancellationSignal::new();
        cancel.cancel();
        let opened = ScopeContext::open(&provider, SyncStage::Upgrading, None, &cancel, noop());
        assert!(matches!(opened.await, Err(SyncError::Cancelled { .. })));
        assert!(provider.journal().is_empty());
    }

    #[tokio::test]
    async fn failed_commit_rolls_back_on_drop() {
        let provider = MemoryProvider::new();
        provider.fail_on(Operation::Commit);
        let ctx = ScopeContext::open(
            &provider,
            SyncStage::Upgrading,
            None,
            &CancellationSignal::new(),
            noop(),
        )
        .await
        .unwrap();
        let err = ctx.complete(Ok(())).await.unwrap_err();
        assert!(matches!(err, SyncError::Storage { .. }));
        assert_eq!(provider.journal().last(), Some(&Operation::Rollback));
    }

    #[tokio::test]
    async fn failed_rollback_on_borrowed_connection_aborts() {
        let provider = MemoryProvider::new();
        provider.fail_on(Operation::Rollback);
        let mut conn = provider.connect().await.unwrap();

        let ctx = ScopeContext::open(
            &provider,
            SyncStage::Provisioning,
            Some(&mut conn),
            &CancellationSignal::new(),
            noop(),
        )
        .await
        .unwrap();
        assert!(ctx.owns_transaction());
        let err = ctx
            .complete::<()>(Err(SyncError::MissingTables))
            .await
            .unwrap_err();

        assert!(matches!(err, SyncError::MissingTables));
        assert!(!conn.in_transaction());
    }
}
