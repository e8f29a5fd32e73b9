use async_trait::async_trait;
use thiserror::Error;

use crate::model::{ArtifactKind, ScopeInfo, ScopeKind, SyncSchema, SyncSetup, TableDescriptor};

/// Error raised by a backend.
#[derive(Debug, Error)]
pub enum StoreError {
    /// An error from SQLite.
    #[cfg(feature = "sqlite")]
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// A stored scope column could not be encoded or decoded.
    #[error("scope encoding error: {0}")]
    Encoding(String),
    /// A shared lock was poisoned by a panicking holder.
    #[error("store lock poisoned")]
    LockPoisoned,
    /// `commit`/`rollback` without an open transaction, or `begin` inside one.
    #[error("transaction state error: {0}")]
    Transaction(&'static str),
    /// A filtered artifact was requested for a table without a filter.
    #[error("table '{0}' has no filter")]
    MissingFilter(String),
    /// Any other backend failure.
    #[error("{0}")]
    Backend(String),
}

/// A live connection to one database.
///
/// A connection carries at most one open transaction. Statements issued
/// through builders run inside it when one is open.
#[async_trait]
pub trait Connection: Send {
    /// Open a transaction.
    async fn begin(&mut self) -> Result<(), StoreError>;

    /// Commit the open transaction.
    async fn commit(&mut self) -> Result<(), StoreError>;

    /// Roll back the open transaction.
    async fn rollback(&mut self) -> Result<(), StoreError>;

    /// True while a transaction is open.
    fn in_transaction(&self) -> bool;

    /// Roll back synchronously, ignoring failures.
    ///
    /// Used from `Drop` of transaction guards, where nothing can be awaited.
    fn abort(&mut self);
}

/// Access to the scope table.
#[async_trait]
pub trait ScopeBuilder<C: Connection>: Send + Sync {
    /// Check whether the scope table for `kind` exists.
    async fn exists_scope_table(&self, kind: ScopeKind, conn: &mut C) -> Result<bool, StoreError>;

    /// Create the scope table for `kind`. Succeeds if it already exists.
    async fn create_scope_table(&self, kind: ScopeKind, conn: &mut C) -> Result<(), StoreError>;

    /// Drop the scope table for `kind`. Succeeds if it does not exist.
    async fn drop_scope_table(&self, kind: ScopeKind, conn: &mut C) -> Result<(), StoreError>;

    /// Read one scope row. Returns `None` if no row matches `name`.
    async fn get_scope(
        &self,
        kind: ScopeKind,
        name: &str,
        conn: &mut C,
    ) -> Result<Option<ScopeInfo>, StoreError>;

    /// Read every scope row, ordered by name.
    async fn get_all_scopes(&self, kind: ScopeKind, conn: &mut C)
        -> Result<Vec<ScopeInfo>, StoreError>;

    /// Insert or overwrite the row for `scope.name`.
    async fn save_scope(
        &self,
        kind: ScopeKind,
        scope: &ScopeInfo,
        conn: &mut C,
    ) -> Result<(), StoreError>;

    /// Delete the row for `name`. Returns whether a row was removed.
    async fn delete_scope(&self, kind: ScopeKind, name: &str, conn: &mut C)
        -> Result<bool, StoreError>;
}

/// Database-level structure.
#[async_trait]
pub trait SchemaBuilder<C: Connection>: Send + Sync {
    /// Make sure the target database exists and is reachable.
    async fn ensure_database(&self, conn: &mut C) -> Result<(), StoreError>;

    /// Describe the tables named by `setup`, in setup order.
    ///
    /// Filters declared in the setup are attached to their tables.
    async fn get_schema(&self, setup: &SyncSetup, conn: &mut C) -> Result<SyncSchema, StoreError>;
}

/// Artifacts provisioned for one table.
#[async_trait]
pub trait TableBuilder<C: Connection>: Send + Sync {
    /// Check whether the artifact exists.
    async fn exists(&self, kind: ArtifactKind, conn: &mut C) -> Result<bool, StoreError>;

    /// Drop the artifact.
    async fn drop(&self, kind: ArtifactKind, conn: &mut C) -> Result<(), StoreError>;

    /// Create the artifact from the table's current definition.
    async fn create(&self, kind: ArtifactKind, conn: &mut C) -> Result<(), StoreError>;
}

/// A relational backend: hands out connections and the builders bound to them.
#[async_trait]
pub trait SyncProvider: Send + Sync {
    type Connection: Connection;
    type ScopeBuilder: ScopeBuilder<Self::Connection>;
    type SchemaBuilder: SchemaBuilder<Self::Connection>;
    type TableBuilder: TableBuilder<Self::Connection>;

    /// Short backend name for logs.
    fn name(&self) -> &'static str;

    /// Open a new connection with no transaction.
    async fn connect(&self) -> Result<Self::Connection, StoreError>;

    /// Scope table accessor bound to the configured table name.
    fn scope_builder(&self, scope_info_table: &str) -> Self::ScopeBuilder;

    fn schema_builder(&self) -> Self::SchemaBuilder;

    fn table_builder(&self, table: &TableDescriptor) -> Self::TableBuilder;
}
