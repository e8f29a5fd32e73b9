use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use crate::model::{
    ArtifactKind, RowFilter, ScopeInfo, ScopeKind, SyncSchema, SyncSetup, TableDescriptor,
};
use crate::traits::{
    Connection, SchemaBuilder, ScopeBuilder, StoreError, SyncProvider, TableBuilder,
};

/// A database round trip observed by the in-memory backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Connect,
    Begin,
    Commit,
    Rollback,
    EnsureDatabase,
    GetSchema,
    ScopeTableExists { table: String },
    CreateScopeTable { table: String },
    DropScopeTable { table: String },
    GetScope { table: String, name: String },
    GetAllScopes { table: String },
    SaveScope { table: String, name: String },
    DeleteScope { table: String, name: String },
    ArtifactExists { table: String, kind: ArtifactKind },
    DropArtifact { table: String, kind: ArtifactKind },
    CreateArtifact { table: String, kind: ArtifactKind },
}

impl Operation {
    /// True for operations that change the catalog.
    pub fn is_write(&self) -> bool {
        matches!(
            self,
            Self::CreateScopeTable { .. }
                | Self::DropScopeTable { .. }
                | Self::SaveScope { .. }
                | Self::DeleteScope { .. }
                | Self::DropArtifact { .. }
                | Self::CreateArtifact { .. }
        )
    }
}

/// Everything a transaction can change.
#[derive(Debug, Clone, Default)]
struct Catalog {
    database_created: bool,
    /// Physical scope table name -> scope name -> row.
    scope_tables: BTreeMap<String, BTreeMap<String, ScopeInfo>>,
    /// (table, artifact) pairs that currently exist.
    artifacts: BTreeSet<(String, ArtifactKind)>,
}

#[derive(Debug, Default)]
struct Shared {
    catalog: Catalog,
    /// User tables the schema builder describes.
    tables: Vec<TableDescriptor>,
    journal: Vec<Operation>,
    failpoints: Vec<Operation>,
}

/// In-memory backend.
///
/// All connections share one catalog. A transaction snapshots the catalog on
/// `begin` and restores it on rollback, so structural changes are fully
/// transactional. Every round trip is appended to a journal, and any
/// operation can be made to fail with [`MemoryProvider::fail_on`].
/// Ideal for testing; concurrent transactions on separate connections are
/// not isolated from each other.
///
/// # Example
///
/// ```
/// use syncscope_store::{MemoryProvider, Operation, TableDescriptor};
///
/// let provider = MemoryProvider::with_tables(vec![TableDescriptor::new("customer")]);
/// provider.fail_on(Operation::EnsureDatabase);
/// assert!(provider.journal().is_empty());
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryProvider {
    shared: Arc<Mutex<Shared>>,
}

impl MemoryProvider {
    /// Create an empty provider with no user tables.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a provider whose database holds `tables`.
    pub fn with_tables(tables: Vec<TableDescriptor>) -> Self {
        let provider = Self::new();
        if let Ok(mut shared) = provider.shared.lock() {
            shared.tables = tables;
        }
        provider
    }

    /// Make every future occurrence of `op` fail.
    pub fn fail_on(&self, op: Operation) {
        if let Ok(mut shared) = self.shared.lock() {
            shared.failpoints.push(op);
        }
    }

    /// Remove all failpoints.
    pub fn clear_failpoints(&self) {
        if let Ok(mut shared) = self.shared.lock() {
            shared.failpoints.clear();
        }
    }

    /// Operations observed so far, in order.
    pub fn journal(&self) -> Vec<Operation> {
        self.shared
            .lock()
            .map(|s| s.journal.clone())
            .unwrap_or_default()
    }

    pub fn clear_journal(&self) {
        if let Ok(mut shared) = self.shared.lock() {
            shared.journal.clear();
        }
    }

    /// Committed (or in-flight) scope row, bypassing the journal.
    pub fn scope(&self, kind: ScopeKind, base_table: &str, name: &str) -> Option<ScopeInfo> {
        let shared = self.shared.lock().ok()?;
        shared
            .catalog
            .scope_tables
            .get(&kind.table_name(base_table))?
            .get(name)
            .cloned()
    }

    /// Whether the artifact currently exists, bypassing the journal.
    pub fn has_artifact(&self, table: &str, kind: ArtifactKind) -> bool {
        self.shared
            .lock()
            .map(|s| s.catalog.artifacts.contains(&(table.to_string(), kind)))
            .unwrap_or(false)
    }

    /// Mark an artifact as already provisioned.
    pub fn seed_artifact(&self, table: &str, kind: ArtifactKind) {
        if let Ok(mut shared) = self.shared.lock() {
            shared.catalog.artifacts.insert((table.to_string(), kind));
        }
    }

    /// Whether the database was ensured at least once.
    pub fn database_created(&self) -> bool {
        self.shared
            .lock()
            .map(|s| s.catalog.database_created)
            .unwrap_or(false)
    }
}

#[async_trait]
impl SyncProvider for MemoryProvider {
    type Connection = MemoryConnection;
    type ScopeBuilder = MemoryScopeBuilder;
    type SchemaBuilder = MemorySchemaBuilder;
    type TableBuilder = MemoryTableBuilder;

    fn name(&self) -> &'static str {
        "memory"
    }

    async fn connect(&self) -> Result<MemoryConnection, StoreError> {
        let conn = MemoryConnection {
            shared: Arc::clone(&self.shared),
            snapshot: None,
        };
        conn.run(Operation::Connect, |_| ())?;
        Ok(conn)
    }

    fn scope_builder(&self, scope_info_table: &str) -> MemoryScopeBuilder {
        MemoryScopeBuilder {
            base_table: scope_info_table.to_string(),
        }
    }

    fn schema_builder(&self) -> MemorySchemaBuilder {
        MemorySchemaBuilder
    }

    fn table_builder(&self, table: &TableDescriptor) -> MemoryTableBuilder {
        MemoryTableBuilder {
            table: table.clone(),
        }
    }
}

/// Connection to a [`MemoryProvider`] database.
pub struct MemoryConnection {
    shared: Arc<Mutex<Shared>>,
    /// Catalog as of `begin`; present while a transaction is open.
    snapshot: Option<Catalog>,
}

impl MemoryConnection {
    fn lock(&self) -> Result<MutexGuard<'_, Shared>, StoreError> {
        self.shared.lock().map_err(|_| StoreError::LockPoisoned)
    }

    /// Journal `op`, fail if a failpoint matches, otherwise run `f`.
    fn run<R>(&self, op: Operation, f: impl FnOnce(&mut Shared) -> R) -> Result<R, StoreError> {
        let mut shared = self.lock()?;
        let injected = shared.failpoints.contains(&op);
        shared.journal.push(op.clone());
        if injected {
            return Err(StoreError::Backend(format!("injected failure at {op:?}")));
        }
        Ok(f(&mut shared))
    }
}

#[async_trait]
impl Connection for MemoryConnection {
    async fn begin(&mut self) -> Result<(), StoreError> {
        if self.snapshot.is_some() {
            return Err(StoreError::Transaction("transaction already open"));
        }
        let snapshot = self.run(Operation::Begin, |s| s.catalog.clone())?;
        self.snapshot = Some(snapshot);
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), StoreError> {
        if self.snapshot.is_none() {
            return Err(StoreError::Transaction("no open transaction"));
        }
        self.run(Operation::Commit, |_| ())?;
        self.snapshot = None;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), StoreError> {
        let snapshot = self
            .snapshot
            .clone()
            .ok_or(StoreError::Transaction("no open transaction"))?;
        // Keep the snapshot until the rollback succeeds.
        self.run(Operation::Rollback, move |s| s.catalog = snapshot)?;
        self.snapshot = None;
        Ok(())
    }

    fn in_transaction(&self) -> bool {
        self.snapshot.is_some()
    }

    fn abort(&mut self) {
        if let Some(snapshot) = self.snapshot.take() {
            if let Ok(mut shared) = self.shared.lock() {
                shared.journal.push(Operation::Rollback);
                shared.catalog = snapshot;
            }
        }
    }
}

/// Scope table accessor for the in-memory backend.
#[derive(Debug, Clone)]
pub struct MemoryScopeBuilder {
    base_table: String,
}

fn no_such_table(table: &str) -> StoreError {
    StoreError::Backend(format!("no such table: {table}"))
}

#[async_trait]
impl ScopeBuilder<MemoryConnection> for MemoryScopeBuilder {
    async fn exists_scope_table(
        &self,
        kind: ScopeKind,
        conn: &mut MemoryConnection,
    ) -> Result<bool, StoreError> {
        let table = kind.table_name(&self.base_table);
        let op = Operation::ScopeTableExists {
            table: table.clone(),
        };
        conn.run(op, |s| s.catalog.scope_tables.contains_key(&table))
    }

    async fn create_scope_table(
        &self,
        kind: ScopeKind,
        conn: &mut MemoryConnection,
    ) -> Result<(), StoreError> {
        let table = kind.table_name(&self.base_table);
        let op = Operation::CreateScopeTable {
            table: table.clone(),
        };
        conn.run(op, |s| {
            s.catalog.scope_tables.entry(table).or_default();
        })
    }

    async fn drop_scope_table(
        &self,
        kind: ScopeKind,
        conn: &mut MemoryConnection,
    ) -> Result<(), StoreError> {
        let table = kind.table_name(&self.base_table);
        let op = Operation::DropScopeTable {
            table: table.clone(),
        };
        conn.run(op, |s| {
            s.catalog.scope_tables.remove(&table);
        })
    }

    async fn get_scope(
        &self,
        kind: ScopeKind,
        name: &str,
        conn: &mut MemoryConnection,
    ) -> Result<Option<ScopeInfo>, StoreError> {
        let table = kind.table_name(&self.base_table);
        let op = Operation::GetScope {
            table: table.clone(),
            name: name.to_string(),
        };
        conn.run(op, |s| {
            s.catalog
                .scope_tables
                .get(&table)
                .map(|rows| rows.get(name).cloned())
        })?
        .ok_or_else(|| no_such_table(&table))
    }

    async fn get_all_scopes(
        &self,
        kind: ScopeKind,
        conn: &mut MemoryConnection,
    ) -> Result<Vec<ScopeInfo>, StoreError> {
        let table = kind.table_name(&self.base_table);
        let op = Operation::GetAllScopes {
            table: table.clone(),
        };
        conn.run(op, |s| {
            s.catalog
                .scope_tables
                .get(&table)
                .map(|rows| rows.values().cloned().collect::<Vec<_>>())
        })?
        .ok_or_else(|| no_such_table(&table))
    }

    async fn save_scope(
        &self,
        kind: ScopeKind,
        scope: &ScopeInfo,
        conn: &mut MemoryConnection,
    ) -> Result<(), StoreError> {
        let table = kind.table_name(&self.base_table);
        let op = Operation::SaveScope {
            table: table.clone(),
            name: scope.name.clone(),
        };
        conn.run(op, |s| {
            s.catalog
                .scope_tables
                .get_mut(&table)
                .map(|rows| rows.insert(scope.name.clone(), scope.clone()))
        })?
        .map(|_| ())
        .ok_or_else(|| no_such_table(&table))
    }

    async fn delete_scope(
        &self,
        kind: ScopeKind,
        name: &str,
        conn: &mut MemoryConnection,
    ) -> Result<bool, StoreError> {
        let table = kind.table_name(&self.base_table);
        let op = Operation::DeleteScope {
            table: table.clone(),
            name: name.to_string(),
        };
        conn.run(op, |s| {
            s.catalog
                .scope_tables
                .get_mut(&table)
                .map(|rows| rows.remove(name).is_some())
        })?
        .ok_or_else(|| no_such_table(&table))
    }
}

/// Schema accessor for the in-memory backend.
#[derive(Debug, Clone, Copy)]
pub struct MemorySchemaBuilder;

#[async_trait]
impl SchemaBuilder<MemoryConnection> for MemorySchemaBuilder {
    async fn ensure_database(&self, conn: &mut MemoryConnection) -> Result<(), StoreError> {
        conn.run(Operation::EnsureDatabase, |s| {
            s.catalog.database_created = true;
        })
    }

    async fn get_schema(
        &self,
        setup: &SyncSetup,
        conn: &mut MemoryConnection,
    ) -> Result<SyncSchema, StoreError> {
        conn.run(Operation::GetSchema, |s| {
            let mut tables = Vec::with_capacity(setup.tables.len());
            for wanted in &setup.tables {
                match s
                    .tables
                    .iter()
                    .find(|t| t.name.eq_ignore_ascii_case(&wanted.name))
                {
                    Some(table) => {
                        let mut table = table.clone();
                        table.filter = wanted.filter.as_ref().map(|expression| RowFilter {
                            expression: expression.clone(),
                        });
                        tables.push(table);
                    }
                    None => {
                        tracing::warn!(table = %wanted.name, "setup table not found, skipping");
                    }
                }
            }
            SyncSchema::new(tables)
        })
    }
}

/// Artifact accessor for one table in the in-memory backend.
#[derive(Debug, Clone)]
pub struct MemoryTableBuilder {
    table: TableDescriptor,
}

#[async_trait]
impl TableBuilder<MemoryConnection> for MemoryTableBuilder {
    async fn exists(
        &self,
        kind: ArtifactKind,
        conn: &mut MemoryConnection,
    ) -> Result<bool, StoreError> {
        let key = (self.table.name.clone(), kind);
        let op = Operation::ArtifactExists {
            table: self.table.name.clone(),
            kind,
        };
        conn.run(op, |s| s.catalog.artifacts.contains(&key))
    }

    async fn drop(
        &self,
        kind: ArtifactKind,
        conn: &mut MemoryConnection,
    ) -> Result<(), StoreError> {
        let key = (self.table.name.clone(), kind);
        let op = Operation::DropArtifact {
            table: self.table.name.clone(),
            kind,
        };
        if conn.run(op, |s| s.catalog.artifacts.remove(&key))? {
            Ok(())
        } else {
            Err(StoreError::Backend(format!(
                "no such object: {}",
                kind.object_name(&self.table.name)
            )))
        }
    }

    async fn create(
        &self,
        kind: ArtifactKind,
        conn: &mut MemoryConnection,
    ) -> Result<(), StoreError> {
        if kind == ArtifactKind::SelectInitialChangesWithFilter && self.table.filter.is_none() {
            return Err(StoreError::MissingFilter(self.table.name.clone()));
        }
        let key = (self.table.name.clone(), kind);
        let op = Operation::CreateArtifact {
            table: self.table.name.clone(),
            kind,
        };
        if conn.run(op, |s| s.catalog.artifacts.insert(key))? {
            Ok(())
        } else {
            Err(StoreError::Backend(format!(
                "object already exists: {}",
                kind.object_name(&self.table.name)
            )))
        }
    }
}
