//! SQLite backend using rusqlite.
//!
//! The scope table keeps schema and setup as JSON text columns. The two
//! initial-changes artifacts are views, so provisioning is plain DDL and is
//! rolled back together with the surrounding transaction.
//!
//! # Example
//!
//! ```no_run
//! use syncscope_store::{Connection, ScopeBuilder, ScopeInfo, ScopeKind, SqliteProvider, SyncProvider};
//!
//! # async fn run() -> Result<(), syncscope_store::StoreError> {
//! let provider = SqliteProvider::open("client.db");
//! let scopes = provider.scope_builder("scope_info");
//! let mut conn = provider.connect().await?;
//!
//! conn.begin().await?;
//! scopes.create_scope_table(ScopeKind::Client, &mut conn).await?;
//! scopes.save_scope(ScopeKind::Client, &ScopeInfo::new("default", "0.6.2"), &mut conn).await?;
//! conn.commit().await?;
//! # Ok(())
//! # }
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use rusqlite::{params, OptionalExtension};

use crate::model::{
    ArtifactKind, ColumnDescriptor, Relation, RelationColumn, RowFilter, ScopeInfo, ScopeKind,
    SyncSchema, SyncSetup, TableDescriptor,
};
use crate::traits::{
    Connection, SchemaBuilder, ScopeBuilder, StoreError, SyncProvider, TableBuilder,
};

/// SQLite configuration options.
#[derive(Debug, Clone)]
pub struct SqliteConfig {
    /// SQLite journal mode. Defaults to WAL.
    pub journal_mode: JournalMode,
    /// Busy timeout in milliseconds. Defaults to 5000.
    pub busy_timeout_ms: u32,
    /// SQLite page size. Defaults to 4096.
    pub page_size: u32,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            journal_mode: JournalMode::Wal,
            busy_timeout_ms: 5000,
            page_size: 4096,
        }
    }
}

/// SQLite journal mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JournalMode {
    /// Write-ahead logging. Readers do not block the writer.
    Wal,
    /// Traditional rollback journal.
    Delete,
    /// In-memory journal, no crash recovery.
    Memory,
}

impl JournalMode {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Wal => "WAL",
            Self::Delete => "DELETE",
            Self::Memory => "MEMORY",
        }
    }
}

/// Quote an identifier for use in SQL text.
fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn encode<T: serde::Serialize>(value: &Option<T>) -> Result<Option<String>, StoreError> {
    value
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(|e| StoreError::Encoding(e.to_string()))
}

fn out_of_range(err: std::num::TryFromIntError) -> StoreError {
    StoreError::Encoding(format!("last sync out of range: {err}"))
}

fn decode<T: serde::de::DeserializeOwned>(text: Option<String>) -> Result<Option<T>, StoreError> {
    text.as_deref()
        .map(serde_json::from_str)
        .transpose()
        .map_err(|e| StoreError::Encoding(e.to_string()))
}

/// SQLite provider bound to one database file.
///
/// Every [`SyncProvider::connect`] opens a fresh `rusqlite::Connection`, so
/// callers owning a connection own its transaction too.
#[derive(Debug, Clone)]
pub struct SqliteProvider {
    path: PathBuf,
    config: SqliteConfig,
}

impl SqliteProvider {
    /// Provider for the database at `path` with default config.
    pub fn open<P: AsRef<Path>>(path: P) -> Self {
        Self::open_with_config(path, SqliteConfig::default())
    }

    /// Provider with custom configuration.
    pub fn open_with_config<P: AsRef<Path>>(path: P, config: SqliteConfig) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            config,
        }
    }

    /// Database file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn init_connection(
        conn: &rusqlite::Connection,
        config: &SqliteConfig,
    ) -> Result<(), StoreError> {
        conn.execute_batch(&format!(
            "PRAGMA journal_mode = {};
             PRAGMA busy_timeout = {};
             PRAGMA page_size = {};
             PRAGMA foreign_keys = ON;
             PRAGMA synchronous = NORMAL;",
            config.journal_mode.as_str(),
            config.busy_timeout_ms,
            config.page_size,
        ))?;
        Ok(())
    }
}

#[async_trait]
impl SyncProvider for SqliteProvider {
    type Connection = SqliteConnection;
    type ScopeBuilder = SqliteScopeBuilder;
    type SchemaBuilder = SqliteSchemaBuilder;
    type TableBuilder = SqliteTableBuilder;

    fn name(&self) -> &'static str {
        "sqlite"
    }

    async fn connect(&self) -> Result<SqliteConnection, StoreError> {
        let conn = rusqlite::Connection::open(&self.path)?;
        Self::init_connection(&conn, &self.config)?;
        Ok(SqliteConnection { conn })
    }

    fn scope_builder(&self, scope_info_table: &str) -> SqliteScopeBuilder {
        SqliteScopeBuilder {
            base_table: scope_info_table.to_string(),
        }
    }

    fn schema_builder(&self) -> SqliteSchemaBuilder {
        SqliteSchemaBuilder
    }

    fn table_builder(&self, table: &TableDescriptor) -> SqliteTableBuilder {
        SqliteTableBuilder {
            table: table.clone(),
        }
    }
}

/// Raw scope row: name, schema JSON, setup JSON, version, last sync.
type ScopeRow = (String, Option<String>, Option<String>, String, Option<i64>);

/// A SQLite connection.
pub struct SqliteConnection {
    conn: rusqlite::Connection,
}

impl SqliteConnection {
    /// The underlying rusqlite connection.
    pub fn raw(&self) -> &rusqlite::Connection {
        &self.conn
    }

    fn object_exists(&self, object_type: &str, name: &str) -> Result<bool, StoreError> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = ?1 AND name = ?2 COLLATE NOCASE",
            params![object_type, name],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }
}

#[async_trait]
impl Connection for SqliteConnection {
    async fn begin(&mut self) -> Result<(), StoreError> {
        if !self.conn.is_autocommit() {
            return Err(StoreError::Transaction("transaction already open"));
        }
        self.conn.execute_batch("BEGIN")?;
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), StoreError> {
        if self.conn.is_autocommit() {
            return Err(StoreError::Transaction("no open transaction"));
        }
        self.conn.execute_batch("COMMIT")?;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), StoreError> {
        if self.conn.is_autocommit() {
            return Err(StoreError::Transaction("no open transaction"));
        }
        self.conn.execute_batch("ROLLBACK")?;
        Ok(())
    }

    fn in_transaction(&self) -> bool {
        !self.conn.is_autocommit()
    }

    fn abort(&mut self) {
        if !self.conn.is_autocommit() {
            let _ = self.conn.execute_batch("ROLLBACK");
        }
    }
}

/// Scope table accessor for SQLite.
#[derive(Debug, Clone)]
pub struct SqliteScopeBuilder {
    base_table: String,
}

impl SqliteScopeBuilder {
    fn table(&self, kind: ScopeKind) -> String {
        quote_ident(&kind.table_name(&self.base_table))
    }

    fn read_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ScopeRow> {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
    }

    fn to_scope(row: ScopeRow) -> Result<ScopeInfo, StoreError> {
        let (name, schema, setup, version, last_sync) = row;
        let last_sync = last_sync.map(u64::try_from).transpose();
        Ok(ScopeInfo {
            name,
            schema: decode(schema)?,
            setup: decode(setup)?,
            version,
            last_sync: last_sync.map_err(out_of_range)?,
        })
    }
}

#[async_trait]
impl ScopeBuilder<SqliteConnection> for SqliteScopeBuilder {
    async fn exists_scope_table(
        &self,
        kind: ScopeKind,
        conn: &mut SqliteConnection,
    ) -> Result<bool, StoreError> {
        conn.object_exists("table", &kind.table_name(&self.base_table))
    }

    async fn create_scope_table(
        &self,
        kind: ScopeKind,
        conn: &mut SqliteConnection,
    ) -> Result<(), StoreError> {
        conn.conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {} (
                sync_scope_name     TEXT NOT NULL PRIMARY KEY,
                sync_scope_schema   TEXT NULL,
                sync_scope_setup    TEXT NULL,
                sync_scope_version  TEXT NOT NULL,
                scope_last_sync     INTEGER NULL
            );",
            self.table(kind)
        ))?;
        Ok(())
    }

    async fn drop_scope_table(
        &self,
        kind: ScopeKind,
        conn: &mut SqliteConnection,
    ) -> Result<(), StoreError> {
        conn.conn
            .execute_batch(&format!("DROP TABLE IF EXISTS {};", self.table(kind)))?;
        Ok(())
    }

    async fn get_scope(
        &self,
        kind: ScopeKind,
        name: &str,
        conn: &mut SqliteConnection,
    ) -> Result<Option<ScopeInfo>, StoreError> {
        let row = conn
            .conn
            .query_row(
                &format!(
                    "SELECT sync_scope_name, sync_scope_schema, sync_scope_setup,
                            sync_scope_version, scope_last_sync
                     FROM {} WHERE sync_scope_name = ?1",
                    self.table(kind)
                ),
                params![name],
                Self::read_row,
            )
            .optional()?;
        row.map(Self::to_scope).transpose()
    }

    async fn get_all_scopes(
        &self,
        kind: ScopeKind,
        conn: &mut SqliteConnection,
    ) -> Result<Vec<ScopeInfo>, StoreError> {
        let mut stmt = conn.conn.prepare(&format!(
            "SELECT sync_scope_name, sync_scope_schema, sync_scope_setup,
                    sync_scope_version, scope_last_sync
             FROM {} ORDER BY sync_scope_name",
            self.table(kind)
        ))?;
        let rows = stmt
            .query_map([], Self::read_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(Self::to_scope).collect()
    }

    async fn save_scope(
        &self,
        kind: ScopeKind,
        scope: &ScopeInfo,
        conn: &mut SqliteConnection,
    ) -> Result<(), StoreError> {
        let schema = encode(&scope.schema)?;
        let setup = encode(&scope.setup)?;
        let last_sync = scope.last_sync.map(i64::try_from).transpose();
        let last_sync = last_sync.map_err(out_of_range)?;
        conn.conn.execute(
            &format!(
                "INSERT INTO {} (sync_scope_name, sync_scope_schema, sync_scope_setup,
                                 sync_scope_version, scope_last_sync)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(sync_scope_name)
                 DO UPDATE SET sync_scope_schema = excluded.sync_scope_schema,
                               sync_scope_setup = excluded.sync_scope_setup,
                               sync_scope_version = excluded.sync_scope_version,
                               scope_last_sync = excluded.scope_last_sync",
                self.table(kind)
            ),
            params![scope.name, schema, setup, scope.version, last_sync],
        )?;
        Ok(())
    }

    async fn delete_scope(
        &self,
        kind: ScopeKind,
        name: &str,
        conn: &mut SqliteConnection,
    ) -> Result<bool, StoreError> {
        let deleted = conn.conn.execute(
            &format!("DELETE FROM {} WHERE sync_scope_name = ?1", self.table(kind)),
            params![name],
        )?;
        Ok(deleted > 0)
    }
}

/// Schema accessor for SQLite.
#[derive(Debug, Clone, Copy)]
pub struct SqliteSchemaBuilder;

impl SqliteSchemaBuilder {
    fn describe(conn: &rusqlite::Connection, name: &str) -> Result<TableDescriptor, StoreError> {
        let mut table = TableDescriptor::new(name);

        let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", quote_ident(name)))?;
        let mut keys: Vec<(i64, String)> = Vec::new();
        let columns = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, i64>(5)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        for (column, data_type, not_null, pk) in columns {
            if pk > 0 {
                keys.push((pk, column.clone()));
            }
            table.columns.push(ColumnDescriptor {
                name: column,
                data_type,
                nullable: not_null == 0 && pk == 0,
            });
        }
        keys.sort();
        table.primary_keys = keys.into_iter().map(|(_, column)| column).collect();

        let mut stmt = conn.prepare(&format!("PRAGMA foreign_key_list({})", quote_ident(name)))?;
        let links = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, Option<String>>(4)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        let mut relations: BTreeMap<i64, Relation> = BTreeMap::new();
        for (id, parent, column, parent_column) in links {
            relations
                .entry(id)
                .or_insert_with(|| Relation {
                    name: format!("fk_{name}_{parent}_{id}"),
                    parent_table: parent,
                    columns: Vec::new(),
                })
                .columns
                .push(RelationColumn {
                    column,
                    parent_column: parent_column.unwrap_or_default(),
                });
        }
        table.relations = relations.into_values().collect();

        Ok(table)
    }
}

#[async_trait]
impl SchemaBuilder<SqliteConnection> for SqliteSchemaBuilder {
    async fn ensure_database(&self, conn: &mut SqliteConnection) -> Result<(), StoreError> {
        // Opening the connection already created the file; this proves it is readable.
        let _: i64 = conn
            .conn
            .query_row("PRAGMA schema_version", [], |row| row.get(0))?;
        Ok(())
    }

    async fn get_schema(
        &self,
        setup: &SyncSetup,
        conn: &mut SqliteConnection,
    ) -> Result<SyncSchema, StoreError> {
        let mut tables = Vec::with_capacity(setup.tables.len());
        for wanted in &setup.tables {
            let actual: Option<String> = conn
                .conn
                .query_row(
                    "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?1 COLLATE NOCASE",
                    params![wanted.name],
                    |row| row.get(0),
                )
                .optional()?;
            let Some(actual) = actual else {
                tracing::warn!(table = %wanted.name, "setup table not found, skipping");
                continue;
            };
            let mut table = Self::describe(&conn.conn, &actual)?;
            table.filter = wanted.filter.as_ref().map(|expression| RowFilter {
                expression: expression.clone(),
            });
            tables.push(table);
        }
        Ok(SyncSchema::new(tables))
    }
}

/// Artifact accessor for one SQLite table. Artifacts are views.
#[derive(Debug, Clone)]
pub struct SqliteTableBuilder {
    table: TableDescriptor,
}

impl SqliteTableBuilder {
    fn create_sql(&self, kind: ArtifactKind) -> Result<String, StoreError> {
        let columns = if self.table.columns.is_empty() {
            "*".to_string()
        } else {
            self.table
                .columns
                .iter()
                .map(|c| quote_ident(&c.name))
                .collect::<Vec<_>>()
                .join(", ")
        };
        let mut sql = format!(
            "CREATE VIEW {} AS SELECT {} FROM {}",
            quote_ident(&kind.object_name(&self.table.name)),
            columns,
            quote_ident(&self.table.name)
        );
        if kind == ArtifactKind::SelectInitialChangesWithFilter {
            let filter = self
                .table
                .filter
                .as_ref()
                .ok_or_else(|| StoreError::MissingFilter(self.table.name.clone()))?;
            sql.push_str(" WHERE ");
            sql.push_str(&filter.expression);
        }
        Ok(sql)
    }
}

#[async_trait]
impl TableBuilder<SqliteConnection> for SqliteTableBuilder {
    async fn exists(
        &self,
        kind: ArtifactKind,
        conn: &mut SqliteConnection,
    ) -> Result<bool, StoreError> {
        conn.object_exists("view", &kind.object_name(&self.table.name))
    }

    async fn drop(
        &self,
        kind: ArtifactKind,
        conn: &mut SqliteConnection,
    ) -> Result<(), StoreError> {
        conn.conn.execute_batch(&format!(
            "DROP VIEW {}",
            quote_ident(&kind.object_name(&self.table.name))
        ))?;
        Ok(())
    }

    async fn create(
        &self,
        kind: ArtifactKind,
        conn: &mut SqliteConnection,
    ) -> Result<(), StoreError> {
        let sql = self.create_sql(kind)?;
        conn.conn.execute_batch(&sql)?;
        Ok(())
    }
}
