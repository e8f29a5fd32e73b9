use core::fmt;

use serde::{Deserialize, Serialize};

/// Which side of a sync relationship a scope table belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ScopeKind {
    /// Scope rows kept by a client database.
    Client,
    /// Scope rows kept by a server database.
    Server,
}

impl ScopeKind {
    /// Physical table name for this kind, given the configured base name.
    ///
    /// Client scopes live in `base`, server scopes in `base_server`.
    pub fn table_name(self, base: &str) -> String {
        match self {
            Self::Client => base.to_string(),
            Self::Server => format!("{base}_server"),
        }
    }
}

impl fmt::Display for ScopeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Client => write!(f, "client"),
            Self::Server => write!(f, "server"),
        }
    }
}

/// One persisted row of the scope table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScopeInfo {
    /// Scope name, unique within a database.
    pub name: String,
    /// Last logical schema the client knew about. Round-tripped, never interpreted.
    pub schema: Option<SyncSchema>,
    /// Tables and filters this scope synchronizes.
    pub setup: Option<SyncSetup>,
    /// Version the scope's database structures conform to (`major.minor.build`).
    pub version: String,
    /// Milliseconds since the Unix epoch of the last successful sync.
    pub last_sync: Option<u64>,
}

impl ScopeInfo {
    /// A fresh scope row with no schema, setup or sync history.
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            schema: None,
            setup: None,
            version: version.into(),
            last_sync: None,
        }
    }
}

/// The logical schema of the synchronized tables.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncSchema {
    pub tables: Vec<TableDescriptor>,
}

impl SyncSchema {
    pub fn new(tables: Vec<TableDescriptor>) -> Self {
        Self { tables }
    }

    /// True when the schema holds no tables.
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Look up a table by name (case-insensitive).
    pub fn table(&self, name: &str) -> Option<&TableDescriptor> {
        self.tables
            .iter()
            .find(|t| t.name.eq_ignore_ascii_case(name))
    }
}

/// A synchronized table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableDescriptor {
    pub name: String,
    pub columns: Vec<ColumnDescriptor>,
    pub primary_keys: Vec<String>,
    /// Foreign keys from this table to its parents.
    pub relations: Vec<Relation>,
    /// Row filter restricting which rows this scope synchronizes.
    pub filter: Option<RowFilter>,
}

impl TableDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Add a column.
    pub fn with_column(mut self, name: &str, data_type: &str, nullable: bool) -> Self {
        self.columns.push(ColumnDescriptor {
            name: name.to_string(),
            data_type: data_type.to_string(),
            nullable,
        });
        self
    }

    /// Add a single-column foreign key to `parent_table`.
    pub fn with_relation(mut self, column: &str, parent_table: &str, parent_column: &str) -> Self {
        self.relations.push(Relation {
            name: format!("fk_{}_{}", self.name, parent_table),
            parent_table: parent_table.to_string(),
            columns: vec![RelationColumn {
                column: column.to_string(),
                parent_column: parent_column.to_string(),
            }],
        });
        self
    }

    /// Set the row filter.
    pub fn with_filter(mut self, expression: &str) -> Self {
        self.filter = Some(RowFilter {
            expression: expression.to_string(),
        });
        self
    }

    /// Names of the tables this table references, excluding itself.
    pub fn parent_tables(&self) -> impl Iterator<Item = &str> {
        self.relations
            .iter()
            .map(|r| r.parent_table.as_str())
            .filter(move |parent| !parent.eq_ignore_ascii_case(&self.name))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
}

/// A foreign key from a child table to a parent table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relation {
    pub name: String,
    pub parent_table: String,
    pub columns: Vec<RelationColumn>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationColumn {
    pub column: String,
    pub parent_column: String,
}

/// A predicate over a table's columns, in the backend's expression syntax.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowFilter {
    pub expression: String,
}

/// Which tables, and which filters, a scope synchronizes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncSetup {
    #[serde(default)]
    pub tables: Vec<SetupTable>,
}

impl SyncSetup {
    /// A setup synchronizing the named tables without filters.
    pub fn new<I, S>(tables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tables: tables
                .into_iter()
                .map(|name| SetupTable {
                    name: name.into(),
                    filter: None,
                })
                .collect(),
        }
    }

    /// Attach a filter expression to `table`. No-op if the table is not in the setup.
    pub fn with_filter(mut self, table: &str, expression: &str) -> Self {
        if let Some(t) = self
            .tables
            .iter_mut()
            .find(|t| t.name.eq_ignore_ascii_case(table))
        {
            t.filter = Some(expression.to_string());
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetupTable {
    pub name: String,
    #[serde(default)]
    pub filter: Option<String>,
}

/// A server-side object provisioned for one table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ArtifactKind {
    /// Selects every row of the table for an initial snapshot.
    SelectInitialChanges,
    /// Same as [`ArtifactKind::SelectInitialChanges`], restricted by the table's filter.
    SelectInitialChangesWithFilter,
}

impl ArtifactKind {
    /// Object name for this artifact on `table`.
    pub fn object_name(self, table: &str) -> String {
        match self {
            Self::SelectInitialChanges => format!("{table}_initialchanges"),
            Self::SelectInitialChangesWithFilter => format!("{table}_initialchanges_filtered"),
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SelectInitialChanges => write!(f, "select_initial_changes"),
            Self::SelectInitialChangesWithFilter => {
                write!(f, "select_initial_changes_with_filter")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_table_names() {
        assert_eq!(ScopeKind::Client.table_name("scope_info"), "scope_info");
        assert_eq!(ScopeKind::Server.table_name("scope_info"), "scope_info_server");
    }

    #[test]
    fn parent_tables_skip_self_reference() {
        let employee = TableDescriptor::new("Employee")
            .with_relation("manager_id", "employee", "id")
            .with_relation("dept_id", "Department", "id");
        let parents: Vec<_> = employee.parent_tables().collect();
        assert_eq!(parents, vec!["Department"]);
    }

    #[test]
    fn setup_filter_attaches_to_named_table() {
        let setup = SyncSetup::new(["customer", "orders"]).with_filter("ORDERS", "region = 'EU'");
        assert_eq!(setup.tables[0].filter, None);
        assert_eq!(setup.tables[1].filter.as_deref(), Some("region = 'EU'"));

        let unchanged = setup.clone().with_filter("missing", "1 = 1");
        assert_eq!(unchanged, setup);
    }

    #[test]
    fn artifact_object_names() {
        assert_eq!(
            ArtifactKind::SelectInitialChanges.object_name("orders"),
            "orders_initialchanges"
        );
        assert_eq!(
            ArtifactKind::SelectInitialChangesWithFilter.object_name("orders"),
            "orders_initialchanges_filtered"
        );
    }

    #[test]
    fn scope_info_serializes() {
        let mut scope = ScopeInfo::new("default", "0.6.2");
        scope.setup = Some(SyncSetup::new(["a"]));
        let json = serde_json::to_string(&scope).unwrap();
        let back: ScopeInfo = serde_json::from_str(&json).unwrap();
        assert_eq!(back, scope);
    }
}
