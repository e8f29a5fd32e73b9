//! # syncscope-store
//!
//! Scope metadata model and backend capabilities for
//! [`syncscope`](https://docs.rs/syncscope).
//!
//! A backend implements [`SyncProvider`], which hands out connections plus
//! three builders: [`ScopeBuilder`] for the scope table, [`SchemaBuilder`]
//! for database introspection and [`TableBuilder`] for the per-table
//! initial-changes artifacts. Every builder call takes the connection it runs
//! on, so a caller can group calls under one transaction.
//!
//! ## Quick Start
//!
//! ```
//! use syncscope_store::{Connection, MemoryProvider, ScopeBuilder, ScopeInfo, ScopeKind, SyncProvider};
//!
//! # tokio_test_block(async {
//! let provider = MemoryProvider::new();
//! let scopes = provider.scope_builder("scope_info");
//! let mut conn = provider.connect().await.unwrap();
//!
//! scopes.create_scope_table(ScopeKind::Client, &mut conn).await.unwrap();
//! scopes
//!     .save_scope(ScopeKind::Client, &ScopeInfo::new("default", "0.6.2"), &mut conn)
//!     .await
//!     .unwrap();
//! let row = scopes.get_scope(ScopeKind::Client, "default", &mut conn).await.unwrap();
//! assert_eq!(row.unwrap().version, "0.6.2");
//! # });
//! # fn tokio_test_block<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f)
//! # }
//! ```
//!
//! ## Backends
//!
//! | Backend | Feature flag | Use case |
//! |---------|-------------|----------|
//! | [`MemoryProvider`] | *(always available)* | Testing, failure injection |
//! | `SqliteProvider` | `sqlite` | Client databases on disk |

mod memory;
mod model;
#[cfg(feature = "sqlite")]
mod sqlite;
mod traits;

pub use memory::{
    MemoryConnection, MemoryProvider, MemorySchemaBuilder, MemoryScopeBuilder, MemoryTableBuilder,
    Operation,
};
pub use model::{
    ArtifactKind, ColumnDescriptor, Relation, RelationColumn, RowFilter, ScopeInfo, ScopeKind,
    SetupTable, SyncSchema, SyncSetup, TableDescriptor,
};
#[cfg(feature = "sqlite")]
pub use sqlite::{
    JournalMode, SqliteConfig, SqliteConnection, SqliteProvider, SqliteScopeBuilder,
    SqliteSchemaBuilder, SqliteTableBuilder,
};
pub use traits::*;
