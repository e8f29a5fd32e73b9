//! # syncscope
//!
//! Client-side scope management for database synchronization.
//!
//! A client database records, per named scope, the tables it synchronizes
//! and the version its sync structures conform to. This crate reads and
//! writes those scope rows, detects clients behind [`ENGINE_VERSION`], and
//! climbs them up an ordered ladder of structural upgrades, all inside one
//! transaction per operation.
//!
//! ## Quick Start
//!
//! ```
//! use syncscope::{CancellationSignal, LocalOrchestrator, SyncConfig};
//! use syncscope_store::{MemoryProvider, ScopeInfo, TableDescriptor};
//!
//! # tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(async {
//! let config = SyncConfig::from_toml_str(r#"
//! [[setup.tables]]
//! name = "customer"
//! "#).unwrap();
//!
//! let provider = MemoryProvider::with_tables(vec![TableDescriptor::new("customer")]);
//! let orchestrator = LocalOrchestrator::from_config(provider, config);
//! let cancel = CancellationSignal::new();
//!
//! // A client last touched by an older engine.
//! orchestrator
//!     .save_scope(&ScopeInfo::new("DefaultScope", "0.5.3"), None, &cancel)
//!     .await
//!     .unwrap();
//!
//! assert!(orchestrator.needs_upgrade(None, &cancel).await.unwrap());
//! assert!(orchestrator.upgrade(None, &cancel).await.unwrap());
//!
//! let scope = orchestrator.get_scope(None, &cancel).await.unwrap().unwrap();
//! assert_eq!(scope.version, "0.6.2");
//! # });
//! ```
//!
//! ## Modules
//!
//! - [`ScopeContext`]: connection and transaction ownership for one unit of work.
//! - [`ScopeMetadata`]: scope rows.
//! - [`SchemaIntrospector`]: database existence and table descriptions.
//! - [`sort_by_dependencies`] / [`reprovision_initial_changes`]: artifact migration, parents first.
//! - [`UpgradeEngine`]: the client upgrade ladder.
//! - [`LocalOrchestrator`]: the public operations.

mod cancel;
mod context;
mod error;
mod introspect;
mod metadata;
mod migrator;
mod options;
mod orchestrator;
mod progress;
mod upgrade;

pub use cancel::CancellationSignal;
pub use context::ScopeContext;
pub use error::{SyncError, SyncStage};
pub use introspect::SchemaIntrospector;
pub use metadata::ScopeMetadata;
pub use migrator::{reprovision, reprovision_initial_changes, sort_by_dependencies};
pub use options::{
    ConfigError, SyncConfig, SyncOptions, DEFAULT_SCOPE_INFO_TABLE, DEFAULT_SCOPE_NAME,
};
pub use orchestrator::LocalOrchestrator;
pub use progress::{NoopProgress, ProgressEvent, ProgressSink, TracingProgress};
pub use upgrade::{client_ladder, RungAction, UpgradeEngine};

pub use syncscope_migrate::SyncVersion;

/// Version of the sync structures this engine creates and upgrades to.
pub const ENGINE_VERSION: SyncVersion = SyncVersion::new(0, 6, 2);
