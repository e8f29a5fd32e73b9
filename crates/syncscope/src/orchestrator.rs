//! Public client-side operations.

use std::sync::Arc;

use syncscope_store::{ScopeInfo, ScopeKind, SyncProvider, SyncSetup};

use crate::cancel::CancellationSignal;
use crate::context::ScopeContext;
use crate::error::{SyncError, SyncStage};
use crate::introspect::SchemaIntrospector;
use crate::metadata::ScopeMetadata;
use crate::options::{SyncConfig, SyncOptions};
use crate::progress::{NoopProgress, ProgressSink};
use crate::upgrade::UpgradeEngine;

/// Client-side orchestrator over one backend.
///
/// Every operation runs in its own [`ScopeContext`]. Pass `None` as the
/// connection to let the operation open, commit and close its own; pass a
/// connection to run on it, inside the caller's transaction if one is open.
///
/// # Example
///
/// ```
/// use syncscope::{CancellationSignal, LocalOrchestrator, SyncOptions};
/// use syncscope_store::{MemoryProvider, SyncSetup, TableDescriptor};
///
/// # tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(async {
/// let provider = MemoryProvider::with_tables(vec![TableDescriptor::new("customer")]);
/// let orchestrator = LocalOrchestrator::new(
///     provider,
///     SyncOptions::default(),
///     Some(SyncSetup::new(["customer"])),
/// );
/// let cancel = CancellationSignal::new();
///
/// let scope = orchestrator.ensure_scope(None, &cancel).await.unwrap();
/// assert_eq!(scope.version, "0.6.2");
/// assert!(!orchestrator.needs_upgrade(None, &cancel).await.unwrap());
/// assert!(orchestrator.upgrade(None, &cancel).await.unwrap());
/// # });
/// ```
pub struct LocalOrchestrator<P: SyncProvider> {
    provider: P,
    options: SyncOptions,
    setup: Option<SyncSetup>,
    progress: Arc<dyn ProgressSink>,
    engine: UpgradeEngine,
}

impl<P: SyncProvider> LocalOrchestrator<P> {
    pub fn new(provider: P, options: SyncOptions, setup: Option<SyncSetup>) -> Self {
        Self {
            provider,
            options,
            setup,
            progress: Arc::new(NoopProgress),
            engine: UpgradeEngine::default(),
        }
    }

    /// Build from a loaded [`SyncConfig`].
    pub fn from_config(provider: P, config: SyncConfig) -> Self {
        Self::new(provider, config.options, config.setup)
    }

    /// Report progress to `sink`.
    pub fn with_progress<S: ProgressSink + 'static>(mut self, sink: S) -> Self {
        self.progress = Arc::new(sink);
        self
    }

    /// Replace the upgrade engine.
    pub fn with_engine(mut self, engine: UpgradeEngine) -> Self {
        self.engine = engine;
        self
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub fn options(&self) -> &SyncOptions {
        &self.options
    }

    pub fn setup(&self) -> Option<&SyncSetup> {
        self.setup.as_ref()
    }

    fn scopes(&self) -> ScopeMetadata<P::ScopeBuilder> {
        let table = &self.options.scope_info_table_name;
        ScopeMetadata::new(self.provider.scope_builder(table), ScopeKind::Client, table)
    }

    async fn open<'c>(
        &self,
        stage: SyncStage,
        connection: Option<&'c mut P::Connection>,
        cancel: &CancellationSignal,
    ) -> Result<ScopeContext<'c, P::Connection>, SyncError> {
        ScopeContext::open(
            &self.provider,
            stage,
            connection,
            cancel,
            Arc::clone(&self.progress),
        )
        .await
    }

    /// Bring the client scope up to the engine version.
    ///
    /// Returns `Ok(false)` without touching the database when no setup is
    /// configured. Otherwise the database is ensured, the setup's schema
    /// read, and the scope climbs the upgrade ladder inside one transaction.
    /// Returns whether the scope is at the engine version afterwards.
    ///
    /// # Errors
    ///
    /// - [`SyncError::MissingTables`] when no setup table exists.
    /// - [`SyncError::MissingClientScopeInfo`] when the scope table or row is absent.
    /// - [`SyncError::Cancelled`] when `cancel` fires; nothing is committed.
    pub async fn upgrade(
        &self,
        connection: Option<&mut P::Connection>,
        cancel: &CancellationSignal,
    ) -> Result<bool, SyncError> {
        let Some(setup) = &self.setup else {
            tracing::debug!(scope = %self.options.scope_name, "no setup, nothing to upgrade");
            return Ok(false);
        };

        let mut ctx = self.open(SyncStage::Upgrading, connection, cancel).await?;
        let result = self.run_upgrade(setup, &mut ctx).await;
        ctx.complete(result).await
    }

    async fn run_upgrade(
        &self,
        setup: &SyncSetup,
        ctx: &mut ScopeContext<'_, P::Connection>,
    ) -> Result<bool, SyncError> {
        ctx.enter(SyncStage::SchemaReading);
        let introspector = SchemaIntrospector::new(self.provider.schema_builder());
        introspector.ensure_database(ctx).await?;
        let schema = introspector.get_schema(setup, ctx).await?;

        ctx.enter(SyncStage::ScopeLoading);
        let scopes = self.scopes();
        let Some(mut scope) = self.load_existing(&scopes, ctx).await? else {
            return Err(SyncError::MissingClientScopeInfo {
                scope: self.options.scope_name.clone(),
            });
        };

        ctx.enter(SyncStage::Upgrading);
        self.engine
            .upgrade(&self.provider, &scopes, &schema, &mut scope, ctx)
            .await
    }

    /// The scope row, or `None` when the table or row is absent.
    async fn load_existing(
        &self,
        scopes: &ScopeMetadata<P::ScopeBuilder>,
        ctx: &mut ScopeContext<'_, P::Connection>,
    ) -> Result<Option<ScopeInfo>, SyncError> {
        if !scopes.table_exists(ctx).await? {
            return Ok(None);
        }
        scopes.get(&self.options.scope_name, ctx).await
    }

    /// Whether the client scope records a version older than the engine's.
    ///
    /// `false` when no setup is configured or no scope has been recorded yet.
    /// Never writes.
    pub async fn needs_upgrade(
        &self,
        connection: Option<&mut P::Connection>,
        cancel: &CancellationSignal,
    ) -> Result<bool, SyncError> {
        if self.setup.is_none() {
            return Ok(false);
        }

        let mut ctx = self
            .open(SyncStage::ScopeLoading, connection, cancel)
            .await?;
        let scopes = self.scopes();
        let result = match self.load_existing(&scopes, &mut ctx).await {
            Ok(Some(scope)) => self.engine.needs_upgrade(&scope),
            Ok(None) => Ok(false),
            Err(err) => Err(err),
        };
        ctx.complete(result).await
    }

    /// Read the client scope without creating anything.
    pub async fn get_scope(
        &self,
        connection: Option<&mut P::Connection>,
        cancel: &CancellationSignal,
    ) -> Result<Option<ScopeInfo>, SyncError> {
        let mut ctx = self
            .open(SyncStage::ScopeLoading, connection, cancel)
            .await?;
        let scopes = self.scopes();
        let result = self.load_existing(&scopes, &mut ctx).await;
        ctx.complete(result).await
    }

    /// Read the client scope, creating the table and row when missing.
    ///
    /// A created row carries the configured setup and the engine version.
    pub async fn ensure_scope(
        &self,
        connection: Option<&mut P::Connection>,
        cancel: &CancellationSignal,
    ) -> Result<ScopeInfo, SyncError> {
        let mut ctx = self
            .open(SyncStage::ScopeWriting, connection, cancel)
            .await?;
        let result = self.ensure_scope_in(&mut ctx).await;
        ctx.complete(result).await
    }

    async fn ensure_scope_in(
        &self,
        ctx: &mut ScopeContext<'_, P::Connection>,
    ) -> Result<ScopeInfo, SyncError> {
        let scopes = self.scopes();
        let name = &self.options.scope_name;
        let setup = self.setup.as_ref();
        let mut scope = scopes.load_or_create(name, setup, ctx).await?;
        if scope.setup.is_none() && self.setup.is_some() {
            scope.setup = self.setup.clone();
            scopes.save(&scope, ctx).await?;
        }
        Ok(scope)
    }

    /// Write `scope`, creating the scope table if needed.
    pub async fn save_scope(
        &self,
        scope: &ScopeInfo,
        connection: Option<&mut P::Connection>,
        cancel: &CancellationSignal,
    ) -> Result<(), SyncError> {
        let mut ctx = self
            .open(SyncStage::ScopeWriting, connection, cancel)
            .await?;
        let result = self.save_scope_in(scope, &mut ctx).await;
        ctx.complete(result).await
    }

    async fn save_scope_in(
        &self,
        scope: &ScopeInfo,
        ctx: &mut ScopeContext<'_, P::Connection>,
    ) -> Result<(), SyncError> {
        let scopes = self.scopes();
        if !scopes.table_exists(ctx).await? {
            scopes.create_table(ctx).await?;
        }
        scopes.save(scope, ctx).await
    }

    /// Every client scope recorded in the database.
    pub async fn list_scopes(
        &self,
        connection: Option<&mut P::Connection>,
        cancel: &CancellationSignal,
    ) -> Result<Vec<ScopeInfo>, SyncError> {
        let mut ctx = self
            .open(SyncStage::ScopeLoading, connection, cancel)
            .await?;
        let scopes = self.scopes();
        let result = match scopes.table_exists(&mut ctx).await {
            Ok(true) => scopes.list(&mut ctx).await,
            Ok(false) => Ok(Vec::new()),
            Err(err) => Err(err),
        };
        ctx.complete(result).await
    }

    /// Delete the client scope row named `name`. Returns whether it existed.
    pub async fn delete_scope(
        &self,
        name: &str,
        connection: Option<&mut P::Connection>,
        cancel: &CancellationSignal,
    ) -> Result<bool, SyncError> {
        let mut ctx = self
            .open(SyncStage::ScopeWriting, connection, cancel)
            .await?;
        let scopes = self.scopes();
        let result = match scopes.table_exists(&mut ctx).await {
            Ok(true) => scopes.delete(name, &mut ctx).await,
            Ok(false) => Ok(false),
            Err(err) => Err(err),
        };
        ctx.complete(result).await
    }
}

#[cfg(test)]
mod tests {
    use syncscope_store::{MemoryProvider, Operation, TableDescriptor};

    use super::*;

    fn orchestrator(setup: Option<SyncSetup>) -> LocalOrchestrator<MemoryProvider> {
        let provider = MemoryProvider::with_tables(vec![TableDescriptor::new("customer")]);
        LocalOrchestrator::new(provider, SyncOptions::default(), setup)
    }

    #[tokio::test]
    async fn ensure_scope_records_setup_once() {
        let orchestrator = orchestrator(Some(SyncSetup::new(["customer"])));
        let cancel = CancellationSignal::new();

        let scope = orchestrator.ensure_scope(None, &cancel).await.unwrap();
        assert_eq!(scope.name, "DefaultScope");
        assert_eq!(scope.setup, Some(SyncSetup::new(["customer"])));
        let saves = orchestrator
            .provider()
            .journal()
            .into_iter()
            .filter(|op| matches!(op, Operation::SaveScope { .. }))
            .count();
        assert_eq!(saves, 1);

        orchestrator.provider().clear_journal();
        let again = orchestrator.ensure_scope(None, &cancel).await.unwrap();
        assert_eq!(again, scope);
        assert!(!orchestrator
            .provider()
            .journal()
            .iter()
            .any(Operation::is_write));
    }

    #[tokio::test]
    async fn reads_on_empty_database_find_nothing() {
        let orchestrator = orchestrator(Some(SyncSetup::new(["customer"])));
        let cancel = CancellationSignal::new();

        assert_eq!(orchestrator.get_scope(None, &cancel).await.unwrap(), None);
        assert!(orchestrator
            .list_scopes(None, &cancel)
            .await
            .unwrap()
            .is_empty());
        assert!(!orchestrator.delete_scope("x", None, &cancel).await.unwrap());
        assert!(!orchestrator.needs_upgrade(None, &cancel).await.unwrap());
        assert!(!orchestrator
            .provider()
            .journal()
            .iter()
            .any(Operation::is_write));
    }

    #[tokio::test]
    async fn save_list_and_delete() {
        let orchestrator = orchestrator(None);
        let cancel = CancellationSignal::new();

        orchestrator
            .save_scope(&ScopeInfo::new("a", "0.5.0"), None, &cancel)
            .await
            .unwrap();
        orchestrator
            .save_scope(&ScopeInfo::new("b", "0.6.2"), None, &cancel)
            .await
            .unwrap();
        let names: Vec<_> = orchestrator
            .list_scopes(None, &cancel)
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.name)
            .collect();
        assert_eq!(names, ["a", "b"]);

        assert!(orchestrator.delete_scope("a", None, &cancel).await.unwrap());
        let remaining = orchestrator.list_scopes(None, &cancel).await.unwrap();
        assert_eq!(remaining.len(), 1);
    }

    #[tokio::test]
    async fn needs_upgrade_without_setup_is_false() {
        let orchestrator = orchestrator(None);
        let cancel = CancellationSignal::new();
        orchestrator
            .save_scope(&ScopeInfo::new("DefaultScope", "0.5.0"), None, &cancel)
            .await
            .unwrap();
        orchestrator.provider().clear_journal();
        assert!(!orchestrator.needs_upgrade(None, &cancel).await.unwrap());
        assert!(orchestrator.provider().journal().is_empty());
    }

    #[tokio::test]
    async fn from_config_uses_configured_names() {
        let config = SyncConfig::from_toml_str(
            r#"
[options]
scope_info_table_name = "meta"
scope_name = "mobile"

[[setup.tables]]
name = "customer"
"#,
        )
        .unwrap();
        let orchestrator = LocalOrchestrator::from_config(MemoryProvider::new(), config);
        orchestrator
            .ensure_scope(None, &CancellationSignal::new())
            .await
            .unwrap();
        assert!(orchestrator
            .provider()
            .scope(ScopeKind::Client, "meta", "mobile")
            .is_some());
    }
}
