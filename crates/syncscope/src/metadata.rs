//! Scope metadata store.
//!
//! Reads and writes scope rows inside the caller's [`ScopeContext`]. Nothing
//! here commits: durability belongs to whoever completes the context.

use syncscope_store::{Connection, ScopeBuilder, ScopeInfo, ScopeKind, SyncSetup};

use crate::context::ScopeContext;
use crate::error::{SyncError, SyncStage};
use crate::progress::ProgressEvent;
use crate::ENGINE_VERSION;

/// Scope rows of one kind, accessed through a backend [`ScopeBuilder`].
#[derive(Debug, Clone)]
pub struct ScopeMetadata<B> {
    builder: B,
    kind: ScopeKind,
    table: String,
}

impl<B> ScopeMetadata<B> {
    /// `base_table` is the configured scope table name; `kind` picks the physical table.
    pub fn new(builder: B, kind: ScopeKind, base_table: &str) -> Self {
        Self {
            builder,
            kind,
            table: kind.table_name(base_table),
        }
    }

    pub fn kind(&self) -> ScopeKind {
        self.kind
    }

    /// Physical name of the scope table.
    pub fn table_name(&self) -> &str {
        &self.table
    }

    pub async fn table_exists<C>(&self, ctx: &mut ScopeContext<'_, C>) -> Result<bool, SyncError>
    where
        C: Connection,
        B: ScopeBuilder<C>,
    {
        ctx.checkpoint()?;
        self.builder
            .exists_scope_table(self.kind, ctx.connection())
            .await
            .map_err(SyncError::storage(SyncStage::ScopeLoading))
    }

    /// Create the scope table. A no-op if it exists.
    pub async fn create_table<C>(&self, ctx: &mut ScopeContext<'_, C>) -> Result<(), SyncError>
    where
        C: Connection,
        B: ScopeBuilder<C>,
    {
        ctx.checkpoint()?;
        self.builder
            .create_scope_table(self.kind, ctx.connection())
            .await
            .map_err(SyncError::storage(SyncStage::ScopeWriting))?;
        tracing::debug!(table = %self.table, "scope table ensured");
        ctx.report(ProgressEvent::ScopeTableCreated {
            table: self.table.clone(),
        });
        Ok(())
    }

    /// Read the row for `name`. Never creates one.
    pub async fn get<C>(
        &self,
        name: &str,
        ctx: &mut ScopeContext<'_, C>,
    ) -> Result<Option<ScopeInfo>, SyncError>
    where
        C: Connection,
        B: ScopeBuilder<C>,
    {
        ctx.checkpoint()?;
        let scope = self
            .builder
            .get_scope(self.kind, name, ctx.connection())
            .await
            .map_err(SyncError::storage(SyncStage::ScopeLoading))?;
        if let Some(scope) = &scope {
            ctx.report(ProgressEvent::ScopeLoaded {
                scope: scope.name.clone(),
                version: scope.version.clone(),
            });
        }
        Ok(scope)
    }

    /// Every row, ordered by name.
    pub async fn list<C>(&self, ctx: &mut ScopeContext<'_, C>) -> Result<Vec<ScopeInfo>, SyncError>
    where
        C: Connection,
        B: ScopeBuilder<C>,
    {
        ctx.checkpoint()?;
        self.builder
            .get_all_scopes(self.kind, ctx.connection())
            .await
            .map_err(SyncError::storage(SyncStage::ScopeLoading))
    }

    /// Insert or overwrite the row for `scope.name`.
    pub async fn save<C>(
        &self,
        scope: &ScopeInfo,
        ctx: &mut ScopeContext<'_, C>,
    ) -> Result<(), SyncError>
    where
        C: Connection,
        B: ScopeBuilder<C>,
    {
        ctx.checkpoint()?;
        self.builder
            .save_scope(self.kind, scope, ctx.connection())
            .await
            .map_err(SyncError::storage(SyncStage::ScopeWriting))?;
        ctx.report(ProgressEvent::ScopeSaved {
            scope: scope.name.clone(),
            version: scope.version.clone(),
        });
        Ok(())
    }

    /// Delete the row for `name`. Returns whether it existed.
    pub async fn delete<C>(
        &self,
        name: &str,
        ctx: &mut ScopeContext<'_, C>,
    ) -> Result<bool, SyncError>
    where
        C: Connection,
        B: ScopeBuilder<C>,
    {
        ctx.checkpoint()?;
        self.builder
            .delete_scope(self.kind, name, ctx.connection())
            .await
            .map_err(SyncError::storage(SyncStage::ScopeWriting))
    }

    /// Read the row for `name`, creating the table and the row when missing.
    ///
    /// A new row is stamped at [`ENGINE_VERSION`] and carries `setup`: a
    /// scope created by this engine already has current structures.
    pub async fn load_or_create<C>(
        &self,
        name: &str,
        setup: Option<&SyncSetup>,
        ctx: &mut ScopeContext<'_, C>,
    ) -> Result<ScopeInfo, SyncError>
    where
        C: Connection,
        B: ScopeBuilder<C>,
    {
        if !self.table_exists(ctx).await? {
            self.create_table(ctx).await?;
        }
        if let Some(scope) = self.get(name, ctx).await? {
            return Ok(scope);
        }

        let mut scope = ScopeInfo::new(name, ENGINE_VERSION.to_string());
        scope.setup = setup.cloned();
        self.save(&scope, ctx).await?;
        tracing::info!(scope = name, version = %ENGINE_VERSION, "scope created");
        Ok(scope)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use syncscope_store::{MemoryConnection, MemoryProvider, Operation, SyncProvider};

    use super::*;
    use crate::cancel::CancellationSignal;
    use crate::progress::NoopProgress;

    async fn open(provider: &MemoryProvider) -> ScopeContext<'static, MemoryConnection> {
        ScopeContext::open(
            provider,
            SyncStage::ScopeLoading,
            None,
            &CancellationSignal::new(),
            Arc::new(NoopProgress),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn get_never_creates() {
        let provider = MemoryProvider::new();
        let scopes = ScopeMetadata::new(
            provider.scope_builder("scope_info"),
            ScopeKind::Client,
            "scope_info",
        );
        let mut ctx = open(&provider).await;
        scopes.create_table(&mut ctx).await.unwrap();
        assert_eq!(scopes.get("default", &mut ctx).await.unwrap(), None);
        ctx.complete(Ok(())).await.unwrap();

        assert!(!provider
            .journal()
            .iter()
            .any(|op| matches!(op, Operation::SaveScope { .. })));
    }

    #[tokio::test]
    async fn load_or_create_stamps_engine_version() {
        let provider = MemoryProvider::new();
        let scopes = ScopeMetadata::new(
            provider.scope_builder("scope_info"),
            ScopeKind::Client,
            "scope_info",
        );
        let mut ctx = open(&provider).await;
        let setup = SyncSetup::new(["customer"]);
        let created = scopes
            .load_or_create("default", Some(&setup), &mut ctx)
            .await
            .unwrap();
        assert_eq!(created.version, "0.6.2");
        assert_eq!(created.setup, Some(setup));

        let again = scopes
            .load_or_create("default", None, &mut ctx)
            .await
            .unwrap();
        assert_eq!(again, created);
        ctx.complete(Ok(())).await.unwrap();

        let saves = provider
            .journal()
            .into_iter()
            .filter(|op| matches!(op, Operation::SaveScope { .. }))
            .count();
        assert_eq!(saves, 1);
        assert!(provider
            .scope(ScopeKind::Client, "scope_info", "default")
            .is_some());
    }

    #[tokio::test]
    async fn save_overwrites_and_delete_removes() {
        let provider = MemoryProvider::new();
        let scopes = ScopeMetadata::new(
            provider.scope_builder("scope_info"),
            ScopeKind::Server,
            "scope_info",
        );
        assert_eq!(scopes.table_name(), "scope_info_server");

        let mut ctx = open(&provider).await;
        scopes.create_table(&mut ctx).await.unwrap();
        let mut scope = ScopeInfo::new("a", "0.5.0");
        scopes.save(&scope, &mut ctx).await.unwrap();
        scope.version = "0.6.2".into();
        scope.last_sync = Some(42);
        scopes.save(&scope, &mut ctx).await.unwrap();
        scopes
            .save(&ScopeInfo::new("b", "0.6.2"), &mut ctx)
            .await
            .unwrap();

        let all = scopes.list(&mut ctx).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0], scope);

        assert!(scopes.delete("b", &mut ctx).await.unwrap());
        assert!(!scopes.delete("b", &mut ctx).await.unwrap());
        ctx.complete(Ok(())).await.unwrap();
    }

    #[tokio::test]
    async fn storage_errors_name_their_stage() {
        let provider = MemoryProvider::new();
        let scopes = ScopeMetadata::new(
            provider.scope_builder("scope_info"),
            ScopeKind::Client,
            "scope_info",
        );
        let mut ctx = open(&provider).await;
        let err = scopes.get("default", &mut ctx).await.unwrap_err();
        assert_eq!(err.stage(), Some(SyncStage::ScopeLoading));
        ctx.complete::<()>(Err(err)).await.unwrap_err();
    }
}
