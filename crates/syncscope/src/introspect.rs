use syncscope_store::{Connection, SchemaBuilder, SyncSchema, SyncSetup};

use crate::context::ScopeContext;
use crate::error::{SyncError, SyncStage};
use crate::progress::ProgressEvent;

/// Database-level reads over a backend [`SchemaBuilder`].
#[derive(Debug, Clone)]
pub struct SchemaIntrospector<B> {
    builder: B,
}

impl<B> SchemaIntrospector<B> {
    pub fn new(builder: B) -> Self {
        Self { builder }
    }

    /// Make sure the target database exists.
    pub async fn ensure_database<C>(&self, ctx: &mut ScopeContext<'_, C>) -> Result<(), SyncError>
    where
        C: Connection,
        B: SchemaBuilder<C>,
    {
        ctx.checkpoint()?;
        self.builder
            .ensure_database(ctx.connection())
            .await
            .map_err(SyncError::storage(SyncStage::SchemaReading))?;
        ctx.report(ProgressEvent::DatabaseEnsured);
        Ok(())
    }

    /// Describe the setup's tables.
    ///
    /// Fails with [`SyncError::MissingTables`] when none of them exist.
    pub async fn get_schema<C>(
        &self,
        setup: &SyncSetup,
        ctx: &mut ScopeContext<'_, C>,
    ) -> Result<SyncSchema, SyncError>
    where
        C: Connection,
        B: SchemaBuilder<C>,
    {
        ctx.checkpoint()?;
        let schema = self
            .builder
            .get_schema(setup, ctx.connection())
            .await
            .map_err(SyncError::storage(SyncStage::SchemaReading))?;
        if schema.is_empty() {
            return Err(SyncError::MissingTables);
        }
        tracing::debug!(tables = schema.tables.len(), "schema loaded");
        ctx.report(ProgressEvent::SchemaLoaded {
            tables: schema.tables.len(),
        });
        Ok(schema)
    }
}
