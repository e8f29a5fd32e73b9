//! Dependency-ordered table migration.
//!
//! Parents are provisioned before children. Artifacts are recreated with a
//! drop-then-create, so running a migration twice leaves the same objects.

use syncscope_store::{
    ArtifactKind, Connection, SyncProvider, SyncSchema, TableBuilder, TableDescriptor,
};

use crate::context::ScopeContext;
use crate::error::{SyncError, SyncStage};
use crate::progress::ProgressEvent;

const INITIAL: ArtifactKind = ArtifactKind::SelectInitialChanges;
const FILTERED: ArtifactKind = ArtifactKind::SelectInitialChangesWithFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    Visiting,
    Done,
}

/// Order `tables` so every table comes after the tables it references.
///
/// Depth-first and stable: tables with no ordering constraint between them
/// keep their input order. Names match case-insensitively. Relations to
/// tables outside `tables` and self-references are ignored. Any other cycle
/// fails with [`SyncError::CyclicRelation`].
///
/// ```
/// use syncscope::sort_by_dependencies;
/// use syncscope_store::TableDescriptor;
///
/// let tables = vec![
///     TableDescriptor::new("orders").with_relation("customer_id", "customer", "id"),
///     TableDescriptor::new("customer"),
/// ];
/// let sorted: Vec<_> = sort_by_dependencies(&tables)
///     .unwrap()
///     .into_iter()
///     .map(|t| t.name.as_str())
///     .collect();
/// assert_eq!(sorted, ["customer", "orders"]);
/// ```
pub fn sort_by_dependencies(
    tables: &[TableDescriptor],
) -> Result<Vec<&TableDescriptor>, SyncError> {
    let mut marks = vec![Mark::Unvisited; tables.len()];
    let mut order = Vec::with_capacity(tables.len());
    for index in 0..tables.len() {
        visit(index, tables, &mut marks, &mut order)?;
    }
    Ok(order)
}

fn visit<'t>(
    index: usize,
    tables: &'t [TableDescriptor],
    marks: &mut [Mark],
    order: &mut Vec<&'t TableDescriptor>,
) -> Result<(), SyncError> {
    match marks[index] {
        Mark::Done => return Ok(()),
        Mark::Visiting => {
            return Err(SyncError::CyclicRelation {
                table: tables[index].name.clone(),
            });
        }
        Mark::Unvisited => {}
    }

    marks[index] = Mark::Visiting;
    for parent in tables[index].parent_tables() {
        if let Some(p) = tables
            .iter()
            .position(|t| t.name.eq_ignore_ascii_case(parent))
        {
            visit(p, tables, marks, order)?;
        }
    }
    marks[index] = Mark::Done;
    order.push(&tables[index]);
    Ok(())
}

/// Drop `kind` on `table` if it exists, then create it.
pub async fn reprovision<C, B>(
    builder: &B,
    table: &str,
    kind: ArtifactKind,
    ctx: &mut ScopeContext<'_, C>,
) -> Result<(), SyncError>
where
    C: Connection,
    B: TableBuilder<C>,
{
    let storage = SyncError::storage(SyncStage::Provisioning);

    ctx.checkpoint()?;
    let exists = builder
        .exists(kind, ctx.connection())
        .await
        .map_err(&storage)?;
    if exists {
        ctx.checkpoint()?;
        builder
            .drop(kind, ctx.connection())
            .await
            .map_err(&storage)?;
    }
    ctx.checkpoint()?;
    builder
        .create(kind, ctx.connection())
        .await
        .map_err(&storage)?;

    tracing::debug!(table, %kind, replaced = exists, "artifact provisioned");
    ctx.report(ProgressEvent::ArtifactProvisioned {
        table: table.to_string(),
        kind,
    });
    Ok(())
}

/// Recreate the initial-changes artifacts of every table, parents first.
///
/// Tables with a filter also get the filtered variant.
pub async fn reprovision_initial_changes<P>(
    provider: &P,
    schema: &SyncSchema,
    ctx: &mut ScopeContext<'_, P::Connection>,
) -> Result<(), SyncError>
where
    P: SyncProvider,
{
    let previous = ctx.stage();
    ctx.enter(SyncStage::Provisioning);

    for table in sort_by_dependencies(&schema.tables)? {
        let builder = provider.table_builder(table);
        reprovision(&builder, &table.name, INITIAL, ctx).await?;
        if table.filter.is_some() {
            reprovision(&builder, &table.name, FILTERED, ctx).await?;
        }
    }

    ctx.enter(previous);
    Ok(())
}
