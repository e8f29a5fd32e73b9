//! Client scope upgrades.
//!
//! The client ladder, in order:
//!
//! | Rung | Applies when | Action |
//! |------|--------------|--------|
//! | `0.6.0` | `0.x` with `x <= 5` | stamp the version |
//! | `0.6.1` | `0.x.0` with `x <= 6` | recreate the initial-changes artifacts |
//! | `0.6.2` | `0.x.1` with `x <= 6` | stamp the version |
//!
//! Predicates see the version left by the rungs before them, so a `0.5.3`
//! client climbs all three in one pass. Rungs are appended, never reordered.

use syncscope_migrate::{LadderError, SyncVersion, UpgradeLadder, UpgradePlan};
use syncscope_store::{ScopeInfo, SyncProvider, SyncSchema};

use crate::context::ScopeContext;
use crate::error::SyncError;
use crate::metadata::ScopeMetadata;
use crate::migrator;
use crate::progress::ProgressEvent;
use crate::ENGINE_VERSION;

/// What a rung does to the database before its version is established.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RungAction {
    /// Nothing beyond recording the new version.
    StampVersion,
    /// Drop and recreate the initial-changes artifacts of every schema table.
    ReprovisionInitialChanges,
}

/// The client upgrade ladder, topped at [`ENGINE_VERSION`].
pub fn client_ladder() -> UpgradeLadder<RungAction> {
    UpgradeLadder::new(ENGINE_VERSION)
        .rung(
            "0.6.0",
            |v| v.major == 0 && v.minor <= 5,
            SyncVersion::new(0, 6, 0),
            RungAction::StampVersion,
        )
        .rung(
            "0.6.1",
            |v| v.major == 0 && v.minor <= 6 && v.build == 0,
            SyncVersion::new(0, 6, 1),
            RungAction::ReprovisionInitialChanges,
        )
        .rung(
            "0.6.2",
            |v| v.major == 0 && v.minor <= 6 && v.build == 1,
            SyncVersion::new(0, 6, 2),
            RungAction::StampVersion,
        )
}

/// Runs an upgrade ladder against one scope.
#[derive(Debug, Clone)]
pub struct UpgradeEngine {
    ladder: UpgradeLadder<RungAction>,
}

impl Default for UpgradeEngine {
    fn default() -> Self {
        Self {
            ladder: client_ladder(),
        }
    }
}

impl UpgradeEngine {
    /// Engine over a custom ladder. The ladder must validate.
    pub fn with_ladder(ladder: UpgradeLadder<RungAction>) -> Result<Self, LadderError> {
        ladder.validate()?;
        Ok(Self { ladder })
    }

    pub fn ladder(&self) -> &UpgradeLadder<RungAction> {
        &self.ladder
    }

    /// Parse the version recorded in `scope`.
    pub fn recorded_version(scope: &ScopeInfo) -> Result<SyncVersion, SyncError> {
        SyncVersion::normalize(&scope.version).map_err(|source| SyncError::InvalidVersion {
            scope: scope.name.clone(),
            source,
        })
    }

    /// True if `scope` records a version older than the ladder's top.
    pub fn needs_upgrade(&self, scope: &ScopeInfo) -> Result<bool, SyncError> {
        let version = Self::recorded_version(scope)?;
        Ok(self.ladder.needs_upgrade(&version))
    }

    /// The rungs that would run for `scope`.
    pub fn plan(&self, scope: &ScopeInfo) -> Result<UpgradePlan<'_, RungAction>, SyncError> {
        let version = Self::recorded_version(scope)?;
        Ok(self.ladder.plan(version))
    }

    /// Climb the ladder from the version recorded in `scope`.
    ///
    /// Each applicable rung runs its action in order. Once all of them have
    /// succeeded, the reached version is written to the scope row, once, and
    /// only if it moved. `scope` is updated only after that write succeeds.
    /// Returns whether the scope now sits at the ladder's top.
    pub async fn upgrade<P>(
        &self,
        provider: &P,
        scopes: &ScopeMetadata<P::ScopeBuilder>,
        schema: &SyncSchema,
        scope: &mut ScopeInfo,
        ctx: &mut ScopeContext<'_, P::Connection>,
    ) -> Result<bool, SyncError>
    where
        P: SyncProvider,
    {
        let plan = self.plan(scope)?;
        let mut version = plan.start();

        for rung in plan.steps() {
            ctx.checkpoint()?;
            ctx.report(ProgressEvent::RungStarted {
                rung: rung.name(),
                from: version,
            });
            tracing::info!(
                scope = %scope.name,
                rung = rung.name(),
                from = %version,
                to = %rung.target_version(),
                "applying upgrade rung"
            );

            match rung.action() {
                RungAction::StampVersion => {}
                RungAction::ReprovisionInitialChanges => {
                    migrator::reprovision_initial_changes(provider, schema, ctx).await?;
                }
            }

            version = rung.target_version();
            ctx.report(ProgressEvent::RungFinished {
                rung: rung.name(),
                to: version,
            });
        }

        if version != plan.start() {
            let mut upgraded = scope.clone();
            upgraded.version = version.to_string();
            scopes.save(&upgraded, ctx).await?;
            tracing::info!(
                scope = %scope.name,
                from = %plan.start(),
                to = %version,
                "scope version persisted"
            );
            ctx.report(ProgressEvent::UpgradeCompleted {
                scope: scope.name.clone(),
                from: plan.start(),
                to: version,
            });
            *scope = upgraded;
        }

        Ok(version == self.ladder.current_version())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rung_names(from: SyncVersion) -> Vec<&'static str> {
        client_ladder()
            .plan(from)
            .steps()
            .iter()
            .map(|r| r.name())
            .collect()
    }

    #[test]
    fn client_ladder_is_valid() {
        assert!(client_ladder().validate().is_ok());
        assert_eq!(client_ladder().current_version(), ENGINE_VERSION);
    }

    #[test]
    fn old_clients_climb_every_rung() {
        let every = ["0.6.0", "0.6.1", "0.6.2"];
        assert_eq!(rung_names(SyncVersion::new(0, 5, 3)), every);
        assert_eq!(rung_names(SyncVersion::new(0, 0, 0)), every);
    }

    #[test]
    fn partial_clients_resume_mid_ladder() {
        assert_eq!(rung_names(SyncVersion::new(0, 6, 0)), ["0.6.1", "0.6.2"]);
        assert_eq!(rung_names(SyncVersion::new(0, 6, 1)), ["0.6.2"]);
        assert!(rung_names(SyncVersion::new(0, 6, 2)).is_empty());
    }

    #[test]
    fn newer_clients_are_left_alone() {
        assert!(rung_names(SyncVersion::new(0, 7, 0)).is_empty());
        assert!(rung_names(SyncVersion::new(1, 0, 0)).is_empty());
    }

    #[test]
    fn needs_upgrade_reads_recorded_version() {
        let engine = UpgradeEngine::default();
        assert!(engine.needs_upgrade(&ScopeInfo::new("s", "0.5")).unwrap());
        assert!(engine.needs_upgrade(&ScopeInfo::new("s", "")).unwrap());
        assert!(!engine.needs_upgrade(&ScopeInfo::new("s", "0.6.2")).unwrap());
        assert!(!engine.needs_upgrade(&ScopeInfo::new("s", "0.7.0")).unwrap());
        assert!(matches!(
            engine.needs_upgrade(&ScopeInfo::new("s", "zero.six")),
            Err(SyncError::InvalidVersion { .. })
        ));
    }

    #[test]
    fn custom_ladders_must_validate() {
        let broken = UpgradeLadder::new(SyncVersion::new(1, 0, 0)).rung(
            "0.9.0",
            |_| true,
            SyncVersion::new(0, 9, 0),
            RungAction::StampVersion,
        );
        assert!(UpgradeEngine::with_ladder(broken).is_err());
    }
}
