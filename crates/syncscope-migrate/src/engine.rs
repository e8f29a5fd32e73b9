use thiserror::Error;

use crate::version::SyncVersion;

/// One rung of an upgrade ladder.
///
/// A rung applies when its predicate holds for the version established so
/// far, and establishes exactly `target` once its action has run.
/// `A` is the action payload the executor interprets; the ladder never looks
/// inside it.
#[derive(Debug, Clone)]
pub struct Rung<A> {
    name: &'static str,
    applies: fn(&SyncVersion) -> bool,
    target: SyncVersion,
    action: A,
}

impl<A> Rung<A> {
    /// Rung name, used in logs and progress events.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Whether this rung runs for a database currently at `version`.
    pub fn applies_to(&self, version: &SyncVersion) -> bool {
        (self.applies)(version)
    }

    /// Version established after the action succeeds.
    pub fn target_version(&self) -> SyncVersion {
        self.target
    }

    /// The action payload.
    pub fn action(&self) -> &A {
        &self.action
    }
}

/// Error in ladder construction.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LadderError {
    /// A rung targets a version not above the previous rung.
    #[error("rung '{rung}' targets {target}, which is not above the previous rung's {previous}")]
    OutOfOrder {
        rung: &'static str,
        target: SyncVersion,
        previous: SyncVersion,
    },
    /// A rung targets a version beyond the current engine version.
    #[error("rung '{rung}' targets {target}, beyond the current version {current}")]
    BeyondCurrent {
        rung: &'static str,
        target: SyncVersion,
        current: SyncVersion,
    },
    /// The last rung does not reach the current engine version.
    #[error("ladder tops out at {top}, but the current version is {current}")]
    DoesNotReachCurrent {
        top: SyncVersion,
        current: SyncVersion,
    },
}

/// The rungs that apply to a starting version, in the order they will run.
#[derive(Debug)]
pub struct UpgradePlan<'l, A> {
    start: SyncVersion,
    reached: SyncVersion,
    steps: Vec<&'l Rung<A>>,
}

impl<'l, A> UpgradePlan<'l, A> {
    /// Version the plan starts from.
    pub fn start(&self) -> SyncVersion {
        self.start
    }

    /// Version established once every step has run.
    pub fn reached(&self) -> SyncVersion {
        self.reached
    }

    /// Steps in execution order.
    pub fn steps(&self) -> &[&'l Rung<A>] {
        &self.steps
    }

    /// True when no rung applies.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// An ordered, append-only list of upgrade rungs.
///
/// Rungs run in declaration order, never sorted: the order is part of the
/// upgrade contract for old clients, so new rungs are only ever appended.
/// Each predicate is evaluated against the version produced by the rungs
/// before it, so a client far behind climbs several rungs in one pass.
///
/// # Example
///
/// ```
/// use syncscope_migrate::{SyncVersion, UpgradeLadder};
///
/// let ladder = UpgradeLadder::new(SyncVersion::new(1, 1, 0))
///     .rung("1.0.0", |v| v.major == 0, SyncVersion::new(1, 0, 0), "rebuild")
///     .rung("1.1.0", |v| v.major == 1 && v.minor == 0, SyncVersion::new(1, 1, 0), "stamp");
/// assert!(ladder.validate().is_ok());
///
/// let plan = ladder.plan(SyncVersion::new(0, 9, 0));
/// let names: Vec<_> = plan.steps().iter().map(|r| r.name()).collect();
/// assert_eq!(names, ["1.0.0", "1.1.0"]);
/// assert_eq!(plan.reached(), SyncVersion::new(1, 1, 0));
/// ```
#[derive(Debug, Clone)]
pub struct UpgradeLadder<A> {
    current: SyncVersion,
    rungs: Vec<Rung<A>>,
}

impl<A> UpgradeLadder<A> {
    /// Create an empty ladder whose top is `current`.
    pub fn new(current: SyncVersion) -> Self {
        Self {
            current,
            rungs: Vec::new(),
        }
    }

    /// Append a rung.
    pub fn rung(
        mut self,
        name: &'static str,
        applies: fn(&SyncVersion) -> bool,
        target: SyncVersion,
        action: A,
    ) -> Self {
        self.rungs.push(Rung {
            name,
            applies,
            target,
            action,
        });
        self
    }

    /// The version a fully migrated database is at.
    pub fn current_version(&self) -> SyncVersion {
        self.current
    }

    /// Registered rungs, in execution order.
    pub fn rungs(&self) -> &[Rung<A>] {
        &self.rungs
    }

    /// True if a database at `version` is behind the current version.
    pub fn needs_upgrade(&self, version: &SyncVersion) -> bool {
        *version < self.current
    }

    /// Walk the ladder from `from`, collecting the rungs that apply.
    pub fn plan(&self, from: SyncVersion) -> UpgradePlan<'_, A> {
        let mut version = from;
        let mut steps = Vec::new();
        for rung in &self.rungs {
            if rung.applies_to(&version) {
                steps.push(rung);
                version = rung.target;
            }
        }
        UpgradePlan {
            start: from,
            reached: version,
            steps,
        }
    }

    /// Check that targets strictly ascend and the last one is the current version.
    pub fn validate(&self) -> Result<(), LadderError> {
        let mut previous: Option<SyncVersion> = None;
        for rung in &self.rungs {
            if let Some(prev) = previous {
                if rung.target <= prev {
                    return Err(LadderError::OutOfOrder {
                        rung: rung.name,
                        target: rung.target,
                        previous: prev,
                    });
                }
            }
            if rung.target > self.current {
                return Err(LadderError::BeyondCurrent {
                    rung: rung.name,
                    target: rung.target,
                    current: self.current,
                });
            }
            previous = Some(rung.target);
        }

        match previous {
            Some(top) if top != self.current => Err(LadderError::DoesNotReachCurrent {
                top,
                current: self.current,
            }),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn ladder() -> UpgradeLadder<u8> {
        UpgradeLadder::new(SyncVersion::new(0, 6, 2))
            .rung(
                "0.6.0",
                |v| v.major == 0 && v.minor <= 5,
                SyncVersion::new(0, 6, 0),
                1,
            )
            .rung(
                "0.6.1",
                |v| v.major == 0 && v.minor <= 6 && v.build == 0,
                SyncVersion::new(0, 6, 1),
                2,
            )
            .rung(
                "0.6.2",
                |v| v.major == 0 && v.minor <= 6 && v.build == 1,
                SyncVersion::new(0, 6, 2),
                3,
            )
    }

    fn actions(plan: &UpgradePlan<'_, u8>) -> Vec<u8> {
        plan.steps().iter().map(|r| *r.action()).collect()
    }

    #[test]
    fn old_client_climbs_every_rung() {
        let ladder = ladder();
        let plan = ladder.plan(SyncVersion::new(0, 5, 3));
        assert_eq!(actions(&plan), vec![1, 2, 3]);
        assert_eq!(plan.reached(), SyncVersion::new(0, 6, 2));
    }

    #[test]
    fn partial_climb() {
        let ladder = ladder();
        let plan = ladder.plan(SyncVersion::new(0, 6, 1));
        assert_eq!(actions(&plan), vec![3]);

        let plan = ladder.plan(SyncVersion::new(0, 6, 0));
        assert_eq!(actions(&plan), vec![2, 3]);
    }

    #[test]
    fn current_client_has_empty_plan() {
        let ladder = ladder();
        let plan = ladder.plan(SyncVersion::new(0, 6, 2));
        assert!(plan.is_empty());
        assert_eq!(plan.reached(), plan.start());
    }

    #[test]
    fn newer_client_is_left_alone() {
        let ladder = ladder();
        let plan = ladder.plan(SyncVersion::new(0, 7, 0));
        assert!(plan.is_empty());
        assert!(!ladder.needs_upgrade(&SyncVersion::new(0, 7, 0)));
    }

    #[test]
    fn needs_upgrade_compares_against_current() {
        let ladder = ladder();
        assert!(ladder.needs_upgrade(&SyncVersion::new(0, 5, 9)));
        assert!(ladder.needs_upgrade(&SyncVersion::new(0, 6, 1)));
        assert!(!ladder.needs_upgrade(&SyncVersion::new(0, 6, 2)));
    }

    #[test]
    fn declaration_order_is_kept() {
        let ladder = ladder();
        let names: Vec<_> = ladder.rungs().iter().map(|r| r.name()).collect();
        assert_eq!(names, vec!["0.6.0", "0.6.1", "0.6.2"]);
    }

    #[test]
    fn validate_ok() {
        assert!(ladder().validate().is_ok());
        assert!(UpgradeLadder::<()>::new(SyncVersion::new(1, 0, 0))
            .validate()
            .is_ok());
    }

    #[test]
    fn validate_out_of_order() {
        let ladder = UpgradeLadder::new(SyncVersion::new(0, 6, 2))
            .rung("b", |_| true, SyncVersion::new(0, 6, 1), ())
            .rung("a", |_| true, SyncVersion::new(0, 6, 0), ());
        assert_eq!(
            ladder.validate(),
            Err(LadderError::OutOfOrder {
                rung: "a",
                target: SyncVersion::new(0, 6, 0),
                previous: SyncVersion::new(0, 6, 1),
            })
        );
    }

    #[test]
    fn validate_top_mismatch() {
        let ladder = UpgradeLadder::new(SyncVersion::new(0, 6, 2)).rung(
            "a",
            |_| true,
            SyncVersion::new(0, 6, 1),
            (),
        );
        assert_eq!(
            ladder.validate(),
            Err(LadderError::DoesNotReachCurrent {
                top: SyncVersion::new(0, 6, 1),
                current: SyncVersion::new(0, 6, 2),
            })
        );

        let ladder = UpgradeLadder::new(SyncVersion::new(0, 6, 0)).rung(
            "a",
            |_| true,
            SyncVersion::new(0, 6, 1),
            (),
        );
        assert!(matches!(ladder.validate(), Err(LadderError::BeyondCurrent { .. })));
    }

    proptest! {
        #[test]
        fn needs_upgrade_iff_older(major in 0u32..3, minor in 0u32..10, build in 0u32..5) {
            let ladder = ladder();
            let v = SyncVersion::new(major, minor, build);
            prop_assert_eq!(ladder.needs_upgrade(&v), v < ladder.current_version());
        }

        #[test]
        fn plans_never_move_backwards(major in 0u32..3, minor in 0u32..10, build in 0u32..5) {
            let ladder = ladder();
            let plan = ladder.plan(SyncVersion::new(major, minor, build));
            prop_assert!(plan.reached() >= plan.start());
            if plan.start() <= ladder.current_version() {
                prop_assert!(plan.reached() <= ladder.current_version());
            }
        }
    }
}
