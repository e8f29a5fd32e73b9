//! # syncscope-migrate
//!
//! Version values and upgrade ladders for syncscope client databases.
//!
//! A client database records the version its sync structures conform to.
//! When the engine moves forward, the database climbs an ordered ladder of
//! rungs until it reaches the engine's current version.
//!
//! ## Key Concepts
//!
//! - **Normalized versions**: recorded strings like `"0.5"` compare as `0.5.0`.
//! - **Append-only ladder**: rungs run in declaration order and are never
//!   reordered or removed, so every old client keeps an upgrade path.
//! - **Chained predicates**: each rung sees the version the previous rung
//!   established.
//! - **No I/O**: this crate only plans; the caller executes rung actions.

mod engine;
mod version;

pub use engine::{LadderError, Rung, UpgradeLadder, UpgradePlan};
pub use version::{SyncVersion, VersionError};
