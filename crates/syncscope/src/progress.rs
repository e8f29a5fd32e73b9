//! Progress reporting.
//!
//! Sinks only observe. Nothing reported here feeds back into control flow.

use syncscope_migrate::SyncVersion;
use syncscope_store::ArtifactKind;

use crate::error::SyncStage;

/// Something an orchestrated operation just did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    /// The scope table was created.
    ScopeTableCreated { table: String },
    /// A scope row was read.
    ScopeLoaded { scope: String, version: String },
    /// A scope row was written.
    ScopeSaved { scope: String, version: String },
    /// The target database exists.
    DatabaseEnsured,
    /// The schema of the setup tables was read.
    SchemaLoaded { tables: usize },
    /// An upgrade rung is about to run.
    RungStarted {
        rung: &'static str,
        from: SyncVersion,
    },
    /// An upgrade rung finished.
    RungFinished { rung: &'static str, to: SyncVersion },
    /// An artifact was dropped (if present) and recreated.
    ArtifactProvisioned { table: String, kind: ArtifactKind },
    /// The scope's recorded version moved forward.
    UpgradeCompleted {
        scope: String,
        from: SyncVersion,
        to: SyncVersion,
    },
}

/// Receives progress events.
pub trait ProgressSink: Send + Sync {
    fn report(&self, stage: SyncStage, event: &ProgressEvent);
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopProgress;

impl ProgressSink for NoopProgress {
    fn report(&self, _stage: SyncStage, _event: &ProgressEvent) {}
}

/// Forwards events to `tracing` at debug level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingProgress;

impl ProgressSink for TracingProgress {
    fn report(&self, stage: SyncStage, event: &ProgressEvent) {
        tracing::debug!(%stage, ?event, "sync progress");
    }
}

impl<F> ProgressSink for F
where
    F: Fn(SyncStage, &ProgressEvent) + Send + Sync,
{
    fn report(&self, stage: SyncStage, event: &ProgressEvent) {
        self(stage, event)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    #[test]
    fn closures_are_sinks() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = {
            let seen = Arc::clone(&seen);
            move |stage: SyncStage, event: &ProgressEvent| {
                seen.lock().unwrap().push((stage, event.clone()));
            }
        };

        let sink: Arc<dyn ProgressSink> = Arc::new(sink);
        sink.report(SyncStage::SchemaReading, &ProgressEvent::DatabaseEnsured);
        NoopProgress.report(SyncStage::SchemaReading, &ProgressEvent::DatabaseEnsured);

        assert_eq!(
            *seen.lock().unwrap(),
            vec![(SyncStage::SchemaReading, ProgressEvent::DatabaseEnsured)]
        );
    }
}
