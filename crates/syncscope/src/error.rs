use core::fmt;

use syncscope_migrate::VersionError;
use syncscope_store::StoreError;
use thiserror::Error;

/// The phase a failure or progress event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncStage {
    /// Reading the scope table.
    ScopeLoading,
    /// Creating or writing the scope table.
    ScopeWriting,
    /// Ensuring the database and reading its schema.
    SchemaReading,
    /// Dropping and recreating per-table artifacts.
    Provisioning,
    /// Running the upgrade ladder.
    Upgrading,
}

impl fmt::Display for SyncStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ScopeLoading => "scope_loading",
            Self::ScopeWriting => "scope_writing",
            Self::SchemaReading => "schema_reading",
            Self::Provisioning => "provisioning",
            Self::Upgrading => "upgrading",
        };
        f.write_str(name)
    }
}

/// Error returned by every orchestrated operation.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The setup names tables, but none of them exist in the database.
    #[error("none of the setup tables exist in the database")]
    MissingTables,

    /// The scope table or the scope row is absent where one is required.
    #[error("client scope info for '{scope}' is missing")]
    MissingClientScopeInfo { scope: String },

    /// The caller cancelled the operation.
    #[error("operation cancelled during {stage}")]
    Cancelled { stage: SyncStage },

    /// A backend call failed.
    #[error("storage failure during {stage}")]
    Storage {
        stage: SyncStage,
        #[source]
        source: StoreError,
    },

    /// The recorded scope version could not be parsed.
    #[error("scope '{scope}' records an invalid version")]
    InvalidVersion {
        scope: String,
        #[source]
        source: VersionError,
    },

    /// The schema's foreign keys form a cycle through `table`.
    #[error("cyclic relation through table '{table}'")]
    CyclicRelation { table: String },
}

impl SyncError {
    /// Wrap backend errors raised during `stage`, for use with `map_err`.
    pub fn storage(stage: SyncStage) -> impl Fn(StoreError) -> SyncError {
        move |source| SyncError::Storage { stage, source }
    }

    /// The stage a cancellation or storage failure happened in.
    pub fn stage(&self) -> Option<SyncStage> {
        match self {
            Self::Cancelled { stage } | Self::Storage { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}
