//! Orchestrator configuration.
//!
//! Options can be built in code or loaded from TOML:
//!
//! ```toml
//! [options]
//! scope_info_table_name = "scope_info"
//! scope_name = "mobile"
//!
//! [[setup.tables]]
//! name = "customer"
//!
//! [[setup.tables]]
//! name = "orders"
//! filter = "region = 'EU'"
//! ```

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};
use syncscope_store::SyncSetup;
use thiserror::Error;

/// Default name of the scope table.
pub const DEFAULT_SCOPE_INFO_TABLE: &str = "scope_info";

/// Default scope name.
pub const DEFAULT_SCOPE_NAME: &str = "DefaultScope";

/// Names the orchestrator works under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncOptions {
    /// Base name of the scope table. Server scopes use `<name>_server`.
    pub scope_info_table_name: String,
    /// Scope this orchestrator reads, creates and upgrades.
    pub scope_name: String,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            scope_info_table_name: DEFAULT_SCOPE_INFO_TABLE.to_string(),
            scope_name: DEFAULT_SCOPE_NAME.to_string(),
        }
    }
}

impl SyncOptions {
    /// Set the scope table name.
    pub fn scope_info_table_name(mut self, name: &str) -> Self {
        self.scope_info_table_name = name.to_string();
        self
    }

    /// Set the scope name.
    pub fn scope_name(mut self, name: &str) -> Self {
        self.scope_name = name.to_string();
        self
    }
}

/// Options plus the optional setup, as read from a config file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default)]
    pub options: SyncOptions,
    /// Tables to synchronize. Without one, upgrades are no-ops.
    #[serde(default)]
    pub setup: Option<SyncSetup>,
}

/// Error loading or validating a [`SyncConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {}", .0.join("; "))]
    Invalid(Vec<String>),
}

impl SyncConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Check names and filters, reporting every problem at once.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        if self.options.scope_info_table_name.trim().is_empty() {
            errors.push("options.scope_info_table_name must not be empty".to_string());
        }
        if self.options.scope_name.trim().is_empty() {
            errors.push("options.scope_name must not be empty".to_string());
        }

        if let Some(setup) = &self.setup {
            let mut seen = HashSet::new();
            for table in &setup.tables {
                if table.name.trim().is_empty() {
                    errors.push("setup.tables: table name must not be empty".to_string());
                    continue;
                }
                if !seen.insert(table.name.to_ascii_lowercase()) {
                    errors.push(format!("setup.tables: duplicate table '{}'", table.name));
                }
                if matches!(&table.filter, Some(f) if f.trim().is_empty()) {
                    errors.push(format!(
                        "setup.tables.{}: filter must not be empty",
                        table.name
                    ));
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(errors))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_to_missing_sections() {
        let config = SyncConfig::from_toml_str("").unwrap();
        assert_eq!(config.options, SyncOptions::default());
        assert_eq!(config.options.scope_name, "DefaultScope");
        assert!(config.setup.is_none());
    }

    #[test]
    fn parse_setup_with_filters() {
        let config = SyncConfig::from_toml_str(
            r#"
[options]
scope_name = "mobile"

[[setup.tables]]
name = "customer"

[[setup.tables]]
name = "orders"
filter = "region = 'EU'"
"#,
        )
        .unwrap();
        assert_eq!(config.options.scope_info_table_name, "scope_info");
        assert_eq!(config.options.scope_name, "mobile");
        let setup = config.setup.unwrap();
        assert_eq!(setup.tables.len(), 2);
        assert_eq!(setup.tables[1].filter.as_deref(), Some("region = 'EU'"));
    }

    #[test]
    fn validation_collects_every_problem() {
        let setup = SyncSetup::new(["orders", "ORDERS", ""]).with_filter("orders", "");
        let config = SyncConfig {
            options: SyncOptions::default().scope_name(" "),
            setup: Some(setup),
        };
        match config.validate() {
            Err(ConfigError::Invalid(errors)) => assert_eq!(errors.len(), 4),
            other => panic!("expected invalid config, got {other:?}"),
        }
    }

    #[test]
    fn parse_errors_are_reported() {
        assert!(matches!(
            SyncConfig::from_toml_str("[options\n"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn from_path_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sync.toml");
        std::fs::write(&path, "[options]\nscope_info_table_name = \"meta\"\n").unwrap();
        let config = SyncConfig::from_path(&path).unwrap();
        assert_eq!(config.options.scope_info_table_name, "meta");
        assert!(matches!(
            SyncConfig::from_path(dir.path().join("missing.toml")),
            Err(ConfigError::Io(_))
        ));
    }
}
