use core::fmt;
use core::str::FromStr;

use thiserror::Error;

/// A three-part `major.minor.build` version.
///
/// Ordering is lexicographic over `(major, minor, build)`. Recorded scope
/// versions are stored as strings and may come from older clients that wrote
/// only two components, so parsing goes through [`SyncVersion::normalize`].
///
/// # Example
///
/// ```
/// use syncscope_migrate::SyncVersion;
///
/// let recorded = SyncVersion::normalize("0.5").unwrap();
/// assert_eq!(recorded, SyncVersion::new(0, 5, 0));
/// assert!(recorded < SyncVersion::new(0, 6, 2));
/// assert_eq!(recorded.to_string(), "0.5.0");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct SyncVersion {
    /// Major component.
    pub major: u32,
    /// Minor component.
    pub minor: u32,
    /// Build component.
    pub build: u32,
}

/// Error parsing a recorded version string.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VersionError {
    /// More than four dot-separated components.
    #[error("version '{0}' has too many components")]
    TooManyComponents(String),
    /// A component is not an integer.
    #[error("version '{input}' has a non-numeric component '{component}'")]
    InvalidComponent { input: String, component: String },
}

impl SyncVersion {
    /// Create a version from its three components.
    pub const fn new(major: u32, minor: u32, build: u32) -> Self {
        Self {
            major,
            minor,
            build,
        }
    }

    /// Parse a recorded version, filling missing or placeholder components.
    ///
    /// - `""` (never stamped) becomes `0.0.0`.
    /// - Missing components become `0`: `"0.5"` is `0.5.0`.
    /// - Empty or negative components (`"0.6."`, `"0.6.-1"`) become `0`.
    /// - A fourth (revision) component is accepted and dropped.
    pub fn normalize(input: &str) -> Result<Self, VersionError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Ok(Self::default());
        }

        let parts: Vec<&str> = trimmed.split('.').collect();
        if parts.len() > 4 {
            return Err(VersionError::TooManyComponents(input.to_string()));
        }

        let mut components = [0u32; 3];
        for (i, part) in parts.iter().enumerate() {
            let value = Self::component(input, part)?;
            if i < 3 {
                components[i] = value;
            }
        }

        Ok(Self::new(components[0], components[1], components[2]))
    }

    fn component(input: &str, part: &str) -> Result<u32, VersionError> {
        let part = part.trim();
        if part.is_empty() {
            return Ok(0);
        }
        let invalid = || VersionError::InvalidComponent {
            input: input.to_string(),
            component: part.to_string(),
        };
        let value: i64 = part.parse().map_err(|_| invalid())?;
        if value < 0 {
            return Ok(0);
        }
        u32::try_from(value).map_err(|_| invalid())
    }
}

impl fmt::Display for SyncVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.build)
    }
}

impl FromStr for SyncVersion {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::normalize(s)
    }
}
