//! Application identity — name plus semantic version.

use std::fmt;

use semver::Version;
use serde::{Deserialize, Serialize};

/// Identity of one versioned application.
///
/// A value type: equality, hashing, and ordering are by (name, version).
/// Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ApplicationIdentity {
    name: String,
    version: Version,
}

impl ApplicationIdentity {
    /// Create an identity from a name and a parsed semantic version.
    pub fn new(name: impl Into<String>, version: Version) -> Self {
        Self {
            name: name.into(),
            version,
        }
    }

    /// The application name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The application version.
    pub fn version(&self) -> &Version {
        &self.version
    }
}

impl fmt::Display for ApplicationIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.version)
    }
}
