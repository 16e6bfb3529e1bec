//! Compound version token for diagnostics.

use std::fmt;
use std::str::FromStr;

/// Version of a document's diagnostics: the document content version paired
/// with the global configuration version.
///
/// Tokens are only partially ordered. `a` covers `b` when both components of
/// `a` are at least those of `b`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DiagnosticVersion {
    /// Bumped on every edit or disk change of the document.
    pub content: u32,
    /// Bumped whenever a validation-affecting setting changes.
    pub configuration: u32,
}

impl DiagnosticVersion {
    /// Create a version token.
    pub const fn new(content: u32, configuration: u32) -> Self {
        Self {
            content,
            configuration,
        }
    }

    /// Whether a result computed at `self` may be served for `other`.
    pub const fn covers(&self, other: &Self) -> bool {
        self.content >= other.content && self.configuration >= other.configuration
    }
}

/// Rendered as `content:configuration`, used as the pull-diagnostics result id.
impl fmt::Display for DiagnosticVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.content, self.configuration)
    }
}

/// Error parsing a [`DiagnosticVersion`] from its display form.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid diagnostic version: {0:?}")]
pub struct ParseVersionError(String);

impl FromStr for DiagnosticVersion {
    type Err = ParseVersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ParseVersionError(s.to_string());
        let (content, configuration) = s.split_once(':').ok_or_else(invalid)?;
        Ok(Self {
            content: content.parse().map_err(|_| invalid())?,
            configuration: configuration.parse().map_err(|_| invalid())?,
        })
    }
}
