//! Error types shared across the Forge.
//!
//! Every component operation returns a typed failure from this taxonomy;
//! nothing crosses a component boundary as a panic. Each error maps to
//! exactly one operator-visible [`ErrorKind`], which the Director and the
//! CLI use to pick outcomes and exit codes.

use thiserror::Error;

/// Forge result type.
pub type Result<T> = std::result::Result<T, ForgeError>;

/// Operator-visible error classification.
///
/// The recovery policy per kind:
/// - `ServerUnavailable` and transient store failures: one local retry.
/// - Everything else surfaces unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Manifest, cluster, or capability server record absent.
    NotFound,
    /// Schema mismatch or malformed manifest.
    InvalidInput,
    /// Identity/lineage/trust rule broken. Never auto-fixed.
    InvariantViolation,
    /// Scoring cannot run because every source is missing.
    InsufficientEvidence,
    /// Capability server cannot reach ready.
    ServerUnavailable,
    /// Deadline exceeded.
    Timeout,
    /// A required validation stage failed.
    ValidationFailed,
    /// Concurrency bound exceeded; caller may retry later.
    Busy,
    /// Task or call was cancelled.
    Cancelled,
    /// Unexpected state; surfaced as an opaque error.
    Internal,
}

impl ErrorKind {
    /// Stable snake_case name used in provenance records and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::InvariantViolation => "invariant_violation",
            ErrorKind::InsufficientEvidence => "insufficient_evidence",
            ErrorKind::ServerUnavailable => "server_unavailable",
            ErrorKind::Timeout => "timeout",
            ErrorKind::ValidationFailed => "validation_failed",
            ErrorKind::Busy => "busy",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that can occur in Forge operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ForgeError {
    /// Tool manifest not found.
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    /// Version not found for a tool.
    #[error("Version {version} not found for tool {tool_id}")]
    VersionNotFound { tool_id: String, version: String },

    /// Cluster not found.
    #[error("Cluster not found: {0}")]
    ClusterNotFound(String),

    /// Invalid manifest contents.
    #[error("Invalid manifest: {0}")]
    InvalidManifest(String),

    /// Invalid input to an operation.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Invalid version expression.
    #[error("Invalid version expression: {0}")]
    InvalidVersion(String),

    /// Manifest identity or lineage rule broken.
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// Scoring has no evidence to work from.
    #[error("Insufficient evidence to score {tool_id} v{version}")]
    InsufficientEvidence { tool_id: String, version: String },

    /// Capability server failed to reach ready.
    #[error("Capability server unavailable: {server}: {reason}")]
    ServerUnavailable { server: String, reason: String },

    /// Deadline exceeded.
    #[error("Operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// A required validation stage failed.
    #[error("Validation failed for {tool_id} v{version}: {failed_stages:?}")]
    ValidationFailed {
        tool_id: String,
        version: String,
        failed_stages: Vec<String>,
    },

    /// Concurrency bound exceeded.
    #[error("Forge is busy: {0} requests queued")]
    Busy(usize),

    /// The task or call was cancelled.
    #[error("Cancelled")]
    Cancelled,

    /// Storage operation failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Unexpected state.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ForgeError {
    /// Map this error to its operator-visible kind.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ForgeError::ToolNotFound(_)
            | ForgeError::VersionNotFound { .. }
            | ForgeError::ClusterNotFound(_) => ErrorKind::NotFound,
            ForgeError::InvalidManifest(_)
            | ForgeError::InvalidInput(_)
            | ForgeError::InvalidVersion(_) => ErrorKind::InvalidInput,
            ForgeError::InvariantViolation(_) => ErrorKind::InvariantViolation,
            ForgeError::InsufficientEvidence { .. } => ErrorKind::InsufficientEvidence,
            ForgeError::ServerUnavailable { .. } => ErrorKind::ServerUnavailable,
            ForgeError::Timeout(_) => ErrorKind::Timeout,
            ForgeError::ValidationFailed { .. } => ErrorKind::ValidationFailed,
            ForgeError::Busy(_) => ErrorKind::Busy,
            ForgeError::Cancelled => ErrorKind::Cancelled,
            ForgeError::Storage(_)
            | ForgeError::Serialization(_)
            | ForgeError::Io(_)
            | ForgeError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Whether a single bounded local retry is permitted for this error.
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            ForgeError::ServerUnavailable { .. } | ForgeError::Storage(_)
        )
    }
}

impl From<serde_json::Error> for ForgeError {
    fn from(err: serde_json::Error) -> Self {
        ForgeError::Serialization(err.to_string())
    }
}

impl From<semver::Error> for ForgeError {
    fn from(err: semver::Error) -> Self {
        ForgeError::InvalidVersion(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_mapping() {
        assert_eq!(
            ForgeError::ToolNotFound("summarize_pdf".into()).kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            ForgeError::InvariantViolation("lineage cycle".into()).kind(),
            ErrorKind::InvariantViolation
        );
        assert_eq!(ForgeError::Busy(32).kind(), ErrorKind::Busy);
        assert_eq!(ForgeError::Cancelled.kind(), ErrorKind::Cancelled);
    }

    #[test]
    fn test_retry_policy() {
        assert!(ForgeError::ServerUnavailable {
            server: "pdf-tools".into(),
            reason: "spawn failed".into()
        }
        .retryable());
        assert!(!ForgeError::Timeout(std::time::Duration::from_secs(5)).retryable());
        assert!(!ForgeError::InvariantViolation("forged origin".into()).retryable());
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(ErrorKind::ServerUnavailable.as_str(), "server_unavailable");
        assert_eq!(ErrorKind::InsufficientEvidence.to_string(), "insufficient_evidence");
    }

    #[test]
    fn test_error_display() {
        let err = ForgeError::VersionNotFound {
            tool_id: "parse_cron".into(),
            version: "2.0.0".into(),
        };
        assert_eq!(err.to_string(), "Version 2.0.0 not found for tool parse_cron");
    }
}
