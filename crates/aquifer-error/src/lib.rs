//! Shared error taxonomy for the Aquifer query and storage engine.
//!
//! Every fallible operation across `aquifer-core`, `aquifer-stream`,
//! `aquifer-federation`, `aquifer-quorum` and `aquifer-observability`
//! returns [`Result<T>`], a thin alias over [`AquiferError`]. The
//! variant set is closed and mirrors the taxonomy every component is
//! required to surface: callers match on `error_code()` rather than
//! downcasting, the way language bindings would.

#![forbid(unsafe_code)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

use std::fmt;

use serde::{Deserialize, Serialize};

/// Result type alias used throughout the Aquifer workspace.
pub type Result<T> = std::result::Result<T, AquiferError>;

/// The closed set of errors the core can produce.
///
/// # Error Hierarchy
///
/// ```text
/// AquiferError
/// ├── SyntaxError         - C1 lexer/parser
/// ├── ValidationError     - C2 validator (non-SECURITY)
/// ├── SecurityDenied       - C2 validator (SECURITY category)
/// ├── ResourceLimit        - C2 validator (RESOURCE category)
/// ├── OptimizeError        - C3 optimizer
/// ├── SourceUnavailable    - C5 federation dispatch
/// ├── MergeFailed          - C5 federation merge
/// ├── StreamCancelled      - C4 stream operators
/// ├── InsufficientNodes    - C6 quorum store
/// ├── NodeTimeout          - C6 quorum store / node RPC
/// ├── InconsistentRead     - C6 quorum store (non-fatal)
/// └── Internal             - any component, request path or periodic task
/// ```
#[derive(Debug, Clone, thiserror::Error, Serialize, Deserialize)]
pub enum AquiferError {
    /// Lexing or parsing failed; at least one ERROR token or parse
    /// failure was recorded.
    #[error("syntax error at {line}:{column}: {message}")]
    SyntaxError {
        /// Human-readable description of the failure.
        message: String,
        /// 1-based source line.
        line:    usize,
        /// 1-based source column.
        column:  usize,
    },

    /// A validation rule at ERROR level rejected the query.
    #[error("validation error [{category}]: {message}")]
    ValidationError {
        /// Validator category (`SYNTAX`, `SEMANTIC`, `RESOURCE`, ...).
        category: String,
        /// Rule-provided message.
        message:  String,
    },

    /// The SECURITY validation rule rejected the query: the caller's
    /// permission set did not cover the operation's required
    /// permissions.
    #[error("security denied: missing permissions {missing:?}")]
    SecurityDenied {
        /// Permissions the query required but the caller did not hold.
        missing: Vec<String>,
    },

    /// The RESOURCE validation rule rejected the query: a configured
    /// limit (tables/joins/subqueries) was exceeded.
    #[error("resource limit exceeded: {resource} = {actual} > {limit}")]
    ResourceLimit {
        /// Name of the exceeded resource (`tables`, `joins`, `subqueries`).
        resource: String,
        /// Observed count.
        actual:   usize,
        /// Configured limit.
        limit:    usize,
    },

    /// The logical optimizer could not produce a valid plan.
    #[error("optimizer error: {message}")]
    OptimizeError {
        /// Description of the failure.
        message: String,
    },

    /// A federated source was unreachable at dispatch time.
    #[error("source unavailable: {source_id}")]
    SourceUnavailable {
        /// Identifier of the unreachable source.
        source_id: String,
    },

    /// Merging partial results from multiple sources failed.
    #[error("merge failed: {message}")]
    MergeFailed {
        /// Description of the merge failure.
        message: String,
    },

    /// A streaming query was cancelled before completion.
    #[error("stream cancelled: {stream_id}")]
    StreamCancelled {
        /// Identifier of the cancelled stream.
        stream_id: String,
    },

    /// Fewer healthy candidate nodes exist than the configured quorum
    /// requires.
    #[error("insufficient nodes: need {required}, have {available}")]
    InsufficientNodes {
        /// Quorum size required for the operation.
        required:  usize,
        /// Healthy candidate nodes actually available.
        available: usize,
    },

    /// A per-node RPC (ping, get, set) exceeded its timeout.
    #[error("node timeout: {node_id} after {timeout_ms}ms")]
    NodeTimeout {
        /// Identifier of the node that timed out.
        node_id:    String,
        /// Configured timeout that was exceeded.
        timeout_ms: u64,
    },

    /// A quorum read returned a value despite disagreement among
    /// responding nodes. Non-fatal: callers receive the best-effort
    /// majority value alongside this error classification.
    #[error("inconsistent read for key {key}: {node_count} nodes disagreed")]
    InconsistentRead {
        /// Key that was read inconsistently.
        key:        String,
        /// Number of nodes that responded.
        node_count: usize,
    },

    /// Unexpected internal failure. In a periodic task this is logged
    /// and the task continues; in a request path it is returned to
    /// the caller.
    #[error("internal error: {message}")]
    Internal {
        /// Description of the failure.
        message: String,
    },
}

impl AquiferError {
    /// Stable machine-readable error code, drawn from the closed
    /// taxonomy in spec §7.
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::SyntaxError { .. } => "SYNTAX_ERROR",
            Self::ValidationError { .. } => "VALIDATION_ERROR",
            Self::SecurityDenied { .. } => "SECURITY_DENIED",
            Self::ResourceLimit { .. } => "RESOURCE_LIMIT",
            Self::OptimizeError { .. } => "OPTIMIZE_ERROR",
            Self::SourceUnavailable { .. } => "SOURCE_UNAVAILABLE",
            Self::MergeFailed { .. } => "MERGE_FAILED",
            Self::StreamCancelled { .. } => "STREAM_CANCELLED",
            Self::InsufficientNodes { .. } => "INSUFFICIENT_NODES",
            Self::NodeTimeout { .. } => "NODE_TIMEOUT",
            Self::InconsistentRead { .. } => "INCONSISTENT_READ",
            Self::Internal { .. } => "INTERNAL",
        }
    }

    /// Whether a caller may reasonably retry the operation that
    /// produced this error. Per spec §7, only these two classes are
    /// transient; the core itself never retries.
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::NodeTimeout { .. } | Self::SourceUnavailable { .. })
    }

    /// Structured error payload matching the wire format in spec §6:
    /// `{code, message, details{}}`.
    pub fn to_wire(&self) -> WireError {
        WireError {
            code:    self.error_code().to_string(),
            message: self.to_string(),
        }
    }
}

/// Wire-format error representation exposed to callers of the query
/// and quorum services.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireError {
    /// Machine-readable error code from the closed taxonomy.
    pub code:    String,
    /// Human-readable message.
    pub message: String,
}

impl fmt::Display for WireError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_code_matches_taxonomy() {
        let err = AquiferError::InsufficientNodes { required: 2, available: 1 };
        assert_eq!(err.error_code(), "INSUFFICIENT_NODES");
    }

    #[test]
    fn only_timeout_and_unavailable_are_transient() {
        assert!(AquiferError::NodeTimeout { node_id: "n1".into(), timeout_ms: 2000 }.is_transient());
        assert!(AquiferError::SourceUnavailable { source_id: "s1".into() }.is_transient());
        assert!(!AquiferError::Internal { message: "oops".into() }.is_transient());
        assert!(!AquiferError::SecurityDenied { missing: vec![] }.is_transient());
    }

    #[test]
    fn wire_format_carries_code_and_message() {
        let err = AquiferError::SecurityDenied { missing: vec!["DELETE".into()] };
        let wire = err.to_wire();
        assert_eq!(wire.code, "SECURITY_DENIED");
        assert!(wire.message.contains("DELETE"));
    }
}
