//! Response types served by the HTTP API.
//!
//! These types are serialised as JSON on the public endpoints.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// System status endpoint
// ---------------------------------------------------------------------------

/// Response body for `GET /v1/system/status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemStatusResponse {
    /// Overall service status, `"running"` while the agent serves traffic.
    pub status: String,
    /// Configured data directory.
    pub data_dir: String,
    /// Configured log directory.
    pub log_dir: String,
}

impl SystemStatusResponse {
    /// Status reported by a serving agent.
    pub fn running(data_dir: impl Into<String>, log_dir: impl Into<String>) -> Self {
        Self {
            status: "running".into(),
            data_dir: data_dir.into(),
            log_dir: log_dir.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Error response
// ---------------------------------------------------------------------------

/// Standard error response body returned on any non-2xx status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Short machine-readable error code (e.g. `"method_not_allowed"`).
    pub code: String,
    /// Human-readable description safe to expose to callers.
    pub message: String,
}

impl ErrorResponse {
    /// Construct an [`ErrorResponse`] from a code and message.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}
