//! Common error types shared across crates.

use thiserror::Error;

use crate::protocol::ErrorResponse;

/// Top-level service error type.
///
/// Variants map to HTTP status codes returned to callers:
/// - [`ServiceError::NotSupported`] → 400
/// - [`ServiceError::NotFound`] → 404
/// - [`ServiceError::MethodNotAllowed`] → 405
/// - [`ServiceError::Internal`] → 500
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The request needs a capability the connection does not offer.
    #[error("not supported: {0}")]
    NotSupported(String),

    /// No route matches the requested path.
    #[error("not found: {0}")]
    NotFound(String),

    /// The route exists but does not accept the request method.
    #[error("Invalid request method")]
    MethodNotAllowed,

    /// An unexpected internal error occurred, e.g. response encoding failed.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ServiceError {
    /// Returns the HTTP status code that should be sent for this error.
    pub fn http_status(&self) -> u16 {
        match self {
            ServiceError::NotSupported(_) => 400,
            ServiceError::NotFound(_) => 404,
            ServiceError::MethodNotAllowed => 405,
            ServiceError::Internal(_) => 500,
        }
    }

    /// Machine-readable code used in [`ErrorResponse::code`].
    pub fn code(&self) -> &'static str {
        match self {
            ServiceError::NotSupported(_) => "not_supported",
            ServiceError::NotFound(_) => "not_found",
            ServiceError::MethodNotAllowed => "method_not_allowed",
            ServiceError::Internal(_) => "internal_error",
        }
    }

    /// Build the JSON body sent to the caller.
    pub fn to_response(&self) -> ErrorResponse {
        ErrorResponse::new(self.code(), self.to_string())
    }
}
