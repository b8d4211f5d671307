//! Common types, protocol definitions, and errors shared across `service-seed` crates.

pub mod error;
pub mod protocol;

pub use error::ServiceError;
