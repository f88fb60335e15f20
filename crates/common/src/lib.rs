//! Types and errors shared between the PII service crates.

pub mod error;
pub mod protocol;

pub use error::ServiceError;
