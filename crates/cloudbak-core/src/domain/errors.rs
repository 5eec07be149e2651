//! Domain error types
//!
//! Errors raised while interpreting stored values and configuration as
//! domain types.

use thiserror::Error;

/// Errors that can occur in domain operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Unknown value in an entry's `type` column
    #[error("Invalid entry type: {0}")]
    InvalidEntryType(String),

    /// A size or timestamp column held a negative or non-numeric value
    #[error("Invalid numeric value for {field}: {value}")]
    InvalidNumber {
        /// Column or setting name
        field: String,
        /// The offending raw value
        value: String,
    },

    /// Path is not under any configured source
    #[error("Path not within any source: {0}")]
    PathNotInSource(String),

    /// Generic validation failure
    #[error("Validation failed: {0}")]
    ValidationFailed(String),
}
