//! Unified error handling module
//!
//! Every fallible operation in the crate returns [`PodResult`]. The variants
//! mirror the failure classes the store and replication layers distinguish:
//! validation problems are rejected before any I/O, origin and transport
//! failures are transient, and schema mismatches are fatal for one table.

use std::io;
use thiserror::Error;

/// Main error type for the pod storage and replication core
#[derive(Error, Debug)]
pub enum PodError {
    /// Malformed filter, unknown field, missing required field
    #[error("Validation error: {0}")]
    Validation(String),

    /// Stale or garbage pagination token
    #[error("Cursor not found: {0}")]
    CursorNotFound(String),

    /// Remote node could not be reached
    #[error("Origin {origin} unavailable: {reason}")]
    OriginUnavailable { origin: String, reason: String },

    /// Origin confirmed zero or more than one row for a cached row
    #[error("Origin disagreement for cursor {cursor}: origin confirmed {confirmed} rows")]
    OriginDisagreement { cursor: String, confirmed: usize },

    /// Streaming subscription dropped or could not be opened
    #[error("Transport error: {0}")]
    Transport(String),

    /// Existing column has a type incompatible with the declared field
    #[error("Schema mismatch on {table}.{column}: declared {expected}, found {found}")]
    SchemaMismatch {
        table: String,
        column: String,
        expected: String,
        found: String,
    },

    /// Append rejected by a uniqueness constraint on the cursor
    #[error("Duplicate origin row: {0}")]
    DuplicateOrigin(String),

    /// Unknown member namespace or data class
    #[error("Not found: {0}")]
    NotFound(String),

    /// Constraint violation reported by the relational engine
    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl PodError {
    pub fn validation(msg: impl Into<String>) -> Self {
        PodError::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        PodError::NotFound(msg.into())
    }

    pub fn origin_unavailable(origin: impl Into<String>, reason: impl ToString) -> Self {
        PodError::OriginUnavailable {
            origin: origin.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether the failure is transient and the operation should be retried later
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PodError::OriginUnavailable { .. } | PodError::Transport(_)
        )
    }
}

// Type aliases for convenience
pub type PodResult<T> = Result<T, PodError>;
