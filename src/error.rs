//! Error types for the Xyston library.
//!
//! All fallible operations return [`Result`], whose error side is the
//! [`XystonError`] enum. I/O failures from decoders, encoders, and index
//! sessions are surfaced unchanged; a merge that fails mid-way leaves a
//! partial output segment the caller must discard.

use std::io;

use anyhow;
use thiserror::Error;

/// The main error type for Xyston operations.
#[derive(Error, Debug)]
pub enum XystonError {
    /// I/O errors (reading postings, writing the output segment).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Index structure errors (term dictionary misuse, writer misuse).
    #[error("Index error: {0}")]
    Index(String),

    /// Postings encoding/decoding errors.
    #[error("Codec error: {0}")]
    Codec(String),

    /// Merge coordination errors.
    #[error("Merge error: {0}")]
    Merge(String),

    /// JSON serialization/deserialization errors.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic anyhow error.
    #[error("Anyhow error: {0}")]
    Anyhow(#[from] anyhow::Error),

    /// Generic error for other cases.
    #[error("Error: {0}")]
    Other(String),
}

/// Result type alias for operations that may fail with XystonError.
pub type Result<T> = std::result::Result<T, XystonError>;

impl XystonError {
    /// Create a new index error.
    pub fn index<S: Into<String>>(msg: S) -> Self {
        XystonError::Index(msg.into())
    }

    /// Create a new codec error.
    pub fn codec<S: Into<String>>(msg: S) -> Self {
        XystonError::Codec(msg.into())
    }

    /// Create a new merge error.
    pub fn merge<S: Into<String>>(msg: S) -> Self {
        XystonError::Merge(msg.into())
    }

    /// Create a new generic error.
    pub fn other<S: Into<String>>(msg: S) -> Self {
        XystonError::Other(msg.into())
    }

    /// Create a new invalid argument error.
    pub fn invalid_argument<S: Into<String>>(msg: S) -> Self {
        XystonError::Other(format!("Invalid argument: {}", msg.into()))
    }
}
