//! errors.rs - Custom error types for the steplog-core library.
//!
//! `SteplogError` covers configuration, serialization, channel and sink
//! failures surfaced by the streaming pipeline. `SinkError` is what storage
//! adapters return from a batch write.
//!
//! License: MIT OR APACHE 2.0

use std::sync::Arc;
use thiserror::Error;

use steplog_mask::MaskError;

/// This enum represents all possible error types in the `steplog-core` library.
///
/// By using `#[non_exhaustive]`, we signal to consumers of this library that
/// new variants may be added in future versions.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum SteplogError {
    #[error("Missing required configuration field '{0}'")]
    MissingConfig(&'static str),

    #[error("Invalid value for configuration field '{field}': {reason}")]
    InvalidConfig { field: &'static str, reason: String },

    #[error("Sink write failed: {0}")]
    Sink(Arc<SinkError>),

    #[error("Failed to serialize record: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Failed to update masks: {0}")]
    Mask(#[from] MaskError),

    #[error("The {0} channel is closed")]
    ChannelClosed(&'static str),

    #[error("Step '{step}' cannot move from '{from}' to '{to}'")]
    InvalidTransition { step: String, from: String, to: String },

    #[error("An unexpected I/O error occurred: {0}")]
    IoError(#[from] std::io::Error),

    #[error("A critical system error occurred: {0}")]
    AnyhowWrapper(#[from] anyhow::Error),

    #[error("A fatal error occurred: {0}")]
    Fatal(String),
}

/// Errors reported by a sink when a batch cannot be written.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum SinkError {
    #[error("sink '{sink}' rejected the batch: {message}")]
    Rejected { sink: String, message: String },

    #[error("sink I/O failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode batch: {0}")]
    Encode(#[from] serde_json::Error),
}
