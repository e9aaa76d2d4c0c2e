//! Domain-specific error types for the flood pipeline.
//!
//! All fallible operations return `Result<T, FlutError>`.
//! Per-chunk transmission failures are carried as [`ChunkError`] inside
//! the drain report so one broken chunk never takes its siblings down.

use std::time::Duration;
use thiserror::Error;

use crate::task::DrainReport;

/// The canonical error type for flut.
#[derive(Debug, Error)]
pub enum FlutError {
    // ── Configuration Errors ─────────────────────────────────────
    /// A `<width>:<height>` style pair could not be parsed.
    #[error("invalid dimensions {0:?}: expected <width>:<height> with both > 0")]
    InvalidDimensions(String),

    /// The image cannot be split into the requested number of row bands.
    #[error("invalid chunk count {count} for image height {height}")]
    InvalidChunkCount { count: usize, height: u32 },

    /// Pixel data length does not match `width * height * 4`.
    #[error("pixel buffer size mismatch: expected {expected} bytes, got {actual}")]
    BufferSizeMismatch { expected: usize, actual: usize },

    /// Any other rejected option (zero threads, zero queue, ...).
    #[error("configuration error: {0}")]
    Config(String),

    // ── Resource Acquisition Errors ──────────────────────────────
    /// The source image could not be decoded or resized.
    #[error("could not load image {path}: {reason}")]
    ImageLoad { path: String, reason: String },

    /// Connecting to the canvas server failed.
    #[error("could not connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    // ── Transmission Errors ──────────────────────────────────────
    /// The remote side closed the connection; no further writes possible.
    #[error("connection closed")]
    ConnectionClosed,

    /// A write kept failing transiently until the retry budget ran out.
    #[error("write failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: std::io::Error,
    },

    /// A single write attempt exceeded its deadline.
    #[error("write timed out after {0:?}")]
    Timeout(Duration),

    /// The TCP/IO layer reported an error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    // ── Pool Errors ──────────────────────────────────────────────
    /// A task was submitted after the pool stopped accepting work.
    #[error("worker pool is closed")]
    PoolClosed,

    /// The task queue is at capacity and the rejecting policy is active.
    #[error("task queue full (capacity {capacity})")]
    QueueFull { capacity: usize },

    /// A blocked submission gave up because the run was cancelled.
    #[error("submission interrupted by cancellation")]
    SubmitCancelled,

    /// A pool state transition was attempted from the wrong state.
    #[error("invalid pool transition: {0}")]
    InvalidTransition(&'static str),

    /// The run was cancelled before every chunk was drained.
    #[error("cancelled after {} of {} chunks", .report.completed, .report.total())]
    Cancelled { report: DrainReport },

    /// Some chunks could not be delivered completely.
    #[error("{} of {} chunks failed", .report.failed, .report.total())]
    PartialCompletion { report: DrainReport },

    // ── Protocol Errors ──────────────────────────────────────────
    /// A line received on the wire is not a valid `PX` command.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl FlutError {
    /// Whether the error happened before any pixel was sent.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::InvalidDimensions(_)
                | Self::InvalidChunkCount { .. }
                | Self::BufferSizeMismatch { .. }
                | Self::Config(_)
        )
    }

    /// The drain report attached to a cancelled or partial run, if any.
    pub fn report(&self) -> Option<&DrainReport> {
        match self {
            Self::Cancelled { report } | Self::PartialCompletion { report } => Some(report),
            _ => None,
        }
    }
}

// ── ChunkError ────────────────────────────────────────────────────

/// Typed error for a single chunk task.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChunkError {
    /// The chunk was interrupted by the cancellation token.
    #[error("chunk was cancelled")]
    Cancelled,

    /// The connection the chunk writes to is gone.
    #[error("connection closed")]
    ConnectionClosed,

    /// Any other write failure, rendered for reporting.
    #[error("chunk failed: {0}")]
    Failed(String),
}

impl From<FlutError> for ChunkError {
    fn from(e: FlutError) -> Self {
        match e {
            FlutError::ConnectionClosed => ChunkError::ConnectionClosed,
            other => ChunkError::Failed(other.to_string()),
        }
    }
}

// ── Convenient From implementations ──────────────────────────────

impl From<std::num::ParseIntError> for FlutError {
    fn from(e: std::num::ParseIntError) -> Self {
        FlutError::Protocol(e.to_string())
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for FlutError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        FlutError::ConnectionClosed
    }
}
