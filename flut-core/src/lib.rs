//! # flut-core
//!
//! Core library for flooding an image onto a pixelflut canvas.
//!
//! This crate contains:
//! - **Pixels**: `PixelBuffer`, an immutable row-major RGBA8 image
//! - **Chunk**: `partition`, splitting the image into gapless row bands
//! - **Codec**: `PixelCodec` / `BatchEncoder` for the `PX x y rrggbbaa` wire format
//! - **Network**: `ConnectionChannel`, a TCP connection with serialized writes
//! - **Task**: `WorkerPool`, a bounded queue drained by concurrent workers
//! - **State**: `PoolState`, the pool lifecycle state machine
//! - **Orchestrator**: sequencing of a full run
//! - **Error**: `FlutError` — typed, `thiserror`-based error hierarchy

pub mod chunk;
pub mod codec;
pub mod error;
pub mod network;
pub mod orchestrator;
pub mod pixels;
pub mod state;
pub mod task;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use chunk::{Chunk, partition};
pub use codec::{Batch, BatchEncoder, DEFAULT_BATCH_SIZE, MAX_COMMAND_LEN, PixelCodec, PixelCommand};
pub use error::{ChunkError, FlutError};
pub use network::{ConnectionChannel, ConnectionInfo, PixelSink, WriteOptions};
pub use orchestrator::{FloodOptions, Orchestrator, OverflowPolicy};
pub use pixels::{CHANNELS, Color, Dimensions, Offset, PixelBuffer};
pub use state::PoolState;
pub use task::{ChunkReport, ChunkTask, DrainMode, DrainReport, TaskEvent, WorkerPool};

/// Cancellation handle shared by the orchestrator, pool and workers.
pub use tokio_util::sync::CancellationToken;
