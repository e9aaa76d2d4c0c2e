//! Run sequencing: partition → open connections → pool → submit → drain → close.
//!
//! The orchestrator is plain control logic; every pixel is encoded and
//! written by pool workers.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::chunk::{Chunk, partition};
use crate::codec::DEFAULT_BATCH_SIZE;
use crate::error::FlutError;
use crate::network::{ConnectionChannel, ConnectionInfo, PixelSink, WriteOptions};
use crate::pixels::{Offset, PixelBuffer};
use crate::task::{ChunkTask, DrainMode, DrainReport, WorkerPool};

// ── OverflowPolicy ───────────────────────────────────────────────

/// What `submit` does when the task queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverflowPolicy {
    /// Wait until a worker frees a slot.
    #[default]
    Block,
    /// Fail the run with `QueueFull`.
    Reject,
}

// ── FloodOptions ─────────────────────────────────────────────────

/// Everything a run needs besides the pixels.
#[derive(Debug, Clone)]
pub struct FloodOptions {
    pub server: ConnectionInfo,
    /// Worker count.
    pub threads: usize,
    /// Task queue capacity.
    pub queue_size: usize,
    /// Row bands to split the image into; `None` means one per worker.
    pub chunks: Option<usize>,
    /// Canvas connections; chunk `i` writes through connection `i % n`.
    pub connections: usize,
    /// Flush threshold for encoded batches, in bytes.
    pub batch_size: usize,
    pub overflow: OverflowPolicy,
    pub offset: Offset,
    pub write: WriteOptions,
}

impl FloodOptions {
    pub fn new(server: ConnectionInfo) -> Self {
        Self {
            server,
            threads: 4,
            queue_size: 256,
            chunks: None,
            connections: 1,
            batch_size: DEFAULT_BATCH_SIZE,
            overflow: OverflowPolicy::default(),
            offset: Offset::default(),
            write: WriteOptions::default(),
        }
    }

    /// Number of chunks the image is split into.
    pub fn chunk_count(&self) -> usize {
        self.chunks.unwrap_or(self.threads)
    }

    /// Reject values no run can work with.
    pub fn validate(&self) -> Result<(), FlutError> {
        if self.threads == 0 {
            return Err(FlutError::Config("thread count must be > 0".into()));
        }
        if self.queue_size == 0 {
            return Err(FlutError::Config("queue size must be > 0".into()));
        }
        if self.chunk_count() == 0 {
            return Err(FlutError::Config("chunk count must be > 0".into()));
        }
        if self.connections == 0 {
            return Err(FlutError::Config("connection count must be > 0".into()));
        }
        if self.batch_size == 0 {
            return Err(FlutError::Config("batch size must be > 0".into()));
        }
        Ok(())
    }
}

// ── Orchestrator ─────────────────────────────────────────────────

pub struct Orchestrator {
    options: FloodOptions,
    cancel: CancellationToken,
}

impl Orchestrator {
    pub fn new(options: FloodOptions, cancel: CancellationToken) -> Result<Self, FlutError> {
        options.validate()?;
        Ok(Self { options, cancel })
    }

    pub fn options(&self) -> &FloodOptions {
        &self.options
    }

    /// Open the configured connections, stream `buffer` and close them.
    pub async fn flood(&self, buffer: PixelBuffer) -> Result<DrainReport, FlutError> {
        let buffer = Arc::new(buffer);
        let chunks = partition(&buffer, self.options.chunk_count())?;
        log_partition(&buffer, &chunks);

        let connections = self.open_connections().await?;
        let sinks: Vec<Arc<dyn PixelSink>> = connections
            .iter()
            .map(|c| Arc::clone(c) as Arc<dyn PixelSink>)
            .collect();

        let result = self.dispatch(buffer, chunks, &sinks).await;

        drop(sinks);
        let cancelled = self.cancel.is_cancelled();
        for conn in &connections {
            if cancelled {
                conn.abort();
            } else {
                conn.close().await;
            }
        }
        result
    }

    /// Stream `buffer` through already-open sinks.
    pub async fn run(
        &self,
        buffer: Arc<PixelBuffer>,
        sinks: &[Arc<dyn PixelSink>],
    ) -> Result<DrainReport, FlutError> {
        let chunks = partition(&buffer, self.options.chunk_count())?;
        log_partition(&buffer, &chunks);
        self.dispatch(buffer, chunks, sinks).await
    }

    async fn dispatch(
        &self,
        buffer: Arc<PixelBuffer>,
        chunks: Vec<Chunk>,
        sinks: &[Arc<dyn PixelSink>],
    ) -> Result<DrainReport, FlutError> {
        if sinks.is_empty() {
            return Err(FlutError::Config("no connection to write to".into()));
        }
        let offset = self.options.offset;
        // Both dimensions are > 0, so the last pixel sits at (width - 1, height - 1).
        if (buffer.width() - 1).checked_add(offset.x).is_none()
            || (buffer.height() - 1).checked_add(offset.y).is_none()
        {
            return Err(FlutError::Config(format!(
                "offset {}:{} pushes the image past the coordinate range",
                offset.x, offset.y
            )));
        }

        let opts = &self.options;
        let mut pool = WorkerPool::create(opts.threads, opts.queue_size, self.cancel.clone())?;

        let mut interrupted = false;
        for chunk in chunks {
            let task = ChunkTask {
                chunk,
                buffer: Arc::clone(&buffer),
                sink: Arc::clone(&sinks[chunk.index % sinks.len()]),
                offset: opts.offset,
                batch_size: opts.batch_size,
            };
            let submitted = match opts.overflow {
                OverflowPolicy::Block => pool.submit(task).await,
                OverflowPolicy::Reject => pool.try_submit(task),
            };
            match submitted {
                Ok(()) => {}
                Err(FlutError::SubmitCancelled) => {
                    interrupted = true;
                    break;
                }
                Err(e) => {
                    warn!("submission of chunk {} failed: {e}", chunk.index);
                    if let Err(drain_err) = pool.drain(DrainMode::Immediate).await {
                        warn!("drain after failed submission: {drain_err}");
                    }
                    return Err(e);
                }
            }
        }

        let report = pool.drain(DrainMode::Graceful).await?;
        if interrupted {
            return Err(FlutError::Cancelled { report });
        }
        info!(
            "sent {} of {} pixels in {} chunks",
            report.commands_sent,
            buffer.pixel_count(),
            report.completed
        );
        if !report.is_complete() {
            return Err(FlutError::PartialCompletion { report });
        }
        Ok(report)
    }

    async fn open_connections(&self) -> Result<Vec<Arc<ConnectionChannel>>, FlutError> {
        let mut connections = Vec::with_capacity(self.options.connections);
        for _ in 0..self.options.connections {
            match ConnectionChannel::open(&self.options.server, self.options.write.clone()).await {
                Ok(conn) => connections.push(Arc::new(conn)),
                Err(e) => {
                    for conn in &connections {
                        conn.close().await;
                    }
                    return Err(e);
                }
            }
        }
        Ok(connections)
    }
}

fn log_partition(buffer: &PixelBuffer, chunks: &[Chunk]) {
    info!(
        "image {}x{} ({} pixels) split into {} chunks of ~{} rows",
        buffer.width(),
        buffer.height(),
        buffer.pixel_count(),
        chunks.len(),
        chunks.first().map_or(0, Chunk::rows)
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::PixelCommand;
    use crate::pixels::Color;
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::collections::HashSet;
    use std::sync::Mutex;

    /// Counts commands and checks that every write is line-aligned.
    #[derive(Default)]
    struct CountingSink {
        commands: Mutex<Vec<PixelCommand>>,
        writes: Mutex<usize>,
    }

    #[async_trait]
    impl PixelSink for CountingSink {
        async fn write(&self, payload: Bytes) -> Result<(), FlutError> {
            let text = std::str::from_utf8(&payload).expect("payload is ascii");
            assert!(text.ends_with('\n'), "write not line-aligned: {text:?}");
            let parsed: Vec<_> = text
                .lines()
                .map(|line| PixelCommand::parse(line).expect("complete PX line"))
                .collect();
            // Give other workers a chance to interleave between writes.
            tokio::task::yield_now().await;
            self.commands.lock().unwrap().extend(parsed);
            *self.writes.lock().unwrap() += 1;
            Ok(())
        }
    }

    fn options(threads: usize, queue: usize, chunks: usize) -> FloodOptions {
        FloodOptions {
            threads,
            queue_size: queue,
            chunks: Some(chunks),
            batch_size: 64,
            ..FloodOptions::new(ConnectionInfo::new("127.0.0.1", 1234))
        }
    }

    fn gradient(width: u32, height: u32) -> Arc<PixelBuffer> {
        let mut data = Vec::new();
        for y in 0..height {
            for x in 0..width {
                data.extend_from_slice(&[x as u8, y as u8, (x ^ y) as u8, 0xff]);
            }
        }
        Arc::new(PixelBuffer::from_rgba(width, height, data).unwrap())
    }

    #[tokio::test]
    async fn four_by_four_two_chunks_single_worker() {
        let sink = Arc::new(CountingSink::default());
        let sinks: Vec<Arc<dyn PixelSink>> = vec![sink.clone()];
        let orch = Orchestrator::new(options(1, 1, 2), CancellationToken::new()).unwrap();

        let report = orch.run(gradient(4, 4), &sinks).await.unwrap();
        assert_eq!(report.commands_sent, 16);
        assert_eq!(report.chunks[0].rows, (0, 2));
        assert_eq!(report.chunks[1].rows, (2, 4));

        let commands = sink.commands.lock().unwrap();
        assert_eq!(commands.len(), 16);
        for y in 0..4 {
            let xs: HashSet<_> = commands.iter().filter(|c| c.y == y).map(|c| c.x).collect();
            assert_eq!(xs, (0..4).collect::<HashSet<_>>());
        }
        // One worker processes chunk 0 before chunk 1, rows in raster order.
        let order: Vec<_> = commands.iter().map(|c| (c.y, c.x)).collect();
        let mut sorted = order.clone();
        sorted.sort();
        assert_eq!(order, sorted);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn every_pixel_exactly_once_with_concurrent_writers() {
        let buffer = gradient(37, 29);
        let sink = Arc::new(CountingSink::default());
        let sinks: Vec<Arc<dyn PixelSink>> = vec![sink.clone()];
        let orch = Orchestrator::new(options(6, 2, 11), CancellationToken::new()).unwrap();

        let report = orch.run(Arc::clone(&buffer), &sinks).await.unwrap();
        assert_eq!(report.commands_sent, 37 * 29);

        let commands = sink.commands.lock().unwrap();
        assert_eq!(commands.len(), 37 * 29);
        let unique: HashSet<_> = commands.iter().map(|c| (c.x, c.y)).collect();
        assert_eq!(unique.len(), 37 * 29);
        for cmd in commands.iter() {
            assert_eq!(buffer.pixel(cmd.x, cmd.y), Some(cmd.color));
        }
        assert!(*sink.writes.lock().unwrap() > 11);
    }

    #[tokio::test]
    async fn chunks_spread_over_connections() {
        let a = Arc::new(CountingSink::default());
        let b = Arc::new(CountingSink::default());
        let sinks: Vec<Arc<dyn PixelSink>> = vec![a.clone(), b.clone()];
        let orch = Orchestrator::new(options(2, 4, 4), CancellationToken::new()).unwrap();

        orch.run(gradient(4, 8), &sinks).await.unwrap();

        let rows_a: HashSet<_> = a.commands.lock().unwrap().iter().map(|c| c.y).collect();
        let rows_b: HashSet<_> = b.commands.lock().unwrap().iter().map(|c| c.y).collect();
        assert_eq!(rows_a, HashSet::from([0, 1, 4, 5]));
        assert_eq!(rows_b, HashSet::from([2, 3, 6, 7]));
    }

    #[tokio::test]
    async fn offset_shifts_canvas_coordinates() {
        let sink = Arc::new(CountingSink::default());
        let sinks: Vec<Arc<dyn PixelSink>> = vec![sink.clone()];
        let opts = FloodOptions {
            offset: Offset { x: 100, y: 200 },
            ..options(1, 1, 1)
        };
        let orch = Orchestrator::new(opts, CancellationToken::new()).unwrap();

        orch.run(gradient(2, 2), &sinks).await.unwrap();
        let commands = sink.commands.lock().unwrap();
        let coords: HashSet<_> = commands.iter().map(|c| (c.x, c.y)).collect();
        assert_eq!(coords, HashSet::from([(100, 200), (101, 200), (100, 201), (101, 201)]));
        assert_eq!(commands[0].color, Color::new(0, 0, 0, 0xff));
    }

    #[tokio::test]
    async fn offset_past_coordinate_range_is_rejected() {
        let sink = Arc::new(CountingSink::default());
        let sinks: Vec<Arc<dyn PixelSink>> = vec![sink.clone()];
        let opts = FloodOptions {
            offset: Offset { x: u32::MAX, y: 0 },
            ..options(1, 1, 1)
        };
        let orch = Orchestrator::new(opts, CancellationToken::new()).unwrap();

        let err = orch.run(gradient(2, 2), &sinks).await.unwrap_err();
        assert!(matches!(err, FlutError::Config(_)));
        assert_eq!(*sink.writes.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn last_pixel_may_land_on_max_coordinate() {
        let sink = Arc::new(CountingSink::default());
        let sinks: Vec<Arc<dyn PixelSink>> = vec![sink.clone()];
        let opts = FloodOptions {
            offset: Offset {
                x: u32::MAX - 1,
                y: u32::MAX - 1,
            },
            ..options(1, 1, 1)
        };
        let orch = Orchestrator::new(opts, CancellationToken::new()).unwrap();

        orch.run(gradient(2, 2), &sinks).await.unwrap();
        let commands = sink.commands.lock().unwrap();
        assert_eq!(commands.len(), 4);
        assert!(commands.iter().any(|c| c.x == u32::MAX && c.y == u32::MAX));
    }

    #[tokio::test]
    async fn too_many_chunks_fails_before_any_work() {
        let sink = Arc::new(CountingSink::default());
        let sinks: Vec<Arc<dyn PixelSink>> = vec![sink.clone()];
        let orch = Orchestrator::new(options(2, 2, 5), CancellationToken::new()).unwrap();

        let err = orch.run(gradient(4, 4), &sinks).await.unwrap_err();
        assert!(err.is_configuration());
        assert_eq!(*sink.writes.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn pre_cancelled_run_reports_cancelled() {
        let sink = Arc::new(CountingSink::default());
        let sinks: Vec<Arc<dyn PixelSink>> = vec![sink];
        let cancel = CancellationToken::new();
        cancel.cancel();
        let orch = Orchestrator::new(options(2, 1, 4), cancel).unwrap();

        let err = orch.run(gradient(4, 4), &sinks).await.unwrap_err();
        assert!(matches!(err, FlutError::Cancelled { .. }), "got {err}");
    }

    #[test]
    fn validate_rejects_zero_values() {
        let base = FloodOptions::new(ConnectionInfo::new("localhost", 1234));
        assert!(base.validate().is_ok());
        assert_eq!(base.chunk_count(), 4);
        for opts in [
            FloodOptions {
                threads: 0,
                ..base.clone()
            },
            FloodOptions {
                queue_size: 0,
                ..base.clone()
            },
            FloodOptions {
                chunks: Some(0),
                ..base.clone()
            },
            FloodOptions {
                connections: 0,
                ..base.clone()
            },
            FloodOptions {
                batch_size: 0,
                ..base.clone()
            },
        ] {
            assert!(opts.validate().unwrap_err().is_configuration());
        }
    }
}
