//! Chunk tasks and the worker pool that runs them.

use std::sync::Arc;

use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::chunk::Chunk;
use crate::codec::{Batch, BatchEncoder};
use crate::error::{ChunkError, FlutError};
use crate::network::PixelSink;
use crate::pixels::{Offset, PixelBuffer};
use crate::state::PoolState;

type TaskQueue = Arc<Mutex<mpsc::Receiver<ChunkTask>>>;
type TaskEventSender = mpsc::UnboundedSender<TaskEvent>;

/// Sent by a worker for every task it finishes.
#[derive(Debug)]
pub enum TaskEvent {
    Finished(ChunkReport),
    Error(ChunkReport),
}

// ── ChunkTask ────────────────────────────────────────────────────

/// One chunk plus everything a worker needs to stream it.
#[derive(Clone)]
pub struct ChunkTask {
    pub chunk: Chunk,
    pub buffer: Arc<PixelBuffer>,
    pub sink: Arc<dyn PixelSink>,
    pub offset: Offset,
    pub batch_size: usize,
}

impl ChunkTask {
    /// Encode every pixel of the chunk and hand the batches to the sink.
    ///
    /// Cancellation is observed between batches; a batch already handed
    /// to the sink is written whole by the connection.
    pub async fn run(&self, cancel: &CancellationToken) -> ChunkReport {
        let mut encoder = BatchEncoder::new(self.batch_size);
        let mut sent = 0;

        let mut outcome = Ok(());
        for cmd in self.chunk.commands(&self.buffer, self.offset) {
            if let Some(batch) = encoder.push(&cmd) {
                match self.send(batch, cancel).await {
                    Ok(n) => sent += n,
                    Err(e) => {
                        outcome = Err(e);
                        break;
                    }
                }
            }
        }
        if outcome.is_ok() {
            if let Some(batch) = encoder.finish() {
                match self.send(batch, cancel).await {
                    Ok(n) => sent += n,
                    Err(e) => outcome = Err(e),
                }
            }
        }

        ChunkReport {
            index: self.chunk.index,
            rows: (self.chunk.row_start, self.chunk.row_end),
            commands_sent: sent,
            outcome,
        }
    }

    async fn send(&self, batch: Batch, cancel: &CancellationToken) -> Result<usize, ChunkError> {
        if cancel.is_cancelled() {
            return Err(ChunkError::Cancelled);
        }
        tokio::select! {
            result = self.sink.write(batch.payload) => {
                result.map(|()| batch.commands).map_err(ChunkError::from)
            }
            _ = cancel.cancelled() => Err(ChunkError::Cancelled),
        }
    }
}

impl std::fmt::Debug for ChunkTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkTask")
            .field("chunk", &self.chunk)
            .field("offset", &self.offset)
            .field("batch_size", &self.batch_size)
            .finish()
    }
}

// ── Reports ──────────────────────────────────────────────────────

/// What happened to one chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkReport {
    pub index: usize,
    pub rows: (u32, u32),
    pub commands_sent: usize,
    pub outcome: Result<(), ChunkError>,
}

/// Summary returned by [`WorkerPool::drain`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub submitted: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    /// Queued tasks dropped by an immediate drain or a cancellation.
    pub discarded: usize,
    pub commands_sent: usize,
    /// Per-chunk reports sorted by chunk index.
    pub chunks: Vec<ChunkReport>,
}

impl DrainReport {
    /// Number of chunks handed to the pool.
    pub fn total(&self) -> usize {
        self.submitted
    }

    /// Whether every submitted chunk was delivered completely.
    pub fn is_complete(&self) -> bool {
        self.completed == self.submitted
    }

    fn record(&mut self, report: ChunkReport) {
        self.commands_sent += report.commands_sent;
        match &report.outcome {
            Ok(()) => self.completed += 1,
            Err(ChunkError::Cancelled) => self.cancelled += 1,
            Err(_) => self.failed += 1,
        }
        self.chunks.push(report);
    }
}

// ── DrainMode ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainMode {
    /// Wait for every queued and in-flight task.
    Graceful,
    /// Let in-flight tasks finish, discard anything still queued.
    Immediate,
}

// ── WorkerPool ───────────────────────────────────────────────────

/// Fixed set of workers consuming a bounded chunk queue.
pub struct WorkerPool {
    state: PoolState,
    capacity: usize,
    tx: Option<mpsc::Sender<ChunkTask>>,
    queue: TaskQueue,
    workers: Vec<JoinHandle<()>>,
    events_rx: mpsc::UnboundedReceiver<TaskEvent>,
    /// Aborts in-flight chunks and stops dequeuing.
    cancel: CancellationToken,
    /// Stops dequeuing only; child of `cancel`.
    halt: CancellationToken,
    submitted: usize,
}

impl WorkerPool {
    /// Spawn `worker_count` workers behind a queue of `capacity` tasks.
    pub fn create(
        worker_count: usize,
        capacity: usize,
        cancel: CancellationToken,
    ) -> Result<Self, FlutError> {
        if worker_count == 0 {
            return Err(FlutError::Config("worker count must be > 0".into()));
        }
        if capacity == 0 {
            return Err(FlutError::Config("queue capacity must be > 0".into()));
        }

        let (tx, rx) = mpsc::channel(capacity);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let queue: TaskQueue = Arc::new(Mutex::new(rx));
        let halt = cancel.child_token();

        let mut state = PoolState::Idle;
        state.start()?;
        let workers = (0..worker_count)
            .map(|id| {
                tokio::spawn(worker_loop(
                    id,
                    Arc::clone(&queue),
                    events_tx.clone(),
                    cancel.clone(),
                    halt.clone(),
                ))
            })
            .collect();
        info!("worker pool started: {worker_count} workers, queue capacity {capacity}");

        Ok(Self {
            state,
            capacity,
            tx: Some(tx),
            queue,
            workers,
            events_rx,
            cancel,
            halt,
            submitted: 0,
        })
    }

    /// Enqueue a task, waiting for space when the queue is full.
    pub async fn submit(&mut self, task: ChunkTask) -> Result<(), FlutError> {
        let tx = self.sender()?;
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(FlutError::SubmitCancelled),
            result = tx.send(task) => result.map_err(|_| FlutError::PoolClosed)?,
        }
        self.submitted += 1;
        Ok(())
    }

    /// Enqueue a task, failing immediately when the queue is full.
    pub fn try_submit(&mut self, task: ChunkTask) -> Result<(), FlutError> {
        let tx = self.sender()?;
        tx.try_send(task).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => FlutError::QueueFull {
                capacity: self.capacity,
            },
            mpsc::error::TrySendError::Closed(_) => FlutError::PoolClosed,
        })?;
        self.submitted += 1;
        Ok(())
    }

    /// Stop accepting tasks, join every worker and report.
    ///
    /// Returns `Cancelled` (with the partial report) when the pool's
    /// cancellation token fired before everything was drained.
    pub async fn drain(&mut self, mode: DrainMode) -> Result<DrainReport, FlutError> {
        self.state.begin_drain()?;
        debug!("draining worker pool ({mode:?})");

        drop(self.tx.take());
        if mode == DrainMode::Immediate {
            self.halt.cancel();
        }

        for result in futures::future::join_all(self.workers.drain(..)).await {
            if let Err(e) = result {
                error!("worker terminated abnormally: {e}");
            }
        }

        let mut discarded = 0;
        {
            let mut rx = self.queue.lock().await;
            rx.close();
            while rx.try_recv().is_ok() {
                discarded += 1;
            }
        }

        let mut report = DrainReport {
            submitted: self.submitted,
            discarded,
            ..DrainReport::default()
        };
        while let Ok(event) = self.events_rx.try_recv() {
            match event {
                TaskEvent::Finished(chunk) | TaskEvent::Error(chunk) => report.record(chunk),
            }
        }
        report.chunks.sort_by_key(|c| c.index);

        self.state.terminate()?;
        info!(
            "worker pool drained: {} completed, {} failed, {} cancelled, {} discarded",
            report.completed, report.failed, report.cancelled, report.discarded
        );

        if self.cancel.is_cancelled() && !report.is_complete() {
            return Err(FlutError::Cancelled { report });
        }
        Ok(report)
    }

    pub fn state(&self) -> PoolState {
        self.state
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Tasks waiting in the queue.
    pub fn queued(&self) -> usize {
        self.tx
            .as_ref()
            .map_or(0, |tx| self.capacity - tx.capacity())
    }

    fn sender(&self) -> Result<mpsc::Sender<ChunkTask>, FlutError> {
        if !self.state.accepts_tasks() {
            return Err(FlutError::PoolClosed);
        }
        self.tx.clone().ok_or(FlutError::PoolClosed)
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        if !self.workers.is_empty() {
            warn!("worker pool dropped without drain; aborting workers");
            for worker in &self.workers {
                worker.abort();
            }
        }
    }
}

async fn worker_loop(
    id: usize,
    queue: TaskQueue,
    events: TaskEventSender,
    cancel: CancellationToken,
    halt: CancellationToken,
) {
    loop {
        let task = {
            let mut rx = queue.lock().await;
            tokio::select! {
                biased;
                _ = halt.cancelled() => None,
                task = rx.recv() => task,
            }
        };
        let Some(task) = task else { break };

        debug!(
            worker = id,
            chunk = task.chunk.index,
            "streaming rows {}..{}",
            task.chunk.row_start,
            task.chunk.row_end
        );
        let report = task.run(&cancel).await;

        let event = match &report.outcome {
            Ok(()) => {
                debug!(worker = id, chunk = report.index, "sent {} commands", report.commands_sent);
                TaskEvent::Finished(report)
            }
            Err(ChunkError::Cancelled) => TaskEvent::Error(report),
            Err(e) => {
                error!(worker = id, chunk = report.index, "chunk failed: {e}");
                TaskEvent::Error(report)
            }
        };
        if events.send(event).is_err() {
            break;
        }
    }
    debug!(worker = id, "worker stopped");
}
