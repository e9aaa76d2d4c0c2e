use std::fmt;
use std::io;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::FlutError;

/// Upper bound for the exponential retry backoff.
const MAX_BACKOFF: Duration = Duration::from_secs(2);

/// Pending payloads per writer; each worker has at most one in flight.
const WRITE_QUEUE_DEPTH: usize = 64;

// ── PixelSink ────────────────────────────────────────────────────

/// Destination for encoded `PX` payloads.
///
/// Every `write` receives a whole number of lines and must put them on
/// the wire without interleaving bytes from any other `write`.
#[async_trait]
pub trait PixelSink: Send + Sync {
    async fn write(&self, payload: Bytes) -> Result<(), FlutError>;
}

// ── WriteOptions ─────────────────────────────────────────────────

/// Tuning for the per-connection writer.
#[derive(Debug, Clone)]
pub struct WriteOptions {
    /// Deadline for a single write attempt.
    pub write_timeout: Duration,
    /// Transient failures tolerated in a row before giving up.
    pub max_retries: u32,
    /// First retry delay; doubles per attempt up to two seconds.
    pub retry_backoff: Duration,
    /// Deadline for establishing the TCP connection.
    pub connect_timeout: Duration,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            write_timeout: Duration::from_secs(10),
            max_retries: 5,
            retry_backoff: Duration::from_millis(50),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

// ── ConnectionChannel ────────────────────────────────────────────

struct WriteRequest {
    payload: Bytes,
    done: oneshot::Sender<Result<(), FlutError>>,
}

/// A canvas connection whose writes are serialized end-to-end.
///
/// The socket is owned by a background writer task; `write` hands a
/// complete payload to it and waits for the acknowledgement, so two
/// callers can never interleave bytes on the wire.
pub struct ConnectionChannel {
    peer: String,
    tx: Mutex<Option<mpsc::Sender<WriteRequest>>>,
    writer: Mutex<Option<JoinHandle<()>>>,
    bytes_sent: Arc<AtomicU64>,
}

impl ConnectionChannel {
    /// Spawn the writer task over an already-connected stream.
    pub fn new<W>(io: W, options: WriteOptions, peer: impl Into<String>) -> Self
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let peer = peer.into();
        let (tx, rx) = mpsc::channel(WRITE_QUEUE_DEPTH);
        let bytes_sent = Arc::new(AtomicU64::new(0));

        let writer = tokio::spawn(run_writer(
            io,
            rx,
            options,
            peer.clone(),
            Arc::clone(&bytes_sent),
        ));

        Self {
            peer,
            tx: Mutex::new(Some(tx)),
            writer: Mutex::new(Some(writer)),
            bytes_sent,
        }
    }

    /// Connect to `info` over TCP.
    pub async fn open(info: &ConnectionInfo, options: WriteOptions) -> Result<Self, FlutError> {
        let addr = info.to_string();
        let connect = tokio::time::timeout(options.connect_timeout, TcpStream::connect(&addr));
        let stream = match connect.await {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => return Err(FlutError::Connect { addr, source }),
            Err(_) => {
                return Err(FlutError::Connect {
                    addr,
                    source: io::Error::new(io::ErrorKind::TimedOut, "connect timed out"),
                });
            }
        };
        info!("connected to {addr}");
        Ok(Self::new(stream, options, addr))
    }

    /// Hand one payload to the writer and wait until it is on the wire.
    pub async fn write(&self, payload: Bytes) -> Result<(), FlutError> {
        let tx = self.sender()?;
        let (done, ack) = oneshot::channel();
        tx.send(WriteRequest { payload, done }).await?;
        ack.await.map_err(|_| FlutError::ConnectionClosed)?
    }

    /// Stop accepting writes, flush what is queued and shut the socket down.
    pub async fn close(&self) {
        drop(self.take_sender());
        let writer = self.writer.lock().ok().and_then(|mut w| w.take());
        if let Some(writer) = writer {
            let _ = writer.await;
            info!(
                "connection to {} closed after {} bytes",
                self.peer,
                self.bytes_sent()
            );
        }
    }

    /// Drop the connection without flushing queued payloads.
    pub fn abort(&self) {
        drop(self.take_sender());
        if let Some(writer) = self.writer.lock().ok().and_then(|mut w| w.take()) {
            writer.abort();
            info!(
                "connection to {} aborted after {} bytes",
                self.peer,
                self.bytes_sent()
            );
        }
    }

    /// Total bytes acknowledged by the socket.
    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::Relaxed)
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    fn sender(&self) -> Result<mpsc::Sender<WriteRequest>, FlutError> {
        self.tx
            .lock()
            .ok()
            .and_then(|tx| tx.clone())
            .ok_or(FlutError::ConnectionClosed)
    }

    fn take_sender(&self) -> Option<mpsc::Sender<WriteRequest>> {
        self.tx.lock().ok().and_then(|mut tx| tx.take())
    }
}

#[async_trait]
impl PixelSink for ConnectionChannel {
    async fn write(&self, payload: Bytes) -> Result<(), FlutError> {
        ConnectionChannel::write(self, payload).await
    }
}

impl fmt::Debug for ConnectionChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionChannel")
            .field("peer", &self.peer)
            .field("bytes_sent", &self.bytes_sent())
            .finish()
    }
}

// ── Writer task ──────────────────────────────────────────────────

async fn run_writer<W>(
    mut io: W,
    mut rx: mpsc::Receiver<WriteRequest>,
    options: WriteOptions,
    peer: String,
    bytes_sent: Arc<AtomicU64>,
) where
    W: AsyncWrite + Unpin + Send,
{
    // Once set, the stream is closed or holds a torn line; nothing more
    // may be written to it.
    let mut poisoned = false;

    while let Some(req) = rx.recv().await {
        if poisoned {
            let _ = req.done.send(Err(FlutError::ConnectionClosed));
            continue;
        }

        let result = match write_payload(&mut io, &req.payload, &options).await {
            Ok(()) => {
                bytes_sent.fetch_add(req.payload.len() as u64, Ordering::Relaxed);
                Ok(())
            }
            Err(failure) => {
                if failure.written > 0 || matches!(failure.error, FlutError::ConnectionClosed) {
                    warn!("connection to {peer} unusable: {}", failure.error);
                    poisoned = true;
                }
                bytes_sent.fetch_add(failure.written as u64, Ordering::Relaxed);
                Err(failure.error)
            }
        };
        let _ = req.done.send(result);
    }

    if !poisoned {
        if let Err(e) = io.shutdown().await {
            debug!("shutdown of {peer} failed: {e}");
        }
    }
}

struct WriteFailure {
    error: FlutError,
    written: usize,
}

/// Write all of `payload`, resuming from the exact byte where a
/// transient failure interrupted it.
async fn write_payload<W>(
    io: &mut W,
    payload: &[u8],
    options: &WriteOptions,
) -> Result<(), WriteFailure>
where
    W: AsyncWrite + Unpin,
{
    let mut written = 0;
    let mut attempts = 0u32;
    let mut backoff = options.retry_backoff;

    while written < payload.len() {
        let attempt = tokio::time::timeout(options.write_timeout, io.write(&payload[written..]));
        let transient = match attempt.await {
            Ok(Ok(0)) => {
                return Err(WriteFailure {
                    error: FlutError::ConnectionClosed,
                    written,
                });
            }
            Ok(Ok(n)) => {
                written += n;
                attempts = 0;
                backoff = options.retry_backoff;
                continue;
            }
            Ok(Err(e)) if is_closed(&e) => {
                return Err(WriteFailure {
                    error: FlutError::ConnectionClosed,
                    written,
                });
            }
            Ok(Err(e)) if is_transient(&e) => e,
            Ok(Err(e)) => {
                return Err(WriteFailure {
                    error: FlutError::Io(e),
                    written,
                });
            }
            Err(_) => io::Error::new(
                io::ErrorKind::TimedOut,
                FlutError::Timeout(options.write_timeout),
            ),
        };

        attempts += 1;
        if attempts > options.max_retries {
            return Err(WriteFailure {
                error: FlutError::RetriesExhausted {
                    attempts,
                    source: transient,
                },
                written,
            });
        }
        warn!(
            "transient write error ({transient}), retry {attempts}/{} in {backoff:?}",
            options.max_retries
        );
        tokio::time::sleep(backoff).await;
        backoff = (backoff * 2).min(MAX_BACKOFF);
    }

    io.flush()
        .await
        .map_err(|e| WriteFailure {
            error: if is_closed(&e) {
                FlutError::ConnectionClosed
            } else {
                FlutError::Io(e)
            },
            written,
        })
}

fn is_closed(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
            | io::ErrorKind::UnexpectedEof
            | io::ErrorKind::WriteZero
    )
}

fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
    )
}

// ── ConnectionInfo ───────────────────────────────────────────────

/// Address of a canvas server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    host: String,
    port: u16,
}

impl ConnectionInfo {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for ConnectionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}
