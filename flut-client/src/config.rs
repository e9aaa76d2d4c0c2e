//! Configuration for the flut client.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use flut_core::{ConnectionInfo, FloodOptions, FlutError, OverflowPolicy, WriteOptions};

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Canvas server and connection tuning.
    pub network: NetworkConfig,
    /// Worker pool sizing.
    pub pool: PoolConfig,
    /// Command batching.
    pub encoder: EncoderConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
}

/// Network configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Canvas server host name or address.
    pub host: String,
    /// Canvas server TCP port.
    pub port: u16,
    /// Parallel connections to the server.
    pub connections: usize,
    pub connect_timeout_ms: u64,
    /// Deadline for a single socket write.
    pub write_timeout_ms: u64,
    /// Transient write failures tolerated in a row.
    pub max_retries: u32,
    /// First retry delay, doubled per attempt.
    pub retry_backoff_ms: u64,
}

/// What to do when the task queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Overflow {
    /// Wait for a free slot.
    #[default]
    Block,
    /// Fail the run.
    Reject,
}

/// Worker pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Concurrent workers.
    pub threads: usize,
    /// Task queue capacity.
    pub queue_size: usize,
    /// Row bands to split the image into. Zero means one per worker.
    pub chunks: usize,
    pub overflow: Overflow,
}

/// Encoder configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderConfig {
    /// Bytes buffered before a batch is handed to the connection.
    pub batch_size: usize,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for NetworkConfig {
    fn default() -> Self {
        let write = WriteOptions::default();
        Self {
            host: "pixelflut.uwu.industries".into(),
            port: 1234,
            connections: 1,
            connect_timeout_ms: write.connect_timeout.as_millis() as u64,
            write_timeout_ms: write.write_timeout.as_millis() as u64,
            max_retries: write.max_retries,
            retry_backoff_ms: write.retry_backoff.as_millis() as u64,
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            threads: 4,
            queue_size: 256,
            chunks: 0,
            overflow: Overflow::Block,
        }
    }
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            batch_size: flut_core::DEFAULT_BATCH_SIZE,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl ClientConfig {
    /// Load configuration from a TOML file.
    ///
    /// A missing file yields the defaults; an unreadable or invalid one is
    /// a configuration error.
    pub fn load(path: &Path) -> Result<Self, FlutError> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("no config at {}; using defaults", path.display());
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(FlutError::Config(format!(
                    "cannot read {}: {e}",
                    path.display()
                )));
            }
        };
        toml::from_str(&contents)
            .map_err(|e| FlutError::Config(format!("invalid config {}: {e}", path.display())))
    }

    pub fn parse(contents: &str) -> Result<Self, FlutError> {
        toml::from_str(contents).map_err(|e| FlutError::Config(e.to_string()))
    }

    /// Convert into validated options for the orchestrator.
    pub fn to_options(&self) -> Result<FloodOptions, FlutError> {
        let net = &self.network;
        let options = FloodOptions {
            threads: self.pool.threads,
            queue_size: self.pool.queue_size,
            chunks: (self.pool.chunks > 0).then_some(self.pool.chunks),
            connections: net.connections,
            batch_size: self.encoder.batch_size,
            overflow: match self.pool.overflow {
                Overflow::Block => OverflowPolicy::Block,
                Overflow::Reject => OverflowPolicy::Reject,
            },
            write: WriteOptions {
                write_timeout: Duration::from_millis(net.write_timeout_ms),
                max_retries: net.max_retries,
                retry_backoff: Duration::from_millis(net.retry_backoff_ms),
                connect_timeout: Duration::from_millis(net.connect_timeout_ms),
            },
            ..FloodOptions::new(ConnectionInfo::new(net.host.clone(), net.port))
        };
        options.validate()?;
        Ok(options)
    }
}

// ── Tests ────────────────────────────────────────────────────────
