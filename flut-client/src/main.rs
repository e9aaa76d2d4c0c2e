//! flut — entry point.
//!
//! ```text
//! flut <image> -d <w>:<h>          Flood an image onto the canvas
//! flut <image> -d <w>:<h> -t 8     Use eight workers
//! flut --config <path> ...         Load a custom config TOML
//! flut --gen-config                Write default config to stdout
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use flut_client::config::{ClientConfig, Overflow};
use flut_client::source;
use flut_core::{CancellationToken, Dimensions, FlutError, Offset, Orchestrator};

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "flut", version, about = "Flood an image onto a pixelflut canvas")]
struct Cli {
    /// Image to draw.
    #[arg(required_unless_present = "gen_config")]
    image: Option<PathBuf>,

    /// Target size on the canvas, as <width>:<height>.
    #[arg(short, long, value_name = "W:H", required_unless_present = "gen_config")]
    dimensions: Option<Dimensions>,

    /// Worker count.
    #[arg(short, long)]
    threads: Option<usize>,

    /// Task queue capacity.
    #[arg(short, long)]
    queue_size: Option<usize>,

    /// Canvas server host.
    #[arg(short = 'H', long)]
    host: Option<String>,

    /// Canvas server port.
    #[arg(short, long)]
    port: Option<u16>,

    /// Row bands to split the image into (defaults to one per worker).
    #[arg(short = 'n', long)]
    chunks: Option<usize>,

    /// Canvas position of the image's top-left corner, as <x>:<y>.
    #[arg(short, long, value_name = "X:Y", default_value = "0:0")]
    offset: Offset,

    /// Bytes buffered per write.
    #[arg(short, long)]
    batch_size: Option<usize>,

    /// Parallel connections to the server.
    #[arg(short, long)]
    connections: Option<usize>,

    /// Fail instead of waiting when the task queue is full.
    #[arg(long)]
    reject_when_full: bool,

    /// Path to configuration TOML file.
    #[arg(long, default_value = "flut.toml")]
    config: PathBuf,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,
}

impl Cli {
    /// Flags win over the config file.
    fn apply(&self, config: &mut ClientConfig) {
        if let Some(host) = &self.host {
            config.network.host = host.clone();
        }
        if let Some(port) = self.port {
            config.network.port = port;
        }
        if let Some(connections) = self.connections {
            config.network.connections = connections;
        }
        if let Some(threads) = self.threads {
            config.pool.threads = threads;
        }
        if let Some(queue_size) = self.queue_size {
            config.pool.queue_size = queue_size;
        }
        if let Some(chunks) = self.chunks {
            config.pool.chunks = chunks;
        }
        if self.reject_when_full {
            config.pool.overflow = Overflow::Reject;
        }
        if let Some(batch_size) = self.batch_size {
            config.encoder.batch_size = batch_size;
        }
    }
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return if e.use_stderr() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    // --gen-config: dump defaults and exit.
    if cli.gen_config {
        return match toml::to_string_pretty(&ClientConfig::default()) {
            Ok(text) => {
                println!("{text}");
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("could not render default config: {e}");
                ExitCode::FAILURE
            }
        };
    }

    let loaded = ClientConfig::load(&cli.config);

    // Init tracing. A config that failed to load still gets reported.
    let level = loaded
        .as_ref()
        .map_or("info", |config| config.logging.level.as_str());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut config = match loaded {
        Ok(config) => config,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };
    cli.apply(&mut config);

    info!("flut v{}", env!("CARGO_PKG_VERSION"));

    match run(cli, config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            if let Some(report) = e.report() {
                error!(
                    "{} completed, {} failed, {} cancelled, {} never started; {} pixels sent",
                    report.completed,
                    report.failed,
                    report.cancelled,
                    report.discarded,
                    report.commands_sent
                );
            }
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli, config: ClientConfig) -> Result<(), FlutError> {
    let mut options = config.to_options()?;
    options.offset = cli.offset;

    let (Some(path), Some(dims)) = (cli.image, cli.dimensions) else {
        return Err(FlutError::Config("an image and -d <width>:<height> are required".into()));
    };

    info!("server: {}", options.server);
    info!(
        "{} workers, queue of {}, {} chunks over {} connection(s)",
        options.threads,
        options.queue_size,
        options.chunk_count(),
        options.connections
    );

    // Decoding and resizing are CPU-bound.
    let buffer = tokio::task::spawn_blocking(move || source::load(&path, dims))
        .await
        .map_err(|e| FlutError::Config(format!("image loader panicked: {e}")))??;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Ctrl-C received, stopping");
            on_signal.cancel();
        }
    });

    let orchestrator = Orchestrator::new(options, cancel)?;
    let report = orchestrator.flood(buffer).await?;
    info!(
        "done: {} chunks, {} pixels",
        report.completed, report.commands_sent
    );
    Ok(())
}
