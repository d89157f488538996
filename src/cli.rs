//! Command-line front end: decode SSE from a file, stdin or an HTTP endpoint.

use crate::config::Config;
use crate::http::{HttpClient, split_header};
use crate::sse::Diagnostic;
use crate::stream::{
    BlockingReaderSource, ChunkSource, Mode, PipeOptions, PipeState, ReaderSource, StreamItem,
    StreamPipe,
};
use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use futures::StreamExt;
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use tokio::sync::mpsc;

/// Exit status after Ctrl-C, as shells report SIGINT.
const EXIT_CANCELLED: u8 = 130;

#[derive(Debug, Parser)]
#[command(name = "rill", version, about = "Decode Server-Sent Event streams")]
pub struct Cli {
    /// Config file (default: <config dir>/rill/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Decode SSE text from a file or stdin
    Decode(DecodeArgs),
    /// Stream SSE from an HTTP endpoint
    Fetch(FetchArgs),
}

#[derive(Debug, Args)]
pub struct DecodeArgs {
    /// Input file; reads stdin when omitted or "-"
    pub file: Option<PathBuf>,

    #[arg(long, value_enum)]
    pub mode: Option<Mode>,

    /// Bytes per read
    #[arg(long)]
    pub chunk_size: Option<usize>,
}

#[derive(Debug, Args)]
pub struct FetchArgs {
    pub url: String,

    #[arg(long, value_enum)]
    pub mode: Option<Mode>,

    /// HTTP method
    #[arg(short = 'X', long, default_value = "GET")]
    pub method: String,

    /// JSON request body
    #[arg(short = 'd', long)]
    pub data: Option<String>,

    /// Extra header, as 'Name: value' (repeatable)
    #[arg(short = 'H', long = "header")]
    pub headers: Vec<String>,

    /// Bearer token (overrides config)
    #[arg(long)]
    pub bearer: Option<String>,
}

pub async fn run(cli: Cli) -> ExitCode {
    let config = match Config::load(cli.config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading config: {e}");
            return ExitCode::FAILURE;
        }
    };
    init_logging(&config);

    let result = match cli.command {
        Commands::Decode(args) => run_decode(&config, args).await,
        Commands::Fetch(args) => run_fetch(&config, args).await,
    };

    match result {
        Ok(state) => ExitCode::from(exit_status(state)),
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

/// Initialize logging. `RILL_LOG` sends debug logs to a file; otherwise
/// `RUST_LOG` (or the config filter) applies to stderr.
pub fn init_logging(config: &Config) {
    use tracing_subscriber::EnvFilter;

    if let Ok(path) = std::env::var("RILL_LOG") {
        use std::fs::File;
        use tracing_subscriber::prelude::*;
        let path = if path.is_empty() { "rill.log".to_string() } else { path };
        match File::create(&path) {
            Ok(file) => {
                let file_layer = tracing_subscriber::fmt::layer()
                    .with_writer(file)
                    .with_ansi(false);
                let filter = EnvFilter::new("rill=debug");
                let _ = tracing_subscriber::registry()
                    .with(file_layer.with_filter(filter))
                    .try_init();
            }
            Err(err) => {
                eprintln!("Failed to create log file {path}: {err}");
            }
        }
    } else {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(&config.log_filter));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(io::stderr)
            .try_init();
    }
}

async fn run_decode(config: &Config, args: DecodeArgs) -> Result<PipeState> {
    let chunk_size = args.chunk_size.unwrap_or_else(|| config.read_chunk_size()).max(1);
    let mode = args.mode.unwrap_or(config.mode);

    match args.file {
        Some(path) if path.as_os_str() != "-" => {
            let file = tokio::fs::File::open(&path)
                .await
                .with_context(|| format!("Failed to open {}", path.display()))?;
            pump(ReaderSource::with_chunk_size(file, chunk_size), mode, config).await
        }
        _ => {
            let stdin = BlockingReaderSource::spawn(io::stdin(), chunk_size)
                .context("Failed to start stdin reader")?;
            pump(stdin, mode, config).await
        }
    }
}

async fn run_fetch(config: &Config, args: FetchArgs) -> Result<PipeState> {
    let mut client = HttpClient::new(&config.http)?;
    if let Some(token) = args.bearer {
        client = client.with_auth(crate::http::AuthConfig::Bearer(token));
    }
    for raw in &args.headers {
        let (name, value) = split_header(raw)?;
        client.insert_header(name, value)?;
    }

    let method = reqwest::Method::from_bytes(args.method.to_uppercase().as_bytes())
        .with_context(|| format!("Invalid HTTP method {:?}", args.method))?;
    let body = args
        .data
        .as_deref()
        .map(|data| serde_json::from_str::<serde_json::Value>(data))
        .transpose()
        .context("Request body is not valid JSON")?;

    let source = client.open_stream(method, &args.url, body.as_ref()).await?;
    pump(source, args.mode.unwrap_or(config.mode), config).await
}

/// Run a pipe to completion, writing items to stdout. Ctrl-C cancels it.
async fn pump(source: impl ChunkSource, mode: Mode, config: &Config) -> Result<PipeState> {
    let (diag_tx, diag_rx) = mpsc::unbounded_channel();
    let options: PipeOptions = config.pipe_options().with_diagnostics(diag_tx);
    let pipe = StreamPipe::new(source, mode, options);
    let handle = pipe.handle();

    let ctrl_c = {
        let handle = handle.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                handle.cancel();
            }
        })
    };

    let stdout = io::stdout();
    let result = drain(pipe, &mut stdout.lock(), diag_rx).await;
    ctrl_c.abort();

    let (state, skipped) = result?;
    if skipped > 0 {
        eprintln!("rill: skipped {skipped} malformed field(s)");
    }
    Ok(state)
}

/// Write every item, then report the terminal state and how many malformed
/// fields were dropped along the way.
pub async fn drain<W: Write>(
    mut pipe: StreamPipe<StreamItem>,
    out: &mut W,
    mut diagnostics: mpsc::UnboundedReceiver<Diagnostic>,
) -> Result<(PipeState, usize)> {
    let handle = pipe.handle();
    while let Some(item) = pipe.next().await {
        write_item(out, &item)?;
    }
    drop(pipe);
    let state = handle.finished().await;

    let mut skipped = 0;
    while let Ok(diagnostic) = diagnostics.try_recv() {
        if matches!(
            diagnostic,
            Diagnostic::MalformedData { .. } | Diagnostic::MalformedId { .. }
        ) {
            skipped += 1;
        }
    }
    Ok((state, skipped))
}

/// Events as one JSON object per line; lines verbatim.
pub fn write_item<W: Write>(out: &mut W, item: &StreamItem) -> Result<()> {
    match item {
        StreamItem::Event(record) => {
            serde_json::to_writer(&mut *out, record)?;
            writeln!(out)?;
        }
        StreamItem::Line(line) => writeln!(out, "{line}")?,
    }
    out.flush()?;
    Ok(())
}

/// Process exit status for a finished pipe.
pub fn exit_status(state: PipeState) -> u8 {
    match state {
        PipeState::Completed => 0,
        PipeState::Cancelled => EXIT_CANCELLED,
        PipeState::Faulted | PipeState::Idle | PipeState::Active => 1,
    }
}
