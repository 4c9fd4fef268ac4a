#![forbid(unsafe_code)]

//! `doc-supervisor`: document supervisor and worker binary.
//!
//! `run` executes one document out-of-process (falling back to in-process
//! execution) and prints each result as a JSON line on stdout. `worker` is
//! the entry point the supervisor launches for the detached worker.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use doc_supervisor::channel::FileChannelFactory;
use doc_supervisor::config::{GlobalConfig, CHANNEL_ROOT_ENV};
use doc_supervisor::inproc::InProcExecutor;
use doc_supervisor::orchestrator::{DocumentStore, Executor, OutOfProcExecutor};
use doc_supervisor::persistence::JsonFileStore;
use doc_supervisor::plugin::ShellRunner;
use doc_supervisor::proc::{OsLivenessChecker, OsProcessLauncher};
use doc_supervisor::worker::WorkerSession;
use doc_supervisor::{AppError, CancelFlag, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "doc-supervisor", about = "Out-of-process document supervisor", version, long_about = None)]
struct Cli {
    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run one document and print its results as JSON lines.
    Run {
        /// Path to the TOML configuration file.
        #[arg(long)]
        config: PathBuf,

        /// Path to the JSON document state file.
        #[arg(long)]
        state: PathBuf,
    },
    /// Serve a document handed over by the supervisor.
    Worker {
        /// Document to serve.
        #[arg(long)]
        document_id: String,
    },
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(async move {
            match args.command {
                Command::Run { config, state } => run_document(config, state).await,
                Command::Worker { document_id } => run_worker(&document_id).await,
            }
        })
}

async fn run_document(config_path: PathBuf, state_path: PathBuf) -> Result<()> {
    let config = GlobalConfig::load_from_path(&config_path)?;
    std::fs::create_dir_all(&config.channel_root)
        .map_err(|err| AppError::Config(format!("cannot create channel_root: {err}")))?;
    let channel_root = config
        .channel_root
        .canonicalize()
        .map_err(|err| AppError::Config(format!("invalid channel_root: {err}")))?;
    info!(channel_root = %channel_root.display(), "configuration loaded");

    let store = Arc::new(JsonFileStore::open(&state_path)?);
    let document_id = store.load().document_id;

    let fallback: Arc<dyn Executor> = Arc::new(InProcExecutor::new(Arc::new(ShellRunner::new())));
    let launcher = OsProcessLauncher::new()
        .with_env(CHANNEL_ROOT_ENV, channel_root.to_string_lossy());
    let executor = OutOfProcExecutor::new(
        Arc::new(FileChannelFactory::new(channel_root)),
        Arc::new(launcher),
        Arc::new(OsLivenessChecker),
        fallback,
        config.worker_program()?,
    )
    .with_poll_interval(config.cancel_poll_interval());

    let cancel = CancelFlag::new();
    let signal_flag = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("shutdown signal received, detaching");
        signal_flag.request_shutdown();
    });

    info!(%document_id, "running document");
    let mut results = executor.run(cancel, store);
    let mut stdout = std::io::stdout();
    while let Some(result) = results.recv().await {
        let line = serde_json::to_string(&result)
            .map_err(|err| AppError::Io(format!("failed to encode result: {err}")))?;
        writeln!(stdout, "{line}")
            .and_then(|()| stdout.flush())
            .map_err(|err| AppError::Io(format!("failed to write result: {err}")))?;
    }

    info!(%document_id, "document run finished");
    Ok(())
}

async fn run_worker(document_id: &str) -> Result<()> {
    let channel_root = GlobalConfig::channel_root_from_env()?;
    let channels = FileChannelFactory::new(channel_root);
    let session = WorkerSession::open(&channels, document_id).map_err(|err| {
        error!(document_id, %err, "worker failed to open channel");
        err
    })?;

    match session.serve(&ShellRunner::new()).await {
        Ok(status) => {
            info!(document_id, ?status, "worker finished");
            Ok(())
        }
        Err(err) => {
            warn!(document_id, %err, "worker ended early");
            Err(err)
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
