//! Deskcast launcher
//!
//! - `run`: own the encoder and upload what it writes
//! - `sync`: upload what a separately started encoder writes
//! - `encode`: only supervise the encoder
//! - `print-config`: show the effective configuration

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use deskcast::{
    CancellationToken, DeskcastConfig, DispatcherConfig, Encoder, FfmpegEncoder, HttpUploader,
    Pipeline, PipelineOptions, UploadDispatcher,
};
use deskcast_logging::{deskcast_home, init_logging, LogConfig};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing::{error, info, warn};

/// Grace period for in-flight uploads on shutdown
const SHUTDOWN_TIMEOUT_SECS: u64 = 5;

#[derive(Parser, Debug)]
#[command(name = "deskcast", version, about = "Capture HLS segments and push them upstream")]
struct Cli {
    /// Config file (default: <home>/config.toml when present)
    #[arg(short, long, global = true, env = "DESKCAST_CONFIG")]
    config: Option<PathBuf>,

    /// Directory the encoder writes into
    #[arg(long, global = true, env = "DESKCAST_WORKING_DIR")]
    working_dir: Option<PathBuf>,

    /// Ingestion endpoint URL
    #[arg(long, global = true, env = "DESKCAST_ENDPOINT")]
    endpoint: Option<String>,

    /// Delay between scan cycles
    #[arg(long, global = true)]
    poll_interval_ms: Option<u64>,

    /// Concurrent upload workers
    #[arg(long, global = true)]
    workers: Option<usize>,

    /// Debug output on stderr
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the encoder and upload its segments (wipes the working directory)
    Run,
    /// Upload segments written by an encoder started elsewhere
    Sync,
    /// Run the encoder only, until interrupted
    Encode,
    /// Print the effective configuration as TOML
    PrintConfig,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = init_logging(LogConfig {
        app_name: "deskcast",
        verbose: cli.verbose,
        log_dir: None,
    }) {
        eprintln!("Warning: failed to initialise logging: {:#}", e);
    }

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::from(1)
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = load_config(&cli)?;

    match cli.command {
        Commands::PrintConfig => {
            print!("{}", config.to_toml().context("Failed to render config")?);
            Ok(())
        }
        Commands::Run => run_pipeline(config, true),
        Commands::Sync => run_pipeline(config, false),
        Commands::Encode => run_encoder(config),
    }
}

/// File (explicit, or `<home>/config.toml` if it exists), then CLI overrides.
fn load_config(cli: &Cli) -> Result<DeskcastConfig> {
    let path = cli
        .config
        .clone()
        .or_else(|| Some(deskcast_home().join("config.toml")).filter(|p| p.exists()));

    let mut config = match &path {
        Some(path) => DeskcastConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => DeskcastConfig::default(),
    };

    if let Some(dir) = &cli.working_dir {
        config.working_dir = dir.clone();
    }
    if let Some(endpoint) = &cli.endpoint {
        config.endpoint = endpoint.clone();
    }
    if let Some(ms) = cli.poll_interval_ms {
        config.poll_interval_ms = ms;
    }
    if let Some(workers) = cli.workers {
        config.workers = workers;
    }

    config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn build_runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("deskcast")
        .build()
        .context("Failed to build tokio runtime")
}

fn run_pipeline(config: DeskcastConfig, owns_encoder: bool) -> Result<()> {
    let runtime = build_runtime()?;

    runtime.block_on(async move {
        let uploader =
            HttpUploader::new(&config.endpoint, &config.form_field, config.upload_timeout())
                .context("Failed to build HTTP client")?;
        let dispatcher = UploadDispatcher::spawn(
            uploader,
            DispatcherConfig {
                workers: config.workers,
                queue_capacity: config.queue_capacity,
            },
            None,
        );

        let cancel = CancellationToken::new();
        tokio::spawn(cancel_on_signal(cancel.clone()));

        info!(
            endpoint = %config.endpoint,
            dir = %config.working_dir.display(),
            workers = config.workers,
            owns_encoder,
            "Deskcast started"
        );

        let options = PipelineOptions::from_config(&config, owns_encoder);
        loop {
            let encoder = owns_encoder.then(|| {
                Box::new(FfmpegEncoder::new(
                    config.encoder.clone(),
                    config.manifest_name.clone(),
                )) as Box<dyn Encoder>
            });
            let mut pipeline = Pipeline::new(options.clone(), dispatcher.queue(), encoder);
            let token = cancel.clone();

            match tokio::task::spawn_blocking(move || pipeline.run(&token)).await {
                Ok(()) => break,
                Err(e) if cancel.is_cancelled() => {
                    warn!(error = %e, "Pipeline ended abnormally during shutdown");
                    break;
                }
                Err(e) => {
                    error!(error = %e, "Pipeline crashed, restarting");
                    tokio::time::sleep(config.reset_backoff()).await;
                }
            }
        }

        let stats = dispatcher
            .shutdown(Duration::from_secs(SHUTDOWN_TIMEOUT_SECS))
            .await;
        info!(
            submitted = stats.submitted,
            uploaded = stats.uploaded,
            "Deskcast stopped"
        );
        Ok(())
    })
}

fn run_encoder(config: DeskcastConfig) -> Result<()> {
    let runtime = build_runtime()?;

    runtime.block_on(async move {
        std::fs::create_dir_all(&config.working_dir).with_context(|| {
            format!(
                "Failed to create working directory {}",
                config.working_dir.display()
            )
        })?;

        let cancel = CancellationToken::new();
        tokio::spawn(cancel_on_signal(cancel.clone()));

        let token = cancel.clone();
        tokio::task::spawn_blocking(move || supervise_encoder(config, &token))
            .await
            .context("Encoder supervisor crashed")
    })
}

/// Keep one encoder alive until cancelled, restarting it after exits.
fn supervise_encoder(config: DeskcastConfig, cancel: &CancellationToken) {
    let dir = config.working_dir.clone();
    let backoff = config.reset_backoff();
    let mut encoder = FfmpegEncoder::new(config.encoder, config.manifest_name);

    while !cancel.is_cancelled() {
        if let Err(e) = encoder.start(&dir) {
            warn!(error = %e, "Encoder failed to start, retrying in {:?}", backoff);
            if !cancel.sleep(backoff) {
                break;
            }
            continue;
        }

        if let Some(status) = encoder.wait_while(|| !cancel.is_cancelled()) {
            warn!(%status, "Encoder exited, restarting in {:?}", backoff);
            if !cancel.sleep(backoff) {
                break;
            }
        }
    }

    encoder.stop();
    info!("Encoder supervisor stopped");
}

/// Wait for SIGINT (or SIGTERM on unix), then cancel.
async fn cancel_on_signal(cancel: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => info!("Received SIGINT"),
                    _ = sigterm.recv() => info!("Received SIGTERM"),
                }
            }
            Err(e) => {
                warn!(error = %e, "Cannot listen for SIGTERM");
                if let Err(e) = tokio::signal::ctrl_c().await {
                    warn!(error = %e, "Cannot listen for Ctrl-C; shutdown only by kill");
                    return;
                }
                info!("Received SIGINT");
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Cannot listen for Ctrl-C; shutdown only by kill");
            return;
        }
        info!("Received SIGINT");
    }

    cancel.cancel();
}
