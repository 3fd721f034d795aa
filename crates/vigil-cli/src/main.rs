//! Vigil CLI: runs the scanning jobs and exposes each of them as a one-shot command.
//!
//! Configuration comes from the environment (and `.env`); see `DATABASE_URL`,
//! `ANTIVIRUS_ENABLED`, `CLAMAV_HOST` / `ANTIVIRUS_SRV_RECORD`.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use vigil_cli::init_tracing;
use vigil_cli::setup::initialize_app;
use vigil_core::{Config, UploadKind};
use vigil_worker::{Job, JobRunner, JobScheduler};

#[derive(Parser)]
#[command(name = "vigil", about = "Antivirus scanning for uploaded files")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every job on its schedule until interrupted
    Run,
    /// Register untracked uploads for scanning
    QueueBatch {
        #[arg(long)]
        limit: Option<i64>,
    },
    /// Scan records that are due
    ScanBatch {
        #[arg(long)]
        limit: Option<i64>,
    },
    /// Open moderation cases for quarantined uploads that have none
    FlagQuarantined {
        #[arg(long)]
        limit: Option<i64>,
    },
    /// Refetch daemon versions
    RefreshVersion,
    /// Delete scan records of deleted uploads
    RemoveOrphans,
    /// Drop the scan record of one upload so it is queued afresh
    Forget { upload_id: i64 },
    /// Print scan statistics
    Stats,
    /// Check whether any daemon answers
    Ping,
    /// Run the pre-upload check against a local file
    ScanFile {
        path: PathBuf,
        /// Treat the file as an image upload
        #[arg(long)]
        image: bool,
    },
    /// Validate configuration without connecting anywhere
    CheckConfig,
}

#[derive(Serialize)]
struct Handled {
    job: &'static str,
    handled: usize,
}

fn print_json(value: &impl Serialize) -> anyhow::Result<()> {
    let out = serde_json::to_string_pretty(value).context("Serialize output")?;
    println!("{}", out);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let config = Config::from_env()?;

    if let Commands::CheckConfig = cli.command {
        config.validate()?;
        let av = &config.antivirus;
        print_json(&serde_json::json!({
            "environment": config.environment,
            "storage_backend": config.storage_backend.to_string(),
            "antivirus_enabled": av.enabled,
            "correctly_configured": av.correctly_configured(),
            "srv_record": av.srv_record,
            "clamav_hosts": av.clamav_hosts,
            "clamav_port": av.clamav_port,
            "flag_malicious_uploads": av.flag_malicious_uploads,
        }))?;
        return Ok(());
    }

    let app = initialize_app(config).await?;
    let av = app.config.antivirus.clone();

    match cli.command {
        Commands::Run => {
            if !av.enabled {
                tracing::warn!("ANTIVIRUS_ENABLED is false, only orphan removal will do work");
            }
            let scheduler = Arc::new(JobScheduler::new(app.jobs.clone(), &av));
            let handle = scheduler.clone().start();
            shutdown_signal().await;
            scheduler.shutdown();
            handle.await.context("Job scheduler panicked")?;
        }
        Commands::QueueBatch { limit } => {
            let handled = app
                .scanner
                .queue_batch(limit.unwrap_or(av.queue_batch_size))
                .await?;
            print_json(&Handled { job: Job::Queue.name(), handled })?;
        }
        Commands::ScanBatch { limit } => {
            let handled = app
                .scanner
                .scan_batch(limit.unwrap_or(av.scan_batch_size))
                .await?;
            print_json(&Handled { job: Job::Scan.name(), handled })?;
        }
        Commands::FlagQuarantined { limit } => {
            let handled = app
                .quarantine
                .flag_pending(limit.unwrap_or(av.flag_batch_size))
                .await?;
            print_json(&Handled {
                job: Job::FlagQuarantined.name(),
                handled,
            })?;
        }
        Commands::RefreshVersion => {
            let versions = app.versions.refresh().await;
            print_json(&versions)?;
        }
        Commands::RemoveOrphans => {
            let handled = app.jobs.run(Job::RemoveOrphans).await?;
            print_json(&Handled {
                job: Job::RemoveOrphans.name(),
                handled,
            })?;
        }
        Commands::Forget { upload_id } => {
            let removed = app.scanner.forget(upload_id).await?;
            print_json(&serde_json::json!({ "upload_id": upload_id, "removed": removed }))?;
        }
        Commands::Stats => {
            let stats = app.scanner.stats().await?;
            print_json(&stats)?;
        }
        Commands::Ping => {
            let endpoints: Vec<String> = app
                .clamav
                .resolve_endpoints()
                .await
                .iter()
                .map(ToString::to_string)
                .collect();
            let online = app.clamav.any_online().await;
            print_json(&serde_json::json!({ "online": online, "endpoints": endpoints }))?;
            if !online {
                bail!("No antivirus daemon answered");
            }
        }
        Commands::ScanFile { path, image } => {
            let file = tokio::fs::File::open(&path)
                .await
                .with_context(|| format!("Failed to open {}", path.display()))?;
            let kind = if image {
                UploadKind::Image
            } else {
                UploadKind::Attachment
            };
            match app.upload_hook.validate(file, kind, true).await {
                Ok(()) => println!("{}: accepted", path.display()),
                Err(rejected) => bail!("{}: {}", path.display(), rejected),
            }
        }
        Commands::CheckConfig => {}
    }

    Ok(())
}

/// Waits for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            tracing::info!("Received terminate signal");
        },
    }

    tracing::info!("Shutting down gracefully...");
}
