// src/main.rs
use anyhow::{anyhow, Context, Result};
use axum_server::tls_rustls::RustlsConfig;
use clap::{Parser, Subcommand};
use std::fs::File;
use std::io::{self, BufWriter};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use hoursync_core::export::{export_billed_types, export_month_entries};
use hoursync_core::server::{router, AppState};
use hoursync_core::{
    AppConfig, FileStore, PsaClient, SyncOptions, SyncOrchestrator, SyncOutcome, SyncTarget,
    TimeStore,
};

#[derive(Parser, Debug)]
#[command(name = "hoursync", version, about = "PSA timesheet sync and fiscal-month aggregation")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP server with the sync triggers (default)
    Serve,
    /// Run one sync and print the report
    Sync {
        /// Fiscal year id; defaults to the one with the latest start date
        #[arg(long)]
        fiscal_year: Option<String>,
        /// Aggregate without writing anything
        #[arg(long)]
        dry_run: bool,
    },
    /// Write stored month rows for a fiscal year as CSV
    Export {
        #[arg(long)]
        fiscal_year: String,
        /// Output file; stdout when omitted
        #[arg(long)]
        output: Option<PathBuf>,
        /// Export the per-charge-type breakdown instead of month totals
        #[arg(long)]
        billed_types: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    let cli = Cli::parse();
    let config = AppConfig::from_env().context("Failed to load configuration")?;
    info!("Configuration loaded. Data file: {}", config.data_file.display());

    let store = Arc::new(
        FileStore::open(&config.data_file)
            .with_context(|| format!("Failed to open data file {}", config.data_file.display()))?,
    );

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(&config, store).await,
        Command::Sync {
            fiscal_year,
            dry_run,
        } => run_sync(&config, store, fiscal_year, dry_run).await,
        Command::Export {
            fiscal_year,
            output,
            billed_types,
        } => run_export(store, &fiscal_year, output, billed_types).await,
    }
}

fn orchestrator(config: &AppConfig, store: Arc<FileStore>) -> Result<SyncOrchestrator> {
    let psa_config = config
        .psa_config()
        .context("The PSA source is not configured")?;
    let client = PsaClient::new(psa_config).context("Failed to create PSA client")?;
    Ok(SyncOrchestrator::new(store, Arc::new(client)))
}

async fn serve(config: &AppConfig, store: Arc<FileStore>) -> Result<()> {
    let state = AppState::new(orchestrator(config, store)?, config.cron_secret());
    let app = router(state);

    let addr: SocketAddr = config
        .bind_address()
        .parse()
        .with_context(|| format!("Invalid bind address {}", config.bind_address()))?;

    match config.tls_paths() {
        Some((cert_path, key_path)) => {
            let tls_config = RustlsConfig::from_pem_file(&cert_path, &key_path)
                .await
                .map_err(|e| {
                    error!("Failed to load TLS cert/key: {}", e);
                    anyhow!(e)
                })
                .with_context(|| {
                    format!(
                        "Failed to load TLS configuration from {} and {}",
                        cert_path.display(),
                        key_path.display()
                    )
                })?;
            info!("Starting server on https://{}", addr);
            axum_server::bind_rustls(addr, tls_config)
                .serve(app.into_make_service())
                .await?;
        }
        None => {
            let listener = tokio::net::TcpListener::bind(addr)
                .await
                .with_context(|| format!("Failed to bind {}", addr))?;
            info!("Starting server on http://{}", addr);
            axum::serve(listener, app).await?;
        }
    }
    Ok(())
}

async fn run_sync(
    config: &AppConfig,
    store: Arc<FileStore>,
    fiscal_year: Option<String>,
    dry_run: bool,
) -> Result<()> {
    let target = fiscal_year.map_or(SyncTarget::Latest, SyncTarget::FiscalYear);
    let options = SyncOptions {
        dry_run,
        ..Default::default()
    };

    match orchestrator(config, store)?.run(target, options).await {
        Ok(report) => {
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Err(failure) => {
            println!("{}", serde_json::to_string_pretty(&SyncOutcome::from(&failure))?);
            Err(anyhow!("{}", failure))
        }
    }
}

async fn run_export(
    store: Arc<FileStore>,
    fiscal_year: &str,
    output: Option<PathBuf>,
    billed_types: bool,
) -> Result<()> {
    let store: &dyn TimeStore = store.as_ref();
    let written = match output {
        Some(path) => {
            let file = File::create(&path)
                .with_context(|| format!("Failed to create {}", path.display()))?;
            let writer = BufWriter::new(file);
            if billed_types {
                export_billed_types(store, fiscal_year, writer).await?
            } else {
                export_month_entries(store, fiscal_year, writer).await?
            }
        }
        None => {
            let writer = io::stdout().lock();
            if billed_types {
                export_billed_types(store, fiscal_year, writer).await?
            } else {
                export_month_entries(store, fiscal_year, writer).await?
            }
        }
    };
    info!("Wrote {} rows", written);
    Ok(())
}
