use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use clinic_server::{create_app, ClinicServer, ServerConfig};
use logger_redacted::init_tracing;
use tracing::info;

/// Clinic credit ledger HTTP Server
#[derive(Parser, Debug)]
#[command(name = "clinic-server")]
#[command(about = "Patients, payments, session credits and appointments API")]
struct Args {
    /// Server bind address (overrides the config file)
    #[arg(long, env = "CLINIC_HOST")]
    host: Option<String>,

    /// Server port (overrides the config file)
    #[arg(short, long, env = "CLINIC_PORT")]
    port: Option<u16>,

    /// Configuration file path
    #[arg(short, long, default_value = "clinic-server.toml")]
    config: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the HTTP API (default)
    Serve,
    /// Run reconciliation and grant expiry over every professional, then exit
    Maintenance,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let mut config = ServerConfig::load(&args.config)
        .with_context(|| format!("Failed to load configuration from {}", args.config))?;
    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if args.verbose {
        config.logging.log_level = "debug".to_string();
    }

    init_tracing(&config.logging).context("Failed to initialize logging")?;

    let addr = config.bind_address();
    let server = ClinicServer::new(config).await?;

    if matches!(args.command, Some(Command::Maintenance)) {
        return run_maintenance(&server).await;
    }

    info!(version = env!("CARGO_PKG_VERSION"), "Starting clinic server");
    let app = create_app(server);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))?;

    info!(address = %addr, "Clinic server listening");
    info!("Health check available at: http://{addr}/health");
    info!("API v1 available at: http://{addr}/api/v1");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;

    info!("Clinic server stopped");
    Ok(())
}

async fn run_maintenance(server: &ClinicServer) -> Result<()> {
    let today = chrono::Utc::now().date_naive();
    let report = server
        .ledger
        .run_reconciliation(None, today)
        .await
        .context("Reconciliation failed")?;
    let expired = server
        .ledger
        .expire_lapsed_grants(None, today)
        .await
        .context("Grant expiry failed")?;

    info!(
        regranted = report.regranted.len(),
        skipped_legacy = report.skipped_legacy.len(),
        failed = report.failed.len(),
        expired = expired.len(),
        "Maintenance finished"
    );
    if !report.failed.is_empty() {
        anyhow::bail!("{} payment(s) could not be granted", report.failed.len());
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
