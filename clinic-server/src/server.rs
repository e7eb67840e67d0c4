use crate::config::ServerConfig;
use anyhow::{Context, Result};
use credit_ledger::{
    ClinicLedger, GeminiInsightProvider, InMemoryLedgerRepository, LedgerRepository,
    PostgresLedgerRepository,
};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// Shared state handed to every handler
#[derive(Clone)]
pub struct ClinicServer {
    pub config: Arc<ServerConfig>,
    pub ledger: Arc<ClinicLedger>,
    pub started_at: Instant,
    /// Which record store backs the ledger, for the health endpoint
    pub store: &'static str,
}

impl ClinicServer {
    /// Build the ledger from configuration.
    ///
    /// Connects to Postgres and applies migrations when `database_url` is
    /// set, otherwise runs on the in-memory store.
    pub async fn new(config: ServerConfig) -> Result<Self> {
        let (repository, store): (Arc<dyn LedgerRepository>, &'static str) =
            match &config.database_url {
                Some(url) => {
                    let repo = PostgresLedgerRepository::connect(url, config.max_connections)
                        .await
                        .context("Failed to open the ledger database")?;
                    info!(max_connections = config.max_connections, "Using Postgres record store");
                    (Arc::new(repo), "postgres")
                }
                None => {
                    warn!("No database_url configured; records live in memory only");
                    (Arc::new(InMemoryLedgerRepository::new()), "memory")
                }
            };

        let mut ledger = ClinicLedger::new(repository, config.ledger.clone())
            .context("Invalid ledger configuration")?;

        if config.insight.api_key.is_some() {
            let provider = GeminiInsightProvider::new(config.insight.clone())
                .context("Invalid insight configuration")?;
            ledger = ledger.with_insight_provider(Arc::new(provider));
            info!(model = %config.insight.model, "Insight provider enabled");
        }

        Ok(Self::with_ledger(config, ledger, store))
    }

    /// State over an already-built ledger
    pub fn with_ledger(config: ServerConfig, ledger: ClinicLedger, store: &'static str) -> Self {
        Self {
            config: Arc::new(config),
            ledger: Arc::new(ledger),
            started_at: Instant::now(),
            store,
        }
    }

    /// In-memory server with default settings
    pub fn in_memory() -> Result<Self> {
        let config = ServerConfig::default();
        let ledger = ClinicLedger::new(
            Arc::new(InMemoryLedgerRepository::new()),
            config.ledger.clone(),
        )
        .context("Invalid ledger configuration")?;
        Ok(Self::with_ledger(config, ledger, "memory"))
    }
}
