use config::{Config, Environment, File};
use credit_ledger::{InsightConfig, LedgerConfig};
use logger_redacted::LoggerConfig;
use serde::{Deserialize, Serialize};

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Server bind address
    pub host: String,
    pub port: u16,
    /// Postgres URL; the in-memory store is used when absent
    pub database_url: Option<String>,
    pub max_connections: u32,
    /// Origins allowed by the CORS layer
    pub allowed_origins: Vec<String>,
    pub ledger: LedgerConfig,
    pub insight: InsightConfig,
    pub logging: LoggerConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            database_url: None,
            max_connections: 10,
            allowed_origins: vec![
                "http://localhost:3000".to_string(),
                "http://127.0.0.1:3000".to_string(),
            ],
            ledger: LedgerConfig::default(),
            insight: InsightConfig::default(),
            logging: LoggerConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Defaults, then the optional file at `path`, then `CLINIC__*` environment variables.
    pub fn load(path: &str) -> Result<Self, config::ConfigError> {
        Config::builder()
            .add_source(File::with_name(path).required(false))
            .add_source(
                Environment::with_prefix("CLINIC")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
