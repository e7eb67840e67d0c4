//! Logging for the clinic credit engine with automatic PII redaction.
//!
//! Patient e-mails, Brazilian phone numbers and CPF numbers are detected
//! and replaced before a log line is written. With `hash_for_correlation`
//! the replacement carries a short SHA-256 prefix so the same value can be
//! followed across lines without being readable.
//!
//! ```no_run
//! use logger_redacted::{init_tracing, LoggerConfig};
//!
//! init_tracing(&LoggerConfig::default()).expect("tracing already installed");
//! tracing::info!("Patient ana@example.com booked"); // Patient EMAIL[...] booked
//! ```

pub mod config;
pub mod redactor;

pub use config::*;
pub use redactor::*;

use thiserror::Error;
use tracing_subscriber::{
    fmt::{self, time::ChronoUtc},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

#[derive(Error, Debug)]
pub enum LoggerError {
    #[error("Invalid log filter: {0}")]
    InvalidFilter(String),

    #[error("Global subscriber already installed: {0}")]
    AlreadyInitialized(String),
}

pub type LoggerResult<T> = Result<T, LoggerError>;

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins over `config.log_level` when present.
pub fn init_tracing(config: &LoggerConfig) -> LoggerResult<()> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(config.default_directive())
            .map_err(|e| LoggerError::InvalidFilter(e.to_string()))?,
    };

    let redactor = if config.redaction_enabled {
        PiiRedactor::default()
    } else {
        PiiRedactor::new(RedactionConfig {
            redact_emails: false,
            redact_phones: false,
            redact_cpf: false,
            ..Default::default()
        })
    };
    let writer = RedactingMakeWriter::new(std::io::stdout, redactor);

    let registry = tracing_subscriber::registry().with(env_filter);
    let result = match config.format {
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_timer(ChronoUtc::rfc_3339())
                    .with_ansi(false)
                    .json()
                    .with_writer(writer),
            )
            .try_init(),
        LogFormat::Pretty => registry
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_timer(ChronoUtc::rfc_3339())
                    .with_ansi(false)
                    .with_writer(writer),
            )
            .try_init(),
    };

    result.map_err(|e| LoggerError::AlreadyInitialized(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directive_uses_level() {
        let config = LoggerConfig {
            log_level: "debug".to_string(),
            ..Default::default()
        };
        assert!(config.default_directive().starts_with("debug,"));
    }
}
