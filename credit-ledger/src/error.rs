use crate::models::AppointmentStatus;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Insufficient credits: {requested} requested, {available} available")]
    InsufficientCredits { requested: u32, available: u32 },

    #[error("Invalid status transition: {from} -> {to}")]
    InvalidTransition {
        from: AppointmentStatus,
        to: AppointmentStatus,
    },

    #[error("Cancellation must be explicitly confirmed")]
    ConfirmationRequired,

    #[error("Professional {0} is inactive")]
    InactiveProfessional(Uuid),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: Uuid },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("External service error: {0}")]
    ExternalService(String),
}

impl LedgerError {
    pub fn not_found(entity: &'static str, id: Uuid) -> Self {
        Self::NotFound { entity, id }
    }

    /// Errors the initiating user can fix by changing the request.
    pub fn is_user_correctable(&self) -> bool {
        matches!(
            self,
            Self::Validation(_)
                | Self::InsufficientCredits { .. }
                | Self::InvalidTransition { .. }
                | Self::ConfirmationRequired
                | Self::InactiveProfessional(_)
                | Self::NotFound { .. }
                | Self::Conflict(_)
        )
    }

    /// Message safe to show next to the triggering control.
    pub fn user_message(&self) -> String {
        match self {
            Self::InsufficientCredits { requested, .. } => format!(
                "Patient does not have enough credits to schedule {requested} session(s). Record the payment first."
            ),
            e if e.is_user_correctable() => e.to_string(),
            _ => "Could not save. Please try again.".to_string(),
        }
    }
}

pub type LedgerResult<T> = Result<T, LedgerError>;
