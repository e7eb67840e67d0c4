//! Session-credit ledger and scheduling-consistency engine
//!
//! Tracks prepaid session credits for clinic patients:
//! - Credit grants issued exactly once per paid payment
//! - Derived balances per service type (no stored remaining counter)
//! - Atomic, over-booking-safe appointment creation
//! - Status lifecycle with credit-neutral rescheduling
//! - Reconciliation of paid payments left without a grant
//! - Professional registry gating who may act on the ledger
//! - Usage, dashboard, receipts and per-patient history reporting

pub mod bridge;
pub mod config;
pub mod error;
pub mod insight;
pub mod ledger;
pub mod models;
pub mod reconciliation;
pub mod reporting;
pub mod repository;
pub mod scheduler;
pub mod service;

pub use bridge::{CreditBridge, GrantOutcome};
pub use config::LedgerConfig;
pub use error::{LedgerError, LedgerResult};
pub use insight::{GeminiInsightProvider, InsightConfig, InsightProvider, InsightService};
pub use ledger::{available_credits, plan_booking, BookingRequest};
pub use models::*;
pub use reconciliation::{Reconciler, ReconciliationReport};
pub use reporting::{FinancialSummary, GrantUsage, LowBalanceAlert, PatientHistory, ReportPeriod};
pub use repository::{InMemoryLedgerRepository, LedgerRepository, PostgresLedgerRepository};
pub use scheduler::AppointmentScheduler;
pub use service::{ClinicLedger, CreditBalance, GrantWithUsage, OperationOutcome, RecordedPayment};
