use crate::{
    handlers::{appointments, credits, health, patients, payments, professionals, reports},
    server::ClinicServer,
};
use axum::{
    routing::{get, patch, post, put},
    Router,
};

/// Create health check routes
pub fn health_routes() -> Router<ClinicServer> {
    Router::new().route("/health", get(health::health_check))
}

/// Professional registry (administrators) and the caller's own entry
pub fn professional_routes() -> Router<ClinicServer> {
    Router::new()
        .route(
            "/professionals",
            get(professionals::list_professionals).post(professionals::create_professional),
        )
        .route("/professionals/me", get(professionals::current_professional))
        .route(
            "/professionals/:id",
            get(professionals::get_professional)
                .put(professionals::update_professional)
                .delete(professionals::delete_professional),
        )
        .route(
            "/professionals/:id/status",
            patch(professionals::set_professional_status),
        )
}

/// Patient administration plus per-patient ledger views
pub fn patient_routes() -> Router<ClinicServer> {
    Router::new()
        .route(
            "/patients",
            get(patients::list_patients).post(patients::create_patient),
        )
        .route(
            "/patients/:id",
            get(patients::get_patient)
                .put(patients::update_patient)
                .delete(patients::delete_patient),
        )
        .route("/patients/:id/status", patch(patients::set_patient_status))
        .route("/patients/:id/credits", get(credits::credit_balance))
        .route("/patients/:id/grants", get(credits::patient_grants))
        .route("/patients/:id/history", get(reports::patient_history))
        .route("/patients/:id/insight", post(reports::patient_insight))
}

pub fn payment_routes() -> Router<ClinicServer> {
    Router::new()
        .route(
            "/payments",
            get(payments::list_payments).post(payments::record_payment),
        )
        .route("/payments/:id", put(payments::update_payment))
}

pub fn appointment_routes() -> Router<ClinicServer> {
    Router::new()
        .route(
            "/appointments",
            get(appointments::list_appointments).post(appointments::create_appointments),
        )
        .route("/appointments/pending", get(reports::pending_appointments))
        .route("/appointments/:id", patch(appointments::edit_appointment))
        .route("/appointments/:id/status", patch(appointments::update_status))
        .route("/appointments/:id/cancel", post(appointments::cancel_appointment))
        .route(
            "/appointments/:id/reschedule",
            post(appointments::reschedule_appointment),
        )
}

/// Dashboard, receipts and clinical history reporting
pub fn report_routes() -> Router<ClinicServer> {
    Router::new()
        .route("/reports/financial", get(reports::financial_summary))
        .route("/reports/patients", get(reports::history_patients))
        .route("/alerts/low-balance", get(reports::low_balance_alerts))
}

/// Integrity passes over the caller's records; `clinic-server maintenance` covers the whole store
pub fn maintenance_routes() -> Router<ClinicServer> {
    Router::new()
        .route("/maintenance/reconcile", post(credits::run_reconciliation))
        .route("/maintenance/expire-grants", post(credits::expire_grants))
}

/// Create API v1 routes
pub fn api_v1_routes() -> Router<ClinicServer> {
    Router::new()
        .merge(professional_routes())
        .merge(patient_routes())
        .merge(payment_routes())
        .merge(appointment_routes())
        .merge(report_routes())
        .merge(maintenance_routes())
}

/// Create all application routes
pub fn create_routes() -> Router<ClinicServer> {
    Router::new()
        .merge(health_routes())
        .nest("/api/v1", api_v1_routes())
}
