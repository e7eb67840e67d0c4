use super::{owned_patient, AppQuery};
use crate::error::{api_success, ApiResponse, ApiResult};
use crate::middleware::ProfessionalContext;
use crate::server::ClinicServer;
use axum::{
    extract::{Path, State},
    Json,
};
use chrono::Utc;
use credit_ledger::{
    Appointment, FinancialSummary, LowBalanceAlert, Patient, PatientHistory, ReportPeriod,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Default, Deserialize)]
pub struct FinancialParams {
    #[serde(default)]
    pub period: ReportPeriod,
}

#[derive(Debug, Default, Deserialize)]
pub struct HistorySearchParams {
    pub search: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct InsightResponse {
    pub patient_id: Uuid,
    pub insight: String,
}

pub async fn financial_summary(
    State(server): State<ClinicServer>,
    ctx: ProfessionalContext,
    AppQuery(params): AppQuery<FinancialParams>,
) -> ApiResult<Json<ApiResponse<FinancialSummary>>> {
    let summary = server
        .ledger
        .financial_summary(ctx.professional_id, params.period, Utc::now().date_naive())
        .await?;
    Ok(Json(api_success(summary)))
}

pub async fn low_balance_alerts(
    State(server): State<ClinicServer>,
    ctx: ProfessionalContext,
) -> ApiResult<Json<ApiResponse<Vec<LowBalanceAlert>>>> {
    let alerts = server.ledger.low_balance_alerts(ctx.professional_id).await?;
    Ok(Json(api_success(alerts)))
}

pub async fn pending_appointments(
    State(server): State<ClinicServer>,
    ctx: ProfessionalContext,
) -> ApiResult<Json<ApiResponse<Vec<Appointment>>>> {
    let pending = server
        .ledger
        .pending_appointments(ctx.professional_id)
        .await?;
    Ok(Json(api_success(pending)))
}

/// Active patients for the history report
pub async fn history_patients(
    State(server): State<ClinicServer>,
    ctx: ProfessionalContext,
    AppQuery(params): AppQuery<HistorySearchParams>,
) -> ApiResult<Json<ApiResponse<Vec<Patient>>>> {
    let patients = server
        .ledger
        .history_patients(ctx.professional_id, params.search.as_deref())
        .await?;
    Ok(Json(api_success(patients)))
}

/// Non-cancelled sessions, newest first, with the engagement rate
pub async fn patient_history(
    State(server): State<ClinicServer>,
    ctx: ProfessionalContext,
    Path(patient_id): Path<Uuid>,
) -> ApiResult<Json<ApiResponse<PatientHistory>>> {
    owned_patient(&server, ctx, patient_id).await?;
    let history = server.ledger.patient_history(patient_id).await?;
    Ok(Json(api_success(history)))
}

/// Free-text clinical insight; a provider failure still answers 200 with an apology
pub async fn patient_insight(
    State(server): State<ClinicServer>,
    ctx: ProfessionalContext,
    Path(patient_id): Path<Uuid>,
) -> ApiResult<Json<ApiResponse<InsightResponse>>> {
    owned_patient(&server, ctx, patient_id).await?;
    let insight = server.ledger.generate_insight(patient_id).await?;
    Ok(Json(api_success(InsightResponse {
        patient_id,
        insight,
    })))
}
