use super::{owned_patient, AppJson};
use crate::error::{api_success, ApiError, ApiResponse, ApiResult};
use crate::middleware::ProfessionalContext;
use crate::server::ClinicServer;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::NaiveDate;
use credit_ledger::{
    NewPayment, Payment, PaymentMethod, PaymentStatus, RecordedPayment, ServiceType,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct UpdatePaymentRequest {
    pub amount: Decimal,
    pub date: NaiveDate,
    pub status: PaymentStatus,
    pub service_type: ServiceType,
    pub method: Option<PaymentMethod>,
    pub notes: Option<String>,
}

pub async fn list_payments(
    State(server): State<ClinicServer>,
    ctx: ProfessionalContext,
) -> ApiResult<Json<ApiResponse<Vec<Payment>>>> {
    let payments = server.ledger.list_payments(ctx.professional_id).await?;
    Ok(Json(api_success(payments)))
}

/// Record a payment; a Paid one issues its credit grant in the same call
pub async fn record_payment(
    State(server): State<ClinicServer>,
    ctx: ProfessionalContext,
    AppJson(request): AppJson<NewPayment>,
) -> ApiResult<(StatusCode, Json<ApiResponse<RecordedPayment>>)> {
    owned_patient(&server, ctx, request.patient_id).await?;
    let recorded = server.ledger.record_payment(request).await?;
    Ok((StatusCode::CREATED, Json(api_success(recorded))))
}

pub async fn update_payment(
    State(server): State<ClinicServer>,
    ctx: ProfessionalContext,
    Path(payment_id): Path<Uuid>,
    AppJson(request): AppJson<UpdatePaymentRequest>,
) -> ApiResult<Json<ApiResponse<RecordedPayment>>> {
    let existing = server.ledger.get_payment(payment_id).await?;
    if existing.professional_id != ctx.professional_id {
        return Err(ApiError::not_found("payment"));
    }

    let recorded = server
        .ledger
        .update_payment(Payment {
            amount: request.amount,
            date: request.date,
            status: request.status,
            service_type: request.service_type,
            method: request.method,
            notes: request.notes,
            ..existing
        })
        .await?;
    Ok(Json(api_success(recorded)))
}
