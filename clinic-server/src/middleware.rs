use crate::error::ApiError;
use crate::server::ClinicServer;
use async_trait::async_trait;
use axum::{
    extract::{FromRequestParts, Request},
    http::{header, request::Parts, HeaderName, HeaderValue, Method},
    middleware::Next,
    response::Response,
};
use std::time::{Duration, Instant};
use credit_ledger::LedgerError;
use tower_http::cors::CorsLayer;
use tracing::warn;
use uuid::Uuid;

/// Header set by the upstream session layer with the selected professional
pub const PROFESSIONAL_HEADER: &str = "x-professional-id";

/// Header set by the upstream session layer with the signed-in user's role
pub const USER_ROLE_HEADER: &str = "x-user-role";

const ADMIN_ROLE: &str = "admin";

/// Professional the request acts for.
///
/// Authentication happens upstream; this reads the identity it forwards and
/// checks it against the registry. Unknown ids get 401, inactive ones 403.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProfessionalContext {
    pub professional_id: Uuid,
}

#[async_trait]
impl FromRequestParts<ClinicServer> for ProfessionalContext {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        server: &ClinicServer,
    ) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(PROFESSIONAL_HEADER)
            .and_then(|h| h.to_str().ok())
            .ok_or_else(|| ApiError::unauthorized("Missing X-Professional-Id header"))?;

        let professional_id = Uuid::parse_str(raw.trim())
            .map_err(|_| ApiError::unauthorized("X-Professional-Id is not a valid UUID"))?;

        match server.ledger.active_professional(professional_id).await {
            Ok(_) => Ok(Self { professional_id }),
            Err(LedgerError::NotFound { .. }) => Err(ApiError::unauthorized(
                "X-Professional-Id does not name a registered professional",
            )),
            Err(e) => Err(e.into()),
        }
    }
}

/// Clinic administrator, as forwarded by the upstream session layer.
///
/// Guards the professional registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdminContext;

#[async_trait]
impl<S> FromRequestParts<S> for AdminContext
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let role = parts
            .headers
            .get(USER_ROLE_HEADER)
            .and_then(|h| h.to_str().ok())
            .ok_or_else(|| ApiError::unauthorized("Missing X-User-Role header"))?;

        if role.trim().eq_ignore_ascii_case(ADMIN_ROLE) {
            Ok(Self)
        } else {
            Err(ApiError::forbidden("Only administrators manage professionals"))
        }
    }
}

/// Request timing middleware
pub async fn request_timing_middleware(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().clone();
    let uri = request.uri().clone();

    let response = next.run(request).await;

    tracing::info!(
        method = %method,
        uri = %uri,
        duration_ms = start.elapsed().as_millis(),
        status = response.status().as_u16(),
        "Request processed"
    );

    response
}

/// Create CORS layer for the application
pub fn create_cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::PATCH,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            header::ACCEPT,
            HeaderName::from_static(PROFESSIONAL_HEADER),
            HeaderName::from_static(USER_ROLE_HEADER),
        ])
        .max_age(Duration::from_secs(3600))
}
