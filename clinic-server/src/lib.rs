//! Clinic Server - HTTP API over the credit ledger
//!
//! Exposes patient administration, payment recording, credit balances and
//! appointment scheduling to the clinic UI. Authentication is handled
//! upstream; requests carry the acting professional in `X-Professional-Id`.

pub mod config;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod routes;
pub mod server;

// Re-export commonly used types
pub use config::ServerConfig;
pub use error::*;
pub use server::ClinicServer;

use axum::{middleware::from_fn, Router};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

/// Create the main application router with all routes and middleware
pub fn create_app(server: ClinicServer) -> Router {
    let cors = middleware::create_cors_layer(&server.config.allowed_origins);

    routes::create_routes()
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors)
                .layer(from_fn(middleware::request_timing_middleware)),
        )
        .with_state(server)
}
