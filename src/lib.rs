pub mod adapters;
pub mod cli;
pub mod config;
pub mod db;
pub mod domain;
pub mod error;
pub mod gateway;
pub mod handlers;
pub mod middleware;
pub mod ports;
pub mod services;
pub mod startup;
pub mod validation;

use axum::{
    http::{HeaderValue, Method},
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use crate::gateway::PaymentGateway;
use crate::ports::EscrowRepository;
use crate::services::{EscrowTracker, PayoutAccountService};

#[derive(Clone)]
pub struct AppState {
    pub tracker: Arc<EscrowTracker>,
    pub payouts: Arc<PayoutAccountService>,
    pub store: Arc<dyn EscrowRepository>,
    pub gateway: Arc<dyn PaymentGateway>,
    pub admin_api_key: Arc<str>,
    pub webhook_secret: Arc<str>,
}

pub fn create_app(state: AppState, cors_allowed_origins: Option<&str>) -> Router {
    let admin_routes = Router::new()
        .route(
            "/escrow/auto-release",
            post(handlers::admin::run_auto_release),
        )
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::auth::admin_auth,
        ));

    let router = Router::new()
        .route("/health", get(handlers::health))
        .route("/escrow/accounts", post(handlers::escrow::create_account))
        .route(
            "/escrow/accounts/status",
            get(handlers::escrow::account_status),
        )
        .route(
            "/escrow/transactions",
            post(handlers::escrow::create_transaction).get(handlers::escrow::list_transactions),
        )
        .route(
            "/escrow/transactions/:id",
            get(handlers::escrow::get_transaction),
        )
        .route(
            "/escrow/transactions/:id/confirm",
            post(handlers::escrow::confirm_transaction),
        )
        .route(
            "/escrow/transactions/:id/release",
            post(handlers::escrow::release_transaction),
        )
        .route(
            "/escrow/transactions/:id/refund",
            post(handlers::escrow::refund_transaction),
        )
        .route("/webhooks/gateway", post(handlers::webhook::gateway_event))
        .nest("/admin", admin_routes)
        .layer(axum::middleware::from_fn(
            middleware::request_logger::request_logger_middleware,
        ))
        .with_state(state);

    match cors_allowed_origins.map(cors_layer) {
        Some(cors) => router.layer(cors),
        None => router,
    }
}

fn cors_layer(raw: &str) -> CorsLayer {
    let origins: Vec<HeaderValue> = config::parse_origins(raw)
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(tower_http::cors::Any)
}
