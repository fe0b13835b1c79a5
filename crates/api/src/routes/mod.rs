//! HTTP routes

pub mod admin;
pub mod billing;
pub mod webhooks;

use axum::middleware;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;

use crate::auth::require_auth;
use crate::state::AppState;

pub fn create_router(state: AppState) -> Router {
    let authenticated = Router::new()
        .route("/api/billing/checkout", post(billing::create_checkout))
        .route("/api/billing/portal", post(billing::create_portal))
        .route("/api/billing/subscription", get(billing::get_subscription))
        .route("/api/billing/entitlement", get(billing::get_entitlement))
        .route(
            "/api/admin/users/{id}/subscription",
            get(admin::get_user_subscription).put(admin::update_user_subscription),
        )
        .route(
            "/api/admin/billing/invariants",
            get(admin::run_invariant_checks),
        )
        .layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .route("/health", get(health))
        // Webhook endpoint authenticates via signature, not bearer token
        .route("/api/webhooks/stripe", post(webhooks::stripe_webhook))
        .merge(authenticated)
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}
