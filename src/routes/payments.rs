use axum::{
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde_json::json;

use crate::handlers::payment_handlers;
use crate::state::AppState;

pub fn payment_routes() -> Router<AppState> {
    Router::new()
        // Health
        .route("/health", get(payments_health))
        // Push + webhook
        .route("/stk-push", post(payment_handlers::initiate_stk_push))
        .route("/callback", post(payment_handlers::mpesa_callback))
        // Payment status check endpoint (POST for frontend polling)
        .route("/check-payment-status", post(payment_handlers::check_payment_status))
        // Status (GET with query params)
        .route("/status", get(payment_handlers::check_transaction_status))
        .route("/transactions", get(payment_handlers::get_transactions))
        .route("/stats", get(payment_handlers::get_stats))
}

async fn payments_health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": "payments",
        "timestamp": Utc::now().to_rfc3339(),
        "features": ["stk-push", "callback", "timeout-sweep", "payment-status-check"]
    }))
}
