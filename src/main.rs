use axum::extract::State;
use axum::{http::Method, response::Json, routing::get, Router};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

mod config;
mod database;
mod errors;
mod handlers;
mod models;
mod routes;
mod services;
mod state;

use config::AppConfig;
use database::connection::{ensure_indexes, get_db_client};
use services::mpesa_service::MpesaService;
use services::receipt_service::ReceiptService;
use services::settlement_service::SettlementService;
use services::timeout_sweeper::TimeoutSweeper;
use state::AppState;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let config = Arc::new(AppConfig::from_env());

    let db = get_db_client(&config.database_url).await;
    ensure_indexes(&db).await;

    let app_state = initialize_app_state(db.clone(), config.clone()).await;
    spawn_timeout_sweeper(&db, &app_state);

    let app = build_router(app_state).await;
    start_server(app, &config).await;
}

async fn initialize_app_state(db: mongodb::Database, config: Arc<AppConfig>) -> AppState {
    let mut app_state = AppState::new(db, config.clone());

    tracing::info!("🔧 Initializing M-Pesa service...");
    tracing::info!("📱 Short code: {}", config.mpesa_short_code);
    tracing::info!(
        "🌐 Environment: {} (production: {})",
        config.mpesa_environment,
        config.is_production()
    );

    let mpesa_service = Arc::new(MpesaService::new((*config).clone()));

    // Probe the credentials up front so a misconfigured deployment fails
    // loudly at boot rather than on the first checkout.
    match mpesa_service.get_access_token().await {
        Ok(_) => {
            tracing::info!("✅ M-Pesa service initialized and ready");
            app_state = app_state.with_mpesa(mpesa_service);
        }
        Err(e) => {
            tracing::error!("❌ Failed to get M-Pesa access token: {}", e);
            tracing::warn!("M-Pesa service will be disabled");
        }
    }

    let receipt_service = Arc::new(ReceiptService::new(
        config.sms_api_key.clone(),
        config.sms_username.clone(),
        config.sms_from.clone(),
    ));
    tracing::info!("✅ Receipt notification service initialized");

    app_state.with_receipts(receipt_service)
}

fn spawn_timeout_sweeper(db: &mongodb::Database, app_state: &AppState) {
    // The sweeper reverts orders, it never sends receipts, so it gets no
    // notification sink.
    let settlement = SettlementService::new(db, None, app_state.retry_policy());
    let sweeper = TimeoutSweeper::new(db, settlement, app_state.config.payment_timeout());
    let interval = app_state.config.sweep_interval();

    tokio::spawn(sweeper.run(interval));
    tracing::info!("⏱️ Timeout sweeper running every {:?}", interval);
}

async fn build_router(app_state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any)
        .allow_credentials(false);

    Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_check))
        .route("/api/health", get(api_health_check))
        .nest("/api/payments", routes::payments::payment_routes())
        .nest("/api/orders", routes::orders::order_routes())
        .layer(cors)
        .with_state(app_state)
}

async fn start_server(app: Router, config: &AppConfig) {
    let addr = format!("{}:{}", config.host, config.port);

    tracing::info!("🚀 Server starting on {}", addr);

    match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => {
            axum::serve(listener, app).await.unwrap();
        }
        Err(e) => {
            tracing::error!("Failed to bind to {}: {}", addr, e);
            std::process::exit(1);
        }
    }
}

async fn root_handler() -> &'static str {
    "🛒 Duka E-Commerce API"
}

async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

async fn api_health_check(State(state): State<AppState>) -> Json<Value> {
    use mongodb::bson::doc;

    let db_status = match state.db.run_command(doc! {"ping": 1}).await {
        Ok(_) => "connected",
        Err(_) => "disconnected",
    };

    Json(json!({
        "status": "healthy",
        "database": db_status,
        "mpesa": state.mpesa_service.is_some(),
        "receipts": state.receipt_service.is_some(),
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}
