use mongodb::Database;
use std::sync::Arc;
use std::time::Duration;

use crate::config::AppConfig;
use crate::services::mpesa_service::MpesaService;
use crate::services::receipt_service::{NotificationSink, RetryPolicy};

#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub config: Arc<AppConfig>,
    pub mpesa_service: Option<Arc<MpesaService>>,
    pub receipt_service: Option<Arc<dyn NotificationSink>>,
}

impl AppState {
    pub fn new(db: Database, config: Arc<AppConfig>) -> Self {
        AppState {
            db,
            config,
            mpesa_service: None,
            receipt_service: None,
        }
    }

    pub fn with_mpesa(mut self, mpesa_service: Arc<MpesaService>) -> Self {
        self.mpesa_service = Some(mpesa_service);
        self
    }

    pub fn with_receipts(mut self, receipt_service: Arc<dyn NotificationSink>) -> Self {
        self.receipt_service = Some(receipt_service);
        self
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.config.receipt_retry_attempts,
            backoff: Duration::from_secs(self.config.receipt_retry_backoff_secs),
        }
    }
}
