// config.rs
use std::env;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub mpesa_consumer_key: String,
    pub mpesa_consumer_secret: String,
    pub mpesa_short_code: String,
    pub mpesa_passkey: String,
    pub mpesa_callback_url: String,
    pub mpesa_environment: String,
    pub mpesa_account_reference: String,
    pub mpesa_transaction_desc: String,
    // Shared secret the gateway must echo back on the callback URL. The
    // upstream Daraja API does not sign callbacks, so this is the only
    // check available short of IP allowlisting.
    pub mpesa_callback_secret: Option<String>,
    pub payment_timeout_secs: u64,
    pub sweep_interval_secs: u64,
    pub sms_api_key: String,
    pub sms_username: String,
    pub sms_from: String,
    pub receipt_retry_attempts: u32,
    pub receipt_retry_backoff_secs: u64,
    pub database_url: String,
    pub port: u16,
    pub host: String,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let mpesa_environment =
            env::var("MPESA_ENVIRONMENT").unwrap_or_else(|_| "sandbox".to_string());

        AppConfig {
            mpesa_consumer_key: env::var("MPESA_CONSUMER_KEY")
                .expect("MPESA_CONSUMER_KEY must be set"),
            mpesa_consumer_secret: env::var("MPESA_CONSUMER_SECRET")
                .expect("MPESA_CONSUMER_SECRET must be set"),
            mpesa_short_code: env::var("MPESA_SHORT_CODE")
                .expect("MPESA_SHORT_CODE must be set"),
            mpesa_passkey: env::var("MPESA_PASSKEY")
                .expect("MPESA_PASSKEY must be set"),
            mpesa_callback_url: env::var("MPESA_CALLBACK_URL")
                .expect("MPESA_CALLBACK_URL must be set"),
            mpesa_environment,
            mpesa_account_reference: env::var("MPESA_ACCOUNT_REFERENCE")
                .unwrap_or_else(|_| "DukaOrders".to_string()),
            mpesa_transaction_desc: env::var("MPESA_TRANSACTION_DESC")
                .unwrap_or_else(|_| "Order payment".to_string()),
            mpesa_callback_secret: env::var("MPESA_CALLBACK_SECRET").ok(),
            payment_timeout_secs: env::var("PAYMENT_TIMEOUT_SECS")
                .unwrap_or_else(|_| "100".to_string())
                .parse()
                .expect("PAYMENT_TIMEOUT_SECS must be a number"),
            sweep_interval_secs: env::var("SWEEP_INTERVAL_SECS")
                .unwrap_or_else(|_| "60".to_string())
                .parse()
                .expect("SWEEP_INTERVAL_SECS must be a number"),
            sms_api_key: env::var("SMS_API_KEY").unwrap_or_default(),
            sms_username: env::var("SMS_USERNAME").unwrap_or_else(|_| "sandbox".to_string()),
            sms_from: env::var("SMS_FROM").unwrap_or_else(|_| "DukaShop".to_string()),
            receipt_retry_attempts: env::var("RECEIPT_RETRY_ATTEMPTS")
                .unwrap_or_else(|_| "3".to_string())
                .parse()
                .expect("RECEIPT_RETRY_ATTEMPTS must be a number"),
            receipt_retry_backoff_secs: env::var("RECEIPT_RETRY_BACKOFF_SECS")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .expect("RECEIPT_RETRY_BACKOFF_SECS must be a number"),
            database_url: env::var("DATABASE_URL")
                .expect("DATABASE_URL must be set"),
            port: env::var("PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()
                .expect("PORT must be a number"),
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
        }
    }

    pub fn get_mpesa_urls(&self) -> (String, String) {
        let base_url = if self.is_production() {
            "https://api.safaricom.co.ke"
        } else {
            "https://sandbox.safaricom.co.ke"
        };

        let auth_url = format!("{}/oauth/v1/generate?grant_type=client_credentials", base_url);
        let stk_url = format!("{}/mpesa/stkpush/v1/processrequest", base_url);

        (auth_url, stk_url)
    }

    pub fn is_production(&self) -> bool {
        self.mpesa_environment == "production"
    }

    pub fn payment_timeout(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.payment_timeout_secs as i64)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}
