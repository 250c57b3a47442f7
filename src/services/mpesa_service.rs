// services/mpesa_service.rs
use base64::{engine::general_purpose::STANDARD as base64, Engine as _};
use chrono::Utc;
use reqwest::{header, Client};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{error, info};

use crate::config::AppConfig;
use crate::errors::{AppError, Result};

#[derive(Debug, Deserialize)]
pub struct AuthResponse {
    pub access_token: String,
    pub expires_in: String,
}

#[derive(Debug, Serialize)]
pub struct StkPushRequest {
    #[serde(rename = "BusinessShortCode")]
    pub business_short_code: String,
    #[serde(rename = "Password")]
    pub password: String,
    #[serde(rename = "Timestamp")]
    pub timestamp: String,
    #[serde(rename = "TransactionType")]
    pub transaction_type: String,
    #[serde(rename = "Amount")]
    pub amount: String,
    #[serde(rename = "PartyA")]
    pub party_a: String,
    #[serde(rename = "PartyB")]
    pub party_b: String,
    #[serde(rename = "PhoneNumber")]
    pub phone_number: String,
    #[serde(rename = "CallBackURL")]
    pub callback_url: String,
    #[serde(rename = "AccountReference")]
    pub account_reference: String,
    #[serde(rename = "TransactionDesc")]
    pub transaction_desc: String,
}

#[derive(Debug, Deserialize)]
pub struct StkPushResponse {
    #[serde(rename = "MerchantRequestID")]
    pub merchant_request_id: String,
    #[serde(rename = "CheckoutRequestID")]
    pub checkout_request_id: String,
    #[serde(rename = "ResponseCode")]
    pub response_code: String,
    #[serde(rename = "ResponseDescription")]
    pub response_description: String,
    #[serde(rename = "CustomerMessage")]
    pub customer_message: String,
}

#[derive(Debug, Clone)]
pub struct MpesaService {
    config: AppConfig,
    client: Client,
    cached_token: Arc<RwLock<Option<(String, chrono::DateTime<Utc>)>>>,
}

impl MpesaService {
    pub fn new(config: AppConfig) -> Self {
        // Bounded timeout: the push row is committed before this client is
        // ever used, so a gateway hang can only cost us the request.
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("Failed to create HTTP client");

        MpesaService {
            config,
            client,
            cached_token: Arc::new(RwLock::new(None)),
        }
    }

    fn format_phone_number(&self, phone: &str) -> String {
        let phone = phone.trim();
        if phone.starts_with("254") && phone.len() == 12 {
            return phone.to_string();
        }
        if phone.starts_with("07") && phone.len() == 10 {
            return format!("254{}", &phone[1..]);
        }
        if phone.starts_with("7") && phone.len() == 9 {
            return format!("254{}", phone);
        }
        phone.to_string()
    }

    fn generate_password(&self, timestamp: &str) -> String {
        let password_string = format!(
            "{}{}{}",
            self.config.mpesa_short_code, self.config.mpesa_passkey, timestamp
        );
        base64.encode(password_string)
    }

    pub async fn get_access_token(&self) -> Result<String> {
        {
            let cached = self.cached_token.read().unwrap();
            if let Some((token, expiry)) = cached.as_ref() {
                if *expiry > Utc::now() + chrono::Duration::minutes(5) {
                    return Ok(token.clone());
                }
            }
        }

        info!("Requesting new access token");
        let auth_string = format!(
            "{}:{}",
            self.config.mpesa_consumer_key, self.config.mpesa_consumer_secret
        );
        let encoded_auth = base64.encode(auth_string);

        let (auth_url, _) = self.config.get_mpesa_urls();

        let response = self
            .client
            .get(&auth_url)
            .header(header::AUTHORIZATION, format!("Basic {}", encoded_auth))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!("Failed to get access token: {} - {}", status, body);
            return Err(AppError::mpesa(format!("M-Pesa auth failed: {}", status)));
        }

        let auth_response: AuthResponse = response.json().await?;

        {
            let expiry_time = Utc::now() + chrono::Duration::hours(1);
            let mut cached = self.cached_token.write().unwrap();
            *cached = Some((auth_response.access_token.clone(), expiry_time));
        }

        info!("Access token obtained");
        Ok(auth_response.access_token)
    }

    pub async fn initiate_stk_push(&self, phone_number: &str, amount: i64) -> Result<StkPushResponse> {
        info!("STK push for {} - KSh {}", phone_number, amount);

        if amount <= 0 {
            return Err(AppError::invalid_data("Amount must be greater than 0"));
        }

        let access_token = self.get_access_token().await?;
        let formatted_phone = self.format_phone_number(phone_number);
        let timestamp = Utc::now().format("%Y%m%d%H%M%S").to_string();
        let password = self.generate_password(&timestamp);

        let (_, stk_url) = self.config.get_mpesa_urls();

        let stk_request = StkPushRequest {
            business_short_code: self.config.mpesa_short_code.clone(),
            password,
            timestamp,
            transaction_type: "CustomerPayBillOnline".to_string(),
            amount: amount.to_string(),
            party_a: formatted_phone.clone(),
            party_b: self.config.mpesa_short_code.clone(),
            phone_number: formatted_phone,
            callback_url: self.config.mpesa_callback_url.clone(),
            account_reference: self.config.mpesa_account_reference.clone(),
            transaction_desc: self.config.mpesa_transaction_desc.clone(),
        };

        let response = self
            .client
            .post(&stk_url)
            .header(header::AUTHORIZATION, format!("Bearer {}", access_token))
            .header(header::CONTENT_TYPE, "application/json")
            .json(&stk_request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!("STK push failed: {} - {}", status, body);
            return Err(AppError::mpesa(format!("STK push failed: {}", status)));
        }

        let stk_response: StkPushResponse = response.json().await?;

        if stk_response.response_code != "0" {
            error!(
                "STK push rejected: {} - {}",
                stk_response.response_code, stk_response.response_description
            );
            return Err(AppError::mpesa(format!(
                "STK push rejected: {}",
                stk_response.response_description
            )));
        }

        info!("STK push accepted: {}", stk_response.merchant_request_id);
        Ok(stk_response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> MpesaService {
        let config = AppConfig {
            mpesa_consumer_key: "key".to_string(),
            mpesa_consumer_secret: "secret".to_string(),
            mpesa_short_code: "174379".to_string(),
            mpesa_passkey: "passkey".to_string(),
            mpesa_callback_url: "https://example.com/api/payments/callback".to_string(),
            mpesa_environment: "sandbox".to_string(),
            mpesa_account_reference: "DukaOrders".to_string(),
            mpesa_transaction_desc: "Order payment".to_string(),
            mpesa_callback_secret: None,
            payment_timeout_secs: 100,
            sweep_interval_secs: 60,
            sms_api_key: String::new(),
            sms_username: "sandbox".to_string(),
            sms_from: "DukaShop".to_string(),
            receipt_retry_attempts: 3,
            receipt_retry_backoff_secs: 5,
            database_url: "mongodb://localhost:27017".to_string(),
            port: 3000,
            host: "0.0.0.0".to_string(),
        };
        MpesaService::new(config)
    }

    #[test]
    fn formats_local_phone_numbers_to_msisdn() {
        let service = service();
        assert_eq!(service.format_phone_number("0712345678"), "254712345678");
        assert_eq!(service.format_phone_number("712345678"), "254712345678");
        assert_eq!(service.format_phone_number("254712345678"), "254712345678");
        assert_eq!(service.format_phone_number(" 0712345678 "), "254712345678");
    }

    #[test]
    fn password_is_base64_of_shortcode_passkey_timestamp() {
        let service = service();
        let encoded = service.generate_password("20240101120000");
        let decoded = base64.decode(encoded).unwrap();
        assert_eq!(decoded, b"174379passkey20240101120000");
    }
}
