// services/receipt_service.rs
use async_trait::async_trait;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::errors::{AppError, Result};

#[derive(Debug, Clone)]
pub struct ReceiptDetails {
    pub receipt_number: String,
    pub amount: i64,
}

/// Payment-receipt notification collaborator. Delivery failures are the
/// sink's problem; the payment flow never blocks on or propagates them.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify_payment_receipt(&self, recipient: &str, details: &ReceiptDetails) -> Result<()>;
}

/// Bounded retry for the detached sender. Backoff grows linearly with the
/// attempt number.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        self.backoff * attempt
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 3,
            backoff: Duration::from_secs(5),
        }
    }
}

/// SMS receipt sender backed by Africa's Talking.
#[derive(Clone)]
pub struct ReceiptService {
    api_key: String,
    username: String,
    from: String,
    client: Client,
}

impl ReceiptService {
    pub fn new(api_key: String, username: String, from: String) -> Self {
        Self {
            api_key,
            username,
            from,
            client: Client::new(),
        }
    }
}

#[async_trait]
impl NotificationSink for ReceiptService {
    async fn notify_payment_receipt(&self, recipient: &str, details: &ReceiptDetails) -> Result<()> {
        let message = format!(
            "Payment of KSh {} received. M-Pesa receipt: {}. Thank you for shopping with us.",
            details.amount, details.receipt_number
        );

        let url = "https://api.africastalking.com/version1/messaging";

        let response = self
            .client
            .post(url)
            .header("apiKey", &self.api_key)
            .header("Accept", "application/json")
            .form(&[
                ("username", self.username.as_str()),
                ("to", recipient),
                ("message", message.as_str()),
                ("from", self.from.as_str()),
            ])
            .send()
            .await
            .map_err(|e| AppError::ExternalApi(format!("SMS API error: {}", e)))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(AppError::ExternalApi(format!(
                "SMS sending failed with status: {}",
                response.status()
            )))
        }
    }
}

/// Fire-and-forget dispatch: runs on its own task so settlement never waits
/// on the SMS provider.
pub fn spawn_receipt_notification(
    sink: Arc<dyn NotificationSink>,
    recipient: String,
    details: ReceiptDetails,
    policy: RetryPolicy,
) {
    tokio::spawn(async move {
        for attempt in 1..=policy.max_attempts {
            match sink.notify_payment_receipt(&recipient, &details).await {
                Ok(()) => {
                    info!("Receipt {} sent to {}", details.receipt_number, recipient);
                    return;
                }
                Err(e) if attempt < policy.max_attempts => {
                    warn!(
                        "Receipt notification attempt {}/{} failed: {}",
                        attempt, policy.max_attempts, e
                    );
                    tokio::time::sleep(policy.backoff_for(attempt)).await;
                }
                Err(e) => {
                    error!(
                        "Giving up on receipt {} for {} after {} attempts: {}",
                        details.receipt_number, recipient, policy.max_attempts, e
                    );
                }
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_with_attempt_number() {
        let policy = RetryPolicy {
            max_attempts: 3,
            backoff: Duration::from_secs(5),
        };
        assert_eq!(policy.backoff_for(1), Duration::from_secs(5));
        assert_eq!(policy.backoff_for(2), Duration::from_secs(10));
    }
}
