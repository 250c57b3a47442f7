// models/transaction.rs
use chrono::{DateTime, Utc};
use mongodb::bson::oid::ObjectId;
use serde::{Deserialize, Serialize};

/// One STK push attempt. Rows are never deleted; a failed or timed-out
/// attempt stays behind as the audit trail for that push.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentTransaction {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,

    /// Weak reference: the order may be deleted independently of the ledger.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_id: Option<ObjectId>,

    pub phone_number: String,
    pub amount: i64,

    // Correlation ids issued by the gateway once it accepts the push.
    // Omitted (not null) while unset so the unique sparse indexes apply.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merchant_request_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkout_request_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mpesa_receipt_number: Option<String>,

    pub status: TransactionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_code: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_desc: Option<String>,

    /// Set once the row is resolved, whether by a gateway callback or by the
    /// timeout sweep. The name is historical; read it as "resolved".
    pub is_callback_received: bool,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PaymentTransaction {
    pub fn pending(order_id: ObjectId, phone_number: &str, amount: i64) -> Self {
        let now = Utc::now();
        PaymentTransaction {
            id: Some(ObjectId::new()),
            order_id: Some(order_id),
            phone_number: phone_number.to_string(),
            amount,
            merchant_request_id: None,
            checkout_request_id: None,
            mpesa_receipt_number: None,
            status: TransactionStatus::Pending,
            result_code: None,
            result_desc: None,
            is_callback_received: false,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
    Cancelled,
    Timeout,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "PENDING",
            TransactionStatus::Completed => "COMPLETED",
            TransactionStatus::Failed => "FAILED",
            TransactionStatus::Cancelled => "CANCELLED",
            TransactionStatus::Timeout => "TIMEOUT",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransactionStatus::Pending)
    }
}

// Daraja STK callback envelope. Deserialization is strict: a payload
// missing any required key is rejected before any state change.
#[derive(Debug, Deserialize)]
pub struct CallbackEnvelope {
    #[serde(rename = "Body")]
    pub body: CallbackBody,
}

#[derive(Debug, Deserialize)]
pub struct CallbackBody {
    #[serde(rename = "stkCallback")]
    pub stk_callback: StkCallback,
}

#[derive(Debug, Deserialize)]
pub struct StkCallback {
    #[serde(rename = "MerchantRequestID")]
    pub merchant_request_id: String,

    #[serde(rename = "CheckoutRequestID")]
    pub checkout_request_id: String,

    #[serde(rename = "ResultCode")]
    pub result_code: i64,

    #[serde(rename = "ResultDesc")]
    pub result_desc: String,

    // Present on success only.
    #[serde(rename = "CallbackMetadata", default)]
    pub callback_metadata: Option<CallbackMetadata>,
}

#[derive(Debug, Deserialize)]
pub struct CallbackMetadata {
    #[serde(rename = "Item")]
    pub items: Vec<MetadataItem>,
}

#[derive(Debug, Deserialize)]
pub struct MetadataItem {
    #[serde(rename = "Name")]
    pub name: String,

    #[serde(rename = "Value", default)]
    pub value: serde_json::Value,
}

impl StkCallback {
    pub fn metadata_value(&self, name: &str) -> Option<&serde_json::Value> {
        self.callback_metadata
            .as_ref()?
            .items
            .iter()
            .find(|item| item.name == name)
            .map(|item| &item.value)
    }

    pub fn receipt_number(&self) -> Option<String> {
        self.metadata_value("MpesaReceiptNumber")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn success_payload() -> &'static str {
        r#"{
            "Body": {
                "stkCallback": {
                    "MerchantRequestID": "29115-34620561-1",
                    "CheckoutRequestID": "ws_CO_191220191020363925",
                    "ResultCode": 0,
                    "ResultDesc": "The service request is processed successfully.",
                    "CallbackMetadata": {
                        "Item": [
                            {"Name": "Amount", "Value": 100},
                            {"Name": "MpesaReceiptNumber", "Value": "MPESAXYZ"},
                            {"Name": "Balance"},
                            {"Name": "TransactionDate", "Value": 20191219102115},
                            {"Name": "PhoneNumber", "Value": 254712345678}
                        ]
                    }
                }
            }
        }"#
    }

    #[test]
    fn parses_success_callback_with_receipt() {
        let envelope: CallbackEnvelope = serde_json::from_str(success_payload()).unwrap();
        let cb = envelope.body.stk_callback;

        assert_eq!(cb.merchant_request_id, "29115-34620561-1");
        assert_eq!(cb.checkout_request_id, "ws_CO_191220191020363925");
        assert_eq!(cb.result_code, 0);
        assert_eq!(cb.receipt_number().as_deref(), Some("MPESAXYZ"));
        assert_eq!(cb.metadata_value("Amount"), Some(&serde_json::json!(100)));
    }

    #[test]
    fn parses_failure_callback_without_metadata() {
        let payload = r#"{
            "Body": {
                "stkCallback": {
                    "MerchantRequestID": "29115-34620561-2",
                    "CheckoutRequestID": "ws_CO_191220191020363926",
                    "ResultCode": 1001,
                    "ResultDesc": "Insufficient funds."
                }
            }
        }"#;

        let envelope: CallbackEnvelope = serde_json::from_str(payload).unwrap();
        let cb = envelope.body.stk_callback;

        assert_eq!(cb.result_code, 1001);
        assert_eq!(cb.result_desc, "Insufficient funds.");
        assert!(cb.callback_metadata.is_none());
        assert!(cb.receipt_number().is_none());
    }

    #[test]
    fn rejects_callback_missing_result_code() {
        let payload = r#"{
            "Body": {
                "stkCallback": {
                    "MerchantRequestID": "29115-34620561-3",
                    "CheckoutRequestID": "ws_CO_191220191020363927",
                    "ResultDesc": "No code here"
                }
            }
        }"#;

        assert!(serde_json::from_str::<CallbackEnvelope>(payload).is_err());
    }

    #[test]
    fn rejects_callback_missing_envelope() {
        assert!(serde_json::from_str::<CallbackEnvelope>(r#"{"Body": {}}"#).is_err());
    }

    #[test]
    fn status_serializes_as_uppercase() {
        let json = serde_json::to_string(&TransactionStatus::Pending).unwrap();
        assert_eq!(json, "\"PENDING\"");

        let parsed: TransactionStatus = serde_json::from_str("\"COMPLETED\"").unwrap();
        assert_eq!(parsed, TransactionStatus::Completed);
    }

    #[test]
    fn only_pending_is_non_terminal() {
        assert!(!TransactionStatus::Pending.is_terminal());
        assert!(TransactionStatus::Completed.is_terminal());
        assert!(TransactionStatus::Failed.is_terminal());
        assert!(TransactionStatus::Cancelled.is_terminal());
        assert!(TransactionStatus::Timeout.is_terminal());
    }

    #[test]
    fn pending_row_starts_unresolved() {
        let txn = PaymentTransaction::pending(ObjectId::new(), "254712345678", 100);
        assert_eq!(txn.status, TransactionStatus::Pending);
        assert!(!txn.is_callback_received);
        assert!(txn.merchant_request_id.is_none());
        assert!(txn.checkout_request_id.is_none());
    }
}
