// services/transaction_service.rs
use chrono::{SecondsFormat, Utc};
use futures_util::TryStreamExt;
use mongodb::{
    bson::{doc, oid::ObjectId},
    options::ReturnDocument,
    Collection, Database,
};
use tracing::info;

use crate::errors::Result;
use crate::models::transaction::{PaymentTransaction, TransactionStatus};

/// All writes to the `transactions` collection go through here. Every
/// terminal transition is a single conditional update filtered on PENDING,
/// so a callback and a timeout sweep racing for the same row can never both
/// win: the loser's update matches zero documents.
#[derive(Clone)]
pub struct TransactionService {
    collection: Collection<PaymentTransaction>,
}

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

impl TransactionService {
    pub fn new(db: &Database) -> Self {
        TransactionService {
            collection: db.collection("transactions"),
        }
    }

    /// Inserts the audit row for one push attempt. Committed before the
    /// gateway is called so a hung request never loses the record.
    pub async fn create_pending(
        &self,
        order_id: ObjectId,
        phone_number: &str,
        amount: i64,
    ) -> Result<ObjectId> {
        let id = ObjectId::new();
        let mut txn = PaymentTransaction::pending(order_id, phone_number, amount);
        txn.id = Some(id);
        self.collection.insert_one(&txn).await?;

        info!("Created PENDING transaction {} for order {}", id, order_id);
        Ok(id)
    }

    /// Records the gateway-issued correlation ids. Status stays PENDING.
    pub async fn set_correlation_ids(
        &self,
        id: ObjectId,
        merchant_request_id: &str,
        checkout_request_id: &str,
    ) -> Result<()> {
        self.collection
            .update_one(
                doc! { "_id": id },
                doc! { "$set": {
                    "merchant_request_id": merchant_request_id,
                    "checkout_request_id": checkout_request_id,
                    "updated_at": now_rfc3339(),
                }},
            )
            .await?;
        Ok(())
    }

    /// Applies a terminal transition for the callback and sweeper paths.
    /// Returns the finalized row if this call won the transition, `None` if
    /// the row was already terminal (duplicate callback, lost race).
    pub async fn finalize(
        &self,
        id: ObjectId,
        status: TransactionStatus,
        result_code: Option<i64>,
        result_desc: Option<&str>,
        mpesa_receipt_number: Option<&str>,
    ) -> Result<Option<PaymentTransaction>> {
        let mut set = doc! {
            "status": status.as_str(),
            "is_callback_received": true,
            "updated_at": now_rfc3339(),
        };
        if let Some(code) = result_code {
            set.insert("result_code", code);
        }
        if let Some(desc) = result_desc {
            set.insert("result_desc", desc);
        }
        if let Some(receipt) = mpesa_receipt_number {
            set.insert("mpesa_receipt_number", receipt);
        }

        let finalized = self
            .collection
            .find_one_and_update(
                doc! { "_id": id, "status": TransactionStatus::Pending.as_str() },
                doc! { "$set": set },
            )
            .return_document(ReturnDocument::After)
            .await?;

        Ok(finalized)
    }

    /// Terminal transition for a push whose gateway call failed outright.
    /// No callback will ever arrive for the row, so the resolved marker
    /// stays false.
    pub async fn fail_before_callback(&self, id: ObjectId, result_desc: &str) -> Result<()> {
        self.collection
            .update_one(
                doc! { "_id": id, "status": TransactionStatus::Pending.as_str() },
                doc! { "$set": {
                    "status": TransactionStatus::Failed.as_str(),
                    "result_desc": result_desc,
                    "updated_at": now_rfc3339(),
                }},
            )
            .await?;
        Ok(())
    }

    pub async fn find_by_merchant_request_id(
        &self,
        merchant_request_id: &str,
    ) -> Result<Option<PaymentTransaction>> {
        let txn = self
            .collection
            .find_one(doc! { "merchant_request_id": merchant_request_id })
            .await?;
        Ok(txn)
    }

    pub async fn find_by_checkout_request_id(
        &self,
        checkout_request_id: &str,
    ) -> Result<Option<PaymentTransaction>> {
        let txn = self
            .collection
            .find_one(doc! { "checkout_request_id": checkout_request_id })
            .await?;
        Ok(txn)
    }

    pub async fn find_pending(&self) -> Result<Vec<PaymentTransaction>> {
        let cursor = self
            .collection
            .find(doc! { "status": TransactionStatus::Pending.as_str() })
            .await?;
        let pending: Vec<PaymentTransaction> = cursor.try_collect().await?;
        Ok(pending)
    }

    pub async fn list_recent(&self, limit: usize) -> Result<Vec<PaymentTransaction>> {
        let cursor = self.collection.find(doc! {}).await?;
        let mut transactions: Vec<PaymentTransaction> = cursor.try_collect().await?;

        transactions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        transactions.truncate(limit);
        Ok(transactions)
    }

    pub async fn stats(&self) -> Result<serde_json::Value> {
        let total = self.collection.count_documents(doc! {}).await?;

        let mut by_status = serde_json::Map::new();
        for status in [
            TransactionStatus::Pending,
            TransactionStatus::Completed,
            TransactionStatus::Failed,
            TransactionStatus::Cancelled,
            TransactionStatus::Timeout,
        ] {
            let count = self
                .collection
                .count_documents(doc! { "status": status.as_str() })
                .await?;
            by_status.insert(status.as_str().to_lowercase(), count.into());
        }

        Ok(serde_json::json!({
            "total": total,
            "by_status": by_status,
        }))
    }
}
