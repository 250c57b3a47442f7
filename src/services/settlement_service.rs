// services/settlement_service.rs
use chrono::{SecondsFormat, Utc};
use mongodb::{bson::doc, options::ReturnDocument, Collection, Database};
use std::sync::Arc;
use tracing::{info, warn};

use crate::errors::Result;
use crate::models::order::Order;
use crate::models::transaction::PaymentTransaction;
use crate::services::receipt_service::{
    spawn_receipt_notification, NotificationSink, ReceiptDetails, RetryPolicy,
};

/// Propagates a finalized payment outcome to the owning order. Runs after
/// the transaction row has been finalized; the conditional update on the
/// order makes the completion itself at-most-once.
#[derive(Clone)]
pub struct SettlementService {
    orders: Collection<Order>,
    sink: Option<Arc<dyn NotificationSink>>,
    retry: RetryPolicy,
}

impl SettlementService {
    pub fn new(db: &Database, sink: Option<Arc<dyn NotificationSink>>, retry: RetryPolicy) -> Self {
        SettlementService {
            orders: db.collection("orders"),
            sink,
            retry,
        }
    }

    /// Marks the linked order complete and stamps the receipt number, then
    /// queues the receipt SMS. A transaction without an order (the order was
    /// deleted after checkout) settles as a no-op.
    pub async fn settle_completed(&self, txn: &PaymentTransaction) -> Result<()> {
        let Some(order_id) = txn.order_id else {
            warn!("Completed transaction {:?} has no linked order", txn.id);
            return Ok(());
        };
        let receipt_number = txn.mpesa_receipt_number.clone().unwrap_or_default();

        let updated = self
            .orders
            .find_one_and_update(
                doc! { "_id": order_id, "is_complete": false },
                doc! { "$set": {
                    "is_complete": true,
                    "transaction_ref": &receipt_number,
                    "updated_at": Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true),
                }},
            )
            .return_document(ReturnDocument::After)
            .await?;

        let Some(order) = updated else {
            // Already complete, or deleted since the push was initiated.
            info!("Order {} not settled (missing or already complete)", order_id);
            return Ok(());
        };

        info!("Order {} settled with receipt {}", order_id, receipt_number);

        if let Some(sink) = &self.sink {
            spawn_receipt_notification(
                sink.clone(),
                order.customer_phone.clone(),
                ReceiptDetails {
                    receipt_number,
                    amount: txn.amount,
                },
                self.retry,
            );
        }

        Ok(())
    }

    /// Timeout path: force the order back to incomplete so a stale optimistic
    /// completion never survives a payment that was never confirmed.
    pub async fn revert_completion(&self, txn: &PaymentTransaction) -> Result<()> {
        let Some(order_id) = txn.order_id else {
            return Ok(());
        };

        let result = self
            .orders
            .update_one(
                doc! { "_id": order_id },
                doc! { "$set": {
                    "is_complete": false,
                    "updated_at": Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true),
                }},
            )
            .await?;

        if result.matched_count == 0 {
            warn!("Order {} no longer exists, skipping revert", order_id);
        }

        Ok(())
    }
}
