// services/timeout_sweeper.rs
use chrono::Utc;
use mongodb::Database;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::errors::Result;
use crate::models::transaction::TransactionStatus;
use crate::services::settlement_service::SettlementService;
use crate::services::transaction_service::TransactionService;

const TIMEOUT_RESULT_DESC: &str = "Payment request timed out before a gateway callback arrived";

/// Periodic job that fails PENDING transactions stuck past the timeout
/// window. Runs concurrently with the callback handler; each row is claimed
/// with the same conditional update the callback path uses, so a callback
/// landing mid-sweep simply wins or loses the row, never corrupts it.
pub struct TimeoutSweeper {
    transactions: TransactionService,
    settlement: SettlementService,
    window: chrono::Duration,
}

impl TimeoutSweeper {
    pub fn new(db: &Database, settlement: SettlementService, window: chrono::Duration) -> Self {
        TimeoutSweeper {
            transactions: TransactionService::new(db),
            settlement,
            window,
        }
    }

    /// One pass over the stale PENDING rows. Returns how many this pass
    /// finalized.
    pub async fn sweep_once(&self) -> Result<u64> {
        let cutoff = Utc::now() - self.window;
        let pending = self.transactions.find_pending().await?;

        let mut swept = 0u64;
        for txn in pending {
            if txn.created_at >= cutoff {
                continue;
            }
            let Some(id) = txn.id else {
                continue;
            };

            match self
                .transactions
                .finalize(
                    id,
                    TransactionStatus::Failed,
                    None,
                    Some(TIMEOUT_RESULT_DESC),
                    None,
                )
                .await
            {
                Ok(Some(finalized)) => {
                    swept += 1;
                    // A bad order must not abort the rest of the sweep.
                    if let Err(e) = self.settlement.revert_completion(&finalized).await {
                        warn!("Order revert failed for transaction {}: {}", id, e);
                    }
                }
                Ok(None) => {
                    // A callback finalized the row between the scan and now.
                }
                Err(e) => {
                    warn!("Failed to finalize stale transaction {}: {}", id, e);
                }
            }
        }

        if swept > 0 {
            info!("Timeout sweep finalized {} stale transactions", swept);
        }
        Ok(swept)
    }

    /// Runs the sweep forever on a fixed interval. Spawn this on its own
    /// task at startup.
    pub async fn run(self, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        // The first tick fires immediately; skip it so a restart does not
        // double-sweep alongside the previous process.
        ticker.tick().await;

        loop {
            ticker.tick().await;
            if let Err(e) = self.sweep_once().await {
                error!("Timeout sweep failed: {}", e);
            }
        }
    }
}
