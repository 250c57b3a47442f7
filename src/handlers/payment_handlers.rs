// handlers/payment_handlers.rs
use axum::{
    extract::{Json, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use mongodb::{
    bson::{doc, oid::ObjectId},
    Collection,
};
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info, warn};

use crate::errors::{AppError, Result};
use crate::models::order::Order;
use crate::models::transaction::{CallbackEnvelope, StkCallback, TransactionStatus};
use crate::services::settlement_service::SettlementService;
use crate::services::transaction_service::TransactionService;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct StkPushRequest {
    pub phone_number: String,
    pub order_id: String,
}

#[derive(Debug, Deserialize)]
pub struct CallbackAuthQuery {
    pub token: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PaymentStatusRequest {
    pub checkout_request_id: String,
}

#[derive(Debug, Deserialize)]
pub struct StatusQuery {
    pub checkout_request_id: Option<String>,
    pub merchant_request_id: Option<String>,
}

/// Starts a push for an order's total. The PENDING row is committed before
/// the gateway call; a gateway failure leaves it behind as FAILED so every
/// attempt is accounted for.
pub async fn initiate_stk_push(
    State(state): State<AppState>,
    Json(request): Json<StkPushRequest>,
) -> Result<Json<serde_json::Value>> {
    if request.phone_number.trim().is_empty() {
        return Err(AppError::invalid_data("phone_number is required"));
    }
    if request.order_id.trim().is_empty() {
        return Err(AppError::invalid_data("order_id is required"));
    }

    let order_id = ObjectId::parse_str(request.order_id.trim())?;

    let orders: Collection<Order> = state.db.collection("orders");
    let order = orders
        .find_one(doc! { "_id": order_id })
        .await?
        .ok_or(AppError::OrderNotFound)?;

    let amount = order.computed_total();
    if amount <= 0 {
        return Err(AppError::invalid_data("order total must be a positive amount"));
    }

    let mpesa_service = state
        .mpesa_service
        .as_ref()
        .ok_or_else(|| AppError::ServiceUnavailable("M-Pesa service is not available".to_string()))?;

    let transactions = TransactionService::new(&state.db);
    let txn_id = transactions
        .create_pending(order_id, request.phone_number.trim(), amount)
        .await?;

    match mpesa_service.initiate_stk_push(request.phone_number.trim(), amount).await {
        Ok(response) => {
            transactions
                .set_correlation_ids(
                    txn_id,
                    &response.merchant_request_id,
                    &response.checkout_request_id,
                )
                .await?;

            info!("STK push initiated: {}", response.merchant_request_id);
            Ok(Json(json!({
                "success": true,
                "transaction_id": txn_id.to_hex(),
                "merchant_request_id": response.merchant_request_id,
                "checkout_request_id": response.checkout_request_id,
                "customer_message": response.customer_message,
            })))
        }
        Err(e) => {
            error!("Failed to initiate STK push: {}", e);
            transactions.fail_before_callback(txn_id, &e.to_string()).await?;
            Err(e)
        }
    }
}

/// Gateway webhook. Parsing failures get a 400 and touch nothing; once the
/// envelope parses, the gateway always gets its success acknowledgement,
/// whatever happens to the business transition, so it never retry-storms us.
pub async fn mpesa_callback(
    State(state): State<AppState>,
    Query(auth): Query<CallbackAuthQuery>,
    body: String,
) -> Response {
    if let Some(secret) = &state.config.mpesa_callback_secret {
        if auth.token.as_deref() != Some(secret.as_str()) {
            warn!("Callback rejected: bad or missing token");
            return AppError::Unauthorized.into_response();
        }
    }

    let callback = match parse_stk_callback(&body) {
        Ok(callback) => callback,
        Err(e) => {
            warn!("Discarding malformed callback payload: {}", e);
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": "malformed callback payload" })),
            )
                .into_response();
        }
    };

    match process_stk_callback(&state, &callback).await {
        Ok(outcome) => info!(
            "Callback {} for {}: {}",
            callback.result_code, callback.merchant_request_id, outcome
        ),
        Err(e) => error!(
            "Callback processing failed for {}: {}",
            callback.merchant_request_id, e
        ),
    }

    Json(json!({ "ResultCode": 0, "ResultDesc": "Success" })).into_response()
}

/// Strict parse of the callback body. A success payload without a receipt
/// number is as useless as a truncated one, so it fails here too, before any
/// lookup happens.
fn parse_stk_callback(body: &str) -> Result<StkCallback> {
    let envelope: CallbackEnvelope = serde_json::from_str(body)?;
    let callback = envelope.body.stk_callback;

    if callback.result_code == 0 && callback.receipt_number().is_none() {
        return Err(AppError::invalid_data(
            "success callback is missing MpesaReceiptNumber",
        ));
    }

    Ok(callback)
}

async fn process_stk_callback(state: &AppState, callback: &StkCallback) -> Result<&'static str> {
    let transactions = TransactionService::new(&state.db);

    let Some(txn) = transactions
        .find_by_merchant_request_id(&callback.merchant_request_id)
        .await?
    else {
        warn!(
            "Callback for unknown merchant_request_id {}",
            callback.merchant_request_id
        );
        return Ok("no matching transaction");
    };

    if txn.status.is_terminal() {
        return Ok("already finalized, ignoring");
    }

    let Some(txn_id) = txn.id else {
        return Err(AppError::TransactionNotFound);
    };

    if callback.result_code == 0 {
        let receipt_number = callback
            .receipt_number()
            .ok_or_else(|| AppError::invalid_data("missing MpesaReceiptNumber"))?;

        match transactions
            .finalize(
                txn_id,
                TransactionStatus::Completed,
                Some(callback.result_code),
                Some(&callback.result_desc),
                Some(&receipt_number),
            )
            .await?
        {
            Some(finalized) => {
                let settlement = SettlementService::new(
                    &state.db,
                    state.receipt_service.clone(),
                    state.retry_policy(),
                );
                settlement.settle_completed(&finalized).await?;
                Ok("completed")
            }
            // The sweeper got there first.
            None => Ok("already finalized, ignoring"),
        }
    } else {
        transactions
            .finalize(
                txn_id,
                TransactionStatus::Failed,
                Some(callback.result_code),
                Some(&callback.result_desc),
                None,
            )
            .await?;
        Ok("failed")
    }
}

/// Frontend polling endpoint: did the push we started settle yet?
pub async fn check_payment_status(
    State(state): State<AppState>,
    Json(request): Json<PaymentStatusRequest>,
) -> Result<Json<serde_json::Value>> {
    let transactions = TransactionService::new(&state.db);
    let txn = transactions
        .find_by_checkout_request_id(&request.checkout_request_id)
        .await?
        .ok_or(AppError::TransactionNotFound)?;

    Ok(Json(json!({
        "status": txn.status.as_str(),
        "amount": txn.amount,
        "mpesa_receipt_number": txn.mpesa_receipt_number,
        "result_desc": txn.result_desc,
        "is_callback_received": txn.is_callback_received,
    })))
}

pub async fn check_transaction_status(
    State(state): State<AppState>,
    Query(query): Query<StatusQuery>,
) -> Result<Json<serde_json::Value>> {
    let transactions = TransactionService::new(&state.db);

    let txn = if let Some(checkout_request_id) = &query.checkout_request_id {
        transactions.find_by_checkout_request_id(checkout_request_id).await?
    } else if let Some(merchant_request_id) = &query.merchant_request_id {
        transactions.find_by_merchant_request_id(merchant_request_id).await?
    } else {
        return Err(AppError::invalid_data(
            "checkout_request_id or merchant_request_id is required",
        ));
    };

    let txn = txn.ok_or(AppError::TransactionNotFound)?;
    Ok(Json(json!({
        "status": txn.status.as_str(),
        "merchant_request_id": txn.merchant_request_id,
        "checkout_request_id": txn.checkout_request_id,
        "mpesa_receipt_number": txn.mpesa_receipt_number,
        "updated_at": txn.updated_at.to_rfc3339(),
    })))
}

pub async fn get_transactions(State(state): State<AppState>) -> Result<Json<serde_json::Value>> {
    let transactions = TransactionService::new(&state.db).list_recent(50).await?;

    Ok(Json(json!({
        "count": transactions.len(),
        "transactions": transactions,
    })))
}

pub async fn get_stats(State(state): State<AppState>) -> Result<Json<serde_json::Value>> {
    let stats = TransactionService::new(&state.db).stats().await?;
    Ok(Json(stats))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_malformed_json() {
        assert!(parse_stk_callback("not json at all {{{").is_err());
    }

    #[test]
    fn rejects_envelope_missing_keys() {
        let payload = r#"{"Body": {"stkCallback": {"MerchantRequestID": "mr_1"}}}"#;
        assert!(parse_stk_callback(payload).is_err());
    }

    #[test]
    fn rejects_success_without_receipt_number() {
        let payload = r#"{
            "Body": {
                "stkCallback": {
                    "MerchantRequestID": "mr_1",
                    "CheckoutRequestID": "co_1",
                    "ResultCode": 0,
                    "ResultDesc": "Success",
                    "CallbackMetadata": {
                        "Item": [{"Name": "Amount", "Value": 100}]
                    }
                }
            }
        }"#;
        assert!(parse_stk_callback(payload).is_err());
    }

    #[test]
    fn accepts_failure_without_metadata() {
        let payload = r#"{
            "Body": {
                "stkCallback": {
                    "MerchantRequestID": "mr_1",
                    "CheckoutRequestID": "co_1",
                    "ResultCode": 1032,
                    "ResultDesc": "Request cancelled by user"
                }
            }
        }"#;

        let callback = parse_stk_callback(payload).unwrap();
        assert_eq!(callback.result_code, 1032);
        assert_eq!(callback.result_desc, "Request cancelled by user");
    }

    #[test]
    fn accepts_success_with_receipt_number() {
        let payload = r#"{
            "Body": {
                "stkCallback": {
                    "MerchantRequestID": "mr_success",
                    "CheckoutRequestID": "co_success",
                    "ResultCode": 0,
                    "ResultDesc": "Success",
                    "CallbackMetadata": {
                        "Item": [
                            {"Name": "Amount", "Value": 100},
                            {"Name": "MpesaReceiptNumber", "Value": "MPESAXYZ"}
                        ]
                    }
                }
            }
        }"#;

        let callback = parse_stk_callback(payload).unwrap();
        assert_eq!(callback.receipt_number().as_deref(), Some("MPESAXYZ"));
    }
}
