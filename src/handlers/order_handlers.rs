// handlers/order_handlers.rs
use axum::{
    extract::{Path, State},
    response::Json,
};
use chrono::Utc;
use mongodb::{
    bson::{doc, oid::ObjectId},
    Collection,
};

use crate::{
    errors::{AppError, Result},
    models::order::{CreateOrder, Order},
    state::AppState,
};

// Minimal order surface: enough for a client to create an order, pay for it
// and poll completion. The full catalog/cart stack lives elsewhere.

pub async fn create_order(
    State(state): State<AppState>,
    Json(payload): Json<CreateOrder>,
) -> Result<Json<Order>> {
    if payload.customer_phone.trim().is_empty() {
        return Err(AppError::invalid_data("customer_phone is required"));
    }
    if payload.items.is_empty() {
        return Err(AppError::invalid_data("order must contain at least one item"));
    }
    for item in &payload.items {
        if item.quantity <= 0 || item.unit_price <= 0 {
            return Err(AppError::invalid_data(
                "item quantity and unit_price must be positive",
            ));
        }
    }

    let collection: Collection<Order> = state.db.collection("orders");

    let order = Order {
        id: Some(ObjectId::new()),
        customer_phone: payload.customer_phone.trim().to_string(),
        items: payload.items,
        is_complete: false,
        transaction_ref: None,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    };

    collection.insert_one(&order).await?;
    Ok(Json(order))
}

pub async fn get_order(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Order>> {
    let order_id = ObjectId::parse_str(&id)?;

    let collection: Collection<Order> = state.db.collection("orders");
    let order = collection
        .find_one(doc! { "_id": order_id })
        .await?
        .ok_or(AppError::OrderNotFound)?;

    Ok(Json(order))
}
