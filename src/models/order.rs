// models/order.rs
use chrono::{DateTime, Utc};
use mongodb::bson::oid::ObjectId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderItem {
    pub product_name: String,
    pub quantity: i64,
    /// Whole KES. M-Pesa only moves integer amounts.
    pub unit_price: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub customer_phone: String,
    pub items: Vec<OrderItem>,
    pub is_complete: bool,
    /// M-Pesa receipt number of the payment that settled this order.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_ref: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn computed_total(&self) -> i64 {
        self.items.iter().map(|item| item.quantity * item.unit_price).sum()
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateOrder {
    pub customer_phone: String,
    pub items: Vec<OrderItem>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order_with(items: Vec<OrderItem>) -> Order {
        Order {
            id: Some(ObjectId::new()),
            customer_phone: "254712345678".to_string(),
            items,
            is_complete: false,
            transaction_ref: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn computed_total_sums_line_items() {
        let order = order_with(vec![
            OrderItem {
                product_name: "Ceramic mug".to_string(),
                quantity: 2,
                unit_price: 350,
            },
            OrderItem {
                product_name: "Kiondo basket".to_string(),
                quantity: 1,
                unit_price: 1200,
            },
        ]);

        assert_eq!(order.computed_total(), 1900);
    }

    #[test]
    fn computed_total_of_empty_order_is_zero() {
        let order = order_with(vec![]);
        assert_eq!(order.computed_total(), 0);
    }
}
