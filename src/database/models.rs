//! Row types shared by the repositories and services

use bigdecimal::RoundingMode;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{types::BigDecimal, FromRow};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Catalog product as seen at checkout time
#[derive(Debug, Clone, FromRow)]
pub struct Product {
    pub id: i64,
    pub name: String,
    pub price: BigDecimal,
    pub is_active: bool,
    /// `None` means stock is not tracked for this product
    pub stock_quantity: Option<i32>,
}

/// One row of a user's cart
#[derive(Debug, Clone, PartialEq, Eq, Serialize, FromRow)]
pub struct CartLine {
    pub id: i64,
    pub user_id: i64,
    pub product_id: i64,
    pub quantity: i32,
}

/// Payment leg of the order lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Paid,
    Failed,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Paid => "paid",
            OrderStatus::Failed => "failed",
        }
    }

    /// `pending -> {paid, failed}`; paid and failed are terminal.
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        matches!(
            (self, next),
            (OrderStatus::Pending, OrderStatus::Paid) | (OrderStatus::Pending, OrderStatus::Failed)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Paid | OrderStatus::Failed)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pending" => Ok(OrderStatus::Pending),
            "paid" => Ok(OrderStatus::Paid),
            "failed" => Ok(OrderStatus::Failed),
            other => Err(format!("unknown order status '{}'", other)),
        }
    }
}

/// Contact record embedded in every order.
///
/// Guest orders carry the caller's record; cart checkouts copy the account's details.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerContact {
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub zip: Option<String>,
}

/// Persisted order header
#[derive(Debug, Clone, FromRow)]
pub struct Order {
    pub id: i64,
    pub public_id: Uuid,
    pub user_id: Option<i64>,
    pub total_amount: BigDecimal,
    pub invoice_number: String,
    pub status: String,
    pub customer_info: serde_json::Value,
    pub phone_number: Option<String>,
    pub mpesa_checkout_id: Option<String>,
    pub mpesa_receipt: Option<String>,
    pub payment_result_desc: Option<String>,
    /// Set while a payment request is being sent to the gateway
    pub payment_requested_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Parsed status; rows are constrained by a CHECK so unknown values fall back to pending
    pub fn order_status(&self) -> OrderStatus {
        self.status.parse().unwrap_or(OrderStatus::Pending)
    }

    pub fn customer(&self) -> CustomerContact {
        serde_json::from_value(self.customer_info.clone()).unwrap_or_default()
    }
}

/// Persisted order line with its frozen unit price
#[derive(Debug, Clone, FromRow)]
pub struct OrderItem {
    pub id: i64,
    pub order_id: i64,
    pub product_id: i64,
    pub product_name: String,
    pub quantity: i32,
    pub price_at_purchase: BigDecimal,
}

impl OrderItem {
    pub fn line_total(&self) -> BigDecimal {
        round_money(&(&self.price_at_purchase * BigDecimal::from(self.quantity)))
    }
}

#[derive(Debug, Clone)]
pub struct OrderWithItems {
    pub order: Order,
    pub items: Vec<OrderItem>,
}

/// Order header to insert
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub public_id: Uuid,
    pub user_id: Option<i64>,
    pub total_amount: BigDecimal,
    pub invoice_number: String,
    pub customer_info: serde_json::Value,
    pub phone_number: Option<String>,
}

/// Order line to insert
#[derive(Debug, Clone)]
pub struct NewOrderItem {
    pub product_id: i64,
    pub product_name: String,
    pub quantity: i32,
    pub price_at_purchase: BigDecimal,
}

/// Round to cents, half-up
pub fn round_money(value: &BigDecimal) -> BigDecimal {
    value.with_scale_round(2, RoundingMode::HalfUp)
}

/// Render an amount with exactly two decimals
pub fn format_money(value: &BigDecimal) -> String {
    round_money(value).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_moves_to_terminal_states_only() {
        assert!(OrderStatus::Pending.can_transition_to(OrderStatus::Paid));
        assert!(OrderStatus::Pending.can_transition_to(OrderStatus::Failed));
        assert!(!OrderStatus::Paid.can_transition_to(OrderStatus::Failed));
        assert!(!OrderStatus::Failed.can_transition_to(OrderStatus::Paid));
        assert!(!OrderStatus::Paid.can_transition_to(OrderStatus::Pending));
        assert!(!OrderStatus::Pending.can_transition_to(OrderStatus::Pending));
    }

    #[test]
    fn status_parses_case_insensitively() {
        assert_eq!("PAID".parse::<OrderStatus>(), Ok(OrderStatus::Paid));
        assert!("shipped".parse::<OrderStatus>().is_err());
    }

    #[test]
    fn money_rounds_half_up() {
        let value = BigDecimal::from_str("10.005").unwrap();
        assert_eq!(format_money(&value), "10.01");

        let value = BigDecimal::from_str("10.004").unwrap();
        assert_eq!(format_money(&value), "10.00");

        assert_eq!(format_money(&BigDecimal::from(3000)), "3000.00");
    }

    #[test]
    fn customer_contact_uses_camel_case() {
        let contact: CustomerContact = serde_json::from_value(serde_json::json!({
            "firstName": "Jane",
            "email": "jane@example.com",
            "zip": "00100"
        }))
        .unwrap();

        assert_eq!(contact.first_name.as_deref(), Some("Jane"));
        assert_eq!(contact.zip.as_deref(), Some("00100"));
        assert!(contact.last_name.is_none());
    }
}
