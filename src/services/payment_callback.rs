//! Reconciles asynchronous STK results with stored orders
//!
//! Orders are matched by the correlation id returned at initiation. Every state
//! change is conditional on the order still being pending, so replays and late
//! duplicates leave the order untouched.

use crate::database::error::DatabaseError;
use crate::database::models::OrderStatus;
use crate::database::order_repository::OrderStore;
use crate::logging::mask_phone;
use crate::payments::types::{StkCallback, StkCallbackEnvelope};
use crate::payments::utils::whole_amount;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum CallbackParseError {
    #[error("callback body is not valid JSON: {0}")]
    InvalidJson(String),

    #[error("callback does not match the STK result schema: {0}")]
    Schema(String),

    #[error("callback has an empty CheckoutRequestID")]
    MissingCorrelationId,
}

#[derive(Debug, Error)]
pub enum CallbackError {
    #[error(transparent)]
    Parse(#[from] CallbackParseError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    Paid { order_id: i64 },
    Failed { order_id: i64 },
    /// The order had already left `pending`; nothing changed
    AlreadyApplied { order_id: i64, status: OrderStatus },
    /// No order carries this correlation id
    Orphan,
}

/// Acknowledgement body expected by the gateway
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CallbackAck {
    #[serde(rename = "ResultCode")]
    pub result_code: i32,
    #[serde(rename = "ResultDesc")]
    pub result_desc: String,
}

impl CallbackAck {
    pub fn accepted() -> Self {
        Self {
            result_code: 0,
            result_desc: "Accepted".to_string(),
        }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            result_code: 1,
            result_desc: reason.into(),
        }
    }
}

/// Validate the nested callback structure up front
pub fn parse_callback(body: &[u8]) -> Result<StkCallback, CallbackParseError> {
    let value: serde_json::Value =
        serde_json::from_slice(body).map_err(|e| CallbackParseError::InvalidJson(e.to_string()))?;
    let envelope: StkCallbackEnvelope =
        serde_json::from_value(value).map_err(|e| CallbackParseError::Schema(e.to_string()))?;

    let callback = envelope.body.stk_callback;
    if callback.checkout_request_id.trim().is_empty() {
        return Err(CallbackParseError::MissingCorrelationId);
    }
    Ok(callback)
}

pub struct PaymentCallbackReconciler {
    store: Arc<dyn OrderStore>,
}

impl PaymentCallbackReconciler {
    pub fn new(store: Arc<dyn OrderStore>) -> Self {
        Self { store }
    }

    /// Parse and apply a raw callback body
    pub async fn process(&self, body: &[u8]) -> Result<ReconcileOutcome, CallbackError> {
        let callback = parse_callback(body)?;
        Ok(self.reconcile(&callback).await?)
    }

    pub async fn reconcile(&self, callback: &StkCallback) -> Result<ReconcileOutcome, DatabaseError> {
        let checkout_request_id = callback.checkout_request_id.as_str();

        let order = match self
            .store
            .find_by_checkout_request_id(checkout_request_id)
            .await?
        {
            Some(order) => order,
            None => {
                warn!(
                    checkout_request_id = %checkout_request_id,
                    result_code = callback.result_code,
                    "Orphan payment callback, no order matches"
                );
                return Ok(ReconcileOutcome::Orphan);
            }
        };

        if callback.result_code == 0 {
            let receipt = callback.metadata_value("MpesaReceiptNumber");
            let phone = callback.metadata_value("PhoneNumber");

            if let Some(amount) = callback.metadata_value("Amount") {
                let expected = whole_amount(&order.total_amount).ok();
                let paid = amount.parse::<f64>().ok().map(|a| a.round() as i64);
                if paid.is_none() || paid != expected {
                    warn!(
                        order_id = order.id,
                        invoice_number = %order.invoice_number,
                        expected = ?expected,
                        received = %amount,
                        "Callback amount differs from order total"
                    );
                }
            }

            let applied = self
                .store
                .record_payment_success(order.id, receipt.as_deref(), phone.as_deref())
                .await?;

            if applied {
                info!(
                    order_id = order.id,
                    invoice_number = %order.invoice_number,
                    receipt = receipt.as_deref().unwrap_or("-"),
                    phone = %phone.as_deref().map(mask_phone).unwrap_or_default(),
                    "💰 Order paid"
                );
                Ok(ReconcileOutcome::Paid { order_id: order.id })
            } else {
                self.already_applied(order.id, checkout_request_id).await
            }
        } else {
            let applied = self
                .store
                .record_payment_failure(order.id, &callback.result_desc)
                .await?;

            if applied {
                info!(
                    order_id = order.id,
                    invoice_number = %order.invoice_number,
                    result_code = callback.result_code,
                    result_desc = %callback.result_desc,
                    "Order payment failed"
                );
                Ok(ReconcileOutcome::Failed { order_id: order.id })
            } else {
                self.already_applied(order.id, checkout_request_id).await
            }
        }
    }

    async fn already_applied(
        &self,
        order_id: i64,
        checkout_request_id: &str,
    ) -> Result<ReconcileOutcome, DatabaseError> {
        let status = self
            .store
            .find_by_id(order_id)
            .await?
            .map(|o| o.order.order_status())
            .unwrap_or(OrderStatus::Pending);

        info!(
            order_id,
            checkout_request_id = %checkout_request_id,
            status = %status,
            "Callback replay ignored, order already settled"
        );
        Ok(ReconcileOutcome::AlreadyApplied { order_id, status })
    }
}
