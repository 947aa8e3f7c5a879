use crate::payments::error::PaymentResult;
use crate::payments::types::{StkPushAccepted, StkQueryResult};
use async_trait::async_trait;
use bigdecimal::BigDecimal;

/// Mobile-money gateway as used by checkout.
///
/// Implementations never deduplicate: callers must not re-initiate payment for an
/// order that already carries a correlation id.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Send a payment prompt to `raw_phone` for `amount`, tagged with `reference`
    async fn initiate_payment(
        &self,
        raw_phone: &str,
        amount: &BigDecimal,
        reference: &str,
    ) -> PaymentResult<StkPushAccepted>;

    /// Ask the gateway for the current state of an earlier prompt
    async fn query_status(&self, checkout_request_id: &str) -> PaymentResult<StkQueryResult>;

    fn name(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payments::error::PaymentError;
    use crate::payments::types::PaymentState;

    struct MockGateway;

    #[async_trait]
    impl PaymentGateway for MockGateway {
        async fn initiate_payment(
            &self,
            raw_phone: &str,
            _amount: &BigDecimal,
            _reference: &str,
        ) -> PaymentResult<StkPushAccepted> {
            if raw_phone.is_empty() {
                return Err(PaymentError::ValidationError {
                    message: "phone is required".to_string(),
                    field: Some("phone".to_string()),
                });
            }
            Ok(StkPushAccepted {
                checkout_request_id: "ws_CO_1".to_string(),
                merchant_request_id: None,
                customer_message: None,
                phone_number: raw_phone.to_string(),
                amount: 1,
            })
        }

        async fn query_status(&self, checkout_request_id: &str) -> PaymentResult<StkQueryResult> {
            Ok(StkQueryResult {
                checkout_request_id: checkout_request_id.to_string(),
                state: PaymentState::Pending,
                result_code: None,
                result_desc: None,
            })
        }

        fn name(&self) -> &'static str {
            "mock"
        }
    }

    #[tokio::test]
    async fn trait_can_be_used_as_object() {
        let gateway: Box<dyn PaymentGateway> = Box::new(MockGateway);

        let accepted = gateway
            .initiate_payment("254712345678", &BigDecimal::from(10), "INV-1")
            .await
            .unwrap();
        assert_eq!(accepted.checkout_request_id, "ws_CO_1");

        let err = gateway
            .initiate_payment("", &BigDecimal::from(10), "INV-1")
            .await
            .unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
        assert_eq!(gateway.name(), "mock");
    }
}
