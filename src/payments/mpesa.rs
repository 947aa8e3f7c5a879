//! Safaricom Daraja client: OAuth token, STK push and STK status query

use crate::config::MpesaConfig;
use crate::logging::mask_phone;
use crate::middleware::logging::log_external_call;
use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::provider::PaymentGateway;
use crate::payments::types::{
    DarajaErrorBody, PaymentState, StkPushAccepted, StkPushRequest, StkPushResponse,
    StkQueryRequest, StkQueryResponse, StkQueryResult, TokenResponse,
};
use crate::payments::utils::{
    daraja_timestamp, normalize_phone, stk_password, whole_amount, HttpReply, PaymentHttpClient,
};
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::Utc;
use std::time::Duration;
use tracing::{info, warn};

const TOKEN_PATH: &str = "/oauth/v1/generate?grant_type=client_credentials";
const STK_PUSH_PATH: &str = "/mpesa/stkpush/v1/processrequest";
const STK_QUERY_PATH: &str = "/mpesa/stkpushquery/v1/query";
const TRANSACTION_TYPE: &str = "CustomerPayBillOnline";
/// Daraja answers a status query with this error code while the payer has not responded yet
const STILL_PROCESSING_CODE: &str = "500.001.1001";

/// Credentials required for any call that reaches the STK endpoints
struct StkCredentials<'a> {
    shortcode: &'a str,
    passkey: &'a str,
    callback_url: &'a str,
}

pub struct MpesaClient {
    config: MpesaConfig,
    http: PaymentHttpClient,
}

impl MpesaClient {
    pub fn new(config: MpesaConfig) -> PaymentResult<Self> {
        Ok(Self {
            config,
            http: PaymentHttpClient::new()?,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn auth_timeout(&self) -> Duration {
        Duration::from_secs(self.config.auth_timeout_secs)
    }

    fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.config.request_timeout_secs)
    }

    fn stk_credentials(&self) -> PaymentResult<StkCredentials<'_>> {
        let missing = self.config.missing_credentials();
        if !missing.is_empty() {
            warn!(missing = ?missing, "M-Pesa credentials are not configured");
            return Err(PaymentError::ConfigurationError {
                missing: missing.into_iter().map(String::from).collect(),
            });
        }

        match (
            self.config.shortcode.as_deref(),
            self.config.passkey.as_deref(),
            self.config.callback_url.as_deref(),
        ) {
            (Some(shortcode), Some(passkey), Some(callback_url)) => Ok(StkCredentials {
                shortcode,
                passkey,
                callback_url,
            }),
            _ => Err(PaymentError::ConfigurationError {
                missing: vec!["MPESA_SHORTCODE".to_string()],
            }),
        }
    }

    /// Exchange the consumer key and secret for a bearer token
    pub async fn acquire_token(&self) -> PaymentResult<String> {
        let (key, secret) = match (
            self.config.consumer_key.as_deref(),
            self.config.consumer_secret.as_deref(),
        ) {
            (Some(key), Some(secret)) => (key, secret),
            (key, secret) => {
                let mut missing = Vec::new();
                if key.is_none() {
                    missing.push("MPESA_CONSUMER_KEY".to_string());
                }
                if secret.is_none() {
                    missing.push("MPESA_CONSUMER_SECRET".to_string());
                }
                return Err(PaymentError::ConfigurationError { missing });
            }
        };

        let request = self
            .http
            .get(&self.url(TOKEN_PATH))
            .basic_auth(key, Some(secret));

        let reply = log_external_call(
            "M-Pesa",
            "oauth_token",
            self.http.send("oauth_token", request, self.auth_timeout()),
        )
        .await?;

        if !reply.is_success() {
            let (_, message) = describe_error(&reply);
            return Err(if reply.status >= 500 {
                PaymentError::ConnectionFailure {
                    message: format!("token endpoint returned {}: {}", reply.status, message),
                }
            } else {
                PaymentError::AuthFailure {
                    message,
                    status: Some(reply.status),
                }
            });
        }

        let token: TokenResponse =
            serde_json::from_str(&reply.body).map_err(|e| PaymentError::InvalidResponse {
                message: format!("token response could not be parsed: {}", e),
            })?;

        if token.access_token.trim().is_empty() {
            return Err(PaymentError::AuthFailure {
                message: "token endpoint returned an empty access token".to_string(),
                status: Some(reply.status),
            });
        }

        Ok(token.access_token)
    }

    fn interpret_stk_push(
        &self,
        reply: HttpReply,
        phone_number: String,
        amount: i64,
    ) -> PaymentResult<StkPushAccepted> {
        if reply.status == 401 || reply.status == 403 {
            let (_, message) = describe_error(&reply);
            return Err(PaymentError::AuthFailure {
                message,
                status: Some(reply.status),
            });
        }

        if !reply.is_success() {
            let (code, message) = describe_error(&reply);
            return Err(PaymentError::Rejected { code, message });
        }

        let parsed: StkPushResponse =
            serde_json::from_str(&reply.body).map_err(|e| PaymentError::InvalidResponse {
                message: format!("STK push response could not be parsed: {}", e),
            })?;

        let response_code = parsed.response_code.as_deref().unwrap_or_default();
        if response_code != "0" {
            return Err(PaymentError::Rejected {
                code: response_code.to_string(),
                message: parsed
                    .response_description
                    .unwrap_or_else(|| "STK push failed".to_string()),
            });
        }

        let checkout_request_id =
            parsed
                .checkout_request_id
                .ok_or_else(|| PaymentError::InvalidResponse {
                    message: "STK push accepted without a CheckoutRequestID".to_string(),
                })?;

        Ok(StkPushAccepted {
            checkout_request_id,
            merchant_request_id: parsed.merchant_request_id,
            customer_message: parsed.customer_message,
            phone_number,
            amount,
        })
    }
}

/// `(code, message)` from a Daraja error body, falling back to the raw text
fn describe_error(reply: &HttpReply) -> (String, String) {
    match serde_json::from_str::<DarajaErrorBody>(&reply.body) {
        Ok(body) => (
            body.error_code.unwrap_or_else(|| reply.status.to_string()),
            body.error_message
                .unwrap_or_else(|| format!("HTTP {}", reply.status)),
        ),
        Err(_) => (
            reply.status.to_string(),
            if reply.body.trim().is_empty() {
                format!("HTTP {}", reply.status)
            } else {
                reply.body.trim().to_string()
            },
        ),
    }
}

fn state_for_result_code(code: i64) -> PaymentState {
    match code {
        0 => PaymentState::Success,
        1032 => PaymentState::Cancelled,
        _ => PaymentState::Failed,
    }
}

#[async_trait]
impl PaymentGateway for MpesaClient {
    async fn initiate_payment(
        &self,
        raw_phone: &str,
        amount: &BigDecimal,
        reference: &str,
    ) -> PaymentResult<StkPushAccepted> {
        let credentials = self.stk_credentials()?;
        let phone_number = normalize_phone(raw_phone, &self.config.country_code)?;
        let whole = whole_amount(amount)?;

        let token = self.acquire_token().await?;

        let timestamp = daraja_timestamp(Utc::now());
        let payload = StkPushRequest {
            business_short_code: credentials.shortcode.to_string(),
            password: stk_password(credentials.shortcode, credentials.passkey, &timestamp),
            timestamp,
            transaction_type: TRANSACTION_TYPE.to_string(),
            amount: whole,
            party_a: phone_number.clone(),
            party_b: credentials.shortcode.to_string(),
            phone_number: phone_number.clone(),
            call_back_url: credentials.callback_url.to_string(),
            account_reference: reference.to_string(),
            transaction_desc: self.config.transaction_desc.clone(),
        };

        let request = self
            .http
            .post(&self.url(STK_PUSH_PATH))
            .bearer_auth(&token)
            .json(&payload);

        let reply = log_external_call(
            "M-Pesa",
            "stk_push",
            self.http.send("stk_push", request, self.request_timeout()),
        )
        .await?;

        let accepted = self.interpret_stk_push(reply, phone_number, whole)?;

        info!(
            checkout_request_id = %accepted.checkout_request_id,
            phone = %mask_phone(&accepted.phone_number),
            amount = accepted.amount,
            reference = %reference,
            "STK push accepted"
        );

        Ok(accepted)
    }

    async fn query_status(&self, checkout_request_id: &str) -> PaymentResult<StkQueryResult> {
        let credentials = self.stk_credentials()?;
        if checkout_request_id.trim().is_empty() {
            return Err(PaymentError::ValidationError {
                message: "checkout request id is required".to_string(),
                field: Some("checkout_request_id".to_string()),
            });
        }

        let token = self.acquire_token().await?;

        let timestamp = daraja_timestamp(Utc::now());
        let payload = StkQueryRequest {
            business_short_code: credentials.shortcode.to_string(),
            password: stk_password(credentials.shortcode, credentials.passkey, &timestamp),
            timestamp,
            checkout_request_id: checkout_request_id.to_string(),
        };

        let request = self
            .http
            .post(&self.url(STK_QUERY_PATH))
            .bearer_auth(&token)
            .json(&payload);

        let reply = log_external_call(
            "M-Pesa",
            "stk_query",
            self.http.send("stk_query", request, self.request_timeout()),
        )
        .await?;

        if reply.status == 401 || reply.status == 403 {
            let (_, message) = describe_error(&reply);
            return Err(PaymentError::AuthFailure {
                message,
                status: Some(reply.status),
            });
        }

        if !reply.is_success() {
            let (code, message) = describe_error(&reply);
            if code == STILL_PROCESSING_CODE {
                return Ok(StkQueryResult {
                    checkout_request_id: checkout_request_id.to_string(),
                    state: PaymentState::Pending,
                    result_code: None,
                    result_desc: Some(message),
                });
            }
            return Err(PaymentError::Rejected { code, message });
        }

        let parsed: StkQueryResponse =
            serde_json::from_str(&reply.body).map_err(|e| PaymentError::InvalidResponse {
                message: format!("STK query response could not be parsed: {}", e),
            })?;

        let state = match parsed.result_code {
            Some(code) => state_for_result_code(code),
            None => PaymentState::Unknown,
        };

        Ok(StkQueryResult {
            checkout_request_id: parsed
                .checkout_request_id
                .unwrap_or_else(|| checkout_request_id.to_string()),
            state,
            result_code: parsed.result_code,
            result_desc: parsed.result_desc.or(parsed.response_description),
        })
    }

    fn name(&self) -> &'static str {
        "mpesa"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn result_codes_map_to_states() {
        assert_eq!(state_for_result_code(0), PaymentState::Success);
        assert_eq!(state_for_result_code(1032), PaymentState::Cancelled);
        assert_eq!(state_for_result_code(1), PaymentState::Failed);
    }

    #[test]
    fn error_body_fields_are_preferred() {
        let reply = HttpReply {
            status: 400,
            body: r#"{"requestId":"1","errorCode":"400.002.02","errorMessage":"Bad Request - Invalid PhoneNumber"}"#.to_string(),
        };
        let (code, message) = describe_error(&reply);
        assert_eq!(code, "400.002.02");
        assert!(message.contains("Invalid PhoneNumber"));

        let reply = HttpReply {
            status: 502,
            body: String::new(),
        };
        assert_eq!(describe_error(&reply), ("502".to_string(), "HTTP 502".to_string()));
    }

    #[tokio::test]
    async fn missing_credentials_fail_before_network() {
        let client = MpesaClient::new(MpesaConfig {
            base_url: "http://127.0.0.1:9".to_string(),
            ..MpesaConfig::default()
        })
        .unwrap();

        let err = client
            .initiate_payment("0712345678", &BigDecimal::from(100), "INV-1")
            .await
            .unwrap_err();

        assert_eq!(err.code(), "CONFIGURATION_ERROR");
        assert!(matches!(err, PaymentError::ConfigurationError { ref missing } if missing.len() == 5));
    }
}
