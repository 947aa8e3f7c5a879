use crate::payments::error::{PaymentError, PaymentResult};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use bigdecimal::{BigDecimal, RoundingMode, ToPrimitive};
use chrono::{DateTime, FixedOffset, Utc};
use regex::Regex;
use reqwest::{Client, RequestBuilder};
use std::time::Duration;

/// Raw reply from the gateway before any interpretation
#[derive(Debug, Clone)]
pub struct HttpReply {
    pub status: u16,
    pub body: String,
}

impl HttpReply {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Thin reqwest wrapper that classifies transport failures.
///
/// No automatic retries: an STK push is not idempotent, so a repeated attempt is
/// left to the caller.
#[derive(Clone)]
pub struct PaymentHttpClient {
    client: Client,
}

impl PaymentHttpClient {
    pub fn new() -> PaymentResult<Self> {
        let client = Client::builder()
            .build()
            .map_err(|e| PaymentError::ConnectionFailure {
                message: format!("failed to initialize HTTP client: {}", e),
            })?;

        Ok(Self { client })
    }

    pub fn get(&self, url: &str) -> RequestBuilder {
        self.client.get(url)
    }

    pub fn post(&self, url: &str) -> RequestBuilder {
        self.client.post(url)
    }

    /// Send with a per-call timeout; timeouts and connection errors map to distinct variants
    pub async fn send(
        &self,
        operation: &str,
        request: RequestBuilder,
        timeout: Duration,
    ) -> PaymentResult<HttpReply> {
        let response = request
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| classify_transport_error(operation, timeout, e))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| classify_transport_error(operation, timeout, e))?;

        Ok(HttpReply { status, body })
    }
}

fn classify_transport_error(operation: &str, timeout: Duration, err: reqwest::Error) -> PaymentError {
    if err.is_timeout() {
        PaymentError::TimeoutError {
            operation: operation.to_string(),
            timeout_secs: timeout.as_secs(),
            message: err.to_string(),
        }
    } else {
        PaymentError::ConnectionFailure {
            message: format!("{} request failed: {}", operation, err),
        }
    }
}

/// Canonical international form: `+254712345678` and `0712345678` both become `254712345678`.
pub fn normalize_phone(raw: &str, country_code: &str) -> PaymentResult<String> {
    let invalid = |reason: &str| PaymentError::ValidationError {
        message: format!("Invalid phone number '{}': {}", raw, reason),
        field: Some("phone".to_string()),
    };

    let compact: String = raw
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '-')
        .collect();
    let without_plus = compact.strip_prefix('+').unwrap_or(&compact);

    let normalized = match without_plus.strip_prefix('0') {
        Some(national) => format!("{}{}", country_code, national),
        None => without_plus.to_string(),
    };

    let pattern = Regex::new(&format!(r"^{}\d{{9}}$", regex::escape(country_code)))
        .map_err(|_| invalid("unsupported country code"))?;

    if normalized.is_empty() {
        return Err(invalid("number is empty"));
    }
    if !normalized.chars().all(|c| c.is_ascii_digit()) {
        return Err(invalid("only digits are allowed"));
    }
    if !pattern.is_match(&normalized) {
        return Err(invalid(&format!(
            "expected {} followed by 9 digits",
            country_code
        )));
    }

    Ok(normalized)
}

/// `base64(shortcode + passkey + timestamp)`
pub fn stk_password(shortcode: &str, passkey: &str, timestamp: &str) -> String {
    STANDARD.encode(format!("{}{}{}", shortcode, passkey, timestamp))
}

/// Daraja timestamps are `YYYYMMDDHHMMSS` in East Africa Time
pub fn daraja_timestamp(now: DateTime<Utc>) -> String {
    match FixedOffset::east_opt(3 * 3600) {
        Some(eat) => now.with_timezone(&eat).format("%Y%m%d%H%M%S").to_string(),
        None => now.format("%Y%m%d%H%M%S").to_string(),
    }
}

/// Daraja only accepts whole currency units; round half-up and require at least 1
pub fn whole_amount(amount: &BigDecimal) -> PaymentResult<i64> {
    let rounded = amount.with_scale_round(0, RoundingMode::HalfUp);
    match rounded.to_i64() {
        Some(value) if value >= 1 => Ok(value),
        _ => Err(PaymentError::ValidationError {
            message: format!("amount {} cannot be charged, minimum is 1", amount),
            field: Some("amount".to_string()),
        }),
    }
}
