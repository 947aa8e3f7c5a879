use crate::payments::types::PaymentEnvelope;
use thiserror::Error;

pub type PaymentResult<T> = Result<T, PaymentError>;

#[derive(Debug, Clone, Error)]
pub enum PaymentError {
    #[error("Gateway is not configured: missing {}", missing.join(", "))]
    ConfigurationError { missing: Vec<String> },

    #[error("Validation error: {message}")]
    ValidationError {
        message: String,
        field: Option<String>,
    },

    #[error("{operation} timed out after {timeout_secs}s: {message}")]
    TimeoutError {
        operation: String,
        timeout_secs: u64,
        message: String,
    },

    #[error("Connection failure: {message}")]
    ConnectionFailure { message: String },

    #[error("Authentication with gateway failed: {message}")]
    AuthFailure {
        message: String,
        status: Option<u16>,
    },

    #[error("Gateway rejected request: code={code}, message={message}")]
    Rejected { code: String, message: String },

    #[error("Invalid gateway response: {message}")]
    InvalidResponse { message: String },
}

impl PaymentError {
    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            PaymentError::ConfigurationError { .. } => "CONFIGURATION_ERROR",
            PaymentError::ValidationError { .. } => "VALIDATION_ERROR",
            PaymentError::TimeoutError { .. } => "TIMEOUT",
            PaymentError::ConnectionFailure { .. } => "CONNECTION_FAILURE",
            PaymentError::AuthFailure { .. } => "AUTH_FAILURE",
            PaymentError::Rejected { .. } => "REJECTED",
            PaymentError::InvalidResponse { .. } => "INVALID_RESPONSE",
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            PaymentError::ConfigurationError { .. } => false,
            PaymentError::ValidationError { .. } => false,
            PaymentError::TimeoutError { .. } => true,
            PaymentError::ConnectionFailure { .. } => true,
            PaymentError::AuthFailure { .. } => false,
            PaymentError::Rejected { .. } => false,
            PaymentError::InvalidResponse { .. } => false,
        }
    }

    pub fn http_status_code(&self) -> u16 {
        match self {
            PaymentError::ConfigurationError { .. } => 500,
            PaymentError::ValidationError { .. } => 400,
            PaymentError::TimeoutError { .. } => 504,
            PaymentError::ConnectionFailure { .. } => 502,
            PaymentError::AuthFailure { .. } => 502,
            PaymentError::Rejected { .. } => 502,
            PaymentError::InvalidResponse { .. } => 502,
        }
    }

    pub fn user_message(&self) -> String {
        match self {
            PaymentError::ConfigurationError { .. } => {
                "Mobile payments are not available right now".to_string()
            }
            PaymentError::ValidationError { message, .. } => message.clone(),
            PaymentError::TimeoutError { .. } => {
                "Payment provider did not respond in time. Please retry".to_string()
            }
            PaymentError::ConnectionFailure { .. } => {
                "Payment provider is temporarily unavailable".to_string()
            }
            PaymentError::AuthFailure { .. } => {
                "Payment provider rejected our credentials".to_string()
            }
            PaymentError::Rejected { message, .. } => message.clone(),
            PaymentError::InvalidResponse { .. } => {
                "Payment provider returned an unexpected response".to_string()
            }
        }
    }

    /// Uniform `{code, message}` result for callers that report payment state instead of failing
    pub fn envelope(&self) -> PaymentEnvelope {
        PaymentEnvelope {
            code: self.code().to_string(),
            message: self.to_string(),
            retryable: self.is_retryable(),
        }
    }
}

impl From<PaymentError> for crate::error::AppError {
    fn from(err: PaymentError) -> Self {
        use crate::error::{AppError, AppErrorKind, ExternalError, ValidationError};

        match err {
            PaymentError::ConfigurationError { .. } => AppError::configuration(err.to_string()),
            PaymentError::ValidationError { message, field } => match field.as_deref() {
                Some("phone") => AppError::validation(ValidationError::InvalidPhone {
                    phone: String::new(),
                    reason: message,
                }),
                _ => AppError::validation(ValidationError::InvalidField {
                    field: field.unwrap_or_else(|| "payment".to_string()),
                    reason: message,
                }),
            },
            PaymentError::TimeoutError { timeout_secs, .. } => {
                AppError::new(AppErrorKind::External(ExternalError::Timeout {
                    service: "M-Pesa".to_string(),
                    timeout_secs,
                }))
            }
            other => AppError::new(AppErrorKind::External(ExternalError::PaymentProvider {
                provider: "M-Pesa".to_string(),
                message: other.to_string(),
                is_retryable: other.is_retryable(),
            })),
        }
    }
}
