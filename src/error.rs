//! Unified error handling for the shop backend
//!
//! This module provides one error type with HTTP status mapping,
//! user-friendly messages, and structured error codes for client handling.
//! Validation failures are caller-fixable (4xx), infrastructure failures are
//! deployment or database problems (5xx), and external failures come from the
//! payment gateway (502/504).

use serde::{Deserialize, Serialize};
use std::fmt;

/// Error codes for programmatic handling
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ErrorCode {
    // Domain errors (4xx)
    #[serde(rename = "ORDER_NOT_FOUND")]
    OrderNotFound,
    #[serde(rename = "INVALID_STATUS_TRANSITION")]
    InvalidStatusTransition,
    #[serde(rename = "PAYMENT_ALREADY_INITIATED")]
    PaymentAlreadyInitiated,
    #[serde(rename = "UNAUTHORIZED")]
    Unauthorized,
    #[serde(rename = "FORBIDDEN")]
    Forbidden,

    // Infrastructure errors (5xx)
    #[serde(rename = "DATABASE_ERROR")]
    DatabaseError,
    #[serde(rename = "CONFIGURATION_ERROR")]
    ConfigurationError,

    // External errors (502, 504)
    #[serde(rename = "PAYMENT_PROVIDER_ERROR")]
    PaymentProviderError,
    #[serde(rename = "EXTERNAL_SERVICE_TIMEOUT")]
    ExternalServiceTimeout,

    // Generic
    #[serde(rename = "INTERNAL_ERROR")]
    InternalError,
    #[serde(rename = "VALIDATION_ERROR")]
    ValidationError,
}

/// Business rule violations
#[derive(Debug, Clone)]
pub enum DomainError {
    /// No active order with this identifier
    OrderNotFound { reference: String },
    /// Requested status change is not allowed by the payment state machine
    InvalidStatusTransition { from: String, to: String },
    /// Order already carries a gateway correlation id
    PaymentAlreadyInitiated { reference: String },
    /// Missing or unknown bearer token
    Unauthorized,
    /// Authenticated but not allowed
    Forbidden,
}

/// Infrastructure-level errors (database, configuration)
#[derive(Debug, Clone)]
pub enum InfrastructureError {
    /// Database connection or query failure; the transaction was rolled back
    Database { message: String, is_retryable: bool },
    /// Missing or invalid configuration
    Configuration { message: String },
    /// Invoice document could not be produced
    Document { message: String },
}

/// External service errors (payment gateway)
#[derive(Debug, Clone)]
pub enum ExternalError {
    /// Gateway answered with an error or could not be reached
    PaymentProvider {
        provider: String,
        message: String,
        is_retryable: bool,
    },
    /// External service timeout
    Timeout { service: String, timeout_secs: u64 },
}

/// Input validation errors
#[derive(Debug, Clone)]
pub enum ValidationError {
    /// Checkout attempted with nothing to buy
    EmptyCart,
    /// Product id does not exist
    UnknownProduct { product_id: i64 },
    /// Product exists but is not sold anymore
    InactiveProduct { product_id: i64, name: String },
    /// Requested more than the tracked stock
    InsufficientStock {
        product_id: i64,
        name: String,
        requested: i32,
        available: i32,
    },
    /// Quantity must be a positive integer
    InvalidQuantity { product_id: i64, quantity: i32 },
    /// Phone number cannot be normalized
    InvalidPhone { phone: String, reason: String },
    /// Required field missing
    MissingField { field: String },
    /// Field present but malformed
    InvalidField { field: String, reason: String },
}

impl ValidationError {
    /// Field the error refers to, for `details` in the response body
    pub fn field(&self) -> String {
        match self {
            ValidationError::EmptyCart => "items".to_string(),
            ValidationError::UnknownProduct { .. }
            | ValidationError::InactiveProduct { .. }
            | ValidationError::InsufficientStock { .. } => "product_id".to_string(),
            ValidationError::InvalidQuantity { .. } => "quantity".to_string(),
            ValidationError::InvalidPhone { .. } => "phone".to_string(),
            ValidationError::MissingField { field } | ValidationError::InvalidField { field, .. } => {
                field.clone()
            }
        }
    }
}

/// Unified application error type
#[derive(Debug, Clone)]
pub struct AppError {
    pub kind: AppErrorKind,
    pub request_id: Option<String>,
    pub context: Option<String>,
}

#[derive(Debug, Clone)]
pub enum AppErrorKind {
    Domain(DomainError),
    Infrastructure(InfrastructureError),
    External(ExternalError),
    Validation(ValidationError),
}

impl AppError {
    pub fn new(kind: AppErrorKind) -> Self {
        Self {
            kind,
            request_id: None,
            context: None,
        }
    }

    pub fn validation(err: ValidationError) -> Self {
        Self::new(AppErrorKind::Validation(err))
    }

    pub fn domain(err: DomainError) -> Self {
        Self::new(AppErrorKind::Domain(err))
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(AppErrorKind::Infrastructure(
            InfrastructureError::Configuration {
                message: message.into(),
            },
        ))
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn is_validation(&self) -> bool {
        matches!(self.kind, AppErrorKind::Validation(_))
    }

    pub fn is_persistence(&self) -> bool {
        matches!(
            self.kind,
            AppErrorKind::Infrastructure(InfrastructureError::Database { .. })
        )
    }

    /// Map error to HTTP status code
    pub fn status_code(&self) -> u16 {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::OrderNotFound { .. } => 404,
                DomainError::InvalidStatusTransition { .. } => 409, // Conflict
                DomainError::PaymentAlreadyInitiated { .. } => 409,
                DomainError::Unauthorized => 401,
                DomainError::Forbidden => 403,
            },
            AppErrorKind::Infrastructure(_) => 500,
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentProvider { .. } => 502, // Bad Gateway
                ExternalError::Timeout { .. } => 504,         // Gateway Timeout
            },
            AppErrorKind::Validation(_) => 400,
        }
    }

    /// Get error code for client handling
    pub fn error_code(&self) -> ErrorCode {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::OrderNotFound { .. } => ErrorCode::OrderNotFound,
                DomainError::InvalidStatusTransition { .. } => ErrorCode::InvalidStatusTransition,
                DomainError::PaymentAlreadyInitiated { .. } => ErrorCode::PaymentAlreadyInitiated,
                DomainError::Unauthorized => ErrorCode::Unauthorized,
                DomainError::Forbidden => ErrorCode::Forbidden,
            },
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::Database { .. } => ErrorCode::DatabaseError,
                InfrastructureError::Configuration { .. } => ErrorCode::ConfigurationError,
                InfrastructureError::Document { .. } => ErrorCode::InternalError,
            },
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentProvider { .. } => ErrorCode::PaymentProviderError,
                ExternalError::Timeout { .. } => ErrorCode::ExternalServiceTimeout,
            },
            AppErrorKind::Validation(_) => ErrorCode::ValidationError,
        }
    }

    /// Get user-friendly error message
    pub fn user_message(&self) -> String {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::OrderNotFound { reference } => {
                    format!("Order '{}' not found", reference)
                }
                DomainError::InvalidStatusTransition { from, to } => {
                    format!("Order status cannot change from '{}' to '{}'", from, to)
                }
                DomainError::PaymentAlreadyInitiated { reference } => {
                    format!("Payment for order '{}' has already been initiated", reference)
                }
                DomainError::Unauthorized => "Authentication required".to_string(),
                DomainError::Forbidden => "You are not allowed to perform this action".to_string(),
            },
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::Database { .. } => {
                    "Order could not be saved. No changes were made; please try again".to_string()
                }
                InfrastructureError::Configuration { .. } => {
                    "Service is misconfigured. Please contact support".to_string()
                }
                InfrastructureError::Document { .. } => {
                    "Invoice could not be generated. Please try again later".to_string()
                }
            },
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentProvider {
                    provider,
                    is_retryable,
                    ..
                } => {
                    if *is_retryable {
                        format!(
                            "Payment provider ({}) is temporarily unavailable. Please try again",
                            provider
                        )
                    } else {
                        "Payment processing failed. Please contact support".to_string()
                    }
                }
                ExternalError::Timeout {
                    service,
                    timeout_secs,
                } => {
                    format!(
                        "{} request timed out after {} seconds. Please try again",
                        service, timeout_secs
                    )
                }
            },
            AppErrorKind::Validation(err) => match err {
                ValidationError::EmptyCart => "Cart is empty".to_string(),
                ValidationError::UnknownProduct { product_id } => {
                    format!("Unknown product: {}", product_id)
                }
                ValidationError::InactiveProduct { product_id, name } => {
                    format!("Product '{}' ({}) is no longer available", name, product_id)
                }
                ValidationError::InsufficientStock {
                    product_id,
                    name,
                    requested,
                    available,
                } => format!(
                    "Only {} units of '{}' ({}) available, {} requested",
                    available, name, product_id, requested
                ),
                ValidationError::InvalidQuantity {
                    product_id,
                    quantity,
                } => format!(
                    "Quantity for product {} must be greater than zero, got {}",
                    product_id, quantity
                ),
                ValidationError::InvalidPhone { phone, reason } => {
                    format!("Invalid phone number '{}': {}", phone, reason)
                }
                ValidationError::MissingField { field } => {
                    format!("Required field '{}' is missing", field)
                }
                ValidationError::InvalidField { field, reason } => {
                    format!("Invalid value for '{}': {}", field, reason)
                }
            },
        }
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        match &self.kind {
            AppErrorKind::Domain(_) => false,
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::Database { is_retryable, .. } => *is_retryable,
                InfrastructureError::Configuration { .. } | InfrastructureError::Document { .. } => {
                    false
                }
            },
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentProvider { is_retryable, .. } => *is_retryable,
                ExternalError::Timeout { .. } => true,
            },
            AppErrorKind::Validation(_) => false,
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.user_message())
    }
}

impl std::error::Error for AppError {}

// Note: From<DatabaseError> lives in database/error.rs and From<PaymentError> in payments/error.rs

/// Result type for operations that can fail with AppError
pub type AppResult<T> = Result<T, AppError>;
