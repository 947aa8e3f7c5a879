//! Database error types

use std::fmt;

/// Classified database failure
#[derive(Debug, Clone)]
pub enum DatabaseErrorKind {
    /// Requested row does not exist
    NotFound { entity: String, id: String },
    /// Unique constraint violated
    UniqueViolation { constraint: Option<String> },
    /// Foreign key constraint violated
    ForeignKeyViolation { constraint: Option<String> },
    /// Pool exhausted or connection dropped
    ConnectionError { message: String },
    /// Serialization failure or deadlock; safe to retry the whole transaction
    TransactionConflict { message: String },
    /// Anything else
    Unknown { message: String },
}

#[derive(Debug, Clone)]
pub struct DatabaseError {
    pub kind: DatabaseErrorKind,
}

impl DatabaseError {
    pub fn new(kind: DatabaseErrorKind) -> Self {
        Self { kind }
    }

    pub fn not_found(entity: impl Into<String>, id: impl ToString) -> Self {
        Self::new(DatabaseErrorKind::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        })
    }

    /// Classify an sqlx error by Postgres SQLSTATE
    pub fn from_sqlx(err: sqlx::Error) -> Self {
        let kind = match &err {
            sqlx::Error::RowNotFound => DatabaseErrorKind::NotFound {
                entity: "row".to_string(),
                id: "unknown".to_string(),
            },
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                DatabaseErrorKind::ConnectionError {
                    message: err.to_string(),
                }
            }
            sqlx::Error::Database(db_err) => {
                let constraint = db_err.constraint().map(|c| c.to_string());
                match db_err.code().as_deref() {
                    Some("23505") => DatabaseErrorKind::UniqueViolation { constraint },
                    Some("23503") => DatabaseErrorKind::ForeignKeyViolation { constraint },
                    Some("40001") | Some("40P01") => DatabaseErrorKind::TransactionConflict {
                        message: db_err.message().to_string(),
                    },
                    _ => DatabaseErrorKind::Unknown {
                        message: db_err.message().to_string(),
                    },
                }
            }
            _ => DatabaseErrorKind::Unknown {
                message: err.to_string(),
            },
        };
        Self::new(kind)
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            DatabaseErrorKind::ConnectionError { .. } | DatabaseErrorKind::TransactionConflict { .. }
        )
    }

    /// True when the unique violation concerns the named constraint
    pub fn is_unique_violation_on(&self, name: &str) -> bool {
        match &self.kind {
            DatabaseErrorKind::UniqueViolation { constraint } => constraint
                .as_deref()
                .map(|c| c.contains(name))
                .unwrap_or(false),
            _ => false,
        }
    }
}

impl fmt::Display for DatabaseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            DatabaseErrorKind::NotFound { entity, id } => write!(f, "{} '{}' not found", entity, id),
            DatabaseErrorKind::UniqueViolation { constraint } => write!(
                f,
                "unique constraint violated: {}",
                constraint.as_deref().unwrap_or("unknown")
            ),
            DatabaseErrorKind::ForeignKeyViolation { constraint } => write!(
                f,
                "foreign key constraint violated: {}",
                constraint.as_deref().unwrap_or("unknown")
            ),
            DatabaseErrorKind::ConnectionError { message } => {
                write!(f, "database connection error: {}", message)
            }
            DatabaseErrorKind::TransactionConflict { message } => {
                write!(f, "transaction conflict: {}", message)
            }
            DatabaseErrorKind::Unknown { message } => write!(f, "database error: {}", message),
        }
    }
}

impl std::error::Error for DatabaseError {}

impl From<DatabaseError> for crate::error::AppError {
    fn from(err: DatabaseError) -> Self {
        use crate::error::{AppError, AppErrorKind, InfrastructureError};

        AppError::new(AppErrorKind::Infrastructure(InfrastructureError::Database {
            message: err.to_string(),
            is_retryable: err.is_retryable(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unique_violation_matches_constraint_name() {
        let err = DatabaseError::new(DatabaseErrorKind::UniqueViolation {
            constraint: Some("orders_invoice_number_key".to_string()),
        });
        assert!(err.is_unique_violation_on("invoice_number"));
        assert!(!err.is_unique_violation_on("public_id"));
        assert!(!err.is_retryable());
    }

    #[test]
    fn connection_errors_are_retryable() {
        let err = DatabaseError::from_sqlx(sqlx::Error::PoolTimedOut);
        assert!(err.is_retryable());
    }

    #[test]
    fn converts_into_infrastructure_app_error() {
        let app: crate::error::AppError = DatabaseError::not_found("order", 42).into();
        assert_eq!(app.status_code(), 500);
    }
}
