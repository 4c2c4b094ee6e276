use thiserror::Error;
use uuid::Uuid;

use crate::utils::error::AppError;

#[derive(Debug, Error)]
pub enum PurchaseError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Ticket type {0} not found")]
    NotFound(Uuid),

    #[error("Purchase {0} not found")]
    PurchaseNotFound(Uuid),

    #[error("Not enough tickets available: requested {requested}, available {available}")]
    InsufficientInventory { requested: i32, available: i32 },

    #[error("Temporarily unable to complete purchase: {0}")]
    TryAgain(String),

    #[error("Database error")]
    Database(#[source] sqlx::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type PurchaseResult<T> = Result<T, PurchaseError>;

/// Postgres SQLSTATE codes for contention that a fresh attempt can resolve.
const LOCK_NOT_AVAILABLE: &str = "55P03";
const DEADLOCK_DETECTED: &str = "40P01";
const SERIALIZATION_FAILURE: &str = "40001";

impl PurchaseError {
    pub fn is_transient(&self) -> bool {
        matches!(self, PurchaseError::TryAgain(_))
    }
}

impl From<sqlx::Error> for PurchaseError {
    fn from(err: sqlx::Error) -> Self {
        let code = err
            .as_database_error()
            .and_then(|db| db.code())
            .map(|code| code.into_owned());

        match code.as_deref() {
            Some(LOCK_NOT_AVAILABLE) => PurchaseError::TryAgain("lock wait timed out".to_string()),
            Some(DEADLOCK_DETECTED) => PurchaseError::TryAgain("deadlock detected".to_string()),
            Some(SERIALIZATION_FAILURE) => {
                PurchaseError::TryAgain("serialization failure".to_string())
            }
            _ => match err {
                sqlx::Error::PoolTimedOut => {
                    PurchaseError::TryAgain("connection pool exhausted".to_string())
                }
                other => PurchaseError::Database(other),
            },
        }
    }
}

impl From<PurchaseError> for AppError {
    fn from(err: PurchaseError) -> Self {
        match err {
            PurchaseError::InvalidInput(msg) => AppError::ValidationError(msg),
            PurchaseError::NotFound(id) => {
                AppError::NotFound(format!("Ticket type '{}' was not found", id))
            }
            PurchaseError::PurchaseNotFound(id) => {
                AppError::NotFound(format!("Purchase '{}' was not found", id))
            }
            PurchaseError::InsufficientInventory {
                requested,
                available,
            } => AppError::InsufficientInventory {
                requested,
                available,
            },
            PurchaseError::TryAgain(msg) => AppError::TryAgain(msg),
            PurchaseError::Database(e) => AppError::DatabaseError(e),
            PurchaseError::Internal(msg) => AppError::InternalServerError(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_timeout_is_transient() {
        let err: PurchaseError = sqlx::Error::PoolTimedOut.into();
        assert!(err.is_transient());
    }

    #[test]
    fn test_row_not_found_is_not_transient() {
        let err: PurchaseError = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, PurchaseError::Database(_)));
        assert!(!err.is_transient());
    }

    #[test]
    fn test_storage_failure_is_not_reported_as_inventory() {
        let app_error: AppError = PurchaseError::Database(sqlx::Error::PoolClosed).into();
        assert_eq!(app_error.code(), "DATABASE_ERROR");
    }

    #[test]
    fn test_insufficient_inventory_message() {
        let err = PurchaseError::InsufficientInventory {
            requested: 3,
            available: 2,
        };
        assert_eq!(
            err.to_string(),
            "Not enough tickets available: requested 3, available 2"
        );
    }
}
