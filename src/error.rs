//! Error types and HTTP error response handling.
//!
//! This module defines all application errors and how they are converted
//! into HTTP responses with appropriate status codes and JSON bodies.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

/// Application-wide error type.
///
/// # Error Categories
///
/// - **Validation Errors**: the request cannot be honoured as sent (empty cart,
///   bad address, unusable voucher, insufficient balance or stock). Callers can
///   render an actionable message for these.
/// - **Authorization Errors**: missing credentials, or a status transition the
///   caller is not entitled to perform
/// - **Internal Errors**: persistence or ledger failures. These always roll the
///   surrounding transaction back and never leak their cause to clients.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Database operation failed (e.g., connection error, query error).
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Embedded migrations failed to apply.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Access token is missing, invalid, or inactive.
    #[error("Invalid access token")]
    InvalidToken,

    /// The buyer's cart has nothing to check out.
    #[error("Cart is empty")]
    CartEmpty,

    /// Delivery address does not exist or belongs to someone else.
    #[error("Invalid address")]
    InvalidAddress,

    /// Voucher is outside its validity window, has no quota left, or cannot be
    /// applied to this order without inverting a price.
    #[error("Invalid voucher")]
    InvalidVoucher,

    /// Buyer wallet balance does not strictly exceed the amount to pay.
    #[error("Insufficient balance")]
    InsufficientBalance,

    /// A variant does not have enough stock for the requested quantity.
    #[error("Insufficient stock for variant {0}")]
    InsufficientStock(u64),

    /// Status transition attempted by the wrong party or from a non-adjacent state.
    #[error("Unauthorized access")]
    UnauthorizedAccess,

    /// Requested resource does not exist.
    ///
    /// The payload names the kind of resource (e.g. "wallet", "order detail").
    #[error("{0} not found")]
    NotFound(&'static str),

    /// Request body or parameters are invalid.
    #[error("Invalid request")]
    InvalidRequest(String),

    /// The checkout or transition transaction exceeded its time budget and was rolled back.
    #[error("Checkout timed out")]
    CheckoutTimeout,
}

impl AppError {
    /// Whether the error is a validation-class failure the caller can act on,
    /// as opposed to an internal failure.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            AppError::CartEmpty
                | AppError::InvalidAddress
                | AppError::InvalidVoucher
                | AppError::InsufficientBalance
                | AppError::InsufficientStock(_)
                | AppError::InvalidRequest(_)
        )
    }

    /// Map a database error onto a domain error where a constraint tells us
    /// more than "storage failed".
    ///
    /// The wallet `CHECK (balance >= 0)` constraint backs up the
    /// in-transaction balance checks.
    pub(crate) fn from_constraint(error: sqlx::Error) -> Self {
        use sqlx::error::ErrorKind;

        let constraint = error
            .as_database_error()
            .filter(|db| matches!(db.kind(), ErrorKind::CheckViolation))
            .and_then(|db| db.constraint().map(str::to_owned));

        match constraint.as_deref() {
            Some("wallets_balance_check") => AppError::InsufficientBalance,
            _ => AppError::Database(error),
        }
    }
}

/// Convert AppError into an HTTP response.
///
/// # Response Format
///
/// ```json
/// {
///   "error": {
///     "code": "error_type",
///     "message": "Human-readable error message"
///   }
/// }
/// ```
///
/// Internal errors are logged here and replaced by a generic message.
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            AppError::InvalidToken => (StatusCode::UNAUTHORIZED, "invalid_token", self.to_string()),
            AppError::CartEmpty => (StatusCode::NOT_FOUND, "cart_empty", self.to_string()),
            AppError::InvalidAddress => {
                (StatusCode::BAD_REQUEST, "invalid_address", self.to_string())
            }
            AppError::InvalidVoucher => {
                (StatusCode::BAD_REQUEST, "invalid_voucher", self.to_string())
            }
            AppError::InsufficientBalance => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "insufficient_balance",
                self.to_string(),
            ),
            AppError::InsufficientStock(_) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "insufficient_stock",
                self.to_string(),
            ),
            AppError::UnauthorizedAccess => (
                StatusCode::UNAUTHORIZED,
                "unauthorized_access",
                self.to_string(),
            ),
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found", self.to_string()),
            AppError::InvalidRequest(ref msg) => {
                (StatusCode::BAD_REQUEST, "invalid_request", msg.clone())
            }
            AppError::CheckoutTimeout => (
                StatusCode::SERVICE_UNAVAILABLE,
                "checkout_timeout",
                self.to_string(),
            ),
            AppError::Database(ref e) => {
                tracing::error!(error = %e, "database failure");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "An internal error occurred".to_string(),
                )
            }
            AppError::Migration(ref e) => {
                tracing::error!(error = %e, "migration failure");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "An internal error occurred".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message
            }
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_errors_are_distinguishable_from_internal_ones() {
        assert!(AppError::CartEmpty.is_validation());
        assert!(AppError::InvalidVoucher.is_validation());
        assert!(AppError::InsufficientBalance.is_validation());
        assert!(AppError::InvalidAddress.is_validation());
        assert!(!AppError::Database(sqlx::Error::RowNotFound).is_validation());
        assert!(!AppError::UnauthorizedAccess.is_validation());
    }

    #[test]
    fn status_codes_follow_error_kind() {
        let cases = [
            (AppError::CartEmpty, StatusCode::NOT_FOUND),
            (AppError::InvalidVoucher, StatusCode::BAD_REQUEST),
            (AppError::InsufficientBalance, StatusCode::UNPROCESSABLE_ENTITY),
            (AppError::UnauthorizedAccess, StatusCode::UNAUTHORIZED),
            (AppError::CheckoutTimeout, StatusCode::SERVICE_UNAVAILABLE),
            (
                AppError::Database(sqlx::Error::PoolTimedOut),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (error, expected) in cases {
            assert_eq!(error.into_response().status(), expected);
        }
    }

    #[test]
    fn non_constraint_database_errors_stay_internal() {
        let mapped = AppError::from_constraint(sqlx::Error::RowNotFound);
        assert!(matches!(mapped, AppError::Database(_)));
    }
}
