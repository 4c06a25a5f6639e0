// Error types for the pricing engine
// Covers input validation, persistence constraints and storage failures

use thiserror::Error;
use uuid::Uuid;

/// Main error type for the pricing engine
///
/// Coupon rejections are not errors: they are returned as
/// `CouponDecision::Rejected` so callers can show the message directly.
#[derive(Debug, Error)]
pub enum PricingError {
    /// User input is invalid (percentage out of range, overlapping quantity tier, ...)
    #[error("Validation failed: {0}")]
    ValidationError(String),

    /// A record would violate a persistence constraint
    /// (e.g. neither product nor product group set on a discount rule)
    #[error("Constraint violated: {0}")]
    ConstraintViolation(String),

    /// Stored configuration is unusable
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Referenced discount group does not exist
    #[error("Discount group not found: {0}")]
    GroupNotFound(Uuid),

    /// Failure inside a non-database record store (lock poisoning etc.)
    #[error("Storage error: {0}")]
    StorageError(String),

    /// Database operation errors
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),
}

/// Result type alias for pricing operations
pub type PricingResult<T> = Result<T, PricingError>;

impl From<validator::ValidationErrors> for PricingError {
    fn from(err: validator::ValidationErrors) -> Self {
        PricingError::ValidationError(err.to_string())
    }
}

impl PricingError {
    /// Whether the error was caused by caller input rather than infrastructure
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            PricingError::ValidationError(_)
                | PricingError::ConstraintViolation(_)
                | PricingError::GroupNotFound(_)
        )
    }
}
