// Validation utilities module
// Custom validator functions for pricing, discount and coupon input

use rust_decimal::Decimal;
use validator::ValidationError;

/// Validates that a monetary amount is not negative
pub fn validate_non_negative_amount(amount: &Decimal) -> Result<(), ValidationError> {
    if amount.is_sign_negative() && !amount.is_zero() {
        Err(ValidationError::new("amount_must_not_be_negative"))
    } else {
        Ok(())
    }
}

/// Validates that a discount percentage is a fraction between 0 and 1
pub fn validate_discount_fraction(percentage: &Decimal) -> Result<(), ValidationError> {
    if *percentage < Decimal::ZERO || *percentage > Decimal::ONE {
        Err(ValidationError::new("discount_percentage_out_of_range"))
    } else {
        Ok(())
    }
}

/// Validates the characters of a coupon code
/// Accepted: ASCII letters, digits, dash and underscore
pub fn validate_coupon_code(code: &str) -> Result<(), ValidationError> {
    let valid = !code.is_empty()
        && code
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(ValidationError::new("invalid_coupon_code"))
    }
}

/// Validates that an optional lower bound does not exceed an optional upper bound
pub fn validate_bounds<T: PartialOrd>(
    min: Option<T>,
    max: Option<T>,
    code: &'static str,
) -> Result<(), ValidationError> {
    match (min, max) {
        (Some(min), Some(max)) if min > max => Err(ValidationError::new(code)),
        _ => Ok(()),
    }
}
