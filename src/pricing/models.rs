// Persisted pricing records and the input DTOs used to create them

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::{Validate, ValidationError};

use crate::pricing::types::{
    DurationRange, PricingType, QuantityRange, ValidityWindow, MAX_DURATION_SECS,
    MAX_ORDER_QUANTITY,
};
use crate::validation::{
    validate_bounds, validate_coupon_code, validate_discount_fraction,
    validate_non_negative_amount,
};

/// Explicit store configuration handed to the pricing service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreContext {
    pub store_id: Uuid,
    pub default_price_group_id: Option<Uuid>,
}

/// Scope of a price rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PriceScope {
    pub price_group_id: Option<Uuid>,
    pub product_id: Option<Uuid>,
    pub product_price_group_id: Option<Uuid>,
}

/// A unit price for a product (or product price group), optionally per price group
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceRule {
    pub id: Uuid,
    pub price_group_id: Option<Uuid>,
    pub product_id: Option<Uuid>,
    pub product_price_group_id: Option<Uuid>,
    pub price: Decimal,
    pub pricing_type: PricingType,
    pub quantity: QuantityRange,
    pub duration: DurationRange,
    pub window: ValidityWindow,
    pub created_at: DateTime<Utc>,
}

impl PriceRule {
    pub fn scope(&self) -> PriceScope {
        PriceScope {
            price_group_id: self.price_group_id,
            product_id: self.product_id,
            product_price_group_id: self.product_price_group_id,
        }
    }
}

/// Scope of a discount rule: product side × customer side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DiscountScope {
    pub product_discount_group_id: Option<Uuid>,
    pub product_id: Option<Uuid>,
    pub customer_discount_group_id: Option<Uuid>,
    pub customer_id: Option<Uuid>,
}

impl DiscountScope {
    pub fn has_product_dimension(&self) -> bool {
        self.product_id.is_some() || self.product_discount_group_id.is_some()
    }
}

/// Discount granted on a product or product group
///
/// Optionally restricted to a customer or a customer group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscountRule {
    pub id: Uuid,
    pub product_discount_group_id: Option<Uuid>,
    pub product_id: Option<Uuid>,
    pub customer_discount_group_id: Option<Uuid>,
    pub customer_id: Option<Uuid>,
    pub discount_abs: Decimal,
    /// Fraction between 0 and 1
    pub discount_perc: Decimal,
    pub quantity: QuantityRange,
    pub duration: DurationRange,
    pub window: ValidityWindow,
    pub created_at: DateTime<Utc>,
}

impl DiscountRule {
    pub fn scope(&self) -> DiscountScope {
        DiscountScope {
            product_discount_group_id: self.product_discount_group_id,
            product_id: self.product_id,
            customer_discount_group_id: self.customer_discount_group_id,
            customer_id: self.customer_id,
        }
    }
}

/// Product-side discount group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscountGroup {
    pub id: Uuid,
    pub store_id: Option<Uuid>,
    pub group_number: String,
    pub description: String,
    pub discount_label: Option<String>,
    pub parent_id: Option<Uuid>,
    /// Sub-groups inherit this group's discounts
    pub include_children: bool,
}

/// Customer-side discount group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerGroup {
    pub id: Uuid,
    pub store_id: Option<Uuid>,
    pub group_number: String,
    pub description: String,
    pub parent_id: Option<Uuid>,
    pub include_children: bool,
}

/// Redeemable discount code
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Coupon {
    pub id: Uuid,
    pub discount_code: String,
    pub discount_label: String,
    /// Empty means every product
    pub product_ids: Vec<Uuid>,
    pub email: Option<String>,
    pub discount_abs: Decimal,
    pub discount_perc: Decimal,
    pub minimal_order_amount: Decimal,
    /// Negative or unset: distinct products required; positive: summed quantity required
    pub needs_products: Option<i32>,
    pub window: ValidityWindow,
}

/// A line of the order a coupon is checked against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    pub product_id: Uuid,
    pub quantity: i32,
}

// ============================================================================
// Input DTOs
// ============================================================================

/// Request to create a price rule
#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[validate(schema(function = "validate_price_rule_ranges"))]
pub struct NewPriceRule {
    pub price_group_id: Option<Uuid>,
    pub product_id: Option<Uuid>,
    pub product_price_group_id: Option<Uuid>,
    #[validate(custom = "validate_non_negative_amount")]
    pub price: Decimal,
    #[serde(default)]
    pub pricing_type: PricingType,
    #[validate(range(min = 0))]
    pub min_order_quantity: Option<i32>,
    #[validate(range(min = 0))]
    pub max_order_quantity: Option<i32>,
    #[validate(range(min = 0))]
    pub min_duration_secs: Option<i64>,
    #[validate(range(min = 0))]
    pub max_duration_secs: Option<i64>,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_to: Option<DateTime<Utc>>,
}

fn validate_price_rule_ranges(rule: &NewPriceRule) -> Result<(), ValidationError> {
    validate_bounds(rule.min_order_quantity, rule.max_order_quantity, "quantity_range_inverted")?;
    validate_bounds(rule.min_duration_secs, rule.max_duration_secs, "duration_range_inverted")?;
    validate_bounds(rule.valid_from, rule.valid_to, "validity_window_inverted")
}

impl NewPriceRule {
    pub fn scope(&self) -> PriceScope {
        PriceScope {
            price_group_id: self.price_group_id,
            product_id: self.product_id,
            product_price_group_id: self.product_price_group_id,
        }
    }

    /// Build the record, filling defaults relative to `now`
    pub fn into_rule(self, now: DateTime<Utc>) -> PriceRule {
        let window = window_or_default(self.valid_from, self.valid_to, now);
        PriceRule {
            id: Uuid::new_v4(),
            price_group_id: self.price_group_id,
            product_id: self.product_id,
            product_price_group_id: self.product_price_group_id,
            price: self.price.round_dp(2),
            pricing_type: self.pricing_type,
            quantity: QuantityRange::new(
                self.min_order_quantity.unwrap_or(0),
                self.max_order_quantity.unwrap_or(MAX_ORDER_QUANTITY),
            ),
            duration: DurationRange::new(
                self.min_duration_secs.unwrap_or(0),
                self.max_duration_secs.unwrap_or(MAX_DURATION_SECS),
            ),
            window,
            created_at: now,
        }
    }
}

/// Request to create a discount rule
///
/// `discount_perc` may be given as a fraction (0.15) or in percentage points (15).
#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[validate(schema(function = "validate_discount_rule_ranges"))]
pub struct NewDiscountRule {
    pub product_discount_group_id: Option<Uuid>,
    pub product_id: Option<Uuid>,
    pub customer_discount_group_id: Option<Uuid>,
    pub customer_id: Option<Uuid>,
    #[validate(custom = "validate_non_negative_amount")]
    pub discount_abs: Option<Decimal>,
    #[validate(custom = "validate_discount_fraction")]
    pub discount_perc: Option<Decimal>,
    #[validate(range(min = 0))]
    pub min_order_quantity: Option<i32>,
    #[validate(range(min = 0))]
    pub max_order_quantity: Option<i32>,
    #[validate(range(min = 0))]
    pub min_duration_secs: Option<i64>,
    #[validate(range(min = 0))]
    pub max_duration_secs: Option<i64>,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_to: Option<DateTime<Utc>>,
}

fn validate_discount_rule_ranges(rule: &NewDiscountRule) -> Result<(), ValidationError> {
    validate_bounds(rule.min_order_quantity, rule.max_order_quantity, "quantity_range_inverted")?;
    validate_bounds(rule.min_duration_secs, rule.max_duration_secs, "duration_range_inverted")?;
    validate_bounds(rule.valid_from, rule.valid_to, "validity_window_inverted")
}

impl NewDiscountRule {
    pub fn scope(&self) -> DiscountScope {
        DiscountScope {
            product_discount_group_id: self.product_discount_group_id,
            product_id: self.product_id,
            customer_discount_group_id: self.customer_discount_group_id,
            customer_id: self.customer_id,
        }
    }

    pub fn into_rule(self, now: DateTime<Utc>) -> DiscountRule {
        let window = window_or_default(self.valid_from, self.valid_to, now);
        DiscountRule {
            id: Uuid::new_v4(),
            product_discount_group_id: self.product_discount_group_id,
            product_id: self.product_id,
            customer_discount_group_id: self.customer_discount_group_id,
            customer_id: self.customer_id,
            discount_abs: self.discount_abs.unwrap_or(Decimal::ZERO).round_dp(4),
            discount_perc: self.discount_perc.unwrap_or(Decimal::ZERO).round_dp(4),
            quantity: QuantityRange::new(
                self.min_order_quantity.unwrap_or(0),
                self.max_order_quantity.unwrap_or(MAX_ORDER_QUANTITY),
            ),
            duration: DurationRange::new(
                self.min_duration_secs.unwrap_or(0),
                self.max_duration_secs.unwrap_or(MAX_DURATION_SECS),
            ),
            window,
            created_at: now,
        }
    }
}

/// Request to create a coupon
#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[validate(schema(function = "validate_coupon_window"))]
pub struct NewCoupon {
    #[validate(length(min = 1, max = 30), custom = "validate_coupon_code")]
    pub discount_code: String,
    #[validate(length(max = 100))]
    pub discount_label: String,
    #[serde(default)]
    pub product_ids: Vec<Uuid>,
    #[validate(email)]
    pub email: Option<String>,
    #[validate(custom = "validate_non_negative_amount")]
    pub discount_abs: Option<Decimal>,
    #[validate(custom = "validate_discount_fraction")]
    pub discount_perc: Option<Decimal>,
    #[validate(custom = "validate_non_negative_amount")]
    pub minimal_order_amount: Option<Decimal>,
    pub needs_products: Option<i32>,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_to: Option<DateTime<Utc>>,
}

fn validate_coupon_window(coupon: &NewCoupon) -> Result<(), ValidationError> {
    validate_bounds(coupon.valid_from, coupon.valid_to, "validity_window_inverted")
}

impl NewCoupon {
    /// Blank email means "any buyer"
    pub fn normalized(mut self) -> Self {
        if self
            .email
            .as_deref()
            .map(|email| email.trim().is_empty())
            .unwrap_or(false)
        {
            self.email = None;
        }
        self.discount_code = self.discount_code.trim().to_string();
        self
    }

    pub fn into_coupon(self, now: DateTime<Utc>) -> Coupon {
        let window = window_or_default(self.valid_from, self.valid_to, now);
        let mut product_ids = self.product_ids;
        product_ids.sort();
        product_ids.dedup();

        Coupon {
            id: Uuid::new_v4(),
            discount_code: self.discount_code,
            discount_label: self.discount_label,
            product_ids,
            email: self.email,
            discount_abs: self.discount_abs.unwrap_or(Decimal::ZERO).round_dp(4),
            discount_perc: self.discount_perc.unwrap_or(Decimal::ZERO).round_dp(4),
            minimal_order_amount: self.minimal_order_amount.unwrap_or(Decimal::ZERO).round_dp(2),
            needs_products: self.needs_products,
            window,
        }
    }
}

fn window_or_default(
    valid_from: Option<DateTime<Utc>>,
    valid_to: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> ValidityWindow {
    let window = ValidityWindow::starting(valid_from.unwrap_or(now));
    match valid_to {
        Some(valid_to) => ValidityWindow::new(window.valid_from, valid_to),
        None => window,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    #[test]
    fn test_new_price_rule_defaults() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let rule = NewPriceRule {
            product_id: Some(Uuid::new_v4()),
            price: dec!(19.999),
            ..Default::default()
        }
        .into_rule(now);

        assert_eq!(rule.price, dec!(20.00));
        assert_eq!(rule.pricing_type, PricingType::Flat);
        assert_eq!(rule.quantity, QuantityRange::default());
        assert_eq!(rule.duration, DurationRange::default());
        assert_eq!(rule.window.valid_from, now);
        assert!(rule.window.is_open_ended());
    }

    #[test]
    fn test_new_price_rule_rejects_inverted_ranges() {
        let rule = NewPriceRule {
            product_id: Some(Uuid::new_v4()),
            price: dec!(10),
            min_order_quantity: Some(10),
            max_order_quantity: Some(5),
            ..Default::default()
        };
        assert!(rule.validate().is_err());
    }

    #[test]
    fn test_new_price_rule_rejects_negative_price() {
        let rule = NewPriceRule {
            product_id: Some(Uuid::new_v4()),
            price: dec!(-1),
            ..Default::default()
        };
        assert!(rule.validate().is_err());
    }

    #[test]
    fn test_new_discount_rule_rounds_to_four_places() {
        let now = Utc::now();
        let rule = NewDiscountRule {
            product_id: Some(Uuid::new_v4()),
            discount_abs: Some(dec!(1.23456)),
            discount_perc: Some(dec!(0.123456)),
            ..Default::default()
        }
        .into_rule(now);

        assert_eq!(rule.discount_abs, dec!(1.2346));
        assert_eq!(rule.discount_perc, dec!(0.1235));
    }

    #[test]
    fn test_discount_scope_product_dimension() {
        let scope = DiscountScope {
            product_discount_group_id: None,
            product_id: None,
            customer_discount_group_id: Some(Uuid::new_v4()),
            customer_id: None,
        };
        assert!(!scope.has_product_dimension());
    }

    #[test]
    fn test_new_coupon_blank_email_is_none() {
        let coupon = NewCoupon {
            discount_code: " WELCOME ".to_string(),
            discount_label: "Welcome".to_string(),
            email: Some("".to_string()),
            ..Default::default()
        }
        .normalized();

        assert_eq!(coupon.email, None);
        assert_eq!(coupon.discount_code, "WELCOME");
        assert!(coupon.validate().is_ok());
    }

    #[test]
    fn test_new_coupon_validation() {
        let coupon = NewCoupon {
            discount_code: "TOO LONG AND HAS SPACES".to_string(),
            discount_label: "x".to_string(),
            discount_perc: Some(dec!(1.5)),
            ..Default::default()
        };
        let errors = coupon.validate().unwrap_err();
        let fields = errors.field_errors();
        assert!(fields.contains_key("discount_code"));
        assert!(fields.contains_key("discount_perc"));
    }

    #[test]
    fn test_coupon_products_deduplicated() {
        let product = Uuid::new_v4();
        let coupon = NewCoupon {
            discount_code: "DUP".to_string(),
            discount_label: "dup".to_string(),
            product_ids: vec![product, product],
            ..Default::default()
        }
        .into_coupon(Utc::now());

        assert_eq!(coupon.product_ids, vec![product]);
        assert_eq!(coupon.minimal_order_amount, Decimal::ZERO);
    }
}
