// Domain type definitions shared by the pricing engines

use chrono::{DateTime, Duration, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Default upper bound of an order-quantity range
pub const MAX_ORDER_QUANTITY: i32 = 9_999_999;

/// Default upper bound of a duration range (100 days)
pub const MAX_DURATION_SECS: i64 = 100 * 86_400;

/// Far-future `valid_to` used for open-ended windows (9999-12-31)
pub fn open_ended() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(9999, 12, 31, 0, 0, 0)
        .single()
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// How a unit price combines with quantity and duration
///
/// Stored and exchanged as the codes `price`, `price_per_hour` and
/// `price_per_day`. Any other code reads back as `Flat`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum PricingType {
    /// Unit price times quantity
    #[default]
    Flat,

    /// Billed per started hour
    PerHour,

    /// Billed per started day
    PerDay,
}

impl PricingType {
    pub fn as_code(&self) -> &'static str {
        match self {
            PricingType::Flat => "price",
            PricingType::PerHour => "price_per_hour",
            PricingType::PerDay => "price_per_day",
        }
    }

    /// Parse a stored code, falling back to `Flat` for anything unknown
    pub fn from_code(code: &str) -> Self {
        match code.trim() {
            "price_per_hour" => PricingType::PerHour,
            "price_per_day" => PricingType::PerDay,
            "price" => PricingType::Flat,
            other => {
                tracing::debug!("Unknown pricing type '{}', treating as flat", other);
                PricingType::Flat
            }
        }
    }
}

impl fmt::Display for PricingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_code())
    }
}

impl From<String> for PricingType {
    fn from(code: String) -> Self {
        PricingType::from_code(&code)
    }
}

impl From<PricingType> for String {
    fn from(pricing_type: PricingType) -> Self {
        pricing_type.as_code().to_string()
    }
}

/// Half-open validity interval `[valid_from, valid_to)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidityWindow {
    pub valid_from: DateTime<Utc>,
    pub valid_to: DateTime<Utc>,
}

impl ValidityWindow {
    pub fn new(valid_from: DateTime<Utc>, valid_to: DateTime<Utc>) -> Self {
        Self { valid_from, valid_to }
    }

    /// Window starting at `valid_from` with no end
    pub fn starting(valid_from: DateTime<Utc>) -> Self {
        Self::new(valid_from, open_ended())
    }

    /// Whether `at` falls inside the window
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.valid_from <= at && at < self.valid_to
    }

    /// Whether the window has ended by `now`
    pub fn has_elapsed(&self, now: DateTime<Utc>) -> bool {
        self.valid_to <= now
    }

    pub fn is_open_ended(&self) -> bool {
        self.valid_to >= open_ended()
    }

    /// Whether two windows share at least one instant
    pub fn overlaps(&self, other: &ValidityWindow) -> bool {
        self.valid_from < other.valid_to && other.valid_from < self.valid_to
    }
}

/// Inclusive order-quantity range `[min, max]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuantityRange {
    pub min: i32,
    pub max: i32,
}

impl QuantityRange {
    pub fn new(min: i32, max: i32) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, quantity: i32) -> bool {
        self.min <= quantity && quantity <= self.max
    }
}

impl Default for QuantityRange {
    fn default() -> Self {
        Self::new(0, MAX_ORDER_QUANTITY)
    }
}

/// Inclusive duration range, stored as whole seconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DurationRange {
    pub min_secs: i64,
    pub max_secs: i64,
}

impl DurationRange {
    pub fn new(min_secs: i64, max_secs: i64) -> Self {
        Self { min_secs, max_secs }
    }

    pub fn contains(&self, duration: Duration) -> bool {
        let secs = duration.num_seconds();
        self.min_secs <= secs && secs <= self.max_secs
    }
}

impl Default for DurationRange {
    fn default() -> Self {
        Self::new(0, MAX_DURATION_SECS)
    }
}

/// Absolute and percentage reduction pair
///
/// `percentage` is a fraction (0.1 = 10 %).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DiscountAmounts {
    pub absolute: Decimal,
    pub percentage: Decimal,
}

impl DiscountAmounts {
    pub const NONE: DiscountAmounts = DiscountAmounts {
        absolute: Decimal::ZERO,
        percentage: Decimal::ZERO,
    };

    pub fn new(absolute: Decimal, percentage: Decimal) -> Self {
        Self { absolute, percentage }
    }

    pub fn is_none(&self) -> bool {
        self.absolute.is_zero() && self.percentage.is_zero()
    }
}
