// Price Resolution Engine
//
// Turns a unit price, pricing type, quantity and duration into a line total,
// and selects the price rule applicable to an order line.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::sync::Arc;
use uuid::Uuid;

use crate::pricing::{
    config_store::RuleConfigurationStore,
    error::{PricingError, PricingResult},
    metrics::PerformanceMetrics,
    models::PriceRule,
    types::PricingType,
};

const SECONDS_PER_HOUR: i64 = 3_600;
const SECONDS_PER_DAY: i64 = 86_400;

/// Number of billing units a duration amounts to
///
/// Hours and days are billed per started unit. Negative durations bill nothing.
pub fn billable_units(pricing_type: PricingType, duration: Duration) -> Decimal {
    let secs = duration.num_seconds().max(0);
    match pricing_type {
        PricingType::Flat => Decimal::ONE,
        PricingType::PerHour => Decimal::from(ceil_div(secs, SECONDS_PER_HOUR)),
        PricingType::PerDay => Decimal::from(ceil_div(secs, SECONDS_PER_DAY)),
    }
}

fn ceil_div(value: i64, unit: i64) -> i64 {
    (value + unit - 1) / unit
}

/// Line total for a unit price
///
/// # Arguments
/// * `pricing_type` - How the duration turns into billing units
/// * `unit_price` - Price of one unit for one billing unit
/// * `quantity` - Ordered quantity
/// * `duration` - Rental duration; ignored by flat pricing
///
/// # Returns
/// The unrounded total, or `ValidationError` when it exceeds the decimal range
pub fn resolve_price(
    pricing_type: PricingType,
    unit_price: Decimal,
    quantity: i32,
    duration: Duration,
) -> PricingResult<Decimal> {
    let units = billable_units(pricing_type, duration);
    unit_price
        .checked_mul(Decimal::from(quantity))
        .and_then(|amount| amount.checked_mul(units))
        .ok_or_else(|| out_of_range(unit_price, quantity, units))
}

fn out_of_range(unit_price: Decimal, quantity: i32, units: Decimal) -> PricingError {
    PricingError::ValidationError(format!(
        "Line total out of range: {} x {} x {} units",
        unit_price, quantity, units
    ))
}

/// Totals of a line, rounded to cents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineTotals {
    pub ex_vat: Decimal,
    pub vat: Decimal,
    pub in_vat: Decimal,
}

/// Ex-VAT, VAT and in-VAT totals, all through the same pricing-type branch
///
/// # Arguments
/// * `vat_rate` - VAT as a fraction, 0.21 = 21 %
///
/// The other arguments are those of [`resolve_price`].
///
/// # Returns
/// Totals rounded half away from zero to cents, or `ValidationError` when
/// any of them exceeds the decimal range
pub fn resolve_line_totals(
    pricing_type: PricingType,
    unit_price: Decimal,
    vat_rate: Decimal,
    quantity: i32,
    duration: Duration,
) -> PricingResult<LineTotals> {
    let unit_vat = unit_price.checked_mul(vat_rate).ok_or_else(|| {
        out_of_range(unit_price, quantity, billable_units(pricing_type, duration))
    })?;
    let ex_vat = round_cents(resolve_price(pricing_type, unit_price, quantity, duration)?);
    let vat = round_cents(resolve_price(pricing_type, unit_vat, quantity, duration)?);
    let in_vat = ex_vat.checked_add(vat).ok_or_else(|| {
        out_of_range(unit_price, quantity, billable_units(pricing_type, duration))
    })?;

    Ok(LineTotals { ex_vat, vat, in_vat })
}

/// Money rounding: two places, half away from zero
pub(crate) fn round_cents(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Order line to price
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriceLine {
    pub product_id: Uuid,
    pub product_price_group_id: Option<Uuid>,
    /// Customer price group; the store default applies when unset
    pub price_group_id: Option<Uuid>,
    pub quantity: i32,
    pub duration: Duration,
    /// Fraction, 0.21 = 21 %
    pub vat_rate: Decimal,
}

impl PriceLine {
    pub fn new(product_id: Uuid, quantity: i32) -> Self {
        Self {
            product_id,
            product_price_group_id: None,
            price_group_id: None,
            quantity,
            duration: Duration::zero(),
            vat_rate: Decimal::ZERO,
        }
    }
}

/// How well a rule's scope fits a line; `None` when it does not apply
fn scope_specificity(rule: &PriceRule, line: &PriceLine) -> Option<(u8, u8)> {
    let product_rank = match (rule.product_id, rule.product_price_group_id) {
        (Some(product), _) if product == line.product_id => 2,
        (None, Some(group)) if Some(group) == line.product_price_group_id => 1,
        _ => return None,
    };
    let group_rank = match rule.price_group_id {
        None => 0,
        Some(group) if Some(group) == line.price_group_id => 1,
        Some(_) => return None,
    };
    Some((product_rank, group_rank))
}

/// Rule applicable to the line at `now`
///
/// Product-specific rules win over product-price-group rules, explicit price
/// groups over unset ones, then the first in persisted order.
pub fn select_price_rule<'a>(
    rules: &'a [PriceRule],
    line: &PriceLine,
    now: DateTime<Utc>,
) -> Option<&'a PriceRule> {
    rules
        .iter()
        .filter(|rule| rule.window.contains(now))
        .filter(|rule| rule.quantity.contains(line.quantity))
        .filter(|rule| rule.duration.contains(line.duration))
        .filter_map(|rule| scope_specificity(rule, line).map(|rank| (rule, rank)))
        .min_by_key(|(_, rank)| Reverse(*rank))
        .map(|(rule, _)| rule)
}

/// Priced order line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricedLine {
    pub rule_id: Uuid,
    pub unit_price: Decimal,
    pub pricing_type: PricingType,
    pub totals: LineTotals,
}

/// Price Engine
///
/// Resolves order lines against the cached price rules.
pub struct PriceEngine {
    config_store: Arc<RuleConfigurationStore>,
    metrics: PerformanceMetrics,
}

impl PriceEngine {
    pub fn new(config_store: Arc<RuleConfigurationStore>, metrics: PerformanceMetrics) -> Self {
        Self {
            config_store,
            metrics,
        }
    }

    /// Price a line at `now`
    ///
    /// # Arguments
    /// * `line` - Order line, with its price group already defaulted
    /// * `now` - Instant at which rule windows are evaluated
    ///
    /// # Returns
    /// The priced line, `None` when no rule applies, or `ValidationError`
    /// when the totals exceed the decimal range
    pub async fn price_line(
        &self,
        line: &PriceLine,
        now: DateTime<Utc>,
    ) -> PricingResult<Option<PricedLine>> {
        let _timer = self.metrics.start_price_resolution();

        let rules = self.config_store.get_price_rules().await?;
        let Some(rule) = select_price_rule(&rules, line, now) else {
            tracing::debug!("No price rule for product {}", line.product_id);
            return Ok(None);
        };

        let totals = resolve_line_totals(
            rule.pricing_type,
            rule.price,
            line.vat_rate,
            line.quantity,
            line.duration,
        )?;

        Ok(Some(PricedLine {
            rule_id: rule.id,
            unit_price: rule.price,
            pricing_type: rule.pricing_type,
            totals,
        }))
    }
}
