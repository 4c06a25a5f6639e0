// Pricing Engine Module
//
// Resolves line prices, discounts and coupons for an e-commerce backend.
// Rules are versioned by validity window: saving a rule closes the one it
// supersedes instead of deleting it.

pub mod collaborators;
pub mod config_store;
pub mod coupon;
pub mod discount_engine;
pub mod error;
pub mod memory;
pub mod metrics;
pub mod models;
pub mod price_engine;
pub mod repository;
pub mod temporal;
pub mod types;

#[cfg(test)]
mod tests;

pub use collaborators::{CouponRepository, CustomerDirectory, ProductLookup, RuleSource};
pub use config_store::{CacheSection, RuleConfigurationStore, CACHE_TTL};
pub use coupon::{
    CouponDecision, CouponEngine, CouponReduction, CouponReductionKind, CouponValidator,
    ProductRequirement, Redemption,
};
pub use discount_engine::{DiscountEngine, DiscountQuery, Scope};
pub use error::{PricingError, PricingResult};
pub use memory::{InMemoryRecordStore, MemoryBackend};
pub use metrics::{MetricsSummary, PerformanceMetrics};
pub use models::{
    Coupon, CustomerGroup, DiscountGroup, DiscountRule, NewCoupon, NewDiscountRule, NewPriceRule,
    OrderLine, PriceRule, StoreContext,
};
pub use price_engine::{LineTotals, PriceEngine, PriceLine, PricedLine};
pub use temporal::{RecordStore, TemporalStore, UpsertOutcome, Versioned};
pub use types::{DiscountAmounts, PricingType, ValidityWindow};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;
use validator::Validate;

use discount_engine::{check_quantity_tiers, normalize_discount_percentage};

/// Storage and collaborator implementations the service runs on
#[derive(Clone)]
pub struct PricingBackend {
    pub price_rules: Arc<dyn RecordStore<PriceRule>>,
    pub discount_rules: Arc<dyn RecordStore<DiscountRule>>,
    pub rule_source: Arc<dyn RuleSource>,
    pub coupons: Arc<dyn CouponRepository>,
    pub products: Arc<dyn ProductLookup>,
    pub customers: Arc<dyn CustomerDirectory>,
}

/// Pricing Service
///
/// Entry point wiring the engines to the cached rule configuration, the
/// versioned rule stores and the collaborator lookups.
pub struct PricingService {
    context: StoreContext,
    config_store: Arc<RuleConfigurationStore>,
    price_engine: PriceEngine,
    discount_engine: DiscountEngine,
    coupon_engine: CouponEngine,
    price_rules: TemporalStore<PriceRule>,
    discount_rules: TemporalStore<DiscountRule>,
    coupons: Arc<dyn CouponRepository>,
    customers: Arc<dyn CustomerDirectory>,
    metrics: PerformanceMetrics,
}

impl PricingService {
    pub fn new(backend: PricingBackend, context: StoreContext, cache_ttl: Duration) -> Self {
        let metrics = PerformanceMetrics::new();
        let config_store = Arc::new(
            RuleConfigurationStore::with_metrics(backend.rule_source, metrics.clone())
                .with_ttl(cache_ttl),
        );

        Self {
            context,
            price_engine: PriceEngine::new(config_store.clone(), metrics.clone()),
            discount_engine: DiscountEngine::new(config_store.clone(), metrics.clone()),
            coupon_engine: CouponEngine::new(
                backend.coupons.clone(),
                backend.products,
                metrics.clone(),
            ),
            config_store,
            price_rules: TemporalStore::new(backend.price_rules),
            discount_rules: TemporalStore::new(backend.discount_rules),
            coupons: backend.coupons,
            customers: backend.customers,
            metrics,
        }
    }

    pub fn context(&self) -> &StoreContext {
        &self.context
    }

    pub fn metrics(&self) -> &PerformanceMetrics {
        &self.metrics
    }

    pub fn config_store(&self) -> &Arc<RuleConfigurationStore> {
        &self.config_store
    }

    /// Pre-load the rule cache
    ///
    /// Called at startup to avoid cold-cache latency on the first request.
    pub async fn warm_cache(&self) -> PricingResult<()> {
        tracing::info!("Warming pricing rule cache for store {}", self.context.store_id);
        self.config_store.warm().await?;
        tracing::info!("Pricing rule cache warmed");
        Ok(())
    }

    // ========================================================================
    // Resolution
    // ========================================================================

    /// Price an order line
    ///
    /// The store's default price group applies when the line has none.
    ///
    /// # Arguments
    /// * `line` - Product, quantity, duration and VAT rate to price
    /// * `now` - Instant at which rule windows are evaluated
    ///
    /// # Returns
    /// The priced line with its totals, or `None` when no rule applies
    pub async fn price_line(
        &self,
        line: PriceLine,
        now: DateTime<Utc>,
    ) -> PricingResult<Option<PricedLine>> {
        let line = PriceLine {
            price_group_id: line.price_group_id.or(self.context.default_price_group_id),
            ..line
        };
        self.price_engine.price_line(&line, now).await
    }

    /// Best discount for the query, looking the customer's group up when not given
    ///
    /// # Returns
    /// The largest absolute and percentage discounts over every matching
    /// rule, taken independently. Both are zero when nothing matches.
    pub async fn best_discount(
        &self,
        query: DiscountQuery,
        now: DateTime<Utc>,
    ) -> PricingResult<DiscountAmounts> {
        let customer_group_id = match (query.customer_group_id, query.customer_id) {
            (Some(group), _) => Some(group),
            (None, Some(customer)) => self.customers.customer_group(customer).await?,
            (None, None) => None,
        };
        let query = DiscountQuery {
            customer_group_id,
            ..query
        };
        self.discount_engine.best_discount(&query, now).await
    }

    /// First tier of a product discount group containing `quantity`
    ///
    /// # Arguments
    /// * `group_id` - Product discount group
    /// * `quantity` - Ordered quantity to place in a tier
    /// * `now` - Instant at which rule windows are evaluated
    pub async fn discount_for_quantity(
        &self,
        group_id: Uuid,
        quantity: i32,
        now: DateTime<Utc>,
    ) -> PricingResult<DiscountAmounts> {
        self.discount_engine
            .group_discount_for_quantity(group_id, quantity, now)
            .await
    }

    /// Largest discounts any active rule of a product discount group grants
    ///
    /// # Arguments
    /// * `group_id` - Product discount group
    /// * `now` - Instant at which rule windows are evaluated
    ///
    /// # Returns
    /// Per-axis maxima, zero when the group has no active rule
    pub async fn group_max_discount(
        &self,
        group_id: Uuid,
        now: DateTime<Utc>,
    ) -> PricingResult<DiscountAmounts> {
        self.discount_engine.group_max_discount(group_id, now).await
    }

    /// Run the coupon gates against an order
    ///
    /// # Arguments
    /// * `coupon` - Coupon already looked up by code
    /// * `emails` - Addresses identifying the buyer
    /// * `order_amount` - Order total the minimum amount is checked against
    /// * `lines` - Order lines checked against the coupon's products
    ///
    /// # Returns
    /// `Accepted`, or `Rejected` with the message of the first failing gate
    pub fn validate_coupon(
        &self,
        coupon: &Coupon,
        emails: &[&str],
        order_amount: Decimal,
        lines: &[OrderLine],
    ) -> CouponDecision {
        self.coupon_engine
            .validate(coupon, emails, order_amount, lines)
    }

    /// Look a code up, validate it against the order and resolve its reduction
    ///
    /// Unknown codes and codes outside their validity window are rejected
    /// with the same message. Arguments are those of
    /// [`validate_coupon`](Self::validate_coupon) plus the code and `now`.
    pub async fn redeem_coupon(
        &self,
        code: &str,
        emails: &[&str],
        order_amount: Decimal,
        lines: &[OrderLine],
        now: DateTime<Utc>,
    ) -> PricingResult<Redemption> {
        self.coupon_engine
            .redeem(code, emails, order_amount, lines, now)
            .await
    }

    // ========================================================================
    // Rule saving
    // ========================================================================

    /// Validate and save a price rule
    ///
    /// # Arguments
    /// * `input` - Rule to save; needs a product or a product price group
    /// * `now` - Save time, also the default start of the rule's window
    ///
    /// # Returns
    /// `Created` or `Superseded` with the ids of the closed records, or
    /// `Deduplicated` with the identical running rule. Invalid input fails
    /// with `ValidationError` or `ConstraintViolation`.
    pub async fn save_price_rule(
        &self,
        input: NewPriceRule,
        now: DateTime<Utc>,
    ) -> PricingResult<UpsertOutcome<PriceRule>> {
        let _timer = self.metrics.start_rule_save();

        input.validate().map_err(|e| {
            tracing::warn!("Rejected price rule: {}", e);
            PricingError::from(e)
        })?;
        if input.product_id.is_none() && input.product_price_group_id.is_none() {
            return Err(PricingError::ConstraintViolation(
                "A price rule needs a product or a product price group".to_string(),
            ));
        }

        let outcome = self.price_rules.upsert(input.into_rule(now), now).await?;
        if outcome.is_new() {
            self.config_store.invalidate(CacheSection::PriceRules).await;
            tracing::info!(
                "Saved price rule {} ({} superseded)",
                outcome.record().id,
                outcome.truncated().len()
            );
        }
        Ok(outcome)
    }

    /// Save a discount rule; percentages above 1 are read as percentage points
    ///
    /// Group rules are rejected when their quantity range overlaps a tier of
    /// another running rule of the same product discount group. Returns the
    /// same outcomes as [`save_price_rule`](Self::save_price_rule).
    pub async fn save_discount_rule(
        &self,
        input: NewDiscountRule,
        now: DateTime<Utc>,
    ) -> PricingResult<UpsertOutcome<DiscountRule>> {
        let _timer = self.metrics.start_rule_save();

        let input = NewDiscountRule {
            discount_perc: input.discount_perc.map(normalize_discount_percentage),
            ..input
        };
        input.validate().map_err(|e| {
            tracing::warn!("Rejected discount rule: {}", e);
            PricingError::from(e)
        })?;
        if !input.scope().has_product_dimension() {
            return Err(PricingError::ConstraintViolation(
                "A discount needs a product or a product discount group".to_string(),
            ));
        }

        let rule = input.into_rule(now);
        if rule.product_discount_group_id.is_some() {
            let existing = self.config_store.load_discount_rules().await?;
            check_quantity_tiers(&existing, &rule, now).map_err(|e| {
                tracing::warn!("Rejected discount rule: {}", e);
                e
            })?;
        }

        let outcome = self.discount_rules.upsert(rule, now).await?;
        if outcome.is_new() {
            self.config_store.invalidate(CacheSection::DiscountRules).await;
            tracing::info!(
                "Saved discount rule {} ({} superseded)",
                outcome.record().id,
                outcome.truncated().len()
            );
        }
        Ok(outcome)
    }

    /// Validate and save a coupon
    ///
    /// # Arguments
    /// * `input` - Coupon to save; the code and a blank email are trimmed away
    /// * `now` - Save time, also the default start of the coupon's window
    ///
    /// # Returns
    /// The stored coupon, or `ConstraintViolation` when the code is taken
    pub async fn save_coupon(&self, input: NewCoupon, now: DateTime<Utc>) -> PricingResult<Coupon> {
        let _timer = self.metrics.start_rule_save();

        let input = input.normalized();
        input.validate().map_err(|e| {
            tracing::warn!("Rejected coupon {}: {}", input.discount_code, e);
            PricingError::from(e)
        })?;

        let coupon = self.coupons.insert(input.into_coupon(now)).await?;
        tracing::info!("Saved coupon {}", coupon.discount_code);
        Ok(coupon)
    }
}
