//! Service traits for the collaborators the pricing core calls into
//!
//! Postgres implementations live in `repository`, in-memory ones in `memory`.

use async_trait::async_trait;
use uuid::Uuid;

use crate::pricing::{
    error::PricingResult,
    models::{Coupon, CustomerGroup, DiscountGroup, DiscountRule, PriceRule},
};

/// Source the rule configuration cache loads from
#[async_trait]
pub trait RuleSource: Send + Sync {
    /// All price rules, in persisted order
    async fn load_price_rules(&self) -> PricingResult<Vec<PriceRule>>;

    /// All discount rules, in persisted order
    async fn load_discount_rules(&self) -> PricingResult<Vec<DiscountRule>>;

    async fn load_discount_groups(&self) -> PricingResult<Vec<DiscountGroup>>;

    async fn load_customer_groups(&self) -> PricingResult<Vec<CustomerGroup>>;
}

/// Coupon persistence
#[async_trait]
pub trait CouponRepository: Send + Sync {
    /// Look a coupon up by its code, regardless of validity
    async fn find_by_code(&self, code: &str) -> PricingResult<Option<Coupon>>;

    /// Persist a new coupon with its product scope
    async fn insert(&self, coupon: Coupon) -> PricingResult<Coupon>;
}

/// Product master data
#[async_trait]
pub trait ProductLookup: Send + Sync {
    /// Resolve (creating on first use) the product behind a stable code
    async fn synthetic_product(&self, code: &str, name: &str) -> PricingResult<Uuid>;
}

/// Customer master data
#[async_trait]
pub trait CustomerDirectory: Send + Sync {
    /// Discount group the customer belongs to, if any
    async fn customer_group(&self, customer_id: Uuid) -> PricingResult<Option<Uuid>>;
}
