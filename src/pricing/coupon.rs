// Coupon Validation
//
// Gates a redeemable code on buyer email, minimum order amount and the
// products in the order, then turns it into a reduction line. Rejections are
// returned as display-ready messages, never as errors.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

use crate::pricing::{
    collaborators::{CouponRepository, ProductLookup},
    error::PricingResult,
    metrics::PerformanceMetrics,
    models::{Coupon, OrderLine},
    price_engine::round_cents,
};

pub const UNKNOWN_COUPON_MESSAGE: &str = "This coupon code is not valid";
pub const WRONG_BUYER_MESSAGE: &str = "This coupon is not valid for you";

/// Outcome of validating a coupon
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CouponDecision {
    Accepted,
    Rejected(String),
}

impl CouponDecision {
    pub fn is_accepted(&self) -> bool {
        matches!(self, CouponDecision::Accepted)
    }

    pub fn rejection(&self) -> Option<&str> {
        match self {
            CouponDecision::Accepted => None,
            CouponDecision::Rejected(reason) => Some(reason),
        }
    }
}

/// What the order must contain of the coupon's products
///
/// Decoded from `needs_products`: unset or ≤ 0 counts distinct products,
/// at least every scoped one and at least `|needs_products|`; positive sums
/// quantities.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProductRequirement {
    DistinctProducts(usize),
    TotalQuantity(i64),
}

impl ProductRequirement {
    pub fn decode(needs_products: Option<i32>, scoped_products: usize) -> Self {
        match needs_products {
            None => ProductRequirement::DistinctProducts(scoped_products),
            Some(n) if n > 0 => ProductRequirement::TotalQuantity(i64::from(n)),
            Some(n) => {
                let threshold = (n.unsigned_abs() as usize).max(scoped_products);
                ProductRequirement::DistinctProducts(threshold)
            }
        }
    }
}

/// Sequential coupon gates
pub struct CouponValidator;

impl CouponValidator {
    /// Buyer gate: one of the candidate emails must equal the coupon's
    pub fn check_email(coupon: &Coupon, emails: &[&str]) -> Result<(), String> {
        match coupon.email.as_deref() {
            Some(required) if !emails.iter().any(|email| *email == required) => {
                Err(WRONG_BUYER_MESSAGE.to_string())
            }
            _ => Ok(()),
        }
    }

    pub fn check_minimum_amount(coupon: &Coupon, order_amount: Decimal) -> Result<(), String> {
        if order_amount >= coupon.minimal_order_amount {
            Ok(())
        } else {
            Err(format!(
                "This coupon is only valid for orders of at least {:.2}",
                coupon.minimal_order_amount
            ))
        }
    }

    /// Product gate, only for coupons scoped to specific products
    pub fn check_products(coupon: &Coupon, lines: &[OrderLine]) -> Result<(), String> {
        if coupon.product_ids.is_empty() {
            return Ok(());
        }

        let scoped: HashSet<Uuid> = coupon.product_ids.iter().copied().collect();
        let matching = lines.iter().filter(|line| scoped.contains(&line.product_id));

        match ProductRequirement::decode(coupon.needs_products, scoped.len()) {
            ProductRequirement::DistinctProducts(required) => {
                let present: HashSet<Uuid> = matching.map(|line| line.product_id).collect();
                if present.len() >= required {
                    Ok(())
                } else {
                    Err(format!(
                        "This coupon requires {} different products from its selection",
                        required
                    ))
                }
            }
            ProductRequirement::TotalQuantity(required) => {
                let quantity: i64 = matching.map(|line| i64::from(line.quantity)).sum();
                if quantity >= required {
                    Ok(())
                } else {
                    Err(format!(
                        "This coupon requires at least {} items from its selection",
                        required
                    ))
                }
            }
        }
    }

    /// Run every gate in order, stopping at the first failure
    pub fn validate(
        coupon: &Coupon,
        emails: &[&str],
        order_amount: Decimal,
        lines: &[OrderLine],
    ) -> CouponDecision {
        let result = Self::check_email(coupon, emails)
            .and_then(|_| Self::check_minimum_amount(coupon, order_amount))
            .and_then(|_| Self::check_products(coupon, lines));

        match result {
            Ok(()) => CouponDecision::Accepted,
            Err(reason) => {
                tracing::debug!("Coupon {} rejected: {}", coupon.discount_code, reason);
                CouponDecision::Rejected(reason)
            }
        }
    }
}

/// Kind of reduction line a coupon produces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CouponReductionKind {
    Absolute,
    Percentage,
}

impl CouponReductionKind {
    /// Stable code of the product representing the reduction
    pub fn product_code(&self) -> &'static str {
        match self {
            CouponReductionKind::Absolute => "DISCOUNT_COUPON_ABS",
            CouponReductionKind::Percentage => "DISCOUNT_COUPON_PERC",
        }
    }
}

/// Reduction a valid coupon grants, as a positive amount
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CouponReduction {
    pub kind: CouponReductionKind,
    pub amount: Decimal,
    pub label: String,
}

/// Reduction line for a coupon; absolute wins when both amounts are set
pub fn reduction_line(coupon: &Coupon, order_amount: Decimal) -> Option<CouponReduction> {
    let (kind, amount) = if coupon.discount_abs > Decimal::ZERO {
        (CouponReductionKind::Absolute, coupon.discount_abs)
    } else if coupon.discount_perc > Decimal::ZERO {
        (
            CouponReductionKind::Percentage,
            round_cents(order_amount * coupon.discount_perc),
        )
    } else {
        return None;
    };

    Some(CouponReduction {
        kind,
        amount,
        label: coupon.discount_label.clone(),
    })
}

/// Result of redeeming a code against an order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Redemption {
    /// Valid coupon with a reduction, booked on the synthetic product
    Applied {
        coupon_id: Uuid,
        product_id: Uuid,
        reduction: CouponReduction,
    },

    /// Valid coupon carrying no amount
    NoReduction { coupon_id: Uuid },

    Rejected(String),
}

impl Redemption {
    pub fn is_rejected(&self) -> bool {
        matches!(self, Redemption::Rejected(_))
    }
}

/// Coupon Engine
///
/// Looks codes up, validates them and resolves the reduction product.
pub struct CouponEngine {
    coupons: Arc<dyn CouponRepository>,
    products: Arc<dyn ProductLookup>,
    metrics: PerformanceMetrics,
}

impl CouponEngine {
    pub fn new(
        coupons: Arc<dyn CouponRepository>,
        products: Arc<dyn ProductLookup>,
        metrics: PerformanceMetrics,
    ) -> Self {
        Self {
            coupons,
            products,
            metrics,
        }
    }

    pub fn validate(
        &self,
        coupon: &Coupon,
        emails: &[&str],
        order_amount: Decimal,
        lines: &[OrderLine],
    ) -> CouponDecision {
        let _timer = self.metrics.start_coupon_validation();
        CouponValidator::validate(coupon, emails, order_amount, lines)
    }

    pub async fn redeem(
        &self,
        code: &str,
        emails: &[&str],
        order_amount: Decimal,
        lines: &[OrderLine],
        now: DateTime<Utc>,
    ) -> PricingResult<Redemption> {
        let coupon = match self.coupons.find_by_code(code.trim()).await? {
            Some(coupon) if coupon.window.contains(now) => coupon,
            _ => {
                tracing::debug!("Coupon code '{}' unknown or outside its window", code);
                return Ok(Redemption::Rejected(UNKNOWN_COUPON_MESSAGE.to_string()));
            }
        };

        let decision = self.validate(&coupon, emails, order_amount, lines);
        if let CouponDecision::Rejected(reason) = decision {
            return Ok(Redemption::Rejected(reason));
        }

        let Some(reduction) = reduction_line(&coupon, order_amount) else {
            return Ok(Redemption::NoReduction {
                coupon_id: coupon.id,
            });
        };

        let product_id = self
            .products
            .synthetic_product(reduction.kind.product_code(), &reduction.label)
            .await?;

        tracing::info!(
            "Coupon {} redeemed: {} {:?}",
            coupon.discount_code,
            reduction.amount,
            reduction.kind
        );
        Ok(Redemption::Applied {
            coupon_id: coupon.id,
            product_id,
            reduction,
        })
    }
}
