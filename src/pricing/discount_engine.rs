// Discount Matching Engine
//
// Finds the discount applicable to a product/customer combination across
// direct and group-inherited scopes. Absolute and percentage reductions are
// maximised independently, so the result may combine two different rules.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

use crate::pricing::{
    config_store::RuleConfigurationStore,
    error::{PricingError, PricingResult},
    metrics::PerformanceMetrics,
    models::{CustomerGroup, DiscountGroup, DiscountRule},
    types::DiscountAmounts,
};

/// One dimension a discount rule is scoped to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Scope {
    Product(Uuid),
    ProductGroup(Uuid),
    Customer(Uuid),
    CustomerGroup(Uuid),
}

impl DiscountRule {
    /// Every dimension the rule sets
    pub fn scopes(&self) -> Vec<Scope> {
        [
            self.product_id.map(Scope::Product),
            self.product_discount_group_id.map(Scope::ProductGroup),
            self.customer_id.map(Scope::Customer),
            self.customer_discount_group_id.map(Scope::CustomerGroup),
        ]
        .into_iter()
        .flatten()
        .collect()
    }

    pub fn amounts(&self) -> DiscountAmounts {
        DiscountAmounts::new(self.discount_abs, self.discount_perc)
    }
}

/// Context a discount is looked up for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DiscountQuery {
    pub product_id: Option<Uuid>,
    pub product_group_id: Option<Uuid>,
    pub customer_id: Option<Uuid>,
    pub customer_group_id: Option<Uuid>,
    pub quantity: i32,
    /// Only checked against rule duration ranges when set
    pub duration: Option<Duration>,
}

/// Query with its groups expanded to their inheriting ancestors
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedScopes {
    pub product: Option<Uuid>,
    pub product_groups: HashSet<Uuid>,
    pub customer: Option<Uuid>,
    pub customer_groups: HashSet<Uuid>,
}

impl ResolvedScopes {
    pub fn resolve(
        query: &DiscountQuery,
        discount_groups: &[DiscountGroup],
        customer_groups: &[CustomerGroup],
    ) -> Self {
        Self {
            product: query.product_id,
            product_groups: query
                .product_group_id
                .map(|group| resolve_group_chain(group, discount_groups))
                .unwrap_or_default(),
            customer: query.customer_id,
            customer_groups: query
                .customer_group_id
                .map(|group| resolve_group_chain(group, customer_groups))
                .unwrap_or_default(),
        }
    }

    pub fn covers(&self, scope: &Scope) -> bool {
        match scope {
            Scope::Product(id) => self.product == Some(*id),
            Scope::ProductGroup(id) => self.product_groups.contains(id),
            Scope::Customer(id) => self.customer == Some(*id),
            Scope::CustomerGroup(id) => self.customer_groups.contains(id),
        }
    }

    /// Whether every dimension the rule sets is satisfied
    pub fn matches(&self, rule: &DiscountRule) -> bool {
        rule.scopes().iter().all(|scope| self.covers(scope))
    }
}

/// Node of a group hierarchy
pub trait GroupNode {
    fn id(&self) -> Uuid;
    fn parent_id(&self) -> Option<Uuid>;
    /// Whether sub-groups inherit this group's rules
    fn include_children(&self) -> bool;
}

impl GroupNode for DiscountGroup {
    fn id(&self) -> Uuid {
        self.id
    }

    fn parent_id(&self) -> Option<Uuid> {
        self.parent_id
    }

    fn include_children(&self) -> bool {
        self.include_children
    }
}

impl GroupNode for CustomerGroup {
    fn id(&self) -> Uuid {
        self.id
    }

    fn parent_id(&self) -> Option<Uuid> {
        self.parent_id
    }

    fn include_children(&self) -> bool {
        self.include_children
    }
}

/// The group plus every ancestor whose rules it inherits
///
/// Walks up while the parent has `include_children` set; stops at the first
/// parent that does not, or when the hierarchy loops.
pub fn resolve_group_chain<G: GroupNode>(start: Uuid, groups: &[G]) -> HashSet<Uuid> {
    let find = |id: Uuid| groups.iter().find(|group| group.id() == id);

    let mut chain = HashSet::from([start]);
    let mut current = start;
    while let Some(parent) = find(current)
        .and_then(|group| group.parent_id())
        .and_then(find)
        .filter(|parent| parent.include_children())
    {
        if !chain.insert(parent.id()) {
            tracing::warn!("Group hierarchy loops at {}", parent.id());
            break;
        }
        current = parent.id();
    }
    chain
}

/// Accept percentage points as well as fractions: 50 becomes 0.5
pub fn normalize_discount_percentage(percentage: Decimal) -> Decimal {
    let fraction = if percentage > Decimal::ONE {
        percentage / Decimal::ONE_HUNDRED
    } else {
        percentage
    };
    fraction.round_dp(4)
}

/// Per-axis maximum over the rules, without quantity filtering
pub fn max_discount<'a, I>(rules: I) -> DiscountAmounts
where
    I: IntoIterator<Item = &'a DiscountRule>,
{
    rules
        .into_iter()
        .fold(DiscountAmounts::NONE, |best, rule| DiscountAmounts {
            absolute: best.absolute.max(rule.discount_abs),
            percentage: best.percentage.max(rule.discount_perc),
        })
}

/// First rule in persisted order whose quantity range contains `quantity`
pub fn discount_for_quantity<'a, I>(rules: I, quantity: i32) -> DiscountAmounts
where
    I: IntoIterator<Item = &'a DiscountRule>,
{
    rules
        .into_iter()
        .find(|rule| rule.quantity.contains(quantity))
        .map(DiscountRule::amounts)
        .unwrap_or(DiscountAmounts::NONE)
}

/// Best reduction for the query among the rules active at `now`
pub fn best_discount(
    rules: &[DiscountRule],
    scopes: &ResolvedScopes,
    query: &DiscountQuery,
    now: DateTime<Utc>,
) -> DiscountAmounts {
    max_discount(rules.iter().filter(|rule| {
        rule.window.contains(now)
            && scopes.matches(rule)
            && rule.quantity.contains(query.quantity)
            && query
                .duration
                .map(|duration| rule.duration.contains(duration))
                .unwrap_or(true)
    }))
}

/// Reject a rule whose quantity tier collides with a live rule of the same product discount group
///
/// Only rules with a different full scope count: a rule in the same scope is
/// superseded on save instead.
pub fn check_quantity_tiers(
    existing: &[DiscountRule],
    candidate: &DiscountRule,
    now: DateTime<Utc>,
) -> PricingResult<()> {
    let Some(group) = candidate.product_discount_group_id else {
        return Ok(());
    };
    let scope = candidate.scope();
    let siblings: Vec<&DiscountRule> = existing
        .iter()
        .filter(|rule| {
            rule.id != candidate.id
                && rule.product_discount_group_id == Some(group)
                && rule.scope() != scope
                && !rule.window.has_elapsed(now)
        })
        .collect();

    if siblings.iter().any(|rule| rule.quantity.contains(candidate.quantity.min)) {
        return Err(PricingError::ValidationError(
            "A discount with this minimal order quantity already exists".to_string(),
        ));
    }
    if siblings.iter().any(|rule| rule.quantity.contains(candidate.quantity.max)) {
        return Err(PricingError::ValidationError(
            "A discount with this maximum order quantity already exists".to_string(),
        ));
    }
    Ok(())
}

/// Discount Engine
///
/// Evaluates the cached discount rules and group hierarchies.
pub struct DiscountEngine {
    config_store: Arc<RuleConfigurationStore>,
    metrics: PerformanceMetrics,
}

impl DiscountEngine {
    pub fn new(config_store: Arc<RuleConfigurationStore>, metrics: PerformanceMetrics) -> Self {
        Self {
            config_store,
            metrics,
        }
    }

    /// Best absolute and percentage reduction for the query; (0, 0) when nothing applies
    pub async fn best_discount(
        &self,
        query: &DiscountQuery,
        now: DateTime<Utc>,
    ) -> PricingResult<DiscountAmounts> {
        let _timer = self.metrics.start_discount_lookup();

        let rules = self.config_store.get_discount_rules().await?;
        let discount_groups = self.config_store.get_discount_groups().await?;
        let customer_groups = self.config_store.get_customer_groups().await?;

        let scopes = ResolvedScopes::resolve(query, &discount_groups, &customer_groups);
        let best = best_discount(&rules, &scopes, query, now);

        tracing::debug!(
            "Best discount for product {:?} / customer {:?}: {} + {}",
            query.product_id,
            query.customer_id,
            best.absolute,
            best.percentage
        );
        Ok(best)
    }

    /// Discount of a product discount group's first tier containing `quantity`
    pub async fn group_discount_for_quantity(
        &self,
        group_id: Uuid,
        quantity: i32,
        now: DateTime<Utc>,
    ) -> PricingResult<DiscountAmounts> {
        let _timer = self.metrics.start_discount_lookup();

        let rules = self.active_group_rules(group_id, now).await?;
        Ok(discount_for_quantity(rules.iter(), quantity))
    }

    /// Largest reductions a product discount group offers at any quantity
    pub async fn group_max_discount(
        &self,
        group_id: Uuid,
        now: DateTime<Utc>,
    ) -> PricingResult<DiscountAmounts> {
        let _timer = self.metrics.start_discount_lookup();

        let rules = self.active_group_rules(group_id, now).await?;
        Ok(max_discount(rules.iter()))
    }

    async fn active_group_rules(
        &self,
        group_id: Uuid,
        now: DateTime<Utc>,
    ) -> PricingResult<Vec<DiscountRule>> {
        let groups = self.config_store.get_discount_groups().await?;
        if !groups.iter().any(|group| group.id == group_id) {
            return Err(PricingError::GroupNotFound(group_id));
        }

        let rules = self.config_store.get_discount_rules().await?;
        Ok(rules
            .into_iter()
            .filter(|rule| rule.product_discount_group_id == Some(group_id))
            .filter(|rule| rule.window.contains(now))
            .collect())
    }
}


#[cfg(test)]
mod property_tests {
    use super::*;
    use crate::pricing::models::NewDiscountRule;
    use proptest::prelude::*;

    /// The combined maximum dominates every rule and each axis comes from some rule
    #[test]
    fn prop_max_discount_dominates() {
        proptest!(|(
            amounts in prop::collection::vec((0u32..=10_000u32, 0u32..=100u32), 1..=12)
        )| {
            let now = Utc::now();
            let rules: Vec<DiscountRule> = amounts
                .iter()
                .map(|&(abs_cents, perc)| {
                    NewDiscountRule {
                        product_id: Some(Uuid::new_v4()),
                        discount_abs: Some(Decimal::from(abs_cents) / Decimal::from(100)),
                        discount_perc: Some(Decimal::from(perc) / Decimal::from(100)),
                        ..Default::default()
                    }
                    .into_rule(now)
                })
                .collect();

            let best = max_discount(&rules);
            for rule in &rules {
                prop_assert!(best.absolute >= rule.discount_abs);
                prop_assert!(best.percentage >= rule.discount_perc);
            }
            prop_assert!(rules.iter().any(|rule| rule.discount_abs == best.absolute));
            prop_assert!(rules.iter().any(|rule| rule.discount_perc == best.percentage));
        });
    }

    /// Normalised percentages always land in [0, 1]
    #[test]
    fn prop_normalized_percentage_in_range() {
        proptest!(|(hundredths in 0u32..=10_000u32)| {
            let percentage = Decimal::from(hundredths) / Decimal::from(100);
            let normalized = normalize_discount_percentage(percentage);
            prop_assert!(normalized >= Decimal::ZERO);
            prop_assert!(normalized <= Decimal::ONE);
        });
    }
}
