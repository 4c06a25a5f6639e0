// Rule Configuration Store
//
// Loads, caches and validates price rules, discount rules and the group
// hierarchies from a `RuleSource`. Implements a time-based cache (60 second
// default TTL) to balance performance and freshness.

use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use crate::pricing::{
    collaborators::RuleSource,
    error::{PricingError, PricingResult},
    metrics::PerformanceMetrics,
    models::{CustomerGroup, DiscountGroup, DiscountRule, PriceRule},
};

/// Default time-to-live for cached configuration
pub const CACHE_TTL: Duration = Duration::from_secs(60);

/// Independently refreshed part of the cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheSection {
    PriceRules,
    DiscountRules,
    DiscountGroups,
    CustomerGroups,
}

impl CacheSection {
    pub const ALL: [CacheSection; 4] = [
        CacheSection::PriceRules,
        CacheSection::DiscountRules,
        CacheSection::DiscountGroups,
        CacheSection::CustomerGroups,
    ];
}

/// In-memory cache for rule configuration
#[derive(Debug, Clone, Default)]
struct ConfigCache {
    price_rules: Vec<PriceRule>,
    discount_rules: Vec<DiscountRule>,
    discount_groups: Vec<DiscountGroup>,
    customer_groups: Vec<CustomerGroup>,
    last_updated: HashMap<CacheSection, Instant>,
}

impl ConfigCache {
    fn is_stale(&self, section: CacheSection, ttl: Duration) -> bool {
        match self.last_updated.get(&section) {
            Some(last_update) => last_update.elapsed() > ttl,
            None => true,
        }
    }

    fn mark_updated(&mut self, section: CacheSection) {
        self.last_updated.insert(section, Instant::now());
    }
}

/// Rule Configuration Store
///
/// Read-mostly cache in front of a `RuleSource`, refreshed per section
/// when its TTL has expired.
pub struct RuleConfigurationStore {
    source: Arc<dyn RuleSource>,
    cache: Arc<RwLock<ConfigCache>>,
    cache_ttl: Duration,
    metrics: Option<PerformanceMetrics>,
}

impl RuleConfigurationStore {
    pub fn new(source: Arc<dyn RuleSource>) -> Self {
        Self {
            source,
            cache: Arc::new(RwLock::new(ConfigCache::default())),
            cache_ttl: CACHE_TTL,
            metrics: None,
        }
    }

    /// Create a store that reports cache hits and misses
    pub fn with_metrics(source: Arc<dyn RuleSource>, metrics: PerformanceMetrics) -> Self {
        Self {
            metrics: Some(metrics),
            ..Self::new(source)
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    pub fn ttl(&self) -> Duration {
        self.cache_ttl
    }

    fn record_cache_hit(&self) {
        if let Some(ref metrics) = self.metrics {
            metrics.record_cache_hit();
        }
    }

    fn record_cache_miss(&self) {
        if let Some(ref metrics) = self.metrics {
            metrics.record_cache_miss();
        }
    }

    /// Load price rules from the source, rejecting unusable rows
    pub async fn load_price_rules(&self) -> PricingResult<Vec<PriceRule>> {
        let rules = self.source.load_price_rules().await?;
        for rule in &rules {
            validate_price_rule(rule)?;
        }
        Ok(rules)
    }

    /// Load discount rules from the source, rejecting unusable rows
    pub async fn load_discount_rules(&self) -> PricingResult<Vec<DiscountRule>> {
        let rules = self.source.load_discount_rules().await?;
        for rule in &rules {
            validate_discount_rule(rule)?;
        }
        Ok(rules)
    }

    pub async fn get_price_rules(&self) -> PricingResult<Vec<PriceRule>> {
        self.refresh_if_stale(CacheSection::PriceRules).await?;

        let cache = self.cache.read().await;
        Ok(cache.price_rules.clone())
    }

    pub async fn get_discount_rules(&self) -> PricingResult<Vec<DiscountRule>> {
        self.refresh_if_stale(CacheSection::DiscountRules).await?;

        let cache = self.cache.read().await;
        Ok(cache.discount_rules.clone())
    }

    pub async fn get_discount_groups(&self) -> PricingResult<Vec<DiscountGroup>> {
        self.refresh_if_stale(CacheSection::DiscountGroups).await?;

        let cache = self.cache.read().await;
        Ok(cache.discount_groups.clone())
    }

    pub async fn get_customer_groups(&self) -> PricingResult<Vec<CustomerGroup>> {
        self.refresh_if_stale(CacheSection::CustomerGroups).await?;

        let cache = self.cache.read().await;
        Ok(cache.customer_groups.clone())
    }

    /// Load every section
    pub async fn warm(&self) -> PricingResult<()> {
        for section in CacheSection::ALL {
            self.refresh_if_stale(section).await?;
        }
        Ok(())
    }

    /// Refresh a section if its TTL has expired
    async fn refresh_if_stale(&self, section: CacheSection) -> PricingResult<()> {
        {
            let cache = self.cache.read().await;
            if !cache.is_stale(section, self.cache_ttl) {
                self.record_cache_hit();
                return Ok(());
            }
        }

        self.record_cache_miss();

        let mut cache = self.cache.write().await;

        // another task may have refreshed while we waited for the write lock
        if !cache.is_stale(section, self.cache_ttl) {
            return Ok(());
        }

        match section {
            CacheSection::PriceRules => {
                cache.price_rules = self.load_price_rules().await?;
                tracing::debug!("Loaded {} price rules", cache.price_rules.len());
            }
            CacheSection::DiscountRules => {
                cache.discount_rules = self.load_discount_rules().await?;
                tracing::debug!("Loaded {} discount rules", cache.discount_rules.len());
            }
            CacheSection::DiscountGroups => {
                cache.discount_groups = self.source.load_discount_groups().await?;
            }
            CacheSection::CustomerGroups => {
                cache.customer_groups = self.source.load_customer_groups().await?;
            }
        }
        cache.mark_updated(section);

        Ok(())
    }

    /// Force the next access to a section to reload from the source
    pub async fn invalidate(&self, section: CacheSection) {
        let mut cache = self.cache.write().await;
        cache.last_updated.remove(&section);
    }

    pub async fn invalidate_all(&self) {
        let mut cache = self.cache.write().await;
        cache.last_updated.clear();
    }
}

fn validate_price_rule(rule: &PriceRule) -> PricingResult<()> {
    if rule.product_id.is_none() && rule.product_price_group_id.is_none() {
        return Err(PricingError::InvalidConfiguration(format!(
            "Price rule {} has neither product nor product price group",
            rule.id
        )));
    }
    if rule.price.is_sign_negative() && !rule.price.is_zero() {
        return Err(PricingError::InvalidConfiguration(format!(
            "Price rule {} has a negative price",
            rule.id
        )));
    }
    Ok(())
}

fn validate_discount_rule(rule: &DiscountRule) -> PricingResult<()> {
    if !rule.scope().has_product_dimension() {
        return Err(PricingError::InvalidConfiguration(format!(
            "Discount rule {} has neither product nor product discount group",
            rule.id
        )));
    }
    if rule.discount_perc < Decimal::ZERO || rule.discount_perc > Decimal::ONE {
        return Err(PricingError::InvalidConfiguration(format!(
            "Discount rule {} has percentage {} outside 0..1",
            rule.id, rule.discount_perc
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pricing::memory::MemoryBackend;
    use crate::pricing::models::{NewDiscountRule, NewPriceRule};
    use crate::pricing::temporal::RecordStore;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    #[test]
    fn test_config_cache_is_stale() {
        let mut cache = ConfigCache::default();

        assert!(cache.is_stale(CacheSection::PriceRules, Duration::from_secs(60)));

        cache.mark_updated(CacheSection::PriceRules);
        assert!(!cache.is_stale(CacheSection::PriceRules, Duration::from_secs(60)));
        assert!(cache.is_stale(CacheSection::DiscountRules, Duration::from_secs(60)));
    }

    #[tokio::test]
    async fn test_cached_rules_until_invalidated() {
        let backend = Arc::new(MemoryBackend::new());
        let metrics = PerformanceMetrics::new();
        let store = RuleConfigurationStore::with_metrics(backend.clone(), metrics.clone());

        assert!(store.get_price_rules().await.unwrap().is_empty());

        let rule = NewPriceRule {
            product_id: Some(Uuid::new_v4()),
            price: dec!(5),
            ..Default::default()
        }
        .into_rule(Utc::now());
        backend.price_rules.insert(rule).await.unwrap();

        // still served from cache
        assert!(store.get_price_rules().await.unwrap().is_empty());

        store.invalidate(CacheSection::PriceRules).await;
        assert_eq!(store.get_price_rules().await.unwrap().len(), 1);

        let summary = metrics.summary();
        assert_eq!(summary.cache_hits, 1);
        assert_eq!(summary.cache_misses, 2);
    }

    #[tokio::test]
    async fn test_zero_ttl_always_reloads() {
        let backend = Arc::new(MemoryBackend::new());
        let store = RuleConfigurationStore::new(backend.clone()).with_ttl(Duration::ZERO);
        store.warm().await.unwrap();

        let rule = NewDiscountRule {
            product_id: Some(Uuid::new_v4()),
            discount_abs: Some(dec!(2)),
            ..Default::default()
        }
        .into_rule(Utc::now());
        backend.discount_rules.insert(rule).await.unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        assert_eq!(store.get_discount_rules().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_rule_rejected_on_load() {
        let backend = Arc::new(MemoryBackend::new());
        let orphan = NewPriceRule {
            price: dec!(5),
            ..Default::default()
        }
        .into_rule(Utc::now());
        backend.price_rules.insert(orphan).await.unwrap();

        let store = RuleConfigurationStore::new(backend);
        let result = store.get_price_rules().await;

        assert!(matches!(result, Err(PricingError::InvalidConfiguration(_))));
    }
}
