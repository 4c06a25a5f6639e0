//! In-memory implementations of the record store and collaborator traits
//!
//! Useful for testing and for embedding the engine without a database.
//! Uses RwLock for thread-safe access.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use uuid::Uuid;

use crate::pricing::{
    collaborators::{CouponRepository, CustomerDirectory, ProductLookup, RuleSource},
    error::{PricingError, PricingResult},
    models::{Coupon, CustomerGroup, DiscountGroup, DiscountRule, PriceRule},
    temporal::{RecordStore, Versioned},
    PricingBackend,
};

fn read<T>(lock: &RwLock<T>) -> PricingResult<RwLockReadGuard<'_, T>> {
    lock.read()
        .map_err(|e| PricingError::StorageError(format!("Failed to acquire read lock: {}", e)))
}

fn write<T>(lock: &RwLock<T>) -> PricingResult<RwLockWriteGuard<'_, T>> {
    lock.write()
        .map_err(|e| PricingError::StorageError(format!("Failed to acquire write lock: {}", e)))
}

/// Versioned records kept in insertion order
pub struct InMemoryRecordStore<T: Versioned> {
    records: Arc<RwLock<Vec<T>>>,
}

impl<T: Versioned> InMemoryRecordStore<T> {
    pub fn new() -> Self {
        Self {
            records: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Snapshot of every stored record
    pub fn all(&self) -> PricingResult<Vec<T>> {
        Ok(read(&self.records)?.clone())
    }
}

impl<T: Versioned> Default for InMemoryRecordStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Versioned> Clone for InMemoryRecordStore<T> {
    fn clone(&self) -> Self {
        Self {
            records: self.records.clone(),
        }
    }
}

#[async_trait]
impl<T: Versioned> RecordStore<T> for InMemoryRecordStore<T> {
    async fn find_in_scope(&self, scope: &T::Scope) -> PricingResult<Vec<T>> {
        let records = read(&self.records)?;
        Ok(records
            .iter()
            .filter(|record| &record.scope_key() == scope)
            .cloned()
            .collect())
    }

    async fn truncate_windows(&self, ids: &[Uuid], valid_to: DateTime<Utc>) -> PricingResult<u64> {
        let mut records = write(&self.records)?;
        let mut updated = 0;
        for record in records.iter_mut().filter(|record| ids.contains(&record.id())) {
            record.set_valid_to(valid_to);
            updated += 1;
        }
        Ok(updated)
    }

    async fn insert(&self, record: T) -> PricingResult<T> {
        let mut records = write(&self.records)?;
        if records.iter().any(|existing| existing.id() == record.id()) {
            return Err(PricingError::StorageError(format!(
                "Record {} already exists",
                record.id()
            )));
        }
        records.push(record.clone());
        Ok(record)
    }
}

/// Complete in-memory backend: rule stores, groups, coupons, products and customers
#[derive(Clone, Default)]
pub struct MemoryBackend {
    pub price_rules: InMemoryRecordStore<PriceRule>,
    pub discount_rules: InMemoryRecordStore<DiscountRule>,
    discount_groups: Arc<RwLock<Vec<DiscountGroup>>>,
    customer_groups: Arc<RwLock<Vec<CustomerGroup>>>,
    coupons: Arc<RwLock<Vec<Coupon>>>,
    products: Arc<RwLock<HashMap<String, Uuid>>>,
    customers: Arc<RwLock<HashMap<Uuid, Uuid>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_discount_group(&self, group: DiscountGroup) -> PricingResult<()> {
        write(&self.discount_groups)?.push(group);
        Ok(())
    }

    pub fn add_customer_group(&self, group: CustomerGroup) -> PricingResult<()> {
        write(&self.customer_groups)?.push(group);
        Ok(())
    }

    /// Register a customer as member of a customer discount group
    pub fn assign_customer(&self, customer_id: Uuid, group_id: Uuid) -> PricingResult<()> {
        write(&self.customers)?.insert(customer_id, group_id);
        Ok(())
    }

    /// Code → id of every synthetic product created so far
    pub fn products(&self) -> PricingResult<HashMap<String, Uuid>> {
        Ok(read(&self.products)?.clone())
    }
}

impl PricingBackend {
    /// Backend running entirely on the given in-memory stores
    pub fn in_memory(backend: MemoryBackend) -> Self {
        let shared = Arc::new(backend);
        Self {
            price_rules: Arc::new(shared.price_rules.clone()),
            discount_rules: Arc::new(shared.discount_rules.clone()),
            rule_source: shared.clone(),
            coupons: shared.clone(),
            products: shared.clone(),
            customers: shared,
        }
    }
}

#[async_trait]
impl RuleSource for MemoryBackend {
    async fn load_price_rules(&self) -> PricingResult<Vec<PriceRule>> {
        self.price_rules.all()
    }

    async fn load_discount_rules(&self) -> PricingResult<Vec<DiscountRule>> {
        self.discount_rules.all()
    }

    async fn load_discount_groups(&self) -> PricingResult<Vec<DiscountGroup>> {
        Ok(read(&self.discount_groups)?.clone())
    }

    async fn load_customer_groups(&self) -> PricingResult<Vec<CustomerGroup>> {
        Ok(read(&self.customer_groups)?.clone())
    }
}

#[async_trait]
impl CouponRepository for MemoryBackend {
    async fn find_by_code(&self, code: &str) -> PricingResult<Option<Coupon>> {
        let coupons = read(&self.coupons)?;
        Ok(coupons
            .iter()
            .find(|coupon| coupon.discount_code == code)
            .cloned())
    }

    async fn insert(&self, coupon: Coupon) -> PricingResult<Coupon> {
        let mut coupons = write(&self.coupons)?;
        if coupons
            .iter()
            .any(|existing| existing.discount_code == coupon.discount_code)
        {
            return Err(PricingError::ConstraintViolation(format!(
                "Coupon code {} already exists",
                coupon.discount_code
            )));
        }
        coupons.push(coupon.clone());
        Ok(coupon)
    }
}

#[async_trait]
impl ProductLookup for MemoryBackend {
    async fn synthetic_product(&self, code: &str, _name: &str) -> PricingResult<Uuid> {
        let mut products = write(&self.products)?;
        Ok(*products
            .entry(code.to_string())
            .or_insert_with(Uuid::new_v4))
    }
}

#[async_trait]
impl CustomerDirectory for MemoryBackend {
    async fn customer_group(&self, customer_id: Uuid) -> PricingResult<Option<Uuid>> {
        Ok(read(&self.customers)?.get(&customer_id).copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pricing::models::NewPriceRule;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_record_store_keeps_insertion_order() {
        let store = InMemoryRecordStore::<PriceRule>::new();
        let product = Some(Uuid::new_v4());
        let now = Utc::now();

        let first = NewPriceRule {
            product_id: product,
            price: dec!(1),
            ..Default::default()
        }
        .into_rule(now);
        let second = NewPriceRule {
            product_id: product,
            price: dec!(2),
            ..Default::default()
        }
        .into_rule(now);
        store.insert(first.clone()).await.unwrap();
        store.insert(second.clone()).await.unwrap();

        let found = store.find_in_scope(&first.scope()).await.unwrap();
        assert_eq!(found.iter().map(|r| r.id).collect::<Vec<_>>(), vec![first.id, second.id]);
    }

    #[tokio::test]
    async fn test_record_store_rejects_duplicate_id() {
        let store = InMemoryRecordStore::<PriceRule>::new();
        let rule = NewPriceRule {
            product_id: Some(Uuid::new_v4()),
            ..Default::default()
        }
        .into_rule(Utc::now());

        store.insert(rule.clone()).await.unwrap();
        assert!(store.insert(rule).await.is_err());
    }

    #[tokio::test]
    async fn test_truncate_windows() {
        let store = InMemoryRecordStore::<PriceRule>::new();
        let now = Utc::now();
        let rule = NewPriceRule {
            product_id: Some(Uuid::new_v4()),
            ..Default::default()
        }
        .into_rule(now);
        store.insert(rule.clone()).await.unwrap();

        let updated = store.truncate_windows(&[rule.id, Uuid::new_v4()], now).await.unwrap();

        assert_eq!(updated, 1);
        assert_eq!(store.all().unwrap()[0].window.valid_to, now);
    }

    #[tokio::test]
    async fn test_synthetic_product_is_stable() {
        let backend = MemoryBackend::new();
        let first = backend.synthetic_product("DISCOUNT_COUPON_ABS", "Coupon").await.unwrap();
        let again = backend.synthetic_product("DISCOUNT_COUPON_ABS", "Coupon").await.unwrap();
        let other = backend.synthetic_product("DISCOUNT_COUPON_PERC", "Coupon").await.unwrap();

        assert_eq!(first, again);
        assert_ne!(first, other);
    }

    #[tokio::test]
    async fn test_customer_directory() {
        let backend = MemoryBackend::new();
        let customer = Uuid::new_v4();
        let group = Uuid::new_v4();
        backend.assign_customer(customer, group).unwrap();

        assert_eq!(backend.customer_group(customer).await.unwrap(), Some(group));
        assert_eq!(backend.customer_group(Uuid::new_v4()).await.unwrap(), None);
    }
}
