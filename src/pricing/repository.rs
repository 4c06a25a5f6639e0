// PostgreSQL implementations of the record store and collaborator traits

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{FromRow, PgPool};
use std::sync::Arc;
use uuid::Uuid;

use crate::pricing::{
    collaborators::{CouponRepository, CustomerDirectory, ProductLookup, RuleSource},
    error::{PricingError, PricingResult},
    models::{
        Coupon, CustomerGroup, DiscountGroup, DiscountRule, DiscountScope, PriceRule, PriceScope,
    },
    temporal::RecordStore,
    types::{DurationRange, PricingType, QuantityRange, ValidityWindow},
    PricingBackend,
};

const PRICE_RULE_COLUMNS: &str = "id, price_group_id, product_id, product_price_group_id, price, \
     pricing_type, min_order_quantity, max_order_quantity, min_duration_secs, max_duration_secs, \
     valid_from, valid_to, created_at";

const DISCOUNT_RULE_COLUMNS: &str = "id, product_discount_group_id, product_id, \
     customer_discount_group_id, customer_id, discount_abs, discount_perc, min_order_quantity, \
     max_order_quantity, min_duration_secs, max_duration_secs, valid_from, valid_to, created_at";

#[derive(Debug, FromRow)]
struct PriceRuleRow {
    id: Uuid,
    price_group_id: Option<Uuid>,
    product_id: Option<Uuid>,
    product_price_group_id: Option<Uuid>,
    price: Decimal,
    pricing_type: String,
    min_order_quantity: i32,
    max_order_quantity: i32,
    min_duration_secs: i64,
    max_duration_secs: i64,
    valid_from: DateTime<Utc>,
    valid_to: DateTime<Utc>,
    created_at: DateTime<Utc>,
}

impl From<PriceRuleRow> for PriceRule {
    fn from(row: PriceRuleRow) -> Self {
        PriceRule {
            id: row.id,
            price_group_id: row.price_group_id,
            product_id: row.product_id,
            product_price_group_id: row.product_price_group_id,
            price: row.price,
            pricing_type: PricingType::from_code(&row.pricing_type),
            quantity: QuantityRange::new(row.min_order_quantity, row.max_order_quantity),
            duration: DurationRange::new(row.min_duration_secs, row.max_duration_secs),
            window: ValidityWindow::new(row.valid_from, row.valid_to),
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct DiscountRuleRow {
    id: Uuid,
    product_discount_group_id: Option<Uuid>,
    product_id: Option<Uuid>,
    customer_discount_group_id: Option<Uuid>,
    customer_id: Option<Uuid>,
    discount_abs: Decimal,
    discount_perc: Decimal,
    min_order_quantity: i32,
    max_order_quantity: i32,
    min_duration_secs: i64,
    max_duration_secs: i64,
    valid_from: DateTime<Utc>,
    valid_to: DateTime<Utc>,
    created_at: DateTime<Utc>,
}

impl From<DiscountRuleRow> for DiscountRule {
    fn from(row: DiscountRuleRow) -> Self {
        DiscountRule {
            id: row.id,
            product_discount_group_id: row.product_discount_group_id,
            product_id: row.product_id,
            customer_discount_group_id: row.customer_discount_group_id,
            customer_id: row.customer_id,
            discount_abs: row.discount_abs,
            discount_perc: row.discount_perc,
            quantity: QuantityRange::new(row.min_order_quantity, row.max_order_quantity),
            duration: DurationRange::new(row.min_duration_secs, row.max_duration_secs),
            window: ValidityWindow::new(row.valid_from, row.valid_to),
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct DiscountGroupRow {
    id: Uuid,
    store_id: Option<Uuid>,
    group_number: String,
    description: String,
    discount_label: Option<String>,
    parent_id: Option<Uuid>,
    include_children: bool,
}

impl From<DiscountGroupRow> for DiscountGroup {
    fn from(row: DiscountGroupRow) -> Self {
        DiscountGroup {
            id: row.id,
            store_id: row.store_id,
            group_number: row.group_number,
            description: row.description,
            discount_label: row.discount_label,
            parent_id: row.parent_id,
            include_children: row.include_children,
        }
    }
}

#[derive(Debug, FromRow)]
struct CustomerGroupRow {
    id: Uuid,
    store_id: Option<Uuid>,
    group_number: String,
    description: String,
    parent_id: Option<Uuid>,
    include_children: bool,
}

impl From<CustomerGroupRow> for CustomerGroup {
    fn from(row: CustomerGroupRow) -> Self {
        CustomerGroup {
            id: row.id,
            store_id: row.store_id,
            group_number: row.group_number,
            description: row.description,
            parent_id: row.parent_id,
            include_children: row.include_children,
        }
    }
}

#[derive(Debug, FromRow)]
struct CouponRow {
    id: Uuid,
    discount_code: String,
    discount_label: String,
    product_ids: Vec<Uuid>,
    email: Option<String>,
    discount_abs: Decimal,
    discount_perc: Decimal,
    minimal_order_amount: Decimal,
    needs_products: Option<i32>,
    valid_from: DateTime<Utc>,
    valid_to: DateTime<Utc>,
}

impl From<CouponRow> for Coupon {
    fn from(row: CouponRow) -> Self {
        Coupon {
            id: row.id,
            discount_code: row.discount_code,
            discount_label: row.discount_label,
            product_ids: row.product_ids,
            email: row.email,
            discount_abs: row.discount_abs,
            discount_perc: row.discount_perc,
            minimal_order_amount: row.minimal_order_amount,
            needs_products: row.needs_products,
            window: ValidityWindow::new(row.valid_from, row.valid_to),
        }
    }
}

/// Price rules of one store
#[derive(Clone)]
pub struct PgPriceRuleStore {
    pool: PgPool,
    store_id: Uuid,
}

impl PgPriceRuleStore {
    pub fn new(pool: PgPool, store_id: Uuid) -> Self {
        Self { pool, store_id }
    }
}

#[async_trait]
impl RecordStore<PriceRule> for PgPriceRuleStore {
    async fn find_in_scope(&self, scope: &PriceScope) -> PricingResult<Vec<PriceRule>> {
        let rows = sqlx::query_as::<_, PriceRuleRow>(&format!(
            r#"
            SELECT {PRICE_RULE_COLUMNS}
            FROM price_rules
            WHERE store_id = $1
              AND price_group_id IS NOT DISTINCT FROM $2
              AND product_id IS NOT DISTINCT FROM $3
              AND product_price_group_id IS NOT DISTINCT FROM $4
            ORDER BY created_at, id
            "#
        ))
        .bind(self.store_id)
        .bind(scope.price_group_id)
        .bind(scope.product_id)
        .bind(scope.product_price_group_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(PriceRule::from).collect())
    }

    async fn truncate_windows(&self, ids: &[Uuid], valid_to: DateTime<Utc>) -> PricingResult<u64> {
        let result = sqlx::query("UPDATE price_rules SET valid_to = $1 WHERE id = ANY($2)")
            .bind(valid_to)
            .bind(ids)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    async fn insert(&self, rule: PriceRule) -> PricingResult<PriceRule> {
        let row = sqlx::query_as::<_, PriceRuleRow>(&format!(
            r#"
            INSERT INTO price_rules (
                id, store_id, price_group_id, product_id, product_price_group_id, price,
                pricing_type, min_order_quantity, max_order_quantity, min_duration_secs,
                max_duration_secs, valid_from, valid_to, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            RETURNING {PRICE_RULE_COLUMNS}
            "#
        ))
        .bind(rule.id)
        .bind(self.store_id)
        .bind(rule.price_group_id)
        .bind(rule.product_id)
        .bind(rule.product_price_group_id)
        .bind(rule.price)
        .bind(rule.pricing_type.as_code())
        .bind(rule.quantity.min)
        .bind(rule.quantity.max)
        .bind(rule.duration.min_secs)
        .bind(rule.duration.max_secs)
        .bind(rule.window.valid_from)
        .bind(rule.window.valid_to)
        .bind(rule.created_at)
        .fetch_one(&self.pool)
        .await
        .map_err(constraint_error)?;

        Ok(row.into())
    }
}

/// Discount rules of one store
#[derive(Clone)]
pub struct PgDiscountRuleStore {
    pool: PgPool,
    store_id: Uuid,
}

impl PgDiscountRuleStore {
    pub fn new(pool: PgPool, store_id: Uuid) -> Self {
        Self { pool, store_id }
    }
}

#[async_trait]
impl RecordStore<DiscountRule> for PgDiscountRuleStore {
    async fn find_in_scope(&self, scope: &DiscountScope) -> PricingResult<Vec<DiscountRule>> {
        let rows = sqlx::query_as::<_, DiscountRuleRow>(&format!(
            r#"
            SELECT {DISCOUNT_RULE_COLUMNS}
            FROM discount_rules
            WHERE store_id = $1
              AND product_discount_group_id IS NOT DISTINCT FROM $2
              AND product_id IS NOT DISTINCT FROM $3
              AND customer_discount_group_id IS NOT DISTINCT FROM $4
              AND customer_id IS NOT DISTINCT FROM $5
            ORDER BY created_at, id
            "#
        ))
        .bind(self.store_id)
        .bind(scope.product_discount_group_id)
        .bind(scope.product_id)
        .bind(scope.customer_discount_group_id)
        .bind(scope.customer_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(DiscountRule::from).collect())
    }

    async fn truncate_windows(&self, ids: &[Uuid], valid_to: DateTime<Utc>) -> PricingResult<u64> {
        let result = sqlx::query("UPDATE discount_rules SET valid_to = $1 WHERE id = ANY($2)")
            .bind(valid_to)
            .bind(ids)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    async fn insert(&self, rule: DiscountRule) -> PricingResult<DiscountRule> {
        let row = sqlx::query_as::<_, DiscountRuleRow>(&format!(
            r#"
            INSERT INTO discount_rules (
                id, store_id, product_discount_group_id, product_id, customer_discount_group_id,
                customer_id, discount_abs, discount_perc, min_order_quantity, max_order_quantity,
                min_duration_secs, max_duration_secs, valid_from, valid_to, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            RETURNING {DISCOUNT_RULE_COLUMNS}
            "#
        ))
        .bind(rule.id)
        .bind(self.store_id)
        .bind(rule.product_discount_group_id)
        .bind(rule.product_id)
        .bind(rule.customer_discount_group_id)
        .bind(rule.customer_id)
        .bind(rule.discount_abs)
        .bind(rule.discount_perc)
        .bind(rule.quantity.min)
        .bind(rule.quantity.max)
        .bind(rule.duration.min_secs)
        .bind(rule.duration.max_secs)
        .bind(rule.window.valid_from)
        .bind(rule.window.valid_to)
        .bind(rule.created_at)
        .fetch_one(&self.pool)
        .await
        .map_err(constraint_error)?;

        Ok(row.into())
    }
}

/// Rule configuration of one store, for the cache
#[derive(Clone)]
pub struct PgRuleSource {
    pool: PgPool,
    store_id: Uuid,
}

impl PgRuleSource {
    pub fn new(pool: PgPool, store_id: Uuid) -> Self {
        Self { pool, store_id }
    }
}

#[async_trait]
impl RuleSource for PgRuleSource {
    async fn load_price_rules(&self) -> PricingResult<Vec<PriceRule>> {
        let rows = sqlx::query_as::<_, PriceRuleRow>(&format!(
            "SELECT {PRICE_RULE_COLUMNS} FROM price_rules WHERE store_id = $1 ORDER BY created_at, id"
        ))
        .bind(self.store_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(PriceRule::from).collect())
    }

    async fn load_discount_rules(&self) -> PricingResult<Vec<DiscountRule>> {
        let rows = sqlx::query_as::<_, DiscountRuleRow>(&format!(
            "SELECT {DISCOUNT_RULE_COLUMNS} FROM discount_rules WHERE store_id = $1 ORDER BY created_at, id"
        ))
        .bind(self.store_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(DiscountRule::from).collect())
    }

    async fn load_discount_groups(&self) -> PricingResult<Vec<DiscountGroup>> {
        let rows = sqlx::query_as::<_, DiscountGroupRow>(
            r#"
            SELECT id, store_id, group_number, description, discount_label, parent_id, include_children
            FROM product_discount_groups
            WHERE store_id IS NULL OR store_id = $1
            "#,
        )
        .bind(self.store_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(DiscountGroup::from).collect())
    }

    async fn load_customer_groups(&self) -> PricingResult<Vec<CustomerGroup>> {
        let rows = sqlx::query_as::<_, CustomerGroupRow>(
            r#"
            SELECT id, store_id, group_number, description, parent_id, include_children
            FROM customer_discount_groups
            WHERE store_id IS NULL OR store_id = $1
            "#,
        )
        .bind(self.store_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(CustomerGroup::from).collect())
    }
}

#[derive(Clone)]
pub struct PgCouponRepository {
    pool: PgPool,
}

impl PgCouponRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CouponRepository for PgCouponRepository {
    async fn find_by_code(&self, code: &str) -> PricingResult<Option<Coupon>> {
        let row = sqlx::query_as::<_, CouponRow>(
            r#"
            SELECT c.id, c.discount_code, c.discount_label,
                   COALESCE(
                       array_agg(p.product_id ORDER BY p.product_id)
                           FILTER (WHERE p.product_id IS NOT NULL),
                       '{}'
                   ) AS product_ids,
                   c.email, c.discount_abs, c.discount_perc, c.minimal_order_amount,
                   c.needs_products, c.valid_from, c.valid_to
            FROM discount_coupons c
            LEFT JOIN discount_coupon_products p ON p.discount_coupon_id = c.id
            WHERE c.discount_code = $1
            GROUP BY c.id
            "#,
        )
        .bind(code)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Coupon::from))
    }

    async fn insert(&self, coupon: Coupon) -> PricingResult<Coupon> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO discount_coupons (
                id, discount_code, discount_label, email, discount_abs, discount_perc,
                minimal_order_amount, needs_products, valid_from, valid_to
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(coupon.id)
        .bind(&coupon.discount_code)
        .bind(&coupon.discount_label)
        .bind(&coupon.email)
        .bind(coupon.discount_abs)
        .bind(coupon.discount_perc)
        .bind(coupon.minimal_order_amount)
        .bind(coupon.needs_products)
        .bind(coupon.window.valid_from)
        .bind(coupon.window.valid_to)
        .execute(&mut *tx)
        .await
        .map_err(constraint_error)?;

        for product_id in &coupon.product_ids {
            sqlx::query(
                "INSERT INTO discount_coupon_products (discount_coupon_id, product_id) VALUES ($1, $2)",
            )
            .bind(coupon.id)
            .bind(product_id)
            .execute(&mut *tx)
            .await
            .map_err(constraint_error)?;
        }

        tx.commit().await?;

        Ok(coupon)
    }
}

#[derive(Clone)]
pub struct PgProductLookup {
    pool: PgPool,
}

impl PgProductLookup {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProductLookup for PgProductLookup {
    async fn synthetic_product(&self, code: &str, name: &str) -> PricingResult<Uuid> {
        // the no-op update makes RETURNING yield the existing row on conflict
        let id: Uuid = sqlx::query_scalar(
            r#"
            INSERT INTO products (id, code, name)
            VALUES ($1, $2, $3)
            ON CONFLICT (code) DO UPDATE SET code = EXCLUDED.code
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(code)
        .bind(name)
        .fetch_one(&self.pool)
        .await?;

        Ok(id)
    }
}

#[derive(Clone)]
pub struct PgCustomerDirectory {
    pool: PgPool,
}

impl PgCustomerDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CustomerDirectory for PgCustomerDirectory {
    async fn customer_group(&self, customer_id: Uuid) -> PricingResult<Option<Uuid>> {
        let group: Option<Option<Uuid>> = sqlx::query_scalar(
            "SELECT customer_discount_group_id FROM customers WHERE id = $1",
        )
        .bind(customer_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(group.flatten())
    }
}

/// Map constraint failures to `ConstraintViolation`, everything else to `DatabaseError`
fn constraint_error(err: sqlx::Error) -> PricingError {
    match &err {
        sqlx::Error::Database(db_err)
            if db_err.is_unique_violation()
                || db_err.is_check_violation()
                || db_err.is_foreign_key_violation() =>
        {
            PricingError::ConstraintViolation(db_err.message().to_string())
        }
        _ => PricingError::DatabaseError(err),
    }
}

impl PricingBackend {
    /// Backend storing everything in PostgreSQL, scoped to one store
    pub fn postgres(pool: PgPool, store_id: Uuid) -> Self {
        Self {
            price_rules: Arc::new(PgPriceRuleStore::new(pool.clone(), store_id)),
            discount_rules: Arc::new(PgDiscountRuleStore::new(pool.clone(), store_id)),
            rule_source: Arc::new(PgRuleSource::new(pool.clone(), store_id)),
            coupons: Arc::new(PgCouponRepository::new(pool.clone())),
            products: Arc::new(PgProductLookup::new(pool.clone())),
            customers: Arc::new(PgCustomerDirectory::new(pool)),
        }
    }
}
