// Temporal Versioning Store
//
// Keeps at most one active record per scope: saving a record closes the
// window of every record in the same scope that covers the new start,
// instead of deleting it, and ends the new record where the next one in the
// scope begins. Saving a record identical to a still-running one returns the
// existing record.
//
// The check → truncate → insert sequence is not isolated. Two writers on the
// same scope can interleave and leave overlapping windows; a store that needs
// strict consistency must run `upsert` inside a serializable transaction or
// enforce a unique (scope, valid_from) constraint and retry on conflict.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;
use uuid::Uuid;

use crate::pricing::{
    error::PricingResult,
    models::{DiscountRule, DiscountScope, PriceRule, PriceScope},
    types::ValidityWindow,
};

/// A record versioned by validity window within a scope
pub trait Versioned: Clone + Debug + Send + Sync + 'static {
    type Scope: Copy + Debug + Eq + Hash + Send + Sync;

    fn id(&self) -> Uuid;
    fn scope_key(&self) -> Self::Scope;
    fn window(&self) -> ValidityWindow;
    fn set_valid_to(&mut self, valid_to: DateTime<Utc>);

    /// Whether the value payload matches, compared at the field's stored precision
    fn same_payload(&self, other: &Self) -> bool;
}

impl Versioned for PriceRule {
    type Scope = PriceScope;

    fn id(&self) -> Uuid {
        self.id
    }

    fn scope_key(&self) -> PriceScope {
        self.scope()
    }

    fn window(&self) -> ValidityWindow {
        self.window
    }

    fn set_valid_to(&mut self, valid_to: DateTime<Utc>) {
        self.window.valid_to = valid_to;
    }

    fn same_payload(&self, other: &Self) -> bool {
        self.price.round_dp(2) == other.price.round_dp(2) && self.pricing_type == other.pricing_type
    }
}

impl Versioned for DiscountRule {
    type Scope = DiscountScope;

    fn id(&self) -> Uuid {
        self.id
    }

    fn scope_key(&self) -> DiscountScope {
        self.scope()
    }

    fn window(&self) -> ValidityWindow {
        self.window
    }

    fn set_valid_to(&mut self, valid_to: DateTime<Utc>) {
        self.window.valid_to = valid_to;
    }

    fn same_payload(&self, other: &Self) -> bool {
        round4(self.discount_perc) == round4(other.discount_perc)
            && round4(self.discount_abs) == round4(other.discount_abs)
    }
}

fn round4(value: Decimal) -> Decimal {
    value.round_dp(4)
}

/// Persisted record store the versioning logic runs against
///
/// Implementations return records in persisted (insertion) order.
#[async_trait]
pub trait RecordStore<T: Versioned>: Send + Sync {
    /// All records sharing the scope, active or not
    async fn find_in_scope(&self, scope: &T::Scope) -> PricingResult<Vec<T>>;

    /// Set `valid_to` on every listed record; returns the number updated
    async fn truncate_windows(&self, ids: &[Uuid], valid_to: DateTime<Utc>) -> PricingResult<u64>;

    /// Persist a new record
    async fn insert(&self, record: T) -> PricingResult<T>;
}

/// Which branch an upsert took
#[derive(Debug, Clone, PartialEq)]
pub enum UpsertOutcome<T> {
    /// Stored as new, nothing overlapped
    Created(T),

    /// An identical running record already existed and is returned as-is
    Deduplicated(T),

    /// Stored as new after closing the listed predecessors
    Superseded { record: T, truncated: Vec<Uuid> },
}

impl<T> UpsertOutcome<T> {
    /// The record now in effect for the scope
    pub fn record(&self) -> &T {
        match self {
            UpsertOutcome::Created(record)
            | UpsertOutcome::Deduplicated(record)
            | UpsertOutcome::Superseded { record, .. } => record,
        }
    }

    pub fn into_record(self) -> T {
        match self {
            UpsertOutcome::Created(record)
            | UpsertOutcome::Deduplicated(record)
            | UpsertOutcome::Superseded { record, .. } => record,
        }
    }

    /// Whether a new record was written
    pub fn is_new(&self) -> bool {
        !matches!(self, UpsertOutcome::Deduplicated(_))
    }

    pub fn truncated(&self) -> &[Uuid] {
        match self {
            UpsertOutcome::Superseded { truncated, .. } => truncated,
            _ => &[],
        }
    }
}

/// Existing record in the candidate's scope with the same payload whose window is still running
pub fn find_duplicate<'a, T: Versioned>(
    existing: &'a [T],
    candidate: &T,
    now: DateTime<Utc>,
) -> Option<&'a T> {
    let scope = candidate.scope_key();
    existing.iter().find(|record| {
        record.scope_key() == scope
            && !record.window().has_elapsed(now)
            && record.same_payload(candidate)
    })
}

/// Records in the candidate's scope whose window covers the candidate's start
pub fn superseded_ids<T: Versioned>(existing: &[T], candidate: &T) -> Vec<Uuid> {
    let scope = candidate.scope_key();
    let start = candidate.window().valid_from;
    existing
        .iter()
        .filter(|record| {
            record.id() != candidate.id()
                && record.scope_key() == scope
                && record.window().contains(start)
        })
        .map(|record| record.id())
        .collect()
}

/// Earliest start among records of the candidate's scope that begin inside its window
pub fn successor_start<T: Versioned>(existing: &[T], candidate: &T) -> Option<DateTime<Utc>> {
    let scope = candidate.scope_key();
    let window = candidate.window();
    existing
        .iter()
        .filter(|record| record.id() != candidate.id() && record.scope_key() == scope)
        .map(|record| record.window().valid_from)
        .filter(|start| window.valid_from < *start && *start < window.valid_to)
        .min()
}

/// Versioning front-end over a record store
pub struct TemporalStore<T: Versioned> {
    records: Arc<dyn RecordStore<T>>,
}

impl<T: Versioned> Clone for TemporalStore<T> {
    fn clone(&self) -> Self {
        Self {
            records: self.records.clone(),
        }
    }
}

impl<T: Versioned> TemporalStore<T> {
    pub fn new(records: Arc<dyn RecordStore<T>>) -> Self {
        Self { records }
    }

    pub fn records(&self) -> &Arc<dyn RecordStore<T>> {
        &self.records
    }

    /// Save `candidate` while keeping one active record per scope
    ///
    /// 1. Return an identical running record if one exists
    /// 2. Close every record whose window covers the candidate's start
    /// 3. End the candidate where a later record of the scope begins
    /// 4. Insert the candidate
    pub async fn upsert(
        &self,
        mut candidate: T,
        now: DateTime<Utc>,
    ) -> PricingResult<UpsertOutcome<T>> {
        let scope = candidate.scope_key();
        let existing = self.records.find_in_scope(&scope).await?;

        if let Some(duplicate) = find_duplicate(&existing, &candidate, now) {
            tracing::debug!("Record {} already covers {:?}, skipping save", duplicate.id(), scope);
            return Ok(UpsertOutcome::Deduplicated(duplicate.clone()));
        }

        let truncated = superseded_ids(&existing, &candidate);
        if !truncated.is_empty() {
            let valid_to = candidate.window().valid_from;
            let updated = self.records.truncate_windows(&truncated, valid_to).await?;
            tracing::info!(
                "Closed {} record(s) in {:?} at {}",
                updated,
                scope,
                valid_to
            );
        }

        if let Some(next_start) = successor_start(&existing, &candidate) {
            tracing::info!(
                "Record {} in {:?} ends at {} where a later record begins",
                candidate.id(),
                scope,
                next_start
            );
            candidate.set_valid_to(next_start);
        }

        let record = self.records.insert(candidate).await?;

        if truncated.is_empty() {
            Ok(UpsertOutcome::Created(record))
        } else {
            Ok(UpsertOutcome::Superseded { record, truncated })
        }
    }

    /// Record of the scope active at `at`, if any
    pub async fn active_at(&self, scope: &T::Scope, at: DateTime<Utc>) -> PricingResult<Option<T>> {
        let records = self.records.find_in_scope(scope).await?;
        Ok(records.into_iter().find(|record| record.window().contains(at)))
    }
}
