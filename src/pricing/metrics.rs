// Performance Metrics for the pricing engine
//
// Tracks execution times, rule cache hit rates and slow operations
// for price resolution, discount lookup, coupon validation and rule saves.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Performance threshold for slow operations (100ms)
const SLOW_OPERATION_THRESHOLD_MS: u64 = 100;

/// Performance metrics for the pricing engine
#[derive(Debug, Clone)]
pub struct PerformanceMetrics {
    inner: Arc<MetricsInner>,
}

#[derive(Debug, Default)]
struct MetricsInner {
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,

    price_resolutions: OperationStats,
    discount_lookups: OperationStats,
    coupon_validations: OperationStats,
    rule_saves: OperationStats,
}

/// Counters kept for a single operation type
#[derive(Debug, Default)]
struct OperationStats {
    count: AtomicU64,
    total_time_us: AtomicU64,
    slow: AtomicU64,
}

impl OperationStats {
    fn record(&self, operation: OperationType, duration: Duration) {
        self.count.fetch_add(1, Ordering::Relaxed);
        self.total_time_us
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);

        if duration.as_millis() as u64 > SLOW_OPERATION_THRESHOLD_MS {
            self.slow.fetch_add(1, Ordering::Relaxed);
            tracing::warn!("Slow {}: {}ms", operation.label(), duration.as_millis());
        }
    }

    fn avg_time_ms(&self) -> f64 {
        let count = self.count.load(Ordering::Relaxed);
        let total_us = self.total_time_us.load(Ordering::Relaxed);

        if count == 0 {
            0.0
        } else {
            (total_us as f64 / count as f64) / 1000.0
        }
    }

    fn snapshot(&self) -> OperationSummary {
        OperationSummary {
            count: self.count.load(Ordering::Relaxed),
            avg_time_ms: self.avg_time_ms(),
            slow: self.slow.load(Ordering::Relaxed),
        }
    }
}

impl PerformanceMetrics {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner::default()),
        }
    }

    pub fn record_cache_hit(&self) {
        self.inner.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_miss(&self) {
        self.inner.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Get cache hit rate (0.0 to 1.0)
    pub fn cache_hit_rate(&self) -> f64 {
        let hits = self.inner.cache_hits.load(Ordering::Relaxed);
        let misses = self.inner.cache_misses.load(Ordering::Relaxed);
        let total = hits + misses;

        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }

    pub fn start_price_resolution(&self) -> OperationTimer {
        OperationTimer::new(OperationType::PriceResolution, self.clone())
    }

    pub fn start_discount_lookup(&self) -> OperationTimer {
        OperationTimer::new(OperationType::DiscountLookup, self.clone())
    }

    pub fn start_coupon_validation(&self) -> OperationTimer {
        OperationTimer::new(OperationType::CouponValidation, self.clone())
    }

    pub fn start_rule_save(&self) -> OperationTimer {
        OperationTimer::new(OperationType::RuleSave, self.clone())
    }

    fn stats(&self, operation: OperationType) -> &OperationStats {
        match operation {
            OperationType::PriceResolution => &self.inner.price_resolutions,
            OperationType::DiscountLookup => &self.inner.discount_lookups,
            OperationType::CouponValidation => &self.inner.coupon_validations,
            OperationType::RuleSave => &self.inner.rule_saves,
        }
    }

    fn record(&self, operation: OperationType, duration: Duration) {
        self.stats(operation).record(operation, duration);
    }

    pub fn avg_price_resolution_ms(&self) -> f64 {
        self.inner.price_resolutions.avg_time_ms()
    }

    pub fn avg_discount_lookup_ms(&self) -> f64 {
        self.inner.discount_lookups.avg_time_ms()
    }

    pub fn summary(&self) -> MetricsSummary {
        MetricsSummary {
            cache_hit_rate: self.cache_hit_rate(),
            cache_hits: self.inner.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.inner.cache_misses.load(Ordering::Relaxed),
            price_resolutions: self.inner.price_resolutions.snapshot(),
            discount_lookups: self.inner.discount_lookups.snapshot(),
            coupon_validations: self.inner.coupon_validations.snapshot(),
            rule_saves: self.inner.rule_saves.snapshot(),
        }
    }

    pub fn log_summary(&self) {
        let summary = self.summary();
        tracing::info!(
            "Pricing Performance Metrics:\n\
             Cache: {:.1}% hit rate ({} hits, {} misses)\n\
             Prices: {} resolutions, avg {:.2}ms, {} slow\n\
             Discounts: {} lookups, avg {:.2}ms, {} slow\n\
             Coupons: {} validations, avg {:.2}ms, {} slow\n\
             Rule saves: {} saves, avg {:.2}ms, {} slow",
            summary.cache_hit_rate * 100.0,
            summary.cache_hits,
            summary.cache_misses,
            summary.price_resolutions.count,
            summary.price_resolutions.avg_time_ms,
            summary.price_resolutions.slow,
            summary.discount_lookups.count,
            summary.discount_lookups.avg_time_ms,
            summary.discount_lookups.slow,
            summary.coupon_validations.count,
            summary.coupon_validations.avg_time_ms,
            summary.coupon_validations.slow,
            summary.rule_saves.count,
            summary.rule_saves.avg_time_ms,
            summary.rule_saves.slow,
        );
    }
}

impl Default for PerformanceMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Type of operation being timed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OperationType {
    PriceResolution,
    DiscountLookup,
    CouponValidation,
    RuleSave,
}

impl OperationType {
    fn label(&self) -> &'static str {
        match self {
            OperationType::PriceResolution => "price resolution",
            OperationType::DiscountLookup => "discount lookup",
            OperationType::CouponValidation => "coupon validation",
            OperationType::RuleSave => "rule save",
        }
    }
}

/// Timer for tracking operation duration
///
/// Records once, either on `complete` or when dropped.
pub struct OperationTimer {
    start: Instant,
    operation_type: OperationType,
    metrics: PerformanceMetrics,
    recorded: bool,
}

impl OperationTimer {
    fn new(operation_type: OperationType, metrics: PerformanceMetrics) -> Self {
        Self {
            start: Instant::now(),
            operation_type,
            metrics,
            recorded: false,
        }
    }

    /// Complete the timer and record the duration
    pub fn complete(mut self) {
        self.finish();
    }

    fn finish(&mut self) {
        if !self.recorded {
            self.recorded = true;
            self.metrics
                .record(self.operation_type, self.start.elapsed());
        }
    }
}

impl Drop for OperationTimer {
    fn drop(&mut self) {
        self.finish();
    }
}

/// Counters of a single operation type
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OperationSummary {
    pub count: u64,
    pub avg_time_ms: f64,
    pub slow: u64,
}

/// Summary of performance metrics
#[derive(Debug, Clone)]
pub struct MetricsSummary {
    pub cache_hit_rate: f64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub price_resolutions: OperationSummary,
    pub discount_lookups: OperationSummary,
    pub coupon_validations: OperationSummary,
    pub rule_saves: OperationSummary,
}
