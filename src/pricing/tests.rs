// Service tests for the pricing engine
// Runs every operation end to end over the in-memory backend

use super::*;
use chrono::{Duration, TimeZone};
use rust_decimal_macros::dec;

// ============================================================================
// Test Helpers
// ============================================================================

fn day(d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 4, d, 9, 0, 0).unwrap()
}

fn context() -> StoreContext {
    StoreContext {
        store_id: Uuid::new_v4(),
        default_price_group_id: None,
    }
}

/// Service over a fresh in-memory backend; the backend handle stays usable for seeding
fn create_test_service(context: StoreContext) -> (PricingService, MemoryBackend) {
    let backend = MemoryBackend::new();
    let service = PricingService::new(
        PricingBackend::in_memory(backend.clone()),
        context,
        CACHE_TTL,
    );
    (service, backend)
}

fn discount_group(id: Uuid, parent_id: Option<Uuid>, include_children: bool) -> DiscountGroup {
    DiscountGroup {
        id,
        store_id: None,
        group_number: format!("G-{}", id.simple()),
        description: "Test group".to_string(),
        discount_label: None,
        parent_id,
        include_children,
    }
}

// ============================================================================
// Price rules
// ============================================================================

#[tokio::test]
async fn test_save_and_price_line() {
    let (service, _) = create_test_service(context());
    let product = Uuid::new_v4();

    service
        .save_price_rule(
            NewPriceRule {
                product_id: Some(product),
                price: dec!(12.5),
                pricing_type: PricingType::PerHour,
                valid_from: Some(day(1)),
                ..Default::default()
            },
            day(1),
        )
        .await
        .unwrap();

    let line = PriceLine {
        duration: Duration::minutes(150),
        vat_rate: dec!(0.2),
        ..PriceLine::new(product, 2)
    };
    let priced = service.price_line(line, day(2)).await.unwrap().unwrap();

    assert_eq!(priced.pricing_type, PricingType::PerHour);
    assert_eq!(priced.totals.ex_vat, dec!(75.00));
    assert_eq!(priced.totals.vat, dec!(15.00));
    assert_eq!(priced.totals.in_vat, dec!(90.00));
}

#[tokio::test]
async fn test_new_price_supersedes_old_one() {
    let (service, backend) = create_test_service(context());
    let product = Uuid::new_v4();

    let first = service
        .save_price_rule(
            NewPriceRule {
                product_id: Some(product),
                price: dec!(10),
                valid_from: Some(day(1)),
                ..Default::default()
            },
            day(1),
        )
        .await
        .unwrap();
    let second = service
        .save_price_rule(
            NewPriceRule {
                product_id: Some(product),
                price: dec!(11),
                valid_from: Some(day(10)),
                ..Default::default()
            },
            day(5),
        )
        .await
        .unwrap();

    assert_eq!(second.truncated(), &[first.record().id]);

    let stored = backend.price_rules.all().unwrap();
    assert_eq!(stored.len(), 2);
    assert_eq!(stored[0].window.valid_to, stored[1].window.valid_from);

    // the cache was invalidated by the save
    let before = service
        .price_line(PriceLine::new(product, 1), day(9))
        .await
        .unwrap()
        .unwrap();
    let after = service
        .price_line(PriceLine::new(product, 1), day(10))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(before.unit_price, dec!(10));
    assert_eq!(after.unit_price, dec!(11));
}

#[tokio::test]
async fn test_identical_price_rule_is_deduplicated() {
    let (service, backend) = create_test_service(context());
    let product = Uuid::new_v4();
    let input = || NewPriceRule {
        product_id: Some(product),
        price: dec!(10),
        ..Default::default()
    };

    let first = service.save_price_rule(input(), day(1)).await.unwrap();
    let again = service.save_price_rule(input(), day(2)).await.unwrap();

    assert!(!again.is_new());
    assert_eq!(again.record().id, first.record().id);
    assert_eq!(backend.price_rules.all().unwrap().len(), 1);
}

#[tokio::test]
async fn test_price_rule_requires_product_dimension() {
    let (service, _) = create_test_service(context());

    let result = service
        .save_price_rule(
            NewPriceRule {
                price_group_id: Some(Uuid::new_v4()),
                price: dec!(10),
                ..Default::default()
            },
            day(1),
        )
        .await;

    assert!(matches!(result, Err(PricingError::ConstraintViolation(_))));
}

#[tokio::test]
async fn test_default_price_group_applies() {
    let price_group = Uuid::new_v4();
    let context = StoreContext {
        default_price_group_id: Some(price_group),
        ..context()
    };
    let (service, _) = create_test_service(context);
    let product = Uuid::new_v4();

    for (group, price) in [(None, dec!(10)), (Some(price_group), dec!(8))] {
        service
            .save_price_rule(
                NewPriceRule {
                    product_id: Some(product),
                    price_group_id: group,
                    price,
                    valid_from: Some(day(1)),
                    ..Default::default()
                },
                day(1),
            )
            .await
            .unwrap();
    }

    let priced = service
        .price_line(PriceLine::new(product, 1), day(2))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(priced.unit_price, dec!(8));
}

#[tokio::test]
async fn test_line_without_rule_has_no_price() {
    let (service, _) = create_test_service(context());
    let priced = service
        .price_line(PriceLine::new(Uuid::new_v4(), 1), day(1))
        .await
        .unwrap();
    assert!(priced.is_none());
}

// ============================================================================
// Discount rules
// ============================================================================

#[tokio::test]
async fn test_discount_percentage_points_normalized() {
    let (service, _) = create_test_service(context());

    let outcome = service
        .save_discount_rule(
            NewDiscountRule {
                product_id: Some(Uuid::new_v4()),
                discount_perc: Some(dec!(50)),
                ..Default::default()
            },
            day(1),
        )
        .await
        .unwrap();

    assert_eq!(outcome.record().discount_perc, dec!(0.5));
}

#[tokio::test]
async fn test_discount_percentage_out_of_range_rejected() {
    let (service, _) = create_test_service(context());

    let result = service
        .save_discount_rule(
            NewDiscountRule {
                product_id: Some(Uuid::new_v4()),
                discount_perc: Some(dec!(150)),
                ..Default::default()
            },
            day(1),
        )
        .await;

    assert!(matches!(result, Err(PricingError::ValidationError(_))));
}

#[tokio::test]
async fn test_discount_requires_product_dimension() {
    let (service, _) = create_test_service(context());

    let result = service
        .save_discount_rule(
            NewDiscountRule {
                customer_id: Some(Uuid::new_v4()),
                discount_abs: Some(dec!(1)),
                ..Default::default()
            },
            day(1),
        )
        .await;

    assert!(matches!(result, Err(PricingError::ConstraintViolation(_))));
}

#[tokio::test]
async fn test_identical_discount_returns_existing() {
    let (service, _) = create_test_service(context());
    let product = Uuid::new_v4();
    let input = || NewDiscountRule {
        product_id: Some(product),
        discount_perc: Some(dec!(0.1)),
        ..Default::default()
    };

    let first = service.save_discount_rule(input(), day(1)).await.unwrap();
    let again = service.save_discount_rule(input(), day(3)).await.unwrap();

    assert_eq!(again, UpsertOutcome::Deduplicated(first.into_record()));
}

#[tokio::test]
async fn test_best_discount_combines_axes() {
    let (service, _) = create_test_service(context());
    let product = Uuid::new_v4();

    for (abs, perc) in [(Some(dec!(5)), None), (None, Some(dec!(0.1)))] {
        service
            .save_discount_rule(
                NewDiscountRule {
                    product_id: Some(product),
                    customer_id: abs.map(|_| Uuid::nil()),
                    discount_abs: abs,
                    discount_perc: perc,
                    valid_from: Some(day(1)),
                    ..Default::default()
                },
                day(1),
            )
            .await
            .unwrap();
    }

    let query = DiscountQuery {
        product_id: Some(product),
        customer_id: Some(Uuid::nil()),
        quantity: 1,
        ..Default::default()
    };
    let best = service.best_discount(query, day(2)).await.unwrap();
    assert_eq!(best, DiscountAmounts::new(dec!(5), dec!(0.1)));
}

#[tokio::test]
async fn test_customer_group_looked_up_through_directory() {
    let (service, backend) = create_test_service(context());
    let product = Uuid::new_v4();
    let customer = Uuid::new_v4();
    let customer_group = Uuid::new_v4();
    backend.assign_customer(customer, customer_group).unwrap();

    service
        .save_discount_rule(
            NewDiscountRule {
                product_id: Some(product),
                customer_discount_group_id: Some(customer_group),
                discount_abs: Some(dec!(2.5)),
                valid_from: Some(day(1)),
                ..Default::default()
            },
            day(1),
        )
        .await
        .unwrap();

    let query = DiscountQuery {
        product_id: Some(product),
        customer_id: Some(customer),
        quantity: 1,
        ..Default::default()
    };
    assert_eq!(service.best_discount(query, day(2)).await.unwrap().absolute, dec!(2.5));

    let stranger = DiscountQuery {
        customer_id: Some(Uuid::new_v4()),
        ..query
    };
    assert!(service.best_discount(stranger, day(2)).await.unwrap().is_none());
}

#[tokio::test]
async fn test_group_tiers() {
    let (service, backend) = create_test_service(context());
    let group = Uuid::new_v4();
    backend.add_discount_group(discount_group(group, None, false)).unwrap();

    for (min, max, perc) in [(1, 9, dec!(0.05)), (10, 99, dec!(0.1))] {
        service
            .save_discount_rule(
                NewDiscountRule {
                    product_discount_group_id: Some(group),
                    customer_id: Some(Uuid::new_v4()),
                    discount_perc: Some(perc),
                    min_order_quantity: Some(min),
                    max_order_quantity: Some(max),
                    valid_from: Some(day(1)),
                    ..Default::default()
                },
                day(1),
            )
            .await
            .unwrap();
    }

    assert_eq!(
        service.discount_for_quantity(group, 12, day(2)).await.unwrap().percentage,
        dec!(0.1)
    );
    assert_eq!(
        service.discount_for_quantity(group, 500, day(2)).await.unwrap(),
        DiscountAmounts::NONE
    );
    assert_eq!(
        service.group_max_discount(group, day(2)).await.unwrap().percentage,
        dec!(0.1)
    );

    // a third tier overlapping the second is rejected
    let overlapping = service
        .save_discount_rule(
            NewDiscountRule {
                product_discount_group_id: Some(group),
                customer_id: Some(Uuid::new_v4()),
                discount_perc: Some(dec!(0.2)),
                min_order_quantity: Some(50),
                max_order_quantity: Some(200),
                ..Default::default()
            },
            day(2),
        )
        .await;
    assert!(matches!(overlapping, Err(PricingError::ValidationError(_))));
}

#[tokio::test]
async fn test_unknown_group_is_an_error() {
    let (service, _) = create_test_service(context());
    let group = Uuid::new_v4();

    let result = service.group_max_discount(group, day(1)).await;
    assert!(matches!(result, Err(PricingError::GroupNotFound(id)) if id == group));
}

#[tokio::test]
async fn test_inherited_group_discount() {
    let (service, backend) = create_test_service(context());
    let parent = Uuid::new_v4();
    let child = Uuid::new_v4();
    backend.add_discount_group(discount_group(parent, None, true)).unwrap();
    backend.add_discount_group(discount_group(child, Some(parent), false)).unwrap();

    service
        .save_discount_rule(
            NewDiscountRule {
                product_discount_group_id: Some(parent),
                discount_perc: Some(dec!(15)),
                valid_from: Some(day(1)),
                ..Default::default()
            },
            day(1),
        )
        .await
        .unwrap();

    let query = DiscountQuery {
        product_id: Some(Uuid::new_v4()),
        product_group_id: Some(child),
        quantity: 3,
        ..Default::default()
    };
    assert_eq!(service.best_discount(query, day(2)).await.unwrap().percentage, dec!(0.15));
}

// ============================================================================
// Coupons
// ============================================================================

#[tokio::test]
async fn test_save_and_redeem_coupon() {
    let (service, backend) = create_test_service(context());
    let p1 = Uuid::new_v4();
    let p2 = Uuid::new_v4();

    let coupon = service
        .save_coupon(
            NewCoupon {
                discount_code: "SPRING".to_string(),
                discount_label: "Spring sale".to_string(),
                product_ids: vec![p1, p2],
                email: Some(String::new()),
                discount_perc: Some(dec!(0.1)),
                minimal_order_amount: Some(dec!(20)),
                needs_products: Some(-1),
                valid_from: Some(day(1)),
                ..Default::default()
            },
            day(1),
        )
        .await
        .unwrap();
    assert_eq!(coupon.email, None);

    let lines = [
        OrderLine { product_id: p1, quantity: 3 },
        OrderLine { product_id: p2, quantity: 1 },
    ];
    let redemption = service
        .redeem_coupon("SPRING", &[], dec!(45), &lines, day(2))
        .await
        .unwrap();

    match redemption {
        Redemption::Applied { reduction, product_id, .. } => {
            assert_eq!(reduction.kind, CouponReductionKind::Percentage);
            assert_eq!(reduction.amount, dec!(4.50));
            assert_eq!(backend.products().unwrap()["DISCOUNT_COUPON_PERC"], product_id);
        }
        other => panic!("expected applied coupon, got {:?}", other),
    }

    let too_small = service
        .redeem_coupon("SPRING", &[], dec!(10), &lines, day(2))
        .await
        .unwrap();
    assert!(too_small.is_rejected());

    let one_product = service
        .redeem_coupon("SPRING", &[], dec!(45), &lines[..1], day(2))
        .await
        .unwrap();
    assert_eq!(
        one_product,
        Redemption::Rejected(
            "This coupon requires 2 different products from its selection".to_string()
        )
    );
}

#[tokio::test]
async fn test_duplicate_coupon_code_rejected() {
    let (service, _) = create_test_service(context());
    let input = || NewCoupon {
        discount_code: "ONCE".to_string(),
        discount_label: "Once".to_string(),
        discount_abs: Some(dec!(1)),
        ..Default::default()
    };

    service.save_coupon(input(), day(1)).await.unwrap();
    let result = service.save_coupon(input(), day(1)).await;

    assert!(matches!(result, Err(PricingError::ConstraintViolation(_))));
}

#[tokio::test]
async fn test_invalid_coupon_input_rejected() {
    let (service, _) = create_test_service(context());

    let result = service
        .save_coupon(
            NewCoupon {
                discount_code: "BAD".to_string(),
                discount_label: "Bad".to_string(),
                email: Some("not-an-email".to_string()),
                ..Default::default()
            },
            day(1),
        )
        .await;

    assert!(matches!(result, Err(PricingError::ValidationError(_))));
}

#[tokio::test]
async fn test_validate_coupon_directly() {
    let (service, _) = create_test_service(context());
    let coupon = NewCoupon {
        discount_code: "MAIL".to_string(),
        discount_label: "Mail".to_string(),
        email: Some("a@x.com".to_string()),
        ..Default::default()
    }
    .into_coupon(day(1));

    assert!(!service.validate_coupon(&coupon, &["b@x.com"], dec!(1), &[]).is_accepted());
    assert!(service
        .validate_coupon(&coupon, &["a@x.com", "b@x.com"], dec!(1), &[])
        .is_accepted());
    assert_eq!(service.metrics().summary().coupon_validations.count, 2);
}

// ============================================================================
// Cache & metrics
// ============================================================================

#[tokio::test]
async fn test_warm_cache_counts_misses() {
    let (service, _) = create_test_service(context());

    service.warm_cache().await.unwrap();
    service.price_line(PriceLine::new(Uuid::new_v4(), 1), day(1)).await.unwrap();

    let summary = service.metrics().summary();
    assert_eq!(summary.cache_misses, 4);
    assert_eq!(summary.cache_hits, 1);
    assert_eq!(summary.price_resolutions.count, 1);
}
