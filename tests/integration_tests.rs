use binary_engine::core::commission::CommissionKind;
use binary_engine::core::config::{BinaryConfig, EngineConfig};
use binary_engine::core::context::RequestContext;
use binary_engine::core::error::EngineError;
use binary_engine::core::member::{MemberId, NewMember, Side};
use binary_engine::engine::CompensationPlan;
use binary_engine::store::{CommissionStore, MemberStore, MemoryStore, StoreSnapshot, Stores};
use chrono::{Duration, TimeZone, Utc};
use rust_decimal_macros::dec;
use std::sync::Arc;

struct Network {
    store: Arc<MemoryStore>,
    plan: CompensationPlan,
    root: MemberId,
    left: MemberId,
    right: MemberId,
}

/// Root with one direct on each side. Enrollment credits 50 to each root leg.
async fn network(config: EngineConfig) -> Network {
    let store = Arc::new(MemoryStore::new());
    let plan = CompensationPlan::new(Stores::from_memory(store.clone()), config);
    let ctx = RequestContext::background();

    let root = plan
        .placement
        .place(&ctx, NewMember::named("Root"), None, None)
        .await
        .unwrap()
        .member
        .id;
    let left = plan
        .placement
        .place(&ctx, NewMember::named("Left"), Some(&root), Some(Side::Left))
        .await
        .unwrap()
        .member
        .id;
    let right = plan
        .placement
        .place(&ctx, NewMember::named("Right"), Some(&root), Some(Side::Right))
        .await
        .unwrap()
        .member
        .id;

    Network {
        store,
        plan,
        root,
        left,
        right,
    }
}

/// Full pipeline: enrollment → sales → propagation → cycle payout → snapshot.
#[tokio::test]
async fn full_pipeline_enroll_sell_pay_snapshot() {
    let net = network(EngineConfig::default()).await;
    let ctx = RequestContext::background();

    // below the 100 match threshold on both legs, so no binary match fires
    net.plan.placement.record_sale(&ctx, &net.left, dec!(30)).await.unwrap();
    let prop = net.plan.placement.record_sale(&ctx, &net.right, dec!(30)).await.unwrap();
    assert_eq!(prop.credited, vec![(net.root.clone(), Side::Right)]);
    assert!(prop.matches.is_empty());

    let root = net.store.get(&ctx, &net.root).await.unwrap();
    assert_eq!(root.network_volume_left, dec!(80));
    assert_eq!(root.network_volume_right, dec!(80));

    let result = net
        .plan
        .commission
        .compute_binary_commission(&ctx, &net.root)
        .await
        .unwrap();
    assert!(result.success);
    assert!(result.qualified);
    assert_eq!(result.cycles_available, 80);
    assert_eq!(result.cycles_paid, 4);
    assert_eq!(result.amount, dec!(0.4));
    assert_eq!(result.left_volume_remaining, dec!(76));
    assert_eq!(result.right_volume_remaining, dec!(76));

    let tree = net.plan.tree.get_client_tree(&ctx, &net.root).await.unwrap();
    assert_eq!(tree.total_nodes, 3);
    assert_eq!(tree.max_level, 1);
    assert_eq!(tree.root.id, net.root);
    assert_eq!(tree.root.left_actives, 1);
    assert_eq!(tree.root.right_actives, 1);
    assert!(tree.root.is_qualified);
    assert_eq!(tree.root.cycles_available, Some(1));
    assert_eq!(tree.root.total_earnings, dec!(0.4));

    let left = tree.node(&net.left).unwrap();
    assert_eq!(left.level, 1);
    assert_eq!(left.parent_id.as_ref(), Some(&net.root));
    assert!(left.is_active);
    assert!(!left.is_qualified);
    assert_eq!(left.cycles_available, Some(0));
}

#[tokio::test]
async fn capped_payout_of_a_hundred_on_each_leg() {
    let net = network(EngineConfig::default()).await;
    let ctx = RequestContext::background();
    net.plan.placement.record_sale(&ctx, &net.left, dec!(1)).await.unwrap();
    net.plan.placement.record_sale(&ctx, &net.right, dec!(1)).await.unwrap();
    net.store
        .update_volumes(&ctx, &net.root, dec!(100), dec!(100))
        .await
        .unwrap();

    let r = net
        .plan
        .commission
        .compute_binary_commission(&ctx, &net.root)
        .await
        .unwrap();
    assert_eq!(r.cycles_available, 100);
    assert_eq!(r.cycles_paid, 4);
    assert_eq!(r.amount, dec!(0.4));
    assert_eq!(r.left_volume_remaining, dec!(96));
    assert_eq!(r.right_volume_remaining, dec!(96));

    let paid = net.store.list_for_member(&ctx, &net.root).await.unwrap();
    assert_eq!(paid.len(), 1);
    assert_eq!(paid[0].kind(), CommissionKind::BinaryCycle);
    assert_eq!(paid[0].cycles(), 4);
    assert_eq!(paid[0].amount(), dec!(0.4));
}

#[tokio::test]
async fn daily_cap_resets_on_the_next_day() {
    let net = network(EngineConfig::default()).await;
    let monday = Utc.with_ymd_and_hms(2024, 3, 4, 9, 0, 0).unwrap();
    let ctx = RequestContext::background().at(monday);
    net.plan.placement.record_sale(&ctx, &net.left, dec!(1)).await.unwrap();
    net.plan.placement.record_sale(&ctx, &net.right, dec!(1)).await.unwrap();
    net.store
        .update_volumes(&ctx, &net.root, dec!(100), dec!(100))
        .await
        .unwrap();

    let engine = &net.plan.commission;
    assert_eq!(engine.compute_binary_commission(&ctx, &net.root).await.unwrap().cycles_paid, 4);
    let capped = engine.compute_binary_commission(&ctx, &net.root).await.unwrap();
    assert_eq!(capped.cycles_paid, 0);
    assert_eq!(capped.reason.as_deref(), Some("daily cycle limit reached"));

    let tuesday = RequestContext::background().at(monday + Duration::days(1));
    let r = engine.compute_binary_commission(&tuesday, &net.root).await.unwrap();
    assert_eq!(r.cycles_paid, 4);
    assert_eq!(r.left_volume_remaining, dec!(92));

    let root = net.store.get(&ctx, &net.root).await.unwrap();
    assert_eq!(root.cycle_count, 8);
    assert_eq!(root.total_earnings, dec!(0.8));
}

#[tokio::test]
async fn weekly_cap_spans_days_and_resets_on_monday() {
    let config = EngineConfig {
        binary: BinaryConfig {
            daily_cycle_limit: 0,
            weekly_cycle_limit: 6,
            ..Default::default()
        },
        ..Default::default()
    };
    let net = network(config).await;
    // Wednesday
    let wednesday = Utc.with_ymd_and_hms(2024, 3, 6, 9, 0, 0).unwrap();
    let ctx = RequestContext::background().at(wednesday);
    net.plan.placement.record_sale(&ctx, &net.left, dec!(1)).await.unwrap();
    net.plan.placement.record_sale(&ctx, &net.right, dec!(1)).await.unwrap();
    net.store
        .update_volumes(&ctx, &net.root, dec!(100), dec!(100))
        .await
        .unwrap();

    let engine = &net.plan.commission;
    let r = engine.compute_binary_commission(&ctx, &net.root).await.unwrap();
    assert_eq!(r.cycles_paid, 6);
    assert!(r.reason.unwrap().starts_with("weekly cycle limit reached"));

    let friday = RequestContext::background().at(wednesday + Duration::days(2));
    let r = engine.compute_binary_commission(&friday, &net.root).await.unwrap();
    assert_eq!(r.cycles_paid, 0);
    assert_eq!(r.reason.as_deref(), Some("weekly cycle limit reached"));

    let next_monday = RequestContext::background().at(wednesday + Duration::days(5));
    let r = engine.compute_binary_commission(&next_monday, &net.root).await.unwrap();
    assert_eq!(r.cycles_paid, 6);
    assert_eq!(r.left_volume_remaining, dec!(88));
}

#[tokio::test]
async fn one_sided_activity_is_not_qualified() {
    let net = network(EngineConfig::default()).await;
    let ctx = RequestContext::background();
    net.plan.placement.record_sale(&ctx, &net.left, dec!(10)).await.unwrap();

    let q = net.plan.commission.qualification(&ctx, &net.root).await.unwrap();
    assert!(q.has_direct_left);
    assert!(!q.has_direct_right);
    assert!(!q.is_qualified);

    let r = net
        .plan
        .commission
        .compute_binary_commission(&ctx, &net.root)
        .await
        .unwrap();
    assert!(r.success);
    assert!(!r.qualified);
    assert_eq!(r.cycles_paid, 0);
    assert_eq!(r.left_volume_remaining, dec!(60));
    assert!(net.store.all_commissions().await.is_empty());
}

#[tokio::test]
async fn relaxed_qualification_still_needs_actives_on_both_legs() {
    let config = EngineConfig {
        binary: BinaryConfig {
            require_direct_right: false,
            ..Default::default()
        },
        ..Default::default()
    };
    let net = network(config).await;
    let ctx = RequestContext::background();
    net.plan.placement.record_sale(&ctx, &net.left, dec!(10)).await.unwrap();

    let r = net
        .plan
        .commission
        .compute_binary_commission(&ctx, &net.root)
        .await
        .unwrap();
    assert!(r.qualified);
    assert_eq!(r.cycles_paid, 0);
    assert_eq!(
        r.reason.as_deref(),
        Some("empty leg: no active member on the right leg")
    );
}

#[tokio::test]
async fn deep_actives_count_toward_the_leg() {
    let net = network(EngineConfig::default()).await;
    let ctx = RequestContext::background();
    net.plan.placement.record_sale(&ctx, &net.left, dec!(5)).await.unwrap();
    net.plan.placement.record_sale(&ctx, &net.right, dec!(5)).await.unwrap();

    // two more under the right direct, both active
    for name in ["R1", "R2"] {
        let id = net
            .plan
            .placement
            .place(&ctx, NewMember::named(name), Some(&net.right), None)
            .await
            .unwrap()
            .member
            .id;
        net.plan.placement.record_sale(&ctx, &id, dec!(5)).await.unwrap();
    }

    let legs = net.plan.commission.legs(&ctx, &net.root).await.unwrap();
    assert_eq!(legs.left_actives, 1);
    assert_eq!(legs.right_actives, 3);
}

#[tokio::test]
async fn placement_errors_surface_to_the_caller() {
    let net = network(EngineConfig::default()).await;
    let ctx = RequestContext::background();

    let err = net
        .plan
        .placement
        .place(&ctx, NewMember::named("X"), Some(&net.root), Some(Side::Left))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::SponsorFull(_)));

    let err = net
        .plan
        .commission
        .compute_binary_commission(&ctx, &MemberId::new("nobody"))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::MemberNotFound(_)));

    let err = net
        .plan
        .tree
        .get_client_tree(&ctx, &MemberId::new("nobody"))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::MemberNotFound(_)));
}

#[tokio::test]
async fn snapshot_is_cached_until_invalidated() {
    let net = network(EngineConfig::default()).await;
    let ctx = RequestContext::background();

    let first = net.plan.tree.get_client_tree(&ctx, &net.root).await.unwrap();
    assert_eq!(first.total_nodes, 3);

    net.plan
        .placement
        .place(&ctx, NewMember::named("Late"), Some(&net.left), None)
        .await
        .unwrap();
    let cached = net.plan.tree.get_client_tree(&ctx, &net.root).await.unwrap();
    assert_eq!(cached.total_nodes, 3);

    assert!(net.plan.tree.invalidate_cache(&net.root).await);
    let fresh = net.plan.tree.get_client_tree(&ctx, &net.root).await.unwrap();
    assert_eq!(fresh.total_nodes, 4);
    assert_eq!(fresh.max_level, 2);
}

#[tokio::test]
async fn store_snapshot_survives_json() {
    let net = network(EngineConfig::default()).await;
    let ctx = RequestContext::background();
    net.plan.placement.record_sale(&ctx, &net.left, dec!(1)).await.unwrap();
    net.plan.placement.record_sale(&ctx, &net.right, dec!(1)).await.unwrap();
    net.plan
        .commission
        .compute_binary_commission(&ctx, &net.root)
        .await
        .unwrap();

    let json = serde_json::to_string(&net.store.snapshot().await).unwrap();
    let restored: StoreSnapshot = serde_json::from_str(&json).unwrap();
    let reopened = Arc::new(MemoryStore::from_snapshot(restored, true));

    let root = net.store.get(&ctx, &net.root).await.unwrap();
    let by_code = reopened.get_by_code(&ctx, &root.code).await.unwrap();
    assert_eq!(by_code, root);
    assert_eq!(reopened.all_commissions().await.len(), 1);

    // the cap carried over with the snapshot
    let plan = CompensationPlan::new(Stores::from_memory(reopened), EngineConfig::default());
    let r = plan
        .commission
        .compute_binary_commission(&ctx, &net.root)
        .await
        .unwrap();
    assert_eq!(r.cycles_paid, 0);
}
