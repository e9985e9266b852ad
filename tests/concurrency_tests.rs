use async_trait::async_trait;
use binary_engine::core::config::{BinaryConfig, TreeConfig};
use binary_engine::core::context::{CancelHandle, RequestContext};
use binary_engine::core::error::{EngineError, StoreError, StoreResult};
use binary_engine::core::member::{Member, MemberId, Sale, Side};
use binary_engine::engine::BinaryCommissionEngine;
use binary_engine::store::{
    ActivityOracle, CappingLedger, Discipline, MemberStore, MemoryStore, SalesLedger, Stores,
};
use binary_engine::tree::{MemoryTreeCache, TreeSnapshotService};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Root at 100/100 with an active direct on each side.
async fn seeded(store: MemoryStore) -> Arc<MemoryStore> {
    let store = Arc::new(store);
    let ctx = RequestContext::background();
    let root = Member::new(MemberId::new("root"), "50000000", "Root")
        .with_volumes(dec!(100), dec!(100));
    MemberStore::insert(store.as_ref(), &ctx, root).await.unwrap();
    for (id, code, side) in [("l", "50000001", Side::Left), ("r", "50000002", Side::Right)] {
        let m = Member::new(MemberId::new(id), code, id).placed_under(MemberId::new("root"), side);
        MemberStore::insert(store.as_ref(), &ctx, m).await.unwrap();
        store
            .update_child_slot(&ctx, &MemberId::new("root"), side, &MemberId::new(id))
            .await
            .unwrap();
        store
            .record_sale(&ctx, Sale::new(MemberId::new(id), dec!(10)))
            .await
            .unwrap();
    }
    store
}

/// What happens when the payout deducts volume.
enum Deduction {
    Fail,
    Cancel(CancelHandle),
    Stall(Duration),
}

/// Delegates to the memory store, failing or interrupting volume deduction.
struct BrokenDeduction {
    inner: Arc<MemoryStore>,
    on_deduct: Deduction,
}

#[async_trait]
impl MemberStore for BrokenDeduction {
    async fn get(&self, ctx: &RequestContext, id: &MemberId) -> StoreResult<Member> {
        self.inner.get(ctx, id).await
    }

    async fn get_by_code(&self, ctx: &RequestContext, code: &str) -> StoreResult<Member> {
        self.inner.get_by_code(ctx, code).await
    }

    async fn insert(&self, ctx: &RequestContext, member: Member) -> StoreResult<()> {
        MemberStore::insert(self.inner.as_ref(), ctx, member).await
    }

    async fn update_child_slot(
        &self,
        ctx: &RequestContext,
        parent: &MemberId,
        side: Side,
        child: &MemberId,
    ) -> StoreResult<()> {
        self.inner.update_child_slot(ctx, parent, side, child).await
    }

    async fn update_volumes(
        &self,
        ctx: &RequestContext,
        id: &MemberId,
        left: Decimal,
        right: Decimal,
    ) -> StoreResult<()> {
        self.inner.update_volumes(ctx, id, left, right).await
    }

    async fn add_volume(
        &self,
        ctx: &RequestContext,
        id: &MemberId,
        side: Side,
        amount: Decimal,
    ) -> StoreResult<Member> {
        self.inner.add_volume(ctx, id, side, amount).await
    }

    async fn deduct_volumes(
        &self,
        ctx: &RequestContext,
        id: &MemberId,
        left: Decimal,
        right: Decimal,
    ) -> StoreResult<Member> {
        match &self.on_deduct {
            Deduction::Fail => Err(StoreError::Unavailable("volume write timed out".into())),
            Deduction::Cancel(handle) => {
                handle.cancel();
                self.inner.deduct_volumes(ctx, id, left, right).await
            }
            Deduction::Stall(delay) => {
                tokio::time::sleep(*delay).await;
                self.inner.deduct_volumes(ctx, id, left, right).await
            }
        }
    }

    async fn credit_earnings(
        &self,
        ctx: &RequestContext,
        id: &MemberId,
        amount: Decimal,
    ) -> StoreResult<()> {
        self.inner.credit_earnings(ctx, id, amount).await
    }

    async fn add_cycles(&self, ctx: &RequestContext, id: &MemberId, cycles: u32) -> StoreResult<()> {
        self.inner.add_cycles(ctx, id, cycles).await
    }
}

/// Activity oracle that cannot answer for one member.
struct FlakyActivity {
    inner: Arc<MemoryStore>,
    broken: MemberId,
}

#[async_trait]
impl ActivityOracle for FlakyActivity {
    async fn has_any_sale(&self, ctx: &RequestContext, member: &MemberId) -> StoreResult<bool> {
        if member == &self.broken {
            return Err(StoreError::Unavailable("sales replica down".into()));
        }
        self.inner.has_any_sale(ctx, member).await
    }
}

fn with_members(store: Arc<MemoryStore>, members: Arc<dyn MemberStore>) -> Stores {
    Stores {
        members,
        ..Stores::from_memory(store)
    }
}

async fn assert_untouched(store: &MemoryStore) {
    let ctx = RequestContext::background();
    let root = MemberId::new("root");
    assert!(store.all_commissions().await.is_empty());
    let rec = store
        .get_or_create_for_date(&ctx, &root, ctx.today())
        .await
        .unwrap();
    assert_eq!(rec.cycles_paid_today, 0);
    assert_eq!(rec.cycles_paid_this_week, 0);
    let m = store.get(&ctx, &root).await.unwrap();
    assert_eq!(m.total_earnings, dec!(0));
    assert_eq!(m.balance, dec!(0));
    assert_eq!(m.cycle_count, 0);
    assert_eq!(m.network_volume_left, dec!(100));
    assert_eq!(m.network_volume_right, dec!(100));
}

async fn race(engine: Arc<BinaryCommissionEngine>, callers: usize) -> u32 {
    let mut handles = Vec::new();
    for _ in 0..callers {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            engine
                .compute_binary_commission(&RequestContext::background(), &MemberId::new("root"))
                .await
        }));
    }
    let mut paid = 0;
    for h in handles {
        paid += h.await.unwrap().unwrap().cycles_paid;
    }
    paid
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_payouts_respect_daily_cap_with_transactions() {
    let store = seeded(MemoryStore::new()).await;
    let engine = Arc::new(BinaryCommissionEngine::new(
        Stores::from_memory(store.clone()),
        BinaryConfig::default(),
    ));
    assert_eq!(engine.discipline(), Discipline::Transaction);

    assert_eq!(race(engine, 12).await, 4);

    let ctx = RequestContext::background();
    let root = store.get(&ctx, &MemberId::new("root")).await.unwrap();
    assert_eq!(root.cycle_count, 4);
    assert_eq!(root.total_earnings, dec!(0.4));
    assert_eq!(root.network_volume_left, dec!(96));
    let commissions = store.all_commissions().await;
    assert_eq!(commissions.len(), 1);
    assert_eq!(commissions[0].cycles(), 4);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_payouts_respect_daily_cap_with_process_lock() {
    let store = seeded(MemoryStore::without_transactions()).await;
    let engine = Arc::new(BinaryCommissionEngine::new(
        Stores::from_memory(store.clone()),
        BinaryConfig::default(),
    ));
    assert_eq!(engine.discipline(), Discipline::ProcessLock);

    assert_eq!(race(engine, 12).await, 4);

    let ctx = RequestContext::background();
    let rec = store
        .get_or_create_for_date(&ctx, &MemberId::new("root"), ctx.today())
        .await
        .unwrap();
    assert_eq!(rec.cycles_paid_today, 4);
    let total: u32 = store.all_commissions().await.iter().map(|c| c.cycles()).sum();
    assert_eq!(total, 4);
}

#[tokio::test]
async fn failed_settlement_rolls_everything_back() {
    let store = seeded(MemoryStore::new()).await;
    let broken = Arc::new(BrokenDeduction {
        inner: store.clone(),
        on_deduct: Deduction::Fail,
    });
    let engine = BinaryCommissionEngine::new(with_members(store.clone(), broken), BinaryConfig::default());

    let err = engine
        .compute_binary_commission(&RequestContext::background(), &MemberId::new("root"))
        .await
        .unwrap_err();
    match err {
        EngineError::PayoutAborted { member, source } => {
            assert_eq!(member, MemberId::new("root"));
            assert!(matches!(source, StoreError::Unavailable(_)));
        }
        other => panic!("expected PayoutAborted, got {other:?}"),
    }
    assert_untouched(&store).await;

    // the gate was released: a healthy engine can pay right after
    let healthy = BinaryCommissionEngine::new(Stores::from_memory(store.clone()), BinaryConfig::default());
    let r = healthy
        .compute_binary_commission(&RequestContext::background(), &MemberId::new("root"))
        .await
        .unwrap();
    assert_eq!(r.cycles_paid, 4);
}

#[tokio::test]
async fn cancellation_inside_settlement_still_rolls_back() {
    let store = seeded(MemoryStore::new()).await;
    let (ctx, handle) = RequestContext::background().cancellable();
    let broken = Arc::new(BrokenDeduction {
        inner: store.clone(),
        on_deduct: Deduction::Cancel(handle),
    });
    let engine = BinaryCommissionEngine::new(with_members(store.clone(), broken), BinaryConfig::default());

    let err = engine
        .compute_binary_commission(&ctx, &MemberId::new("root"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::PayoutAborted {
            source: StoreError::Cancelled,
            ..
        }
    ));
    assert_untouched(&store).await;
}

#[tokio::test]
async fn abandoned_payout_rolls_back_and_frees_the_store() {
    let store = seeded(MemoryStore::new()).await;
    let slow = Arc::new(BrokenDeduction {
        inner: store.clone(),
        on_deduct: Deduction::Stall(Duration::from_millis(200)),
    });
    let engine = BinaryCommissionEngine::new(with_members(store.clone(), slow), BinaryConfig::default());
    let ctx = RequestContext::background();
    let root = MemberId::new("root");

    let payout = engine.compute_binary_commission(&ctx, &root);
    let timed_out = tokio::time::timeout(Duration::from_millis(50), payout).await;
    assert!(timed_out.is_err());
    assert_untouched(&store).await;

    let l = MemberId::new("l");
    let write = store.update_volumes(&ctx, &l, dec!(5), dec!(5));
    tokio::time::timeout(Duration::from_secs(2), write)
        .await
        .expect("store still held by the abandoned payout")
        .unwrap();

    let healthy = BinaryCommissionEngine::new(Stores::from_memory(store.clone()), BinaryConfig::default());
    let r = healthy.compute_binary_commission(&ctx, &root).await.unwrap();
    assert_eq!(r.cycles_paid, 4);
    assert_eq!(store.all_commissions().await.len(), 1);
}

#[tokio::test]
async fn interrupted_callers_pay_nothing() {
    let store = seeded(MemoryStore::new()).await;
    let engine = BinaryCommissionEngine::new(Stores::from_memory(store.clone()), BinaryConfig::default());
    let root = MemberId::new("root");

    let (ctx, handle) = RequestContext::background().cancellable();
    handle.cancel();
    let err = engine.compute_binary_commission(&ctx, &root).await.unwrap_err();
    assert!(matches!(err, EngineError::Store(StoreError::Cancelled)));

    let expired = RequestContext::background().with_deadline(Instant::now());
    let err = engine.compute_binary_commission(&expired, &root).await.unwrap_err();
    assert!(matches!(err, EngineError::Store(StoreError::DeadlineExceeded)));

    assert_untouched(&store).await;
}

#[tokio::test]
async fn activity_failure_degrades_to_inactive() {
    let store = seeded(MemoryStore::new()).await;
    let flaky: Arc<dyn ActivityOracle> = Arc::new(FlakyActivity {
        inner: store.clone(),
        broken: MemberId::new("l"),
    });
    let stores = Stores {
        activity: flaky.clone(),
        ..Stores::from_memory(store.clone())
    };
    let ctx = RequestContext::background();
    let root = MemberId::new("root");

    let engine = BinaryCommissionEngine::new(stores, BinaryConfig::default());
    let r = engine.compute_binary_commission(&ctx, &root).await.unwrap();
    assert!(r.success);
    assert!(!r.qualified);
    assert!(store.all_commissions().await.is_empty());

    let snapshots = TreeSnapshotService::new(
        store.clone(),
        flaky,
        Arc::new(MemoryTreeCache::new()),
        BinaryConfig::default(),
        TreeConfig::default(),
    );
    let tree = snapshots.get_client_tree(&ctx, &root).await.unwrap();
    assert_eq!(tree.total_nodes, 3);
    assert!(!tree.node(&MemberId::new("l")).unwrap().is_active);
    assert!(tree.node(&MemberId::new("r")).unwrap().is_active);
    assert_eq!(tree.root.left_actives, 0);
    assert_eq!(tree.root.right_actives, 1);
    assert_eq!(tree.root.cycles_available, Some(0));
}
