//! Collaborator contracts.
//!
//! The engines never touch persistence directly: they talk to these traits.
//! Every call takes the caller's [`RequestContext`] and must fail with
//! `Cancelled` / `DeadlineExceeded` once the caller has given up. Writes issued
//! with a context that carries a transaction id belong to that transaction.

pub mod atomic;
pub mod memory;

use crate::core::capping::CappingRecord;
use crate::core::commission::Commission;
use crate::core::context::{RequestContext, TxId};
use crate::core::error::StoreResult;
use crate::core::member::{Member, MemberId, Sale, Side};
use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::sync::Arc;

pub use atomic::{AtomicExecutor, Discipline};
pub use memory::{MemoryStore, StoreSnapshot};

/// Persisted member tree.
///
/// Mutations are expressed as deltas so concurrent placements and payouts on
/// the same member cannot lose each other's updates.
#[async_trait]
pub trait MemberStore: Send + Sync {
    async fn get(&self, ctx: &RequestContext, id: &MemberId) -> StoreResult<Member>;

    async fn get_by_code(&self, ctx: &RequestContext, code: &str) -> StoreResult<Member>;

    /// Fails with `Duplicate` if the id or the code is already used.
    async fn insert(&self, ctx: &RequestContext, member: Member) -> StoreResult<()>;

    /// Link `child` into `parent`'s slot. Compare-and-set: fails with
    /// `Conflict` if the slot is already occupied.
    async fn update_child_slot(
        &self,
        ctx: &RequestContext,
        parent: &MemberId,
        side: Side,
        child: &MemberId,
    ) -> StoreResult<()>;

    /// Overwrite both leg volumes.
    async fn update_volumes(
        &self,
        ctx: &RequestContext,
        id: &MemberId,
        left: Decimal,
        right: Decimal,
    ) -> StoreResult<()>;

    /// Add to one leg; returns the updated member.
    async fn add_volume(
        &self,
        ctx: &RequestContext,
        id: &MemberId,
        side: Side,
        amount: Decimal,
    ) -> StoreResult<Member>;

    /// Subtract from each leg, flooring each at zero independently.
    async fn deduct_volumes(
        &self,
        ctx: &RequestContext,
        id: &MemberId,
        left: Decimal,
        right: Decimal,
    ) -> StoreResult<Member>;

    /// Add `amount` to both total earnings and balance.
    async fn credit_earnings(
        &self,
        ctx: &RequestContext,
        id: &MemberId,
        amount: Decimal,
    ) -> StoreResult<()>;

    /// Add to the lifetime cycle count.
    async fn add_cycles(&self, ctx: &RequestContext, id: &MemberId, cycles: u32)
        -> StoreResult<()>;
}

/// Per-member day/week cycle counters.
#[async_trait]
pub trait CappingLedger: Send + Sync {
    /// The member's record rolled forward to `date`, created if absent.
    async fn get_or_create_for_date(
        &self,
        ctx: &RequestContext,
        member: &MemberId,
        date: NaiveDate,
    ) -> StoreResult<CappingRecord>;

    /// Upsert: creates the record with the increment if absent.
    async fn increment_cycles(
        &self,
        ctx: &RequestContext,
        member: &MemberId,
        date: NaiveDate,
        cycles: u32,
    ) -> StoreResult<CappingRecord>;
}

#[async_trait]
pub trait CommissionStore: Send + Sync {
    async fn insert(&self, ctx: &RequestContext, commission: Commission) -> StoreResult<()>;

    async fn list_for_member(
        &self,
        ctx: &RequestContext,
        member: &MemberId,
    ) -> StoreResult<Vec<Commission>>;
}

#[async_trait]
pub trait SalesLedger: Send + Sync {
    async fn record_sale(&self, ctx: &RequestContext, sale: Sale) -> StoreResult<()>;
}

/// Answers "has this member ever sold anything".
#[async_trait]
pub trait ActivityOracle: Send + Sync {
    async fn has_any_sale(&self, ctx: &RequestContext, member: &MemberId) -> StoreResult<bool>;
}

/// Native transaction support of the backing store.
#[async_trait]
pub trait TransactionalStore: Send + Sync {
    fn supports_transactions(&self) -> bool;

    async fn begin(&self, ctx: &RequestContext) -> StoreResult<TxId>;

    async fn commit(&self, ctx: &RequestContext, tx: TxId) -> StoreResult<()>;

    /// Must run even when `ctx` is already cancelled.
    async fn rollback(&self, ctx: &RequestContext, tx: TxId) -> StoreResult<()>;

    /// Roll `tx` back without awaiting, for a transaction whose owner went
    /// away before commit or rollback. A no-op when `tx` is no longer open.
    fn abandon(&self, tx: TxId);
}

/// The collaborator set an engine is built from.
#[derive(Clone)]
pub struct Stores {
    pub members: Arc<dyn MemberStore>,
    pub capping: Arc<dyn CappingLedger>,
    pub commissions: Arc<dyn CommissionStore>,
    pub sales: Arc<dyn SalesLedger>,
    pub activity: Arc<dyn ActivityOracle>,
    pub transactions: Arc<dyn TransactionalStore>,
}

impl Stores {
    /// Every collaborator backed by one in-memory store.
    pub fn from_memory(store: Arc<MemoryStore>) -> Self {
        Self {
            members: store.clone(),
            capping: store.clone(),
            commissions: store.clone(),
            sales: store.clone(),
            activity: store.clone(),
            transactions: store,
        }
    }

    /// Pick the atomic-execution discipline from the store's capability.
    pub fn executor(&self) -> AtomicExecutor {
        AtomicExecutor::for_store(self.transactions.clone())
    }
}
