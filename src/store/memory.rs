//! In-process implementation of every collaborator.
//!
//! Transactions serialise on a gate: `begin` takes it, `commit`/`rollback`
//! release it, and autocommit writes queue behind it. Writes made under the
//! open transaction push undo entries that `rollback` replays newest first.
//! Reads outside the transaction wait for the gate too, so uncommitted writes
//! are only visible to the transaction that made them.
//!
//! State sits behind a synchronous lock that is never held across an await,
//! so a transaction abandoned from `Drop` can still be unwound.

use crate::core::capping::CappingRecord;
use crate::core::commission::Commission;
use crate::core::context::{week_start, RequestContext, TxId};
use crate::core::error::{StoreError, StoreResult};
use crate::core::member::{Member, MemberId, Sale, Side};
use crate::store::{
    ActivityOracle, CappingLedger, CommissionStore, MemberStore, SalesLedger, TransactionalStore,
};
use async_trait::async_trait;
use chrono::NaiveDate;
use log::{debug, warn};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::{Mutex, MutexGuard, OwnedMutexGuard};
use uuid::Uuid;

/// Serializable dump of a [`MemoryStore`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSnapshot {
    pub members: Vec<Member>,
    pub cappings: Vec<CappingRecord>,
    pub commissions: Vec<Commission>,
    pub sales: Vec<Sale>,
}

enum Undo {
    Member(MemberId, Option<Member>),
    Code(String),
    Capping(MemberId, Option<CappingRecord>),
    Commission(Uuid),
    Sale(Uuid),
}

struct Journal {
    tx: TxId,
    undo: Vec<Undo>,
    _gate: OwnedMutexGuard<()>,
}

#[derive(Default)]
struct State {
    members: HashMap<MemberId, Member>,
    codes: HashMap<String, MemberId>,
    cappings: HashMap<MemberId, CappingRecord>,
    commissions: Vec<Commission>,
    sales: Vec<Sale>,
    journal: Option<Journal>,
}

fn not_open(tx: TxId) -> StoreError {
    StoreError::Transaction(format!("transaction {} is not open", tx))
}

impl State {
    fn check_open(&self, tx: TxId) -> StoreResult<()> {
        match &self.journal {
            Some(j) if j.tx == tx => Ok(()),
            _ => Err(not_open(tx)),
        }
    }

    fn member(&self, id: &MemberId) -> StoreResult<&Member> {
        self.members
            .get(id)
            .ok_or_else(|| StoreError::not_found("member", id))
    }

    fn record(&mut self, undo: Undo) {
        if let Some(journal) = self.journal.as_mut() {
            journal.undo.push(undo);
        }
    }

    /// Mutate one member, journaling its previous value.
    fn modify_member<R>(
        &mut self,
        id: &MemberId,
        f: impl FnOnce(&mut Member) -> StoreResult<R>,
    ) -> StoreResult<R> {
        let before = self.member(id)?.clone();
        let member = self
            .members
            .get_mut(id)
            .ok_or_else(|| StoreError::not_found("member", id))?;
        let out = f(member)?;
        self.record(Undo::Member(id.clone(), Some(before)));
        Ok(out)
    }

    fn capping_for(&mut self, member: &MemberId, date: NaiveDate) -> &mut CappingRecord {
        let before = self.cappings.get(member).cloned();
        let changed = match self.cappings.get_mut(member) {
            Some(rec) => rec.roll_to(date),
            None => {
                self.cappings
                    .insert(member.clone(), CappingRecord::new(member.clone(), date));
                true
            }
        };
        if changed {
            self.record(Undo::Capping(member.clone(), before));
        }
        // present: inserted above if it was missing
        self.cappings
            .entry(member.clone())
            .or_insert_with(|| CappingRecord::new(member.clone(), date))
    }

    fn undo(&mut self, entry: Undo) {
        match entry {
            Undo::Member(id, Some(m)) => {
                self.members.insert(id, m);
            }
            Undo::Member(id, None) => {
                self.members.remove(&id);
            }
            Undo::Code(code) => {
                self.codes.remove(&code);
            }
            Undo::Capping(id, Some(rec)) => {
                self.cappings.insert(id, rec);
            }
            Undo::Capping(id, None) => {
                self.cappings.remove(&id);
            }
            Undo::Commission(id) => self.commissions.retain(|c| c.id() != id),
            Undo::Sale(id) => self.sales.retain(|s| s.id != id),
        }
    }
}

/// Write access for one operation. Holds the gate for autocommit writes.
struct WriteAccess<'a> {
    state: RwLockWriteGuard<'a, State>,
    _autocommit: Option<MutexGuard<'a, ()>>,
}

pub struct MemoryStore {
    state: RwLock<State>,
    gate: Arc<Mutex<()>>,
    transactional: bool,
    next_tx: AtomicU64,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// A store with transaction support.
    pub fn new() -> Self {
        Self {
            state: RwLock::new(State::default()),
            gate: Arc::new(Mutex::new(())),
            transactional: true,
            next_tx: AtomicU64::new(1),
        }
    }

    /// A store that reports no transaction support, so callers fall back to
    /// the process lock.
    pub fn without_transactions() -> Self {
        Self {
            transactional: false,
            ..Self::new()
        }
    }

    pub fn from_snapshot(snapshot: StoreSnapshot, transactional: bool) -> Self {
        let mut state = State::default();
        for m in snapshot.members {
            state.codes.insert(m.code.clone(), m.id.clone());
            state.members.insert(m.id.clone(), m);
        }
        for rec in snapshot.cappings {
            state.cappings.insert(rec.member_id.clone(), rec);
        }
        state.commissions = snapshot.commissions;
        state.sales = snapshot.sales;

        let store = if transactional {
            Self::new()
        } else {
            Self::without_transactions()
        };
        Self {
            state: RwLock::new(state),
            ..store
        }
    }

    /// Dump all committed state.
    pub async fn snapshot(&self) -> StoreSnapshot {
        let state = self.committed().await;
        let mut members: Vec<Member> = state.members.values().cloned().collect();
        members.sort_by(|a, b| a.joined_at.cmp(&b.joined_at).then(a.id.cmp(&b.id)));
        let mut cappings: Vec<CappingRecord> = state.cappings.values().cloned().collect();
        cappings.sort_by(|a, b| a.member_id.cmp(&b.member_id));
        StoreSnapshot {
            members,
            cappings,
            commissions: state.commissions.clone(),
            sales: state.sales.clone(),
        }
    }

    pub async fn member_count(&self) -> usize {
        self.committed().await.members.len()
    }

    /// Every committed commission, in insertion order.
    pub async fn all_commissions(&self) -> Vec<Commission> {
        self.committed().await.commissions.clone()
    }

    fn state_read(&self) -> RwLockReadGuard<'_, State> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn state_write(&self) -> RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Read access once no transaction is open.
    async fn committed(&self) -> RwLockReadGuard<'_, State> {
        let _gate = if self.transactional {
            Some(self.gate.lock().await)
        } else {
            None
        };
        self.state_read()
    }

    async fn read(&self, ctx: &RequestContext) -> StoreResult<RwLockReadGuard<'_, State>> {
        ctx.check()?;
        match ctx.transaction() {
            Some(tx) => {
                let state = self.state_read();
                state.check_open(tx)?;
                Ok(state)
            }
            None if self.transactional => {
                let _gate = ctx.guard(self.gate.lock()).await?;
                Ok(self.state_read())
            }
            None => Ok(self.state_read()),
        }
    }

    async fn write(&self, ctx: &RequestContext) -> StoreResult<WriteAccess<'_>> {
        ctx.check()?;
        match ctx.transaction() {
            Some(tx) => {
                let state = self.state_write();
                state.check_open(tx)?;
                Ok(WriteAccess {
                    state,
                    _autocommit: None,
                })
            }
            None if self.transactional => {
                let gate = ctx.guard(self.gate.lock()).await?;
                Ok(WriteAccess {
                    state: self.state_write(),
                    _autocommit: Some(gate),
                })
            }
            None => Ok(WriteAccess {
                state: self.state_write(),
                _autocommit: None,
            }),
        }
    }

    /// Undo every write of `tx`, newest first, and release the gate.
    fn unwind(&self, tx: TxId) -> StoreResult<usize> {
        let mut state = self.state_write();
        match state.journal.take() {
            Some(mut j) if j.tx == tx => {
                let undone = j.undo.len();
                while let Some(entry) = j.undo.pop() {
                    state.undo(entry);
                }
                Ok(undone)
            }
            other => {
                state.journal = other;
                Err(not_open(tx))
            }
        }
    }
}

#[async_trait]
impl MemberStore for MemoryStore {
    async fn get(&self, ctx: &RequestContext, id: &MemberId) -> StoreResult<Member> {
        self.read(ctx).await?.member(id).cloned()
    }

    async fn get_by_code(&self, ctx: &RequestContext, code: &str) -> StoreResult<Member> {
        let state = self.read(ctx).await?;
        let id = state
            .codes
            .get(code)
            .ok_or_else(|| StoreError::not_found("member code", code))?;
        state.member(id).cloned()
    }

    async fn insert(&self, ctx: &RequestContext, member: Member) -> StoreResult<()> {
        let mut access = self.write(ctx).await?;
        let state = &mut access.state;
        if state.members.contains_key(&member.id) {
            return Err(StoreError::duplicate("member", &member.id));
        }
        if state.codes.contains_key(&member.code) {
            return Err(StoreError::duplicate("member code", &member.code));
        }
        state.codes.insert(member.code.clone(), member.id.clone());
        state.record(Undo::Code(member.code.clone()));
        state.record(Undo::Member(member.id.clone(), None));
        state.members.insert(member.id.clone(), member);
        Ok(())
    }

    async fn update_child_slot(
        &self,
        ctx: &RequestContext,
        parent: &MemberId,
        side: Side,
        child: &MemberId,
    ) -> StoreResult<()> {
        let mut access = self.write(ctx).await?;
        access.state.member(child)?;
        access.state.modify_member(parent, |p| {
            let slot = p.child_mut(side);
            if let Some(existing) = slot.as_ref() {
                return Err(StoreError::Conflict(format!(
                    "{} slot of {} already holds {}",
                    side, parent, existing
                )));
            }
            *slot = Some(child.clone());
            Ok(())
        })
    }

    async fn update_volumes(
        &self,
        ctx: &RequestContext,
        id: &MemberId,
        left: Decimal,
        right: Decimal,
    ) -> StoreResult<()> {
        let mut access = self.write(ctx).await?;
        access.state.modify_member(id, |m| {
            m.network_volume_left = left.max(Decimal::ZERO);
            m.network_volume_right = right.max(Decimal::ZERO);
            Ok(())
        })
    }

    async fn add_volume(
        &self,
        ctx: &RequestContext,
        id: &MemberId,
        side: Side,
        amount: Decimal,
    ) -> StoreResult<Member> {
        let mut access = self.write(ctx).await?;
        access.state.modify_member(id, |m| {
            *m.volume_mut(side) += amount;
            Ok(m.clone())
        })
    }

    async fn deduct_volumes(
        &self,
        ctx: &RequestContext,
        id: &MemberId,
        left: Decimal,
        right: Decimal,
    ) -> StoreResult<Member> {
        let mut access = self.write(ctx).await?;
        access.state.modify_member(id, |m| {
            m.network_volume_left = (m.network_volume_left - left).max(Decimal::ZERO);
            m.network_volume_right = (m.network_volume_right - right).max(Decimal::ZERO);
            Ok(m.clone())
        })
    }

    async fn credit_earnings(
        &self,
        ctx: &RequestContext,
        id: &MemberId,
        amount: Decimal,
    ) -> StoreResult<()> {
        let mut access = self.write(ctx).await?;
        access.state.modify_member(id, |m| {
            m.total_earnings += amount;
            m.balance += amount;
            Ok(())
        })
    }

    async fn add_cycles(
        &self,
        ctx: &RequestContext,
        id: &MemberId,
        cycles: u32,
    ) -> StoreResult<()> {
        let mut access = self.write(ctx).await?;
        access.state.modify_member(id, |m| {
            m.cycle_count = m.cycle_count.saturating_add(cycles);
            Ok(())
        })
    }
}

#[async_trait]
impl CappingLedger for MemoryStore {
    async fn get_or_create_for_date(
        &self,
        ctx: &RequestContext,
        member: &MemberId,
        date: NaiveDate,
    ) -> StoreResult<CappingRecord> {
        {
            let state = self.read(ctx).await?;
            if let Some(rec) = state.cappings.get(member) {
                if rec.date >= date && rec.week_start >= week_start(date) {
                    return Ok(rec.clone());
                }
            }
        }
        let mut access = self.write(ctx).await?;
        Ok(access.state.capping_for(member, date).clone())
    }

    async fn increment_cycles(
        &self,
        ctx: &RequestContext,
        member: &MemberId,
        date: NaiveDate,
        cycles: u32,
    ) -> StoreResult<CappingRecord> {
        let mut access = self.write(ctx).await?;
        let state = &mut access.state;
        let before = state.cappings.get(member).cloned();
        let rec = state.capping_for(member, date);
        rec.add_cycles(cycles);
        let updated = rec.clone();
        state.record(Undo::Capping(member.clone(), before));
        Ok(updated)
    }
}

#[async_trait]
impl CommissionStore for MemoryStore {
    async fn insert(&self, ctx: &RequestContext, commission: Commission) -> StoreResult<()> {
        let mut access = self.write(ctx).await?;
        let state = &mut access.state;
        if state.commissions.iter().any(|c| c.id() == commission.id()) {
            return Err(StoreError::duplicate("commission", commission.id()));
        }
        state.record(Undo::Commission(commission.id()));
        state.commissions.push(commission);
        Ok(())
    }

    async fn list_for_member(
        &self,
        ctx: &RequestContext,
        member: &MemberId,
    ) -> StoreResult<Vec<Commission>> {
        let state = self.read(ctx).await?;
        Ok(state
            .commissions
            .iter()
            .filter(|c| c.beneficiary() == member)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl SalesLedger for MemoryStore {
    async fn record_sale(&self, ctx: &RequestContext, sale: Sale) -> StoreResult<()> {
        let mut access = self.write(ctx).await?;
        let state = &mut access.state;
        state.member(&sale.member_id)?;
        state.record(Undo::Sale(sale.id));
        state.sales.push(sale);
        Ok(())
    }
}

#[async_trait]
impl ActivityOracle for MemoryStore {
    async fn has_any_sale(&self, ctx: &RequestContext, member: &MemberId) -> StoreResult<bool> {
        let state = self.read(ctx).await?;
        Ok(state.sales.iter().any(|s| &s.member_id == member))
    }
}

#[async_trait]
impl TransactionalStore for MemoryStore {
    fn supports_transactions(&self) -> bool {
        self.transactional
    }

    async fn begin(&self, ctx: &RequestContext) -> StoreResult<TxId> {
        if !self.transactional {
            return Err(StoreError::Transaction(
                "store has no transaction support".to_string(),
            ));
        }
        ctx.check()?;
        let gate = ctx.guard(self.gate.clone().lock_owned()).await?;
        let tx = self.next_tx.fetch_add(1, Ordering::Relaxed);
        self.state_write().journal = Some(Journal {
            tx,
            undo: Vec::new(),
            _gate: gate,
        });
        Ok(tx)
    }

    async fn commit(&self, ctx: &RequestContext, tx: TxId) -> StoreResult<()> {
        ctx.check()?;
        let mut state = self.state_write();
        state.check_open(tx)?;
        if let Some(j) = state.journal.take() {
            debug!("commit tx {} ({} writes)", tx, j.undo.len());
        }
        Ok(())
    }

    async fn rollback(&self, _ctx: &RequestContext, tx: TxId) -> StoreResult<()> {
        let undone = self.unwind(tx)?;
        warn!("rolled back tx {} ({} writes undone)", tx, undone);
        Ok(())
    }

    fn abandon(&self, tx: TxId) {
        if let Ok(undone) = self.unwind(tx) {
            warn!("abandoned tx {} ({} writes undone)", tx, undone);
        }
    }
}
