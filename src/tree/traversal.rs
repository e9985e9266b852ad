//! Breadth-first walks over the persisted tree.
//!
//! Every walk uses an explicit queue plus a visited set and checks the request
//! context once per step. Transient store failures degrade the walk (the
//! branch counts as inactive) instead of failing it; cancellation and deadline
//! always abort.

use crate::core::commission::{BinaryLegs, BinaryQualification};
use crate::core::config::BinaryConfig;
use crate::core::context::RequestContext;
use crate::core::error::{StoreError, StoreResult};
use crate::core::member::{Member, MemberId, Side};
use crate::store::{ActivityOracle, MemberStore};
use log::warn;
use std::collections::{HashMap, HashSet, VecDeque};

/// Per-request memo of activity lookups.
#[derive(Debug, Default)]
pub struct ActivityCache {
    known: HashMap<MemberId, bool>,
}

impl ActivityCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.known.len()
    }

    pub fn is_empty(&self) -> bool {
        self.known.is_empty()
    }

    /// Whether `id` has any sale. A failed lookup reads as inactive and is
    /// not memoized.
    pub async fn is_active(
        &mut self,
        ctx: &RequestContext,
        oracle: &dyn ActivityOracle,
        id: &MemberId,
    ) -> StoreResult<bool> {
        if let Some(active) = self.known.get(id) {
            return Ok(*active);
        }
        match oracle.has_any_sale(ctx, id).await {
            Ok(active) => {
                self.known.insert(id.clone(), active);
                Ok(active)
            }
            Err(e) if e.is_interruption() => Err(e),
            Err(e) => {
                warn!("activity lookup for {} failed, counting inactive: {}", id, e);
                Ok(false)
            }
        }
    }
}

/// Read-only view over the two collaborators every walk needs.
#[derive(Clone, Copy)]
pub struct TreeReader<'a> {
    pub members: &'a dyn MemberStore,
    pub activity: &'a dyn ActivityOracle,
}

impl<'a> TreeReader<'a> {
    pub fn new(members: &'a dyn MemberStore, activity: &'a dyn ActivityOracle) -> Self {
        Self { members, activity }
    }

    /// Fetch a member for a degradable walk: `None` when the lookup failed
    /// for a reason other than an interruption.
    async fn fetch_lenient(
        &self,
        ctx: &RequestContext,
        id: &MemberId,
    ) -> StoreResult<Option<Member>> {
        match self.members.get(ctx, id).await {
            Ok(m) => Ok(Some(m)),
            Err(e) if e.is_interruption() => Err(e),
            Err(e) => {
                warn!("skipping branch at {}: {}", id, e);
                Ok(None)
            }
        }
    }

    /// Active members in the subtree rooted at `start`.
    ///
    /// `start` sits one level below its parent; with `max_depth = Some(d)`
    /// only nodes at most `d` levels below the parent are counted.
    pub async fn count_actives(
        &self,
        ctx: &RequestContext,
        cache: &mut ActivityCache,
        start: &MemberId,
        max_depth: Option<u32>,
    ) -> StoreResult<u32> {
        if max_depth == Some(0) {
            return Ok(0);
        }

        let mut count = 0;
        let mut visited: HashSet<MemberId> = HashSet::new();
        let mut queue: VecDeque<(MemberId, u32)> = VecDeque::new();
        queue.push_back((start.clone(), 1));

        while let Some((id, depth)) = queue.pop_front() {
            ctx.check()?;
            if !visited.insert(id.clone()) {
                continue;
            }
            let Some(member) = self.fetch_lenient(ctx, &id).await? else {
                continue;
            };
            if cache.is_active(ctx, self.activity, &id).await? {
                count += 1;
            }
            if max_depth.map_or(true, |d| depth < d) {
                for (_, child) in member.children() {
                    queue.push_back((child.clone(), depth + 1));
                }
            }
        }
        Ok(count)
    }

    /// Volumes from the member record, active counts from the subtrees.
    pub async fn legs(
        &self,
        ctx: &RequestContext,
        cache: &mut ActivityCache,
        member: &Member,
        max_depth: Option<u32>,
    ) -> StoreResult<BinaryLegs> {
        let mut actives = [0u32; 2];
        for (i, side) in Side::BOTH.into_iter().enumerate() {
            if let Some(child) = member.child(side) {
                actives[i] = self.count_actives(ctx, cache, child, max_depth).await?;
            }
        }
        Ok(BinaryLegs {
            left_volume: member.network_volume_left,
            right_volume: member.network_volume_right,
            left_actives: actives[0],
            right_actives: actives[1],
        })
    }

    /// Active direct child on each side, judged against the configured
    /// requirements.
    pub async fn qualification(
        &self,
        ctx: &RequestContext,
        cache: &mut ActivityCache,
        member: &Member,
        config: &BinaryConfig,
    ) -> StoreResult<BinaryQualification> {
        let mut direct = [false; 2];
        for (i, side) in Side::BOTH.into_iter().enumerate() {
            let Some(child) = member.child(side) else {
                continue;
            };
            // a dangling pointer is not an active direct
            if self.fetch_lenient(ctx, child).await?.is_some() {
                direct[i] = cache.is_active(ctx, self.activity, child).await?;
            }
        }
        let [has_direct_left, has_direct_right] = direct;
        Ok(BinaryQualification {
            is_qualified: (has_direct_left || !config.require_direct_left)
                && (has_direct_right || !config.require_direct_right),
            has_direct_left,
            has_direct_right,
        })
    }

    /// First member under `sponsor` (inclusive), breadth-first, with an open
    /// slot; left is preferred at every node.
    pub async fn find_open_slot(
        &self,
        ctx: &RequestContext,
        sponsor: Member,
    ) -> StoreResult<(Member, Side)> {
        let mut visited: HashSet<MemberId> = HashSet::new();
        let mut queue: VecDeque<Member> = VecDeque::new();
        let origin = sponsor.id.clone();
        queue.push_back(sponsor);

        while let Some(member) = queue.pop_front() {
            ctx.check()?;
            if !visited.insert(member.id.clone()) {
                continue;
            }
            if let Some(side) = member.open_side() {
                return Ok((member, side));
            }
            for (_, child) in member.children() {
                match self.members.get(ctx, child).await {
                    Ok(m) => queue.push_back(m),
                    Err(e) if e.is_not_found() => {
                        warn!("{} points at missing child {}", member.id, child);
                    }
                    Err(e) => return Err(e),
                }
            }
        }
        Err(StoreError::Conflict(format!(
            "no open slot reachable under {}",
            origin
        )))
    }

    /// Ancestors of `member`, nearest first, each with the side the walk
    /// arrived on. Stops at the root or at a cycle.
    pub async fn ancestors(
        &self,
        ctx: &RequestContext,
        member: &Member,
    ) -> StoreResult<Vec<(MemberId, Side)>> {
        let mut chain = Vec::new();
        let mut visited: HashSet<MemberId> = HashSet::new();
        visited.insert(member.id.clone());

        let mut link = member.sponsor_id.clone().zip(member.position);
        while let Some((parent, side)) = link {
            ctx.check()?;
            if !visited.insert(parent.clone()) {
                warn!("sponsor cycle detected at {}", parent);
                break;
            }
            let p = self.members.get(ctx, &parent).await?;
            link = p.sponsor_id.clone().zip(p.position);
            chain.push((parent, side));
        }
        Ok(chain)
    }
}
