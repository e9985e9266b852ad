use crate::core::commission::BinaryMatchResult;
use crate::core::config::PlacementConfig;
use crate::core::context::RequestContext;
use crate::core::error::{EngineError, EngineResult, StoreError};
use crate::core::member::{generate_member_code, Member, MemberId, NewMember, Sale, Side};
use crate::engine::binary_match::BinaryMatchTrigger;
use crate::store::Stores;
use crate::tree::traversal::TreeReader;
use log::{debug, error, info, warn};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashSet;

/// Attempts at drawing an unused member code.
pub const CODE_ATTEMPTS: usize = 10;

/// Parse a caller-supplied position.
pub fn parse_position(raw: &str) -> EngineResult<Side> {
    raw.parse()
        .map_err(|_| EngineError::InvalidPosition(raw.to_string()))
}

/// Volume credited up the ancestor chain, and what it triggered.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Propagation {
    /// Ancestors credited, nearest first, with the leg that received the volume.
    pub credited: Vec<(MemberId, Side)>,
    pub matches: Vec<BinaryMatchResult>,
}

/// Outcome of placing one member.
#[derive(Debug, Clone, Serialize)]
pub struct Placement {
    pub member: Member,
    pub parent: Option<MemberId>,
    pub side: Option<Side>,
    /// False when the parent's child slot could not be linked.
    pub linked: bool,
    pub propagation: Propagation,
}

/// Places members in the tree and pushes sale volume upward.
pub struct PlacementEngine {
    stores: Stores,
    matcher: BinaryMatchTrigger,
    config: PlacementConfig,
}

impl PlacementEngine {
    pub fn new(stores: Stores, config: PlacementConfig) -> Self {
        let matcher = BinaryMatchTrigger::new(stores.clone(), config.clone());
        Self {
            stores,
            matcher,
            config,
        }
    }

    pub fn matcher(&self) -> &BinaryMatchTrigger {
        &self.matcher
    }

    /// Enroll `new` under `sponsor`.
    ///
    /// Without a sponsor the member becomes an unattached root. With an
    /// explicit `position` only the sponsor's own slot is considered;
    /// otherwise the first open slot below the sponsor is used, breadth-first
    /// and left first. Enrollment volume is then credited up the chain.
    pub async fn place(
        &self,
        ctx: &RequestContext,
        new: NewMember,
        sponsor: Option<&MemberId>,
        position: Option<Side>,
    ) -> EngineResult<Placement> {
        let Some(sponsor_id) = sponsor else {
            let member = self.create(ctx, new, None).await?;
            info!("enrolled {} ({}) as a root", member.id, member.code);
            return Ok(Placement {
                member,
                parent: None,
                side: None,
                linked: true,
                propagation: Propagation::default(),
            });
        };

        let sponsor = match self.stores.members.get(ctx, sponsor_id).await {
            Ok(m) => m,
            Err(e) if e.is_not_found() => return Err(EngineError::SponsorNotFound(sponsor_id.clone())),
            Err(e) => return Err(e.into()),
        };

        let (parent, side) = match position {
            Some(side) => {
                if sponsor.is_full() {
                    return Err(EngineError::SponsorFull(sponsor.id));
                }
                if sponsor.child(side).is_some() {
                    return Err(EngineError::PositionTaken {
                        sponsor: sponsor.id,
                        side,
                    });
                }
                (sponsor.id, side)
            }
            None => {
                let reader = TreeReader::new(self.stores.members.as_ref(), self.stores.activity.as_ref());
                match reader.find_open_slot(ctx, sponsor).await {
                    Ok((parent, side)) => (parent.id, side),
                    Err(StoreError::Conflict(_)) => {
                        return Err(EngineError::SponsorFull(sponsor_id.clone()))
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        };

        let member = self.create(ctx, new, Some((parent.clone(), side))).await?;

        if let Err(e) = self
            .stores
            .members
            .update_child_slot(ctx, &parent, side, &member.id)
            .await
        {
            error!(
                "{} created under {} ({}) but the slot link failed: {}",
                member.id, parent, side, e
            );
            return Ok(Placement {
                member,
                parent: Some(parent),
                side: Some(side),
                linked: false,
                propagation: Propagation::default(),
            });
        }
        info!("placed {} under {} on the {}", member.id, parent, side);

        let propagation = self
            .propagate(ctx, &member, self.config.default_sale_price)
            .await?;
        Ok(Placement {
            member,
            parent: Some(parent),
            side: Some(side),
            linked: true,
            propagation,
        })
    }

    /// Record a sale for `member` (making it active) and credit its volume up
    /// the chain.
    pub async fn record_sale(
        &self,
        ctx: &RequestContext,
        member: &MemberId,
        amount: Decimal,
    ) -> EngineResult<Propagation> {
        if amount <= Decimal::ZERO {
            return Err(EngineError::InvalidAmount(amount));
        }
        let seller = self
            .stores
            .members
            .get(ctx, member)
            .await
            .map_err(|e| EngineError::from_lookup(e, member))?;

        let mut sale = Sale::new(member.clone(), amount);
        sale.recorded_at = ctx.now();
        self.stores.sales.record_sale(ctx, sale).await?;
        debug!("sale of {} recorded for {}", amount, member);

        self.propagate(ctx, &seller, amount).await
    }

    /// Credit `amount` to every ancestor of `from` on the leg the walk
    /// arrives through, running the binary match where both legs cross the
    /// threshold.
    pub async fn propagate(
        &self,
        ctx: &RequestContext,
        from: &Member,
        amount: Decimal,
    ) -> EngineResult<Propagation> {
        let mut out = Propagation::default();
        let mut visited: HashSet<MemberId> = HashSet::new();
        visited.insert(from.id.clone());

        let mut link = from.sponsor_id.clone().zip(from.position);
        while let Some((ancestor, side)) = link.take() {
            ctx.check()?;
            if !visited.insert(ancestor.clone()) {
                warn!("sponsor cycle at {}; stopping propagation", ancestor);
                break;
            }

            let updated = match self
                .stores
                .members
                .add_volume(ctx, &ancestor, side, amount)
                .await
            {
                Ok(m) => m,
                Err(e) if e.is_interruption() => return Err(e.into()),
                Err(e) => {
                    error!("volume propagation stopped at {}: {}", ancestor, e);
                    break;
                }
            };
            out.credited.push((ancestor.clone(), side));

            if self.matcher.should_trigger(&updated) {
                match self.matcher.trigger(ctx, &ancestor).await {
                    Ok(m) if m.commissions_created > 0 => out.matches.push(m),
                    Ok(_) => {}
                    Err(EngineError::Store(e)) if e.is_interruption() => return Err(e.into()),
                    Err(e) => error!("binary match for {} failed: {}", ancestor, e),
                }
            }

            link = updated.sponsor_id.clone().zip(updated.position);
        }
        Ok(out)
    }

    async fn create(
        &self,
        ctx: &RequestContext,
        new: NewMember,
        slot: Option<(MemberId, Side)>,
    ) -> EngineResult<Member> {
        let code = self.unique_code(ctx).await?;
        let id = new.id.unwrap_or_else(MemberId::generate);
        let mut member = Member::new(id, code, new.name);
        member.joined_at = ctx.now();
        if let Some((parent, side)) = slot {
            member = member.placed_under(parent, side);
        }
        self.stores.members.insert(ctx, member.clone()).await?;
        Ok(member)
    }

    async fn unique_code(&self, ctx: &RequestContext) -> EngineResult<String> {
        for _ in 0..CODE_ATTEMPTS {
            let code = generate_member_code();
            match self.stores.members.get_by_code(ctx, &code).await {
                Err(e) if e.is_not_found() => return Ok(code),
                Err(e) => return Err(e.into()),
                Ok(_) => debug!("member code {} already taken", code),
            }
        }
        Err(EngineError::CodeSpaceExhausted(CODE_ATTEMPTS))
    }
}
