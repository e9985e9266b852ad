use crate::core::commission::{BinaryMatchResult, Commission, CommissionKind};
use crate::core::config::{round_cents, PlacementConfig};
use crate::core::context::RequestContext;
use crate::core::error::{EngineError, EngineResult, StoreResult};
use crate::core::member::{Member, MemberId};
use crate::store::{AtomicExecutor, Stores};
use log::info;
use rust_decimal::Decimal;
use uuid::Uuid;

/// Threshold-crossing match paid while volume propagates.
///
/// Independent of the cycle engine: no qualification and no caps. Once both
/// legs reach the threshold it pays `min(left, right) × rate`, consumes the
/// matched volume on both legs and counts one cycle.
pub struct BinaryMatchTrigger {
    stores: Stores,
    executor: AtomicExecutor,
    config: PlacementConfig,
}

impl BinaryMatchTrigger {
    pub fn new(stores: Stores, config: PlacementConfig) -> Self {
        let executor = stores.executor();
        Self {
            stores,
            executor,
            config,
        }
    }

    pub fn should_trigger(&self, member: &Member) -> bool {
        member.network_volume_left >= self.config.binary_threshold
            && member.network_volume_right >= self.config.binary_threshold
    }

    /// Run the match for `id` if both legs are at or above the threshold.
    pub async fn trigger(&self, ctx: &RequestContext, id: &MemberId) -> EngineResult<BinaryMatchResult> {
        let member = self
            .stores
            .members
            .get(ctx, id)
            .await
            .map_err(|e| EngineError::from_lookup(e, id))?;
        if !self.should_trigger(&member) {
            return Ok(self.no_match(id));
        }

        let member_id = id.clone();
        let paid = self
            .executor
            .run(ctx, move |tx_ctx| async move {
                self.settle(&tx_ctx, &member_id).await
            })
            .await
            .map_err(|source| EngineError::PayoutAborted {
                member: id.clone(),
                source,
            })?;

        let Some((amount, matched, commission_id)) = paid else {
            return Ok(self.no_match(id));
        };
        info!("binary match for {}: {} on {} matched volume", id, amount, matched);
        Ok(BinaryMatchResult {
            member_id: id.clone(),
            commissions_created: 1,
            amount,
            matched_volume: matched,
            message: format!("binary match paid {}", amount),
            commission_id: Some(commission_id),
        })
    }

    fn no_match(&self, id: &MemberId) -> BinaryMatchResult {
        BinaryMatchResult {
            member_id: id.clone(),
            commissions_created: 0,
            amount: Decimal::ZERO,
            matched_volume: Decimal::ZERO,
            message: format!(
                "both legs must reach {} before a binary match",
                self.config.binary_threshold
            ),
            commission_id: None,
        }
    }

    async fn settle(
        &self,
        ctx: &RequestContext,
        id: &MemberId,
    ) -> StoreResult<Option<(Decimal, Decimal, Uuid)>> {
        let members = &self.stores.members;
        let member = members.get(ctx, id).await?;
        // a concurrent match may have consumed the volume already
        if !self.should_trigger(&member) {
            return Ok(None);
        }

        let matched = member
            .network_volume_left
            .min(member.network_volume_right);
        let amount = round_cents(matched * self.config.match_rate);
        let commission = Commission::binary(
            id.clone(),
            amount,
            CommissionKind::BinaryMatch,
            1,
            ctx.now(),
        );
        let commission_id = commission.id();
        self.stores.commissions.insert(ctx, commission).await?;
        members.credit_earnings(ctx, id, amount).await?;
        members.add_cycles(ctx, id, 1).await?;
        members.deduct_volumes(ctx, id, matched, matched).await?;
        Ok(Some((amount, matched, commission_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{CommissionStore, MemberStore, MemoryStore};
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    async fn with_member(left: Decimal, right: Decimal) -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        let m = Member::new(MemberId::new("m"), "40000000", "M").with_volumes(left, right);
        MemberStore::insert(store.as_ref(), &RequestContext::background(), m)
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_match_consumes_weaker_leg() {
        let store = with_member(dec!(150), dec!(120)).await;
        let trigger = BinaryMatchTrigger::new(Stores::from_memory(store.clone()), PlacementConfig::default());
        let ctx = RequestContext::background();
        let id = MemberId::new("m");

        let r = trigger.trigger(&ctx, &id).await.unwrap();
        assert_eq!(r.commissions_created, 1);
        assert_eq!(r.amount, dec!(12));
        assert_eq!(r.matched_volume, dec!(120));

        let m = store.get(&ctx, &id).await.unwrap();
        assert_eq!(m.network_volume_left, dec!(30));
        assert_eq!(m.network_volume_right, dec!(0));
        assert_eq!(m.cycle_count, 1);
        assert_eq!(m.balance, dec!(12));

        let paid = store.list_for_member(&ctx, &id).await.unwrap();
        assert_eq!(paid[0].kind(), CommissionKind::BinaryMatch);
    }

    #[tokio::test]
    async fn test_below_threshold_pays_nothing() {
        let store = with_member(dec!(150), dec!(99.99)).await;
        let trigger = BinaryMatchTrigger::new(Stores::from_memory(store.clone()), PlacementConfig::default());
        let r = trigger
            .trigger(&RequestContext::background(), &MemberId::new("m"))
            .await
            .unwrap();
        assert_eq!(r.commissions_created, 0);
        assert!(store.all_commissions().await.is_empty());
    }

    #[tokio::test]
    async fn test_second_trigger_finds_volume_consumed() {
        let store = with_member(dec!(100), dec!(100)).await;
        let trigger = BinaryMatchTrigger::new(Stores::from_memory(store.clone()), PlacementConfig::default());
        let ctx = RequestContext::background();
        let id = MemberId::new("m");
        assert_eq!(trigger.trigger(&ctx, &id).await.unwrap().amount, dec!(10));
        assert_eq!(trigger.trigger(&ctx, &id).await.unwrap().commissions_created, 0);
        assert_eq!(store.all_commissions().await.len(), 1);
    }
}
