//! The binary cycle engine.
//!
//! Pipeline: load, qualify, read legs, count cycles, pre-check the caps, then
//! settle atomically. Every shortfall before settlement is a successful result
//! with a `reason`; only a missing member, a store failure or a failed
//! settlement is an error.

use crate::core::capping::{CapDecision, CapWindow};
use crate::core::commission::{
    BinaryCommissionResult, BinaryLegs, BinaryQualification, Commission, CommissionKind,
};
use crate::core::config::BinaryConfig;
use crate::core::context::RequestContext;
use crate::core::error::{EngineError, EngineResult, StoreResult};
use crate::core::member::{MemberId, Side};
use crate::store::{AtomicExecutor, Discipline, Stores};
use crate::tree::traversal::{ActivityCache, TreeReader};
use log::{debug, info};
use rust_decimal::Decimal;
use uuid::Uuid;

const NOT_QUALIFIED: &str =
    "not qualified: needs an active direct member on both the left and the right leg";

/// What the atomic section did.
enum Settlement {
    Skipped {
        limited_by: Option<CapWindow>,
    },
    Paid {
        cycles: u32,
        amount: Decimal,
        commission_id: Uuid,
        left_remaining: Decimal,
        right_remaining: Decimal,
        limited_by: Option<CapWindow>,
    },
}

fn cap_reason(window: Option<CapWindow>) -> String {
    match window {
        Some(w) => format!("{} cycle limit reached", w),
        None => "no cycles left to pay".to_string(),
    }
}

pub struct BinaryCommissionEngine {
    stores: Stores,
    executor: AtomicExecutor,
    config: BinaryConfig,
}

impl BinaryCommissionEngine {
    /// The atomic discipline is picked from the store's capability.
    pub fn new(stores: Stores, config: BinaryConfig) -> Self {
        let executor = stores.executor();
        Self {
            stores,
            executor,
            config,
        }
    }

    pub fn config(&self) -> &BinaryConfig {
        &self.config
    }

    pub fn discipline(&self) -> Discipline {
        self.executor.discipline()
    }

    fn reader(&self) -> TreeReader<'_> {
        TreeReader::new(self.stores.members.as_ref(), self.stores.activity.as_ref())
    }

    pub async fn qualification(
        &self,
        ctx: &RequestContext,
        id: &MemberId,
    ) -> EngineResult<BinaryQualification> {
        let member = self
            .stores
            .members
            .get(ctx, id)
            .await
            .map_err(|e| EngineError::from_lookup(e, id))?;
        let mut activity = ActivityCache::new();
        Ok(self
            .reader()
            .qualification(ctx, &mut activity, &member, &self.config)
            .await?)
    }

    /// Current volumes and unbounded active counts.
    pub async fn legs(&self, ctx: &RequestContext, id: &MemberId) -> EngineResult<BinaryLegs> {
        let member = self
            .stores
            .members
            .get(ctx, id)
            .await
            .map_err(|e| EngineError::from_lookup(e, id))?;
        let mut activity = ActivityCache::new();
        Ok(self.reader().legs(ctx, &mut activity, &member, None).await?)
    }

    /// Qualify, count and pay the member's binary cycles.
    pub async fn compute_binary_commission(
        &self,
        ctx: &RequestContext,
        id: &MemberId,
    ) -> EngineResult<BinaryCommissionResult> {
        let member = self
            .stores
            .members
            .get(ctx, id)
            .await
            .map_err(|e| EngineError::from_lookup(e, id))?;

        let reader = self.reader();
        let mut activity = ActivityCache::new();

        let qualification = reader
            .qualification(ctx, &mut activity, &member, &self.config)
            .await?;
        if !qualification.is_qualified {
            let volumes = BinaryLegs {
                left_volume: member.network_volume_left,
                right_volume: member.network_volume_right,
                ..Default::default()
            };
            debug!("{} not qualified", id);
            return Ok(BinaryCommissionResult::unpaid(false, &volumes, NOT_QUALIFIED));
        }

        let legs = reader.legs(ctx, &mut activity, &member, None).await?;
        for (side, actives) in [(Side::Left, legs.left_actives), (Side::Right, legs.right_actives)] {
            if actives == 0 {
                return Ok(BinaryCommissionResult::unpaid(
                    true,
                    &legs,
                    format!("empty leg: no active member on the {} leg", side),
                ));
            }
        }

        let cycles_available = self.config.cycles_for(legs.left_volume, legs.right_volume);
        if cycles_available == 0 {
            let reason = if legs.left_volume <= Decimal::ZERO {
                "empty leg: no volume on the left leg".to_string()
            } else if legs.right_volume <= Decimal::ZERO {
                "empty leg: no volume on the right leg".to_string()
            } else {
                format!(
                    "insufficient volume: weaker leg has {}, one cycle needs {}",
                    legs.weak_volume(),
                    self.config.effective_min_volume()
                )
            };
            return Ok(BinaryCommissionResult::unpaid(true, &legs, reason));
        }

        // read-only pre-check; the increment happens inside the atomic section
        let pre = self.cap_decision(ctx, id, cycles_available).await?;
        if pre.granted == 0 {
            debug!("{} capped before settlement: {}", id, cap_reason(pre.limited_by));
            return Ok(
                BinaryCommissionResult::unpaid(true, &legs, cap_reason(pre.limited_by))
                    .with_cycles_available(cycles_available),
            );
        }

        let member_id = id.clone();
        let settled = self
            .executor
            .run(ctx, move |tx_ctx| async move {
                self.settle(&tx_ctx, &member_id, cycles_available).await
            })
            .await
            .map_err(|source| EngineError::PayoutAborted {
                member: id.clone(),
                source,
            })?;

        match settled {
            Settlement::Skipped { limited_by } => Ok(BinaryCommissionResult::unpaid(
                true,
                &legs,
                cap_reason(limited_by),
            )
            .with_cycles_available(cycles_available)),
            Settlement::Paid {
                cycles,
                amount,
                commission_id,
                left_remaining,
                right_remaining,
                limited_by,
            } => {
                info!(
                    "paid {} binary cycles ({}) to {} via {}",
                    cycles,
                    amount,
                    id,
                    self.discipline()
                );
                Ok(BinaryCommissionResult {
                    success: true,
                    qualified: true,
                    cycles_available,
                    cycles_paid: cycles,
                    amount,
                    left_volume_remaining: left_remaining,
                    right_volume_remaining: right_remaining,
                    reason: limited_by.map(|w| {
                        format!(
                            "{} cycle limit reached: paid {} of {} cycles",
                            w, cycles, cycles_available
                        )
                    }),
                    commission_id: Some(commission_id),
                })
            }
        }
    }

    async fn cap_decision(
        &self,
        ctx: &RequestContext,
        id: &MemberId,
        available: u32,
    ) -> StoreResult<CapDecision> {
        if !self.config.has_caps() {
            return Ok(CapDecision {
                granted: available,
                limited_by: None,
            });
        }
        let record = self
            .stores
            .capping
            .get_or_create_for_date(ctx, id, ctx.today())
            .await?;
        Ok(record.grantable(
            available,
            self.config.daily_cycle_limit,
            self.config.weekly_cycle_limit,
        ))
    }

    /// The critical section: re-check, record, deduct, credit.
    async fn settle(
        &self,
        ctx: &RequestContext,
        id: &MemberId,
        cycles_available: u32,
    ) -> StoreResult<Settlement> {
        let members = &self.stores.members;
        let member = members.get(ctx, id).await?;

        // volumes may have been consumed since the legs were read
        let available = cycles_available.min(
            self.config
                .cycles_for(member.network_volume_left, member.network_volume_right),
        );
        let decision = self.cap_decision(ctx, id, available).await?;
        if decision.granted == 0 {
            return Ok(Settlement::Skipped {
                limited_by: decision.limited_by,
            });
        }
        let cycles = decision.granted;

        if self.config.has_caps() {
            self.stores
                .capping
                .increment_cycles(ctx, id, ctx.today(), cycles)
                .await?;
        }

        let volume_used = Decimal::from(cycles) * self.config.effective_min_volume();
        let amount = self.config.cycle_payout(cycles);
        let commission = Commission::binary(
            id.clone(),
            amount,
            CommissionKind::BinaryCycle,
            cycles,
            ctx.now(),
        );
        let commission_id = commission.id();
        self.stores.commissions.insert(ctx, commission).await?;

        let after = members
            .deduct_volumes(ctx, id, volume_used, volume_used)
            .await?;
        members.credit_earnings(ctx, id, amount).await?;
        members.add_cycles(ctx, id, cycles).await?;

        Ok(Settlement::Paid {
            cycles,
            amount,
            commission_id,
            left_remaining: after.network_volume_left,
            right_remaining: after.network_volume_right,
            limited_by: decision.limited_by,
        })
    }
}
