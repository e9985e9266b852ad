use crate::core::member::MemberId;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Which payout path produced a commission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CommissionKind {
    /// Qualified, capped cycle payout.
    BinaryCycle,
    /// Threshold-crossing match paid during volume propagation.
    BinaryMatch,
}

impl CommissionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            CommissionKind::BinaryCycle => "binary-cycle",
            CommissionKind::BinaryMatch => "binary-match",
        }
    }
}

impl fmt::Display for CommissionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An immutable payout record.
///
/// Binary payouts are self-sourced: `beneficiary == source`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Commission {
    id: Uuid,
    beneficiary: MemberId,
    source: MemberId,
    amount: Decimal,
    kind: CommissionKind,
    /// Cycles (or matches) this payout covers.
    cycles: u32,
    created_at: DateTime<Utc>,
}

impl Commission {
    /// # Panics
    ///
    /// Panics if `amount` is negative.
    pub fn new(
        beneficiary: MemberId,
        source: MemberId,
        amount: Decimal,
        kind: CommissionKind,
        cycles: u32,
        created_at: DateTime<Utc>,
    ) -> Self {
        assert!(
            amount >= Decimal::ZERO,
            "Commission amount must be non-negative, got {}",
            amount
        );
        Self {
            id: Uuid::new_v4(),
            beneficiary,
            source,
            amount,
            kind,
            cycles,
            created_at,
        }
    }

    /// Self-sourced binary payout.
    pub fn binary(
        member: MemberId,
        amount: Decimal,
        kind: CommissionKind,
        cycles: u32,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self::new(member.clone(), member, amount, kind, cycles, created_at)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn beneficiary(&self) -> &MemberId {
        &self.beneficiary
    }

    pub fn source(&self) -> &MemberId {
        &self.source
    }

    pub fn amount(&self) -> Decimal {
        self.amount
    }

    pub fn kind(&self) -> CommissionKind {
        self.kind
    }

    pub fn cycles(&self) -> u32 {
        self.cycles
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

/// Left/right volume and active-member counts of one member, computed per request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinaryLegs {
    pub left_volume: Decimal,
    pub right_volume: Decimal,
    pub left_actives: u32,
    pub right_actives: u32,
}

impl BinaryLegs {
    pub fn has_actives_on_both_sides(&self) -> bool {
        self.left_actives > 0 && self.right_actives > 0
    }

    /// The weaker leg's volume.
    pub fn weak_volume(&self) -> Decimal {
        self.left_volume.min(self.right_volume)
    }
}

/// Whether a member has an active direct child on each side.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinaryQualification {
    pub is_qualified: bool,
    pub has_direct_left: bool,
    pub has_direct_right: bool,
}

/// Result of one run of the cycle engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BinaryCommissionResult {
    pub success: bool,
    pub qualified: bool,
    /// Cycles the volumes allow before any cap.
    pub cycles_available: u32,
    /// Cycles actually paid.
    pub cycles_paid: u32,
    pub amount: Decimal,
    pub left_volume_remaining: Decimal,
    pub right_volume_remaining: Decimal,
    /// Why nothing (or less) was paid.
    pub reason: Option<String>,
    pub commission_id: Option<Uuid>,
}

impl BinaryCommissionResult {
    /// A successful run that paid nothing.
    pub fn unpaid(qualified: bool, legs: &BinaryLegs, reason: impl Into<String>) -> Self {
        Self {
            success: true,
            qualified,
            cycles_available: 0,
            cycles_paid: 0,
            amount: Decimal::ZERO,
            left_volume_remaining: legs.left_volume,
            right_volume_remaining: legs.right_volume,
            reason: Some(reason.into()),
            commission_id: None,
        }
    }

    pub fn with_cycles_available(mut self, cycles: u32) -> Self {
        self.cycles_available = cycles;
        self
    }

    pub fn paid(&self) -> bool {
        self.cycles_paid > 0
    }
}

impl fmt::Display for BinaryCommissionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Binary Commission ===")?;
        writeln!(f, "Qualified:        {}", self.qualified)?;
        writeln!(f, "Cycles available: {}", self.cycles_available)?;
        writeln!(f, "Cycles paid:      {}", self.cycles_paid)?;
        writeln!(f, "Amount:           {}", self.amount)?;
        writeln!(f, "Left remaining:   {}", self.left_volume_remaining)?;
        writeln!(f, "Right remaining:  {}", self.right_volume_remaining)?;
        if let Some(reason) = &self.reason {
            writeln!(f, "Reason:           {}", reason)?;
        }
        if let Some(id) = self.commission_id {
            writeln!(f, "Commission:       {}", id)?;
        }
        Ok(())
    }
}

/// Result of the threshold-crossing binary-match trigger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BinaryMatchResult {
    pub member_id: MemberId,
    pub commissions_created: u32,
    pub amount: Decimal,
    /// Volume consumed from each leg.
    pub matched_volume: Decimal,
    pub message: String,
    pub commission_id: Option<Uuid>,
}
