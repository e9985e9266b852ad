//! Engine configuration.
//!
//! Loaded once at start-up and passed explicitly into each engine, so several
//! configurations can live side by side in one process.
//!
//! Environment keys (all optional):
//!
//! | Key | Effect | Default |
//! |---|---|---|
//! | `BINARY_CYCLE_VALUE` | payout per cycle in fixed-payout mode | 20.0 |
//! | `BINARY_DAILY_CYCLE_LIMIT` | max cycles per member per day (0 = unlimited) | 4 |
//! | `BINARY_WEEKLY_CYCLE_LIMIT` | max cycles per member per week (0 = unlimited) | 0 |
//! | `BINARY_MIN_VOLUME_PER_LEG` | volume matched by one cycle | 1.0 |
//! | `BINARY_COMMISSION_RATE` | fraction of matched volume paid out | 0.1 |
//! | `BINARY_FIXED_CYCLE_PAYOUT` | pay `cycles × cycle value` instead of the rate | false |
//! | `BINARY_REQUIRE_DIRECT_LEFT` | qualification needs an active left direct | true |
//! | `BINARY_REQUIRE_DIRECT_RIGHT` | qualification needs an active right direct | true |
//! | `BINARY_THRESHOLD` | both-legs threshold for the binary-match trigger | 100.0 |
//! | `DEFAULT_PRODUCT_PRICE` | volume credited for an enrollment | 50.0 |
//! | `TREE_CACHE_TTL_SECS` | tree snapshot cache lifetime | 300 |
//! | `TREE_DERIVED_DEPTH` | snapshot levels that get derived leg stats | 3 |

use crate::core::error::EngineError;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Rules of the cycle engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BinaryConfig {
    /// Amount paid per cycle when `fixed_cycle_payout` is set.
    pub cycle_value: Decimal,
    /// 0 = unlimited.
    pub daily_cycle_limit: u32,
    /// 0 = unlimited.
    pub weekly_cycle_limit: u32,
    /// Volume one cycle consumes on each leg. Non-positive means 1.
    pub min_volume_per_leg: Decimal,
    pub commission_rate: Decimal,
    pub fixed_cycle_payout: bool,
    pub require_direct_left: bool,
    pub require_direct_right: bool,
}

impl Default for BinaryConfig {
    fn default() -> Self {
        Self {
            cycle_value: dec!(20.0),
            daily_cycle_limit: 4,
            weekly_cycle_limit: 0,
            min_volume_per_leg: dec!(1.0),
            commission_rate: dec!(0.1),
            fixed_cycle_payout: false,
            require_direct_left: true,
            require_direct_right: true,
        }
    }
}

impl BinaryConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            cycle_value: env_parse("BINARY_CYCLE_VALUE").unwrap_or(d.cycle_value),
            daily_cycle_limit: env_parse("BINARY_DAILY_CYCLE_LIMIT").unwrap_or(d.daily_cycle_limit),
            weekly_cycle_limit: env_parse("BINARY_WEEKLY_CYCLE_LIMIT")
                .unwrap_or(d.weekly_cycle_limit),
            min_volume_per_leg: env_parse("BINARY_MIN_VOLUME_PER_LEG")
                .unwrap_or(d.min_volume_per_leg),
            commission_rate: env_parse("BINARY_COMMISSION_RATE").unwrap_or(d.commission_rate),
            fixed_cycle_payout: env_flag("BINARY_FIXED_CYCLE_PAYOUT").unwrap_or(d.fixed_cycle_payout),
            require_direct_left: env_flag("BINARY_REQUIRE_DIRECT_LEFT")
                .unwrap_or(d.require_direct_left),
            require_direct_right: env_flag("BINARY_REQUIRE_DIRECT_RIGHT")
                .unwrap_or(d.require_direct_right),
        }
    }

    /// The cycle divisor actually used.
    pub fn effective_min_volume(&self) -> Decimal {
        if self.min_volume_per_leg <= Decimal::ZERO {
            Decimal::ONE
        } else {
            self.min_volume_per_leg
        }
    }

    /// `floor(min(left, right) / min volume per leg)`.
    pub fn cycles_for(&self, left: Decimal, right: Decimal) -> u32 {
        let weak = left.min(right);
        if weak <= Decimal::ZERO {
            return 0;
        }
        weak.checked_div(self.effective_min_volume())
            .and_then(|q| q.floor().to_u32())
            .unwrap_or(u32::MAX)
    }

    pub fn has_caps(&self) -> bool {
        self.daily_cycle_limit > 0 || self.weekly_cycle_limit > 0
    }

    /// Payout for `cycles` paid cycles, rounded to cents.
    pub fn cycle_payout(&self, cycles: u32) -> Decimal {
        let raw = if self.fixed_cycle_payout {
            Decimal::from(cycles) * self.cycle_value
        } else {
            Decimal::from(cycles) * self.effective_min_volume() * self.commission_rate
        };
        round_cents(raw)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.commission_rate < Decimal::ZERO {
            return Err(EngineError::InvalidConfig(format!(
                "commission rate must be non-negative, got {}",
                self.commission_rate
            )));
        }
        if self.cycle_value < Decimal::ZERO {
            return Err(EngineError::InvalidConfig(format!(
                "cycle value must be non-negative, got {}",
                self.cycle_value
            )));
        }
        Ok(())
    }
}

/// Rules of enrollment placement and the binary-match trigger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlacementConfig {
    /// Both legs must reach this volume before a binary match pays.
    pub binary_threshold: Decimal,
    /// Rate applied to the matched volume by the binary-match trigger.
    pub match_rate: Decimal,
    /// Volume of the implicit first sale credited on enrollment.
    pub default_sale_price: Decimal,
}

impl Default for PlacementConfig {
    fn default() -> Self {
        Self {
            binary_threshold: dec!(100.0),
            match_rate: dec!(0.1),
            default_sale_price: dec!(50.0),
        }
    }
}

impl PlacementConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            binary_threshold: env_parse("BINARY_THRESHOLD").unwrap_or(d.binary_threshold),
            match_rate: env_parse("BINARY_COMMISSION_RATE").unwrap_or(d.match_rate),
            default_sale_price: env_parse("DEFAULT_PRODUCT_PRICE").unwrap_or(d.default_sale_price),
        }
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.binary_threshold <= Decimal::ZERO {
            return Err(EngineError::InvalidConfig(format!(
                "binary threshold must be positive, got {}",
                self.binary_threshold
            )));
        }
        if self.match_rate < Decimal::ZERO || self.default_sale_price < Decimal::ZERO {
            return Err(EngineError::InvalidConfig(
                "match rate and default sale price must be non-negative".to_string(),
            ));
        }
        Ok(())
    }
}

/// Tree snapshot settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TreeConfig {
    pub cache_ttl_secs: u64,
    /// Levels from the root that receive leg statistics. A node at level `l`
    /// counts actives up to `derived_depth - l` levels below it, children = 1.
    pub derived_depth: u32,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: 300,
            derived_depth: 3,
        }
    }
}

impl TreeConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            cache_ttl_secs: env_parse("TREE_CACHE_TTL_SECS").unwrap_or(d.cache_ttl_secs),
            derived_depth: env_parse("TREE_DERIVED_DEPTH").unwrap_or(d.derived_depth),
        }
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

/// Full process configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub binary: BinaryConfig,
    pub placement: PlacementConfig,
    pub tree: TreeConfig,
}

impl EngineConfig {
    pub fn from_env() -> Self {
        Self {
            binary: BinaryConfig::from_env(),
            placement: PlacementConfig::from_env(),
            tree: TreeConfig::from_env(),
        }
    }

    /// Parse a JSON document; missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, EngineError> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| EngineError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        self.binary.validate()?;
        self.placement.validate()
    }
}

/// Round to two decimals, halves away from zero.
pub fn round_cents(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

fn env_flag(key: &str) -> Option<bool> {
    env::var(key)
        .ok()
        .map(|s| matches!(s.trim().to_lowercase().as_str(), "1" | "true" | "yes"))
}
