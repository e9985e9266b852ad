//! Random network generation for benchmarks, demos and the CLI.
//!
//! Networks are grown through the placement engine, so every generated tree
//! satisfies the placement rules and carries real propagated volume.

use crate::core::context::RequestContext;
use crate::core::error::{EngineError, EngineResult};
use crate::core::member::{MemberId, NewMember};
use crate::engine::placement::PlacementEngine;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;

/// Shape of a generated network.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Members enrolled below the root.
    pub member_count: usize,
    /// Chance that a member records one sale after joining.
    pub sale_probability: f64,
    /// Sale amounts, whole units, inclusive.
    pub min_sale: u32,
    pub max_sale: u32,
    /// Fixed seed for reproducible trees.
    pub seed: Option<u64>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            member_count: 30,
            sale_probability: 0.6,
            min_sale: 20,
            max_sale: 200,
            seed: None,
        }
    }
}

impl NetworkConfig {
    pub fn validate(&self) -> EngineResult<()> {
        if !(0.0..=1.0).contains(&self.sale_probability) {
            return Err(EngineError::InvalidConfig(format!(
                "sale probability must be within [0, 1], got {}",
                self.sale_probability
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct GeneratedNetwork {
    pub root: MemberId,
    /// Every member, root first, in enrollment order.
    pub members: Vec<MemberId>,
    pub sales: usize,
    pub binary_matches: usize,
}

/// Grow a random tree: each member is sponsored by a random existing member
/// and spills into the first open slot under it.
pub async fn generate_network(
    ctx: &RequestContext,
    engine: &PlacementEngine,
    config: &NetworkConfig,
) -> EngineResult<GeneratedNetwork> {
    config.validate()?;
    let mut rng = match config.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    let root = engine
        .place(ctx, NewMember::named("Root"), None, None)
        .await?
        .member
        .id;
    let mut members = vec![root.clone()];
    let mut sales = 0;
    let mut binary_matches = 0;

    for i in 0..config.member_count {
        let sponsor = members[rng.gen_range(0..members.len())].clone();
        let placed = engine
            .place(
                ctx,
                NewMember::named(format!("Member {:04}", i + 1)),
                Some(&sponsor),
                None,
            )
            .await?;
        binary_matches += placed.propagation.matches.len();
        let id = placed.member.id;

        if rng.gen_bool(config.sale_probability) {
            let lo = config.min_sale.min(config.max_sale).max(1);
            let hi = config.max_sale.max(lo);
            let amount = Decimal::from(rng.gen_range(lo..=hi));
            let prop = engine.record_sale(ctx, &id, amount).await?;
            binary_matches += prop.matches.len();
            sales += 1;
        }
        members.push(id);
    }

    Ok(GeneratedNetwork {
        root,
        members,
        sales,
        binary_matches,
    })
}
