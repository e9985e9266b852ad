//! Write side: placement, volume propagation and the two payout paths.

pub mod binary_match;
pub mod commission;
pub mod placement;

pub use binary_match::BinaryMatchTrigger;
pub use commission::BinaryCommissionEngine;
pub use placement::{parse_position, Placement, PlacementEngine, Propagation};

use crate::core::config::EngineConfig;
use crate::store::Stores;
use crate::tree::cache::{MemoryTreeCache, TreeCache};
use crate::tree::snapshot::TreeSnapshotService;
use std::sync::Arc;

/// Every engine wired to one collaborator set and one configuration.
pub struct CompensationPlan {
    pub placement: PlacementEngine,
    pub commission: BinaryCommissionEngine,
    pub tree: TreeSnapshotService,
}

impl CompensationPlan {
    pub fn new(stores: Stores, config: EngineConfig) -> Self {
        Self::with_cache(stores, config, Arc::new(MemoryTreeCache::new()))
    }

    pub fn with_cache(stores: Stores, config: EngineConfig, cache: Arc<dyn TreeCache>) -> Self {
        let tree = TreeSnapshotService::new(
            stores.members.clone(),
            stores.activity.clone(),
            cache,
            config.binary.clone(),
            config.tree.clone(),
        );
        Self {
            placement: PlacementEngine::new(stores.clone(), config.placement),
            commission: BinaryCommissionEngine::new(stores, config.binary),
            tree,
        }
    }
}
