//! # binary-engine
//!
//! Compensation engine for a binary multi-level plan.
//!
//! Each member occupies one node of a strict two-child tree, accrues volume
//! from downline sales on a left and a right leg, and is paid in "cycles" of
//! matched volume, subject to qualification and daily/weekly caps.
//!
//! ## Architecture
//!
//! - **core**: Members, commissions, capping records, configuration, errors, request context
//! - **store**: Collaborator traits, the in-memory store, and the atomic executor
//! - **tree**: Breadth-first traversal and cached tree snapshots
//! - **engine**: Placement, volume propagation, the cycle engine and the binary-match trigger
//! - **simulation**: Random network generation

pub mod core;
pub mod engine;
pub mod simulation;
pub mod store;
pub mod tree;

/// Convenience re-exports for common usage.
pub mod prelude {
    pub use crate::core::commission::{BinaryCommissionResult, Commission, CommissionKind};
    pub use crate::core::config::{BinaryConfig, EngineConfig, PlacementConfig, TreeConfig};
    pub use crate::core::context::RequestContext;
    pub use crate::core::error::{EngineError, EngineResult, StoreError, StoreResult};
    pub use crate::core::member::{Member, MemberId, NewMember, Side};
    pub use crate::engine::{
        BinaryCommissionEngine, BinaryMatchTrigger, CompensationPlan, PlacementEngine,
    };
    pub use crate::store::{AtomicExecutor, MemoryStore, Stores};
    pub use crate::tree::{ClientTree, TreeSnapshotService};
}
