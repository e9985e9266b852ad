//! Read side of the tree: breadth-first walks and cached dashboard snapshots.

pub mod cache;
pub mod snapshot;
pub mod traversal;

pub use cache::{MemoryTreeCache, TreeCache};
pub use snapshot::{ClientTree, TreeNode, TreeSnapshotService};
pub use traversal::{ActivityCache, TreeReader};
