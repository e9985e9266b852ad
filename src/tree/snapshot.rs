use crate::core::config::{BinaryConfig, TreeConfig};
use crate::core::context::RequestContext;
use crate::core::error::{EngineError, EngineResult};
use crate::core::member::{Member, MemberId, Side};
use crate::store::{ActivityOracle, MemberStore};
use crate::tree::cache::TreeCache;
use crate::tree::traversal::{ActivityCache, TreeReader};
use chrono::{DateTime, Utc};
use log::{debug, info};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::sync::Arc;

/// One member of a snapshot, annotated for dashboards.
///
/// `left_actives`, `right_actives`, `is_qualified` and `cycles_available` are
/// only computed for the first levels below the root; deeper nodes carry
/// zero, false and `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeNode {
    pub id: MemberId,
    pub code: String,
    pub name: String,
    pub parent_id: Option<MemberId>,
    pub level: u32,
    pub position: Option<Side>,
    pub network_volume_left: Decimal,
    pub network_volume_right: Decimal,
    pub total_earnings: Decimal,
    pub balance: Decimal,
    pub cycle_count: u32,
    pub is_active: bool,
    pub left_actives: u32,
    pub right_actives: u32,
    pub is_qualified: bool,
    /// The smaller of the two active counts.
    pub cycles_available: Option<u32>,
}

impl TreeNode {
    /// Node without derived leg statistics.
    pub fn from_member(
        member: &Member,
        level: u32,
        parent_id: Option<MemberId>,
        is_active: bool,
    ) -> Self {
        Self {
            id: member.id.clone(),
            code: member.code.clone(),
            name: member.name.clone(),
            parent_id,
            level,
            position: member.position,
            network_volume_left: member.network_volume_left,
            network_volume_right: member.network_volume_right,
            total_earnings: member.total_earnings,
            balance: member.balance,
            cycle_count: member.cycle_count,
            is_active,
            left_actives: 0,
            right_actives: 0,
            is_qualified: false,
            cycles_available: None,
        }
    }
}

/// Denormalized view of the subtree under one root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientTree {
    pub root: TreeNode,
    /// Breadth-first, root first.
    pub nodes: Vec<TreeNode>,
    pub total_nodes: usize,
    /// Deepest level present; 0 when the root has no children.
    pub max_level: u32,
    pub generated_at: DateTime<Utc>,
}

impl ClientTree {
    pub fn node(&self, id: &MemberId) -> Option<&TreeNode> {
        self.nodes.iter().find(|n| &n.id == id)
    }

    pub fn level(&self, level: u32) -> impl Iterator<Item = &TreeNode> + '_ {
        self.nodes.iter().filter(move |n| n.level == level)
    }
}

impl fmt::Display for ClientTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Tree of {} ===", self.root.name)?;
        writeln!(f, "Nodes: {}   Depth: {}", self.total_nodes, self.max_level)?;
        for n in &self.nodes {
            let pad = "  ".repeat(n.level as usize);
            let side = n.position.map(|s| s.as_str()).unwrap_or("root");
            write!(
                f,
                "{}[{}] {} ({}) L={} R={}",
                pad, side, n.name, n.code, n.network_volume_left, n.network_volume_right
            )?;
            if n.is_active {
                write!(f, " active")?;
            }
            if let Some(c) = n.cycles_available {
                write!(
                    f,
                    " actives={}/{} qualified={} cycles={}",
                    n.left_actives, n.right_actives, n.is_qualified, c
                )?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

/// Builds and caches [`ClientTree`] snapshots.
pub struct TreeSnapshotService {
    members: Arc<dyn MemberStore>,
    activity: Arc<dyn ActivityOracle>,
    cache: Arc<dyn TreeCache>,
    binary: BinaryConfig,
    config: TreeConfig,
}

impl TreeSnapshotService {
    pub fn new(
        members: Arc<dyn MemberStore>,
        activity: Arc<dyn ActivityOracle>,
        cache: Arc<dyn TreeCache>,
        binary: BinaryConfig,
        config: TreeConfig,
    ) -> Self {
        Self {
            members,
            activity,
            cache,
            binary,
            config,
        }
    }

    /// Snapshot of the subtree under `root`, served from cache while fresh.
    pub async fn get_client_tree(
        &self,
        ctx: &RequestContext,
        root: &MemberId,
    ) -> EngineResult<Arc<ClientTree>> {
        if let Some(tree) = self.cache.get(root).await {
            return Ok(tree);
        }

        let tree = Arc::new(self.build(ctx, root).await?);
        self.cache
            .put(root, tree.clone(), self.config.cache_ttl())
            .await;
        info!(
            "built tree for {}: {} nodes, depth {}",
            root, tree.total_nodes, tree.max_level
        );
        Ok(tree)
    }

    /// Drop the cached snapshot for `root`.
    pub async fn invalidate_cache(&self, root: &MemberId) -> bool {
        self.cache.invalidate(root).await
    }

    /// Build without consulting or filling the cache.
    pub async fn build(&self, ctx: &RequestContext, root: &MemberId) -> EngineResult<ClientTree> {
        let reader = TreeReader::new(self.members.as_ref(), self.activity.as_ref());
        let root_member = self
            .members
            .get(ctx, root)
            .await
            .map_err(|e| EngineError::from_lookup(e, root))?;

        let mut activity = ActivityCache::new();
        let mut nodes = Vec::new();
        let mut max_level = 0;
        let mut visited: HashSet<MemberId> = HashSet::new();
        let mut queue: VecDeque<(Member, u32, Option<MemberId>)> = VecDeque::new();
        queue.push_back((root_member, 0, None));

        while let Some((member, level, parent)) = queue.pop_front() {
            ctx.check()?;
            if !visited.insert(member.id.clone()) {
                continue;
            }
            max_level = max_level.max(level);
            nodes.push(
                self.annotate(ctx, &reader, &mut activity, &member, level, parent)
                    .await?,
            );

            for (_, child) in member.children() {
                match self.members.get(ctx, child).await {
                    Ok(m) => queue.push_back((m, level + 1, Some(member.id.clone()))),
                    Err(e) if e.is_interruption() => return Err(e.into()),
                    Err(e) => debug!("tree {} skips child {}: {}", root, child, e),
                }
            }
        }
        debug!("tree {} used {} activity lookups", root, activity.len());

        let root_node = nodes[0].clone();
        Ok(ClientTree {
            root: root_node,
            total_nodes: nodes.len(),
            nodes,
            max_level,
            generated_at: ctx.now(),
        })
    }

    async fn annotate(
        &self,
        ctx: &RequestContext,
        reader: &TreeReader<'_>,
        activity: &mut ActivityCache,
        member: &Member,
        level: u32,
        parent: Option<MemberId>,
    ) -> EngineResult<TreeNode> {
        let is_active = activity.is_active(ctx, reader.activity, &member.id).await?;
        let mut node = TreeNode::from_member(member, level, parent, is_active);

        if level < self.config.derived_depth {
            let depth = self.config.derived_depth - level;
            let legs = reader.legs(ctx, activity, member, Some(depth)).await?;
            let q = reader
                .qualification(ctx, activity, member, &self.binary)
                .await?;
            node.left_actives = legs.left_actives;
            node.right_actives = legs.right_actives;
            node.is_qualified = q.is_qualified;
            node.cycles_available = Some(legs.left_actives.min(legs.right_actives));
        }
        Ok(node)
    }
}
