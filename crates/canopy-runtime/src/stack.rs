//! The graph-structured parse stack.
//!
//! GLR parsing keeps several parse trajectories alive at once. Each
//! trajectory is a *version*: a head index into a DAG of stack nodes.
//! Nodes carry a parse state, an absolute position, and an accumulated
//! error cost; links between nodes carry the tree that was pushed and
//! point at the predecessor node. Forked versions share their common
//! prefix; versions that reconverge on the same state and position are
//! merged by adding links to one shared head node.
//!
//! Nodes live in an arena and are reference counted: heads hold one
//! reference to their node, links hold one reference to their
//! predecessor and one to their tree. Popping reveals predecessor
//! chains as [`StackSlice`]s, each carrying the removed trees in
//! bottom-of-chain-first order.

use canopy_core::language::{ERROR_STATE, START_STATE, StateId, Symbol};
use canopy_core::length::Length;

use crate::error_costs::{
    ERROR_COST_PER_SKIPPED_CHAR, ERROR_COST_PER_SKIPPED_LINE, ERROR_COST_PER_SKIPPED_TREE,
};
use crate::pool::{TreeId, TreePool};
use crate::tree;

/// Index of a live stack version (head).
pub type StackVersion = usize;

/// Index of a node in the stack's arena.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
struct NodeIdx(u32);

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
struct StackLink {
    node: NodeIdx,
    /// `None` is a discontinuity marker pushed by error recovery.
    tree: Option<TreeId>,
    /// A shifted reused subtree still subject to breakdown.
    is_pending: bool,
}

#[derive(Debug)]
struct StackNode {
    state: StateId,
    position: Length,
    links: Vec<StackLink>,
    ref_count: u32,
    /// Error cost accumulated along the path this node was pushed on.
    error_cost: u32,
    /// Chain length; the basis for per-version push counts.
    node_count: u32,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum StackStatus {
    Active,
    Halted,
}

#[derive(Debug)]
struct StackHead {
    node: NodeIdx,
    status: StackStatus,
    last_external_token: Option<TreeId>,
    summary: Option<Vec<StackSummaryEntry>>,
    node_count_at_last_error: u32,
}

/// One predecessor chain revealed by a pop.
#[derive(Debug)]
pub struct StackSlice {
    pub version: StackVersion,
    /// Popped trees, bottom of chain first (source order).
    pub trees: Vec<TreeId>,
}

/// A snapshot entry recorded for error recovery: a state reachable by
/// popping `depth` links from the head.
#[derive(Clone, Copy, Debug)]
pub struct StackSummaryEntry {
    pub position: Length,
    pub depth: u32,
    pub state: StateId,
}

/// What an [`Stack::iterate`] callback wants done at the current step.
#[derive(Clone, Copy, Default, Debug)]
pub struct IterateAction {
    /// Emit the current frontier as a slice.
    pub pop: bool,
    /// Stop walking this chain.
    pub stop: bool,
}

/// The view an iterate callback gets of one walking iterator.
pub struct IterSnapshot<'a> {
    pub state: StateId,
    /// Trees collected so far, top of chain first.
    pub trees: &'a [TreeId],
    /// Countable links traversed so far. Extras ride along for free;
    /// tree-less discontinuities count as one slot, so recovery depths
    /// line up with the summary that recorded them.
    pub tree_count: u32,
    /// Whether every traversed link was pending.
    pub is_pending: bool,
    /// Whether the current node has no predecessors.
    pub is_done: bool,
}

#[derive(Clone)]
struct Iter {
    node: NodeIdx,
    trees: Vec<TreeId>,
    tree_count: u32,
    is_pending: bool,
}

/// The multi-headed parse stack.
pub struct Stack {
    nodes: Vec<StackNode>,
    free_nodes: Vec<NodeIdx>,
    heads: Vec<StackHead>,
    base: NodeIdx,
}

impl Stack {
    pub fn new() -> Self {
        let mut stack = Self {
            nodes: Vec::new(),
            free_nodes: Vec::new(),
            heads: Vec::new(),
            base: NodeIdx(0),
        };
        stack.init_base();
        stack
    }

    fn init_base(&mut self) {
        self.base = self.alloc_node(StackNode {
            state: START_STATE,
            position: Length::ZERO,
            links: Vec::new(),
            ref_count: 1,
            error_cost: 0,
            node_count: 1,
        });
        self.retain_node(self.base);
        self.heads.push(StackHead {
            node: self.base,
            status: StackStatus::Active,
            last_external_token: None,
            summary: None,
            node_count_at_last_error: 1,
        });
    }

    /// Remove every version and reset to a single empty head.
    pub fn clear(&mut self, pool: &mut TreePool) {
        while !self.heads.is_empty() {
            self.remove_version(pool, 0);
        }
        // Drop the stack's own base reference; the arena is empty after.
        self.release_node(pool, self.base);
        debug_assert!(self.free_nodes.len() == self.nodes.len());
        self.nodes.clear();
        self.free_nodes.clear();
        self.init_base();
    }

    fn alloc_node(&mut self, node: StackNode) -> NodeIdx {
        match self.free_nodes.pop() {
            Some(idx) => {
                self.nodes[idx.0 as usize] = node;
                idx
            }
            None => {
                self.nodes.push(node);
                NodeIdx(self.nodes.len() as u32 - 1)
            }
        }
    }

    fn node(&self, idx: NodeIdx) -> &StackNode {
        &self.nodes[idx.0 as usize]
    }

    fn retain_node(&mut self, idx: NodeIdx) {
        self.nodes[idx.0 as usize].ref_count += 1;
    }

    fn release_node(&mut self, pool: &mut TreePool, idx: NodeIdx) {
        let mut pending = vec![idx];
        while let Some(idx) = pending.pop() {
            let node = &mut self.nodes[idx.0 as usize];
            assert!(node.ref_count > 0, "stack node reference count underflow");
            node.ref_count -= 1;
            if node.ref_count == 0 {
                let links = std::mem::take(&mut node.links);
                for link in links {
                    if let Some(tree) = link.tree {
                        tree::release(pool, tree);
                    }
                    pending.push(link.node);
                }
                self.free_nodes.push(idx);
            }
        }
    }

    /// Add a link to `target`, deduplicating and merging mergeable
    /// predecessors. Consumes one reference to the link's node and tree.
    fn add_link(&mut self, pool: &mut TreePool, target: NodeIdx, link: StackLink) {
        let drop_link = |stack: &mut Self, pool: &mut TreePool, link: StackLink| {
            if let Some(tree) = link.tree {
                tree::release(pool, tree);
            }
            stack.release_node(pool, link.node);
        };

        if link.node == target {
            drop_link(self, pool, link);
            return;
        }

        for i in 0..self.node(target).links.len() {
            let existing = self.node(target).links[i];
            if existing.node == link.node {
                if existing.tree == link.tree {
                    drop_link(self, pool, link);
                    return;
                }
                // Same predecessor, different tree: a genuine local
                // ambiguity, kept as a parallel link below.
            } else if self.node(existing.node).state == self.node(link.node).state
                && self.node(existing.node).position.bytes == self.node(link.node).position.bytes
            {
                // Mergeable predecessors: fold the new one into the
                // existing one and drop the incoming link.
                let sub_links = self.node(link.node).links.clone();
                for sub in sub_links {
                    if let Some(tree) = sub.tree {
                        tree::retain(pool, tree);
                    }
                    self.retain_node(sub.node);
                    self.add_link(pool, existing.node, sub);
                }
                drop_link(self, pool, link);
                return;
            }
        }

        self.nodes[target.0 as usize].links.push(link);
    }

    pub fn version_count(&self) -> usize {
        self.heads.len()
    }

    pub fn top_state(&self, version: StackVersion) -> StateId {
        self.node(self.heads[version].node).state
    }

    pub fn top_position(&self, version: StackVersion) -> Length {
        self.node(self.heads[version].node).position
    }

    pub fn error_cost(&self, version: StackVersion) -> u32 {
        self.node(self.heads[version].node).error_cost
    }

    /// Nodes pushed since this version last entered the error state.
    pub fn push_count(&self, version: StackVersion) -> u32 {
        let head = &self.heads[version];
        self.node(head.node)
            .node_count
            .saturating_sub(head.node_count_at_last_error)
    }

    /// Discount pushes that were bookkeeping (stack breakdown), not
    /// parse progress.
    pub fn decrease_push_count(&mut self, version: StackVersion, count: u32) {
        self.heads[version].node_count_at_last_error += count;
    }

    pub fn last_external_token(&self, version: StackVersion) -> Option<TreeId> {
        self.heads[version].last_external_token
    }

    pub fn set_last_external_token(
        &mut self,
        pool: &mut TreePool,
        version: StackVersion,
        token: Option<TreeId>,
    ) {
        if let Some(token) = token {
            tree::retain(pool, token);
        }
        if let Some(old) = self.heads[version].last_external_token.take() {
            tree::release(pool, old);
        }
        self.heads[version].last_external_token = token;
    }

    /// Push a tree (or a `None` discontinuity) onto a version's head.
    /// Retains the tree; the caller keeps its own reference.
    pub fn push(
        &mut self,
        pool: &mut TreePool,
        version: StackVersion,
        tree: Option<TreeId>,
        is_pending: bool,
        state: StateId,
    ) {
        let previous = self.heads[version].node;
        let previous_node = self.node(previous);
        let mut position = previous_node.position;
        let mut error_cost = previous_node.error_cost;
        let node_count = previous_node.node_count + 1;

        if let Some(tree_id) = tree {
            tree::retain(pool, tree_id);
            let t = pool.get(tree_id);
            position = position + t.total_size();
            error_cost += t.error_cost;
            // A well-formed tree absorbed while in the error state is
            // skipped input; charge it like recovery will when it wraps
            // the run into an error node.
            if state == ERROR_STATE && t.symbol != Symbol::ERROR && !t.extra {
                let skipped = t.total_size();
                error_cost += ERROR_COST_PER_SKIPPED_TREE
                    + skipped.chars * ERROR_COST_PER_SKIPPED_CHAR
                    + skipped.extent.row * ERROR_COST_PER_SKIPPED_LINE;
            }
        }

        let node = self.alloc_node(StackNode {
            state,
            position,
            links: vec![StackLink {
                node: previous,
                tree,
                is_pending,
            }],
            ref_count: 1,
            error_cost,
            node_count,
        });
        // The head's reference to `previous` moves into the new link.
        self.heads[version].node = node;
        if state == ERROR_STATE {
            self.heads[version].node_count_at_last_error = node_count;
        }
    }

    /// Walk backward from a version's head, forking at every merged
    /// link, letting `callback` decide where to emit slices and stop.
    ///
    /// Every distinct revealed node becomes a *fresh* version appended
    /// after the existing ones; the walked version's own head is left
    /// untouched. Slices that reveal the same node share one fresh
    /// version and are returned adjacent. The driver folds results
    /// back onto the original version with [`Stack::renumber_version`].
    pub fn iterate(
        &mut self,
        pool: &mut TreePool,
        version: StackVersion,
        callback: &mut dyn FnMut(&TreePool, IterSnapshot<'_>) -> IterateAction,
    ) -> Vec<StackSlice> {
        let original_head = self.heads[version].node;

        let mut iterators = vec![Iter {
            node: original_head,
            trees: Vec::new(),
            tree_count: 0,
            is_pending: true,
        }];
        let mut slices: Vec<StackSlice> = Vec::new();
        let mut assigned: Vec<(NodeIdx, StackVersion)> = Vec::new();

        while !iterators.is_empty() {
            let mut index = 0;
            while index < iterators.len() {
                let is_done = self.node(iterators[index].node).links.is_empty();
                let action = {
                    let it = &iterators[index];
                    let snapshot = IterSnapshot {
                        state: self.node(it.node).state,
                        trees: &it.trees,
                        tree_count: it.tree_count,
                        is_pending: it.is_pending,
                        is_done,
                    };
                    callback(pool, snapshot)
                };

                if action.pop {
                    let revealed = iterators[index].node;
                    let mut trees = iterators[index].trees.clone();
                    for &tree_id in &trees {
                        tree::retain(pool, tree_id);
                    }
                    trees.reverse();
                    let slice_version = match assigned
                        .iter()
                        .find(|(node, _)| *node == revealed)
                        .map(|(_, v)| *v)
                    {
                        Some(v) => v,
                        None => {
                            let v = self.add_version(pool, version, revealed);
                            assigned.push((revealed, v));
                            v
                        }
                    };
                    let at = slices
                        .iter()
                        .rposition(|slice| slice.version == slice_version)
                        .map_or(slices.len(), |p| p + 1);
                    slices.insert(
                        at,
                        StackSlice {
                            version: slice_version,
                            trees,
                        },
                    );
                }

                if action.stop || is_done {
                    let it = iterators.remove(index);
                    for tree_id in it.trees {
                        tree::release(pool, tree_id);
                    }
                    continue;
                }

                // Advance across the node's links, forking for all but
                // the first.
                let links = self.node(iterators[index].node).links.clone();
                let mut forks = Vec::new();
                for link in links.iter().skip(1) {
                    let mut fork = iterators[index].clone();
                    for &tree_id in &fork.trees {
                        tree::retain(pool, tree_id);
                    }
                    Self::apply_link(pool, &mut fork, link);
                    forks.push(fork);
                }
                Self::apply_link(pool, &mut iterators[index], &links[0]);
                iterators.extend(forks);
                index += 1;
            }
        }

        slices
    }

    /// Append a fresh version whose head stands on `node`, inheriting
    /// the source version's bookkeeping.
    fn add_version(
        &mut self,
        pool: &mut TreePool,
        source: StackVersion,
        node: NodeIdx,
    ) -> StackVersion {
        self.retain_node(node);
        let head = &self.heads[source];
        let token = head.last_external_token;
        let summary = head.summary.clone();
        let node_count_at_last_error = head.node_count_at_last_error;
        if let Some(token) = token {
            tree::retain(pool, token);
        }
        self.heads.push(StackHead {
            node,
            status: StackStatus::Active,
            last_external_token: token,
            summary,
            node_count_at_last_error,
        });
        self.heads.len() - 1
    }

    fn apply_link(pool: &mut TreePool, iter: &mut Iter, link: &StackLink) {
        match link.tree {
            Some(tree_id) => {
                tree::retain(pool, tree_id);
                let is_extra = pool.get(tree_id).extra;
                iter.trees.push(tree_id);
                if !is_extra {
                    iter.tree_count += 1;
                }
            }
            None => iter.tree_count += 1,
        }
        iter.is_pending &= link.is_pending;
        iter.node = link.node;
    }

    /// Remove `count` links from the head, revealing one slice per
    /// distinct predecessor chain.
    pub fn pop_count(
        &mut self,
        pool: &mut TreePool,
        version: StackVersion,
        count: u32,
    ) -> Vec<StackSlice> {
        self.iterate(pool, version, &mut |_, snapshot| {
            let done = snapshot.tree_count == count;
            IterateAction {
                pop: done,
                stop: done,
            }
        })
    }

    /// Pop everything, down to the empty state.
    pub fn pop_all(&mut self, pool: &mut TreePool, version: StackVersion) -> Vec<StackSlice> {
        self.iterate(pool, version, &mut |_, snapshot| IterateAction {
            pop: snapshot.is_done,
            stop: snapshot.is_done,
        })
    }

    /// Pop one link if it was pushed as pending (a reused subtree
    /// subject to breakdown).
    pub fn pop_pending(&mut self, pool: &mut TreePool, version: StackVersion) -> Vec<StackSlice> {
        self.iterate(pool, version, &mut |_, snapshot| {
            if snapshot.tree_count >= 1 {
                IterateAction {
                    pop: snapshot.is_pending,
                    stop: true,
                }
            } else {
                IterateAction::default()
            }
        })
    }

    /// Pop one link if its tree is an ERROR node (a previous recovery
    /// to merge with).
    pub fn pop_error(&mut self, pool: &mut TreePool, version: StackVersion) -> Vec<StackSlice> {
        let mut found = false;
        self.iterate(pool, version, &mut |pool, snapshot| {
            if !snapshot.trees.is_empty() {
                let is_error = !found
                    && snapshot.trees.len() == 1
                    && pool.get(snapshot.trees[0]).symbol == Symbol::ERROR;
                if is_error {
                    found = true;
                }
                IterateAction {
                    pop: is_error,
                    stop: true,
                }
            } else {
                IterateAction::default()
            }
        })
    }

    fn link_weight(&self, pool: &TreePool, link: &StackLink) -> u32 {
        match link.tree {
            Some(tree_id) if pool.get(tree_id).extra => 0,
            _ => 1,
        }
    }

    /// Countable links absorbed above the most recent error
    /// discontinuity, or zero if this version is not in an error.
    /// Everything in the run above the discontinuity sits in the error
    /// state, so the walk stops at the node whose link is the tree-less
    /// marker itself.
    pub fn depth_since_error(&self, pool: &TreePool, version: StackVersion) -> u32 {
        let mut node = self.heads[version].node;
        let mut depth = 0;
        loop {
            let n = self.node(node);
            if n.state != ERROR_STATE {
                return 0;
            }
            match n.links.first() {
                Some(link) if link.tree.is_none() => return depth,
                Some(link) => {
                    depth += self.link_weight(pool, link);
                    node = link.node;
                }
                None => return 0,
            }
        }
    }

    /// Snapshot up to `max_depth` (state, depth, position) entries
    /// walking backward from the head, for later recovery attempts.
    pub fn record_summary(&mut self, pool: &TreePool, version: StackVersion, max_depth: u32) {
        let mut summary = Vec::new();
        let mut node = self.heads[version].node;
        let mut depth = 0;
        loop {
            let n = self.node(node);
            summary.push(StackSummaryEntry {
                position: n.position,
                depth,
                state: n.state,
            });
            if depth >= max_depth {
                break;
            }
            match n.links.first() {
                Some(link) => {
                    depth += self.link_weight(pool, link);
                    node = link.node;
                }
                None => break,
            }
        }
        self.heads[version].summary = Some(summary);
    }

    pub fn get_summary(&self, version: StackVersion) -> Option<&[StackSummaryEntry]> {
        self.heads[version].summary.as_deref()
    }

    /// Whether two versions can be folded together: same top state,
    /// same position, equivalent external scanner context.
    pub fn can_merge(&self, pool: &TreePool, left: StackVersion, right: StackVersion) -> bool {
        let (a, b) = (&self.heads[left], &self.heads[right]);
        self.node(a.node).state == self.node(b.node).state
            && self.node(a.node).position.bytes == self.node(b.node).position.bytes
            && tree::external_token_state_eq(pool, a.last_external_token, b.last_external_token)
    }

    /// Merge `right` into `left` if mergeable; returns whether it did.
    pub fn merge(&mut self, pool: &mut TreePool, left: StackVersion, right: StackVersion) -> bool {
        if self.can_merge(pool, left, right) {
            self.force_merge(pool, left, right);
            true
        } else {
            false
        }
    }

    /// Fold `right` into `left` without checking mergeability.
    pub fn force_merge(&mut self, pool: &mut TreePool, left: StackVersion, right: StackVersion) {
        let target = self.heads[left].node;
        let links = self.node(self.heads[right].node).links.clone();
        for link in links {
            if let Some(tree_id) = link.tree {
                tree::retain(pool, tree_id);
            }
            self.retain_node(link.node);
            self.add_link(pool, target, link);
        }
        self.remove_version(pool, right);
    }

    pub fn halt(&mut self, version: StackVersion) {
        self.heads[version].status = StackStatus::Halted;
    }

    pub fn is_halted(&self, version: StackVersion) -> bool {
        self.heads[version].status == StackStatus::Halted
    }

    /// Move version `from` into slot `into`, discarding what was there.
    pub fn renumber_version(
        &mut self,
        pool: &mut TreePool,
        from: StackVersion,
        into: StackVersion,
    ) {
        if from == into {
            return;
        }
        debug_assert!(into < from);
        let head = self.heads.remove(from);
        let old = std::mem::replace(&mut self.heads[into], head);
        self.release_head(pool, old);
    }

    pub fn swap_versions(&mut self, left: StackVersion, right: StackVersion) {
        self.heads.swap(left, right);
    }

    /// Duplicate a version; returns the new index.
    pub fn copy_version(&mut self, pool: &mut TreePool, version: StackVersion) -> StackVersion {
        let head = &self.heads[version];
        let node = head.node;
        let token = head.last_external_token;
        let summary = head.summary.clone();
        let node_count_at_last_error = head.node_count_at_last_error;
        self.retain_node(node);
        if let Some(token) = token {
            tree::retain(pool, token);
        }
        self.heads.push(StackHead {
            node,
            status: StackStatus::Active,
            last_external_token: token,
            summary,
            node_count_at_last_error,
        });
        self.heads.len() - 1
    }

    /// Remove a version; higher versions shift down by one.
    pub fn remove_version(&mut self, pool: &mut TreePool, version: StackVersion) {
        let head = self.heads.remove(version);
        self.release_head(pool, head);
    }

    fn release_head(&mut self, pool: &mut TreePool, head: StackHead) {
        self.release_node(pool, head.node);
        if let Some(token) = head.last_external_token {
            tree::release(pool, token);
        }
    }
}

impl Default for Stack {
    fn default() -> Self {
        Self::new()
    }
}
