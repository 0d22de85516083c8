//! Reference-counted parse-tree nodes.
//!
//! Nodes live in the [`TreePool`] and reference each other by [`TreeId`];
//! ownership is expressed by explicit reference counts (`retain` /
//! `release`). Factories build the three node shapes (leaves, internal
//! nodes, error nodes), and `set_children` is the single place the
//! derived aggregates (child counts, extents, error cost, fragility,
//! first-leaf descriptor) are computed.
//!
//! Ownership conventions:
//! - functions taking `Vec<TreeId>` children consume one reference per
//!   child;
//! - factories return a node holding one reference for the caller;
//! - `make_copy` retains the children it shares with the original.

use canopy_core::language::{Language, LexMode, STATE_NONE, StateId, Symbol};
use canopy_core::length::Length;

use crate::error_costs::{
    ERROR_COST_PER_SKIPPED_CHAR, ERROR_COST_PER_SKIPPED_LINE, ERROR_COST_PER_SKIPPED_TREE,
};
use crate::pool::{TreeId, TreePool};

/// Where a node sits in the finished tree. Written only by
/// [`assign_parents`] after parsing completes.
#[derive(Clone, Copy, Debug, Default)]
pub struct TreeContext {
    pub parent: Option<TreeId>,
    /// Position in the parent's child array.
    pub index: u32,
    /// Absolute position of the node's padding start.
    pub offset: Length,
    pub alias_symbol: Option<Symbol>,
    pub alias_is_named: bool,
}

/// The first leaf of a subtree: its symbol and the lex mode that
/// produced it. Drives token-reuse checks.
#[derive(Clone, Copy, Debug)]
pub struct FirstLeaf {
    pub symbol: Symbol,
    pub lex_mode: LexMode,
}

impl Default for FirstLeaf {
    fn default() -> Self {
        Self {
            symbol: Symbol::END,
            lex_mode: LexMode::default(),
        }
    }
}

/// A parse-tree node: leaf, internal node, or error.
#[derive(Clone, Debug)]
pub struct Tree {
    pub symbol: Symbol,
    /// The state the node was produced in; `STATE_NONE` when fragile.
    pub parse_state: StateId,
    /// Whitespace (and skipped input) before the node.
    pub padding: Length,
    /// The node's own extent.
    pub size: Length,
    /// How far past its start the lexer looked to produce the first
    /// leaf; bounds reuse validity across edits.
    pub bytes_scanned: u32,
    pub error_cost: u32,
    pub dynamic_precedence: i32,
    pub alias_sequence_id: u16,
    pub children: Vec<TreeId>,
    pub visible_child_count: u32,
    pub named_child_count: u32,
    pub context: TreeContext,
    pub first_leaf: FirstLeaf,
    pub ref_count: u32,
    pub visible: bool,
    pub named: bool,
    pub extra: bool,
    pub fragile_left: bool,
    pub fragile_right: bool,
    pub has_changes: bool,
    pub has_external_tokens: bool,
    /// Serialized scanner state for leaves produced by the external
    /// scanner.
    pub external_scanner_state: Vec<u8>,
    /// The offending character, for error leaves.
    pub lookahead_char: Option<char>,
}

impl Default for Tree {
    fn default() -> Self {
        Self {
            symbol: Symbol::END,
            parse_state: 0,
            padding: Length::ZERO,
            size: Length::ZERO,
            bytes_scanned: 0,
            error_cost: 0,
            dynamic_precedence: 0,
            alias_sequence_id: 0,
            children: Vec::new(),
            visible_child_count: 0,
            named_child_count: 0,
            context: TreeContext::default(),
            first_leaf: FirstLeaf::default(),
            ref_count: 0,
            visible: false,
            named: false,
            extra: false,
            fragile_left: false,
            fragile_right: false,
            has_changes: false,
            has_external_tokens: false,
            external_scanner_state: Vec::new(),
            lookahead_char: None,
        }
    }
}

impl Tree {
    pub fn child_count(&self) -> u32 {
        self.children.len() as u32
    }

    pub fn total_bytes(&self) -> u32 {
        self.padding.bytes + self.size.bytes
    }

    pub fn total_size(&self) -> Length {
        self.padding + self.size
    }

    /// A fragile or empty node's parse state cannot be trusted for reuse.
    pub fn is_fragile(&self) -> bool {
        self.fragile_left || self.fragile_right || self.total_bytes() == 0
    }
}

/// Create a leaf for `symbol`, deriving its flags from the language.
pub fn make_leaf(
    pool: &mut TreePool,
    language: &Language,
    symbol: Symbol,
    padding: Length,
    size: Length,
) -> TreeId {
    let metadata = language.symbol_metadata(symbol);
    pool.allocate(Tree {
        symbol,
        padding,
        size,
        visible: metadata.visible,
        named: metadata.named,
        extra: metadata.extra,
        first_leaf: FirstLeaf {
            symbol,
            lex_mode: LexMode::default(),
        },
        ref_count: 1,
        ..Tree::default()
    })
}

/// Create an error leaf covering skipped input, carrying the character
/// that could not start a token.
pub fn make_error(
    pool: &mut TreePool,
    language: &Language,
    size: Length,
    padding: Length,
    first_error_char: Option<char>,
) -> TreeId {
    let id = make_leaf(pool, language, Symbol::ERROR, padding, size);
    let tree = pool.get_mut(id);
    tree.fragile_left = true;
    tree.fragile_right = true;
    tree.lookahead_char = first_error_char;
    tree.error_cost = ERROR_COST_PER_SKIPPED_CHAR * size.chars
        + ERROR_COST_PER_SKIPPED_LINE * size.extent.row;
    id
}

/// Create an internal node owning `children`.
pub fn make_node(
    pool: &mut TreePool,
    language: &Language,
    symbol: Symbol,
    children: Vec<TreeId>,
    alias_sequence_id: u16,
) -> TreeId {
    let metadata = language.symbol_metadata(symbol);
    let mut tree = Tree {
        symbol,
        alias_sequence_id,
        visible: metadata.visible,
        named: metadata.named,
        extra: metadata.extra,
        ref_count: 1,
        ..Tree::default()
    };
    set_children(&mut tree, children, pool);
    pool.allocate(tree)
}

/// Wrap a run of trees (possibly empty) in an ERROR parent.
pub fn make_error_node(
    pool: &mut TreePool,
    language: &Language,
    children: Vec<TreeId>,
) -> TreeId {
    let id = make_node(pool, language, Symbol::ERROR, children, 0);
    let tree = pool.get_mut(id);
    tree.fragile_left = true;
    tree.fragile_right = true;
    id
}

/// Shallow copy: shares (and retains) the children, clears parent
/// context, starts with a fresh reference count.
pub fn make_copy(pool: &mut TreePool, id: TreeId) -> TreeId {
    let mut tree = pool.get(id).clone();
    tree.ref_count = 1;
    tree.context = TreeContext::default();
    let children = tree.children.clone();
    for child in children {
        retain(pool, child);
    }
    pool.allocate(tree)
}

/// Recompute every derived attribute of `tree` from a new child list.
/// Consumes one reference per child.
pub fn set_children(tree: &mut Tree, children: Vec<TreeId>, pool: &TreePool) {
    tree.visible_child_count = 0;
    tree.named_child_count = 0;
    tree.has_external_tokens = false;
    tree.error_cost = 0;
    tree.dynamic_precedence = 0;

    let mut offset = Length::ZERO;
    let mut bytes_scanned = 0u32;
    let mut skipped_cost = 0u32;

    for (i, &child_id) in children.iter().enumerate() {
        let child = pool.get(child_id);

        if i == 0 {
            tree.padding = child.padding;
            tree.size = child.size;
            tree.fragile_left = child.fragile_left;
        } else {
            tree.size = tree.size + child.total_size();
        }
        if i == children.len() - 1 {
            tree.fragile_right = child.fragile_right;
        }

        bytes_scanned = bytes_scanned.max(offset.bytes + child.bytes_scanned);
        offset = offset + child.total_size();

        tree.error_cost += child.error_cost;
        tree.dynamic_precedence += child.dynamic_precedence;

        if child.visible {
            tree.visible_child_count += 1;
            if child.named {
                tree.named_child_count += 1;
            }
        } else if child.child_count() > 0 {
            tree.visible_child_count += child.visible_child_count;
            tree.named_child_count += child.named_child_count;
        }

        if child.has_external_tokens {
            tree.has_external_tokens = true;
        }
        if child.symbol != Symbol::ERROR && !child.extra {
            let skipped = child.total_size();
            skipped_cost += ERROR_COST_PER_SKIPPED_TREE
                + skipped.chars * ERROR_COST_PER_SKIPPED_CHAR
                + skipped.extent.row * ERROR_COST_PER_SKIPPED_LINE;
        }
    }
    tree.bytes_scanned = bytes_scanned;

    match children
        .iter()
        .find(|&&child| !pool.get(child).extra)
        .or(children.first())
    {
        Some(&first) => tree.first_leaf = pool.get(first).first_leaf,
        None => {
            tree.first_leaf = FirstLeaf {
                symbol: tree.symbol,
                lex_mode: LexMode::default(),
            }
        }
    }
    tree.children = children;

    // An ERROR parent pays for every well-formed tree it swallowed,
    // plus a flat per-recovery penalty; the same tariff the stack
    // charges while the run is being absorbed, so a version's cost is
    // comparable before and after the rollup.
    if tree.symbol == Symbol::ERROR {
        tree.error_cost += ERROR_COST_PER_SKIPPED_TREE + skipped_cost;
        tree.parse_state = STATE_NONE;
    }
}

pub fn retain(pool: &mut TreePool, id: TreeId) {
    let tree = pool.get_mut(id);
    debug_assert!(tree.ref_count > 0);
    tree.ref_count += 1;
}

/// Drop one reference; at zero, release the children and return the
/// slot to the pool. Iterative, so deep trees cannot overflow the
/// call stack.
pub fn release(pool: &mut TreePool, id: TreeId) {
    let mut stack = std::mem::take(&mut pool.release_stack);
    stack.push(id);
    while let Some(id) = stack.pop() {
        let tree = pool.get_mut(id);
        assert!(tree.ref_count > 0, "tree reference count underflow");
        tree.ref_count -= 1;
        if tree.ref_count == 0 {
            stack.extend(std::mem::take(&mut tree.children));
            pool.free(id);
        }
    }
    pool.release_stack = stack;
}

/// Release every tree in `trees`, consuming the array.
pub fn release_all(pool: &mut TreePool, trees: Vec<TreeId>) {
    for id in trees {
        release(pool, id);
    }
}

/// Split off the trailing run of extras, leaving the essential prefix.
pub fn remove_trailing_extras(pool: &TreePool, trees: &mut Vec<TreeId>) -> Vec<TreeId> {
    let mut split = trees.len();
    while split > 0 && pool.get(trees[split - 1]).extra {
        split -= 1;
    }
    trees.split_off(split)
}

/// Deterministic ordering: symbol id, then child count, then children.
pub fn compare(pool: &TreePool, a: TreeId, b: TreeId) -> std::cmp::Ordering {
    use std::cmp::Ordering;
    let (left, right) = (pool.get(a), pool.get(b));
    left.symbol
        .cmp(&right.symbol)
        .then(left.child_count().cmp(&right.child_count()))
        .then_with(|| {
            for (&child_a, &child_b) in left.children.iter().zip(&right.children) {
                match compare(pool, child_a, child_b) {
                    Ordering::Equal => continue,
                    other => return other,
                }
            }
            Ordering::Equal
        })
}

/// Structural equality, ignoring parse states and scanner bookkeeping.
pub fn eq(pool: &TreePool, a: TreeId, b: TreeId) -> bool {
    let mut stack = vec![(a, b)];
    while let Some((a, b)) = stack.pop() {
        let (left, right) = (pool.get(a), pool.get(b));
        if left.symbol != right.symbol
            || left.visible != right.visible
            || left.named != right.named
            || left.padding != right.padding
            || left.size != right.size
            || left.child_count() != right.child_count()
        {
            return false;
        }
        stack.extend(left.children.iter().copied().zip(right.children.iter().copied()));
    }
    true
}

/// The rightmost leaf that carries external scanner state, if any.
pub fn last_external_token(pool: &TreePool, id: TreeId) -> Option<TreeId> {
    let mut current = id;
    loop {
        let tree = pool.get(current);
        if !tree.has_external_tokens {
            return None;
        }
        if tree.children.is_empty() {
            return Some(current);
        }
        match tree
            .children
            .iter()
            .rev()
            .find(|&&child| pool.get(child).has_external_tokens)
        {
            Some(&child) => current = child,
            None => return None,
        }
    }
}

/// Byte-for-byte comparison of serialized scanner states; absence is
/// equivalent to an empty blob.
pub fn external_token_state_eq(pool: &TreePool, a: Option<TreeId>, b: Option<TreeId>) -> bool {
    let blob = |id: Option<TreeId>| -> &[u8] {
        id.map_or(&[], |id| pool.get(id).external_scanner_state.as_slice())
    };
    blob(a) == blob(b)
}

/// After parsing completes, fill every reachable node's context (parent
/// link, child index, absolute offset, alias) in one DFS. The only
/// writer of those fields.
pub fn assign_parents(pool: &mut TreePool, language: &Language, root: TreeId) {
    let mut stack = vec![(root, Length::ZERO)];
    while let Some((id, offset)) = stack.pop() {
        let alias_sequence_id = pool.get(id).alias_sequence_id;
        let children = pool.get(id).children.clone();
        let mut child_offset = offset;
        let mut structural_index = 0u32;
        for (index, child_id) in children.into_iter().enumerate() {
            let alias = if pool.get(child_id).extra {
                None
            } else {
                let alias = language.alias_at(alias_sequence_id, structural_index);
                structural_index += 1;
                alias
            };
            let child = pool.get_mut(child_id);
            child.context.parent = Some(id);
            child.context.index = index as u32;
            child.context.offset = child_offset;
            child.context.alias_symbol = alias;
            child.context.alias_is_named =
                alias.is_some_and(|symbol| language.symbol_metadata(symbol).named);
            let next_offset = child_offset + child.total_size();
            stack.push((child_id, child_offset));
            child_offset = next_offset;
        }
    }
}

/// Render the visible tree as an s-expression, e.g.
/// `(document (array (number) (number)))`.
pub fn write_sexp(pool: &TreePool, language: &Language, root: TreeId) -> String {
    let mut out = String::new();
    sexp_into(pool, language, root, &mut out);
    if out.is_empty() {
        out.push_str("()");
    }
    out
}

fn sexp_into(pool: &TreePool, language: &Language, id: TreeId, out: &mut String) {
    let tree = pool.get(id);
    let symbol = tree.context.alias_symbol.unwrap_or(tree.symbol);
    let named = match tree.context.alias_symbol {
        Some(_) => tree.context.alias_is_named,
        None => tree.named,
    };
    if tree.visible && named {
        if !out.is_empty() && !out.ends_with('(') {
            out.push(' ');
        }
        out.push('(');
        out.push_str(language.symbol_name(symbol));
        for &child in &tree.children {
            sexp_into(pool, language, child, out);
        }
        out.push(')');
    } else {
        for &child in &tree.children {
            sexp_into(pool, language, child, out);
        }
    }
}
