//! Harvesting subtrees from a previous parse.
//!
//! The [`ReusableNode`] cursor walks the previous tree in source order,
//! always standing on the next candidate for reuse; the driver either
//! accepts the candidate, descends into it (`breakdown`), or steps past
//! it (`pop` / `pop_leaf`). The cursor relies on the parent links the
//! previous parse assigned, and never rewinds.
//!
//! The [`TokenCache`] is a one-slot memo of the last lexed token, so
//! that parallel versions at the same position lex only once.

use crate::pool::{TreeId, TreePool};
use crate::tree;

/// Cursor into the previous tree. Cheap to copy; the driver snapshots
/// it per version and commits the final position after each pass.
#[derive(Clone, Copy, Debug)]
pub struct ReusableNode {
    tree: Option<TreeId>,
    /// Byte position where the current candidate (and its padding) starts.
    byte_index: u32,
    /// External scanner context in force where the candidate starts.
    last_external_token: Option<TreeId>,
}

impl ReusableNode {
    pub fn new(tree: Option<TreeId>) -> Self {
        Self {
            tree,
            byte_index: 0,
            last_external_token: None,
        }
    }

    pub fn tree(&self) -> Option<TreeId> {
        self.tree
    }

    pub fn byte_index(&self) -> u32 {
        self.byte_index
    }

    pub fn last_external_token(&self) -> Option<TreeId> {
        self.last_external_token
    }

    /// Step past the current candidate to the next node in source
    /// order, without descending into it.
    pub fn pop(&mut self, pool: &TreePool) {
        let Some(current) = self.tree else {
            return;
        };
        self.byte_index += pool.get(current).total_bytes();
        if pool.get(current).has_external_tokens {
            self.last_external_token = tree::last_external_token(pool, current);
        }

        let mut cursor = current;
        loop {
            match pool.get(cursor).context.parent {
                Some(parent) => {
                    let index = pool.get(cursor).context.index as usize;
                    let siblings = &pool.get(parent).children;
                    if index + 1 < siblings.len() {
                        self.tree = Some(siblings[index + 1]);
                        return;
                    }
                    cursor = parent;
                }
                None => {
                    self.tree = None;
                    return;
                }
            }
        }
    }

    /// Descend to the candidate's first child. Returns false at a leaf.
    pub fn breakdown(&mut self, pool: &TreePool) -> bool {
        match self.tree.and_then(|id| pool.get(id).children.first().copied()) {
            Some(first) => {
                self.tree = Some(first);
                true
            }
            None => false,
        }
    }

    /// Step past the first leaf of the current candidate.
    pub fn pop_leaf(&mut self, pool: &TreePool) {
        while self.breakdown(pool) {}
        self.pop(pool);
    }
}

/// One-slot memoization of the last lexed token.
pub struct TokenCache {
    token: Option<TreeId>,
    byte_index: u32,
    last_external_token: Option<TreeId>,
}

impl TokenCache {
    pub fn new() -> Self {
        Self {
            token: None,
            byte_index: 0,
            last_external_token: None,
        }
    }

    /// The cached token, if it was lexed at this position under an
    /// equivalent external scanner state.
    pub fn get(
        &self,
        pool: &TreePool,
        byte_index: u32,
        last_external_token: Option<TreeId>,
    ) -> Option<TreeId> {
        let token = self.token?;
        if self.byte_index == byte_index
            && tree::external_token_state_eq(pool, self.last_external_token, last_external_token)
        {
            Some(token)
        } else {
            None
        }
    }

    /// Replace the cached token, adjusting reference counts.
    pub fn set(
        &mut self,
        pool: &mut TreePool,
        byte_index: u32,
        last_external_token: Option<TreeId>,
        token: Option<TreeId>,
    ) {
        if let Some(token) = token {
            tree::retain(pool, token);
        }
        if let Some(token) = last_external_token {
            tree::retain(pool, token);
        }
        if let Some(old) = self.token.take() {
            tree::release(pool, old);
        }
        if let Some(old) = self.last_external_token.take() {
            tree::release(pool, old);
        }
        self.token = token;
        self.byte_index = byte_index;
        self.last_external_token = last_external_token;
    }

    pub fn clear(&mut self, pool: &mut TreePool) {
        self.set(pool, 0, None, None);
    }
}

impl Default for TokenCache {
    fn default() -> Self {
        Self::new()
    }
}
