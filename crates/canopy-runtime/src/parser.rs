//! The GLR parse driver.
//!
//! One [`Parser`] drives one language over one input at a time. The
//! outer loop advances every live stack version in round-robin under
//! the fair-advance rule, then condenses the version set; per-version
//! advance asks the lookahead pipeline for a token, dispatches the
//! table's actions (forking the stack when an entry lists several),
//! and falls back to error handling when nothing applies.
//!
//! Pops hand back fresh stack versions; the driver folds reduction
//! results back onto the version it is driving with
//! `renumber_version`, so conflicting actions all start from the same
//! unreduced stack.

use indexmap::IndexSet;

use canopy_core::input::Input;
use canopy_core::language::{
    ERROR_STATE, ExternalScanner, Language, ParseAction, STATE_NONE, StateId, Symbol, TableEntry,
};
use canopy_core::length::Length;

use crate::error_costs::{
    ERROR_COST_PER_SKIPPED_CHAR, ERROR_COST_PER_SKIPPED_LINE, ERROR_COST_PER_SKIPPED_TREE,
    MAX_COST_DIFFERENCE,
};
use crate::lexer::{Lexer, LexerSession};
use crate::pool::{TreeId, TreePool};
use crate::reuse::{ReusableNode, TokenCache};
use crate::stack::{Stack, StackVersion};
use crate::trace::{NoopTracer, Tracer};
use crate::tree::{self, Tree};

const MAX_VERSION_COUNT: usize = 6;
const MAX_SUMMARY_DEPTH: u32 = 16;

#[derive(Clone, Copy, Debug)]
struct ErrorStatus {
    cost: u32,
    push_count: u32,
    is_in_error: bool,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum ErrorComparison {
    TakeLeft,
    PreferLeft,
    None,
    PreferRight,
    TakeRight,
}

/// A reduction discovered by the speculative pre-error scan.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
struct ReduceAction {
    symbol: Symbol,
    child_count: u16,
    dynamic_precedence: i32,
    alias_sequence_id: u16,
}

/// An incremental GLR parser for one language.
pub struct Parser<'lang> {
    language: &'lang Language,
    pool: TreePool,
    stack: Stack,
    lexer: Lexer,
    token_cache: TokenCache,
    reusable_node: ReusableNode,
    external_scanner: Option<Box<dyn ExternalScanner>>,
    finished_tree: Option<TreeId>,
    in_ambiguity: bool,
    halt_on_error: bool,
    tracer: Box<dyn Tracer>,
}

impl<'lang> Parser<'lang> {
    pub fn new(language: &'lang Language) -> Self {
        Self {
            language,
            pool: TreePool::new(),
            stack: Stack::new(),
            lexer: Lexer::new(),
            token_cache: TokenCache::new(),
            reusable_node: ReusableNode::new(None),
            external_scanner: language.create_external_scanner(),
            finished_tree: None,
            in_ambiguity: false,
            halt_on_error: false,
            tracer: Box::new(NoopTracer),
        }
    }

    /// When set, a parse that cannot make progress returns an
    /// all-error root instead of searching for recoveries forever.
    pub fn with_halt_on_error(mut self, halt_on_error: bool) -> Self {
        self.halt_on_error = halt_on_error;
        self
    }

    pub fn set_tracer(&mut self, tracer: Box<dyn Tracer>) {
        self.tracer = tracer;
    }

    pub fn language(&self) -> &'lang Language {
        self.language
    }

    pub fn pool(&self) -> &TreePool {
        &self.pool
    }

    /// Mutable pool access, for editing a tree between parses.
    pub fn pool_mut(&mut self) -> &mut TreePool {
        &mut self.pool
    }

    /// Release one caller-owned reference to a tree returned by
    /// [`Parser::parse`].
    pub fn release_tree(&mut self, id: TreeId) {
        tree::release(&mut self.pool, id);
    }

    /// Render a tree as an s-expression.
    pub fn sexp(&self, root: TreeId) -> String {
        tree::write_sexp(&self.pool, self.language, root)
    }

    /// Parse `input`, reusing nodes from `old_tree` when it is the
    /// (edited) result of a previous parse of this input. The caller
    /// owns one reference to the returned root.
    pub fn parse(&mut self, input: &mut dyn Input, old_tree: Option<TreeId>) -> Option<TreeId> {
        self.start(old_tree);

        let mut last_position = 0u32;
        loop {
            let mut cursor = self.reusable_node;
            let mut version = 0;
            while version < self.stack.version_count() {
                cursor = self.reusable_node;
                while !self.stack.is_halted(version) {
                    let position = self.stack.top_position(version);
                    if position.bytes > last_position
                        || (version > 0 && position.bytes == last_position)
                    {
                        last_position = position.bytes;
                        break;
                    }
                    self.tracer.trace_process(
                        version,
                        self.stack.top_state(version),
                        position,
                    );
                    self.advance(input, version, &mut cursor);
                }
                version += 1;
            }
            self.reusable_node = cursor;

            let should_halt = self.condense_stack();
            if should_halt {
                if self.finished_tree.is_some() {
                    break;
                } else if self.halt_on_error {
                    self.halt_parse(input);
                    break;
                }
            }

            self.in_ambiguity = version > 1;
            if version == 0 {
                break;
            }
        }

        self.stack.clear(&mut self.pool);
        self.token_cache.clear(&mut self.pool);
        self.reusable_node = ReusableNode::new(None);

        let finished = self.finished_tree.take()?;
        tree::assign_parents(&mut self.pool, self.language, finished);
        Some(finished)
    }

    fn start(&mut self, old_tree: Option<TreeId>) {
        if let Some(scanner) = self.external_scanner.as_mut() {
            scanner.deserialize(&[]);
        }
        self.lexer = Lexer::new();
        self.stack.clear(&mut self.pool);
        self.reusable_node = ReusableNode::new(old_tree);
        self.finished_tree = None;
        self.in_ambiguity = false;
    }

    // ------------------------------------------------------------------
    // Per-version advance
    // ------------------------------------------------------------------

    fn advance(&mut self, input: &mut dyn Input, version: StackVersion, cursor: &mut ReusableNode) {
        let language = self.language;
        let mut state = self.stack.top_state(version);
        let (mut lookahead, mut entry) = self.get_lookahead(input, version, &mut state, cursor);

        loop {
            let mut last_reduction_version: Option<StackVersion> = None;

            for action in entry.actions {
                match *action {
                    ParseAction::Shift {
                        state: shift_state,
                        extra,
                    } => {
                        let mut next_state = if extra { state } else { shift_state };
                        self.tracer.trace_shift(next_state, extra);

                        if self.pool[lookahead].child_count() > 0 {
                            self.breakdown_lookahead(&mut lookahead, state, cursor);
                            next_state =
                                language.next_state(state, self.pool[lookahead].symbol);
                        }

                        self.shift(version, next_state, lookahead, extra);
                        if Some(lookahead) == cursor.tree() {
                            cursor.pop(&self.pool);
                        }
                        tree::release(&mut self.pool, lookahead);
                        return;
                    }

                    ParseAction::Reduce {
                        symbol,
                        child_count,
                        dynamic_precedence,
                        alias_sequence_id,
                        fragile,
                    } => {
                        self.tracer.trace_reduce(language, symbol, child_count);
                        if let Some(reduction_version) = self.reduce(
                            version,
                            symbol,
                            child_count,
                            dynamic_precedence,
                            alias_sequence_id,
                            fragile,
                        ) {
                            last_reduction_version = Some(reduction_version);
                        }
                    }

                    ParseAction::Accept => {
                        self.tracer.trace_accept(version);
                        self.accept(version, lookahead);
                        tree::release(&mut self.pool, lookahead);
                        return;
                    }

                    ParseAction::Recover => {
                        // Recovery works on single tokens; break a
                        // reused subtree all the way down to its first
                        // leaf.
                        while self.pool[lookahead].child_count() > 0 {
                            if !cursor.breakdown(&self.pool) {
                                break;
                            }
                            let replacement =
                                cursor.tree().expect("breakdown emptied the cursor");
                            tree::release(&mut self.pool, lookahead);
                            tree::retain(&mut self.pool, replacement);
                            lookahead = replacement;
                        }
                        self.recover(version, lookahead);
                        if Some(lookahead) == cursor.tree() {
                            cursor.pop(&self.pool);
                        }
                        tree::release(&mut self.pool, lookahead);
                        return;
                    }
                }
            }

            if let Some(reduction_version) = last_reduction_version {
                self.stack
                    .renumber_version(&mut self.pool, reduction_version, version);
            } else if !self.breakdown_top_of_stack(version) {
                if state == ERROR_STATE {
                    self.stack
                        .push(&mut self.pool, version, Some(lookahead), false, ERROR_STATE);
                    tree::release(&mut self.pool, lookahead);
                    return;
                }

                self.handle_error(version, self.pool[lookahead].first_leaf.symbol);
                if self.stack.is_halted(version) {
                    tree::release(&mut self.pool, lookahead);
                    return;
                }
                if self.pool[lookahead].size.bytes == 0 {
                    tree::release(&mut self.pool, lookahead);
                    state = self.stack.top_state(version);
                    let (refreshed, refreshed_entry) =
                        self.get_lookahead(input, version, &mut state, cursor);
                    lookahead = refreshed;
                    entry = refreshed_entry;
                    continue;
                }
            }

            state = self.stack.top_state(version);
            entry = language.table_entry(state, self.pool[lookahead].first_leaf.symbol);
        }
    }

    // ------------------------------------------------------------------
    // Lookahead pipeline
    // ------------------------------------------------------------------

    fn get_lookahead(
        &mut self,
        input: &mut dyn Input,
        version: StackVersion,
        state: &mut StateId,
        cursor: &mut ReusableNode,
    ) -> (TreeId, TableEntry<'lang>) {
        let language = self.language;
        let position = self.stack.top_position(version);
        let last_external_token = self.stack.last_external_token(version);

        // Tier 1: reuse a subtree from the previous parse.
        while let Some(result) = cursor.tree() {
            if cursor.byte_index() > position.bytes {
                break;
            }
            if cursor.byte_index() < position.bytes {
                cursor.pop(&self.pool);
                continue;
            }
            if !tree::external_token_state_eq(
                &self.pool,
                cursor.last_external_token(),
                last_external_token,
            ) {
                cursor.pop(&self.pool);
                continue;
            }

            let candidate = &self.pool[result];
            let rejected = candidate.has_changes
                || candidate.symbol == Symbol::ERROR
                || candidate.fragile_left
                || candidate.fragile_right
                || (self.in_ambiguity && candidate.child_count() > 0);
            if rejected {
                if !cursor.breakdown(&self.pool) {
                    cursor.pop(&self.pool);
                    self.breakdown_top_of_stack(version);
                    *state = self.stack.top_state(version);
                }
                continue;
            }

            let entry = language.table_entry(*state, self.pool[result].first_leaf.symbol);
            if !self.can_reuse_first_leaf(*state, result, &entry) {
                cursor.pop_leaf(&self.pool);
                break;
            }

            self.tracer.trace_reuse(language, self.pool[result].symbol);
            tree::retain(&mut self.pool, result);
            return (result, entry);
        }

        // Tier 2: the one-slot token cache.
        if let Some(result) = self
            .token_cache
            .get(&self.pool, position.bytes, last_external_token)
        {
            let entry = language.table_entry(*state, self.pool[result].first_leaf.symbol);
            if self.can_reuse_first_leaf(*state, result, &entry) {
                tree::retain(&mut self.pool, result);
                return (result, entry);
            }
        }

        // Tier 3: lex.
        let result = self.lex(input, version, *state);
        self.token_cache
            .set(&mut self.pool, position.bytes, last_external_token, Some(result));
        let entry = language.table_entry(*state, self.pool[result].symbol);
        (result, entry)
    }

    fn can_reuse_first_leaf(&self, state: StateId, id: TreeId, entry: &TableEntry<'_>) -> bool {
        let current_lex_mode = self.language.lex_mode(state);
        let tree = &self.pool[id];
        tree.first_leaf.lex_mode == current_lex_mode
            || (current_lex_mode.external_lex_state == 0
                && tree.size.bytes > 0
                && entry.is_reusable
                && (!entry.depends_on_lookahead
                    || (tree.child_count() > 1 && tree.error_cost == 0)))
    }

    fn restore_external_scanner(&mut self, external_token: Option<TreeId>) {
        if let Some(scanner) = self.external_scanner.as_mut() {
            match external_token {
                Some(token) => {
                    scanner.deserialize(&self.pool[token].external_scanner_state);
                }
                None => scanner.deserialize(&[]),
            }
        }
    }

    fn lex(&mut self, input: &mut dyn Input, version: StackVersion, parse_state: StateId) -> TreeId {
        let language = self.language;
        let start_position = self.stack.top_position(version);
        let external_token = self.stack.last_external_token(version);
        let mut lex_mode = language.lex_mode(parse_state);
        let mut valid_external_tokens = language.enabled_external_tokens(lex_mode.external_lex_state);

        let mut found_external: Option<u16> = None;
        let mut result_symbol: Option<Symbol> = None;
        let mut skipped_error = false;
        let mut error_mode = parse_state == ERROR_STATE;
        let mut first_error_char: Option<char> = None;
        let mut error_start_position = Length::ZERO;
        let mut error_end_position = Length::ZERO;
        let mut last_byte_scanned = start_position.bytes;
        self.lexer.reset(input, start_position);

        loop {
            let current_position = self.lexer.current_position();

            if let Some(valid) = valid_external_tokens {
                self.lexer.start();
                self.restore_external_scanner(external_token);
                let accepted = {
                    let scanner = self
                        .external_scanner
                        .as_mut()
                        .expect("external lex state without a scanner");
                    let mut session = LexerSession::new(&mut self.lexer, input);
                    scanner.scan(&mut session, valid)
                };
                if let Some(index) = accepted {
                    let token_end = self.lexer.token_end_position();
                    if error_mode && token_end.bytes <= current_position.bytes {
                        // Zero-width external tokens would pin the error
                        // loop in place; disregard them here.
                    } else {
                        found_external = Some(index);
                        result_symbol = Some(language.external_symbol(index));
                        break;
                    }
                }
                if self.lexer.current_position().bytes > last_byte_scanned {
                    last_byte_scanned = self.lexer.current_position().bytes;
                }
                self.lexer.reset(input, current_position);
            }

            self.lexer.start();
            let lexed = {
                let mut session = LexerSession::new(&mut self.lexer, input);
                language.lex(&mut session, lex_mode.lex_state)
            };
            if let Some(symbol) = lexed {
                result_symbol = Some(symbol);
                break;
            }

            if !error_mode {
                error_mode = true;
                lex_mode = language.lex_mode(ERROR_STATE);
                valid_external_tokens =
                    language.enabled_external_tokens(lex_mode.external_lex_state);
                if self.lexer.current_position().bytes > last_byte_scanned {
                    last_byte_scanned = self.lexer.current_position().bytes;
                }
                self.lexer.reset(input, start_position);
                continue;
            }

            if !skipped_error {
                skipped_error = true;
                error_start_position = self.lexer.token_start_position();
                error_end_position = error_start_position;
                first_error_char = self.lexer.lookahead();
            }

            if self.lexer.current_position().bytes == error_end_position.bytes {
                if self.lexer.at_eof() {
                    break;
                }
                self.lexer.advance(input, false);
            }
            error_end_position = self.lexer.current_position();
        }

        // Once characters were skipped, the skipped range itself is the
        // result; a token found just past it will be re-lexed on the
        // next call.
        let result = if skipped_error {
            let padding = error_start_position - start_position;
            let size = error_end_position - error_start_position;
            tree::make_error(&mut self.pool, language, size, padding, first_error_char)
        } else {
            let symbol = result_symbol.expect("lex loop ended without a symbol");
            let padding = self.lexer.token_start_position() - start_position;
            let size = self.lexer.token_end_position() - self.lexer.token_start_position();
            let id = tree::make_leaf(&mut self.pool, language, symbol, padding, size);
            if found_external.is_some() {
                let mut blob = Vec::new();
                if let Some(scanner) = self.external_scanner.as_mut() {
                    scanner.serialize(&mut blob);
                }
                let node = self.pool.get_mut(id);
                node.has_external_tokens = true;
                node.external_scanner_state = blob;
            }
            id
        };

        if self.lexer.current_position().bytes > last_byte_scanned {
            last_byte_scanned = self.lexer.current_position().bytes;
        }
        let node = self.pool.get_mut(result);
        node.bytes_scanned = last_byte_scanned - start_position.bytes + 1;
        node.parse_state = parse_state;
        node.first_leaf.lex_mode = lex_mode;

        let (symbol, size) = (self.pool[result].symbol, self.pool[result].size);
        self.tracer.trace_lexed(language, symbol, size);
        result
    }

    // ------------------------------------------------------------------
    // Shift / reduce / accept
    // ------------------------------------------------------------------

    fn shift(&mut self, version: StackVersion, state: StateId, lookahead: TreeId, extra: bool) {
        let lookahead = if extra != self.pool[lookahead].extra {
            let id = if self.stack.version_count() > 1 {
                tree::make_copy(&mut self.pool, lookahead)
            } else {
                tree::retain(&mut self.pool, lookahead);
                lookahead
            };
            self.pool.get_mut(id).extra = extra;
            id
        } else {
            tree::retain(&mut self.pool, lookahead);
            lookahead
        };

        let is_pending = self.pool[lookahead].child_count() > 0;
        self.stack
            .push(&mut self.pool, version, Some(lookahead), is_pending, state);
        if self.pool[lookahead].has_external_tokens {
            let token = tree::last_external_token(&self.pool, lookahead);
            self.stack
                .set_last_external_token(&mut self.pool, version, token);
        }
        tree::release(&mut self.pool, lookahead);
    }

    /// Replace `parent`'s children with `children` if the resulting
    /// node wins `select_tree`; consumes the `children` references
    /// either way.
    fn replace_children(&mut self, parent: TreeId, children: Vec<TreeId>) -> bool {
        let mut scratch = self.pool[parent].clone();
        scratch.children = Vec::new();
        tree::set_children(&mut scratch, children, &self.pool);
        if self.select_tree_over(parent, &scratch) {
            let old = std::mem::replace(self.pool.get_mut(parent), scratch);
            tree::release_all(&mut self.pool, old.children);
            true
        } else {
            tree::release_all(&mut self.pool, scratch.children);
            false
        }
    }

    fn reduce(
        &mut self,
        version: StackVersion,
        symbol: Symbol,
        count: u16,
        dynamic_precedence: i32,
        alias_sequence_id: u16,
        fragile: bool,
    ) -> Option<StackVersion> {
        let language = self.language;
        let initial_version_count = self.stack.version_count();

        let mut pop = self
            .stack
            .pop_count(&mut self.pool, version, count as u32);
        let first_version = pop.first().map(|slice| slice.version);

        let mut i = 0;
        while i < pop.len() {
            let slice_version = pop[i].version;
            let mut trees = std::mem::take(&mut pop[i].trees);

            // Trailing extras are not part of the new parent; they get
            // re-pushed on top of it.
            let mut extras = tree::remove_trailing_extras(&self.pool, &mut trees);
            let parent = tree::make_node(&mut self.pool, language, symbol, trees, alias_sequence_id);

            // This pop may have collapsed multiple versions into one;
            // their slices arrive adjacent. Keep whichever child list
            // wins select_tree and drop the others.
            while i + 1 < pop.len() && pop[i + 1].version == slice_version {
                i += 1;
                let mut next_trees = std::mem::take(&mut pop[i].trees);
                let next_extras = tree::remove_trailing_extras(&self.pool, &mut next_trees);
                if self.replace_children(parent, next_trees) {
                    tree::release_all(&mut self.pool, extras);
                    extras = next_extras;
                } else {
                    tree::release_all(&mut self.pool, next_extras);
                }
            }

            self.pool.get_mut(parent).dynamic_precedence += dynamic_precedence;

            let state = self.stack.top_state(slice_version);
            let next_state = language.next_state(state, symbol);
            if fragile || self.in_ambiguity || pop.len() > 1 || initial_version_count > 1 {
                let node = self.pool.get_mut(parent);
                node.fragile_left = true;
                node.fragile_right = true;
                node.parse_state = STATE_NONE;
            } else {
                self.pool.get_mut(parent).parse_state = state;
            }

            self.stack
                .push(&mut self.pool, slice_version, Some(parent), false, next_state);
            tree::release(&mut self.pool, parent);
            for extra in extras {
                self.stack
                    .push(&mut self.pool, slice_version, Some(extra), false, next_state);
                tree::release(&mut self.pool, extra);
            }

            i += 1;
        }

        // Try to merge the versions this reduction created.
        let mut i = initial_version_count;
        while i < self.stack.version_count() {
            let mut merged = false;
            for j in initial_version_count..i {
                if self.stack.merge(&mut self.pool, j, i) {
                    merged = true;
                    break;
                }
            }
            if !merged {
                i += 1;
            }
        }

        first_version
    }

    fn accept(&mut self, version: StackVersion, lookahead: TreeId) {
        self.pool.get_mut(lookahead).extra = true;
        debug_assert_eq!(self.pool[lookahead].symbol, Symbol::END);
        self.stack
            .push(&mut self.pool, version, Some(lookahead), false, 1);

        let mut pop = self.stack.pop_all(&mut self.pool, version);
        let first_version = pop.first().map(|slice| slice.version);
        for slice in &mut pop {
            let trees = std::mem::take(&mut slice.trees);
            let root = self.make_root(trees);

            match self.finished_tree {
                Some(finished) => {
                    if self.select_tree(finished, root) {
                        tree::release(&mut self.pool, finished);
                        self.finished_tree = Some(root);
                    } else {
                        tree::release(&mut self.pool, root);
                    }
                }
                None => self.finished_tree = Some(root),
            }
        }

        if let Some(popped_version) = first_version {
            self.stack.remove_version(&mut self.pool, popped_version);
        }
        self.stack.halt(version);
    }

    /// Build the root from a popped-to-empty slice: a single visible
    /// tree is the root itself; otherwise the last non-extra tree is
    /// spliced open and the rest become its children.
    fn make_root(&mut self, trees: Vec<TreeId>) -> TreeId {
        if trees.len() == 1 {
            return trees.into_iter().next().unwrap();
        }
        for j in (0..trees.len()).rev() {
            let child = trees[j];
            if !self.pool[child].extra {
                let root = tree::make_copy(&mut self.pool, child);
                let grandchildren = self.pool[child].children.clone();
                let mut new_children = Vec::new();
                new_children.extend_from_slice(&trees[..j]);
                new_children.extend(grandchildren);
                new_children.extend_from_slice(&trees[j + 1..]);
                let mut scratch = self.pool[root].clone();
                scratch.children = Vec::new();
                tree::set_children(&mut scratch, new_children, &self.pool);
                *self.pool.get_mut(root) = scratch;
                tree::release(&mut self.pool, child);
                return root;
            }
        }
        unreachable!("accept slice held only extras");
    }

    // ------------------------------------------------------------------
    // Tie-breaking
    // ------------------------------------------------------------------

    /// Whether `right` should replace `left` when both parses reach the
    /// same point.
    fn select_tree(&self, left: TreeId, right: TreeId) -> bool {
        let right_node = &self.pool[right];
        self.select_tree_over(left, right_node)
    }

    fn select_tree_over(&self, left: TreeId, right: &Tree) -> bool {
        let left_node = &self.pool[left];

        if right.error_cost < left_node.error_cost {
            return true;
        }
        if left_node.error_cost < right.error_cost {
            return false;
        }
        if right.dynamic_precedence > left_node.dynamic_precedence {
            return true;
        }
        if left_node.dynamic_precedence > right.dynamic_precedence {
            return false;
        }
        if left_node.error_cost > 0 {
            return false;
        }

        match compare_values(&self.pool, left_node, right) {
            std::cmp::Ordering::Greater => true,
            _ => false,
        }
    }

    // ------------------------------------------------------------------
    // Breakdown
    // ------------------------------------------------------------------

    fn breakdown_top_of_stack(&mut self, version: StackVersion) -> bool {
        let language = self.language;
        let mut did_break_down = false;
        let mut pending = false;

        loop {
            let mut pop = self.stack.pop_pending(&mut self.pool, version);
            if pop.is_empty() {
                break;
            }

            did_break_down = true;
            pending = false;
            let first_version = pop[0].version;
            for slice in &mut pop {
                let slice_version = slice.version;
                let trees = std::mem::take(&mut slice.trees);
                let mut state = self.stack.top_state(slice_version);
                let parent = trees[0];

                let children = self.pool[parent].children.clone();
                for &child in &children {
                    pending = self.pool[child].child_count() > 0;
                    if self.pool[child].symbol == Symbol::ERROR {
                        state = ERROR_STATE;
                    } else if !self.pool[child].extra {
                        state = language.next_state(state, self.pool[child].symbol);
                    }
                    self.stack
                        .push(&mut self.pool, slice_version, Some(child), pending, state);
                }

                for &extra in &trees[1..] {
                    self.stack
                        .push(&mut self.pool, slice_version, Some(extra), false, state);
                }

                self.stack
                    .decrease_push_count(slice_version, children.len() as u32 + 1);
                tree::release_all(&mut self.pool, trees);
            }
            // The first revealed chain replaces this version; any other
            // chains stay behind as parallel versions for condense to
            // fold.
            self.stack
                .renumber_version(&mut self.pool, first_version, version);

            if !pending {
                break;
            }
        }

        did_break_down
    }

    fn breakdown_lookahead(
        &mut self,
        lookahead: &mut TreeId,
        state: StateId,
        cursor: &mut ReusableNode,
    ) {
        let mut did_break_down = false;
        while let Some(tree_id) = cursor.tree() {
            if self.pool[tree_id].child_count() == 0 || self.pool[tree_id].parse_state == state {
                break;
            }
            cursor.breakdown(&self.pool);
            did_break_down = true;
        }

        if did_break_down {
            let replacement = cursor.tree().expect("breakdown emptied the cursor");
            tree::release(&mut self.pool, *lookahead);
            tree::retain(&mut self.pool, replacement);
            *lookahead = replacement;
        }
    }

    // ------------------------------------------------------------------
    // Error handling
    // ------------------------------------------------------------------

    fn error_status(&self, version: StackVersion) -> ErrorStatus {
        ErrorStatus {
            cost: self.stack.error_cost(version),
            push_count: self.stack.push_count(version),
            is_in_error: self.stack.top_state(version) == ERROR_STATE,
        }
    }

    fn better_version_exists(
        &self,
        version: StackVersion,
        is_in_error: bool,
        cost: u32,
    ) -> bool {
        if let Some(finished) = self.finished_tree {
            if self.pool[finished].error_cost <= cost {
                return true;
            }
        }

        let status = ErrorStatus {
            cost,
            is_in_error,
            push_count: 0,
        };
        for i in 0..self.stack.version_count() {
            if i == version || self.stack.is_halted(i) {
                continue;
            }
            match compare_versions(status, self.error_status(i)) {
                ErrorComparison::TakeRight => return true,
                ErrorComparison::PreferRight => {
                    if self.stack.can_merge(&self.pool, i, version) {
                        return true;
                    }
                }
                _ => {}
            }
        }
        false
    }

    /// Enumerate every reduction available in this state for any
    /// token, and apply them all (fragile). Returns false when the
    /// version was replaced by its own reduction and should be
    /// reprocessed.
    fn do_potential_reductions(&mut self, version: StackVersion) -> bool {
        let language = self.language;
        let state = self.stack.top_state(version);
        let previous_version_count = self.stack.version_count();

        let mut has_shift_action = false;
        let mut reduce_actions: IndexSet<ReduceAction> = IndexSet::new();
        for raw_symbol in 0..language.token_count() {
            let symbol = Symbol(raw_symbol);
            for action in language.actions(state, symbol) {
                if action.is_extra() {
                    continue;
                }
                match *action {
                    ParseAction::Shift { .. } | ParseAction::Recover => has_shift_action = true,
                    ParseAction::Reduce {
                        symbol,
                        child_count,
                        dynamic_precedence,
                        alias_sequence_id,
                        ..
                    } if child_count > 0 => {
                        reduce_actions.insert(ReduceAction {
                            symbol,
                            child_count,
                            dynamic_precedence,
                            alias_sequence_id,
                        });
                    }
                    _ => {}
                }
            }
        }

        let mut did_reduce = false;
        for action in reduce_actions {
            self.reduce(
                version,
                action.symbol,
                action.child_count,
                action.dynamic_precedence,
                action.alias_sequence_id,
                true,
            );
            did_reduce = true;
        }

        if !did_reduce {
            return true;
        }
        if has_shift_action {
            true
        } else {
            self.stack
                .renumber_version(&mut self.pool, previous_version_count, version);
            false
        }
    }

    fn handle_error(&mut self, version: StackVersion, lookahead_symbol: Symbol) {
        // If another version is clearly better, just stop this one.
        let new_cost = self.stack.error_cost(version) + ERROR_COST_PER_SKIPPED_TREE;
        if self.better_version_exists(version, true, new_cost) {
            self.stack.halt(version);
            return;
        }

        self.tracer.trace_error(self.language, lookahead_symbol);

        // Perform any reductions that could have happened in this
        // state, regardless of the lookahead.
        let previous_version_count = self.stack.version_count();
        let mut v = version;
        while v < self.stack.version_count() {
            if self.do_potential_reductions(v) {
                if v == version {
                    v = previous_version_count;
                } else {
                    v += 1;
                }
            }
        }

        // Push a discontinuity and merge every sibling the speculative
        // reductions created back into this version.
        self.stack
            .push(&mut self.pool, version, None, false, ERROR_STATE);
        while self.stack.version_count() > previous_version_count {
            self.stack
                .push(&mut self.pool, previous_version_count, None, false, ERROR_STATE);
            self.stack
                .force_merge(&mut self.pool, version, previous_version_count);
        }

        self.stack
            .record_summary(&self.pool, version, MAX_SUMMARY_DEPTH);
    }

    fn recover(&mut self, version: StackVersion, lookahead: TreeId) {
        let language = self.language;
        let mut did_recover = false;
        let previous_version_count = self.stack.version_count();
        let position = self.stack.top_position(version);
        let summary: Vec<_> = self
            .stack
            .get_summary(version)
            .map(|entries| entries.to_vec())
            .unwrap_or_default();

        for entry in summary {
            if entry.state == ERROR_STATE {
                continue;
            }
            let depth = entry.depth + self.stack.depth_since_error(&self.pool, version);

            let new_cost = depth * ERROR_COST_PER_SKIPPED_TREE
                + (position.chars - entry.position.chars) * ERROR_COST_PER_SKIPPED_CHAR
                + (position.extent.row - entry.position.extent.row) * ERROR_COST_PER_SKIPPED_LINE;
            if self.better_version_exists(version, false, new_cost) {
                break;
            }

            if language
                .actions(entry.state, self.pool[lookahead].symbol)
                .is_empty()
            {
                continue;
            }

            self.tracer.trace_recover(entry.state, depth);
            let mut pop = self.stack.pop_count(&mut self.pool, version, depth);
            let mut previous_version: Option<StackVersion> = None;
            for index in 0..pop.len() {
                let slice_version = pop[index].version;
                let mut trees = std::mem::take(&mut pop[index].trees);

                if Some(slice_version) == previous_version {
                    tree::release_all(&mut self.pool, trees);
                    continue;
                }

                if self.stack.top_state(slice_version) != entry.state {
                    tree::release_all(&mut self.pool, trees);
                    self.stack.halt(slice_version);
                    continue;
                }

                // Merge with an ERROR node left by a previous recovery,
                // if one sits just below the rollback point.
                let error_pop = self.stack.pop_error(&mut self.pool, slice_version);
                if let Some(mut error_slice) = error_pop.into_iter().next() {
                    let mut combined = std::mem::take(&mut error_slice.trees);
                    combined.append(&mut trees);
                    trees = combined;
                    self.stack
                        .renumber_version(&mut self.pool, error_slice.version, slice_version);
                }

                let trailing_extras = tree::remove_trailing_extras(&self.pool, &mut trees);
                if !trees.is_empty() {
                    let error = tree::make_error_node(&mut self.pool, language, trees);
                    self.pool.get_mut(error).extra = true;
                    self.stack
                        .push(&mut self.pool, slice_version, Some(error), false, entry.state);
                    tree::release(&mut self.pool, error);
                }
                previous_version = Some(slice_version);

                for extra in trailing_extras {
                    self.stack
                        .push(&mut self.pool, slice_version, Some(extra), false, entry.state);
                    tree::release(&mut self.pool, extra);
                }
                did_recover = true;
            }
            break;
        }

        // Discard duplicate or dead versions created by the rollback.
        let mut i = previous_version_count;
        while i < self.stack.version_count() {
            if self.stack.is_halted(i) {
                self.stack.remove_version(&mut self.pool, i);
                continue;
            }
            let mut removed = false;
            for j in 0..i {
                if self.stack.can_merge(&self.pool, j, i) {
                    self.stack.remove_version(&mut self.pool, i);
                    removed = true;
                    break;
                }
            }
            if !removed {
                i += 1;
            }
        }

        if did_recover && self.stack.version_count() > MAX_VERSION_COUNT {
            self.stack.halt(version);
            return;
        }

        if self.pool[lookahead].symbol == Symbol::END {
            let parent = tree::make_error_node(&mut self.pool, language, Vec::new());
            self.stack
                .push(&mut self.pool, version, Some(parent), false, 1);
            tree::release(&mut self.pool, parent);
            self.accept(version, lookahead);
            return;
        }

        self.tracer
            .trace_skip(language, self.pool[lookahead].symbol);
        let actions = language.actions(ERROR_STATE, self.pool[lookahead].symbol);
        let extra = actions
            .last()
            .is_some_and(|action| matches!(action, ParseAction::Shift { extra: true, .. }));
        self.shift(version, ERROR_STATE, lookahead, extra);

        if self.better_version_exists(version, true, self.stack.error_cost(version)) {
            self.stack.halt(version);
        }
    }

    fn halt_parse(&mut self, input: &mut dyn Input) {
        let language = self.language;
        let end = self.lexer.advance_to_end(input);
        let remaining_length = end - self.stack.top_position(0);

        let filler = tree::make_error(&mut self.pool, language, remaining_length, Length::ZERO, None);
        self.pool.get_mut(filler).visible = false;
        self.stack.push(&mut self.pool, 0, Some(filler), false, 0);
        tree::release(&mut self.pool, filler);

        let root_error = tree::make_error_node(&mut self.pool, language, Vec::new());
        self.stack.push(&mut self.pool, 0, Some(root_error), false, 0);
        tree::release(&mut self.pool, root_error);

        let eof = tree::make_leaf(&mut self.pool, language, Symbol::END, Length::ZERO, Length::ZERO);
        self.accept(0, eof);
        tree::release(&mut self.pool, eof);
    }

    // ------------------------------------------------------------------
    // Condense
    // ------------------------------------------------------------------

    fn condense_stack(&mut self) -> bool {
        let mut made_changes = false;
        let mut min_error_cost = u32::MAX;
        let mut all_versions_have_error = true;

        let mut i = 0;
        while i < self.stack.version_count() {
            if self.stack.is_halted(i) {
                self.stack.remove_version(&mut self.pool, i);
                continue;
            }

            let status_i = self.error_status(i);
            if !status_i.is_in_error {
                all_versions_have_error = false;
            }
            if status_i.cost < min_error_cost {
                min_error_cost = status_i.cost;
            }

            let mut current = i;
            let mut removed_current = false;
            let mut j = 0;
            while j < current {
                let status_j = self.error_status(j);
                let can_merge = self.stack.can_merge(&self.pool, j, current);
                match compare_versions(status_j, self.error_status(current)) {
                    ErrorComparison::TakeLeft => {
                        made_changes = true;
                        self.stack.remove_version(&mut self.pool, current);
                        removed_current = true;
                        break;
                    }
                    ErrorComparison::PreferLeft => {
                        if can_merge {
                            made_changes = true;
                            self.stack.remove_version(&mut self.pool, current);
                            removed_current = true;
                            break;
                        }
                        j += 1;
                    }
                    ErrorComparison::None => {
                        if can_merge {
                            made_changes = true;
                            self.stack.force_merge(&mut self.pool, j, current);
                            removed_current = true;
                            break;
                        }
                        j += 1;
                    }
                    ErrorComparison::PreferRight => {
                        made_changes = true;
                        if can_merge {
                            self.stack.remove_version(&mut self.pool, j);
                            current -= 1;
                        } else {
                            self.stack.swap_versions(current, j);
                            break;
                        }
                    }
                    ErrorComparison::TakeRight => {
                        made_changes = true;
                        self.stack.remove_version(&mut self.pool, j);
                        current -= 1;
                    }
                }
            }

            if removed_current {
                continue;
            }
            i = current + 1;
        }

        while self.stack.version_count() > MAX_VERSION_COUNT {
            self.stack.remove_version(&mut self.pool, MAX_VERSION_COUNT);
            made_changes = true;
        }

        if made_changes {
            self.tracer.trace_condense(self.stack.version_count());
        }

        (all_versions_have_error && self.stack.version_count() > 0)
            || self
                .finished_tree
                .is_some_and(|finished| self.pool[finished].error_cost < min_error_cost)
    }
}

fn compare_versions(a: ErrorStatus, b: ErrorStatus) -> ErrorComparison {
    if !a.is_in_error && b.is_in_error {
        return if a.cost < b.cost {
            ErrorComparison::TakeLeft
        } else {
            ErrorComparison::PreferLeft
        };
    }
    if a.is_in_error && !b.is_in_error {
        return if b.cost < a.cost {
            ErrorComparison::TakeRight
        } else {
            ErrorComparison::PreferRight
        };
    }
    if a.cost < b.cost {
        return if (b.cost - a.cost) * (1 + a.push_count) > MAX_COST_DIFFERENCE {
            ErrorComparison::TakeLeft
        } else {
            ErrorComparison::PreferLeft
        };
    }
    if b.cost < a.cost {
        return if (a.cost - b.cost) * (1 + b.push_count) > MAX_COST_DIFFERENCE {
            ErrorComparison::TakeRight
        } else {
            ErrorComparison::PreferRight
        };
    }
    ErrorComparison::None
}

/// Lexicographic ordering over (symbol, child count, children), with
/// the right side possibly a detached scratch node.
fn compare_values(pool: &TreePool, left: &Tree, right: &Tree) -> std::cmp::Ordering {
    use std::cmp::Ordering;
    left.symbol
        .cmp(&right.symbol)
        .then(left.child_count().cmp(&right.child_count()))
        .then_with(|| {
            for (&a, &b) in left.children.iter().zip(&right.children) {
                match tree::compare(pool, a, b) {
                    Ordering::Equal => continue,
                    other => return other,
                }
            }
            Ordering::Equal
        })
}
