//! Precompiled language tables and the traits a language implements.
//!
//! A [`Language`] is everything the runtime needs to parse one grammar:
//! the action/goto tables, per-state lex modes, symbol metadata, alias
//! sequences, a lex function, and an optional external scanner. The
//! table portion ([`LanguageTables`]) is plain data with a compact
//! binary round-trip; the lex function and scanner are supplied as code.
//!
//! Reserved identifiers:
//! - state `0` is the start state, state `1` the error-recovery state
//!   (its row holds `Recover` actions and its lex mode the permissive
//!   error token set);
//! - symbol `0` is the end-of-input sentinel; [`Symbol::ERROR`] is the
//!   builtin error symbol and has no row in the symbol tables.

use serde::{Deserialize, Serialize};

/// A parse state index into the action and lex-mode tables.
pub type StateId = u16;

/// A state of the internal (table-driven) lexer.
pub type LexStateId = u16;

/// The state the parser starts in; also reported for an empty stack.
pub const START_STATE: StateId = 0;

/// The dedicated error-recovery state.
pub const ERROR_STATE: StateId = 1;

/// Marker for "no trustworthy parse state" on fragile trees.
pub const STATE_NONE: StateId = u16::MAX;

/// A grammar symbol id (terminal or non-terminal).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
pub struct Symbol(pub u16);

impl Symbol {
    /// End-of-input sentinel.
    pub const END: Symbol = Symbol(0);

    /// The builtin error symbol. Not present in the symbol tables.
    pub const ERROR: Symbol = Symbol(u16::MAX);

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Per-symbol grammar metadata.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
pub struct SymbolMetadata {
    /// Appears in the visible tree.
    pub visible: bool,
    /// Has a name (as opposed to an anonymous literal token).
    pub named: bool,
    /// May appear anywhere (whitespace, comments).
    pub extra: bool,
}

/// Which lexer transitions and external tokens are active in a state.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
pub struct LexMode {
    pub lex_state: LexStateId,
    /// Index into the external-token lists; `0` means no external tokens.
    pub external_lex_state: u16,
}

/// One action of a table entry. Entries may hold several actions,
/// which is what forks the stack.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum ParseAction {
    Shift {
        state: StateId,
        /// Shift without changing state (extras like comments).
        extra: bool,
    },
    Reduce {
        symbol: Symbol,
        child_count: u16,
        dynamic_precedence: i32,
        alias_sequence_id: u16,
        /// Produced under a conflict; the resulting tree's state is untrusted.
        fragile: bool,
    },
    Accept,
    Recover,
}

impl ParseAction {
    pub fn is_extra(&self) -> bool {
        matches!(self, ParseAction::Shift { extra: true, .. })
    }
}

/// The actions and reuse hints for one `(state, symbol)` pair.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct EntryData {
    pub actions: Vec<ParseAction>,
    /// Whether a token first lexed for this entry may be reused in other
    /// states with a compatible lex mode.
    pub is_reusable: bool,
    /// Whether the token's extent depended on what followed it.
    pub depends_on_lookahead: bool,
}

impl EntryData {
    pub fn new(actions: Vec<ParseAction>) -> Self {
        Self {
            actions,
            is_reusable: true,
            depends_on_lookahead: false,
        }
    }

    pub fn not_reusable(mut self) -> Self {
        self.is_reusable = false;
        self
    }

    pub fn depending_on_lookahead(mut self) -> Self {
        self.depends_on_lookahead = true;
        self
    }
}

/// A borrowed view of a table entry; empty for absent `(state, symbol)` pairs.
#[derive(Clone, Copy, Debug)]
pub struct TableEntry<'a> {
    pub actions: &'a [ParseAction],
    pub is_reusable: bool,
    pub depends_on_lookahead: bool,
}

impl TableEntry<'_> {
    pub const EMPTY: TableEntry<'static> = TableEntry {
        actions: &[],
        is_reusable: false,
        depends_on_lookahead: false,
    };
}

/// One row of the parse table: the entries for a single state, sorted by
/// symbol for binary search.
#[derive(Clone, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
pub struct StateRow {
    entries: Vec<(Symbol, EntryData)>,
}

impl StateRow {
    pub fn new(mut entries: Vec<(Symbol, EntryData)>) -> Self {
        entries.sort_by_key(|(symbol, _)| *symbol);
        debug_assert!(
            entries.windows(2).all(|w| w[0].0 != w[1].0),
            "duplicate symbol in state row"
        );
        Self { entries }
    }

    pub fn lookup(&self, symbol: Symbol) -> Option<&EntryData> {
        self.entries
            .binary_search_by_key(&symbol, |(sym, _)| *sym)
            .ok()
            .map(|idx| &self.entries[idx].1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Symbol, &EntryData)> {
        self.entries.iter().map(|(sym, entry)| (*sym, entry))
    }
}

/// The data portion of a language: everything except the lex function
/// and external scanner. Serializable with a compact binary format.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LanguageTables {
    pub name: String,
    /// Names indexed by symbol id; index 0 is the end-of-input sentinel.
    pub symbol_names: Vec<String>,
    pub symbol_metadata: Vec<SymbolMetadata>,
    /// Symbols below this id are terminals.
    pub token_count: u16,
    /// Action rows indexed by state. Non-terminal entries hold the goto
    /// shifts consulted by `next_state`.
    pub states: Vec<StateRow>,
    /// Lex mode per state; same length as `states`.
    pub lex_modes: Vec<LexMode>,
    /// Maps an external scanner's token index to a grammar symbol.
    pub external_symbol_map: Vec<Symbol>,
    /// Valid-token masks indexed by `external_lex_state`; index 0 unused.
    pub external_token_lists: Vec<Vec<bool>>,
    /// Per-child alias overrides indexed by alias sequence id; id 0 is
    /// the empty sequence.
    pub alias_sequences: Vec<Vec<Option<Symbol>>>,
}

impl LanguageTables {
    /// Deserialize tables from their binary format.
    pub fn from_binary(bytes: &[u8]) -> Result<Self, LanguageError> {
        postcard::from_bytes(bytes).map_err(LanguageError::Binary)
    }

    /// Serialize tables to their binary format.
    pub fn to_binary(&self) -> Vec<u8> {
        postcard::to_allocvec(self).expect("serialization should not fail")
    }

    /// Check cross-table consistency.
    pub fn validate(&self) -> Result<(), LanguageError> {
        if self.states.len() < 2 {
            return Err(LanguageError::TooFewStates(self.states.len()));
        }
        if self.lex_modes.len() != self.states.len() {
            return Err(LanguageError::LexModeCount {
                states: self.states.len(),
                lex_modes: self.lex_modes.len(),
            });
        }
        if self.symbol_metadata.len() != self.symbol_names.len() {
            return Err(LanguageError::MetadataCount {
                names: self.symbol_names.len(),
                metadata: self.symbol_metadata.len(),
            });
        }
        if (self.token_count as usize) > self.symbol_names.len() {
            return Err(LanguageError::TokenCount {
                token_count: self.token_count,
                symbols: self.symbol_names.len(),
            });
        }
        for mode in &self.lex_modes {
            if mode.external_lex_state != 0
                && (mode.external_lex_state as usize) >= self.external_token_lists.len()
            {
                return Err(LanguageError::ExternalLexState(mode.external_lex_state));
            }
        }
        for (state, row) in self.states.iter().enumerate() {
            for (_, entry) in row.iter() {
                for action in &entry.actions {
                    match *action {
                        ParseAction::Shift { state: target, .. } => {
                            if (target as usize) >= self.states.len() {
                                return Err(LanguageError::ShiftTarget {
                                    state: state as StateId,
                                    target,
                                });
                            }
                        }
                        ParseAction::Reduce {
                            symbol,
                            alias_sequence_id,
                            ..
                        } => {
                            if symbol.index() >= self.symbol_names.len() {
                                return Err(LanguageError::UnknownSymbol(symbol));
                            }
                            if (alias_sequence_id as usize) >= self.alias_sequences.len().max(1) {
                                return Err(LanguageError::AliasSequence(alias_sequence_id));
                            }
                        }
                        ParseAction::Accept | ParseAction::Recover => {}
                    }
                }
            }
        }
        Ok(())
    }
}

/// Failure to install a language.
#[derive(Debug, thiserror::Error)]
pub enum LanguageError {
    #[error("tables must reserve states 0 (start) and 1 (error); got {0} states")]
    TooFewStates(usize),
    #[error("state count {states} does not match lex mode count {lex_modes}")]
    LexModeCount { states: usize, lex_modes: usize },
    #[error("symbol name count {names} does not match metadata count {metadata}")]
    MetadataCount { names: usize, metadata: usize },
    #[error("token count {token_count} exceeds symbol count {symbols}")]
    TokenCount { token_count: u16, symbols: usize },
    #[error("shift in state {state} targets out-of-range state {target}")]
    ShiftTarget { state: StateId, target: StateId },
    #[error("reduce refers to unknown symbol {0:?}")]
    UnknownSymbol(Symbol),
    #[error("alias sequence id {0} out of range")]
    AliasSequence(u16),
    #[error("external lex state {0} out of range")]
    ExternalLexState(u16),
    #[error("binary decode error: {0}")]
    Binary(postcard::Error),
}

/// The character-level surface a lex function or external scanner sees.
///
/// Implemented by the runtime's lexer. `advance` consumes the lookahead
/// into the current token; `skip` consumes it as padding (whitespace
/// before the token starts); `mark_end` pins the token end at the
/// current position so further lookahead does not extend the token.
pub trait Scanner {
    /// The next character, or `None` at end of input.
    fn lookahead(&self) -> Option<char>;
    fn advance(&mut self);
    fn skip(&mut self);
    fn mark_end(&mut self);
    fn column(&self) -> u32;
}

/// The internal lex function: recognize one token starting in the given
/// lex state, returning its symbol, or `None` if no token matches.
pub type LexFn = fn(&mut dyn Scanner, LexStateId) -> Option<Symbol>;

/// A language-supplied scanner for tokens the tabular lexer cannot
/// recognize (indentation, string interpolation, heredocs).
///
/// Scanner state is serialized into the leaves it produces; before each
/// scan the runtime restores the state serialized at the previous
/// external token, so scans are deterministic given a tree position.
pub trait ExternalScanner {
    /// Attempt to recognize one of the `valid_tokens` (indexed as in
    /// `external_symbol_map`). Returns the recognized token index.
    fn scan(&mut self, scanner: &mut dyn Scanner, valid_tokens: &[bool]) -> Option<u16>;

    /// Append the current scanner state to `buf`.
    fn serialize(&self, buf: &mut Vec<u8>);

    /// Restore state from a blob produced by `serialize`. An empty blob
    /// resets to the initial state.
    fn deserialize(&mut self, state: &[u8]);
}

/// Factory instantiating a fresh external scanner per parser.
pub type ExternalScannerFactory = Box<dyn Fn() -> Box<dyn ExternalScanner> + Send + Sync>;

/// A complete language: tables plus the code that lexes it.
pub struct Language {
    tables: LanguageTables,
    lex_fn: LexFn,
    external_factory: Option<ExternalScannerFactory>,
}

impl Language {
    /// Build a language from validated tables and a lex function.
    pub fn new(tables: LanguageTables, lex_fn: LexFn) -> Result<Self, LanguageError> {
        tables.validate()?;
        Ok(Self {
            tables,
            lex_fn,
            external_factory: None,
        })
    }

    /// Attach an external scanner factory.
    pub fn with_external_scanner(mut self, factory: ExternalScannerFactory) -> Self {
        self.external_factory = Some(factory);
        self
    }

    pub fn name(&self) -> &str {
        &self.tables.name
    }

    pub fn tables(&self) -> &LanguageTables {
        &self.tables
    }

    pub fn symbol_count(&self) -> usize {
        self.tables.symbol_names.len()
    }

    pub fn token_count(&self) -> u16 {
        self.tables.token_count
    }

    pub fn state_count(&self) -> usize {
        self.tables.states.len()
    }

    pub fn symbol_name(&self, symbol: Symbol) -> &str {
        if symbol == Symbol::ERROR {
            "ERROR"
        } else {
            self.tables
                .symbol_names
                .get(symbol.index())
                .map_or("?", |name| name.as_str())
        }
    }

    pub fn symbol_metadata(&self, symbol: Symbol) -> SymbolMetadata {
        if symbol == Symbol::ERROR {
            SymbolMetadata {
                visible: true,
                named: true,
                extra: false,
            }
        } else {
            self.tables
                .symbol_metadata
                .get(symbol.index())
                .copied()
                .unwrap_or_default()
        }
    }

    /// The table entry for `(state, symbol)`; empty if absent.
    pub fn table_entry(&self, state: StateId, symbol: Symbol) -> TableEntry<'_> {
        match self
            .tables
            .states
            .get(state as usize)
            .and_then(|row| row.lookup(symbol))
        {
            Some(entry) => TableEntry {
                actions: &entry.actions,
                is_reusable: entry.is_reusable,
                depends_on_lookahead: entry.depends_on_lookahead,
            },
            None => TableEntry::EMPTY,
        }
    }

    /// The actions for `(state, symbol)`; empty if absent.
    pub fn actions(&self, state: StateId, symbol: Symbol) -> &[ParseAction] {
        self.table_entry(state, symbol).actions
    }

    /// The state entered after `symbol` is pushed in `state`: the target
    /// of the entry's first non-extra shift, or the start state if none.
    pub fn next_state(&self, state: StateId, symbol: Symbol) -> StateId {
        for action in self.actions(state, symbol) {
            if let ParseAction::Shift {
                state: target,
                extra: false,
            } = *action
            {
                return target;
            }
        }
        START_STATE
    }

    pub fn lex_mode(&self, state: StateId) -> LexMode {
        self.tables
            .lex_modes
            .get(state as usize)
            .copied()
            .unwrap_or_default()
    }

    /// The valid-token mask for an external lex state; `None` when the
    /// state enables no external tokens.
    pub fn enabled_external_tokens(&self, external_lex_state: u16) -> Option<&[bool]> {
        if external_lex_state == 0 {
            None
        } else {
            self.tables
                .external_token_lists
                .get(external_lex_state as usize)
                .map(|list| list.as_slice())
        }
    }

    /// Map an external scanner token index to its grammar symbol.
    pub fn external_symbol(&self, index: u16) -> Symbol {
        self.tables.external_symbol_map[index as usize]
    }

    /// The alias applied to the `structural_index`-th non-extra child of
    /// a node produced with `alias_sequence_id`.
    pub fn alias_at(&self, alias_sequence_id: u16, structural_index: u32) -> Option<Symbol> {
        if alias_sequence_id == 0 {
            return None;
        }
        self.tables
            .alias_sequences
            .get(alias_sequence_id as usize)?
            .get(structural_index as usize)
            .copied()
            .flatten()
    }

    pub fn lex(&self, scanner: &mut dyn Scanner, lex_state: LexStateId) -> Option<Symbol> {
        (self.lex_fn)(scanner, lex_state)
    }

    pub fn has_external_scanner(&self) -> bool {
        self.external_factory.is_some()
    }

    /// Instantiate this language's external scanner, if it has one.
    pub fn create_external_scanner(&self) -> Option<Box<dyn ExternalScanner>> {
        self.external_factory.as_ref().map(|factory| factory())
    }
}

impl std::fmt::Debug for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Language")
            .field("name", &self.tables.name)
            .field("symbols", &self.tables.symbol_names.len())
            .field("states", &self.tables.states.len())
            .field("external_scanner", &self.external_factory.is_some())
            .finish()
    }
}
