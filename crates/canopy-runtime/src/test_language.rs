//! Hand-built languages for driver tests.
//!
//! Each module constructs the full table set for one tiny grammar,
//! with a handwritten lex function. State 0 is the start state and
//! state 1 the recovery state in every table, as the runtime expects.

use canopy_core::language::{
    EntryData, ExternalScanner, Language, LanguageTables, LexMode, ParseAction, Scanner, StateRow,
    Symbol, SymbolMetadata,
};

pub fn shift(state: u16) -> ParseAction {
    ParseAction::Shift {
        state,
        extra: false,
    }
}

pub fn extra_shift() -> ParseAction {
    ParseAction::Shift {
        state: 0,
        extra: true,
    }
}

pub fn reduce(symbol: Symbol, child_count: u16, dynamic_precedence: i32, fragile: bool) -> ParseAction {
    ParseAction::Reduce {
        symbol,
        child_count,
        dynamic_precedence,
        alias_sequence_id: 0,
        fragile,
    }
}

pub fn meta(visible: bool, named: bool, extra: bool) -> SymbolMetadata {
    SymbolMetadata {
        visible,
        named,
        extra,
    }
}

fn skip_spaces(s: &mut dyn Scanner) {
    while matches!(s.lookahead(), Some(' ') | Some('\n') | Some('\t')) {
        s.skip();
    }
}

/// Arrays of numbers with comment extras:
///
/// ```text
/// document → value
/// value    → number | array
/// array    → '[' ']' | '[' elements ']'
/// elements → value | elements ',' value
/// comment  → '#' ... end of line   (extra)
/// ```
pub mod list {
    use super::*;

    pub const END: Symbol = Symbol(0);
    pub const NUMBER: Symbol = Symbol(1);
    pub const LBRACKET: Symbol = Symbol(2);
    pub const RBRACKET: Symbol = Symbol(3);
    pub const COMMA: Symbol = Symbol(4);
    pub const COMMENT: Symbol = Symbol(5);
    pub const DOCUMENT: Symbol = Symbol(6);
    pub const VALUE: Symbol = Symbol(7);
    pub const ARRAY: Symbol = Symbol(8);
    pub const ELEMENTS: Symbol = Symbol(9);

    fn lex(s: &mut dyn Scanner, _state: u16) -> Option<Symbol> {
        skip_spaces(s);
        match s.lookahead() {
            None => {
                s.mark_end();
                Some(END)
            }
            Some('[') => {
                s.advance();
                s.mark_end();
                Some(LBRACKET)
            }
            Some(']') => {
                s.advance();
                s.mark_end();
                Some(RBRACKET)
            }
            Some(',') => {
                s.advance();
                s.mark_end();
                Some(COMMA)
            }
            Some('#') => {
                while !matches!(s.lookahead(), None | Some('\n')) {
                    s.advance();
                }
                s.mark_end();
                Some(COMMENT)
            }
            Some(c) if c.is_ascii_digit() => {
                while matches!(s.lookahead(), Some(c) if c.is_ascii_digit()) {
                    s.advance();
                }
                s.mark_end();
                Some(NUMBER)
            }
            Some(_) => None,
        }
    }

    fn row(mut entries: Vec<(Symbol, EntryData)>) -> StateRow {
        entries.push((COMMENT, EntryData::new(vec![extra_shift()])));
        StateRow::new(entries)
    }

    pub fn language() -> Language {
        let value_follow = [END, COMMA, RBRACKET];
        let reduce_on = |symbols: &[Symbol], action: ParseAction| -> Vec<(Symbol, EntryData)> {
            symbols
                .iter()
                .map(|&sym| (sym, EntryData::new(vec![action])))
                .collect()
        };

        let states = vec![
            // 0: start
            row(vec![
                (NUMBER, EntryData::new(vec![shift(3)])),
                (LBRACKET, EntryData::new(vec![shift(4)])),
                (VALUE, EntryData::new(vec![shift(2)])),
                (ARRAY, EntryData::new(vec![shift(5)])),
                (DOCUMENT, EntryData::new(vec![shift(6)])),
            ]),
            // 1: error recovery
            row(vec![
                (END, EntryData::new(vec![ParseAction::Recover])),
                (NUMBER, EntryData::new(vec![ParseAction::Recover])),
                (LBRACKET, EntryData::new(vec![ParseAction::Recover])),
                (RBRACKET, EntryData::new(vec![ParseAction::Recover])),
                (COMMA, EntryData::new(vec![ParseAction::Recover])),
            ]),
            // 2: document → value •
            row(reduce_on(&[END], reduce(DOCUMENT, 1, 0, false))),
            // 3: value → number •
            row(reduce_on(&value_follow, reduce(VALUE, 1, 0, false))),
            // 4: array → '[' •
            row(vec![
                (RBRACKET, EntryData::new(vec![shift(7)])),
                (NUMBER, EntryData::new(vec![shift(3)])),
                (LBRACKET, EntryData::new(vec![shift(4)])),
                (VALUE, EntryData::new(vec![shift(8)])),
                (ARRAY, EntryData::new(vec![shift(5)])),
                (ELEMENTS, EntryData::new(vec![shift(9)])),
            ]),
            // 5: value → array •
            row(reduce_on(&value_follow, reduce(VALUE, 1, 0, false))),
            // 6: document •
            row(vec![(END, EntryData::new(vec![ParseAction::Accept]))]),
            // 7: array → '[' ']' •
            row(reduce_on(&value_follow, reduce(ARRAY, 2, 0, false))),
            // 8: elements → value •
            row(reduce_on(&[COMMA, RBRACKET], reduce(ELEMENTS, 1, 0, false))),
            // 9: array → '[' elements • ']'   |   elements → elements • ',' value
            row(vec![
                (RBRACKET, EntryData::new(vec![shift(10)])),
                (COMMA, EntryData::new(vec![shift(11)])),
            ]),
            // 10: array → '[' elements ']' •
            row(reduce_on(&value_follow, reduce(ARRAY, 3, 0, false))),
            // 11: elements → elements ',' • value
            row(vec![
                (NUMBER, EntryData::new(vec![shift(3)])),
                (LBRACKET, EntryData::new(vec![shift(4)])),
                (VALUE, EntryData::new(vec![shift(12)])),
                (ARRAY, EntryData::new(vec![shift(5)])),
            ]),
            // 12: elements → elements ',' value •
            row(reduce_on(&[COMMA, RBRACKET], reduce(ELEMENTS, 3, 0, false))),
        ];

        let tables = LanguageTables {
            name: "list".to_string(),
            symbol_names: vec![
                "end".into(),
                "number".into(),
                "[".into(),
                "]".into(),
                ",".into(),
                "comment".into(),
                "document".into(),
                "value".into(),
                "array".into(),
                "elements".into(),
            ],
            symbol_metadata: vec![
                meta(false, false, false),
                meta(true, true, false),
                meta(true, false, false),
                meta(true, false, false),
                meta(true, false, false),
                meta(true, true, true),
                meta(true, true, false),
                meta(false, false, false),
                meta(true, true, false),
                meta(false, false, false),
            ],
            token_count: 6,
            lex_modes: vec![LexMode::default(); states.len()],
            states,
            external_symbol_map: vec![],
            external_token_lists: vec![vec![]],
            alias_sequences: vec![vec![]],
        };
        Language::new(tables, lex).expect("list tables are valid")
    }
}

/// Two rules covering the same string, distinguished only by dynamic
/// precedence:
///
/// ```text
/// document → expr
/// expr     → number number   (dynamic precedence 5)
/// expr     → pair
/// pair     → number number
/// ```
pub mod pairs {
    use super::*;

    pub const END: Symbol = Symbol(0);
    pub const NUMBER: Symbol = Symbol(1);
    pub const DOCUMENT: Symbol = Symbol(2);
    pub const EXPR: Symbol = Symbol(3);
    pub const PAIR: Symbol = Symbol(4);

    fn lex(s: &mut dyn Scanner, _state: u16) -> Option<Symbol> {
        skip_spaces(s);
        match s.lookahead() {
            None => {
                s.mark_end();
                Some(END)
            }
            Some(c) if c.is_ascii_digit() => {
                while matches!(s.lookahead(), Some(c) if c.is_ascii_digit()) {
                    s.advance();
                }
                s.mark_end();
                Some(NUMBER)
            }
            Some(_) => None,
        }
    }

    pub fn language() -> Language {
        let states = vec![
            // 0: start
            StateRow::new(vec![
                (NUMBER, EntryData::new(vec![shift(2)])),
                (EXPR, EntryData::new(vec![shift(3)])),
                (PAIR, EntryData::new(vec![shift(4)])),
                (DOCUMENT, EntryData::new(vec![shift(5)])),
            ]),
            // 1: error recovery
            StateRow::new(vec![
                (END, EntryData::new(vec![ParseAction::Recover])),
                (NUMBER, EntryData::new(vec![ParseAction::Recover])),
            ]),
            // 2: after the first number
            StateRow::new(vec![(NUMBER, EntryData::new(vec![shift(6)]))]),
            // 3: document → expr •
            StateRow::new(vec![(END, EntryData::new(vec![reduce(DOCUMENT, 1, 0, false)]))]),
            // 4: expr → pair •
            StateRow::new(vec![(END, EntryData::new(vec![reduce(EXPR, 1, 0, false)]))]),
            // 5: document •
            StateRow::new(vec![(END, EntryData::new(vec![ParseAction::Accept]))]),
            // 6: the ambiguous point: both rules end here
            StateRow::new(vec![(
                END,
                EntryData::new(vec![
                    reduce(EXPR, 2, 5, true),
                    reduce(PAIR, 2, 0, true),
                ]),
            )]),
        ];

        let tables = LanguageTables {
            name: "pairs".to_string(),
            symbol_names: vec![
                "end".into(),
                "number".into(),
                "document".into(),
                "expr".into(),
                "pair".into(),
            ],
            symbol_metadata: vec![
                meta(false, false, false),
                meta(true, true, false),
                meta(true, true, false),
                meta(true, true, false),
                meta(true, true, false),
            ],
            token_count: 2,
            lex_modes: vec![LexMode::default(); states.len()],
            states,
            external_symbol_map: vec![],
            external_token_lists: vec![vec![]],
            alias_sequences: vec![vec![]],
        };
        Language::new(tables, lex).expect("pairs tables are valid")
    }
}

/// The dangling-else grammar, with a shift/reduce conflict after
/// `if stmt • else`:
///
/// ```text
/// document → stmt
/// stmt     → if_stmt | 'x'
/// if_stmt  → 'if' stmt | 'if' stmt 'else' stmt
/// ```
pub mod dangling_else {
    use super::*;

    pub const END: Symbol = Symbol(0);
    pub const IF: Symbol = Symbol(1);
    pub const ELSE: Symbol = Symbol(2);
    pub const X: Symbol = Symbol(3);
    pub const DOCUMENT: Symbol = Symbol(4);
    pub const STMT: Symbol = Symbol(5);
    pub const IF_STMT: Symbol = Symbol(6);

    fn lex(s: &mut dyn Scanner, _state: u16) -> Option<Symbol> {
        skip_spaces(s);
        match s.lookahead() {
            None => {
                s.mark_end();
                Some(END)
            }
            Some(c) if c.is_ascii_alphabetic() => {
                let mut word = String::new();
                while let Some(c) = s.lookahead() {
                    if !c.is_ascii_alphabetic() {
                        break;
                    }
                    word.push(c);
                    s.advance();
                }
                s.mark_end();
                match word.as_str() {
                    "if" => Some(IF),
                    "else" => Some(ELSE),
                    "x" => Some(X),
                    _ => None,
                }
            }
            Some(_) => None,
        }
    }

    pub fn language() -> Language {
        let stmt_follow = [END, ELSE];
        let reduce_on = |symbols: &[Symbol], action: ParseAction| -> Vec<(Symbol, EntryData)> {
            symbols
                .iter()
                .map(|&sym| (sym, EntryData::new(vec![action])))
                .collect()
        };

        let states = vec![
            // 0: start
            StateRow::new(vec![
                (IF, EntryData::new(vec![shift(2)])),
                (X, EntryData::new(vec![shift(3)])),
                (STMT, EntryData::new(vec![shift(4)])),
                (IF_STMT, EntryData::new(vec![shift(5)])),
                (DOCUMENT, EntryData::new(vec![shift(6)])),
            ]),
            // 1: error recovery
            StateRow::new(vec![
                (END, EntryData::new(vec![ParseAction::Recover])),
                (IF, EntryData::new(vec![ParseAction::Recover])),
                (ELSE, EntryData::new(vec![ParseAction::Recover])),
                (X, EntryData::new(vec![ParseAction::Recover])),
            ]),
            // 2: if_stmt → 'if' • stmt
            StateRow::new(vec![
                (IF, EntryData::new(vec![shift(2)])),
                (X, EntryData::new(vec![shift(3)])),
                (STMT, EntryData::new(vec![shift(7)])),
                (IF_STMT, EntryData::new(vec![shift(5)])),
            ]),
            // 3: stmt → 'x' •
            StateRow::new(reduce_on(&stmt_follow, reduce(STMT, 1, 0, false))),
            // 4: document → stmt •
            StateRow::new(vec![(END, EntryData::new(vec![reduce(DOCUMENT, 1, 0, false)]))]),
            // 5: stmt → if_stmt •
            StateRow::new(reduce_on(&stmt_follow, reduce(STMT, 1, 0, false))),
            // 6: document •
            StateRow::new(vec![(END, EntryData::new(vec![ParseAction::Accept]))]),
            // 7: the dangling else: shift/reduce conflict
            StateRow::new(vec![
                (END, EntryData::new(vec![reduce(IF_STMT, 2, 0, false)])),
                (
                    ELSE,
                    EntryData::new(vec![reduce(IF_STMT, 2, 0, true), shift(8)]),
                ),
            ]),
            // 8: if_stmt → 'if' stmt 'else' • stmt
            StateRow::new(vec![
                (IF, EntryData::new(vec![shift(2)])),
                (X, EntryData::new(vec![shift(3)])),
                (STMT, EntryData::new(vec![shift(9)])),
                (IF_STMT, EntryData::new(vec![shift(5)])),
            ]),
            // 9: if_stmt → 'if' stmt 'else' stmt •
            StateRow::new(reduce_on(&stmt_follow, reduce(IF_STMT, 4, 0, false))),
        ];

        let tables = LanguageTables {
            name: "dangling_else".to_string(),
            symbol_names: vec![
                "end".into(),
                "if".into(),
                "else".into(),
                "x".into(),
                "document".into(),
                "statement".into(),
                "if_statement".into(),
            ],
            symbol_metadata: vec![
                meta(false, false, false),
                meta(true, false, false),
                meta(true, false, false),
                meta(true, true, false),
                meta(true, true, false),
                meta(false, false, false),
                meta(true, true, false),
            ],
            token_count: 4,
            lex_modes: vec![LexMode::default(); states.len()],
            states,
            external_symbol_map: vec![],
            external_token_lists: vec![vec![]],
            alias_sequences: vec![vec![]],
        };
        Language::new(tables, lex).expect("dangling_else tables are valid")
    }
}

/// Words recognized by an external scanner that counts how many it has
/// produced; the count is the serialized scanner state.
///
/// ```text
/// document → words
/// words    → word | words word
/// ```
pub mod words {
    use super::*;

    pub const END: Symbol = Symbol(0);
    pub const WORD: Symbol = Symbol(1);
    pub const DOCUMENT: Symbol = Symbol(2);
    pub const WORDS: Symbol = Symbol(3);

    pub struct WordScanner {
        count: u8,
    }

    impl ExternalScanner for WordScanner {
        fn scan(&mut self, s: &mut dyn Scanner, valid_tokens: &[bool]) -> Option<u16> {
            if !valid_tokens.first().copied().unwrap_or(false) {
                return None;
            }
            skip_spaces(s);
            if !matches!(s.lookahead(), Some(c) if c.is_ascii_alphabetic()) {
                return None;
            }
            while matches!(s.lookahead(), Some(c) if c.is_ascii_alphabetic()) {
                s.advance();
            }
            s.mark_end();
            self.count = self.count.wrapping_add(1);
            Some(0)
        }

        fn serialize(&self, buf: &mut Vec<u8>) {
            buf.push(self.count);
        }

        fn deserialize(&mut self, state: &[u8]) {
            self.count = state.first().copied().unwrap_or(0);
        }
    }

    fn lex(s: &mut dyn Scanner, _state: u16) -> Option<Symbol> {
        skip_spaces(s);
        match s.lookahead() {
            None => {
                s.mark_end();
                Some(END)
            }
            Some(_) => None,
        }
    }

    pub fn language() -> Language {
        let states = vec![
            // 0: start
            StateRow::new(vec![
                (WORD, EntryData::new(vec![shift(3)])),
                (WORDS, EntryData::new(vec![shift(2)])),
                (DOCUMENT, EntryData::new(vec![shift(4)])),
            ]),
            // 1: error recovery
            StateRow::new(vec![
                (END, EntryData::new(vec![ParseAction::Recover])),
                (WORD, EntryData::new(vec![ParseAction::Recover])),
            ]),
            // 2: document → words •   |   words → words • word
            StateRow::new(vec![
                (WORD, EntryData::new(vec![shift(5)])),
                (END, EntryData::new(vec![reduce(DOCUMENT, 1, 0, false)])),
            ]),
            // 3: words → word •
            StateRow::new(vec![
                (WORD, EntryData::new(vec![reduce(WORDS, 1, 0, false)])),
                (END, EntryData::new(vec![reduce(WORDS, 1, 0, false)])),
            ]),
            // 4: document •
            StateRow::new(vec![(END, EntryData::new(vec![ParseAction::Accept]))]),
            // 5: words → words word •
            StateRow::new(vec![
                (WORD, EntryData::new(vec![reduce(WORDS, 2, 0, false)])),
                (END, EntryData::new(vec![reduce(WORDS, 2, 0, false)])),
            ]),
        ];

        let lex_modes = vec![
            LexMode {
                lex_state: 0,
                external_lex_state: 1,
            };
            states.len()
        ];

        let tables = LanguageTables {
            name: "words".to_string(),
            symbol_names: vec![
                "end".into(),
                "word".into(),
                "document".into(),
                "words".into(),
            ],
            symbol_metadata: vec![
                meta(false, false, false),
                meta(true, true, false),
                meta(true, true, false),
                meta(false, false, false),
            ],
            token_count: 2,
            lex_modes,
            states,
            external_symbol_map: vec![WORD],
            external_token_lists: vec![vec![], vec![true]],
            alias_sequences: vec![vec![]],
        };
        Language::new(tables, lex)
            .expect("words tables are valid")
            .with_external_scanner(Box::new(|| {
                Box::new(WordScanner { count: 0 }) as Box<dyn ExternalScanner>
            }))
    }
}
