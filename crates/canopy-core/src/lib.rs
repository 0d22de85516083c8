#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

//! Core data model for the Canopy incremental GLR parser runtime.
//!
//! Three pieces:
//! - **Positions** (`length`): byte/char/row/column extents and their
//!   arithmetic.
//! - **Language tables** (`language`): the precompiled action tables,
//!   lex modes, symbol metadata, and scanner traits that drive the
//!   runtime; serializable with a compact binary format.
//! - **Input** (`input`): the pull-based byte source a parse reads from.
//!
//! The runtime itself lives in the `canopy-runtime` crate.

pub mod input;
pub mod language;
pub mod length;


pub use input::Input;
pub use language::{
    ERROR_STATE, EntryData, ExternalScanner, ExternalScannerFactory, Language, LanguageError,
    LanguageTables, LexFn, LexMode, LexStateId, ParseAction, START_STATE, STATE_NONE, Scanner,
    StateId, StateRow, Symbol, SymbolMetadata, TableEntry,
};
pub use length::{Length, Point};
