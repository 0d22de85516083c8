#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

//! Incremental GLR parser runtime.
//!
//! Canopy parses with a precompiled language table: given an input it
//! produces a concrete syntax tree, and given a previously produced
//! tree plus a description of edits it reparses efficiently by reusing
//! unchanged subtrees. The runtime is language-agnostic; everything
//! grammar-specific lives in the [`canopy_core::Language`] it is given.
//!
//! The moving parts:
//! - `pool` / `tree`: slab-allocated, reference-counted tree nodes
//! - `stack`: the graph-structured stack shared by parallel parses
//! - `lexer` / `reuse`: the lookahead pipeline (reuse cursor, token
//!   cache, lexing)
//! - `parser`: the GLR drive loop, ambiguity resolution, and error
//!   recovery
//! - `edit`: adjusting a previous tree to an edited input
//! - `trace`: zero-cost instrumentation hooks

pub mod edit;
pub mod error_costs;
pub mod lexer;
pub mod parser;
pub mod pool;
pub mod reuse;
pub mod stack;
pub mod trace;
pub mod tree;

#[cfg(test)]
mod test_language;

#[cfg(test)]
mod reuse_tests;
#[cfg(test)]
mod tree_tests;

pub use edit::{InputEdit, edit};
pub use lexer::Lexer;
pub use parser::Parser;
pub use pool::{TreeId, TreePool};
pub use reuse::{ReusableNode, TokenCache};
pub use stack::{Stack, StackSlice, StackSummaryEntry, StackVersion};
pub use trace::{CollectTracer, NoopTracer, Tracer};
pub use tree::Tree;
