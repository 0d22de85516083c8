//! Tracing hooks for parser execution.
//!
//! The tracer is a zero-cost abstraction: with [`NoopTracer`] every
//! hook is an `#[inline(always)]` empty function and the calls compile
//! away. Formatting and name resolution happen inside the tracer, so
//! the driver hands over raw ids and lets the implementation decide
//! what to keep. [`CollectTracer`] gathers formatted lines for tests
//! and debugging sessions.

use canopy_core::language::{Language, StateId, Symbol};
use canopy_core::length::Length;

use crate::stack::StackVersion;

/// Hooks called at each parser decision point.
pub trait Tracer {
    /// A version is about to advance at the given state and position.
    fn trace_process(&mut self, version: StackVersion, state: StateId, position: Length);

    /// The lexer produced a token.
    fn trace_lexed(&mut self, language: &Language, symbol: Symbol, size: Length);

    /// A token or subtree was taken from the previous tree.
    fn trace_reuse(&mut self, language: &Language, symbol: Symbol);

    /// A token was shifted.
    fn trace_shift(&mut self, state: StateId, extra: bool);

    /// A reduction produced a new parent node.
    fn trace_reduce(&mut self, language: &Language, symbol: Symbol, child_count: u16);

    /// A version accepted.
    fn trace_accept(&mut self, version: StackVersion);

    /// A version entered error handling.
    fn trace_error(&mut self, language: &Language, lookahead: Symbol);

    /// Recovery rolled back to a previous state.
    fn trace_recover(&mut self, state: StateId, depth: u32);

    /// A token was skipped while in the error state.
    fn trace_skip(&mut self, language: &Language, symbol: Symbol);

    /// The condense pass changed the version set.
    fn trace_condense(&mut self, version_count: usize);
}

/// Tracer that does nothing; optimized away completely.
pub struct NoopTracer;

impl Tracer for NoopTracer {
    #[inline(always)]
    fn trace_process(&mut self, _version: StackVersion, _state: StateId, _position: Length) {}

    #[inline(always)]
    fn trace_lexed(&mut self, _language: &Language, _symbol: Symbol, _size: Length) {}

    #[inline(always)]
    fn trace_reuse(&mut self, _language: &Language, _symbol: Symbol) {}

    #[inline(always)]
    fn trace_shift(&mut self, _state: StateId, _extra: bool) {}

    #[inline(always)]
    fn trace_reduce(&mut self, _language: &Language, _symbol: Symbol, _child_count: u16) {}

    #[inline(always)]
    fn trace_accept(&mut self, _version: StackVersion) {}

    #[inline(always)]
    fn trace_error(&mut self, _language: &Language, _lookahead: Symbol) {}

    #[inline(always)]
    fn trace_recover(&mut self, _state: StateId, _depth: u32) {}

    #[inline(always)]
    fn trace_skip(&mut self, _language: &Language, _symbol: Symbol) {}

    #[inline(always)]
    fn trace_condense(&mut self, _version_count: usize) {}
}

/// Tracer that collects one formatted line per event. Clones share the
/// same line buffer, so a test can keep a handle while the parser owns
/// the tracer.
#[derive(Default, Clone)]
pub struct CollectTracer {
    lines: std::rc::Rc<std::cell::RefCell<Vec<String>>>,
}

impl CollectTracer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.borrow().clone()
    }

    pub fn take_lines(&mut self) -> Vec<String> {
        std::mem::take(&mut *self.lines.borrow_mut())
    }
}

impl Tracer for CollectTracer {
    fn trace_process(&mut self, version: StackVersion, state: StateId, position: Length) {
        self.lines.borrow_mut().push(format!(
            "process version:{version} state:{state} row:{} col:{}",
            position.extent.row, position.extent.column
        ));
    }

    fn trace_lexed(&mut self, language: &Language, symbol: Symbol, size: Length) {
        self.lines.borrow_mut().push(format!(
            "lexed sym:{} size:{}",
            language.symbol_name(symbol),
            size.bytes
        ));
    }

    fn trace_reuse(&mut self, language: &Language, symbol: Symbol) {
        self.lines
            .borrow_mut()
            .push(format!("reuse sym:{}", language.symbol_name(symbol)));
    }

    fn trace_shift(&mut self, state: StateId, extra: bool) {
        if extra {
            self.lines.borrow_mut().push("shift_extra".to_string());
        } else {
            self.lines.borrow_mut().push(format!("shift state:{state}"));
        }
    }

    fn trace_reduce(&mut self, language: &Language, symbol: Symbol, child_count: u16) {
        self.lines.borrow_mut().push(format!(
            "reduce sym:{} child_count:{child_count}",
            language.symbol_name(symbol)
        ));
    }

    fn trace_accept(&mut self, version: StackVersion) {
        self.lines.borrow_mut().push(format!("accept version:{version}"));
    }

    fn trace_error(&mut self, language: &Language, lookahead: Symbol) {
        self.lines.borrow_mut().push(format!(
            "handle_error lookahead:{}",
            language.symbol_name(lookahead)
        ));
    }

    fn trace_recover(&mut self, state: StateId, depth: u32) {
        self.lines.borrow_mut().push(format!("recover state:{state} depth:{depth}"));
    }

    fn trace_skip(&mut self, language: &Language, symbol: Symbol) {
        self.lines
            .borrow_mut()
            .push(format!("skip sym:{}", language.symbol_name(symbol)));
    }

    fn trace_condense(&mut self, version_count: usize) {
        self.lines
            .borrow_mut()
            .push(format!("condense version_count:{version_count}"));
    }
}
