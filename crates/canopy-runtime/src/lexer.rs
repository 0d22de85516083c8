//! Character-level bookkeeping over a pull-based input.
//!
//! The lexer owns the current decode position (bytes, chars, rows,
//! columns), the one-codepoint lookahead, and the token start/end
//! marks. Lex functions and external scanners drive it through the
//! [`Scanner`] trait via a [`LexerSession`] that pairs it with the
//! input for the duration of a scan.
//!
//! Bytes are buffered chunk-by-chunk as the input yields them, so a
//! source is free to return arbitrarily short chunks; invalid UTF-8 is
//! decoded as one replacement character per byte.

use canopy_core::input::Input;
use canopy_core::language::Scanner;
use canopy_core::length::Length;

/// Position and token-mark state for one parse.
pub struct Lexer {
    buffer: Vec<u8>,
    buffer_start: u32,
    current_position: Length,
    token_start_position: Length,
    marked_end: Option<Length>,
    lookahead: Option<char>,
    lookahead_bytes: u32,
}

impl Lexer {
    pub fn new() -> Self {
        Self {
            buffer: Vec::new(),
            buffer_start: 0,
            current_position: Length::ZERO,
            token_start_position: Length::ZERO,
            marked_end: None,
            lookahead: None,
            lookahead_bytes: 0,
        }
    }

    pub fn current_position(&self) -> Length {
        self.current_position
    }

    pub fn token_start_position(&self) -> Length {
        self.token_start_position
    }

    /// The token end: the marked position, or the current position if
    /// the lex function never pinned one.
    pub fn token_end_position(&self) -> Length {
        self.marked_end.unwrap_or(self.current_position)
    }

    pub fn lookahead(&self) -> Option<char> {
        self.lookahead
    }

    pub fn at_eof(&self) -> bool {
        self.lookahead.is_none()
    }

    /// Move to an absolute position and refill the lookahead.
    pub fn reset(&mut self, input: &mut dyn Input, position: Length) {
        self.current_position = position;
        self.token_start_position = position;
        self.marked_end = None;
        if position.bytes < self.buffer_start {
            self.buffer.clear();
            self.buffer_start = position.bytes;
        }
        self.fill_lookahead(input);
    }

    /// Begin a token at the current position.
    pub fn start(&mut self) {
        self.token_start_position = self.current_position;
        self.marked_end = None;
    }

    pub fn mark_end(&mut self) {
        self.marked_end = Some(self.current_position);
    }

    /// Consume the lookahead character. With `skip`, the character is
    /// treated as padding and the token start moves past it.
    pub fn advance(&mut self, input: &mut dyn Input, skip: bool) {
        let Some(c) = self.lookahead else {
            return;
        };
        let mut position = self.current_position;
        position.bytes += self.lookahead_bytes;
        position.chars += 1;
        if c == '\n' {
            position.extent.row += 1;
            position.extent.column = 0;
        } else {
            position.extent.column += 1;
        }
        self.current_position = position;
        if skip {
            self.token_start_position = position;
        }
        self.fill_lookahead(input);
    }

    /// Consume the rest of the input; returns the end position.
    pub fn advance_to_end(&mut self, input: &mut dyn Input) -> Length {
        while self.lookahead.is_some() {
            self.advance(input, false);
        }
        self.current_position
    }

    fn ensure_bytes(&mut self, input: &mut dyn Input, end: u32) {
        while (self.buffer_start as usize + self.buffer.len()) < end as usize {
            let offset = self.buffer_start + self.buffer.len() as u32;
            let chunk = input.read(offset);
            if chunk.is_empty() {
                return;
            }
            self.buffer.extend_from_slice(chunk);
        }
    }

    fn byte_at(&mut self, input: &mut dyn Input, offset: u32) -> Option<u8> {
        self.ensure_bytes(input, offset + 1);
        self.buffer
            .get((offset - self.buffer_start) as usize)
            .copied()
    }

    fn fill_lookahead(&mut self, input: &mut dyn Input) {
        let offset = self.current_position.bytes;
        let Some(first) = self.byte_at(input, offset) else {
            self.lookahead = None;
            self.lookahead_bytes = 0;
            return;
        };

        let len = utf8_sequence_len(first);
        let mut bytes = [0u8; 4];
        bytes[0] = first;
        let mut have = 1;
        for i in 1..len {
            match self.byte_at(input, offset + i as u32) {
                Some(byte) => {
                    bytes[i] = byte;
                    have += 1;
                }
                None => break,
            }
        }

        match std::str::from_utf8(&bytes[..have]) {
            Ok(s) if !s.is_empty() => {
                let c = s.chars().next().unwrap();
                self.lookahead = Some(c);
                self.lookahead_bytes = c.len_utf8() as u32;
            }
            _ => {
                // Not valid UTF-8 here: consume one byte as U+FFFD.
                self.lookahead = Some(char::REPLACEMENT_CHARACTER);
                self.lookahead_bytes = 1;
            }
        }
    }
}

impl Default for Lexer {
    fn default() -> Self {
        Self::new()
    }
}

fn utf8_sequence_len(first: u8) -> usize {
    match first {
        0x00..=0x7f => 1,
        0xc0..=0xdf => 2,
        0xe0..=0xef => 3,
        0xf0..=0xf7 => 4,
        _ => 1,
    }
}

/// A lexer paired with its input for the duration of one scan; the
/// surface lex functions and external scanners see.
pub struct LexerSession<'a> {
    pub(crate) lexer: &'a mut Lexer,
    pub(crate) input: &'a mut dyn Input,
}

impl<'a> LexerSession<'a> {
    pub fn new(lexer: &'a mut Lexer, input: &'a mut dyn Input) -> Self {
        Self { lexer, input }
    }
}

impl Scanner for LexerSession<'_> {
    fn lookahead(&self) -> Option<char> {
        self.lexer.lookahead
    }

    fn advance(&mut self) {
        self.lexer.advance(self.input, false);
    }

    fn skip(&mut self) {
        self.lexer.advance(self.input, true);
    }

    fn mark_end(&mut self) {
        self.lexer.mark_end();
    }

    fn column(&self) -> u32 {
        self.lexer.current_position.extent.column
    }
}
