//! Terminal output sanitizer.
//!
//! Raw PTY output is full of CSI color codes, OSC title updates, cursor
//! movement and carriage returns. None of it is useful to a caller reading a
//! transcript, and all of it gets in the way of prompt matching. The
//! sanitizer runs output through a `vte` parser and keeps only printable
//! characters, newlines and tabs.
//!
//! A [`Sanitizer`] keeps parser state between calls, so an escape sequence
//! or a UTF-8 code point split across two chunks is still handled.

use vte::{Parser, Perform};

/// Stateful escape/control sequence stripper for one byte stream.
pub struct Sanitizer {
    parser: Parser,
}

impl Sanitizer {
    /// Create a sanitizer in the ground state.
    pub fn new() -> Self {
        Self {
            parser: Parser::new(),
        }
    }

    /// Sanitize the next chunk of the stream.
    pub fn sanitize(&mut self, chunk: &[u8]) -> String {
        let mut text = Text {
            out: String::with_capacity(chunk.len()),
        };
        self.parser.advance(&mut text, chunk);
        text.out
    }
}

impl Default for Sanitizer {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Sanitizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sanitizer").finish_non_exhaustive()
    }
}

/// Sanitize a complete buffer in one go.
pub fn strip(data: &[u8]) -> String {
    Sanitizer::new().sanitize(data)
}

/// Collects the printable text out of a parsed chunk.
struct Text {
    out: String,
}

impl Perform for Text {
    fn print(&mut self, c: char) {
        self.out.push(c);
    }

    fn execute(&mut self, byte: u8) {
        match byte {
            b'\n' | b'\t' => self.out.push(byte as char),
            // \r, BEL, BS and the rest carry no transcript text
            _ => {}
        }
    }
}
