//! Append-only output buffer.
//!
//! Prompt detection only ever needs the last few lines of output, so the
//! classifier reads a bounded tail of the transcript (see [`tail_of`])
//! rather than the whole thing. For long-running sessions (package
//! installs, scans) this keeps classification cost flat as output grows.

/// Sanitized output of one stream.
///
/// The buffer only grows. Readers keep byte offsets ("cursors") into it and
/// ask for the text appended since.
#[derive(Debug, Default)]
pub struct OutputBuffer {
    buffer: String,
}

impl OutputBuffer {
    pub fn new() -> Self {
        Self {
            buffer: String::with_capacity(4096),
        }
    }

    /// Append sanitized text.
    pub fn push_str(&mut self, text: &str) {
        self.buffer.push_str(text);
    }

    /// Text appended after `cursor`, and the cursor to use next time.
    ///
    /// A cursor past the end (or off a char boundary) yields nothing.
    pub fn since(&self, cursor: usize) -> (&str, usize) {
        let text = self.buffer.get(cursor..).unwrap_or("");
        (text, self.buffer.len())
    }

    /// The full buffer contents.
    pub fn as_str(&self) -> &str {
        &self.buffer
    }

    /// Current length in bytes.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

/// The last `depth` bytes of `text`, widened backwards to a char boundary.
pub(crate) fn tail_of(text: &str, depth: usize) -> &str {
    let mut start = text.len().saturating_sub(depth);
    while !text.is_char_boundary(start) {
        start -= 1;
    }
    &text[start..]
}
