//! Prompt classification: is the remote process blocked waiting for input?
//!
//! Nothing on an SSH channel says "the program is now reading stdin". The
//! only evidence is what the output looks like and how long it has been
//! quiet. The classifier turns that evidence into a yes/no verdict:
//!
//! 1. Empty or whitespace-only output is never waiting.
//! 2. The last non-empty line of the output tail is the candidate prompt.
//! 3. In strict mode only the target program's own grammar is consulted,
//!    so banner lines ending in `#` or `>` cannot trip a generic rule.
//! 4. In generic mode the ordered [`PromptPatternSet`] decides.
//! 5. In strict mode a program that has visibly started and then gone quiet
//!    for its stall threshold is treated as waiting.
//!
//! Classification is pure apart from one latch: once a strict program's
//! started marker has been seen it stays seen, so each check only scans
//! output appended since the previous one. Any memory of previous verdicts
//! lives in the session.

use std::sync::Arc;
use std::time::Duration;

use super::buffer::tail_of;
use super::patterns::{PromptKind, PromptPatternSet};
use crate::profile::ProgramProfile;

/// Default number of trailing bytes inspected.
pub const DEFAULT_SEARCH_DEPTH: usize = 2000;

/// Default number of trailing non-empty lines kept for inspection.
pub const DEFAULT_WINDOW_LINES: usize = 20;

/// How output is classified for one session.
#[derive(Debug, Clone)]
pub enum ClassifierStrategy {
    /// Ordered generic prompt rules.
    Generic(Arc<PromptPatternSet>),

    /// One program's strict grammar, generic rules suppressed.
    Strict(Arc<ProgramProfile>),
}

impl ClassifierStrategy {
    /// The built-in generic rule set.
    pub fn generic() -> Self {
        ClassifierStrategy::Generic(PromptPatternSet::generic())
    }

    /// Strict mode for `profile`.
    pub fn strict(profile: Arc<ProgramProfile>) -> Self {
        ClassifierStrategy::Strict(profile)
    }

    /// The target program's name, when in strict mode.
    pub fn program(&self) -> Option<&str> {
        match self {
            ClassifierStrategy::Generic(_) => None,
            ClassifierStrategy::Strict(profile) => Some(&profile.name),
        }
    }
}

impl Default for ClassifierStrategy {
    fn default() -> Self {
        Self::generic()
    }
}

/// Outcome of one classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// No prompt recognised.
    NotWaiting,

    /// The final line matched a prompt rule.
    Prompt { rule: String, kind: PromptKind },

    /// Strict-mode stall fallback: started and quiet for too long.
    Stalled,
}

impl Verdict {
    /// Whether the verdict means "waiting for input".
    pub fn is_waiting(&self) -> bool {
        !matches!(self, Verdict::NotWaiting)
    }
}

/// Prompt classifier bound to a strategy.
#[derive(Debug, Clone)]
pub struct Classifier {
    strategy: ClassifierStrategy,
    search_depth: usize,
    window_lines: usize,
    started: StartedScan,
}

/// Incremental search for a strict program's started markers.
#[derive(Debug, Clone, Default)]
struct StartedScan {
    seen: bool,
    /// Output length at the previous scan.
    scanned: usize,
}

impl StartedScan {
    fn check(&mut self, profile: &ProgramProfile, output: &str) -> bool {
        if !self.seen {
            // Re-read one marker's length of old text for markers split across chunks.
            let overlap = profile
                .started_markers
                .iter()
                .map(String::len)
                .max()
                .unwrap_or(0);
            let fresh = output.len().saturating_sub(self.scanned);
            self.seen = profile.has_started(tail_of(output, fresh + overlap));
            self.scanned = output.len();
        }
        self.seen
    }
}

impl Classifier {
    /// Create a classifier with default window sizes.
    pub fn new(strategy: ClassifierStrategy) -> Self {
        Self {
            strategy,
            search_depth: DEFAULT_SEARCH_DEPTH,
            window_lines: DEFAULT_WINDOW_LINES,
            started: StartedScan::default(),
        }
    }

    /// Override how many trailing bytes are inspected.
    pub fn with_search_depth(mut self, depth: usize) -> Self {
        self.search_depth = depth.max(1);
        self
    }

    /// Get the strategy.
    pub fn strategy(&self) -> &ClassifierStrategy {
        &self.strategy
    }

    /// Classify sanitized `output` that has been quiet for `quiet_for`.
    ///
    /// `output` is the session's whole transcript; it only ever grows
    /// between calls.
    pub fn classify(&mut self, output: &str, quiet_for: Duration) -> Verdict {
        if output.trim().is_empty() {
            return Verdict::NotWaiting;
        }

        let window = trailing_lines(tail_of(output, self.search_depth), self.window_lines);
        let Some(final_line) = window.last().copied() else {
            return Verdict::NotWaiting;
        };

        match &self.strategy {
            ClassifierStrategy::Generic(rules) => match rules.first_match(final_line) {
                Some(rule) => Verdict::Prompt {
                    rule: rule.name.clone(),
                    kind: rule.kind,
                },
                None => Verdict::NotWaiting,
            },
            ClassifierStrategy::Strict(profile) => {
                if let Some(rule) = profile.grammar.first_match(final_line) {
                    return Verdict::Prompt {
                        rule: rule.name.clone(),
                        kind: rule.kind,
                    };
                }
                if quiet_for >= profile.stall_threshold && self.started.check(profile, output) {
                    return Verdict::Stalled;
                }
                Verdict::NotWaiting
            }
        }
    }
}

/// Classify with a one-off classifier.
pub fn classify(output: &str, strategy: &ClassifierStrategy, quiet_for: Duration) -> bool {
    Classifier::new(strategy.clone())
        .classify(output, quiet_for)
        .is_waiting()
}

/// The last `limit` non-empty lines of `text`, oldest first.
fn trailing_lines(text: &str, limit: usize) -> Vec<&str> {
    let bytes = text.as_bytes();
    let mut lines = Vec::with_capacity(limit);
    let mut end = bytes.len();

    for pos in memchr::memrchr_iter(b'\n', bytes).chain(std::iter::once(usize::MAX)) {
        if lines.len() == limit {
            break;
        }
        let start = if pos == usize::MAX { 0 } else { pos + 1 };
        let line = &text[start..end];
        if !line.trim().is_empty() {
            lines.push(line);
        }
        if pos == usize::MAX {
            break;
        }
        end = pos;
    }

    lines.reverse();
    lines
}
