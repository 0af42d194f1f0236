//! Declarative prompt pattern table.
//!
//! Each [`PromptRule`] says what a prompt line looks like and what kind of
//! input it asks for. A [`PromptPatternSet`] is an ordered list of rules;
//! the first rule that matches the final output line wins. Ordering matters:
//! specific program prompts sit ahead of the generic `$ # % >` terminators
//! so that banner text ending in one of those characters is not mistaken
//! for a shell prompt by a looser rule first.

use std::sync::{Arc, LazyLock};

use regex::Regex;
use serde::{Deserialize, Serialize};

/// What a matched prompt is asking for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptKind {
    /// A secret (password, passphrase).
    Password,
    /// A yes/no style confirmation.
    Confirmation,
    /// "Press any key", pagers.
    Continue,
    /// A named program's own prompt (REPLs, database shells, consoles).
    Program,
    /// A shell prompt.
    Shell,
}

/// One entry of a prompt pattern table.
#[derive(Debug, Clone)]
pub struct PromptRule {
    /// Short identifier, used in logs.
    pub name: String,

    /// What the prompt asks for.
    pub kind: PromptKind,

    /// Pattern matched against the final output line.
    pattern: Regex,

    /// Substrings that must NOT be present in the line for a match.
    not_contains: Vec<String>,

    /// Lines longer than this (in chars) never match.
    max_line_len: Option<usize>,
}

impl PromptRule {
    /// Create a new rule from a pattern string.
    pub fn new(
        name: impl Into<String>,
        kind: PromptKind,
        pattern: &str,
    ) -> Result<Self, regex::Error> {
        Ok(Self {
            name: name.into(),
            kind,
            pattern: Regex::new(pattern)?,
            not_contains: Vec::new(),
            max_line_len: None,
        })
    }

    /// Add a substring that disqualifies a line.
    pub fn with_not_contains(mut self, pattern: impl Into<String>) -> Self {
        self.not_contains.push(pattern.into());
        self
    }

    /// Only match lines of at most `len` characters.
    pub fn with_max_line_len(mut self, len: usize) -> Self {
        self.max_line_len = Some(len);
        self
    }

    /// Whether `line` is this prompt.
    pub fn is_match(&self, line: &str) -> bool {
        if let Some(max) = self.max_line_len
            && line.chars().count() > max
        {
            return false;
        }
        if self.not_contains.iter().any(|nc| line.contains(nc.as_str())) {
            return false;
        }
        self.pattern.is_match(line)
    }
}

/// Ordered prompt rules. First match wins.
#[derive(Debug, Clone, Default)]
pub struct PromptPatternSet {
    rules: Vec<PromptRule>,
}

impl PromptPatternSet {
    /// Create a set from rules, in priority order.
    pub fn new(rules: Vec<PromptRule>) -> Self {
        Self { rules }
    }

    /// The built-in generic table, shared.
    pub fn generic() -> Arc<PromptPatternSet> {
        GENERIC.clone()
    }

    /// Append a rule with the lowest priority.
    pub fn with_rule(mut self, rule: PromptRule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Insert a rule ahead of every existing rule.
    pub fn with_priority_rule(mut self, rule: PromptRule) -> Self {
        self.rules.insert(0, rule);
        self
    }

    /// The first rule matching `line`, if any.
    pub fn first_match(&self, line: &str) -> Option<&PromptRule> {
        self.rules.iter().find(|rule| rule.is_match(line))
    }

}

/// Longest line the loose terminator rule accepts.
const SHORT_PROMPT_MAX_LEN: usize = 64;

/// The generic table: (name, kind, pattern), highest priority first.
const GENERIC_RULES: &[(&str, PromptKind, &str)] = &[
    // Secrets. Anchored at line end so log lines mentioning passwords don't match.
    (
        "password",
        PromptKind::Password,
        r"(?i)\b(password|passphrase|passcode)\b[^:]*:\s*$",
    ),
    (
        "yes-no",
        PromptKind::Confirmation,
        r"(?i)[\[(]\s*(y(es)?\s*/\s*n(o)?|n(o)?\s*/\s*y(es)?)\s*[\])]\s*[:?]?\s*$",
    ),
    (
        "are-you-sure",
        PromptKind::Confirmation,
        r"(?i)\b(continue|proceed|are you sure|overwrite)\b.*\?\s*$",
    ),
    (
        "press-key",
        PromptKind::Continue,
        r"(?i)\bpress\s+(any\s+key|enter|return)\b",
    ),
    ("pager", PromptKind::Continue, r"^\s*--\s*[Mm]ore\s*(\(\d+%\))?\s*--\s*$"),
    ("python", PromptKind::Program, r"^(>>>|\.\.\.)\s*$"),
    ("msfconsole", PromptKind::Program, r"^msf\d*(\s+\S+\([^)]*\))?\s*>\s*$"),
    (
        "mysql",
        PromptKind::Program,
        r"^(mysql|MariaDB \[[^\]]*\])>\s*$",
    ),
    ("psql", PromptKind::Program, r"^[\w.-]+[=(-][#>]\s*$"),
    ("sqlite", PromptKind::Program, r"^sqlite>\s*$"),
    ("gdb", PromptKind::Program, r"^\((gdb|pdb|lldb)\)\s*$"),
    ("ftp", PromptKind::Program, r"^s?ftp>\s*$"),
    ("irb", PromptKind::Program, r"^irb\([^)]*\):\d+(:\d+)?[>*]\s*$"),
    // user@host:~$, (venv) user@host dir %
    (
        "user-at-host",
        PromptKind::Shell,
        r"^(\([^)]*\)\s*)?[\w.-]+@[\w.-]+(:\S*)?(\s+\S+)?\s*[$#%]\s*$",
    ),
    // [user@host dir]$
    ("bracketed", PromptKind::Shell, r"^\[[^\]]+\]\s*[$#%]\s*$"),
    // Second line of the two-line zsh prompt used by Kali: └─#
    ("two-line", PromptKind::Shell, r"^[└╰]─*(\S+\s*)?[$#%]\s*$"),
    ("bare", PromptKind::Shell, r"^\s*[$#%>]\s*$"),
];

static GENERIC: LazyLock<Arc<PromptPatternSet>> = LazyLock::new(|| {
    let mut rules: Vec<PromptRule> = GENERIC_RULES
        .iter()
        .map(|(name, kind, pattern)| {
            PromptRule::new(*name, *kind, pattern).expect("built-in prompt pattern")
        })
        .collect();

    // Loose terminator: short line with a word character before the prompt
    // char. Rejects banner rules like "########".
    rules.push(
        PromptRule::new("short-terminator", PromptKind::Shell, r"^\W*\w.*[$#%>]\s*$")
            .expect("built-in prompt pattern")
            .with_max_line_len(SHORT_PROMPT_MAX_LEN)
            .with_not_contains("=>")
            .with_not_contains("->"),
    );

    Arc::new(PromptPatternSet::new(rules))
});
