//! Program profile: the strict prompt grammar of one target program.

use std::time::Duration;

use crate::channel::{PromptPatternSet, PromptRule};

/// Default quiet interval after which a started program counts as waiting.
pub const DEFAULT_STALL_THRESHOLD: Duration = Duration::from_secs(15);

/// When a profile is picked automatically from a command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Detection {
    /// Whenever the command runs this program.
    #[default]
    Always,

    /// Only when every argument is a flag (`python3 -i`, not `python3 app.py`).
    FlagsOnly,

    /// Never; the profile must be requested by name.
    Manual,
}

/// Everything needed to classify one program's output in strict mode.
#[derive(Debug, Clone)]
pub struct ProgramProfile {
    /// Profile name (e.g., "msfconsole", "python").
    pub name: String,

    /// Other executable names that run the same program.
    pub aliases: Vec<String>,

    /// The program's own prompts. Generic rules are never consulted.
    pub grammar: PromptPatternSet,

    /// Case-insensitive substrings that show the program has started.
    pub started_markers: Vec<String>,

    /// Quiet interval after which a started program counts as waiting.
    pub stall_threshold: Duration,

    /// Automatic selection policy.
    pub detection: Detection,
}

impl ProgramProfile {
    /// Create a profile with an empty grammar.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            aliases: vec![],
            grammar: PromptPatternSet::default(),
            started_markers: vec![],
            stall_threshold: DEFAULT_STALL_THRESHOLD,
            detection: Detection::default(),
        }
    }

    /// Add an executable alias.
    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.aliases.push(alias.into());
        self
    }

    /// Add a prompt rule to the grammar.
    pub fn with_prompt(mut self, rule: PromptRule) -> Self {
        self.grammar = self.grammar.with_rule(rule);
        self
    }

    /// Add a started marker.
    pub fn with_started_marker(mut self, marker: impl Into<String>) -> Self {
        self.started_markers.push(marker.into().to_lowercase());
        self
    }

    /// Set the stall threshold.
    pub fn with_stall_threshold(mut self, threshold: Duration) -> Self {
        self.stall_threshold = threshold;
        self
    }

    /// Set the detection policy.
    pub fn with_detection(mut self, detection: Detection) -> Self {
        self.detection = detection;
        self
    }

    /// Whether `output` shows the program has started.
    pub fn has_started(&self, output: &str) -> bool {
        let lowered = output.to_lowercase();
        self.started_markers
            .iter()
            .any(|marker| lowered.contains(marker.as_str()))
    }

    /// Whether `program` (an executable name) runs this profile's program.
    pub fn is_named(&self, program: &str) -> bool {
        self.name == program || self.aliases.iter().any(|a| a == program)
    }

    /// Whether this profile should be used for `command`.
    pub fn matches_command(&self, command: &str) -> bool {
        if self.detection == Detection::Manual {
            return false;
        }
        let Some((program, args)) = split_program(command) else {
            return false;
        };
        if !self.is_named(program) {
            return false;
        }
        match self.detection {
            Detection::FlagsOnly => args.iter().all(|arg| arg.starts_with('-')),
            _ => true,
        }
    }
}

/// Split a command line into the executable's base name and its arguments.
///
/// Leading `sudo`, `exec` and `VAR=value` assignments are skipped.
fn split_program(command: &str) -> Option<(&str, Vec<&str>)> {
    let mut words = command
        .split_whitespace()
        .skip_while(|w| matches!(*w, "sudo" | "exec") || is_assignment(w));

    let program = words.next()?;
    let program = program.rsplit('/').next().unwrap_or(program);
    Some((program, words.collect()))
}

fn is_assignment(word: &str) -> bool {
    match word.split_once('=') {
        Some((name, _)) => {
            !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    }
}
