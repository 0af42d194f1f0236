//! Python REPL profile.
//!
//! Only used when the interpreter is started without a script, since a
//! script's own `input()` prompts are better served by the generic rules.

use crate::channel::{PromptKind, PromptRule};
use crate::profile::{Detection, ProgramProfile};

/// Create the Python REPL profile.
pub fn profile() -> ProgramProfile {
    let primary = PromptRule::new("python-ps1", PromptKind::Program, r"^>>>\s*$").unwrap();
    let continuation = PromptRule::new("python-ps2", PromptKind::Program, r"^\.\.\.\s*$").unwrap();

    ProgramProfile::new("python")
        .with_alias("python3")
        .with_alias("python2")
        .with_alias("ipython")
        .with_prompt(primary)
        .with_prompt(continuation)
        .with_started_marker("python 3")
        .with_started_marker("python 2")
        .with_started_marker("type \"help\"")
        .with_detection(Detection::FlagsOnly)
}
