//! Metasploit console profile.
//!
//! msfconsole prints a large ASCII-art banner on startup, and several of the
//! banner variants contain lines ending in `#` or `>`. Only the console's
//! own `msf6 >` / `msf6 exploit(...) >` prompts count as waiting.
//!
//! Startup can take well over a minute while the module cache loads, so the
//! stall threshold is three times the default.

use std::time::Duration;

use crate::channel::{PromptKind, PromptRule};
use crate::profile::{DEFAULT_STALL_THRESHOLD, ProgramProfile};

/// Create the msfconsole profile.
pub fn profile() -> ProgramProfile {
    let console = PromptRule::new(
        "msf-console",
        PromptKind::Program,
        r"^msf\d*(\s+\S+\([^)]*\))?\s*>\s*$",
    )
    .unwrap();

    let meterpreter =
        PromptRule::new("meterpreter", PromptKind::Program, r"^meterpreter\s*>\s*$").unwrap();

    let confirm = PromptRule::new(
        "msf-confirm",
        PromptKind::Confirmation,
        r"(?i)[\[(]\s*y\s*/\s*n\s*[\])]\s*[:?]?\s*$",
    )
    .unwrap();

    ProgramProfile::new("msfconsole")
        .with_prompt(console)
        .with_prompt(meterpreter)
        .with_prompt(confirm)
        .with_started_marker("metasploit")
        .with_started_marker("msf6")
        .with_started_marker("msf5")
        .with_stall_threshold(DEFAULT_STALL_THRESHOLD * 3)
}
