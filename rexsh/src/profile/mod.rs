//! Program profiles for strict-mode prompt classification.
//!
//! A profile describes one interactive program (a console, a REPL, a
//! database client): the exact prompts it prints, text that shows it has
//! started, and how long it may stay quiet before a stall counts as
//! readiness. Profiles are plain configuration. Sessions receive the one
//! they should use at creation time.

mod definition;
pub mod programs;
mod registry;

pub use definition::{DEFAULT_STALL_THRESHOLD, Detection, ProgramProfile};
pub use registry::ProfileRegistry;
