//! Interactive sessions over a shared SSH connection.
//!
//! A session is one long-lived channel with a process behind it. Output is
//! sanitized and accumulated, and after every chunk (and periodically while
//! quiet) the prompt classifier decides whether the process is waiting for
//! input. Callers observe that as a [`SessionState`] and can block on
//! [`Session::wait_until_ready`].

mod handle;
mod registry;
mod state;
mod timer;
mod wait;

use std::time::Duration;

pub use handle::Session;
pub use registry::SessionRegistry;
pub use state::{
    NewOutput, OutputCursor, OutputEvent, OutputStream, SessionSnapshot, SessionState,
    WaitOutcome, WaitReason,
};

use crate::channel::ClassifierStrategy;
use crate::channel::classifier::DEFAULT_SEARCH_DEPTH;
use crate::transport::PtyOptions;

/// Default interval of the stall check while a session is running.
pub const DEFAULT_STALL_CHECK_INTERVAL: Duration = Duration::from_millis(500);

/// Options for starting an interactive session.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Whether to request a pseudo-terminal.
    pub use_pty: bool,

    /// Terminal to request. `None` uses the connection's terminal.
    pub terminal: Option<PtyOptions>,

    /// Classifier strategy. `None` picks one from the command.
    pub strategy: Option<ClassifierStrategy>,

    /// How often a quiet session is re-classified.
    pub stall_check_interval: Duration,

    /// Trailing bytes inspected by the classifier.
    pub search_depth: usize,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            use_pty: true,
            terminal: None,
            strategy: None,
            stall_check_interval: DEFAULT_STALL_CHECK_INTERVAL,
            search_depth: DEFAULT_SEARCH_DEPTH,
        }
    }
}

impl SessionOptions {
    /// Request a specific terminal.
    pub fn with_terminal(mut self, terminal: PtyOptions) -> Self {
        self.use_pty = true;
        self.terminal = Some(terminal);
        self
    }

    /// Run on a plain exec channel.
    pub fn without_pty(mut self) -> Self {
        self.use_pty = false;
        self
    }

    /// The terminal that will be requested, if any.
    pub fn pty(&self) -> Option<PtyOptions> {
        self.use_pty
            .then(|| self.terminal.clone().unwrap_or_default())
    }

    /// Force a classifier strategy.
    pub fn with_strategy(mut self, strategy: ClassifierStrategy) -> Self {
        self.strategy = Some(strategy);
        self
    }

    /// Set the stall check interval.
    pub fn with_stall_check_interval(mut self, interval: Duration) -> Self {
        self.stall_check_interval = interval;
        self
    }

    /// Set the classifier search depth.
    pub fn with_search_depth(mut self, depth: usize) -> Self {
        self.search_depth = depth;
        self
    }
}
