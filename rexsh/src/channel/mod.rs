//! Channel output handling: sanitizing, buffering and prompt classification.
//!
//! Everything here is synchronous and free of I/O. The session layer feeds
//! channel bytes through a [`Sanitizer`] into an [`OutputBuffer`] and asks
//! a [`Classifier`] whether the remote process is waiting for input.

mod buffer;
pub mod classifier;
mod patterns;
pub mod sanitize;

pub use buffer::OutputBuffer;
pub use classifier::{Classifier, ClassifierStrategy, Verdict, classify};
pub use patterns::{PromptKind, PromptPatternSet, PromptRule};
pub use sanitize::{Sanitizer, strip};
