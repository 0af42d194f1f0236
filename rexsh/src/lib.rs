//! # rexsh
//!
//! Async remote shell sessions over SSH with prompt-aware interactive
//! control.
//!
//! rexsh keeps one authenticated SSH connection and runs two kinds of work
//! on it:
//!
//! - One-shot commands that run to completion under a time limit.
//! - Interactive sessions (shells, REPLs, consoles) whose output is watched
//!   to decide when the program is waiting for input.
//!
//! ## Features
//!
//! - Async SSH connections via russh
//! - ANSI-free, CR-free output transcripts
//! - Ordered generic prompt rules plus strict per-program grammars
//!   (msfconsole, python, mysql, psql, sqlite)
//! - Deadline-bounded waits that concurrent callers share
//! - JSON tool surface and an MCP stdio server binary
//! - Optional best-effort push of session output to a live viewer
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use rexsh::{ConnectOptions, ConnectionManager, ExecOptions, SessionOptions};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), rexsh::Error> {
//!     let options = ConnectOptions::builder("192.168.56.101")
//!         .username("kali")
//!         .password("kali")
//!         .build()?;
//!
//!     let manager = ConnectionManager::new();
//!     manager.connect(&options).await?;
//!
//!     let output = manager.execute_command("uname -a", &ExecOptions::default()).await?;
//!     println!("{}", output.stdout);
//!
//!     let shell = manager.create_session("", SessionOptions::default()).await?;
//!     shell.wait_until_ready(Duration::from_secs(5)).await?;
//!     shell.write_and_wait("echo hi\n", Duration::from_secs(5)).await?;
//!     print!("{}", shell.take_new_output().stdout);
//!
//!     manager.disconnect().await?;
//!     Ok(())
//! }
//! ```

pub mod broadcast;
pub mod channel;
pub mod error;
pub mod manager;
pub mod mcp;
pub mod profile;
pub mod session;
pub mod tools;
pub mod transport;

// Re-export main types for convenience
pub use channel::{ClassifierStrategy, PromptKind, PromptPatternSet, PromptRule, classify};
pub use error::{ConnectionErrorKind, Error, Result};
pub use manager::{
    ConnectOptions, ConnectOptionsBuilder, ConnectionManager, ExecOptions, ExecOutput,
    ManagerConfig,
};
pub use profile::{ProfileRegistry, ProgramProfile};
pub use session::{
    Session, SessionOptions, SessionRegistry, SessionSnapshot, SessionState, WaitOutcome,
    WaitReason,
};
pub use transport::{AuthMethod, HostKeyVerification, PtyOptions, SshConfig};
