//! Transport capability and its SSH implementation.
//!
//! The session engine never talks to russh directly. It consumes three
//! small traits: a [`Connector`] that establishes the shared connection, a
//! [`Transport`] that opens channels on it, and a [`ByteStream`] per
//! channel. [`SshConnector`] implements them on top of russh; tests plug in
//! in-memory fakes.

pub mod config;
mod ssh;

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

pub use config::{AuthMethod, HostKeyVerification, PtyOptions, SshConfig};
pub use ssh::{SshConnector, SshTransport};

use crate::error::{Result, TransportError};

/// An event produced by an open channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// Bytes on the channel's primary (stdout) stream.
    Data(Bytes),

    /// Bytes on the extended (stderr) stream.
    ExtendedData(Bytes),

    /// The remote process exited with this status.
    ExitStatus(u32),

    /// The remote side will send no more data.
    Eof,

    /// The channel closed.
    Closed,

    /// The channel failed, e.g. the connection dropped mid-stream.
    Error(String),
}

/// One open remote-execution or PTY channel.
#[async_trait]
pub trait ByteStream: Send {
    /// Wait for the next event. `None` means the channel is gone.
    async fn next_event(&mut self) -> Option<StreamEvent>;

    /// Send bytes to the remote process.
    async fn write(&mut self, data: &[u8]) -> std::result::Result<(), TransportError>;

    /// Signal end of input and close the channel.
    async fn end(&mut self) -> std::result::Result<(), TransportError>;
}

/// An established connection able to open channels.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Run `command`, optionally on a pseudo-terminal.
    async fn exec(&self, command: &str, pty: Option<&PtyOptions>) -> Result<Box<dyn ByteStream>>;

    /// Start the user's login shell on a pseudo-terminal.
    async fn shell(&self, pty: &PtyOptions) -> Result<Box<dyn ByteStream>>;

    /// Whether the underlying connection is still usable.
    fn is_alive(&self) -> bool;

    /// Tear down the connection.
    async fn disconnect(&self) -> Result<()>;
}

/// Factory for [`Transport`]s.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Establish and authenticate a connection.
    async fn connect(&self, config: &SshConfig)
    -> std::result::Result<Arc<dyn Transport>, TransportError>;
}
