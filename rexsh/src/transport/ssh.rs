//! SSH transport implementation using russh.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use log::{debug, info, warn};
use russh::client::{self, Handle, Msg};
use russh::keys::{HashAlg, PrivateKeyWithHashAlg, PublicKey, load_secret_key};
use russh::{Channel, ChannelMsg};
use secrecy::ExposeSecret;

use super::config::{AuthMethod, HostKeyVerification, PtyOptions, SshConfig};
use super::{ByteStream, Connector, StreamEvent, Transport};
use crate::error::{Result, TransportError};

/// Connects [`SshTransport`]s with russh.
#[derive(Debug, Default, Clone, Copy)]
pub struct SshConnector;

#[async_trait]
impl Connector for SshConnector {
    async fn connect(
        &self,
        config: &SshConfig,
    ) -> std::result::Result<Arc<dyn Transport>, TransportError> {
        let transport = SshTransport::connect(config.clone()).await?;
        Ok(Arc::new(transport))
    }
}

/// SSH transport wrapping a russh client session.
pub struct SshTransport {
    /// The russh session handle.
    session: Handle<SshHandler>,

    /// Configuration used for this connection.
    config: SshConfig,
}

impl SshTransport {
    /// Connect to the SSH server and authenticate.
    pub async fn connect(config: SshConfig) -> std::result::Result<Self, TransportError> {
        let ssh_config = Arc::new(client::Config {
            keepalive_interval: config.keepalive_interval,
            ..Default::default()
        });

        let host_key_error: Arc<Mutex<Option<TransportError>>> = Arc::new(Mutex::new(None));

        let handler = SshHandler {
            host: config.host.clone(),
            port: config.port,
            host_key_verification: config.host_key_verification.clone(),
            known_hosts_path: config.known_hosts_path.clone(),
            host_key_error: host_key_error.clone(),
        };

        info!(
            "connecting to {}@{}",
            config.username,
            config.socket_addr()
        );

        let mut session = tokio::time::timeout(
            config.timeout,
            client::connect(ssh_config, (config.host.as_str(), config.port), handler),
        )
        .await
        .map_err(|_| TransportError::Timeout(config.timeout))?
        .map_err(|e| {
            // Prefer the detailed host-key error over russh's generic UnknownKey
            let stored = host_key_error.lock().ok().and_then(|mut slot| slot.take());
            match (stored, e) {
                (Some(hk_err), _) => hk_err,
                (None, russh::Error::IO(source)) => TransportError::ConnectionFailed {
                    host: config.host.clone(),
                    port: config.port,
                    source,
                },
                (None, e) => TransportError::Ssh(e),
            }
        })?;

        Self::authenticate(&mut session, &config).await?;
        info!("authenticated as {}", config.username);

        Ok(Self { session, config })
    }

    /// Authenticate with the server.
    async fn authenticate(
        session: &mut Handle<SshHandler>,
        config: &SshConfig,
    ) -> std::result::Result<(), TransportError> {
        let success = match &config.auth {
            AuthMethod::Password(password) => {
                debug!("using password authentication");
                session
                    .authenticate_password(&config.username, password.expose_secret())
                    .await?
                    .success()
            }
            AuthMethod::PrivateKey { path, passphrase } => {
                debug!("using private key authentication: {}", path.display());
                let key = load_secret_key(path, passphrase.as_ref().map(|p| p.expose_secret()))
                    .map_err(|e| TransportError::Key(format!("{}: {}", path.display(), e)))?;

                // Get the best RSA hash algorithm supported by the server
                let hash_alg = session.best_supported_rsa_hash().await?.flatten();

                session
                    .authenticate_publickey(
                        &config.username,
                        PrivateKeyWithHashAlg::new(Arc::new(key), hash_alg),
                    )
                    .await?
                    .success()
            }
        };

        if !success {
            return Err(TransportError::AuthenticationFailed {
                user: config.username.clone(),
            });
        }

        Ok(())
    }

    async fn open_session_channel(&self) -> std::result::Result<Channel<Msg>, TransportError> {
        Ok(self.session.channel_open_session().await?)
    }

    async fn request_pty(
        channel: &Channel<Msg>,
        pty: &PtyOptions,
    ) -> std::result::Result<(), TransportError> {
        channel
            .request_pty(true, &pty.term, pty.width, pty.height, 0, 0, &[])
            .await?;
        Ok(())
    }

    /// The configuration this transport was connected with.
    pub fn config(&self) -> &SshConfig {
        &self.config
    }
}

#[async_trait]
impl Transport for SshTransport {
    async fn exec(&self, command: &str, pty: Option<&PtyOptions>) -> Result<Box<dyn ByteStream>> {
        let channel = self.open_session_channel().await?;
        if let Some(pty) = pty {
            Self::request_pty(&channel, pty).await?;
        }
        channel
            .exec(true, command)
            .await
            .map_err(TransportError::Ssh)?;
        debug!("exec channel opened (pty: {})", pty.is_some());
        Ok(Box::new(SshChannel::new(channel)))
    }

    async fn shell(&self, pty: &PtyOptions) -> Result<Box<dyn ByteStream>> {
        let channel = self.open_session_channel().await?;
        Self::request_pty(&channel, pty).await?;
        channel
            .request_shell(true)
            .await
            .map_err(TransportError::Ssh)?;
        debug!("shell channel opened");
        Ok(Box::new(SshChannel::new(channel)))
    }

    fn is_alive(&self) -> bool {
        !self.session.is_closed()
    }

    async fn disconnect(&self) -> Result<()> {
        info!("disconnecting from {}", self.config.socket_addr());
        self.session
            .disconnect(russh::Disconnect::ByApplication, "", "en")
            .await
            .map_err(TransportError::Ssh)?;
        Ok(())
    }
}

/// A russh channel exposed as a [`ByteStream`].
struct SshChannel {
    channel: Channel<Msg>,
    ended: bool,
    /// Set once the remote sent EOF or close, or a failure was reported.
    finished: bool,
}

impl SshChannel {
    fn new(channel: Channel<Msg>) -> Self {
        Self {
            channel,
            ended: false,
            finished: false,
        }
    }
}

#[async_trait]
impl ByteStream for SshChannel {
    async fn next_event(&mut self) -> Option<StreamEvent> {
        loop {
            let Some(message) = self.channel.wait().await else {
                // Gone without EOF or close: the connection dropped under us.
                if self.finished || self.ended {
                    return None;
                }
                self.finished = true;
                return Some(StreamEvent::Error(
                    "channel dropped before the remote side closed it".to_string(),
                ));
            };
            let event = match message {
                ChannelMsg::Data { data } => StreamEvent::Data(Bytes::copy_from_slice(&data[..])),
                // ext 1 is SSH_EXTENDED_DATA_STDERR
                ChannelMsg::ExtendedData { data, ext: 1 } => {
                    StreamEvent::ExtendedData(Bytes::copy_from_slice(&data[..]))
                }
                ChannelMsg::ExitStatus { exit_status } => StreamEvent::ExitStatus(exit_status),
                ChannelMsg::Eof => {
                    self.finished = true;
                    StreamEvent::Eof
                }
                ChannelMsg::Close => {
                    self.finished = true;
                    StreamEvent::Closed
                }
                other => {
                    log::trace!("ignoring channel message: {:?}", other);
                    continue;
                }
            };
            return Some(event);
        }
    }

    async fn write(&mut self, data: &[u8]) -> std::result::Result<(), TransportError> {
        self.channel.data(data).await?;
        Ok(())
    }

    async fn end(&mut self) -> std::result::Result<(), TransportError> {
        if self.ended {
            return Ok(());
        }
        self.ended = true;
        // The remote side may already be gone; closing is best effort.
        if let Err(e) = self.channel.eof().await {
            debug!("eof on closing channel failed: {}", e);
        }
        self.channel.close().await?;
        Ok(())
    }
}

/// SSH client handler for russh.
struct SshHandler {
    host: String,
    port: u16,
    host_key_verification: HostKeyVerification,
    known_hosts_path: Option<PathBuf>,
    /// Stores a detailed host-key error so connect() can surface it
    /// instead of the generic russh::Error::UnknownKey.
    host_key_error: Arc<Mutex<Option<TransportError>>>,
}

impl SshHandler {
    /// Check the host key against known_hosts.
    ///
    /// Returns `Ok(true)` if matched, `Ok(false)` if host not found,
    /// `Err(TransportError::HostKeyChanged)` if key changed.
    fn check_known_hosts(&self, pubkey: &PublicKey) -> std::result::Result<bool, TransportError> {
        let result = if let Some(ref path) = self.known_hosts_path {
            russh::keys::check_known_hosts_path(&self.host, self.port, pubkey, path)
        } else {
            russh::keys::check_known_hosts(&self.host, self.port, pubkey)
        };

        match result {
            Ok(matched) => Ok(matched),
            Err(russh::keys::Error::KeyChanged { line }) => Err(TransportError::HostKeyChanged {
                host: self.host.clone(),
                port: self.port,
                line,
            }),
            Err(e) => Err(TransportError::KnownHosts(e.to_string())),
        }
    }

    /// Save a new host key to known_hosts.
    fn learn_host_key(&self, pubkey: &PublicKey) -> std::result::Result<(), TransportError> {
        let result = if let Some(ref path) = self.known_hosts_path {
            russh::keys::known_hosts::learn_known_hosts_path(&self.host, self.port, pubkey, path)
        } else {
            russh::keys::known_hosts::learn_known_hosts(&self.host, self.port, pubkey)
        };

        result.map_err(|e| TransportError::KnownHosts(e.to_string()))
    }

    fn reject(&self, err: TransportError) -> bool {
        if let Ok(mut slot) = self.host_key_error.lock() {
            *slot = Some(err);
        }
        false
    }
}

impl client::Handler for SshHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        debug!(
            "server key for {}:{}: {}",
            self.host,
            self.port,
            server_public_key.fingerprint(HashAlg::Sha256)
        );

        match self.host_key_verification {
            HostKeyVerification::Disabled => Ok(true),

            HostKeyVerification::AcceptNew => match self.check_known_hosts(server_public_key) {
                Ok(true) => Ok(true),
                Ok(false) => {
                    if let Err(e) = self.learn_host_key(server_public_key) {
                        warn!("Failed to save host key: {}", e);
                    }
                    Ok(true)
                }
                Err(e) => Ok(self.reject(e)),
            },

            HostKeyVerification::Strict => match self.check_known_hosts(server_public_key) {
                Ok(true) => Ok(true),
                Ok(false) => Ok(self.reject(TransportError::HostKeyUnknown {
                    host: self.host.clone(),
                    port: self.port,
                })),
                Err(e) => Ok(self.reject(e)),
            },
        }
    }
}
