//! Registry of live sessions.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};

use futures_util::future::join_all;
use log::{debug, info};
use uuid::Uuid;

use super::SessionOptions;
use super::handle::{Session, SessionParts};
use crate::broadcast::Broadcaster;
use crate::channel::{Classifier, ClassifierStrategy};
use crate::error::{Error, Result, SessionError};
use crate::transport::Transport;

type SessionMap = HashMap<String, Session>;

/// Owns every live session, keyed by id.
///
/// A session deregisters itself when it closes, before its CLOSED state is
/// published, so an id seen as closed is never found here.
#[derive(Debug, Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<Mutex<SessionMap>>,
    broadcaster: Broadcaster,
}

impl SessionRegistry {
    /// Create an empty registry that reports nothing.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty registry reporting session activity to `broadcaster`.
    pub fn with_broadcaster(broadcaster: Broadcaster) -> Self {
        Self {
            sessions: Arc::default(),
            broadcaster,
        }
    }

    /// Open a channel for `command` and register a session around it.
    ///
    /// An empty command starts the login shell. The session is registered
    /// before its channel task starts.
    pub async fn create(
        &self,
        transport: &dyn Transport,
        command: &str,
        strategy: ClassifierStrategy,
        options: &SessionOptions,
    ) -> Result<Session> {
        let pty = options.pty();
        let stream = match (pty, command.trim().is_empty()) {
            (Some(pty), true) => transport.shell(&pty).await?,
            (None, true) => {
                return Err(Error::invalid_params(
                    "a login shell needs a pseudo-terminal",
                ));
            }
            (pty, false) => transport.exec(command, pty.as_ref()).await?,
        };

        let id = generate_id();
        let sessions = Arc::downgrade(&self.sessions);
        let deregister_id = id.clone();
        let on_closed = Box::new(move || {
            if let Some(sessions) = sessions.upgrade() {
                lock(&sessions).remove(&deregister_id);
            }
        });

        let classifier = Classifier::new(strategy).with_search_depth(options.search_depth);
        let (session, starter) = Session::new(SessionParts {
            id: id.clone(),
            command: command.to_string(),
            stream,
            classifier,
            stall_interval: options.stall_check_interval,
            broadcaster: self.broadcaster.clone(),
            on_closed,
        });

        lock(&self.sessions).insert(id.clone(), session.clone());
        starter.start();

        info!(
            "started session {} for {:?}{}",
            id,
            command,
            session
                .program()
                .map(|p| format!(" (strict: {})", p))
                .unwrap_or_default()
        );
        Ok(session)
    }

    /// Look up a live session.
    pub fn get(&self, id: &str) -> Option<Session> {
        lock(&self.sessions).get(id).cloned()
    }

    /// Look up a live session, failing with `NotFound`.
    pub fn require(&self, id: &str) -> Result<Session> {
        self.get(id).ok_or_else(|| {
            Error::Session(SessionError::NotFound { id: id.to_string() })
        })
    }

    /// Remove a session without closing it.
    pub fn remove(&self, id: &str) -> Option<Session> {
        lock(&self.sessions).remove(id)
    }

    /// Close every live session and wait for all of them.
    ///
    /// Returns how many sessions were closed.
    pub async fn close_all(&self) -> usize {
        let sessions: Vec<Session> = lock(&self.sessions).values().cloned().collect();
        let count = sessions.len();
        if count > 0 {
            debug!("closing {} sessions", count);
        }
        join_all(sessions.iter().map(|s| s.close())).await;
        count
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        lock(&self.sessions).len()
    }

    /// Whether no session is live.
    pub fn is_empty(&self) -> bool {
        lock(&self.sessions).is_empty()
    }

    /// Ids of live sessions, oldest first.
    pub fn ids(&self) -> Vec<String> {
        self.sessions().into_iter().map(|s| s.id().to_string()).collect()
    }

    /// Live sessions, oldest first.
    pub fn sessions(&self) -> Vec<Session> {
        let mut sessions: Vec<Session> = lock(&self.sessions).values().cloned().collect();
        sessions.sort_by_key(|s| s.created_at());
        sessions
    }
}

/// `session_<unix millis>_<8 hex chars>`.
fn generate_id() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    let suffix = Uuid::new_v4().simple().to_string();
    format!("session_{}_{}", millis, &suffix[..8])
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
