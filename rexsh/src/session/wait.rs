//! Single-resolution wait slot.
//!
//! A session has at most one pending wait. Concurrent callers join it and
//! observe the same resolution.

use tokio::sync::watch;
use tokio::time::Instant;

/// How a pending wait settled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Resolution {
    Ready,
    Closed,
    Deadline,
    Failed(String),
}

/// The session-owned half of a wait.
///
/// Resolving consumes the slot, so a wait resolves at most once.
#[derive(Debug)]
pub(crate) struct PendingWait {
    id: u64,
    deadline: Instant,
    tx: watch::Sender<Option<Resolution>>,
}

impl PendingWait {
    pub(crate) fn new(id: u64, deadline: Instant) -> Self {
        let (tx, _) = watch::channel(None);
        Self { id, deadline, tx }
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    /// Whether the deadline has passed as of `now`.
    pub(crate) fn is_expired(&self, now: Instant) -> bool {
        self.deadline <= now
    }

    /// A handle for awaiting the resolution.
    pub(crate) fn subscribe(&self) -> WaitTicket {
        WaitTicket {
            id: self.id,
            rx: self.tx.subscribe(),
        }
    }

    pub(crate) fn resolve(self, resolution: Resolution) {
        self.tx.send_replace(Some(resolution));
    }
}

/// The caller-held half of a wait.
#[derive(Debug)]
pub(crate) struct WaitTicket {
    id: u64,
    rx: watch::Receiver<Option<Resolution>>,
}

impl WaitTicket {
    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    /// Wait for the resolution.
    ///
    /// A slot dropped without resolving reads as `Closed`.
    pub(crate) async fn resolved(&mut self) -> Resolution {
        loop {
            if let Some(resolution) = self.rx.borrow_and_update().clone() {
                return resolution;
            }
            if self.rx.changed().await.is_err() {
                return self
                    .rx
                    .borrow()
                    .clone()
                    .unwrap_or(Resolution::Closed);
            }
        }
    }
}
