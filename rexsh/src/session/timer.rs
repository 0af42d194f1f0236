//! Periodic stall check.

use std::time::Duration;

use tokio::time::{Instant, Interval, MissedTickBehavior};

/// Ticks every `period` until cancelled; pending forever afterwards.
#[derive(Debug)]
pub(crate) struct StallTimer {
    interval: Option<Interval>,
}

impl StallTimer {
    pub(crate) fn new(period: Duration) -> Self {
        let period = period.max(Duration::from_millis(1));
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self {
            interval: Some(interval),
        }
    }

    pub(crate) async fn tick(&mut self) {
        match self.interval.as_mut() {
            Some(interval) => {
                interval.tick().await;
            }
            None => std::future::pending().await,
        }
    }

    /// Stop ticking. Returns `true` only for the first call.
    pub(crate) fn cancel(&mut self) -> bool {
        self.interval.take().is_some()
    }

    pub(crate) fn is_active(&self) -> bool {
        self.interval.is_some()
    }
}
