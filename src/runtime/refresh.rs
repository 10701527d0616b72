//! Availability refresh timer
//!
//! An explicit handle owned by the runtime next to the state it serves. It is
//! started and stopped only in response to `StartRefreshTimer` /
//! `StopRefreshTimer` effects.

use std::time::Duration;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

pub struct RefreshTimer {
    interval: Duration,
    running: Option<CancellationToken>,
}

impl RefreshTimer {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval: interval.max(Duration::from_millis(1)),
            running: None,
        }
    }

    /// Start ticking; returns false if the timer was already running
    pub fn start<F>(&mut self, on_tick: F) -> bool
    where
        F: Fn() + Send + 'static,
    {
        if self.running.is_some() {
            return false;
        }

        let token = CancellationToken::new();
        let cancel = token.clone();
        let period = self.interval;

        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => on_tick(),
                }
            }
        });

        tracing::debug!(interval_ms = %period.as_millis(), "Availability refresh started");
        self.running = Some(token);
        true
    }

    /// Stop ticking; returns false if the timer was not running
    pub fn stop(&mut self) -> bool {
        match self.running.take() {
            Some(token) => {
                token.cancel();
                tracing::debug!("Availability refresh stopped");
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }
}

impl Drop for RefreshTimer {
    fn drop(&mut self) {
        if let Some(token) = self.running.take() {
            token.cancel();
        }
    }
}
