//! Idle backoff for the run polling loop

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Notify};
use tracing::{debug, trace};

/// Polling configuration
#[derive(Debug, Clone, PartialEq)]
pub struct PollerConfig {
    /// Interval while runs keep showing up
    pub min_interval: Duration,

    /// Ceiling for the idle interval
    pub max_interval: Duration,

    /// Growth factor applied after each empty poll
    pub backoff_multiplier: f64,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_millis(100),
            max_interval: Duration::from_secs(5),
            backoff_multiplier: 1.5,
        }
    }
}

impl PollerConfig {
    pub fn with_min_interval(mut self, interval: Duration) -> Self {
        self.min_interval = interval;
        self
    }

    pub fn with_max_interval(mut self, interval: Duration) -> Self {
        self.max_interval = interval;
        self
    }

    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier.max(1.0);
        self
    }
}

/// Tracks the current poll interval and waits between polls.
///
/// A wait ends early when the router creates a run (`wakeup`) or when
/// shutdown is signalled.
pub struct RunPoller {
    config: PollerConfig,
    current_interval: Duration,
    wakeup: Arc<Notify>,
    shutdown_rx: watch::Receiver<bool>,
}

impl RunPoller {
    pub fn new(config: PollerConfig, wakeup: Arc<Notify>, shutdown_rx: watch::Receiver<bool>) -> Self {
        Self {
            current_interval: config.min_interval,
            config,
            wakeup,
            shutdown_rx,
        }
    }

    /// Feed back how many runs the last poll found
    pub fn record_poll(&mut self, runs_found: usize) {
        if runs_found > 0 {
            self.current_interval = self.config.min_interval;
        } else {
            let grown = self.current_interval.as_secs_f64() * self.config.backoff_multiplier;
            self.current_interval = Duration::from_secs_f64(grown).min(self.config.max_interval);
            trace!(interval_ms = self.current_interval.as_millis() as u64, "no runs due, backing off");
        }
    }

    /// Wait for the current interval. Returns true if shutdown was signalled.
    pub async fn wait(&mut self) -> bool {
        if self.is_shutdown() {
            return true;
        }
        let wakeup = Arc::clone(&self.wakeup);
        tokio::select! {
            _ = tokio::time::sleep(self.current_interval) => false,
            _ = wakeup.notified() => {
                self.current_interval = self.config.min_interval;
                false
            }
            _ = self.shutdown_rx.changed() => {
                debug!("Shutdown signal received during wait");
                true
            }
        }
    }

    pub fn current_interval(&self) -> Duration {
        self.current_interval
    }

    pub fn is_shutdown(&self) -> bool {
        *self.shutdown_rx.borrow()
    }
}
