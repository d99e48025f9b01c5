//! Proactive refresh of access tokens that are about to expire

use super::coordinator::RefreshCoordinator;
use super::error::RefreshError;
use chrono::Utc;
use latch_core::cookies::ACCESS_TOKEN;
use latch_core::token::expires_within;
use latch_core::{SessionConfig, TokenStore};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;

#[derive(Clone)]
pub struct ExpirationMonitor {
    store: Arc<dyn TokenStore>,
    coordinator: Arc<RefreshCoordinator>,
    lookahead: chrono::Duration,
    period: Duration,
}

impl ExpirationMonitor {
    pub fn new(
        store: Arc<dyn TokenStore>,
        coordinator: Arc<RefreshCoordinator>,
        config: &SessionConfig,
    ) -> Self {
        Self {
            store,
            coordinator,
            lookahead: config.refresh_lookahead(),
            period: config.monitor_interval(),
        }
    }

    /// Whether the stored access token expires inside the lookahead window.
    ///
    /// A missing or undecodable token is never "expiring".
    pub fn needs_refresh(&self) -> bool {
        self.store
            .get(ACCESS_TOKEN)
            .is_some_and(|token| expires_within(&token, Utc::now(), self.lookahead))
    }

    /// One check: refresh through the coordinator if the token is expiring.
    ///
    /// Returns `None` when no refresh was needed.
    pub async fn check(&self) -> Option<Result<String, RefreshError>> {
        if !self.needs_refresh() {
            return None;
        }
        debug!("Access token expires soon, refreshing proactively");
        Some(self.coordinator.refresh().await)
    }

    /// Run [`ExpirationMonitor::check`] every interval until the returned
    /// handle is cancelled or dropped. The first check happens one interval
    /// after spawning.
    pub fn spawn(&self) -> MonitorHandle {
        let cancel = CancellationToken::new();
        let monitor = self.clone();
        let token = cancel.clone();

        let task = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + monitor.period, monitor.period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            debug!(period = ?monitor.period, "Expiration monitor started");

            loop {
                tokio::select! {
                    () = token.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Some(Err(err)) = monitor.check().await {
                            warn!(error = %err, "Proactive refresh failed");
                        }
                    }
                }
            }

            debug!("Expiration monitor stopped");
        });

        MonitorHandle {
            cancel,
            task: Some(task),
        }
    }
}

/// Owns a running monitor. Dropping it stops the interval.
pub struct MonitorHandle {
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl MonitorHandle {
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Cancel and wait for the monitor task to finish
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for MonitorHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
