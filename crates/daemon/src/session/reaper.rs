//! Periodic cleanup of idle and ended sessions.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::registry::SessionRegistry;
use super::remote::RemoteConnector;

/// Background task that sweeps a [`SessionRegistry`] on a fixed interval.
///
/// The first sweep happens one full interval after spawning.
pub struct Reaper {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl Reaper {
    /// Spawns the sweep loop.
    pub fn spawn<C: RemoteConnector>(
        registry: Arc<SessionRegistry<C>>,
        interval: Duration,
        max_idle: Duration,
    ) -> Self {
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            tracing::info!(
                interval_secs = interval.as_secs(),
                max_idle_secs = max_idle.as_secs(),
                "Session reaper started"
            );

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let reaped = registry.reap_expired(max_idle).await;
                        if reaped > 0 {
                            tracing::info!(reaped, remaining = registry.len(), "Reaped expired sessions");
                        } else {
                            tracing::debug!(sessions = registry.len(), "Reaper sweep found nothing to do");
                        }
                    }
                }
            }

            tracing::debug!("Session reaper stopped");
        });

        Self { cancel, handle }
    }

    /// Returns true while the sweep loop is running.
    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    /// Stops the sweep loop and waits for it to exit.
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.handle.await {
            if e.is_panic() {
                tracing::error!("Session reaper panicked");
            }
        }
    }
}
