//! Idle timeout watchdog, one per session.
//!
//! Polls on a fixed interval rather than arming a deadline, so an idle session
//! is noticed at most one interval after its timeout elapses. The watchdog
//! stops on its own once the session has left the registry or started closing,
//! whichever teardown path caused it.

use crate::session::{Session, SessionLifecycle};

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy)]
pub struct IdleMonitor {
    timeout: Duration,
    interval: Duration,
}

impl IdleMonitor {
    pub fn new(timeout: Duration, interval: Duration) -> Self {
        Self { timeout, interval }
    }

    pub fn spawn(self, session: Arc<Session>, lifecycle: SessionLifecycle) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(session, lifecycle).await })
    }

    pub fn is_expired(&self, session: &Session) -> bool {
        session.idle_for() > self.timeout
    }

    pub async fn run(self, session: Arc<Session>, lifecycle: SessionLifecycle) {
        let mut closing = session.closing_signal();
        // Subscribing marks the current value seen, so a teardown that ran
        // before this task was first polled would never wake `changed()`
        if *closing.borrow_and_update() {
            debug!(session_id = %session.id(), "Idle monitor not started, session already closing");
            return;
        }
        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = closing.changed() => {
                    debug!(session_id = %session.id(), "Idle monitor stopping, session closing");
                    return;
                }
            }

            if !lifecycle.registry().contains(session.id()) || *closing.borrow() {
                debug!(session_id = %session.id(), "Idle monitor stopping, session gone");
                return;
            }

            if self.is_expired(&session) {
                info!(
                    session_id = %session.id(),
                    idle_secs = session.idle_for().as_secs(),
                    "Session idle, terminating"
                );
                lifecycle.close_session(&session).await;
                return;
            }
        }
    }
}
