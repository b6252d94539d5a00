//! Cooperative cancellation of a run
//!
//! An interrupt moves the controller from `Running` to `Stopping`. The engine
//! checks the flag before every scheduling decision, stops spawning, drains
//! in-flight transfers and returns normally. Transfers already running are
//! never aborted.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Running,
    Stopping,
}

#[derive(Debug, Default)]
pub struct CancellationController {
    token: CancellationToken,
    interrupts: AtomicUsize,
}

impl CancellationController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an interrupt. The first one switches to `Stopping`; later ones only print a notice.
    pub fn request_stop(&self) -> RunState {
        let previous = self.interrupts.fetch_add(1, Ordering::SeqCst);
        if previous == 0 {
            warn!("Stopping current operation... please wait to avoid corrupted data");
            self.token.cancel();
        } else {
            info!("Please be patient, the process will be terminated soon.");
        }
        RunState::Stopping
    }

    pub fn state(&self) -> RunState {
        if self.token.is_cancelled() {
            RunState::Stopping
        } else {
            RunState::Running
        }
    }

    pub fn is_stopping(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn interrupt_count(&self) -> usize {
        self.interrupts.load(Ordering::SeqCst)
    }

    /// Resolves once a stop was requested.
    pub async fn stopped(&self) {
        self.token.cancelled().await
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Forward every Ctrl-C to [`Self::request_stop`] for the lifetime of the process.
    pub fn listen_for_interrupts(self: &Arc<Self>) -> JoinHandle<()> {
        let controller = Arc::clone(self);
        tokio::spawn(async move {
            while tokio::signal::ctrl_c().await.is_ok() {
                controller.request_stop();
            }
            warn!("Interrupt handler could not be installed");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_starts_running() {
        let controller = CancellationController::new();
        assert_eq!(controller.state(), RunState::Running);
        assert!(!controller.is_stopping());
        assert_eq!(controller.interrupt_count(), 0);
    }

    #[test]
    fn test_stop_is_one_way() {
        let controller = CancellationController::new();
        assert_eq!(controller.request_stop(), RunState::Stopping);
        assert_eq!(controller.request_stop(), RunState::Stopping);
        assert!(controller.is_stopping());
        assert_eq!(controller.interrupt_count(), 2);
    }

    #[tokio::test]
    async fn test_stopped_resolves_after_request() {
        let controller = Arc::new(CancellationController::new());
        let waiter = {
            let controller = Arc::clone(&controller);
            tokio::spawn(async move { controller.stopped().await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        controller.request_stop();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("stop should wake waiters")
            .unwrap();
    }
}
