//! Shutdown coordination shared by the accept loop and every connection.

use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio_util::sync::CancellationToken;

/// Lifecycle phase of a server or client.
///
/// Transitions are monotonic: `Running -> Stopping -> Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Running,
    Stopping,
    Stopped,
}

/// Tri-state shutdown flag guarded by a lock.
///
/// Exactly one caller wins the `Running -> Stopping` transition and runs the
/// shutdown side effects; every later call is a no-op.
#[derive(Debug)]
pub struct ShutdownCoordinator {
    phase: Mutex<Phase>,
    stop: CancellationToken,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self {
            phase: Mutex::new(Phase::Running),
            stop: CancellationToken::new(),
        }
    }

    /// Returns the current phase.
    pub fn phase(&self) -> Phase {
        *self.lock()
    }

    /// Returns `true` while no shutdown has been requested.
    pub fn is_running(&self) -> bool {
        self.phase() == Phase::Running
    }

    /// Token cancelled when shutdown starts.
    ///
    /// Connections hang their close-request token off a child of this one.
    pub fn stop_token(&self) -> &CancellationToken {
        &self.stop
    }

    /// Runs `f` while holding the lock, but only if still running.
    ///
    /// The accept loop registers new connections through this so a
    /// concurrent shutdown can never miss one.
    pub fn if_running<T>(&self, f: impl FnOnce() -> T) -> Option<T> {
        let phase = self.lock();
        if *phase != Phase::Running {
            return None;
        }
        Some(f())
    }

    /// Performs the shutdown transition.
    ///
    /// Cancels the stop token and runs `close_all` under the lock. Returns
    /// `false` if another caller already shut down.
    pub fn shutdown(&self, close_all: impl FnOnce()) -> bool {
        let mut phase = self.lock();
        if *phase != Phase::Running {
            return false;
        }

        *phase = Phase::Stopping;
        self.stop.cancel();
        close_all();
        *phase = Phase::Stopped;
        true
    }

    fn lock(&self) -> MutexGuard<'_, Phase> {
        self.phase.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn starts_running() {
        let coordinator = ShutdownCoordinator::new();
        assert_eq!(coordinator.phase(), Phase::Running);
        assert!(!coordinator.stop_token().is_cancelled());
    }

    #[test]
    fn shutdown_runs_side_effects_once() {
        let coordinator = ShutdownCoordinator::new();
        let calls = AtomicUsize::new(0);

        assert!(coordinator.shutdown(|| {
            calls.fetch_add(1, Ordering::SeqCst);
        }));
        assert!(!coordinator.shutdown(|| {
            calls.fetch_add(1, Ordering::SeqCst);
        }));

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(coordinator.phase(), Phase::Stopped);
        assert!(coordinator.stop_token().is_cancelled());
    }

    #[test]
    fn side_effects_observe_stopping() {
        let coordinator = Arc::new(ShutdownCoordinator::new());
        let stop = coordinator.stop_token().clone();
        coordinator.shutdown(|| {
            assert!(stop.is_cancelled());
        });
    }

    #[test]
    fn if_running_skips_after_shutdown() {
        let coordinator = ShutdownCoordinator::new();
        assert_eq!(coordinator.if_running(|| 7), Some(7));

        coordinator.shutdown(|| {});
        assert_eq!(coordinator.if_running(|| 7), None);
    }

    #[test]
    fn concurrent_shutdown_has_one_winner() {
        let coordinator = Arc::new(ShutdownCoordinator::new());
        let winners = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let coordinator = Arc::clone(&coordinator);
                let winners = Arc::clone(&winners);
                std::thread::spawn(move || {
                    if coordinator.shutdown(|| {}) {
                        winners.fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(winners.load(Ordering::SeqCst), 1);
    }
}
