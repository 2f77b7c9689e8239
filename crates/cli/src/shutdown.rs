use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

/// Time on top of the drain grace for committing what finished in it.
const COMMIT_MARGIN: Duration = Duration::from_secs(10);

/// What an interrupt asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Escalation {
    /// Stop starting units and let in-flight calls drain.
    Drain,
    /// Stop now; committed phases are safe, the rest resumes next run.
    Abort,
}

/// Turns SIGINT/SIGTERM into batch cancellation. The first signal cancels
/// and starts a watchdog bounded by the drain grace; a second signal, or the
/// watchdog firing, exits the process with [`ExitCode::ShutdownRequested`].
#[derive(Clone)]
pub struct ShutdownCoordinator {
    cancel_token: CancellationToken,
    signals: Arc<AtomicUsize>,
    drain_grace: Duration,
}

impl ShutdownCoordinator {
    pub fn new(cancel_token: CancellationToken, drain_grace: Duration) -> Self {
        Self {
            cancel_token,
            signals: Arc::new(AtomicUsize::new(0)),
            drain_grace,
        }
    }

    /// Records one interrupt; only the first cancels.
    pub fn trigger(&self) -> Escalation {
        if self.signals.fetch_add(1, Ordering::SeqCst) == 0 {
            self.cancel_token.cancel();
            Escalation::Drain
        } else {
            Escalation::Abort
        }
    }

    /// Longest a cancelled run may keep the process alive.
    pub fn hard_deadline(&self) -> Duration {
        self.drain_grace + COMMIT_MARGIN
    }

    pub fn register_handlers(&self) {
        let coordinator = self.clone();
        tokio::spawn(async move {
            #[cfg(unix)]
            let mut terminate = match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                Ok(stream) => Some(stream),
                Err(e) => {
                    error!(error = %e, "Failed to install SIGTERM handler");
                    None
                }
            };

            loop {
                #[cfg(unix)]
                let sigterm = async {
                    match terminate.as_mut() {
                        Some(stream) => {
                            stream.recv().await;
                        }
                        None => std::future::pending::<()>().await,
                    }
                };
                #[cfg(not(unix))]
                let sigterm = std::future::pending::<()>();

                let name = tokio::select! {
                    res = signal::ctrl_c() => match res {
                        Ok(()) => "SIGINT",
                        Err(e) => {
                            error!(error = %e, "Failed to install SIGINT handler");
                            std::future::pending::<&str>().await
                        }
                    },
                    _ = sigterm => "SIGTERM",
                };

                match coordinator.trigger() {
                    Escalation::Drain => {
                        warn!(
                            signal = name,
                            grace_secs = coordinator.drain_grace.as_secs(),
                            "Shutdown requested; in-flight units are draining, signal again to stop now"
                        );
                        coordinator.spawn_watchdog();
                    }
                    Escalation::Abort => {
                        error!(signal = name, "Second signal; exiting without waiting for in-flight units");
                        std::process::exit(ExitCode::ShutdownRequested.as_i32());
                    }
                }
            }
        });
    }

    fn spawn_watchdog(&self) {
        let deadline = self.hard_deadline();
        tokio::spawn(async move {
            tokio::time::sleep(deadline).await;
            error!(
                waited_secs = deadline.as_secs(),
                "Units still running after the drain grace; exiting"
            );
            std::process::exit(ExitCode::ShutdownRequested.as_i32());
        });
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.signals.load(Ordering::SeqCst) > 0
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    Success = 0,
    GeneralError = 1,
    /// Some units failed; the report lists them.
    UnitsFailed = 2,
    /// Interrupted; rerunning the same configuration resumes.
    ShutdownRequested = 130,
}

impl ExitCode {
    pub fn as_i32(self) -> i32 {
        self as i32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_signal_drains_and_second_aborts() {
        let token = CancellationToken::new();
        let coordinator = ShutdownCoordinator::new(token.clone(), Duration::from_secs(30));
        assert!(!coordinator.is_shutdown_requested());

        assert_eq!(coordinator.trigger(), Escalation::Drain);
        assert!(token.is_cancelled());
        assert!(coordinator.is_shutdown_requested());

        assert_eq!(coordinator.clone().trigger(), Escalation::Abort);
    }

    #[test]
    fn hard_deadline_leaves_room_after_the_grace() {
        let coordinator = ShutdownCoordinator::new(CancellationToken::new(), Duration::from_secs(30));
        assert_eq!(coordinator.hard_deadline(), Duration::from_secs(40));
    }

    #[test]
    fn interrupted_runs_exit_with_the_sigint_code() {
        assert_eq!(ExitCode::ShutdownRequested.as_i32(), 130);
        assert_eq!(ExitCode::UnitsFailed.as_i32(), 2);
    }
}
