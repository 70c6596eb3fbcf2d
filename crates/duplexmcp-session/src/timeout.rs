//! Per-request deadline tracking with progress resets and a hard ceiling.
//!
//! A controller races two concerns: a sleep to the current deadline and a
//! progress-signal stream. Progress refreshes the deadline when
//! `reset_on_progress` is enabled; every wake re-checks elapsed time
//! against `max_total`, so no amount of progress can stretch a request
//! past the ceiling.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;

use duplexmcp_protocol::McpError;

/// Deadline policy for one outbound request.
#[derive(Debug, Clone, Copy)]
pub struct TimeoutPolicy {
    /// Base deadline, measured from send (or from the last progress signal
    /// when `reset_on_progress` is set)
    pub timeout: Duration,
    /// Refresh the deadline on each progress signal
    pub reset_on_progress: bool,
    /// Hard ceiling on total elapsed time
    pub max_total: Option<Duration>,
}

/// Handle used to feed progress signals into a running controller.
///
/// Cheap to clone; signalling after the controller finished is a no-op.
#[derive(Debug, Clone)]
pub struct ProgressSignal {
    tx: mpsc::UnboundedSender<()>,
}

impl ProgressSignal {
    /// Record one progress event.
    pub fn signal(&self) {
        let _ = self.tx.send(());
    }
}

/// Deadline tracker for one request.
#[derive(Debug)]
pub struct TimeoutController {
    policy: TimeoutPolicy,
    progress_rx: mpsc::UnboundedReceiver<()>,
    cancel: CancellationToken,
}

impl TimeoutController {
    /// Create a controller and the signal handle that feeds it.
    #[must_use]
    pub fn new(policy: TimeoutPolicy) -> (Self, ProgressSignal) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                policy,
                progress_rx: rx,
                cancel: CancellationToken::new(),
            },
            ProgressSignal { tx },
        )
    }

    /// Token that terminates the controller cleanly when cancelled.
    #[must_use]
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run until a deadline expires or the controller is cancelled.
    ///
    /// Returns the timeout error when a deadline fires, `None` when
    /// cancelled. The engine races this future against the response.
    pub async fn run(mut self) -> Option<McpError> {
        let start = Instant::now();
        let mut deadline = start + self.policy.timeout;
        let max_deadline = self.policy.max_total.map(|d| start + d);
        let mut signals_open = true;

        loop {
            let wake = match max_deadline {
                Some(m) if m < deadline => m,
                _ => deadline,
            };

            tokio::select! {
                () = self.cancel.cancelled() => return None,
                () = sleep_until(wake) => {
                    if let (Some(m), Some(max_total)) = (max_deadline, self.policy.max_total)
                        && Instant::now() >= m
                    {
                        return Some(McpError::Timeout { timeout: max_total, max_total: true });
                    }
                    return Some(McpError::Timeout {
                        timeout: self.policy.timeout,
                        max_total: false,
                    });
                }
                received = self.progress_rx.recv(), if signals_open => {
                    match received {
                        Some(()) => {
                            let now = Instant::now();
                            if let (Some(m), Some(max_total)) = (max_deadline, self.policy.max_total)
                                && now >= m
                            {
                                return Some(McpError::Timeout {
                                    timeout: max_total,
                                    max_total: true,
                                });
                            }
                            if self.policy.reset_on_progress {
                                deadline = now + self.policy.timeout;
                            }
                        }
                        None => signals_open = false,
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{advance, sleep};

    fn policy(timeout_ms: u64, reset: bool, max_total_ms: Option<u64>) -> TimeoutPolicy {
        TimeoutPolicy {
            timeout: Duration::from_millis(timeout_ms),
            reset_on_progress: reset,
            max_total: max_total_ms.map(Duration::from_millis),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_base_deadline_fires() {
        let (controller, _signal) = TimeoutController::new(policy(100, false, None));
        let started = Instant::now();
        let error = controller.run().await.unwrap();
        assert_eq!(
            error,
            McpError::Timeout {
                timeout: Duration::from_millis(100),
                max_total: false
            }
        );
        assert_eq!(started.elapsed(), Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_progress_resets_deadline() {
        let (controller, signal) = TimeoutController::new(policy(100, true, None));
        let run = tokio::spawn(controller.run());

        // Five signals spaced under the base timeout keep the request alive.
        for _ in 0..5 {
            sleep(Duration::from_millis(80)).await;
            signal.signal();
        }
        let before_expiry = Instant::now();
        let error = run.await.unwrap().unwrap();
        assert_eq!(
            error,
            McpError::Timeout {
                timeout: Duration::from_millis(100),
                max_total: false
            }
        );
        // Expires one base timeout after the last signal.
        assert_eq!(before_expiry.elapsed(), Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_reset_ignores_progress() {
        let (controller, signal) = TimeoutController::new(policy(100, false, None));
        let run = tokio::spawn(controller.run());
        let started = Instant::now();

        sleep(Duration::from_millis(60)).await;
        signal.signal();

        let error = run.await.unwrap().unwrap();
        assert!(matches!(error, McpError::Timeout { max_total: false, .. }));
        assert_eq!(started.elapsed(), Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hard_ceiling_beats_progress() {
        let (controller, signal) = TimeoutController::new(policy(100, true, Some(250)));
        let run = tokio::spawn(controller.run());
        let started = Instant::now();

        // Keep resetting; the ceiling must still end it at 250ms.
        for _ in 0..10 {
            sleep(Duration::from_millis(50)).await;
            signal.signal();
            if run.is_finished() {
                break;
            }
        }
        let error = run.await.unwrap().unwrap();
        assert_eq!(
            error,
            McpError::Timeout {
                timeout: Duration::from_millis(250),
                max_total: true
            }
        );
        assert!(started.elapsed() <= Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_terminates_cleanly() {
        let (controller, _signal) = TimeoutController::new(policy(1_000, true, None));
        let cancel = controller.cancellation();
        let run = tokio::spawn(controller.run());

        advance(Duration::from_millis(10)).await;
        cancel.cancel();
        assert!(run.await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_signal_handle_keeps_deadline() {
        let (controller, signal) = TimeoutController::new(policy(100, true, None));
        drop(signal);
        let started = Instant::now();
        let error = controller.run().await.unwrap();
        assert!(matches!(error, McpError::Timeout { max_total: false, .. }));
        assert_eq!(started.elapsed(), Duration::from_millis(100));
    }
}
