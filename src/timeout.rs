// Per-call deadlines for network attempts.
//
// Every request the gateway makes runs under a Deadline. The deadline owns a
// CancelSignal that fires when the timer elapses or when an optional external
// signal cancels, whichever comes first. The timer is a spawned task; it is
// aborted on cleanup, and cleanup also runs on drop so no exit path leaks it.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Returned by [`Deadline::run`] when the signal fires before the operation finishes.
#[derive(Debug, Error)]
#[error("request aborted: deadline of {}ms exceeded or cancelled", .0.as_millis())]
pub struct DeadlineExceeded(pub Duration);

/// A one-way cancellation flag that can be cloned and awaited.
#[derive(Debug, Clone)]
pub struct CancelSignal {
    inner: Arc<watch::Sender<bool>>,
}

impl Default for CancelSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { inner: Arc::new(tx) }
    }

    /// Fire the signal. Idempotent.
    pub fn cancel(&self) {
        self.inner.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.inner.borrow()
    }

    /// Resolve once the signal has fired (immediately if it already has).
    pub async fn cancelled(&self) {
        let mut rx = self.inner.subscribe();
        // The sender lives as long as `self`, so this can't observe a closed channel.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

/// A running deadline. Dropping it releases the timer.
#[derive(Debug)]
pub struct Deadline {
    signal: CancelSignal,
    timer: Option<JoinHandle<()>>,
    duration: Duration,
}

/// Start a deadline that fires after `duration`, or as soon as `external` cancels.
///
/// Must be called from within a tokio runtime: the timer is a spawned task.
pub fn with_timeout(duration: Duration, external: Option<&CancelSignal>) -> Deadline {
    let signal = CancelSignal::new();

    if external.is_some_and(CancelSignal::is_cancelled) {
        signal.cancel();
        return Deadline {
            signal,
            timer: None,
            duration,
        };
    }

    let fired = signal.clone();
    let external = external.cloned();
    let timer = tokio::spawn(async move {
        match external {
            Some(external) => {
                tokio::select! {
                    _ = tokio::time::sleep(duration) => {}
                    _ = external.cancelled() => {}
                }
            }
            None => tokio::time::sleep(duration).await,
        }
        fired.cancel();
    });

    Deadline {
        signal,
        timer: Some(timer),
        duration,
    }
}

impl Deadline {
    pub fn signal(&self) -> &CancelSignal {
        &self.signal
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Release the pending timer without waiting for it to fire.
    pub fn cleanup(mut self) {
        self.release();
    }

    /// Race `operation` against this deadline, cleaning up on both outcomes.
    pub async fn run<T, F>(self, operation: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let outcome = tokio::select! {
            biased;
            _ = self.signal.cancelled() => Err(DeadlineExceeded(self.duration).into()),
            result = operation => result,
        };
        self.cleanup();
        outcome
    }

    fn release(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

impl Drop for Deadline {
    fn drop(&mut self) {
        self.release();
    }
}
