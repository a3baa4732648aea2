//! Bounded-concurrency admission control with retry for remote capability calls.
//!
//! Every external speech call goes through a [`CallGate`]: the caller is
//! admitted once a semaphore token for the capability is free, the call is
//! retried with exponential backoff on transient failures, and the token is
//! released exactly once regardless of outcome. Counters are advisory and
//! never gate behavior.

use crate::error::RemoteError;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{info, warn};

/// Terminal outcome of a gated call.
#[derive(Debug, thiserror::Error)]
pub enum GateError {
    /// A transient failure survived every retry attempt.
    #[error("{capability} failed after {attempts} attempts: {source}")]
    Exhausted {
        capability: &'static str,
        attempts: u32,
        source: RemoteError,
    },
    /// A non-transient failure; surfaced immediately, never retried.
    #[error("{capability} call rejected: {source}")]
    Rejected {
        capability: &'static str,
        source: RemoteError,
    },
}

impl GateError {
    /// Whether the underlying failure was transient. Callers use this to
    /// pick between a try-again-shortly message and a fatal one.
    pub fn is_transient(&self) -> bool {
        matches!(self, GateError::Exhausted { .. })
    }
}

/// Holds the admission token of a streaming call.
///
/// Dropping the permit releases the token; a caller that receives a lazy
/// stream keeps this alive until the stream is drained so the capability
/// ceiling counts the whole transfer.
pub struct AdmissionPermit {
    _permit: OwnedSemaphorePermit,
}

/// Point-in-time view of a gate's counters.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct GateStats {
    pub attempted: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub queued: u64,
}

/// One admission gate per external capability (transcription, synthesis).
pub struct CallGate {
    capability: &'static str,
    semaphore: Arc<Semaphore>,
    max_attempts: u32,
    initial_delay: Duration,
    attempted: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    queued: AtomicU64,
}

impl CallGate {
    pub fn new(
        capability: &'static str,
        max_concurrency: usize,
        max_attempts: u32,
        initial_delay: Duration,
    ) -> Self {
        Self {
            capability,
            semaphore: Arc::new(Semaphore::new(max_concurrency)),
            max_attempts: max_attempts.max(1),
            initial_delay,
            attempted: AtomicU64::new(0),
            succeeded: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            queued: AtomicU64::new(0),
        }
    }

    pub fn capability(&self) -> &'static str {
        self.capability
    }

    pub fn stats(&self) -> GateStats {
        GateStats {
            attempted: self.attempted.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            queued: self.queued.load(Ordering::Relaxed),
        }
    }

    /// Runs `op` under the capability ceiling, retrying transient failures.
    ///
    /// The admission token is released when this returns.
    pub async fn execute<T, F, Fut>(&self, op: F) -> Result<T, GateError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, RemoteError>>,
    {
        let (value, _permit) = self.execute_with_permit(op).await?;
        Ok(value)
    }

    /// Like [`execute`](Self::execute), but hands the admission token back
    /// to the caller. Used for synthesis, whose result is a lazy stream
    /// that must stay admitted until fully forwarded.
    pub async fn execute_with_permit<T, F, Fut>(
        &self,
        op: F,
    ) -> Result<(T, AdmissionPermit), GateError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, RemoteError>>,
    {
        self.attempted.fetch_add(1, Ordering::Relaxed);
        if self.semaphore.available_permits() == 0 {
            self.queued.fetch_add(1, Ordering::Relaxed);
            warn!(capability = self.capability, "admission gate saturated, waiting");
        }
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| GateError::Rejected {
                capability: self.capability,
                source: RemoteError::Transport("admission gate closed".into()),
            })?;

        let mut attempt = 1u32;
        loop {
            match op().await {
                Ok(value) => {
                    self.succeeded.fetch_add(1, Ordering::Relaxed);
                    return Ok((value, AdmissionPermit { _permit: permit }));
                }
                Err(err) if err.is_transient() && attempt < self.max_attempts => {
                    // Delay before attempt n is initial * 2^(n-1).
                    let delay = self.initial_delay * 2u32.pow(attempt - 1);
                    info!(
                        capability = self.capability,
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transient failure, retrying after backoff"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => {
                    self.failed.fetch_add(1, Ordering::Relaxed);
                    return if err.is_transient() {
                        Err(GateError::Exhausted {
                            capability: self.capability,
                            attempts: attempt,
                            source: err,
                        })
                    } else {
                        Err(GateError::Rejected {
                            capability: self.capability,
                            source: err,
                        })
                    };
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    fn fast_gate(max_concurrency: usize) -> CallGate {
        CallGate::new("test", max_concurrency, 3, Duration::from_millis(1))
    }

    #[tokio::test]
    async fn success_passes_value_through() {
        let gate = fast_gate(1);
        let result = gate.execute(|| async { Ok::<_, RemoteError>(42) }).await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(gate.stats().succeeded, 1);
    }

    #[tokio::test]
    async fn transient_failure_is_retried_until_success() {
        let gate = fast_gate(1);
        let calls = AtomicU32::new(0);
        let result = gate
            .execute(|| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(RemoteError::RateLimited)
                    } else {
                        Ok("ok")
                    }
                }
            })
            .await;
        assert_eq!(result.unwrap(), "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhaustion_surfaces_last_error_as_transient() {
        let gate = fast_gate(1);
        let calls = AtomicU32::new(0);
        let err = gate
            .execute(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(RemoteError::Unavailable) }
            })
            .await
            .unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(err.is_transient());
        assert!(matches!(err, GateError::Exhausted { attempts: 3, .. }));
    }

    #[tokio::test]
    async fn non_transient_failure_is_never_retried() {
        let gate = fast_gate(1);
        let calls = AtomicU32::new(0);
        let err = gate
            .execute(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(RemoteError::Http { status: 400 }) }
            })
            .await
            .unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn token_is_released_after_failure() {
        let gate = fast_gate(1);
        let _ = gate
            .execute(|| async { Err::<(), _>(RemoteError::Http { status: 400 }) })
            .await;
        // A second call would hang forever if the token leaked.
        let result = gate.execute(|| async { Ok::<_, RemoteError>(1) }).await;
        assert_eq!(result.unwrap(), 1);
    }

    #[tokio::test]
    async fn held_permit_bounds_concurrent_admission() {
        let gate = Arc::new(fast_gate(1));
        let (first, permit) = gate
            .execute_with_permit(|| async { Ok::<_, RemoteError>("stream") })
            .await
            .unwrap();
        assert_eq!(first, "stream");

        // While the permit is held, a second call must queue.
        let gate2 = gate.clone();
        let pending = tokio::spawn(async move {
            gate2.execute(|| async { Ok::<_, RemoteError>(2) }).await
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!pending.is_finished());
        assert_eq!(gate.stats().queued, 1);

        drop(permit);
        let result = pending.await.unwrap();
        assert_eq!(result.unwrap(), 2);
    }
}
