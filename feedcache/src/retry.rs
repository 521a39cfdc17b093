//! Retry scheduling with exponential backoff.
//!
//! A failed hydration either earns a delayed retry or exhausts the video. The
//! decision is made by [`RetryPolicy`]; the delayed retry itself is a spawned
//! timer owned by [`RetryCoordinator`].
//!
//! # Architecture
//!
//! ```text
//! preload fails ──► RetryCoordinator::schedule ──► timer task (sleep / cancel)
//!                                                        │
//!                                                        ▼ RetryRequest
//!                                                  retry driver (manager)
//!                                                        │ re-validates
//!                                                        ▼
//!                                                   preload again
//! ```
//!
//! Timers never touch feed state. They only deliver a [`RetryRequest`] over a
//! channel, and the receiving side decides whether the retry is still wanted.

use std::collections::HashMap;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::model::VideoId;

/// Default delay before the first retry (500ms).
pub const DEFAULT_BACKOFF_BASE_MS: u64 = 500;

/// Default cap on the retry delay (30 seconds).
pub const DEFAULT_BACKOFF_MAX_MS: u64 = 30_000;

/// Default number of retries after the initial attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// What to do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Try again after `delay`.
    Retry { delay: Duration },
    /// Give up; the video is permanently failed.
    Exhaust,
}

/// Exponential backoff policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries allowed after the initial attempt.
    pub max_retries: u32,
    /// Delay after the first failure.
    pub base: Duration,
    /// Maximum delay cap.
    pub max: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base: Duration::from_millis(DEFAULT_BACKOFF_BASE_MS),
            max: Duration::from_millis(DEFAULT_BACKOFF_MAX_MS),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base: Duration, max: Duration) -> Self {
        Self {
            max_retries,
            base,
            max,
        }
    }

    /// Delay before retry number `retry_count` (1-based).
    ///
    /// `min(base * 2^(retry_count - 1), max)`.
    pub fn backoff(&self, retry_count: u32) -> Duration {
        let exponent = retry_count.saturating_sub(1);
        let factor = 1u32.checked_shl(exponent).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.max)
    }

    /// Decide what follows a failure that brought the count to `retry_count`.
    pub fn decide(&self, retry_count: u32) -> RetryDecision {
        if retry_count <= self.max_retries {
            RetryDecision::Retry {
                delay: self.backoff(retry_count),
            }
        } else {
            RetryDecision::Exhaust
        }
    }
}

/// A due retry, delivered when its timer fires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryRequest {
    pub id: VideoId,
    /// `retry_count` of the record when the retry was scheduled.
    pub expected_retry_count: u32,
    generation: u64,
}

struct PendingRetry {
    generation: u64,
    token: CancellationToken,
}

/// Owner of pending retry timers, at most one per video.
pub struct RetryCoordinator {
    policy: RetryPolicy,
    runtime: Handle,
    shutdown: CancellationToken,
    sender: mpsc::UnboundedSender<RetryRequest>,
    pending: HashMap<VideoId, PendingRetry>,
    next_generation: u64,
}

impl std::fmt::Debug for RetryCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryCoordinator")
            .field("policy", &self.policy)
            .field("pending", &self.pending.len())
            .field("shut_down", &self.shutdown.is_cancelled())
            .finish()
    }
}

impl RetryCoordinator {
    /// Create a coordinator and the receiving end for due retries.
    ///
    /// Timers are spawned on `runtime` and all die with `shutdown`.
    pub fn new(
        policy: RetryPolicy,
        runtime: Handle,
        shutdown: CancellationToken,
    ) -> (Self, mpsc::UnboundedReceiver<RetryRequest>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let coordinator = Self {
            policy,
            runtime,
            shutdown,
            sender,
            pending: HashMap::new(),
            next_generation: 0,
        };
        (coordinator, receiver)
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Start a timer that requests a retry of `id` after `delay`.
    ///
    /// Replaces any timer already pending for the id.
    pub fn schedule(&mut self, id: &VideoId, retry_count: u32, delay: Duration) {
        if self.shutdown.is_cancelled() {
            return;
        }
        self.cancel(id.as_str());

        let generation = self.next_generation;
        self.next_generation += 1;
        let token = self.shutdown.child_token();
        self.pending.insert(
            id.clone(),
            PendingRetry {
                generation,
                token: token.clone(),
            },
        );

        let request = RetryRequest {
            id: id.clone(),
            expected_retry_count: retry_count,
            generation,
        };
        let sender = self.sender.clone();
        debug!(
            id = %id,
            retry_count,
            delay_ms = delay.as_millis() as u64,
            "Scheduled retry"
        );
        self.runtime.spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    // Receiver gone means the manager is shutting down.
                    let _ = sender.send(request);
                }
            }
        });
    }

    /// Cancel the pending timer for `id`. Returns `true` if one existed.
    pub fn cancel(&mut self, id: &str) -> bool {
        match self.pending.remove(id) {
            Some(pending) => {
                pending.token.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel every timer and refuse new ones.
    pub fn shutdown(&mut self) {
        self.shutdown.cancel();
        self.pending.clear();
    }

    /// Claim a delivered request.
    ///
    /// Returns `false` when the timer was cancelled or replaced after it had
    /// already sent, in which case the request must be dropped.
    pub fn claim(&mut self, request: &RetryRequest) -> bool {
        match self.pending.get(&request.id) {
            Some(pending) if pending.generation == request.generation => {
                self.pending.remove(&request.id);
                true
            }
            _ => false,
        }
    }

    pub fn is_pending(&self, id: &str) -> bool {
        self.pending.contains_key(id)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}
