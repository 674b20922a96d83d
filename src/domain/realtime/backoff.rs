//! Reconnect backoff.
//!
//! `delay = min(cap, base * 2^attempt) + jitter(0, jitter_max)`
//!
//! The attempt counter only returns to zero once a connection has stayed
//! up for the stability window, so a flapping server cannot pull the delay
//! back to the floor on every brief connect.

use rand::Rng;
use std::time::Duration;
use tokio::time::Instant;

/// Delay parameters. Pure; holds no per-client state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub cap: Duration,
    /// Upper bound of the uniform jitter added to every delay.
    pub jitter_max: Duration,
    /// How long `Connected` must hold before the attempt counter resets.
    pub stability_window: Duration,
}

impl BackoffPolicy {
    /// Creates a policy with jitter up to `base` and a stability window of `4 × base`.
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self {
            base,
            cap,
            jitter_max: base,
            stability_window: base.saturating_mul(4),
        }
    }

    /// Sets the jitter bound.
    pub fn with_jitter(mut self, jitter_max: Duration) -> Self {
        self.jitter_max = jitter_max;
        self
    }

    /// Sets the stability window.
    pub fn with_stability_window(mut self, window: Duration) -> Self {
        self.stability_window = window;
        self
    }

    /// Delay before jitter: `min(cap, base * 2^attempt)`.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.base.saturating_mul(factor).min(self.cap)
    }

    /// Full delay for `attempt`, jitter drawn from `rng`.
    pub fn delay<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let jitter_ms = u64::try_from(self.jitter_max.as_millis()).unwrap_or(u64::MAX);
        let jitter = if jitter_ms == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(rng.random_range(0..=jitter_ms))
        };
        self.base_delay(attempt).saturating_add(jitter)
    }

    /// Largest delay this policy can ever produce.
    pub fn max_delay(&self) -> Duration {
        self.cap.saturating_add(self.jitter_max)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(Duration::from_millis(500), Duration::from_secs(30))
    }
}

/// Retry bookkeeping owned by one connection manager.
#[derive(Debug, Clone, Default)]
pub struct BackoffState {
    attempt: u32,
    next_delay: Duration,
    stable_since: Option<Instant>,
}

impl BackoffState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of consecutive failed or forced attempts.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Delay chosen by the last [`BackoffState::schedule`] call.
    pub fn next_delay(&self) -> Duration {
        self.next_delay
    }

    /// Records that the connection reached `Connected` at `now`.
    pub fn mark_connected(&mut self, now: Instant) {
        self.stable_since = Some(now);
    }

    /// Records that the connection dropped. `last_alive` is the last moment
    /// the server proved the connection alive, not the moment the drop was
    /// noticed, so a connection that went silent never counts as stable.
    ///
    /// Resets the attempt counter if the connection had been stable for
    /// at least the policy's window.
    pub fn mark_disconnected(&mut self, last_alive: Instant, policy: &BackoffPolicy) {
        if let Some(since) = self.stable_since.take() {
            if last_alive.saturating_duration_since(since) >= policy.stability_window {
                self.attempt = 0;
            }
        }
    }

    /// Returns true once `max_attempts` retries have been scheduled.
    pub fn is_exhausted(&self, max_attempts: u32) -> bool {
        self.attempt >= max_attempts
    }

    /// Picks the delay for the next dial and counts the attempt.
    pub fn schedule<R: Rng + ?Sized>(&mut self, policy: &BackoffPolicy, rng: &mut R) -> Duration {
        self.next_delay = policy.delay(self.attempt, rng);
        self.attempt = self.attempt.saturating_add(1);
        self.next_delay
    }

    /// Clears all retry history (new credential or server-requested reconnect).
    pub fn reset(&mut self) {
        self.attempt = 0;
        self.next_delay = Duration::ZERO;
        self.stable_since = None;
    }
}
