//! Rate/backoff governor
//!
//! Every call to the remote service goes through [`Governor::guard`], which
//!
//! 1. paces calls so two of them never start closer than the current pacing
//!    interval (never below the configured floor), and
//! 2. retries an operation that reports [`FetchError::Throttled`] with
//!    exponential backoff plus jitter, up to a retry ceiling.
//!
//! Observed throttling also widens the pacing interval; successes narrow it
//! back towards the floor. One governor instance is shared by everything that
//! talks to the same endpoint within a pipeline.

use rand::Rng;
use std::future::Future;
use std::sync::Mutex as StdMutex;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{Instant, sleep};

use crate::config::Config;
use crate::error::FetchError;

/// Pacing and backoff parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GovernorSettings {
    /// Minimum gap between call starts
    pub floor: Duration,
    /// First backoff after a throttle signal
    pub base_backoff: Duration,
    /// Backoff ceiling
    pub max_backoff: Duration,
    /// Throttle retries per operation
    pub max_retries: u32,
    /// Add random jitter to backoff delays
    pub jitter: bool,
}

impl GovernorSettings {
    /// Settings from the run configuration
    pub fn from_config(config: &Config) -> Self {
        Self {
            floor: Duration::from_millis(config.rate_limit_floor_ms),
            base_backoff: Duration::from_millis(config.governor.base_backoff_ms),
            max_backoff: Duration::from_millis(config.governor.max_backoff_ms),
            max_retries: config.governor.max_throttle_retries,
            jitter: true,
        }
    }
}

impl Default for GovernorSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Counters for logging and tests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GovernorStats {
    /// Operation attempts started
    pub calls: u64,
    /// Throttle signals received
    pub throttled: u64,
    /// Operations that gave up at the retry ceiling
    pub exhausted: u64,
    /// Total time spent in backoff sleeps
    pub backoff: Duration,
}

#[derive(Debug)]
struct Pace {
    last_start: Option<Instant>,
    interval: Duration,
}

/// Paces and retries calls against one external endpoint
#[derive(Debug)]
pub struct Governor {
    settings: GovernorSettings,
    pace: Mutex<Pace>,
    stats: StdMutex<GovernorStats>,
}

impl Governor {
    /// Create a governor
    pub fn new(settings: GovernorSettings) -> Self {
        let interval = settings.floor;
        Self {
            settings,
            pace: Mutex::new(Pace {
                last_start: None,
                interval,
            }),
            stats: StdMutex::new(GovernorStats::default()),
        }
    }

    /// Settings in use
    pub const fn settings(&self) -> &GovernorSettings {
        &self.settings
    }

    /// Snapshot of the counters
    pub fn stats(&self) -> GovernorStats {
        self.stats.lock().map(|s| *s).unwrap_or_default()
    }

    /// Current pacing interval
    pub async fn interval(&self) -> Duration {
        self.pace.lock().await.interval
    }

    fn record(&self, update: impl FnOnce(&mut GovernorStats)) {
        if let Ok(mut stats) = self.stats.lock() {
            update(&mut stats);
        }
    }

    /// Wait for this caller's turn. The lock is held while sleeping so
    /// concurrent callers queue up behind each other.
    async fn wait_turn(&self) {
        let mut pace = self.pace.lock().await;
        if let Some(last) = pace.last_start {
            let elapsed = last.elapsed();
            if elapsed < pace.interval {
                let wait = pace.interval - elapsed;
                tracing::trace!(wait_ms = wait.as_millis() as u64, "pacing");
                sleep(wait).await;
            }
        }
        pace.last_start = Some(Instant::now());
    }

    async fn widen(&self) {
        let mut pace = self.pace.lock().await;
        let doubled = (pace.interval * 2).max(self.settings.base_backoff);
        pace.interval = doubled.min(self.settings.max_backoff).max(self.settings.floor);
        tracing::debug!(interval_ms = pace.interval.as_millis() as u64, "pacing widened");
    }

    async fn narrow(&self) {
        let mut pace = self.pace.lock().await;
        if pace.interval > self.settings.floor {
            pace.interval = (pace.interval / 2).max(self.settings.floor);
        }
    }

    /// Delay before retry number `attempt` (1-based)
    fn backoff_delay(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        let exp = self
            .settings
            .base_backoff
            .saturating_mul(factor)
            .min(self.settings.max_backoff)
            .max(self.settings.floor);

        let jitter = if self.settings.jitter {
            let half = (exp / 2).as_millis() as u64;
            Duration::from_millis(rand::rng().random_range(0..=half))
        } else {
            Duration::ZERO
        };

        let delay = exp + jitter;
        match retry_after {
            Some(hint) => delay.max(hint.min(self.settings.max_backoff)),
            None => delay,
        }
    }

    /// Run an operation under pacing and throttle backoff.
    ///
    /// Errors other than `Throttled` are returned unchanged on first sight.
    pub async fn guard<F, Fut, T>(&self, label: &str, mut operation: F) -> Result<T, FetchError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        let mut attempt = 0u32;

        loop {
            self.wait_turn().await;
            self.record(|s| s.calls += 1);

            match operation().await {
                Ok(value) => {
                    if attempt > 0 {
                        tracing::debug!(operation = label, attempt, "succeeded after throttling");
                    }
                    self.narrow().await;
                    return Ok(value);
                }
                Err(FetchError::Throttled { retry_after }) => {
                    attempt += 1;
                    self.record(|s| s.throttled += 1);
                    self.widen().await;

                    if attempt > self.settings.max_retries {
                        tracing::warn!(
                            operation = label,
                            retries = self.settings.max_retries,
                            "giving up after repeated throttling"
                        );
                        self.record(|s| s.exhausted += 1);
                        return Err(FetchError::Throttled { retry_after });
                    }

                    let delay = self.backoff_delay(attempt, retry_after);
                    tracing::warn!(
                        operation = label,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "throttled, backing off"
                    );
                    sleep(delay).await;
                    self.record(|s| s.backoff += delay);
                }
                Err(err) => return Err(err),
            }
        }
    }
}
