//! Reconciler configuration.
//!
//! Passed by reference into the reconciler and watcher constructors. Nothing
//! in the library reads files or environment variables.

use std::time::Duration;

/// Inter-poll delay policy.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    /// Delay after the first pending check.
    pub initial: Duration,
    /// Upper bound for the delay.
    pub max: Duration,
    /// Growth factor applied after each pending check. 1.0 means fixed.
    pub multiplier: f64,
}

impl BackoffPolicy {
    /// Constant interval between checks.
    pub fn fixed(interval: Duration) -> Self {
        Self {
            initial: interval,
            max: interval,
            multiplier: 1.0,
        }
    }

    /// Delay that follows `current`.
    ///
    /// A multiplier that is not finite is treated as 1.0; a product too large
    /// for a `Duration` saturates at `max`.
    pub fn next(&self, current: Duration) -> Duration {
        if !self.multiplier.is_finite() || self.multiplier <= 1.0 {
            return current.min(self.max);
        }
        Duration::try_from_secs_f64(current.as_secs_f64() * self.multiplier)
            .unwrap_or(self.max)
            .min(self.max)
    }

    /// Delay after the first pending check, never above `max`.
    pub fn first(&self) -> Duration {
        self.initial.min(self.max)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(10),
            multiplier: 2.0,
        }
    }
}

/// Configuration shared by every reconciliation a caller starts.
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// API root that compute-style operation URLs are derived from.
    pub base_url: String,
    /// Project used when a handle does not name one.
    pub project: Option<String>,
    pub backoff: BackoffPolicy,
    /// Extra attempts for a transient transport failure within one tick.
    pub transient_retries: u32,
    pub transient_retry_delay: Duration,
    /// Page size hint for listing reads.
    pub page_size: u32,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            base_url: "https://compute.googleapis.com/compute/v1/".to_string(),
            project: None,
            backoff: BackoffPolicy::default(),
            transient_retries: 3,
            transient_retry_delay: Duration::from_millis(500),
            page_size: 300,
        }
    }
}

impl ReconcilerConfig {
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_project(mut self, project: impl Into<String>) -> Self {
        self.project = Some(project.into());
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_transient_retries(mut self, retries: u32, delay: Duration) -> Self {
        self.transient_retries = retries;
        self.transient_retry_delay = delay;
        self
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }

    /// Base URL with exactly one trailing slash.
    pub(crate) fn base(&self) -> String {
        format!("{}/", self.base_url.trim_end_matches('/'))
    }
}
