//! Utility functions for replset-bootstrap

use std::future::Future;
use std::time::Duration;

/// Fixed-interval polling policy.
///
/// `max_attempts: None` polls forever; the orchestrator's own probes are the
/// circuit breaker in that case.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub interval: Duration,
    pub max_attempts: Option<u32>,
}

impl RetryPolicy {
    pub fn new(interval: Duration, max_attempts: Option<u32>) -> Self {
        Self {
            interval,
            max_attempts,
        }
    }

    pub fn unbounded(interval: Duration) -> Self {
        Self::new(interval, None)
    }

    pub fn bounded(interval: Duration, max_attempts: u32) -> Self {
        Self::new(interval, Some(max_attempts))
    }
}

/// Poll `check` until it reports `true`.
///
/// Retryable errors count as "not yet"; any other error aborts the poll.
/// Returns the number of attempts it took.
pub async fn poll_until<F, Fut>(policy: RetryPolicy, what: &str, mut check: F) -> crate::Result<u32>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = crate::Result<bool>>,
{
    let mut attempt: u32 = 0;

    loop {
        attempt += 1;
        match check().await {
            Ok(true) => return Ok(attempt),
            Ok(false) => {
                tracing::debug!("{}: not yet (attempt {})", what, attempt);
            }
            Err(e) if e.is_retryable() => {
                tracing::debug!("{}: attempt {} failed: {}", what, attempt, e);
            }
            Err(e) => return Err(e),
        }

        if let Some(max) = policy.max_attempts {
            if attempt >= max {
                return Err(crate::Error::Timeout(format!(
                    "{} after {} attempts",
                    what, attempt
                )));
            }
        }

        tokio::time::sleep(policy.interval).await;
    }
}

/// Like [`poll_until`], but keeps the first successful value.
pub async fn poll_value<T, F, Fut>(policy: RetryPolicy, what: &str, mut fetch: F) -> crate::Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = crate::Result<T>>,
{
    let mut attempt: u32 = 0;

    loop {
        attempt += 1;
        match fetch().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() => {
                tracing::debug!("{}: attempt {} failed: {}", what, attempt, e);
            }
            Err(e) => return Err(e),
        }

        if let Some(max) = policy.max_attempts {
            if attempt >= max {
                return Err(crate::Error::Timeout(format!(
                    "{} after {} attempts",
                    what, attempt
                )));
            }
        }

        tokio::time::sleep(policy.interval).await;
    }
}

/// Strip a trailing ordinal (`-<digits>`) from a workload hostname.
///
/// `icp-mongodb-2` becomes `icp-mongodb`. A bare trailing `-` is stripped too.
pub fn base_workload_name(hostname: &str) -> &str {
    match hostname.rfind('-') {
        Some(idx) if hostname[idx + 1..].bytes().all(|b| b.is_ascii_digit()) => &hostname[..idx],
        _ => hostname,
    }
}

/// Local hostname: the kernel's view, as `hostname(1)` prints it.
pub fn local_hostname() -> crate::Result<String> {
    let raw = std::fs::read_to_string("/proc/sys/kernel/hostname")
        .or_else(|_| std::fs::read_to_string("/etc/hostname"))?;
    let name = raw.trim();
    if name.is_empty() {
        return Err(crate::Error::InvalidConfig("empty hostname".into()));
    }
    Ok(name.to_string())
}
