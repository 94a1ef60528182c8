//! Probe Timeout Management
//!
//! This module provides the wall-clock budget applied to every verifier
//! invocation.

use std::time::Duration;
use tokio::time;

/// Default probe budget in seconds
pub const DEFAULT_TIMEOUT_SECS: f64 = 8.0;

/// Error returned when a timeout value cannot be used
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum TimeoutError {
    #[error("timeout must be a finite number of seconds greater than zero, got {0}")]
    Invalid(f64),
}

/// Execution timeout configuration
///
/// Timeouts are enforced to prevent a verifier from hanging a request
/// indefinitely.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExecutionTimeout {
    /// The timeout duration
    duration: Duration,
}

impl Default for ExecutionTimeout {
    fn default() -> Self {
        Self::new(Duration::from_secs_f64(DEFAULT_TIMEOUT_SECS))
    }
}

impl ExecutionTimeout {
    /// Create a new execution timeout
    ///
    /// # Example
    ///
    /// ```
    /// use std::time::Duration;
    /// use authprobe::tools::ExecutionTimeout;
    ///
    /// let timeout = ExecutionTimeout::new(Duration::from_secs(30));
    /// assert_eq!(timeout.duration(), Duration::from_secs(30));
    /// ```
    pub fn new(duration: Duration) -> Self {
        Self { duration }
    }

    /// Get the timeout duration
    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Create a timeout from fractional seconds
    ///
    /// Rejects zero, negative, NaN and infinite values.
    pub fn from_secs_f64(secs: f64) -> Result<Self, TimeoutError> {
        if !secs.is_finite() || secs <= 0.0 {
            return Err(TimeoutError::Invalid(secs));
        }
        Duration::try_from_secs_f64(secs)
            .map(Self::new)
            .map_err(|_| TimeoutError::Invalid(secs))
    }

    /// Resolve a caller-supplied override against the configured default,
    /// capping it at `max_secs`.
    pub fn resolve(
        requested: Option<f64>,
        default_secs: f64,
        max_secs: f64,
    ) -> Result<Self, TimeoutError> {
        let secs = requested.unwrap_or(default_secs);
        if !secs.is_finite() || secs <= 0.0 {
            return Err(TimeoutError::Invalid(secs));
        }
        Self::from_secs_f64(secs.min(max_secs))
    }

    /// Execute a future with this timeout
    ///
    /// Returns `None` if the future did not finish inside the budget. The
    /// future is dropped on expiry.
    pub async fn run<F, T>(&self, future: F) -> Option<T>
    where
        F: std::future::Future<Output = T>,
    {
        time::timeout(self.duration, future).await.ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_default() {
        let timeout = ExecutionTimeout::default();
        assert_eq!(timeout.duration(), Duration::from_secs(8));
    }

    #[test]
    fn test_timeout_from_secs_f64() {
        let timeout = ExecutionTimeout::from_secs_f64(1.5).unwrap();
        assert_eq!(timeout.duration(), Duration::from_millis(1500));
    }

    #[test]
    fn test_timeout_rejects_invalid_values() {
        assert!(ExecutionTimeout::from_secs_f64(0.0).is_err());
        assert!(ExecutionTimeout::from_secs_f64(-1.0).is_err());
        assert!(ExecutionTimeout::from_secs_f64(f64::NAN).is_err());
        assert!(ExecutionTimeout::from_secs_f64(f64::INFINITY).is_err());
    }

    #[test]
    fn test_timeout_resolve() {
        let t = ExecutionTimeout::resolve(None, 8.0, 60.0).unwrap();
        assert_eq!(t.duration(), Duration::from_secs(8));

        let t = ExecutionTimeout::resolve(Some(2.0), 8.0, 60.0).unwrap();
        assert_eq!(t.duration(), Duration::from_secs(2));

        // Capped
        let t = ExecutionTimeout::resolve(Some(600.0), 8.0, 60.0).unwrap();
        assert_eq!(t.duration(), Duration::from_secs(60));

        // Absurd overrides are capped rather than overflowing
        let t = ExecutionTimeout::resolve(Some(1e300), 8.0, 60.0).unwrap();
        assert_eq!(t.duration(), Duration::from_secs(60));

        assert!(ExecutionTimeout::resolve(Some(0.0), 8.0, 60.0).is_err());
        assert!(ExecutionTimeout::resolve(Some(f64::NAN), 8.0, 60.0).is_err());
    }

    #[tokio::test]
    async fn test_timeout_run_success() {
        let timeout = ExecutionTimeout::from_secs_f64(1.0).unwrap();
        let result = timeout.run(async { "test value" }).await;
        assert_eq!(result, Some("test value"));
    }

    #[tokio::test]
    async fn test_timeout_run_expires() {
        let timeout = ExecutionTimeout::new(Duration::from_millis(100));

        let result = timeout
            .run(async {
                tokio::time::sleep(Duration::from_secs(2)).await;
            })
            .await;

        assert!(result.is_none());
    }
}
