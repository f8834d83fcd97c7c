//! Bounded retry around provider calls.

use std::thread;
use std::time::Duration;

use geo::MultiPolygon;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::ProviderError;
use crate::extent::RasterInfo;
use crate::provider::GeometryProvider;
use crate::region::Region;

/// Exponential backoff: wait `initial_backoff_ms`, then multiply by
/// `multiplier` after each further failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total tries including the first one. Zero behaves like one.
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 2_000,
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no waiting.
    pub fn none() -> Self {
        Self { max_attempts: 1, initial_backoff_ms: 0, multiplier: 1.0 }
    }

    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = self.multiplier.max(1.0).powi(retry as i32);
        Duration::from_millis((self.initial_backoff_ms as f64 * factor) as u64)
    }

    /// Run `f` until it succeeds, fails with a non-retryable error, or the
    /// attempts are used up. Returns the last error in the latter cases.
    pub fn run<T, F>(&self, operation: &str, mut f: F) -> Result<T, ProviderError>
    where
        F: FnMut() -> Result<T, ProviderError>,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            match f() {
                Ok(v) => return Ok(v),
                Err(e) if e.is_retryable() && attempt + 1 < attempts => {
                    let wait = self.backoff(attempt);
                    attempt += 1;
                    warn!(operation, attempt, max = attempts, error = %e, "retrying after {wait:?}");
                    if !wait.is_zero() {
                        thread::sleep(wait);
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Provider decorator applying a [`RetryPolicy`] to every call.
#[derive(Debug, Clone)]
pub struct Retrying<P> {
    inner: P,
    policy: RetryPolicy,
}

impl<P> Retrying<P> {
    pub fn new(inner: P, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn inner(&self) -> &P {
        &self.inner
    }
}

impl<P: GeometryProvider> GeometryProvider for Retrying<P> {
    fn describe(&self) -> Result<RasterInfo, ProviderError> {
        self.policy.run("describe", || self.inner.describe())
    }

    fn point_has_data(&self, x: f64, y: f64) -> Result<bool, ProviderError> {
        self.policy.run("point_has_data", || self.inner.point_has_data(x, y))
    }

    fn valid_region(&self) -> Result<Region, ProviderError> {
        self.policy.run("valid_region", || self.inner.valid_region())
    }

    fn intersect(
        &self,
        a: &MultiPolygon<f64>,
        b: &MultiPolygon<f64>,
    ) -> Result<Option<MultiPolygon<f64>>, ProviderError> {
        self.policy.run("intersect", || self.inner.intersect(a, b))
    }

    fn union(&self, parts: &[MultiPolygon<f64>]) -> Result<MultiPolygon<f64>, ProviderError> {
        self.policy.run("union", || self.inner.union(parts))
    }

    fn contains_point(&self, region: &MultiPolygon<f64>, x: f64, y: f64) -> Result<bool, ProviderError> {
        self.policy.run("contains_point", || self.inner.contains_point(region, x, y))
    }

    fn overlaps(&self, a: &MultiPolygon<f64>, b: &MultiPolygon<f64>) -> Result<bool, ProviderError> {
        self.policy.run("overlaps", || self.inner.overlaps(a, b))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    /// Fails the first `failures` lookups with a timeout.
    struct Flaky {
        failures: Cell<u32>,
        calls: Cell<u32>,
    }

    impl GeometryProvider for Flaky {
        fn point_has_data(&self, _x: f64, _y: f64) -> Result<bool, ProviderError> {
            self.calls.set(self.calls.get() + 1);
            if self.failures.get() > 0 {
                self.failures.set(self.failures.get() - 1);
                return Err(ProviderError::Timeout { operation: "point_has_data" });
            }
            Ok(true)
        }
    }

    fn no_wait(max_attempts: u32) -> RetryPolicy {
        RetryPolicy { max_attempts, initial_backoff_ms: 0, multiplier: 2.0 }
    }

    #[test]
    fn recovers_from_transient_failures() {
        let p = Retrying::new(Flaky { failures: Cell::new(2), calls: Cell::new(0) }, no_wait(3));
        assert!(p.point_has_data(0.0, 0.0).unwrap());
        assert_eq!(p.inner().calls.get(), 3);
    }

    #[test]
    fn gives_up_after_max_attempts() {
        let p = Retrying::new(Flaky { failures: Cell::new(10), calls: Cell::new(0) }, no_wait(3));
        let err = p.point_has_data(0.0, 0.0).unwrap_err();
        assert_eq!(err, ProviderError::Timeout { operation: "point_has_data" });
        assert_eq!(p.inner().calls.get(), 3);
    }

    #[test]
    fn non_retryable_errors_fail_immediately() {
        let p = Retrying::new(Flaky { failures: Cell::new(0), calls: Cell::new(0) }, no_wait(5));
        assert!(matches!(p.describe(), Err(ProviderError::Unsupported { .. })));
    }

    #[test]
    fn backoff_grows_geometrically() {
        let policy = RetryPolicy { max_attempts: 4, initial_backoff_ms: 100, multiplier: 3.0 };
        assert_eq!(policy.backoff(0), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(900));
    }

    #[test]
    fn policy_deserializes_with_defaults() {
        let policy: RetryPolicy = serde_json::from_str(r#"{"max_attempts": 5}"#).unwrap();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.initial_backoff_ms, 2_000);
    }
}
