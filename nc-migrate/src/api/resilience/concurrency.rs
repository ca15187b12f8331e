//! Concurrency limiter implementation
//!
//! N-central caps concurrent calls per endpoint, so requests take a permit
//! from a semaphore keyed by their normalised path before they are sent.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use log::debug;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use super::config::ConcurrencyConfig;
use crate::api::endpoints::normalize_path;

/// Semaphore-per-endpoint limiter for concurrent API requests
#[derive(Debug, Clone)]
pub struct ConcurrencyLimiter {
    config: ConcurrencyConfig,
    semaphores: Arc<Mutex<HashMap<String, Arc<Semaphore>>>>,
    requests_acquired: Arc<AtomicU64>,
    requests_waited: Arc<AtomicU64>,
}

/// Snapshot of limiter counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConcurrencyStats {
    pub requests_acquired: u64,
    pub requests_waited: u64,
    pub endpoints: usize,
}

impl ConcurrencyLimiter {
    pub fn new(config: ConcurrencyConfig) -> Self {
        Self {
            config,
            semaphores: Arc::new(Mutex::new(HashMap::new())),
            requests_acquired: Arc::new(AtomicU64::new(0)),
            requests_waited: Arc::new(AtomicU64::new(0)),
        }
    }

    fn semaphore(&self, endpoint: &str) -> Arc<Semaphore> {
        let mut semaphores = self.semaphores.lock().unwrap_or_else(|e| e.into_inner());
        semaphores
            .entry(endpoint.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(self.config.max_concurrent_requests.max(1))))
            .clone()
    }

    /// Wait for a permit on the endpoint behind `path`
    ///
    /// Returns `None` when limiting is disabled. The permit is released when
    /// dropped.
    pub async fn acquire(&self, path: &str) -> Option<OwnedSemaphorePermit> {
        if !self.config.enabled {
            return None;
        }

        let endpoint = normalize_path(path);
        let semaphore = self.semaphore(&endpoint);

        if semaphore.available_permits() == 0 {
            self.requests_waited.fetch_add(1, Ordering::Relaxed);
            debug!(
                "Concurrency limiter: waiting for permit on {} ({} in use)",
                endpoint, self.config.max_concurrent_requests
            );
        }

        // the semaphores are never closed
        let permit = semaphore.acquire_owned().await.ok()?;
        self.requests_acquired.fetch_add(1, Ordering::Relaxed);
        Some(permit)
    }

    /// Permits currently free on the endpoint behind `path`
    pub fn available_permits(&self, path: &str) -> usize {
        if !self.config.enabled {
            return usize::MAX;
        }
        self.semaphore(&normalize_path(path)).available_permits()
    }

    pub fn stats(&self) -> ConcurrencyStats {
        ConcurrencyStats {
            requests_acquired: self.requests_acquired.load(Ordering::Relaxed),
            requests_waited: self.requests_waited.load(Ordering::Relaxed),
            endpoints: self
                .semaphores
                .lock()
                .map(|s| s.len())
                .unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn limiter(max: usize) -> ConcurrencyLimiter {
        ConcurrencyLimiter::new(ConcurrencyConfig {
            max_concurrent_requests: max,
            enabled: true,
        })
    }

    #[tokio::test]
    async fn test_limit_is_per_endpoint() {
        let limiter = limiter(2);

        let _a = limiter.acquire("/api/org-units/1/users").await;
        let _b = limiter.acquire("/api/org-units/2/users").await;
        assert_eq!(limiter.available_permits("/api/org-units/3/users"), 0);

        // other endpoints are unaffected
        assert_eq!(limiter.available_permits("/api/sites"), 2);
        assert_eq!(limiter.stats().endpoints, 2);
    }

    #[tokio::test]
    async fn test_permit_released_on_drop() {
        let limiter = limiter(1);

        let permit = limiter.acquire("/api/sites").await;
        assert!(permit.is_some());
        assert_eq!(limiter.available_permits("/api/sites"), 0);

        drop(permit);
        assert_eq!(limiter.available_permits("/api/sites"), 1);
    }

    #[tokio::test]
    async fn test_waiting_request_proceeds_after_release() {
        let limiter = limiter(1);
        let held = limiter.acquire("/api/sites").await;

        let waiter = {
            let limiter = limiter.clone();
            tokio::spawn(async move { limiter.acquire("/api/sites").await.is_some() })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(held);
        assert!(waiter.await.unwrap());
        assert_eq!(limiter.stats().requests_waited, 1);
        assert_eq!(limiter.stats().requests_acquired, 2);
    }

    #[tokio::test]
    async fn test_disabled_limiter() {
        let limiter = ConcurrencyLimiter::new(ConcurrencyConfig {
            max_concurrent_requests: 1,
            enabled: false,
        });

        assert!(limiter.acquire("/api/sites").await.is_none());
        assert_eq!(limiter.available_permits("/api/sites"), usize::MAX);
    }
}
