//! Sliding-window quota guard for outbound calls
//!
//! Every guarded call runs load, check, increment and persist for its
//! resource under a per-resource lock. The quota is consumed before the
//! guarded operation is attempted, so a failing downstream call still counts:
//! retries cannot multiply quota usage.

use super::state::{RateLimitState, WindowState};
use super::store::RateLimitStore;
use crate::error::StorageError;
use crate::metrics::METRICS;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Default window length: one hour
pub const DEFAULT_WINDOW_SECS: i64 = 3600;

/// Rate limit errors
#[derive(Debug, thiserror::Error)]
pub enum RateLimitError {
    #[error("Rate limit ({limit} calls per window) exceeded for {resource}; resets at {resets_at}")]
    QuotaExceeded {
        resource: String,
        limit: u64,
        resets_at: DateTime<Utc>,
    },

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Quota guard over one or more rate-limited resources
///
/// The guard is limit-agnostic: callers choose the limit per call (for
/// example a higher one for authenticated identities).
pub struct RateLimitGuard {
    store: Arc<dyn RateLimitStore>,
    window: Duration,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl RateLimitGuard {
    /// Create a guard with the default one-hour window
    pub fn new(store: Arc<dyn RateLimitStore>) -> Self {
        Self::with_window(store, Duration::seconds(DEFAULT_WINDOW_SECS))
    }

    pub fn with_window(store: Arc<dyn RateLimitStore>, window: Duration) -> Self {
        Self {
            store,
            window,
            locks: DashMap::new(),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    fn lock_for(&self, resource: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(resource.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Admit one call against `resource` if under `limit`
    ///
    /// Returns the persisted state after the increment. A rejection leaves
    /// the stored state unchanged.
    pub async fn check_and_increment(
        &self,
        resource: &str,
        limit: u64,
    ) -> Result<RateLimitState, RateLimitError> {
        let lock = self.lock_for(resource);
        let result = {
            let _guard = lock.lock().await;
            self.admit(resource, limit).await
        };
        drop(lock);
        // Drop the lock entry once no other caller holds or waits on it
        self.locks
            .remove_if(resource, |_, lock| Arc::strong_count(lock) == 1);
        result
    }

    async fn admit(&self, resource: &str, limit: u64) -> Result<RateLimitState, RateLimitError> {
        let now = Utc::now();
        let mut state = self
            .store
            .load(resource)
            .await?
            .unwrap_or_else(|| RateLimitState::fresh(now));

        if state.classify(now, self.window, limit) == WindowState::WindowExpired {
            info!("Rate limit window reset for {}", resource);
            METRICS.record_window_reset(resource);
            state = RateLimitState::fresh(now);
        }

        if state.classify(now, self.window, limit) == WindowState::LimitExceeded {
            let resets_at = state.resets_at(self.window);
            warn!(
                "Rate limit ({}) exceeded for {}; resets at {}",
                limit, resource, resets_at
            );
            METRICS.record_rate_limit(resource, false);
            return Err(RateLimitError::QuotaExceeded {
                resource: resource.to_string(),
                limit,
                resets_at,
            });
        }

        state.count += 1;
        self.store.save(resource, &state).await?;
        METRICS.record_rate_limit(resource, true);

        debug!("Admitted call to {}: {}/{}", resource, state.count, limit);
        Ok(state)
    }

    /// Run `op` once if the quota admits it
    ///
    /// `op` must be a single attempt at the downstream call. Anything that
    /// retries internally would get several calls for one admission.
    /// The outer `Result` is the admission decision; the inner one is the
    /// operation's own outcome.
    pub async fn call<F, Fut, T, E>(
        &self,
        resource: &str,
        limit: u64,
        op: F,
    ) -> Result<Result<T, E>, RateLimitError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.check_and_increment(resource, limit).await?;
        Ok(op().await)
    }

    /// Current stored state for a resource, without consuming quota
    pub async fn peek(&self, resource: &str) -> Result<Option<RateLimitState>, RateLimitError> {
        Ok(self.store.load(resource).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::store::InMemoryRateLimitStore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn guard() -> (Arc<InMemoryRateLimitStore>, RateLimitGuard) {
        let store = Arc::new(InMemoryRateLimitStore::new());
        (store.clone(), RateLimitGuard::new(store))
    }

    #[tokio::test]
    async fn test_admits_exactly_limit_calls() {
        let (store, guard) = guard();

        for i in 1..=5000u64 {
            let state = guard.check_and_increment("github", 5000).await.unwrap();
            assert_eq!(state.count, i);
        }

        let err = guard.check_and_increment("github", 5000).await.unwrap_err();
        assert!(matches!(err, RateLimitError::QuotaExceeded { limit: 5000, .. }));

        // Rejection does not increment
        let state = store.load("github").await.unwrap().unwrap();
        assert_eq!(state.count, 5000);
    }

    #[tokio::test]
    async fn test_expired_window_resets_count() {
        let (store, guard) = guard();
        let stale = RateLimitState {
            count: 5000,
            window_start: Utc::now() - Duration::seconds(3601),
        };
        store.save("github", &stale).await.unwrap();

        let state = guard.check_and_increment("github", 5000).await.unwrap();

        assert_eq!(state.count, 1);
        assert!(state.window_start > stale.window_start);
    }

    #[tokio::test]
    async fn test_quota_error_reports_reset_horizon() {
        let (store, guard) = guard();
        let start = Utc::now() - Duration::seconds(600);
        store
            .save("github", &RateLimitState { count: 3, window_start: start })
            .await
            .unwrap();

        match guard.check_and_increment("github", 3).await {
            Err(RateLimitError::QuotaExceeded { resets_at, resource, .. }) => {
                assert_eq!(resource, "github");
                assert_eq!(resets_at, start + Duration::seconds(3600));
            }
            other => panic!("expected quota error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_limits_are_per_call_and_per_resource() {
        let (_, guard) = guard();

        guard.check_and_increment("anon", 1).await.unwrap();
        assert!(guard.check_and_increment("anon", 1).await.is_err());
        // A higher limit on the same counter admits more
        assert!(guard.check_and_increment("anon", 2).await.is_ok());
        // Other resources are independent
        assert!(guard.check_and_increment("other", 1).await.is_ok());
    }

    #[tokio::test]
    async fn test_failed_operation_still_consumes_quota() {
        let (store, guard) = guard();
        let attempts = AtomicUsize::new(0);

        let outcome = guard
            .call("github", 10, || async {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err::<(), &str>("upstream 502")
            })
            .await
            .unwrap();

        assert_eq!(outcome, Err("upstream 502"));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert_eq!(store.load("github").await.unwrap().unwrap().count, 1);
    }

    #[tokio::test]
    async fn test_rejected_call_never_runs_operation() {
        let (_, guard) = guard();
        guard.check_and_increment("github", 1).await.unwrap();

        let ran = AtomicUsize::new(0);
        let result = guard
            .call("github", 1, || async {
                ran.fetch_add(1, Ordering::SeqCst);
                Ok::<_, ()>(())
            })
            .await;

        assert!(result.is_err());
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_concurrent_callers_never_exceed_limit() {
        let (store, guard) = guard();
        let guard = Arc::new(guard);

        let tasks: Vec<_> = (0..50)
            .map(|_| {
                let guard = guard.clone();
                tokio::spawn(async move { guard.check_and_increment("shared", 20).await.is_ok() })
            })
            .collect();

        let admitted = futures::future::join_all(tasks)
            .await
            .into_iter()
            .filter(|r| matches!(r, Ok(true)))
            .count();

        assert_eq!(admitted, 20);
        assert_eq!(store.load("shared").await.unwrap().unwrap().count, 20);
        assert!(guard.locks.is_empty());
    }

    #[tokio::test]
    async fn test_lock_entries_do_not_accumulate() {
        let (_, guard) = guard();

        for i in 0..100 {
            guard
                .check_and_increment(&format!("resource_{}", i), 1)
                .await
                .unwrap();
        }
        let _ = guard.check_and_increment("resource_0", 1).await;

        assert!(guard.locks.is_empty());
    }
}
