//! Error recovery for flaky accessibility access.
//!
//! Wraps tree operations in bounded exponential-backoff retry, and offers
//! cheap secondary search strategies (relaxed roles, lowered threshold)
//! that run before the expensive vision fallback is considered.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::accessibility::{AccessError, RoleSet};
use crate::config::RecoveryConfig;
use crate::resolver::{ElementResolver, MatchResult};

/// How far below the configured threshold the relaxed strategy may go.
const RELAXED_THRESHOLD_DROP: u8 = 10;

/// Never relax the threshold below this; weaker matches are wrong more
/// often than they are helpful.
const RELAXED_THRESHOLD_FLOOR: u8 = 60;

pub struct RecoveryManager {
    config: RecoveryConfig,
}

impl RecoveryManager {
    pub fn new(config: RecoveryConfig) -> Self {
        Self { config }
    }

    /// Backoff before retrying attempt `n` (0-indexed):
    /// `min(base * factor^n, max)`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let raw = self.config.base_delay_ms as f64 * self.config.backoff_factor.powi(attempt as i32);
        Duration::from_millis((raw as u64).min(self.config.max_delay_ms))
    }

    /// Run `operation` up to the configured attempt count, sleeping
    /// between transient failures. Permission and not-found errors are
    /// not retried; after exhaustion the original error is surfaced
    /// unchanged.
    pub async fn with_retry<T, F, Fut>(&self, mut operation: F) -> Result<T, AccessError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AccessError>>,
    {
        let attempts = self.config.max_attempts.max(1);
        let mut attempt = 0u32;
        loop {
            match operation().await {
                Ok(value) => {
                    if attempt > 0 {
                        info!(attempt = attempt + 1, "Operation recovered after retry");
                    }
                    return Ok(value);
                }
                Err(e) if e.is_transient() && attempt + 1 < attempts => {
                    let delay = self.delay_for(attempt);
                    debug!(
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient failure, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Secondary search strategies after the primary search came up
    /// empty: a relaxed role set first, then a lowered threshold. Both
    /// are far cheaper than a screenshot round-trip.
    pub async fn try_alternate_strategies(
        &self,
        resolver: &ElementResolver,
        target: &str,
        app_scope: Option<&str>,
    ) -> Option<MatchResult> {
        let threshold = resolver.threshold();

        match resolver
            .resolve_with_threshold(&RoleSet::any(), target, app_scope, threshold)
            .await
        {
            Ok(result) if result.element.is_some() => {
                info!(target = %target, "Relaxed role set produced a match");
                return Some(result);
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Relaxed role search failed"),
        }

        let relaxed = threshold
            .saturating_sub(RELAXED_THRESHOLD_DROP)
            .max(RELAXED_THRESHOLD_FLOOR);
        if relaxed < threshold {
            match resolver
                .resolve_with_threshold(&RoleSet::any(), target, app_scope, relaxed)
                .await
            {
                Ok(result) if result.element.is_some() => {
                    info!(
                        target = %target,
                        threshold = relaxed,
                        confidence = result.confidence,
                        "Lowered threshold produced a match"
                    );
                    return Some(result);
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "Lowered-threshold search failed"),
            }
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use crate::accessibility::{Bounds, ScriptedTree, TreeAdapter, UiElement};
    use crate::config::ResolverConfig;

    fn manager() -> RecoveryManager {
        RecoveryManager::new(RecoveryConfig {
            max_attempts: 3,
            base_delay_ms: 1,
            max_delay_ms: 8,
            backoff_factor: 2.0,
        })
    }

    #[test]
    fn backoff_is_exponential_and_capped() {
        let manager = RecoveryManager::new(RecoveryConfig {
            max_attempts: 5,
            base_delay_ms: 100,
            max_delay_ms: 1_500,
            backoff_factor: 2.0,
        });
        assert_eq!(manager.delay_for(0), Duration::from_millis(100));
        assert_eq!(manager.delay_for(1), Duration::from_millis(200));
        assert_eq!(manager.delay_for(2), Duration::from_millis(400));
        assert_eq!(manager.delay_for(4), Duration::from_millis(1_500));
    }

    #[tokio::test]
    async fn first_try_success_does_not_retry() {
        let calls = AtomicU32::new(0);
        let result = manager()
            .with_retry(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, AccessError>(42) }
            })
            .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn transient_errors_are_retried_until_success() {
        let calls = AtomicU32::new(0);
        let result = manager()
            .with_retry(|| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(AccessError::TreeUnavailable("busy".into()))
                    } else {
                        Ok(7)
                    }
                }
            })
            .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permission_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = manager()
            .with_retry(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(AccessError::PermissionDenied) }
            })
            .await;
        assert!(matches!(result, Err(AccessError::PermissionDenied)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhaustion_surfaces_the_original_error() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = manager()
            .with_retry(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(AccessError::Timeout(900)) }
            })
            .await;
        assert!(matches!(result, Err(AccessError::Timeout(900))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn relaxed_role_set_finds_nonstandard_roles() {
        let odd_role = UiElement {
            role: "custom widget".to_string(),
            title: Some("Save".to_string()),
            bounds: Bounds {
                x: 10,
                y: 10,
                width: 50,
                height: 20,
            },
            ..UiElement::default()
        };
        let resolver = ElementResolver::new(
            Arc::new(TreeAdapter::Scripted(ScriptedTree::always(vec![odd_role]))),
            ResolverConfig::default(),
        );

        // Primary search with the interactive role set misses it...
        let primary = resolver
            .resolve(&crate::accessibility::RoleSet::interactive(), "save", None)
            .await
            .unwrap();
        assert!(primary.element.is_none());

        // ...the relaxed strategy picks it up.
        let rescued = manager()
            .try_alternate_strategies(&resolver, "save", None)
            .await;
        assert!(rescued.is_some());
    }

    #[tokio::test]
    async fn alternate_strategies_can_still_miss() {
        let resolver = ElementResolver::new(
            Arc::new(TreeAdapter::Scripted(ScriptedTree::always(vec![]))),
            ResolverConfig::default(),
        );
        let rescued = manager()
            .try_alternate_strategies(&resolver, "save", None)
            .await;
        assert!(rescued.is_none());
    }
}
