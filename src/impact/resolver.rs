//! Impact preview resolution: cache first, live probe as fallback.
//!
//! Live probes are bounded by a deadline that covers the whole lookup,
//! including read retries, and are cancellable. A newer probe for the same
//! (device, certificate) cancels the older one, which then resolves as
//! [`ResolveOutcome::Superseded`] rather than failing.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{DEFAULT_PARTITION, MAX_LIVE_TIMEOUT_SECS, MIN_LIVE_TIMEOUT_SECS};
use crate::error::{CertflowError, GatewayError, Result};
use crate::gateway::{ApplianceGateway, LiveProbeRequest};
use crate::retry::RetryPolicy;

use super::types::ImpactSnapshot;

/// Default live probe deadline.
pub const DEFAULT_LIVE_TIMEOUT: Duration = Duration::from_secs(45);

/// Parameters of one impact lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImpactQuery {
    /// Target device.
    pub device_id: u64,
    /// Name of the certificate currently installed.
    pub cert_name: String,
    /// Inventory id. Only inventoried certificates have cached impact data.
    pub certificate_id: Option<u64>,
    /// Partition to search live.
    pub partition: String,
    /// Consult the cache first.
    pub prefer_cache: bool,
    /// Live probe deadline. Clamped to 10..=60 seconds.
    pub timeout: Duration,
}

impl ImpactQuery {
    /// Live-only query with default settings.
    #[must_use]
    pub fn live(device_id: u64, cert_name: impl Into<String>) -> Self {
        Self {
            device_id,
            cert_name: cert_name.into(),
            certificate_id: None,
            partition: String::from(DEFAULT_PARTITION),
            prefer_cache: false,
            timeout: DEFAULT_LIVE_TIMEOUT,
        }
    }

    /// Enables the cache path for the given inventory id.
    #[must_use]
    pub const fn with_cache(mut self, certificate_id: u64) -> Self {
        self.certificate_id = Some(certificate_id);
        self.prefer_cache = true;
        self
    }

    /// Overrides the live deadline.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn clamped_timeout(&self) -> Duration {
        self.timeout.clamp(
            Duration::from_secs(MIN_LIVE_TIMEOUT_SECS),
            Duration::from_secs(MAX_LIVE_TIMEOUT_SECS),
        )
    }
}

/// Result of a resolve call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveOutcome {
    /// A snapshot was captured (possibly with `source = none`).
    Resolved(ImpactSnapshot),
    /// A newer lookup for the same target cancelled this one.
    Superseded,
}

impl ResolveOutcome {
    /// Returns the snapshot, if any.
    #[must_use]
    pub fn into_snapshot(self) -> Option<ImpactSnapshot> {
        match self {
            Self::Resolved(snapshot) => Some(snapshot),
            Self::Superseded => None,
        }
    }
}

type TargetKey = (u64, String);

/// Resolves which profiles reference a certificate.
pub struct ImpactPreviewResolver {
    gateway: Arc<dyn ApplianceGateway>,
    retry: RetryPolicy,
    pending: Mutex<HashMap<TargetKey, (u64, CancellationToken)>>,
    generation: AtomicU64,
}

impl std::fmt::Debug for ImpactPreviewResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImpactPreviewResolver")
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl ImpactPreviewResolver {
    /// Creates a resolver over the given gateway.
    #[must_use]
    pub fn new(gateway: Arc<dyn ApplianceGateway>, retry: RetryPolicy) -> Self {
        Self {
            gateway,
            retry,
            pending: Mutex::new(HashMap::new()),
            generation: AtomicU64::new(0),
        }
    }

    /// Resolves the impact snapshot for a certificate.
    ///
    /// # Errors
    ///
    /// Returns an error for authorization failures and for non-transient
    /// rejections of the live probe. Timeouts and exhausted transient failures
    /// are not errors: they yield a snapshot with `source = none`.
    pub async fn resolve(&self, query: &ImpactQuery) -> Result<ResolveOutcome> {
        if query.prefer_cache && query.certificate_id.is_some() {
            if let Some(snapshot) = self.try_cache(query).await {
                return Ok(ResolveOutcome::Resolved(snapshot));
            }
        }

        self.resolve_live(query).await
    }

    /// A cache miss, an empty list or any cache error falls through to live.
    async fn try_cache(&self, query: &ImpactQuery) -> Option<ImpactSnapshot> {
        let name = &query.cert_name;
        match self.gateway.cached_usage(query.device_id, name).await {
            Ok(profiles) if !profiles.is_empty() => {
                debug!("Cache hit for '{name}': {} profile(s)", profiles.len());
                Some(ImpactSnapshot::from_cache(profiles))
            }
            Ok(_) => {
                debug!("Cache empty for '{name}', probing live");
                None
            }
            Err(e) if e.is_not_found() => {
                debug!("No cached impact for '{name}', probing live");
                None
            }
            Err(e) => {
                warn!("Cache lookup for '{name}' failed: {e}; probing live");
                None
            }
        }
    }

    async fn resolve_live(&self, query: &ImpactQuery) -> Result<ResolveOutcome> {
        let key = (query.device_id, query.cert_name.clone());
        let (generation, token) = self.register(&key).await;

        let timeout = query.clamped_timeout();
        let request = LiveProbeRequest {
            device_id: query.device_id,
            old_cert_name: query.cert_name.clone(),
            partition: query.partition.clone(),
            timeout_seconds: timeout.as_secs(),
        };

        info!(
            "Probing live usage of '{}' on device {} (deadline {}s)",
            query.cert_name,
            query.device_id,
            timeout.as_secs()
        );

        let lookup = self
            .retry
            .run("live probe", || self.gateway.live_usage(&request));

        let outcome = tokio::select! {
            () = token.cancelled() => {
                debug!("Live probe for '{}' superseded", query.cert_name);
                Ok(ResolveOutcome::Superseded)
            }
            result = tokio::time::timeout(timeout, lookup) => match result {
                Err(_elapsed) => {
                    warn!("Live probe for '{}' timed out after {}s", query.cert_name, timeout.as_secs());
                    Ok(ResolveOutcome::Resolved(ImpactSnapshot::unavailable(format!(
                        "Live impact lookup timed out after {}s; affected profiles are unknown. Retry the preview or continue with care.",
                        timeout.as_secs()
                    ))))
                }
                Ok(Ok(profiles)) => Ok(ResolveOutcome::Resolved(ImpactSnapshot::from_live(profiles))),
                Ok(Err(e)) => Self::classify_live_error(e),
            },
        };

        self.release(&key, generation).await;
        outcome
    }

    fn classify_live_error(e: CertflowError) -> Result<ResolveOutcome> {
        if e.is_not_found() {
            return Ok(ResolveOutcome::Resolved(ImpactSnapshot::from_live(Vec::new())));
        }
        if matches!(e, CertflowError::Gateway(GatewayError::AuthenticationFailed { .. })) {
            return Err(e);
        }
        if e.is_retryable() {
            warn!("Live probe failed after retries: {e}");
            return Ok(ResolveOutcome::Resolved(ImpactSnapshot::unavailable(format!(
                "Live impact lookup failed: {e}"
            ))));
        }
        Err(e)
    }

    /// Registers a new lookup, cancelling any in-flight one for the target.
    async fn register(&self, key: &TargetKey) -> (u64, CancellationToken) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let token = CancellationToken::new();

        let mut pending = self.pending.lock().await;
        if let Some((_, previous)) = pending.insert(key.clone(), (generation, token.clone())) {
            debug!("Cancelling superseded live probe for '{}'", key.1);
            previous.cancel();
        }
        (generation, token)
    }

    async fn release(&self, key: &TargetKey, generation: u64) {
        let mut pending = self.pending.lock().await;
        if pending.get(key).is_some_and(|(g, _)| *g == generation) {
            pending.remove(key);
        }
    }

    /// Cancels the in-flight live probe for a target, if any.
    pub async fn cancel_pending(&self, device_id: u64, cert_name: &str) -> bool {
        let mut pending = self.pending.lock().await;
        pending
            .remove(&(device_id, cert_name.to_string()))
            .map(|(_, token)| token.cancel())
            .is_some()
    }

    /// Cancels every in-flight live probe.
    pub async fn cancel_all(&self) {
        let mut pending = self.pending.lock().await;
        for (_, (_, token)) in pending.drain() {
            token.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::MockApplianceGateway;
    use crate::impact::{ProfileRef, SnapshotSource};
    use crate::testing::{FakeGateway, Reply};

    fn profiles() -> Vec<ProfileRef> {
        vec![ProfileRef::new("Common", "app-clientssl", &["vs_app_443"])]
    }

    fn resolver(gateway: Arc<dyn ApplianceGateway>) -> ImpactPreviewResolver {
        ImpactPreviewResolver::new(gateway, RetryPolicy::default())
    }

    #[tokio::test]
    async fn test_cache_hit_skips_live() {
        let mut mock = MockApplianceGateway::new();
        mock.expect_cached_usage()
            .withf(|device_id, cert_name| *device_id == 1 && cert_name == "old_cert")
            .times(1)
            .returning(|_, _| Ok(profiles()));
        mock.expect_live_usage().times(0);

        let query = ImpactQuery::live(1, "old_cert").with_cache(42);
        let snapshot = resolver(Arc::new(mock))
            .resolve(&query)
            .await
            .expect("resolves")
            .into_snapshot()
            .expect("not superseded");

        assert_eq!(snapshot.source, SnapshotSource::Cache);
        assert_eq!(snapshot.profiles, profiles());
    }

    #[tokio::test]
    async fn test_cache_miss_falls_through_to_live() {
        let mut mock = MockApplianceGateway::new();
        mock.expect_cached_usage().times(1).returning(|_, _| {
            Err(GatewayError::NotFound {
                resource: String::from("No cached data"),
            }
            .into())
        });
        mock.expect_live_usage()
            .times(1)
            .returning(|_| Ok(profiles()));

        let query = ImpactQuery::live(1, "old_cert").with_cache(42);
        let outcome = resolver(Arc::new(mock)).resolve(&query).await.expect("resolves");

        let snapshot = outcome.into_snapshot().expect("resolved");
        assert_eq!(snapshot.source, SnapshotSource::Live);
        assert_eq!(snapshot.keys().into_iter().collect::<Vec<_>>(), vec!["Common/app-clientssl"]);
    }

    #[tokio::test]
    async fn test_live_not_found_is_empty_live_snapshot() {
        let mut mock = MockApplianceGateway::new();
        mock.expect_live_usage().times(1).returning(|_| {
            Err(GatewayError::NotFound {
                resource: String::from("Certificate not found"),
            }
            .into())
        });

        let snapshot = resolver(Arc::new(mock))
            .resolve(&ImpactQuery::live(1, "old_cert"))
            .await
            .expect("resolves")
            .into_snapshot()
            .expect("resolved");

        assert_eq!(snapshot.source, SnapshotSource::Live);
        assert!(snapshot.profiles.is_empty());
    }

    #[tokio::test]
    async fn test_auth_failure_is_an_error() {
        let mut mock = MockApplianceGateway::new();
        mock.expect_live_usage().times(1).returning(|_| {
            Err(GatewayError::AuthenticationFailed {
                message: String::from("Forbidden"),
            }
            .into())
        });

        let result = resolver(Arc::new(mock))
            .resolve(&ImpactQuery::live(1, "old_cert"))
            .await;
        assert!(result.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_yields_source_none() {
        let fake = Arc::new(FakeGateway::default());
        fake.script_live([Reply::Hang]);

        let outcome = resolver(fake.clone())
            .resolve(&ImpactQuery::live(1, "old_cert"))
            .await
            .expect("timeout is not an error");

        let snapshot = outcome.into_snapshot().expect("resolved");
        assert_eq!(snapshot.source, SnapshotSource::None);
        assert!(snapshot.advisory.as_deref().is_some_and(|a| a.contains("45s")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_are_retried_then_degrade() {
        let fake = Arc::new(FakeGateway::default());
        fake.script_live([Reply::Transient, Reply::Transient, Reply::Transient]);

        let snapshot = resolver(fake.clone())
            .resolve(&ImpactQuery::live(1, "old_cert"))
            .await
            .expect("degrades")
            .into_snapshot()
            .expect("resolved");

        assert_eq!(fake.live_calls(), 3);
        assert_eq!(snapshot.source, SnapshotSource::None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_fit_inside_deadline() {
        let fake = Arc::new(FakeGateway::default());
        fake.script_live([
            Reply::Transient,
            Reply::Profiles(profiles()),
        ]);

        let snapshot = resolver(fake.clone())
            .resolve(&ImpactQuery::live(1, "old_cert").with_timeout(Duration::from_secs(10)))
            .await
            .expect("resolves")
            .into_snapshot()
            .expect("resolved");

        assert_eq!(fake.live_calls(), 2);
        assert_eq!(snapshot.source, SnapshotSource::Live);
    }

    #[tokio::test(start_paused = true)]
    async fn test_newer_probe_supersedes_older() {
        let fake = Arc::new(FakeGateway::default());
        fake.script_live([
            Reply::Delayed(Duration::from_secs(20), profiles()),
            Reply::Delayed(Duration::from_secs(1), Vec::new()),
        ]);
        let resolver = resolver(fake.clone());
        let query = ImpactQuery::live(1, "old_cert");

        let (first, second) = tokio::join!(resolver.resolve(&query), resolver.resolve(&query));

        assert_eq!(first.expect("first ok"), ResolveOutcome::Superseded);
        let snapshot = second.expect("second ok").into_snapshot().expect("resolved");
        assert!(snapshot.profiles.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_explicit_cancel() {
        let fake = Arc::new(FakeGateway::default());
        fake.script_live([Reply::Hang]);
        let resolver = resolver(fake.clone());
        let query = ImpactQuery::live(1, "old_cert");

        let (outcome, cancelled) = tokio::join!(resolver.resolve(&query), async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            resolver.cancel_pending(1, "old_cert").await
        });

        assert!(cancelled);
        assert_eq!(outcome.expect("ok"), ResolveOutcome::Superseded);
    }

    #[test]
    fn test_timeout_clamp() {
        let short = ImpactQuery::live(1, "c").with_timeout(Duration::from_secs(1));
        let long = ImpactQuery::live(1, "c").with_timeout(Duration::from_secs(600));
        assert_eq!(short.clamped_timeout(), Duration::from_secs(10));
        assert_eq!(long.clamped_timeout(), Duration::from_secs(60));
    }
}
