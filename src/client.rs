use std::sync::Arc;
use std::time::Duration;

use crate::cache::{CacheConfig, CacheEntry, ResolutionCache};
use crate::connect::ConnectClient;
use crate::connection::{ConnectionManager, ConnectionState};
use crate::fingerprint::fingerprint;
use crate::resolution::ERROR_REASON;
use crate::service::{FlagService, Resolved};
use crate::{
    Error, ErrorCode, EvaluationContext, FlagdOptions, ResolutionDetails, Result, Value,
};

/// A client for the flagd evaluation service.
///
/// Construction opens the long-lived event subscription in a background task; resolution calls
/// are gated on the server's readiness signal and never block on the connection task — before
/// the first `provider_ready` event (or after the retry budget is exhausted) they return the
/// caller's default immediately.
///
/// Resolution never returns an error: failures are folded into the returned
/// [`ResolutionDetails`] as an [`ErrorCode`] alongside the caller-supplied default.
///
/// # Examples
/// ```no_run
/// # use flagd_web::{FlagdClient, FlagdOptions};
/// # async fn example() -> flagd_web::Result<()> {
/// let client = FlagdClient::new(FlagdOptions::from_env().with_cache(true))?;
/// let details = client.resolve_boolean("new-ui", false, &Default::default()).await;
/// # Ok(())
/// # }
/// ```
pub struct FlagdClient {
    service: Arc<dyn FlagService>,
    cache: Option<Arc<ResolutionCache>>,
    connection: ConnectionManager,
}

impl FlagdClient {
    /// Create a client talking to the endpoint described by `options`.
    ///
    /// Must be called within a tokio runtime; the connection task is spawned immediately.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidBaseUrl`] if host/port do not form a valid url.
    pub fn new(options: FlagdOptions) -> Result<FlagdClient> {
        let service = Arc::new(ConnectClient::new(&options)?);
        Ok(FlagdClient::with_service(service, &options))
    }

    /// Create a client on top of a custom [`FlagService`] transport.
    ///
    /// Only the cache and retry fields of `options` are used; the endpoint fields are the
    /// transport's concern.
    pub fn with_service(service: Arc<dyn FlagService>, options: &FlagdOptions) -> FlagdClient {
        let cache = options.cache.then(|| {
            Arc::new(ResolutionCache::new(
                CacheConfig::new()
                    .with_ttl(Duration::from_secs(options.cache_ttl))
                    .with_max_bytes(options.cache_max_bytes),
            ))
        });

        let connection =
            ConnectionManager::start(Arc::clone(&service), cache.clone(), options.max_retries);

        FlagdClient {
            service,
            cache,
            connection,
        }
    }

    /// Resolve a boolean flag.
    pub async fn resolve_boolean(
        &self,
        flag_key: &str,
        default_value: bool,
        context: &EvaluationContext,
    ) -> ResolutionDetails<bool> {
        if let Some(gated) = self.gate(flag_key, default_value) {
            return gated;
        }
        let key = fingerprint(flag_key, context);
        if let Some(hit) = self.cached(flag_key, &key, default_value, Value::as_boolean) {
            return hit;
        }

        match self.service.resolve_boolean(flag_key, context).await {
            Ok(resolved) => self.complete(key, Value::Boolean(resolved.value), resolved),
            Err(err) => failure(flag_key, default_value, &err),
        }
    }

    /// Resolve a string flag.
    pub async fn resolve_string(
        &self,
        flag_key: &str,
        default_value: impl Into<String>,
        context: &EvaluationContext,
    ) -> ResolutionDetails<String> {
        let default_value = default_value.into();
        if let Some(gated) = self.gate(flag_key, default_value.clone()) {
            return gated;
        }
        let key = fingerprint(flag_key, context);
        if let Some(hit) = self.cached(flag_key, &key, default_value.clone(), |value| {
            value.as_str().map(str::to_owned)
        }) {
            return hit;
        }

        match self.service.resolve_string(flag_key, context).await {
            Ok(resolved) => {
                self.complete(key, Value::String(resolved.value.clone()), resolved)
            }
            Err(err) => failure(flag_key, default_value, &err),
        }
    }

    /// Resolve a numeric flag.
    pub async fn resolve_float(
        &self,
        flag_key: &str,
        default_value: f64,
        context: &EvaluationContext,
    ) -> ResolutionDetails<f64> {
        if let Some(gated) = self.gate(flag_key, default_value) {
            return gated;
        }
        let key = fingerprint(flag_key, context);
        if let Some(hit) = self.cached(flag_key, &key, default_value, Value::as_number) {
            return hit;
        }

        match self.service.resolve_float(flag_key, context).await {
            Ok(resolved) => self.complete(key, Value::Number(resolved.value), resolved),
            Err(err) => failure(flag_key, default_value, &err),
        }
    }

    /// Resolve a structured flag.
    ///
    /// If the server explicitly reports no value payload for the flag, the caller's default is
    /// returned with the server-supplied reason and variant; such a response is not cached.
    pub async fn resolve_object(
        &self,
        flag_key: &str,
        default_value: serde_json::Value,
        context: &EvaluationContext,
    ) -> ResolutionDetails<serde_json::Value> {
        if let Some(gated) = self.gate(flag_key, default_value.clone()) {
            return gated;
        }
        let key = fingerprint(flag_key, context);
        if let Some(hit) = self.cached(flag_key, &key, default_value.clone(), |value| {
            value.as_structure().cloned()
        }) {
            return hit;
        }

        match self.service.resolve_object(flag_key, context).await {
            Ok(Resolved {
                value: Some(value),
                reason,
                variant,
            }) => self.complete(
                key,
                Value::Structure(value.clone()),
                Resolved {
                    value,
                    reason,
                    variant,
                },
            ),
            Ok(Resolved {
                value: None,
                reason,
                variant,
            }) => ResolutionDetails::new(default_value, reason, variant),
            Err(err) => failure(flag_key, default_value, &err),
        }
    }

    /// Get a snapshot of the connection state.
    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// Stop the background connection task, releasing the event subscription.
    ///
    /// The connection state becomes terminal; subsequent resolutions return the caller's
    /// default with [`ErrorCode::ConnectionError`].
    pub fn stop(&self) {
        self.connection.stop();
    }

    /// Fail-fast readiness check. Returns the gated result to hand back, or `None` when the
    /// connection is ready and resolution may proceed.
    fn gate<T>(&self, flag_key: &str, default_value: T) -> Option<ResolutionDetails<T>> {
        match self.connection.state() {
            ConnectionState::Ready => None,
            ConnectionState::Failed => {
                log::warn!(target: "flagd", flag_key; "resolving after connection failed permanently");
                Some(ResolutionDetails::error(
                    default_value,
                    ErrorCode::ConnectionError,
                    "connection to flagd failed permanently",
                ))
            }
            _ => {
                log::warn!(target: "flagd", flag_key; "resolving before flagd signalled readiness");
                Some(ResolutionDetails::error(
                    default_value,
                    ErrorCode::ProviderNotReady,
                    "flagd has not signalled readiness yet",
                ))
            }
        }
    }

    /// Look up `key` in the cache and extract a typed value from the stored entry.
    ///
    /// A hit whose stored value is of a different kind than requested is answered with
    /// `TYPE_MISMATCH` without a network call — the entry was stored for the same
    /// `(flag, context)` pair, so the server would report the same mismatch.
    fn cached<T>(
        &self,
        flag_key: &str,
        key: &str,
        default_value: T,
        extract: impl FnOnce(&Value) -> Option<T>,
    ) -> Option<ResolutionDetails<T>> {
        let entry = self.cache.as_ref()?.get(key)?;
        log::trace!(target: "flagd", flag_key; "resolution served from cache");

        match extract(&entry.value) {
            Some(value) => Some(ResolutionDetails::new(value, entry.reason, entry.variant)),
            None => Some(ResolutionDetails::error(
                default_value,
                ErrorCode::TypeMismatch,
                "cached value kind does not match the requested kind",
            )),
        }
    }

    /// Store a successful resolution (when caching is enabled) and build the caller's result.
    fn complete<T>(
        &self,
        key: String,
        value: Value,
        resolved: Resolved<T>,
    ) -> ResolutionDetails<T> {
        if let Some(cache) = &self.cache {
            cache.set(
                key,
                CacheEntry {
                    value,
                    variant: resolved.variant.clone(),
                    reason: resolved.reason.clone(),
                },
            );
        }
        ResolutionDetails::new(resolved.value, resolved.reason, resolved.variant)
    }
}

/// Fold a transport failure into a default-valued result.
fn failure<T>(flag_key: &str, default_value: T, err: &Error) -> ResolutionDetails<T> {
    log::warn!(target: "flagd", flag_key; "flag resolution failed: {:?}", err);
    ResolutionDetails {
        value: default_value,
        variant: None,
        reason: Some(ERROR_REASON.to_owned()),
        error_code: Some(ErrorCode::from(err)),
        error_message: Some(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::service::testing::MockService;
    use crate::service::ServiceEvent;

    fn options() -> FlagdOptions {
        FlagdOptions::new().with_cache(true).with_max_retries(1)
    }

    async fn ready_client(service: Arc<MockService>, options: &FlagdOptions) -> FlagdClient {
        let events = service.push_stream();
        let client = FlagdClient::with_service(service, options);
        events.send(Ok(ServiceEvent::ProviderReady)).unwrap();
        wait_for_ready(&client).await;
        // Keep the stream open for the lifetime of the test.
        std::mem::forget(events);
        client
    }

    async fn wait_for_ready(client: &FlagdClient) {
        for _ in 0..500 {
            if client.connection_state() == ConnectionState::Ready {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("client never became ready");
    }

    #[tokio::test]
    async fn gated_before_readiness() {
        let service = Arc::new(MockService::new());
        let events = service.push_stream();
        let client = FlagdClient::with_service(Arc::clone(&service) as _, &options());
        // No provider_ready sent; the stream is open but the server has not confirmed
        // readiness.
        let details = client
            .resolve_boolean("flag", true, &EvaluationContext::new())
            .await;

        assert!(details.value);
        assert_eq!(details.error_code, Some(ErrorCode::ProviderNotReady));
        assert_eq!(details.reason.as_deref(), Some("ERROR"));
        assert_eq!(service.resolve_call_count(), 0);
        drop(events);
    }

    #[tokio::test]
    async fn gated_after_retries_exhausted() {
        let service = Arc::new(MockService::new());
        // No streams queued: the single allowed attempt fails and the state is terminal.
        let client = FlagdClient::with_service(
            Arc::clone(&service) as _,
            &FlagdOptions::new().with_max_retries(0),
        );
        for _ in 0..500 {
            if client.connection_state() == ConnectionState::Failed {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let details = client
            .resolve_string("flag", "fallback", &EvaluationContext::new())
            .await;

        assert_eq!(details.value, "fallback");
        assert_eq!(details.error_code, Some(ErrorCode::ConnectionError));
        assert_eq!(service.resolve_call_count(), 0);
    }

    #[tokio::test]
    async fn resolutions_after_stop_are_gated() {
        let service = Arc::new(MockService::new());
        let client = ready_client(Arc::clone(&service), &options()).await;

        client.stop();
        assert_eq!(client.connection_state(), ConnectionState::Failed);

        let details = client
            .resolve_boolean("flag", false, &EvaluationContext::new())
            .await;

        assert!(!details.value);
        assert_eq!(details.error_code, Some(ErrorCode::ConnectionError));
        assert_eq!(service.resolve_call_count(), 0);
    }

    #[tokio::test]
    async fn cache_hit_avoids_network() {
        let service = Arc::new(MockService::new());
        let client = ready_client(Arc::clone(&service), &options()).await;
        let context = EvaluationContext::new();

        let first = client.resolve_boolean("flag", false, &context).await;
        assert!(first.value);
        assert_eq!(service.resolve_call_count(), 1);

        let second = client.resolve_boolean("flag", false, &context).await;
        assert_eq!(second, first);
        assert_eq!(service.resolve_call_count(), 1);
    }

    #[tokio::test]
    async fn distinct_contexts_are_cached_separately() {
        let service = Arc::new(MockService::new());
        let client = ready_client(Arc::clone(&service), &options()).await;

        let c1 = [("user".to_owned(), "u1".into())].into_iter().collect();
        let c2 = [("user".to_owned(), "u2".into())].into_iter().collect();

        client.resolve_boolean("flag", false, &c1).await;
        client.resolve_boolean("flag", false, &c2).await;

        assert_eq!(service.resolve_call_count(), 2);
    }

    #[tokio::test]
    async fn caching_disabled_always_calls_remote() {
        let service = Arc::new(MockService::new());
        let client =
            ready_client(Arc::clone(&service), &FlagdOptions::new().with_max_retries(1)).await;
        let context = EvaluationContext::new();

        client.resolve_boolean("flag", false, &context).await;
        client.resolve_boolean("flag", false, &context).await;

        assert_eq!(service.resolve_call_count(), 2);
    }

    #[tokio::test]
    async fn failures_fold_into_default_result() {
        let service = Arc::new(MockService::new());
        service.set_boolean(Err(Error::FlagNotFound));
        let client = ready_client(Arc::clone(&service), &options()).await;

        let details = client
            .resolve_boolean("missing", true, &EvaluationContext::new())
            .await;

        assert!(details.value);
        assert_eq!(details.error_code, Some(ErrorCode::FlagNotFound));
        assert!(details.error_message.is_some());

        // Failures are not cached; the next call hits the network again.
        client
            .resolve_boolean("missing", true, &EvaluationContext::new())
            .await;
        assert_eq!(service.resolve_call_count(), 2);
    }

    #[tokio::test]
    async fn object_without_value_returns_default_uncached() {
        let service = Arc::new(MockService::new());
        service.set_object(Ok(crate::service::Resolved {
            value: None,
            reason: Some("DISABLED".to_owned()),
            variant: None,
        }));
        let client = ready_client(Arc::clone(&service), &options()).await;

        let default = serde_json::json!({"fallback": true});
        let details = client
            .resolve_object("obj-flag", default.clone(), &EvaluationContext::new())
            .await;

        assert_eq!(details.value, default);
        assert_eq!(details.reason.as_deref(), Some("DISABLED"));
        assert_eq!(details.error_code, None);

        // Not cache-worthy: the next call reaches the service again.
        client
            .resolve_object("obj-flag", default, &EvaluationContext::new())
            .await;
        assert_eq!(service.resolve_call_count(), 2);
    }

    #[tokio::test]
    async fn cached_entry_of_other_kind_reports_type_mismatch() {
        let service = Arc::new(MockService::new());
        let client = ready_client(Arc::clone(&service), &options()).await;
        let context = EvaluationContext::new();

        client.resolve_boolean("flag", false, &context).await;
        let details = client.resolve_string("flag", "fallback", &context).await;

        assert_eq!(details.value, "fallback");
        assert_eq!(details.error_code, Some(ErrorCode::TypeMismatch));
        assert_eq!(service.resolve_call_count(), 1);
    }

    #[tokio::test]
    async fn typed_resolutions_return_server_payloads() {
        let service = Arc::new(MockService::new());
        let client = ready_client(Arc::clone(&service), &options()).await;
        let context = EvaluationContext::new();

        let string = client.resolve_string("s", "d", &context).await;
        assert_eq!(string.value, "resolved");

        let number = client.resolve_float("f", 0.0, &context).await;
        assert_eq!(number.value, 1.5);

        let object = client
            .resolve_object("o", serde_json::json!({}), &context)
            .await;
        assert_eq!(object.value, serde_json::json!({"k": "v"}));
        assert_eq!(object.reason.as_deref(), Some("STATIC"));
    }

    // The full §-style scenario: ready, resolve, cache hit, server-pushed invalidation,
    // re-resolve.
    #[tokio::test]
    async fn change_notification_forces_re_resolution() {
        let service = Arc::new(MockService::new());
        let events = service.push_stream();
        let client = FlagdClient::with_service(Arc::clone(&service) as _, &options());
        events.send(Ok(ServiceEvent::ProviderReady)).unwrap();
        wait_for_ready(&client).await;

        let context = EvaluationContext::new();
        let first = client.resolve_boolean("flag-a", false, &context).await;
        assert!(first.value);
        assert_eq!(first.reason.as_deref(), Some("STATIC"));
        assert_eq!(first.variant.as_deref(), Some("on"));

        let second = client.resolve_boolean("flag-a", false, &context).await;
        assert_eq!(second, first);
        assert_eq!(service.resolve_call_count(), 1);

        let changes = serde_json::from_value(serde_json::json!({
            "flag-a": {"type": "update", "source": "file"}
        }))
        .unwrap();
        events
            .send(Ok(ServiceEvent::ConfigurationChange(Ok(changes))))
            .unwrap();

        // Wait for the connection task to apply the invalidation, then the third call must
        // reach the service again.
        for _ in 0..500 {
            if service.resolve_call_count() > 1 {
                break;
            }
            client.resolve_boolean("flag-a", false, &context).await;
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(service.resolve_call_count() > 1);
    }
}
