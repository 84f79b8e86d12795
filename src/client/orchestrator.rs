//! CoachwayClient - composes cache, coalescing, retry and session handling

use std::sync::Arc;
use std::time::Instant;

use futures_util::future::join_all;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use crate::cache::{CacheStore, InFlightRegistry};
use crate::retry::{RetryPolicy, with_retry};
use crate::session::SessionManager;
use crate::telemetry;
use crate::transport::Transport;
use crate::types::{ApiRequest, CacheCategory};
use crate::{CoachwayError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operation {
    Fetch,
    Mutate,
}

impl Operation {
    fn as_str(self) -> &'static str {
        match self {
            Operation::Fetch => "fetch",
            Operation::Mutate => "mutate",
        }
    }
}

pub(crate) struct ClientInner {
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) cache: CacheStore,
    pub(crate) inflight: InFlightRegistry<Value>,
    pub(crate) retry: RetryPolicy,
    pub(crate) session: SessionManager,
}

impl ClientInner {
    /// One logical call: attempt, and on 401 a single refresh-and-replay.
    async fn execute(&self, operation: Operation, request: &ApiRequest) -> Result<Value> {
        let start = Instant::now();
        let result = self.execute_with_session(operation, request).await;
        let operation = operation.as_str();

        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(telemetry::REQUESTS_TOTAL, "operation" => operation, "status" => status)
            .increment(1);
        metrics::histogram!(telemetry::REQUEST_DURATION_SECONDS, "operation" => operation)
            .record(start.elapsed().as_secs_f64());
        result
    }

    async fn execute_with_session(
        &self,
        operation: Operation,
        request: &ApiRequest,
    ) -> Result<Value> {
        let token = self.session.token();
        match self.send(operation, request, token.as_deref()).await {
            Err(e) if e.is_unauthorized() => {
                debug!(path = %request.path, "request unauthorized, recovering session");
                let fresh = self.session.recover(token.as_deref()).await?;
                match self.send(operation, request, Some(&fresh)).await {
                    // Replayed once already; a second 401 is final.
                    Err(CoachwayError::Unauthorized(message)) => {
                        warn!(path = %request.path, "replayed request rejected again");
                        Err(CoachwayError::AuthenticationRequired(message))
                    }
                    other => other,
                }
            }
            other => other,
        }
    }

    /// Reads go through the retry policy; mutations get exactly one attempt.
    async fn send(
        &self,
        operation: Operation,
        request: &ApiRequest,
        token: Option<&str>,
    ) -> Result<Value> {
        match operation {
            Operation::Fetch => {
                with_retry(&self.retry, operation.as_str(), || {
                    self.transport.send(request, token)
                })
                .await
            }
            Operation::Mutate => self.transport.send(request, token).await,
        }
    }
}

/// Single entry point for every backend call.
///
/// Cheap to clone; all clones share one cache, one in-flight registry and
/// one session. Construct through [`Coachway::builder()`](crate::Coachway::builder).
#[derive(Clone)]
pub struct CoachwayClient {
    pub(crate) inner: Arc<ClientInner>,
}

impl CoachwayClient {
    /// Cached, coalesced, retried read.
    ///
    /// 1. A fresh cache entry for `request.key()` is returned without I/O.
    /// 2. Otherwise the call joins the in-flight fetch for that key, or
    ///    starts one: session token attached, transport wrapped in the retry
    ///    policy, 401 resolved through one refresh-and-replay.
    /// 3. On success the payload is cached under `category`; on failure
    ///    nothing is cached and every joined caller sees the same error.
    pub async fn fetch(&self, request: &ApiRequest, category: CacheCategory) -> Result<Value> {
        if !request.method.is_idempotent() {
            return Err(CoachwayError::InvalidInput(format!(
                "fetch only serves reads, got {} {}; use mutate",
                request.method, request.path
            )));
        }

        let key = request.key();
        if let Some(hit) = self.inner.cache.get(&key, category) {
            debug!(key = %key, %category, "cache hit");
            return Ok(hit);
        }

        let inner = Arc::clone(&self.inner);
        let request = request.clone();
        let cache_key = key.clone();
        // A clear (sign-out, manual refresh) while this is on the wire
        // invalidates its result for the cache.
        let epoch = self.inner.cache.epoch();
        self.inner
            .inflight
            .acquire_or_join(key, move || async move {
                let value = inner.execute(Operation::Fetch, &request).await?;
                inner
                    .cache
                    .set_if_current(cache_key, category, value.clone(), epoch);
                Ok(value)
            })
            .await
    }

    /// [`fetch`](Self::fetch) and decode the payload into `T`.
    pub async fn fetch_json<T: DeserializeOwned>(
        &self,
        request: &ApiRequest,
        category: CacheCategory,
    ) -> Result<T> {
        let value = self.fetch(request, category).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// [`fetch`](Self::fetch), substituting `fallback` on failure.
    ///
    /// The fallback is never cached, so the next call tries the network again.
    pub async fn fetch_or(
        &self,
        request: &ApiRequest,
        category: CacheCategory,
        fallback: Value,
    ) -> Value {
        match self.fetch(request, category).await {
            Ok(value) => value,
            Err(e) => {
                warn!(key = %request.key(), error = %e, "fetch failed, serving fallback payload");
                fallback
            }
        }
    }

    /// Create/update/delete call. Not cached, not coalesced, never retried
    /// on transient errors; a 401 still gets one refresh-and-replay.
    pub async fn mutate(&self, request: &ApiRequest) -> Result<Value> {
        self.inner.execute(Operation::Mutate, request).await
    }

    /// [`mutate`](Self::mutate) and decode the payload into `T`.
    pub async fn mutate_json<T: DeserializeOwned>(&self, request: &ApiRequest) -> Result<T> {
        let value = self.mutate(request).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Fetch a known set of resources concurrently, e.g. reference lists at
    /// startup. Outcomes are returned in input order.
    pub async fn warm_cache<I>(&self, entries: I) -> Vec<Result<Value>>
    where
        I: IntoIterator<Item = (ApiRequest, CacheCategory)>,
    {
        let fetches = entries.into_iter().map(move |(request, category)| async move {
            let result = self.fetch(&request, category).await;
            if let Err(e) = &result {
                warn!(key = %request.key(), error = %e, "cache warm-up fetch failed");
            }
            result
        });
        join_all(fetches).await
    }

    /// Drop every cached entry (manual refresh, logout).
    ///
    /// Reads already on the wire still answer their callers but are not
    /// cached, and later reads don't join them.
    pub fn clear_cache(&self) {
        self.inner.cache.clear();
        let detached = self.inner.inflight.detach_all();
        if detached > 0 {
            debug!(detached, "detached in-flight reads from cleared cache");
        }
    }

    /// Drop one cached key. Returns whether it was present.
    pub fn invalidate(&self, key: &str) -> bool {
        self.inner.cache.invalidate(key)
    }

    /// Drop every cached entry of `category`.
    pub fn invalidate_category(&self, category: CacheCategory) -> usize {
        self.inner.cache.invalidate_category(category)
    }

    pub fn cache(&self) -> &CacheStore {
        &self.inner.cache
    }

    pub fn session(&self) -> &SessionManager {
        &self.inner.session
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.inner.retry
    }

    /// Number of reads currently on the wire.
    pub fn pending_requests(&self) -> usize {
        self.inner.inflight.len()
    }

    /// Store a token obtained from a login call.
    pub fn sign_in(&self, token: impl Into<String>) -> Result<()> {
        self.inner.session.sign_in(token)
    }

    /// Forget the session and everything cached under it.
    pub fn sign_out(&self) -> Result<()> {
        self.clear_cache();
        self.inner.session.sign_out()
    }
}
