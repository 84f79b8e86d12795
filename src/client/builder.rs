//! Builder for configuring client instances

use std::sync::Arc;
use std::time::Duration;

use super::CoachwayClient;
use super::orchestrator::ClientInner;
use crate::cache::{CacheConfig, CacheStore, InFlightRegistry};
use crate::config::Config;
use crate::retry::RetryPolicy;
use crate::session::{FileTokenStore, MemoryTokenStore, SessionManager, TokenRefresher, TokenStore};
use crate::transport::{DEFAULT_TIMEOUT, HttpTokenRefresher, HttpTransport, Transport};
use crate::{CoachwayError, Result};

/// Default path of the token refresh endpoint.
pub const DEFAULT_REFRESH_PATH: &str = "/auth/refresh";

/// Main entry point for creating client instances.
pub struct Coachway;

impl Coachway {
    /// Create a new builder for configuring the client.
    pub fn builder() -> CoachwayBuilder {
        CoachwayBuilder::new()
    }
}

/// Builder for configuring client instances.
///
/// Either a `base_url` (HTTP transport and refresher are derived from it)
/// or an explicit [`Transport`] plus [`TokenRefresher`] is required.
pub struct CoachwayBuilder {
    base_url: Option<String>,
    timeout: Duration,
    refresh_path: String,
    retry: RetryPolicy,
    cache: CacheConfig,
    token_store: Option<Arc<dyn TokenStore>>,
    transport: Option<Arc<dyn Transport>>,
    refresher: Option<Arc<dyn TokenRefresher>>,
}

impl CoachwayBuilder {
    pub fn new() -> Self {
        Self {
            base_url: None,
            timeout: DEFAULT_TIMEOUT,
            refresh_path: DEFAULT_REFRESH_PATH.to_string(),
            retry: RetryPolicy::default(),
            cache: CacheConfig::default(),
            token_store: None,
            transport: None,
            refresher: None,
        }
    }

    /// Seed a builder from loaded configuration.
    pub fn from_config(config: &Config) -> Self {
        let mut builder = Self::new()
            .base_url(config.api.base_url.clone())
            .timeout(Duration::from_secs(config.api.timeout_secs))
            .refresh_path(config.session.refresh_path.clone())
            .retry(config.retry.policy())
            .cache(config.cache.cache_config());
        if let Some(path) = &config.session.token_path {
            builder = builder.token_store(Arc::new(FileTokenStore::new(path)));
        }
        builder
    }

    /// Backend API root, e.g. `https://api.example.com/api`.
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Per-request timeout for the HTTP transport (default: 30s).
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Refresh endpoint path relative to the base URL (default: `/auth/refresh`).
    pub fn refresh_path(mut self, path: impl Into<String>) -> Self {
        self.refresh_path = path.into();
        self
    }

    /// Retry policy for reads.
    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    /// Cache capacity and TTL table.
    pub fn cache(mut self, config: CacheConfig) -> Self {
        self.cache = config;
        self
    }

    /// Durable token storage (default: in-memory).
    pub fn token_store(mut self, store: Arc<dyn TokenStore>) -> Self {
        self.token_store = Some(store);
        self
    }

    /// Replace the HTTP transport, e.g. with a test double.
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Replace the HTTP token refresher.
    pub fn refresher(mut self, refresher: Arc<dyn TokenRefresher>) -> Self {
        self.refresher = Some(refresher);
        self
    }

    /// Build the client.
    pub fn build(self) -> Result<CoachwayClient> {
        if self.retry.initial_delay > self.retry.max_delay {
            return Err(CoachwayError::Configuration(format!(
                "retry initial delay {:?} exceeds max delay {:?}",
                self.retry.initial_delay, self.retry.max_delay
            )));
        }

        let transport: Arc<dyn Transport> = match self.transport {
            Some(transport) => transport,
            None => {
                let base_url = self.base_url.as_deref().ok_or_else(|| {
                    CoachwayError::Configuration("no base URL or transport configured".into())
                })?;
                Arc::new(HttpTransport::with_timeout(base_url, self.timeout)?)
            }
        };

        let refresher: Arc<dyn TokenRefresher> = match self.refresher {
            Some(refresher) => refresher,
            None => {
                let base_url = self.base_url.as_deref().ok_or_else(|| {
                    CoachwayError::Configuration("no base URL or token refresher configured".into())
                })?;
                Arc::new(HttpTokenRefresher::new(
                    base_url,
                    &self.refresh_path,
                    self.timeout,
                )?)
            }
        };

        let store: Arc<dyn TokenStore> = match self.token_store {
            Some(store) => store,
            None => Arc::new(MemoryTokenStore::new()),
        };

        Ok(CoachwayClient {
            inner: Arc::new(ClientInner {
                transport,
                cache: CacheStore::new(self.cache),
                inflight: InFlightRegistry::new(),
                retry: self.retry,
                session: SessionManager::new(refresher, store),
            }),
        })
    }
}

impl Default for CoachwayBuilder {
    fn default() -> Self {
        Self::new()
    }
}
