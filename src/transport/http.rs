//! reqwest-backed transport and token refresher.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use serde_json::Value;

use super::Transport;
use crate::session::TokenRefresher;
use crate::types::{ApiRequest, Envelope};
use crate::{CoachwayError, Result};

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

fn build_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| CoachwayError::Configuration(format!("failed to build HTTP client: {e}")))
}

fn join_url(base_url: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

fn map_send_error(err: reqwest::Error, timeout: Duration) -> CoachwayError {
    if err.is_timeout() {
        CoachwayError::Timeout(timeout)
    } else {
        CoachwayError::Network(err.to_string())
    }
}

/// Numeric `Retry-After` (seconds). HTTP-date values are ignored.
fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// Classify a response and unwrap its envelope.
async fn read_envelope(response: Response, timeout: Duration) -> Result<Value> {
    let status = response.status();
    let retry_after = parse_retry_after(response.headers());
    let body = response
        .text()
        .await
        .map_err(|e| map_send_error(e, timeout))?;

    if status.is_success() {
        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        let envelope: Envelope = serde_json::from_str(&body)
            .map_err(|e| CoachwayError::Decode(format!("malformed response body: {e}")))?;
        return if envelope.success {
            Ok(envelope.data.unwrap_or(Value::Null))
        } else {
            Err(CoachwayError::Api {
                status: status.as_u16(),
                message: envelope.message_or("request rejected"),
            })
        };
    }

    // Error bodies are best-effort: plain text, HTML from a proxy, or nothing.
    let message = serde_json::from_str::<Envelope>(&body)
        .ok()
        .and_then(|envelope| envelope.message)
        .unwrap_or_else(|| {
            status
                .canonical_reason()
                .map(str::to_owned)
                .unwrap_or_else(|| format!("HTTP {}", status.as_u16()))
        });

    Err(match status {
        StatusCode::UNAUTHORIZED => CoachwayError::Unauthorized(message),
        StatusCode::TOO_MANY_REQUESTS => CoachwayError::RateLimited {
            retry_after,
            message,
        },
        s if s.is_server_error() => CoachwayError::Server {
            status: s.as_u16(),
            message,
        },
        s => CoachwayError::Api {
            status: s.as_u16(),
            message,
        },
    })
}

/// Transport speaking JSON envelopes over HTTP.
#[derive(Clone)]
pub struct HttpTransport {
    http: Client,
    base_url: String,
    timeout: Duration,
}

impl HttpTransport {
    /// Create a transport for `base_url` with the default 30s timeout.
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        Self::with_timeout(base_url, DEFAULT_TIMEOUT)
    }

    /// Create a transport with a custom per-request timeout.
    pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            http: build_client(timeout)?,
            base_url: base_url.into(),
            timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl Transport for HttpTransport {
    fn name(&self) -> &str {
        "http"
    }

    async fn send(&self, request: &ApiRequest, token: Option<&str>) -> Result<Value> {
        let url = join_url(&self.base_url, &request.path);
        let mut builder = self.http.request(request.method.into(), &url);
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }
        if let Some(token) = token {
            builder = builder.bearer_auth(token);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| map_send_error(e, self.timeout))?;
        read_envelope(response, self.timeout).await
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RefreshData {
    Object {
        #[serde(alias = "accessToken", alias = "access_token")]
        token: String,
    },
    Bare(String),
}

/// Calls the backend's refresh endpoint with the current session token.
///
/// The endpoint answers with `data.token` (or `data.accessToken`), or with
/// the token as a bare string in `data`.
#[derive(Clone)]
pub struct HttpTokenRefresher {
    http: Client,
    url: String,
    timeout: Duration,
}

impl HttpTokenRefresher {
    pub fn new(base_url: &str, refresh_path: &str, timeout: Duration) -> Result<Self> {
        Ok(Self {
            http: build_client(timeout)?,
            url: join_url(base_url, refresh_path),
            timeout,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl TokenRefresher for HttpTokenRefresher {
    async fn refresh(&self, current: Option<&str>) -> Result<String> {
        let mut builder = self.http.post(&self.url);
        if let Some(token) = current {
            builder = builder.bearer_auth(token);
        }
        let response = builder
            .send()
            .await
            .map_err(|e| map_send_error(e, self.timeout))?;
        let data = read_envelope(response, self.timeout).await?;

        match serde_json::from_value::<RefreshData>(data) {
            Ok(RefreshData::Object { token }) | Ok(RefreshData::Bare(token)) if !token.is_empty() => {
                Ok(token)
            }
            _ => Err(CoachwayError::Decode(
                "refresh response carried no token".to_string(),
            )),
        }
    }
}
