//! Transport seam: one HTTP call in, one decoded payload (or error) out.
//!
//! [`Transport`] knows nothing about caching, retries or sessions. It is
//! handed the bearer token to attach and reports the provider's answer as
//! either the envelope `data` or a classified [`CoachwayError`](crate::CoachwayError):
//!
//! | provider answer                 | result                          |
//! |---------------------------------|---------------------------------|
//! | no response / DNS / reset       | `Network`                       |
//! | no response within the timeout  | `Timeout`                       |
//! | 2xx, `success: true`            | `Ok(data)` (`null` if absent)   |
//! | 2xx, `success: false`           | `Api`                           |
//! | 401                             | `Unauthorized`                  |
//! | 429                             | `RateLimited` (+ `Retry-After`) |
//! | 5xx                             | `Server`                        |
//! | other 4xx                       | `Api`                           |

mod http;

pub use http::{DEFAULT_TIMEOUT, HttpTokenRefresher, HttpTransport};

use async_trait::async_trait;
use serde_json::Value;

use crate::Result;
use crate::types::ApiRequest;

/// Issues a single request against the backend.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Transport name for logging/debugging.
    fn name(&self) -> &str;

    /// Send `request`, attaching `token` as a bearer credential when present.
    async fn send(&self, request: &ApiRequest, token: Option<&str>) -> Result<Value>;
}
