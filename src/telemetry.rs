//! Telemetry metric name constants.
//!
//! Centralised metric names for coachway operations. Consumers install
//! their own `metrics` recorder (e.g. prometheus, statsd); without a
//! recorder installed, all metric calls are no-ops.
//!
//! # Metric naming conventions
//!
//! All metrics are prefixed with `coachway_`. Counters end in `_total`,
//! histograms use meaningful units (e.g. `_seconds`).
//!
//! # Common labels
//!
//! - `operation`: `"fetch"` or `"mutate"`
//! - `category`: cache category (e.g. "cities", "routes")
//! - `status`: outcome: "ok" or "error"

/// Total logical requests issued through the client (cache hits excluded).
///
/// Labels: `operation`, `status` ("ok" | "error").
pub const REQUESTS_TOTAL: &str = "coachway_requests_total";

/// Request duration in seconds, including retries and replays.
///
/// Labels: `operation`.
pub const REQUEST_DURATION_SECONDS: &str = "coachway_request_duration_seconds";

/// Total retry attempts (not counting the initial request).
///
/// Labels: `operation`.
pub const RETRIES_TOTAL: &str = "coachway_retries_total";

/// Total cache hits.
///
/// Labels: `category`.
pub const CACHE_HITS_TOTAL: &str = "coachway_cache_hits_total";

/// Total cache misses (absent or expired entries).
///
/// Labels: `category`.
pub const CACHE_MISSES_TOTAL: &str = "coachway_cache_misses_total";

/// Entries dropped because the store hit its capacity.
pub const CACHE_EVICTIONS_TOTAL: &str = "coachway_cache_evictions_total";

/// Callers that joined an already in-flight fetch instead of starting one.
pub const INFLIGHT_JOINS_TOTAL: &str = "coachway_inflight_joins_total";

/// Token refresh cycles.
///
/// Labels: `status` ("ok" | "error").
pub const SESSION_REFRESHES_TOTAL: &str = "coachway_session_refreshes_total";
