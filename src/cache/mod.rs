//! Caching subsystem.
//!
//! Two cooperating structures, both owned by one
//! [`CoachwayClient`](crate::CoachwayClient) and shared by all its clones:
//!
//! - [`CacheStore`]: bounded key → payload map with per-category TTL,
//!   checked lazily at read time. Entries are memory-only.
//!
//! - [`InFlightRegistry`]: key → pending operation map that coalesces
//!   concurrent misses for the same key into a single network call.
//!
//! Neither ever swallows an error: a failed fetch leaves no entry behind and
//! is delivered to every joined caller.

pub mod inflight;
pub mod store;

pub use inflight::InFlightRegistry;
pub use store::{CacheConfig, CacheStore};
