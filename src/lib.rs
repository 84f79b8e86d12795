//! Coachway - API client layer for a coach-booking backend
//!
//! This crate puts a single request orchestrator between application code and
//! the booking backend. Every read goes through a short-lived response cache,
//! identical concurrent reads share one network call, transient failures are
//! retried with exponential backoff, and an expired session is refreshed once
//! and the rejected request replayed transparently.
//!
//! # Example
//!
//! ```rust,no_run
//! use coachway::{ApiRequest, CacheCategory, Coachway};
//!
//! #[tokio::main]
//! async fn main() -> coachway::Result<()> {
//!     let client = Coachway::builder()
//!         .base_url("https://booking.example.com/api")
//!         .build()?;
//!
//!     let cities = client
//!         .fetch(&ApiRequest::get("/cities"), CacheCategory::Cities)
//!         .await?;
//!     println!("{cities}");
//!
//!     let routes = client
//!         .fetch(
//!             &ApiRequest::get("/routes").query("from", "lyon").query("to", "paris"),
//!             CacheCategory::Routes,
//!         )
//!         .await?;
//!     println!("{routes}");
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod client;
pub mod config;
pub mod error;
pub mod retry;
pub mod session;
pub mod telemetry;
pub mod transport;
pub mod types;
mod version;

// Re-export main types at crate root
pub use cache::{CacheConfig, CacheStore, InFlightRegistry};
pub use client::{Coachway, CoachwayBuilder, CoachwayClient};
pub use config::Config;
pub use error::{ClientError, CoachwayError, Result};
pub use retry::RetryPolicy;
pub use session::{
    FileTokenStore, MemoryTokenStore, SessionManager, SessionState, TokenRefresher, TokenStore,
};
pub use transport::{HttpTokenRefresher, HttpTransport, Transport};
pub use types::{ApiRequest, CacheCategory, Envelope, Method, TtlTable};
pub use version::{PKG_VERSION, version_string};
