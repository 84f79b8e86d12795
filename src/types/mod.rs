//! Public types for the Coachway API.

mod category;
mod envelope;
mod request;

pub use category::{CacheCategory, TtlTable};
pub use envelope::Envelope;
pub use request::{ApiRequest, Method};
