//! Client entry point and builder

mod builder;
mod orchestrator;

pub use builder::{Coachway, CoachwayBuilder};
pub use orchestrator::CoachwayClient;
