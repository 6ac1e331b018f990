pub mod config;
pub mod errors;
pub mod metrics;
#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use config::*;
pub use errors::*;
pub use metrics::*;
