//! Adaptive timeouts.
//!
//! Each endpoint gets a deadline computed from its own recent latency
//! percentiles ([`AdaptiveTimeout`]), backed by a fixed-capacity sample ring
//! ([`LatencyStats`]) and registered per endpoint key in a
//! [`TimeoutRegistry`].

pub mod adaptive;
pub mod registry;
pub mod stats;

pub use adaptive::{AdaptiveTimeout, AdaptiveTimeoutConfig};
pub use registry::TimeoutRegistry;
pub use stats::LatencyStats;
