//! Logging and counters for the control plane.

pub mod logging;
pub mod metrics;
