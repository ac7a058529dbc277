//! Error handling for the Pylon control plane.

mod types;

pub use types::{PylonError, Result};

/// Convenience alias used throughout the crate
pub use types::PylonError as Error;
