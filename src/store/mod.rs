//! Object storage and event coalescing.

mod notifier;
mod object_store;

pub use notifier::HoldoffNotifier;
pub use object_store::{ObjectStore, StoreSnapshot, UpsertOutcome};
