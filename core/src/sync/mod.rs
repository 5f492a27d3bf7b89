/// Sync controller state machine and its event loop
pub mod controller;
pub mod events;
pub mod runtime;

pub use controller::{SyncController, SyncState};
pub use events::{Effect, Notice, SyncEvent};
pub use runtime::{HistoryFetcher, MessageSubmitter, SyncHandle, SyncRuntime};
