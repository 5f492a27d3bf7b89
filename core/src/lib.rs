/// ChatSync - client-side real-time message synchronization
///
/// Owns conversation and message state for a chat client and reconciles it
/// against REST history fetches and an asynchronous push channel.

pub mod chat_types;
pub mod clock;
pub mod config;
pub mod conversation_store;
pub mod error;
pub mod message_store;
pub mod projection;
pub mod push;
pub mod replay;
pub mod scroll;
pub mod sync;
pub mod typing;

pub use config::SyncConfig;
pub use error::{Result, SyncError};
pub use projection::SyncSnapshot;
pub use sync::{SyncController, SyncEvent, SyncHandle, SyncRuntime};
