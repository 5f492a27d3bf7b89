/// Push channel: wire events and the adapter around the live connection
pub mod channel;
pub mod protocol;

pub use channel::{ChannelTransport, ConnectionState, PushChannelAdapter, PushTransport};
pub use protocol::{InboundEvent, OutboundEvent};
