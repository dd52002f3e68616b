/// Realtime push channel
pub mod connection;
pub mod dispatch;
pub mod protocol;
pub mod transport;
pub mod typing;

pub use connection::{ConnectionManager, ConnectionOptions, ConnectionState, Generations, PushEvent};
pub use dispatch::Dispatcher;
pub use protocol::{ClientFrame, InboundEvent, ServerFrame, TypingUpdate, PROTOCOL_VERSION};
pub use transport::{PushLink, PushTransport, TcpPushTransport};
pub use typing::TypingIndicators;
