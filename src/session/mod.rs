// Session module - THE HANDSHAKE
// Listener and connector roles racing to produce one stream, promoted into a pump

mod config;
mod connector;
mod listener;
mod manager;
mod pump;
mod state;

pub use config::{SessionConfig, DEFAULT_READ_BUFFER_SIZE};
pub use connector::ConnectorRole;
pub use listener::ListenerRole;
pub use manager::ConnectionManager;
pub use pump::Pump;
pub use state::{
    ConnectionId, ConnectionInfo, ConnectionPhase, DisconnectReason, Role, SessionError,
    SessionEvent, SessionEvents,
};
