// Session State and Events
// Connection identity, lifecycle phases, the event stream and session errors

use crate::radio::{PeerId, RadioError, ServiceId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tokio::sync::mpsc;

// ============================================================================
// ROLE
// ============================================================================

/// The two ways a stream connection can be initiated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    Listener,
    Connector,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Listener => f.write_str("listener"),
            Self::Connector => f.write_str("connector"),
        }
    }
}

// ============================================================================
// CONNECTION PHASE
// ============================================================================

/// Where a session currently stands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionPhase {
    Idle,
    Listening,
    Connecting,
    Connected,
}

impl Default for ConnectionPhase {
    fn default() -> Self {
        Self::Idle
    }
}

impl ConnectionPhase {
    /// Check if a live connection exists
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Check if a role is waiting for a connection to appear
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Listening | Self::Connecting)
    }
}

// ============================================================================
// CONNECTION ID
// ============================================================================

/// Unique identifier for a promoted connection
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionId([u8; 16]);

impl ConnectionId {
    /// Generate a new unique connection ID
    pub fn generate() -> Self {
        use rand::Rng;
        let mut rng = rand::thread_rng();
        let mut bytes = [0u8; 16];
        rng.fill(&mut bytes);
        Self(bytes)
    }

    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(&self.0[..8]))
    }
}

// ============================================================================
// CONNECTION INFO
// ============================================================================

/// Point-in-time view of a live connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionInfo {
    pub id: ConnectionId,
    pub peer: PeerId,
    /// Role that produced the stream
    pub role: Role,
    pub connected_at: DateTime<Utc>,
    pub bytes_sent: u64,
    pub bytes_received: u64,
}

// ============================================================================
// DISCONNECT REASON
// ============================================================================

/// Why a pump's read loop ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The peer closed its end
    EndOfStream,
    /// The stream was closed locally
    Cancelled,
    ReadFailed(RadioError),
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EndOfStream => f.write_str("peer closed the stream"),
            Self::Cancelled => f.write_str("closed locally"),
            Self::ReadFailed(e) => write!(f, "{}", e),
        }
    }
}

// ============================================================================
// SESSION EVENTS
// ============================================================================

/// Everything a session reports to the application layer
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// A listener binding is advertising the service
    Listening { service: ServiceId },

    /// The listener binding was closed deliberately
    ListenerStopped,

    /// The listener binding failed while waiting for a peer
    AcceptFailed { error: RadioError },

    /// An outbound attempt started
    Connecting { peer: PeerId, service: ServiceId },

    /// An outbound attempt failed; its stream has been closed
    ConnectFailed { peer: PeerId, error: RadioError },

    /// A stream was promoted into the session's pump
    Connected { info: ConnectionInfo },

    /// A stream arrived after another one already won and was closed
    StrayConnectionDiscarded { peer: PeerId, role: Role },

    /// A chunk arrived on the live connection
    DataReceived {
        connection_id: ConnectionId,
        peer: PeerId,
        data: Vec<u8>,
        /// `data` decoded as UTF-8, invalid sequences replaced
        text: String,
    },

    /// A write failed; the read side keeps running
    WriteFailed {
        connection_id: ConnectionId,
        error: RadioError,
    },

    /// The connection is gone
    Disconnected {
        connection_id: ConnectionId,
        peer: PeerId,
        reason: DisconnectReason,
    },
}

/// Receiving end of a session's event stream
pub type SessionEvents = mpsc::UnboundedReceiver<SessionEvent>;

// ============================================================================
// SESSION ERRORS
// ============================================================================

/// Errors returned synchronously by session operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error(transparent)]
    Radio(#[from] RadioError),

    #[error("Not connected")]
    NotConnected,

    #[error("Already connected to {0}")]
    AlreadyConnected(PeerId),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl SessionError {
    /// Check if the caller supplied something unusable
    pub fn is_invalid_input(&self) -> bool {
        match self {
            Self::Radio(e) => e.is_invalid_input(),
            Self::InvalidConfig(_) => true,
            _ => false,
        }
    }
}
