// Radio Traits and Core Types
// Defines the platform radio abstraction and the identifiers shared by every backend

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use tokio::sync::watch;
use uuid::Uuid;

// ============================================================================
// WELL-KNOWN IDENTIFIERS
// ============================================================================

/// Name advertised alongside the service record
pub const SERVICE_NAME: &str = "RESUMEBLU";

/// Service record used by both listener and connector so any two instances can rendezvous
pub const INSECURE_SERVICE_ID: ServiceId =
    ServiceId::from_u128(0x8ce255c0_200a_11e0_ac64_0800200c9a66);

/// Service record for authenticated (paired) links
pub const SECURE_SERVICE_ID: ServiceId =
    ServiceId::from_u128(0xfa87c0d0_afac_11de_8a39_0800200c9a66);

// ============================================================================
// PEER ID
// ============================================================================

/// Opaque address of a remote device
///
/// Radio hardware addresses (`AA:BB:CC:DD:EE:FF`) are normalized to upper case.
/// Anything else is kept verbatim, which lets non-radio backends use their own
/// address format (the TCP radio uses `host:port`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerId(String);

impl PeerId {
    pub fn new(raw: &str) -> Result<Self, RadioError> {
        if raw.is_empty() {
            return Err(RadioError::InvalidPeer("peer identifier is empty".to_string()));
        }
        if raw.chars().any(char::is_whitespace) {
            return Err(RadioError::InvalidPeer(format!(
                "peer identifier contains whitespace: {:?}",
                raw
            )));
        }

        if is_hardware_address(raw) {
            Ok(Self(raw.to_uppercase()))
        } else {
            Ok(Self(raw.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Check if this is a six-octet radio hardware address
    pub fn is_hardware_address(&self) -> bool {
        is_hardware_address(&self.0)
    }
}

fn is_hardware_address(raw: &str) -> bool {
    let octets: Vec<&str> = raw.split(':').collect();
    octets.len() == 6
        && octets
            .iter()
            .all(|o| o.len() == 2 && o.chars().all(|c| c.is_ascii_hexdigit()))
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for PeerId {
    type Err = RadioError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

// ============================================================================
// SERVICE ID
// ============================================================================

/// 128-bit identifier naming a service record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServiceId(Uuid);

impl ServiceId {
    pub const fn from_u128(value: u128) -> Self {
        Self(Uuid::from_u128(value))
    }

    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }

    /// Parse the hyphenated (or simple) textual form
    pub fn parse(raw: &str) -> Result<Self, RadioError> {
        Uuid::parse_str(raw)
            .map(Self)
            .map_err(|e| RadioError::InvalidService(format!("{}: {}", raw, e)))
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    pub fn to_bytes(&self) -> [u8; 16] {
        *self.0.as_bytes()
    }
}

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl FromStr for ServiceId {
    type Err = RadioError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

// ============================================================================
// RADIO ERRORS
// ============================================================================

/// Errors raised by a radio backend
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RadioError {
    #[error("Failed to open service binding: {0}")]
    TransportOpen(String),

    #[error("Accept failed: {0}")]
    AcceptFailed(String),

    #[error("Connection failed: {0}")]
    ConnectFailed(String),

    #[error("Service {service} not found on {peer}")]
    ServiceNotFound { peer: PeerId, service: ServiceId },

    #[error("Connection refused by {0}")]
    Refused(PeerId),

    #[error("Read failed: {0}")]
    ReadFailed(String),

    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("Handle closed")]
    Closed,

    #[error("Invalid peer identifier: {0}")]
    InvalidPeer(String),

    #[error("Invalid service identifier: {0}")]
    InvalidService(String),

    #[error("IO error: {0}")]
    IoError(String),
}

impl RadioError {
    /// Check if the error came from closing the handle locally
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }

    /// Check if this is an outbound connection error
    pub fn is_connect_error(&self) -> bool {
        matches!(
            self,
            Self::ConnectFailed(_) | Self::ServiceNotFound { .. } | Self::Refused(_)
        )
    }

    /// Check if this is a validation error raised before any radio work
    pub fn is_invalid_input(&self) -> bool {
        matches!(self, Self::InvalidPeer(_) | Self::InvalidService(_))
    }
}

impl From<std::io::Error> for RadioError {
    fn from(e: std::io::Error) -> Self {
        Self::IoError(e.to_string())
    }
}

// ============================================================================
// CLOSE SIGNAL
// ============================================================================

/// One-way latch shared by a handle and every operation waiting on it
///
/// Closing wakes all pending `closed()` futures, which is how a close from one
/// task interrupts an accept, connect or read parked in another.
#[derive(Debug)]
pub struct CloseSignal {
    tx: watch::Sender<bool>,
}

impl Default for CloseSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl CloseSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    /// Latch the signal. Returns true only for the call that closed it.
    pub fn close(&self) -> bool {
        !self.tx.send_replace(true)
    }

    pub fn is_closed(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once the signal is latched
    pub async fn closed(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as `self`, so this cannot observe a dropped channel
        let _ = rx.wait_for(|closed| *closed).await;
    }
}

// ============================================================================
// RADIO TRAITS
// ============================================================================

/// Bidirectional byte channel supplied by the platform radio stack
///
/// Reads and writes may run concurrently from different tasks. `close` may be
/// called from anywhere and makes every pending or later operation fail with
/// [`RadioError::Closed`].
#[async_trait]
pub trait RadioStream: Send + Sync + 'static {
    /// Remote end of this stream
    fn peer(&self) -> &PeerId;

    /// Resolve the service record on the peer and establish the link.
    /// Streams produced by an accept are already connected.
    async fn connect(&self) -> Result<(), RadioError>;

    /// Read into `buf`. `Ok(0)` means the peer closed its end.
    async fn read(&self, buf: &mut [u8]) -> Result<usize, RadioError>;

    /// Write the whole buffer
    async fn write_all(&self, bytes: &[u8]) -> Result<(), RadioError>;

    fn close(&self);

    fn is_closed(&self) -> bool;
}

/// Server-side binding advertising one service record
#[async_trait]
pub trait ServerBinding: Send + Sync + 'static {
    type Stream: RadioStream;

    /// Wait, without timeout, for the next inbound connection
    async fn accept(&self) -> Result<Self::Stream, RadioError>;

    /// Stop advertising; a pending accept fails with [`RadioError::Closed`]
    fn close(&self);

    fn is_closed(&self) -> bool;
}

/// Entry point to a platform radio stack
pub trait RadioAdapter: Send + Sync + 'static {
    type Stream: RadioStream;
    type Binding: ServerBinding<Stream = Self::Stream>;

    /// Open a server-side binding advertising `service` under `name`
    fn listen(&self, name: &str, service: ServiceId) -> Result<Self::Binding, RadioError>;

    /// Create an unconnected client stream targeting `service` on `peer`
    fn open_client(&self, peer: &PeerId, service: ServiceId) -> Result<Self::Stream, RadioError>;

    /// Stop any device discovery scan; discovery and connect must not overlap
    fn cancel_discovery(&self);
}
