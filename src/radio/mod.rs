// Radio module - THE AIR (abstract)
// Platform radio stack abstraction plus in-memory and TCP loopback backends

mod memory;
mod tcp;
mod traits;

pub use traits::{
    // Core traits
    RadioAdapter, RadioStream, ServerBinding,
    // Identifiers
    PeerId, ServiceId,
    INSECURE_SERVICE_ID, SECURE_SERVICE_ID, SERVICE_NAME,
    // Errors and cancellation
    CloseSignal, RadioError,
};

pub use memory::{MemoryBinding, MemoryRadio, MemoryStream, RadioActivity, RadioAir, StreamId};

pub use tcp::{
    TcpBinding, TcpRadio, TcpRadioConfig, TcpRadioStream, DEFAULT_HANDSHAKE_TIMEOUT_SECS,
};
