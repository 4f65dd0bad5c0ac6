// TCP Loopback Radio
// Runs the radio abstraction over TCP so two processes can rendezvous without radio hardware
//
// The service record lookup becomes a one-round handshake: the client sends the
// 16-byte service id, the server answers a single status byte.

use crate::radio::{
    CloseSignal, PeerId, RadioAdapter, RadioError, RadioStream, ServerBinding, ServiceId,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio::time::{timeout, Duration};

const SERVICE_ACCEPTED: u8 = 0x01;
const SERVICE_UNKNOWN: u8 = 0x00;

/// Seconds either side waits for the service handshake unless configured otherwise
pub const DEFAULT_HANDSHAKE_TIMEOUT_SECS: u64 = 10;

// ============================================================================
// TCP RADIO CONFIG
// ============================================================================

/// Configuration for the TCP loopback radio
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TcpRadioConfig {
    /// Address to bind service bindings to
    pub bind_address: String,
    /// Port to bind to (0 for random)
    pub bind_port: u16,
    /// Enable TCP_NODELAY on every link
    pub nodelay: bool,
    /// Bound on the service handshake, on both the accepting and the dialing side
    pub handshake_timeout_secs: u64,
}

impl Default for TcpRadioConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1".to_string(),
            bind_port: 0,
            nodelay: true,
            handshake_timeout_secs: DEFAULT_HANDSHAKE_TIMEOUT_SECS,
        }
    }
}

impl TcpRadioConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bind_address(mut self, addr: &str) -> Self {
        self.bind_address = addr.to_string();
        self
    }

    pub fn with_bind_port(mut self, port: u16) -> Self {
        self.bind_port = port;
        self
    }

    pub fn with_nodelay(mut self, nodelay: bool) -> Self {
        self.nodelay = nodelay;
        self
    }

    pub fn with_handshake_timeout(mut self, secs: u64) -> Self {
        self.handshake_timeout_secs = secs;
        self
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }

    /// Resolve the bind address
    pub fn bind_socket_addr(&self) -> Result<SocketAddr, RadioError> {
        let raw = format!("{}:{}", self.bind_address, self.bind_port);
        raw.parse()
            .map_err(|_| RadioError::TransportOpen(format!("invalid bind address {}", raw)))
    }
}

// ============================================================================
// TCP RADIO
// ============================================================================

/// Radio adapter whose peers are `host:port` socket addresses
pub struct TcpRadio {
    config: TcpRadioConfig,
}

impl TcpRadio {
    pub fn new(config: TcpRadioConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TcpRadioConfig {
        &self.config
    }
}

impl RadioAdapter for TcpRadio {
    type Stream = TcpRadioStream;
    type Binding = TcpBinding;

    fn listen(&self, name: &str, service: ServiceId) -> Result<TcpBinding, RadioError> {
        let addr = self.config.bind_socket_addr()?;
        let open_error = |e: std::io::Error| RadioError::TransportOpen(format!("{}: {}", addr, e));

        let std_listener = std::net::TcpListener::bind(addr).map_err(open_error)?;
        std_listener.set_nonblocking(true).map_err(open_error)?;
        let listener = TcpListener::from_std(std_listener).map_err(open_error)?;
        let local_addr = listener.local_addr().map_err(open_error)?;

        tracing::debug!(addr = %local_addr, service = %service, name, "Advertising service over TCP");

        Ok(TcpBinding {
            listener: Mutex::new(Some(listener)),
            local_addr,
            service,
            nodelay: self.config.nodelay,
            handshake_timeout: self.config.handshake_timeout(),
            closed: CloseSignal::new(),
        })
    }

    fn open_client(&self, peer: &PeerId, service: ServiceId) -> Result<TcpRadioStream, RadioError> {
        let target: SocketAddr = peer.as_str().parse().map_err(|_| {
            RadioError::InvalidPeer(format!("{} is not a socket address", peer))
        })?;

        Ok(TcpRadioStream::new(
            peer.clone(),
            target,
            service,
            self.config.nodelay,
            self.config.handshake_timeout(),
        ))
    }

    fn cancel_discovery(&self) {
        tracing::trace!("TCP radio has no discovery scan to cancel");
    }
}

// ============================================================================
// TCP BINDING
// ============================================================================

/// Listening socket advertising one service id
pub struct TcpBinding {
    listener: Mutex<Option<TcpListener>>,
    local_addr: SocketAddr,
    service: ServiceId,
    nodelay: bool,
    handshake_timeout: Duration,
    closed: CloseSignal,
}

impl TcpBinding {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Peer identifier a client should target to reach this binding
    pub fn peer_id(&self) -> Result<PeerId, RadioError> {
        PeerId::new(&self.local_addr.to_string())
    }
}

#[async_trait]
impl ServerBinding for TcpBinding {
    type Stream = TcpRadioStream;

    async fn accept(&self) -> Result<TcpRadioStream, RadioError> {
        loop {
            if self.closed.is_closed() {
                return Err(RadioError::Closed);
            }

            let mut guard = tokio::select! {
                guard = self.listener.lock() => guard,
                _ = self.closed.closed() => return Err(RadioError::Closed),
            };

            let accepted = {
                let listener = match guard.as_ref() {
                    Some(listener) => listener,
                    None => return Err(RadioError::Closed),
                };
                tokio::select! {
                    _ = self.closed.closed() => None,
                    result = listener.accept() => Some(result),
                }
            };

            let (mut stream, addr) = match accepted {
                None => {
                    // Release the port right away instead of when the binding drops
                    guard.take();
                    return Err(RadioError::Closed);
                }
                Some(Ok(pair)) => pair,
                Some(Err(e)) => return Err(RadioError::AcceptFailed(e.to_string())),
            };

            if self.nodelay {
                if let Err(e) = stream.set_nodelay(true) {
                    tracing::warn!(addr = %addr, error = %e, "Failed to set TCP_NODELAY");
                }
            }

            // A client that never sends its service id must not park the binding
            let mut requested = [0u8; 16];
            let handshake = tokio::select! {
                _ = self.closed.closed() => None,
                result = timeout(self.handshake_timeout, stream.read_exact(&mut requested)) => Some(result),
            };
            match handshake {
                None => {
                    guard.take();
                    return Err(RadioError::Closed);
                }
                Some(Err(_)) => {
                    tracing::debug!(addr = %addr, timeout = ?self.handshake_timeout, "Dropping inbound link: handshake timed out");
                    continue;
                }
                Some(Ok(Err(e))) => {
                    tracing::debug!(addr = %addr, error = %e, "Dropping inbound link: handshake failed");
                    continue;
                }
                Some(Ok(Ok(_))) => {}
            }

            let requested = ServiceId::from_bytes(requested);
            if requested != self.service {
                tracing::debug!(addr = %addr, service = %requested, "Rejecting inbound link for unknown service");
                let _ = stream.write_all(&[SERVICE_UNKNOWN]).await;
                continue;
            }
            if let Err(e) = stream.write_all(&[SERVICE_ACCEPTED]).await {
                tracing::debug!(addr = %addr, error = %e, "Dropping inbound link: handshake reply failed");
                continue;
            }

            let peer = PeerId::new(&addr.to_string())?;
            return Ok(TcpRadioStream::accepted(
                stream,
                peer,
                addr,
                self.service,
                self.nodelay,
                self.handshake_timeout,
            ));
        }
    }

    fn close(&self) {
        if self.closed.close() {
            if let Ok(mut listener) = self.listener.try_lock() {
                listener.take();
            }
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.is_closed()
    }
}

// ============================================================================
// TCP RADIO STREAM
// ============================================================================

/// A TCP link standing in for a radio stream
pub struct TcpRadioStream {
    peer: PeerId,
    target: SocketAddr,
    service: ServiceId,
    nodelay: bool,
    handshake_timeout: Duration,
    reader: Mutex<Option<OwnedReadHalf>>,
    writer: Mutex<Option<OwnedWriteHalf>>,
    connected: AtomicBool,
    closed: CloseSignal,
}

impl TcpRadioStream {
    fn new(
        peer: PeerId,
        target: SocketAddr,
        service: ServiceId,
        nodelay: bool,
        handshake_timeout: Duration,
    ) -> Self {
        Self {
            peer,
            target,
            service,
            nodelay,
            handshake_timeout,
            reader: Mutex::new(None),
            writer: Mutex::new(None),
            connected: AtomicBool::new(false),
            closed: CloseSignal::new(),
        }
    }

    fn accepted(
        stream: TcpStream,
        peer: PeerId,
        target: SocketAddr,
        service: ServiceId,
        nodelay: bool,
        handshake_timeout: Duration,
    ) -> Self {
        let (read_half, write_half) = stream.into_split();
        Self {
            peer,
            target,
            service,
            nodelay,
            handshake_timeout,
            reader: Mutex::new(Some(read_half)),
            writer: Mutex::new(Some(write_half)),
            connected: AtomicBool::new(true),
            closed: CloseSignal::new(),
        }
    }

    pub fn target(&self) -> SocketAddr {
        self.target
    }

    pub fn service(&self) -> ServiceId {
        self.service
    }

    pub fn nodelay(&self) -> bool {
        self.nodelay
    }

    async fn dial(&self) -> Result<TcpStream, RadioError> {
        let mut stream = TcpStream::connect(self.target).await.map_err(|e| match e.kind() {
            ErrorKind::ConnectionRefused => RadioError::Refused(self.peer.clone()),
            _ => RadioError::ConnectFailed(format!("{}: {}", self.peer, e)),
        })?;

        if self.nodelay {
            stream.set_nodelay(true).ok();
        }

        let link_error = |e: std::io::Error| RadioError::ConnectFailed(format!("{}: {}", self.peer, e));
        let mut status = [0u8; 1];
        let handshake = async {
            stream.write_all(&self.service.to_bytes()).await?;
            stream.read_exact(&mut status).await
        };
        timeout(self.handshake_timeout, handshake)
            .await
            .map_err(|_| {
                RadioError::ConnectFailed(format!("{}: service handshake timed out", self.peer))
            })?
            .map_err(link_error)?;

        if status[0] != SERVICE_ACCEPTED {
            return Err(RadioError::ServiceNotFound {
                peer: self.peer.clone(),
                service: self.service,
            });
        }

        Ok(stream)
    }
}

#[async_trait]
impl RadioStream for TcpRadioStream {
    fn peer(&self) -> &PeerId {
        &self.peer
    }

    async fn connect(&self) -> Result<(), RadioError> {
        if self.closed.is_closed() {
            return Err(RadioError::Closed);
        }
        if self.connected.load(Ordering::SeqCst) {
            return Ok(());
        }

        let stream = tokio::select! {
            _ = self.closed.closed() => return Err(RadioError::Closed),
            result = self.dial() => result?,
        };

        let (read_half, write_half) = stream.into_split();
        *self.reader.lock().await = Some(read_half);
        *self.writer.lock().await = Some(write_half);

        // A close that raced the install could not reach the halves
        if self.closed.is_closed() {
            self.reader.lock().await.take();
            self.writer.lock().await.take();
            return Err(RadioError::Closed);
        }

        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn read(&self, buf: &mut [u8]) -> Result<usize, RadioError> {
        if self.closed.is_closed() {
            return Err(RadioError::Closed);
        }

        let mut guard = tokio::select! {
            guard = self.reader.lock() => guard,
            _ = self.closed.closed() => return Err(RadioError::Closed),
        };

        let result = {
            let half = match guard.as_mut() {
                Some(half) => half,
                None if self.closed.is_closed() => return Err(RadioError::Closed),
                None => return Err(RadioError::ReadFailed("stream is not connected".to_string())),
            };
            tokio::select! {
                _ = self.closed.closed() => None,
                result = half.read(buf) => Some(result),
            }
        };

        match result {
            None => {
                guard.take();
                Err(RadioError::Closed)
            }
            Some(Ok(n)) => Ok(n),
            Some(Err(e)) => Err(RadioError::ReadFailed(e.to_string())),
        }
    }

    async fn write_all(&self, bytes: &[u8]) -> Result<(), RadioError> {
        if self.closed.is_closed() {
            return Err(RadioError::Closed);
        }

        let mut guard = tokio::select! {
            guard = self.writer.lock() => guard,
            _ = self.closed.closed() => return Err(RadioError::Closed),
        };

        let result = {
            let half = match guard.as_mut() {
                Some(half) => half,
                None if self.closed.is_closed() => return Err(RadioError::Closed),
                None => return Err(RadioError::WriteFailed("stream is not connected".to_string())),
            };
            tokio::select! {
                _ = self.closed.closed() => None,
                result = half.write_all(bytes) => Some(result),
            }
        };

        match result {
            None => {
                guard.take();
                Err(RadioError::Closed)
            }
            Some(Ok(())) => Ok(()),
            Some(Err(e)) => Err(RadioError::WriteFailed(e.to_string())),
        }
    }

    fn close(&self) {
        if !self.closed.close() {
            return;
        }
        // Dropping the write half sends FIN; a busy half is dropped by its own waiter
        if let Ok(mut writer) = self.writer.try_lock() {
            writer.take();
        }
        if let Ok(mut reader) = self.reader.try_lock() {
            reader.take();
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.is_closed()
    }
}
