// Pump
// Owns a live stream: drains inbound bytes to the event stream and serves writes

use crate::radio::{PeerId, RadioError, RadioStream};
use crate::session::{ConnectionId, ConnectionInfo, DisconnectReason, Role, SessionError, SessionEvent};
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Moves bytes in both directions over one promoted stream
///
/// Read and write fail independently: a failed write is reported and the read
/// loop keeps going, a failed read ends the connection.
pub struct Pump<S: RadioStream> {
    id: ConnectionId,
    peer: PeerId,
    role: Role,
    connected_at: DateTime<Utc>,
    stream: Arc<S>,
    buffer_size: usize,
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
    events: mpsc::UnboundedSender<SessionEvent>,
}

impl<S: RadioStream> Pump<S> {
    pub fn new(
        stream: Arc<S>,
        role: Role,
        buffer_size: usize,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Self {
        Self {
            id: ConnectionId::generate(),
            peer: stream.peer().clone(),
            role,
            connected_at: Utc::now(),
            stream,
            buffer_size: buffer_size.max(1),
            bytes_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            events,
        }
    }

    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    pub fn peer(&self) -> &PeerId {
        &self.peer
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn info(&self) -> ConnectionInfo {
        ConnectionInfo {
            id: self.id.clone(),
            peer: self.peer.clone(),
            role: self.role,
            connected_at: self.connected_at,
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
        }
    }

    /// Spawn the read loop.
    ///
    /// When the loop ends, `on_exit` runs first and then
    /// [`SessionEvent::Disconnected`] is emitted, so an application reacting
    /// to the event already sees the connection gone.
    pub fn spawn_read_loop<F>(self: &Arc<Self>, on_exit: F) -> JoinHandle<DisconnectReason>
    where
        F: FnOnce(&DisconnectReason) + Send + 'static,
    {
        let pump = Arc::clone(self);
        tokio::spawn(async move {
            let reason = pump.read_loop().await;
            match &reason {
                DisconnectReason::ReadFailed(e) => {
                    tracing::warn!(peer = %pump.peer, connection = %pump.id, error = %e, "Read loop failed")
                }
                other => {
                    tracing::info!(peer = %pump.peer, connection = %pump.id, reason = %other, "Read loop ended")
                }
            }

            on_exit(&reason);
            let _ = pump.events.send(SessionEvent::Disconnected {
                connection_id: pump.id.clone(),
                peer: pump.peer.clone(),
                reason: reason.clone(),
            });
            reason
        })
    }

    async fn read_loop(&self) -> DisconnectReason {
        let mut buf = vec![0u8; self.buffer_size];
        loop {
            match self.stream.read(&mut buf).await {
                Ok(0) => return DisconnectReason::EndOfStream,
                Ok(n) => {
                    self.bytes_received.fetch_add(n as u64, Ordering::Relaxed);
                    let data = buf[..n].to_vec();
                    let text = String::from_utf8_lossy(&data).into_owned();
                    tracing::debug!(peer = %self.peer, bytes = n, "Received chunk");

                    let _ = self.events.send(SessionEvent::DataReceived {
                        connection_id: self.id.clone(),
                        peer: self.peer.clone(),
                        data,
                        text,
                    });
                }
                Err(RadioError::Closed) => return DisconnectReason::Cancelled,
                Err(e) => return DisconnectReason::ReadFailed(e),
            }
        }
    }

    /// Write the whole buffer to the peer
    pub async fn write(&self, bytes: &[u8]) -> Result<usize, SessionError> {
        tracing::debug!(peer = %self.peer, bytes = bytes.len(), "Writing to stream");

        match self.stream.write_all(bytes).await {
            Ok(()) => {
                self.bytes_sent
                    .fetch_add(bytes.len() as u64, Ordering::Relaxed);
                Ok(bytes.len())
            }
            Err(e) => {
                tracing::warn!(peer = %self.peer, error = %e, "Error writing to stream");
                let _ = self.events.send(SessionEvent::WriteFailed {
                    connection_id: self.id.clone(),
                    error: e.clone(),
                });
                Err(SessionError::Radio(e))
            }
        }
    }

    /// Close the stream; reads and writes in both directions then fail
    pub fn cancel(&self) {
        self.stream.close();
    }

    pub fn is_closed(&self) -> bool {
        self.stream.is_closed()
    }
}
