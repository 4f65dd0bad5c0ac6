// In-Memory Radio
// Simulated radio air shared by several devices, for running sessions without hardware

use crate::lock;
use crate::radio::{
    CloseSignal, PeerId, RadioAdapter, RadioError, RadioStream, ServerBinding, ServiceId,
};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

// ============================================================================
// STREAM ID
// ============================================================================

/// Identifier of one simulated stream, unique within a [`RadioAir`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamId(u64);

impl StreamId {
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stream#{}", self.0)
    }
}

// ============================================================================
// RADIO ACTIVITY
// ============================================================================

/// Ordered record of everything that happened on the air
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RadioActivity {
    BindingOpened {
        device: PeerId,
        service: ServiceId,
        name: String,
    },
    BindingClosed {
        device: PeerId,
        service: ServiceId,
    },
    StreamOpened {
        stream: StreamId,
        device: PeerId,
        peer: PeerId,
    },
    StreamConnected {
        stream: StreamId,
    },
    StreamClosed {
        stream: StreamId,
    },
    DiscoveryCancelled {
        device: PeerId,
    },
}

// ============================================================================
// RADIO AIR
// ============================================================================

struct Registration {
    binding: u64,
    incoming: mpsc::UnboundedSender<MemoryStream>,
}

#[derive(Default)]
struct AirState {
    services: HashMap<(PeerId, ServiceId), Registration>,
    unreachable: HashSet<PeerId>,
    activity: Vec<RadioActivity>,
    next_id: u64,
}

impl AirState {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

/// Shared medium connecting simulated devices
///
/// Cloning yields another handle to the same air.
#[derive(Clone, Default)]
pub struct RadioAir {
    state: Arc<Mutex<AirState>>,
}

impl RadioAir {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a device with the given address on this air
    pub fn device(&self, address: &str) -> Result<MemoryRadio, RadioError> {
        Ok(MemoryRadio::new(self.clone(), PeerId::new(address)?))
    }

    /// Take a device out of (or back into) range. Connects to or from an
    /// unreachable device fail.
    pub fn set_reachable(&self, device: &PeerId, reachable: bool) {
        let mut state = lock(&self.state);
        if reachable {
            state.unreachable.remove(device);
        } else {
            state.unreachable.insert(device.clone());
        }
    }

    /// Check if `device` currently advertises `service`
    pub fn is_advertising(&self, device: &PeerId, service: ServiceId) -> bool {
        lock(&self.state)
            .services
            .contains_key(&(device.clone(), service))
    }

    /// Snapshot of the activity log, oldest first
    pub fn activity(&self) -> Vec<RadioActivity> {
        lock(&self.state).activity.clone()
    }

    /// Build an already connected stream pair between `a` and `b`.
    /// The first stream is `a`'s end.
    pub fn pair(&self, a: &PeerId, b: &PeerId, service: ServiceId) -> (MemoryStream, MemoryStream) {
        let (a_tx, b_rx) = mpsc::unbounded_channel();
        let (b_tx, a_rx) = mpsc::unbounded_channel();

        let a_end = MemoryStream::linked(self.clone(), a.clone(), b.clone(), service, a_rx, a_tx);
        let b_end = MemoryStream::linked(self.clone(), b.clone(), a.clone(), service, b_rx, b_tx);
        (a_end, b_end)
    }

    fn record(&self, activity: RadioActivity) {
        lock(&self.state).activity.push(activity);
    }

    fn allocate_stream(&self, device: &PeerId, peer: &PeerId) -> StreamId {
        let mut state = lock(&self.state);
        let stream = StreamId(state.next_id());
        state.activity.push(RadioActivity::StreamOpened {
            stream,
            device: device.clone(),
            peer: peer.clone(),
        });
        stream
    }

    fn register(
        &self,
        device: &PeerId,
        service: ServiceId,
        name: &str,
        incoming: mpsc::UnboundedSender<MemoryStream>,
    ) -> Result<u64, RadioError> {
        let mut state = lock(&self.state);
        let key = (device.clone(), service);
        if state.services.contains_key(&key) {
            return Err(RadioError::TransportOpen(format!(
                "service {} is already bound on {}",
                service, device
            )));
        }

        let binding = state.next_id();
        state.services.insert(key, Registration { binding, incoming });
        state.activity.push(RadioActivity::BindingOpened {
            device: device.clone(),
            service,
            name: name.to_string(),
        });
        Ok(binding)
    }

    fn unregister(&self, device: &PeerId, service: ServiceId, binding: u64) {
        let mut state = lock(&self.state);
        let key = (device.clone(), service);
        if state.services.get(&key).map(|r| r.binding) == Some(binding) {
            state.services.remove(&key);
        }
        state.activity.push(RadioActivity::BindingClosed {
            device: device.clone(),
            service,
        });
    }

    /// Find the accept queue for `service` on `target`
    fn lookup(
        &self,
        from: &PeerId,
        target: &PeerId,
        service: ServiceId,
    ) -> Result<mpsc::UnboundedSender<MemoryStream>, RadioError> {
        let state = lock(&self.state);
        for device in [from, target] {
            if state.unreachable.contains(device) {
                return Err(RadioError::ConnectFailed(format!("{} is out of range", device)));
            }
        }

        state
            .services
            .get(&(target.clone(), service))
            .map(|r| r.incoming.clone())
            .ok_or_else(|| RadioError::ServiceNotFound {
                peer: target.clone(),
                service,
            })
    }
}

// ============================================================================
// MEMORY STREAM
// ============================================================================

struct ReadHalf {
    rx: Option<mpsc::UnboundedReceiver<Vec<u8>>>,
    pending: Vec<u8>,
}

/// One end of a simulated stream
pub struct MemoryStream {
    id: StreamId,
    local: PeerId,
    peer: PeerId,
    service: ServiceId,
    air: RadioAir,
    reader: tokio::sync::Mutex<ReadHalf>,
    writer: Mutex<Option<mpsc::UnboundedSender<Vec<u8>>>>,
    connected: AtomicBool,
    closed: CloseSignal,
}

impl MemoryStream {
    fn unconnected(air: RadioAir, local: PeerId, peer: PeerId, service: ServiceId) -> Self {
        let id = air.allocate_stream(&local, &peer);
        Self {
            id,
            local,
            peer,
            service,
            air,
            reader: tokio::sync::Mutex::new(ReadHalf {
                rx: None,
                pending: Vec::new(),
            }),
            writer: Mutex::new(None),
            connected: AtomicBool::new(false),
            closed: CloseSignal::new(),
        }
    }

    fn linked(
        air: RadioAir,
        local: PeerId,
        peer: PeerId,
        service: ServiceId,
        rx: mpsc::UnboundedReceiver<Vec<u8>>,
        tx: mpsc::UnboundedSender<Vec<u8>>,
    ) -> Self {
        let mut stream = Self::unconnected(air, local, peer, service);
        stream.reader.get_mut().rx = Some(rx);
        *lock(&stream.writer) = Some(tx);
        stream.mark_connected();
        stream
    }

    fn mark_connected(&self) {
        self.connected.store(true, Ordering::SeqCst);
        self.air.record(RadioActivity::StreamConnected { stream: self.id });
    }

    pub fn id(&self) -> StreamId {
        self.id
    }

    /// Device owning this end
    pub fn local(&self) -> &PeerId {
        &self.local
    }

    pub fn service(&self) -> ServiceId {
        self.service
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

fn drain_into(pending: &mut Vec<u8>, buf: &mut [u8]) -> usize {
    let n = pending.len().min(buf.len());
    buf[..n].copy_from_slice(&pending[..n]);
    pending.drain(..n);
    n
}

#[async_trait]
impl RadioStream for MemoryStream {
    fn peer(&self) -> &PeerId {
        &self.peer
    }

    async fn connect(&self) -> Result<(), RadioError> {
        if self.closed.is_closed() {
            return Err(RadioError::Closed);
        }
        if self.is_connected() {
            return Ok(());
        }

        let incoming = self.air.lookup(&self.local, &self.peer, self.service)?;

        let (client_tx, server_rx) = mpsc::unbounded_channel();
        let (server_tx, client_rx) = mpsc::unbounded_channel();

        // Our half goes in first so the server never writes into a stream we cannot read
        {
            let mut half = tokio::select! {
                half = self.reader.lock() => half,
                _ = self.closed.closed() => return Err(RadioError::Closed),
            };
            half.rx = Some(client_rx);
        }
        {
            let mut writer = lock(&self.writer);
            if self.closed.is_closed() {
                return Err(RadioError::Closed);
            }
            *writer = Some(client_tx);
        }

        let server = MemoryStream::linked(
            self.air.clone(),
            self.peer.clone(),
            self.local.clone(),
            self.service,
            server_rx,
            server_tx,
        );
        if incoming.send(server).is_err() {
            return Err(RadioError::ServiceNotFound {
                peer: self.peer.clone(),
                service: self.service,
            });
        }

        self.mark_connected();
        Ok(())
    }

    async fn read(&self, buf: &mut [u8]) -> Result<usize, RadioError> {
        if self.closed.is_closed() {
            return Err(RadioError::Closed);
        }

        let mut guard = tokio::select! {
            half = self.reader.lock() => half,
            _ = self.closed.closed() => return Err(RadioError::Closed),
        };
        let half = &mut *guard;

        if !half.pending.is_empty() {
            return Ok(drain_into(&mut half.pending, buf));
        }

        let rx = match half.rx.as_mut() {
            Some(rx) => rx,
            None => return Err(RadioError::ReadFailed("stream is not connected".to_string())),
        };

        let received = tokio::select! {
            _ = self.closed.closed() => None,
            chunk = rx.recv() => Some(chunk),
        };

        match received {
            None => {
                rx.close();
                Err(RadioError::Closed)
            }
            // Sender dropped: the peer closed its end
            Some(None) => Ok(0),
            Some(Some(chunk)) => {
                let n = chunk.len().min(buf.len());
                buf[..n].copy_from_slice(&chunk[..n]);
                half.pending.extend_from_slice(&chunk[n..]);
                Ok(n)
            }
        }
    }

    async fn write_all(&self, bytes: &[u8]) -> Result<(), RadioError> {
        if self.closed.is_closed() {
            return Err(RadioError::Closed);
        }
        // An empty chunk would read as end of stream on the other side
        if bytes.is_empty() {
            return Ok(());
        }

        let writer = lock(&self.writer);
        match writer.as_ref() {
            Some(tx) => tx
                .send(bytes.to_vec())
                .map_err(|_| RadioError::WriteFailed(format!("{} closed the stream", self.peer))),
            None => Err(RadioError::WriteFailed("stream is not connected".to_string())),
        }
    }

    fn close(&self) {
        if !self.closed.close() {
            return;
        }

        lock(&self.writer).take();
        if let Ok(mut half) = self.reader.try_lock() {
            if let Some(rx) = half.rx.as_mut() {
                rx.close();
            }
        }
        self.air.record(RadioActivity::StreamClosed { stream: self.id });
    }

    fn is_closed(&self) -> bool {
        self.closed.is_closed()
    }
}

impl Drop for MemoryStream {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for MemoryStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryStream")
            .field("id", &self.id)
            .field("local", &self.local)
            .field("peer", &self.peer)
            .field("connected", &self.is_connected())
            .field("closed", &self.is_closed())
            .finish()
    }
}

// ============================================================================
// MEMORY BINDING
// ============================================================================

/// Server-side binding on the simulated air
pub struct MemoryBinding {
    binding: u64,
    device: PeerId,
    service: ServiceId,
    air: RadioAir,
    incoming: tokio::sync::Mutex<mpsc::UnboundedReceiver<MemoryStream>>,
    closed: CloseSignal,
}

impl MemoryBinding {
    pub fn device(&self) -> &PeerId {
        &self.device
    }

    pub fn service(&self) -> ServiceId {
        self.service
    }
}

#[async_trait]
impl ServerBinding for MemoryBinding {
    type Stream = MemoryStream;

    async fn accept(&self) -> Result<MemoryStream, RadioError> {
        if self.closed.is_closed() {
            return Err(RadioError::Closed);
        }

        let mut incoming = tokio::select! {
            rx = self.incoming.lock() => rx,
            _ = self.closed.closed() => return Err(RadioError::Closed),
        };

        let next = tokio::select! {
            _ = self.closed.closed() => None,
            stream = incoming.recv() => Some(stream),
        };

        match next {
            Some(Some(stream)) => Ok(stream),
            Some(None) if !self.closed.is_closed() => Err(RadioError::AcceptFailed(
                "service registration disappeared".to_string(),
            )),
            _ => Err(RadioError::Closed),
        }
    }

    fn close(&self) {
        if self.closed.close() {
            self.air.unregister(&self.device, self.service, self.binding);
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.is_closed()
    }
}

impl Drop for MemoryBinding {
    fn drop(&mut self) {
        self.close();
    }
}

// ============================================================================
// MEMORY RADIO
// ============================================================================

/// A simulated device on a [`RadioAir`]
pub struct MemoryRadio {
    air: RadioAir,
    address: PeerId,
    discovering: AtomicBool,
}

impl MemoryRadio {
    pub fn new(air: RadioAir, address: PeerId) -> Self {
        Self {
            air,
            address,
            discovering: AtomicBool::new(false),
        }
    }

    pub fn address(&self) -> &PeerId {
        &self.address
    }

    pub fn air(&self) -> &RadioAir {
        &self.air
    }

    /// Begin a (simulated) discovery scan
    pub fn start_discovery(&self) {
        self.discovering.store(true, Ordering::SeqCst);
    }

    pub fn is_discovering(&self) -> bool {
        self.discovering.load(Ordering::SeqCst)
    }
}

impl RadioAdapter for MemoryRadio {
    type Stream = MemoryStream;
    type Binding = MemoryBinding;

    fn listen(&self, name: &str, service: ServiceId) -> Result<MemoryBinding, RadioError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let binding = self.air.register(&self.address, service, name, tx)?;

        Ok(MemoryBinding {
            binding,
            device: self.address.clone(),
            service,
            air: self.air.clone(),
            incoming: tokio::sync::Mutex::new(rx),
            closed: CloseSignal::new(),
        })
    }

    fn open_client(&self, peer: &PeerId, service: ServiceId) -> Result<MemoryStream, RadioError> {
        Ok(MemoryStream::unconnected(
            self.air.clone(),
            self.address.clone(),
            peer.clone(),
            service,
        ))
    }

    fn cancel_discovery(&self) {
        self.discovering.store(false, Ordering::SeqCst);
        self.air.record(RadioActivity::DiscoveryCancelled {
            device: self.address.clone(),
        });
    }
}
