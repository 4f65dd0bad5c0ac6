// Connection Manager
// Owns role lifecycle and the single promotion point from raw stream to pump
//
// All state sits behind one mutex that is never held across an await. Role
// tasks keep only a weak handle plus the generation of the handle they were
// started for, so a report from a replaced or cancelled role is recognized
// as stale and its stream is closed rather than promoted.

use crate::lock;
use crate::radio::{PeerId, RadioAdapter, RadioError, RadioStream, ServiceId};
use crate::session::{
    ConnectionInfo, ConnectionPhase, ConnectorRole, ListenerRole, Pump, Role, SessionConfig,
    SessionError, SessionEvent, SessionEvents,
};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

// ============================================================================
// MANAGER STATE
// ============================================================================

struct ManagerState<R: RadioAdapter> {
    next_generation: u64,
    listener: Option<ListenerRole<R::Binding>>,
    connector: Option<ConnectorRole<R::Stream>>,
    pump: Option<Arc<Pump<R::Stream>>>,
}

impl<R: RadioAdapter> ManagerState<R> {
    fn new() -> Self {
        Self {
            next_generation: 0,
            listener: None,
            connector: None,
            pump: None,
        }
    }

    fn next_generation(&mut self) -> u64 {
        self.next_generation += 1;
        self.next_generation
    }

    fn phase(&self) -> ConnectionPhase {
        if self.pump.is_some() {
            ConnectionPhase::Connected
        } else if self.connector.is_some() {
            ConnectionPhase::Connecting
        } else if self.listener.is_some() {
            ConnectionPhase::Listening
        } else {
            ConnectionPhase::Idle
        }
    }

    fn already_connected(&self) -> Result<(), SessionError> {
        match &self.pump {
            Some(pump) => Err(SessionError::AlreadyConnected(pump.peer().clone())),
            None => Ok(()),
        }
    }

    /// Remove the handle of a role that has finished, if it is still the
    /// current one. A listener's binding is closed with it; a connector's
    /// stream is left open because it is either being promoted or already
    /// closed by the connector itself.
    fn release(&mut self, role: Role, generation: u64) -> bool {
        match role {
            Role::Listener => match self.listener.take() {
                Some(listener) if listener.generation() == generation => {
                    listener.cancel();
                    true
                }
                other => {
                    self.listener = other;
                    false
                }
            },
            Role::Connector => match self.connector.take() {
                Some(connector) if connector.generation() == generation => true,
                other => {
                    self.connector = other;
                    false
                }
            },
        }
    }

    /// Cancel every outstanding role attempt. Returns whether a listener
    /// was among them.
    fn retire_roles(&mut self) -> bool {
        if let Some(connector) = self.connector.take() {
            connector.cancel();
        }
        match self.listener.take() {
            Some(listener) => {
                listener.cancel();
                true
            }
            None => false,
        }
    }
}

// ============================================================================
// SHARED CORE
// ============================================================================

struct Shared<R: RadioAdapter> {
    radio: Arc<R>,
    config: SessionConfig,
    events: mpsc::UnboundedSender<SessionEvent>,
    state: Mutex<ManagerState<R>>,
}

impl<R: RadioAdapter> Shared<R> {
    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    fn retire_roles(&self, state: &mut ManagerState<R>) {
        if state.retire_roles() {
            self.emit(SessionEvent::ListenerStopped);
        }
    }

    fn ensure_listener(self: &Arc<Self>, state: &mut ManagerState<R>) -> Result<(), SessionError> {
        if state.listener.as_ref().is_some_and(|l| l.is_active()) {
            return Ok(());
        }
        if let Some(stale) = state.listener.take() {
            stale.cancel();
        }

        let generation = state.next_generation();
        let weak = Arc::downgrade(self);
        let listener = ListenerRole::start(
            self.radio.as_ref(),
            &self.config.service_name,
            self.config.service_id,
            generation,
            move |outcome| match weak.upgrade() {
                Some(shared) => shared.on_accept_complete(generation, outcome),
                None => {
                    if let Ok(stream) = outcome {
                        stream.close();
                    }
                }
            },
        )?;

        tracing::info!(service = %self.config.service_id, name = %self.config.service_name, "Listening for inbound connection");
        self.emit(SessionEvent::Listening {
            service: self.config.service_id,
        });
        state.listener = Some(listener);
        Ok(())
    }

    fn on_accept_complete(self: &Arc<Self>, generation: u64, outcome: Result<R::Stream, RadioError>) {
        match outcome {
            Ok(stream) => {
                self.promote(Arc::new(stream), Role::Listener, Some(generation));
            }
            Err(error) => {
                let current = lock(&self.state).release(Role::Listener, generation);
                if !current {
                    return;
                }
                if error.is_closed() {
                    self.emit(SessionEvent::ListenerStopped);
                } else {
                    tracing::warn!(error = %error, "Listener failed while waiting for a peer");
                    self.emit(SessionEvent::AcceptFailed { error });
                }
            }
        }
    }

    fn on_connect_complete(
        self: &Arc<Self>,
        generation: u64,
        peer: PeerId,
        outcome: Result<Arc<R::Stream>, RadioError>,
    ) {
        match outcome {
            Ok(stream) => {
                self.promote(stream, Role::Connector, Some(generation));
            }
            Err(error) => {
                let current = lock(&self.state).release(Role::Connector, generation);
                if current {
                    tracing::warn!(peer = %peer, error = %error, "Could not connect");
                    self.emit(SessionEvent::ConnectFailed { peer, error });
                } else {
                    tracing::debug!(peer = %peer, error = %error, "Superseded connect attempt ended");
                }
            }
        }
    }

    /// Promote `stream` into the session's pump unless a connection already
    /// exists or the reporting role has been superseded. `origin` is the
    /// generation of the role handle that produced the stream; `None` marks a
    /// stream handed in from outside.
    fn promote(self: &Arc<Self>, stream: Arc<R::Stream>, role: Role, origin: Option<u64>) -> bool {
        let peer = stream.peer().clone();
        let mut state = lock(&self.state);

        let current = match origin {
            Some(generation) => state.release(role, generation),
            None => true,
        };

        if !current || state.pump.is_some() {
            drop(state);
            stream.close();
            tracing::info!(peer = %peer, role = %role, "Discarding stray connection");
            self.emit(SessionEvent::StrayConnectionDiscarded { peer, role });
            return false;
        }

        // The sibling role lost the race. A winning listener was already
        // released above, so it is reported here the same way.
        let listener_won = role == Role::Listener && origin.is_some();
        if state.retire_roles() || listener_won {
            self.emit(SessionEvent::ListenerStopped);
        }

        let pump = Arc::new(Pump::new(
            stream,
            role,
            self.config.read_buffer_size,
            self.events.clone(),
        ));
        state.pump = Some(Arc::clone(&pump));

        tracing::info!(peer = %peer, role = %role, connection = %pump.id(), "Connected");
        self.emit(SessionEvent::Connected { info: pump.info() });

        let weak = Arc::downgrade(self);
        let id = pump.id().clone();
        pump.spawn_read_loop(move |_reason| {
            if let Some(shared) = weak.upgrade() {
                let mut state = lock(&shared.state);
                if state.pump.as_ref().is_some_and(|p| *p.id() == id) {
                    state.pump = None;
                }
            }
        });

        true
    }
}

impl<R: RadioAdapter> Drop for Shared<R> {
    fn drop(&mut self) {
        let state = self
            .state
            .get_mut()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let _ = state.retire_roles();
        if let Some(pump) = state.pump.take() {
            pump.cancel();
        }
    }
}

// ============================================================================
// CONNECTION MANAGER
// ============================================================================

/// Coordinates the listener and connector roles of one single-peer session
///
/// Cloning yields another handle to the same session. Dropping the last handle
/// closes every outstanding binding and stream.
pub struct ConnectionManager<R: RadioAdapter> {
    shared: Arc<Shared<R>>,
}

impl<R: RadioAdapter> Clone for ConnectionManager<R> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<R: RadioAdapter> ConnectionManager<R> {
    /// Create a manager and the event stream it reports on
    pub fn new(radio: R, config: SessionConfig) -> Result<(Self, SessionEvents), SessionError> {
        config.validate()?;

        let (events, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            radio: Arc::new(radio),
            config,
            events,
            state: Mutex::new(ManagerState::new()),
        });

        Ok((Self { shared }, rx))
    }

    pub fn radio(&self) -> &R {
        &self.shared.radio
    }

    pub fn config(&self) -> &SessionConfig {
        &self.shared.config
    }

    pub fn phase(&self) -> ConnectionPhase {
        lock(&self.shared.state).phase()
    }

    /// Check if a listener binding is currently advertising
    pub fn is_listening(&self) -> bool {
        lock(&self.shared.state)
            .listener
            .as_ref()
            .is_some_and(|l| l.is_active())
    }

    /// Snapshot of the live connection, if any
    pub fn connection_info(&self) -> Option<ConnectionInfo> {
        lock(&self.shared.state).pump.as_ref().map(|p| p.info())
    }

    /// Make sure a listener is advertising the configured service.
    /// Does nothing if one already is.
    pub fn start_listening(&self) -> Result<(), SessionError> {
        let mut state = lock(&self.shared.state);
        state.already_connected()?;
        self.shared.ensure_listener(&mut state)
    }

    /// Start an outbound attempt to `service` on `peer`.
    ///
    /// Any previous attempt is cancelled first and a listener is ensured
    /// afterwards, so the peer can still reach us the other way. The outcome
    /// arrives as [`SessionEvent::Connected`] or [`SessionEvent::ConnectFailed`].
    pub fn start_connecting(&self, peer: PeerId, service: ServiceId) -> Result<(), SessionError> {
        let shared = &self.shared;
        let mut state = lock(&shared.state);
        state.already_connected()?;

        if let Some(previous) = state.connector.take() {
            tracing::info!(peer = %previous.peer(), "Cancelling previous connect attempt");
            previous.cancel();
        }

        shared.ensure_listener(&mut state)?;

        let generation = state.next_generation();
        let weak = Arc::downgrade(shared);
        let reported_peer = peer.clone();
        let connector = ConnectorRole::start(
            &shared.radio,
            peer.clone(),
            service,
            generation,
            shared.config.cancel_discovery,
            move |outcome| match weak.upgrade() {
                Some(shared) => shared.on_connect_complete(generation, reported_peer, outcome),
                None => {
                    if let Ok(stream) = outcome {
                        stream.close();
                    }
                }
            },
        )?;

        tracing::info!(peer = %peer, service = %service, "Connecting");
        shared.emit(SessionEvent::Connecting { peer, service });
        state.connector = Some(connector);
        Ok(())
    }

    /// Parse `peer` and connect to it on the configured service
    pub fn start_connecting_str(&self, peer: &str) -> Result<(), SessionError> {
        let peer = PeerId::new(peer)?;
        self.start_connecting(peer, self.shared.config.service_id)
    }

    /// Promote a live stream into the session's pump.
    ///
    /// The first stream wins. Any stream offered while a connection exists is
    /// closed and reported as [`SessionEvent::StrayConnectionDiscarded`].
    /// Returns whether `stream` was promoted.
    pub fn on_connected(&self, stream: Arc<R::Stream>, role: Role) -> bool {
        self.shared.promote(stream, role, None)
    }

    /// Send bytes over the live connection
    pub async fn send(&self, bytes: &[u8]) -> Result<usize, SessionError> {
        let pump = {
            let state = lock(&self.shared.state);
            state.pump.clone()
        };
        match pump {
            Some(pump) => pump.write(bytes).await,
            None => {
                tracing::debug!(bytes = bytes.len(), "Send without a connection");
                Err(SessionError::NotConnected)
            }
        }
    }

    /// Close the connection and cancel every outstanding role
    pub fn disconnect(&self) {
        let mut state = lock(&self.shared.state);
        self.shared.retire_roles(&mut state);
        if let Some(pump) = state.pump.take() {
            tracing::info!(peer = %pump.peer(), connection = %pump.id(), "Disconnecting");
            pump.cancel();
        }
    }
}
