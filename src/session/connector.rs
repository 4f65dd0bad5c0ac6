// Connector Role
// One outbound attempt against a peer's service record; succeeds or fails, never retries

use crate::radio::{PeerId, RadioAdapter, RadioError, RadioStream, ServiceId};
use std::sync::Arc;
use tokio::task::JoinHandle;

/// An in-progress outbound attempt
pub struct ConnectorRole<S: RadioStream> {
    generation: u64,
    peer: PeerId,
    service: ServiceId,
    stream: Arc<S>,
    task: JoinHandle<()>,
}

impl<S: RadioStream> ConnectorRole<S> {
    /// Create the client stream and spawn the connect task.
    ///
    /// The stream is opened before this returns, so an attempt started after
    /// cancelling a previous one can never open its stream first. A failed
    /// connect closes the stream before `on_complete` sees the error.
    pub fn start<R, F>(
        radio: &Arc<R>,
        peer: PeerId,
        service: ServiceId,
        generation: u64,
        cancel_discovery: bool,
        on_complete: F,
    ) -> Result<Self, RadioError>
    where
        R: RadioAdapter<Stream = S>,
        F: FnOnce(Result<Arc<S>, RadioError>) + Send + 'static,
    {
        let stream = Arc::new(radio.open_client(&peer, service)?);
        tracing::debug!(peer = %peer, service = %service, generation, "Client stream opened");

        let radio = Arc::clone(radio);
        let attempt = Arc::clone(&stream);
        let task = tokio::spawn(async move {
            if cancel_discovery {
                radio.cancel_discovery();
            }

            match attempt.connect().await {
                Ok(()) => on_complete(Ok(attempt)),
                Err(e) => {
                    attempt.close();
                    on_complete(Err(e));
                }
            }
        });

        Ok(Self {
            generation,
            peer,
            service,
            stream,
            task,
        })
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn peer(&self) -> &PeerId {
        &self.peer
    }

    pub fn service(&self) -> ServiceId {
        self.service
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Close this attempt's stream. Safe to call at any time, more than once.
    pub fn cancel(&self) {
        if !self.stream.is_closed() {
            tracing::debug!(peer = %self.peer, generation = self.generation, "Closing client stream");
        }
        self.stream.close();
    }
}
