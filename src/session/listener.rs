// Listener Role
// Advertises the service record and waits, without timeout, for one inbound peer

use crate::radio::{RadioAdapter, RadioError, ServerBinding, ServiceId};
use std::sync::Arc;
use tokio::task::JoinHandle;

/// An in-progress listen: one binding and the task accepting on it
pub struct ListenerRole<B: ServerBinding> {
    generation: u64,
    service: ServiceId,
    binding: Arc<B>,
    task: JoinHandle<()>,
}

impl<B: ServerBinding> ListenerRole<B> {
    /// Open the binding and spawn its accept task.
    ///
    /// `on_accept` runs on the accept task with the single outcome of the
    /// wait: a live stream, or the error that ended it. Closing the binding
    /// through [`cancel`](Self::cancel) produces [`RadioError::Closed`].
    pub fn start<R, F>(
        radio: &R,
        name: &str,
        service: ServiceId,
        generation: u64,
        on_accept: F,
    ) -> Result<Self, RadioError>
    where
        R: RadioAdapter<Binding = B>,
        F: FnOnce(Result<B::Stream, RadioError>) + Send + 'static,
    {
        let binding = Arc::new(radio.listen(name, service)?);
        tracing::debug!(service = %service, name, generation, "Listener binding opened");

        let accepting = Arc::clone(&binding);
        let task = tokio::spawn(async move {
            let outcome = accepting.accept().await;
            match &outcome {
                Ok(_) => tracing::debug!(generation, "Listener accepted a connection"),
                Err(e) => tracing::debug!(generation, error = %e, "Listener stopped waiting"),
            }
            on_accept(outcome);
        });

        Ok(Self {
            generation,
            service,
            binding,
            task,
        })
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn service(&self) -> ServiceId {
        self.service
    }

    /// Check if the binding is still advertising
    pub fn is_active(&self) -> bool {
        !self.binding.is_closed()
    }

    /// Check if the accept task has run to completion
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Close the binding; a pending accept fails instead of hanging
    pub fn cancel(&self) {
        if !self.binding.is_closed() {
            tracing::debug!(generation = self.generation, "Cancelling listener");
        }
        self.binding.close();
    }
}
