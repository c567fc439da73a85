use std::fmt;

use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::trace;

use crate::event::Observation;

const CHUNK_SIZE: usize = 1024;

/// The receiving half of the pipeline has been dropped, so no further
/// observations can be delivered.
#[derive(Debug, PartialEq, Eq)]
pub struct ClosedError;

impl fmt::Display for ClosedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("pipeline sender is closed")
    }
}

impl std::error::Error for ClosedError {}

/// Bounded channel between the source and the sink. Senders are cheap to
/// clone; backpressure applies once the buffer is full.
#[derive(Clone, Debug)]
pub struct Pipeline {
    inner: mpsc::Sender<Observation>,
}

impl Pipeline {
    pub fn new_with_buffer(capacity: usize) -> (Self, ReceiverStream<Observation>) {
        let (tx, rx) = mpsc::channel(capacity);

        (Self { inner: tx }, ReceiverStream::new(rx))
    }

    pub fn new() -> (Self, ReceiverStream<Observation>) {
        Self::new_with_buffer(CHUNK_SIZE)
    }

    #[cfg(test)]
    pub fn new_test() -> (Self, ReceiverStream<Observation>) {
        Self::new_with_buffer(128)
    }

    pub async fn send(&mut self, observation: Observation) -> Result<(), ClosedError> {
        match self.inner.send(observation).await {
            Ok(()) => Ok(()),
            Err(_err) => {
                trace!(message = "Observation send failed");

                Err(ClosedError)
            }
        }
    }
}
