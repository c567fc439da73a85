use std::pin::{Pin, pin};
use std::task::{Context, Poll};

use futures::{Stream, StreamExt};
use tokio::signal::unix::Signal;
use tokio::sync::mpsc;
use tracing::{error, info};

pub type SignalTx = mpsc::Sender<SignalTo>;
pub type SignalRx = mpsc::Receiver<SignalTo>;

/// Control messages used to drive topology and shutdown events.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SignalTo {
    /// Signal to shutdown process
    Shutdown,
    /// Shutdown process immediately
    Quit,
}

/// SignalHandler is a general `SignalTo` message receiver and transmitter.
/// It's used by OS signals to surface control events to the root of the
/// application.
pub struct SignalHandler {
    tx: SignalTx,
}

impl SignalHandler {
    /// Create a new signal handler. We'll have space for 2 control messages
    /// at a time, to ensure the channel isn't blocking.
    pub fn new() -> (Self, SignalRx) {
        let (tx, rx) = mpsc::channel(2);

        (Self { tx }, rx)
    }

    /// Takes a stream who's elements are convertible to `SignalTo`, and
    /// spawns a permanent task for transmitting to the receiver.
    pub fn forever<T, S>(&mut self, stream: S)
    where
        T: Into<SignalTo> + Send + Sync,
        S: Stream<Item = T> + 'static + Send,
    {
        let tx = self.tx.clone();

        tokio::spawn(async move {
            let mut stream = pin!(stream);

            while let Some(value) = stream.next().await {
                if tx.send(value.into()).await.is_err() {
                    error!(message = "couldn't send signal");
                    break;
                }
            }
        });
    }
}

pub struct Signals {
    sigint: Signal,
    sigterm: Signal,
    sigquit: Signal,
}

impl Stream for Signals {
    type Item = SignalTo;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        if this.sigint.poll_recv(cx).is_ready() {
            info!(message = "Signal received", signal = "SIGINT");
            return Poll::Ready(Some(SignalTo::Shutdown));
        }

        if this.sigterm.poll_recv(cx).is_ready() {
            info!(message = "Signal received", signal = "SIGTERM");
            return Poll::Ready(Some(SignalTo::Shutdown));
        }

        if this.sigquit.poll_recv(cx).is_ready() {
            info!(message = "Signal received", signal = "SIGQUIT");
            return Poll::Ready(Some(SignalTo::Quit));
        }

        Poll::Pending
    }
}

/// Signals from OS/user
pub fn os_signals() -> Signals {
    use tokio::signal::unix::{SignalKind, signal};

    let sigint = signal(SignalKind::interrupt()).expect("Failed to set up SIGINT handle");
    let sigterm = signal(SignalKind::terminate()).expect("Failed to set up SIGTERM handle");
    let sigquit = signal(SignalKind::quit()).expect("Failed to set up SIGQUIT handle");

    Signals {
        sigint,
        sigterm,
        sigquit,
    }
}
