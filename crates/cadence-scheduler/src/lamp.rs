//! Single-slot wake signal between the registry and the scheduling loop.
//!
//! At most one wake token is ever pending. Waking while a token is already
//! queued is a no-op, so a burst of registry changes costs the loop a single
//! extra cycle.

use std::time::Duration;

use tokio::sync::mpsc;

/// Why [`LampReceiver::wait`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wake {
    /// Someone called [`SignalLamp::wake`].
    Signalled,
    /// The timeout elapsed first.
    TimedOut,
    /// Every [`SignalLamp`] was dropped.
    Closed,
}

/// Sending half, cloned into everything that mutates the registry.
#[derive(Debug, Clone)]
pub struct SignalLamp {
    tx: mpsc::Sender<()>,
}

/// Receiving half, owned by the scheduling loop.
#[derive(Debug)]
pub struct LampReceiver {
    rx: mpsc::Receiver<()>,
}

pub fn signal_lamp() -> (SignalLamp, LampReceiver) {
    let (tx, rx) = mpsc::channel(1);
    (SignalLamp { tx }, LampReceiver { rx })
}

impl SignalLamp {
    /// Request an early wake. Returns false when a wake was already pending
    /// (the two coalesce) or the loop is gone.
    pub fn wake(&self) -> bool {
        self.tx.try_send(()).is_ok()
    }
}

impl LampReceiver {
    /// Block until woken or until `timeout` elapses. `None` waits for a wake only.
    pub async fn wait(&mut self, timeout: Option<Duration>) -> Wake {
        let signalled = async {
            match self.rx.recv().await {
                Some(()) => Wake::Signalled,
                None => Wake::Closed,
            }
        };
        match timeout {
            None => signalled.await,
            Some(timeout) => tokio::select! {
                biased;
                wake = signalled => wake,
                _ = tokio::time::sleep(timeout) => Wake::TimedOut,
            },
        }
    }

    /// Discard a pending token without waiting.
    pub fn drain(&mut self) -> bool {
        self.rx.try_recv().is_ok()
    }
}
