use tokio::sync::watch;

use crate::concurrency::signal::{SignalRx, SignalTx, create_signal};

/// Handle used to ask a running relay and its workers to stop.
#[derive(Debug, Clone)]
pub struct ShutdownTx(SignalTx);

impl ShutdownTx {
    pub fn wrap(tx: SignalTx) -> Self {
        Self(tx)
    }

    /// Signals every subscriber. Fails only when no subscriber is alive anymore.
    pub fn shutdown(&self) -> Result<(), watch::error::SendError<()>> {
        self.0.send(())
    }

    pub fn subscribe(&self) -> ShutdownRx {
        self.0.subscribe()
    }
}

pub type ShutdownRx = SignalRx;

pub fn create_shutdown_channel() -> (ShutdownTx, ShutdownRx) {
    let (tx, rx) = create_signal();
    (ShutdownTx::wrap(tx), rx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_observe_shutdown() {
        let (shutdown_tx, _rx) = create_shutdown_channel();
        let mut first = shutdown_tx.subscribe();
        let mut second = shutdown_tx.subscribe();

        shutdown_tx.shutdown().unwrap();

        first.changed().await.unwrap();
        second.changed().await.unwrap();
    }

    #[test]
    fn shutdown_without_subscribers_fails() {
        let (shutdown_tx, rx) = create_shutdown_channel();
        drop(rx);

        assert!(shutdown_tx.shutdown().is_err());
    }
}
