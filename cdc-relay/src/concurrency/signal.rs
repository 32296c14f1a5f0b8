use tokio::sync::watch;

/// Sending half of a watch channel of `()` used purely as a wake-up signal.
pub type SignalTx = watch::Sender<()>;

/// Receiving half of a watch channel of `()` used purely as a wake-up signal.
pub type SignalRx = watch::Receiver<()>;

/// Creates a new pair of [`SignalTx`] and [`SignalRx`].
pub fn create_signal() -> (SignalTx, SignalRx) {
    watch::channel(())
}
