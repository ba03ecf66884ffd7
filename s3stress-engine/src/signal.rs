//! One-shot broadcast used to release all workers at the same instant.

use tokio::sync::watch;

/// Creates a connected [`StartTrigger`] and [`StartSignal`] pair.
pub fn start_signal() -> (StartTrigger, StartSignal) {
    let (tx, rx) = watch::channel(false);
    (StartTrigger(tx), StartSignal(rx))
}

/// Fires the start signal for every clone of the paired [`StartSignal`].
#[derive(Debug)]
pub struct StartTrigger(watch::Sender<bool>);

impl StartTrigger {
    /// Releases all waiters. Consumes the trigger so it can only fire once.
    pub fn fire(self) {
        self.0.send_replace(true);
    }
}

/// The receiving side of the start broadcast. Cheap to clone, one per worker.
#[derive(Clone, Debug)]
pub struct StartSignal(watch::Receiver<bool>);

impl StartSignal {
    /// Waits until the trigger fires.
    ///
    /// Returns `false` if the trigger was dropped without firing.
    pub async fn wait(&mut self) -> bool {
        self.0.wait_for(|started| *started).await.is_ok()
    }

    /// Whether the trigger has already fired.
    pub fn is_started(&self) -> bool {
        *self.0.borrow()
    }
}
