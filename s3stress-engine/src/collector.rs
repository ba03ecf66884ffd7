//! Gathering of operation records from concurrent workers.
//!
//! Workers push completed [`Operation`]s into a bounded channel. A single consumer task owns the
//! resulting list, so no locking is needed while the benchmark runs, and a slow consumer applies
//! backpressure to the workers instead of growing memory without bound.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::autoterm::{AutoTerm, AutoTermMonitor, Convergence};
use crate::operation::{Operation, Operations};

/// The frozen result of a collection.
#[derive(Debug, Default)]
pub struct Collected {
    /// All received operations, sorted by start time.
    pub operations: Operations,
    /// Set if auto-termination ended the run.
    pub converged: Option<Convergence>,
}

/// Receives operations until closed.
#[derive(Debug)]
pub struct Collector {
    sender: mpsc::Sender<Operation>,
    closing: CancellationToken,
    consumer: JoinHandle<(Vec<Operation>, Option<Convergence>)>,
}

impl Collector {
    /// Starts a collector buffering up to `capacity` operations in flight.
    ///
    /// A capacity of roughly the worker count keeps producers from blocking under normal load.
    pub fn new(capacity: usize) -> Self {
        Self::spawn(capacity, None)
    }

    /// Starts a collector that cancels `stop` once the throughput described by `auto_term` has
    /// stabilized.
    pub fn with_auto_term(capacity: usize, auto_term: AutoTerm, stop: CancellationToken) -> Self {
        Self::spawn(capacity, Some((AutoTermMonitor::new(auto_term), stop)))
    }

    fn spawn(capacity: usize, monitor: Option<(AutoTermMonitor, CancellationToken)>) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let closing = CancellationToken::new();
        let consumer = tokio::spawn(consume(receiver, closing.clone(), monitor));
        Self {
            sender,
            closing,
            consumer,
        }
    }

    /// A sending handle for one producer.
    pub fn sender(&self) -> mpsc::Sender<Operation> {
        self.sender.clone()
    }

    /// Stops accepting operations and returns everything received.
    ///
    /// Operations already buffered in the channel are drained, later sends fail. The result is
    /// sorted by start time.
    pub async fn close(self) -> Collected {
        let Self {
            sender,
            closing,
            consumer,
        } = self;
        drop(sender);
        closing.cancel();

        let (ops, converged) = match consumer.await {
            Ok(result) => result,
            Err(error) => std::panic::resume_unwind(error.into_panic()),
        };

        let mut operations = Operations::new(ops);
        operations.sort_by_start_time();
        tracing::debug!(operations = operations.len(), "collector closed");

        Collected {
            operations,
            converged,
        }
    }
}

async fn consume(
    mut receiver: mpsc::Receiver<Operation>,
    closing: CancellationToken,
    mut monitor: Option<(AutoTermMonitor, CancellationToken)>,
) -> (Vec<Operation>, Option<Convergence>) {
    let mut ops = Vec::new();
    let mut converged = None;
    let mut closed = false;

    loop {
        tokio::select! {
            op = receiver.recv() => {
                let Some(op) = op else { break };

                let convergence = monitor
                    .as_mut()
                    .and_then(|(auto_term, _)| auto_term.observe(&op));
                if let Some(convergence) = convergence {
                    tracing::info!(
                        rate = %convergence,
                        elapsed = ?round_secs(convergence.elapsed),
                        "throughput stabilized, terminating early"
                    );
                    if let Some((_, stop)) = monitor.take() {
                        stop.cancel();
                    }
                    converged = Some(convergence);
                }

                ops.push(op);
            }
            _ = closing.cancelled(), if !closed => {
                receiver.close();
                closed = true;
            }
        }
    }

    (ops, converged)
}

fn round_secs(duration: Duration) -> Duration {
    Duration::from_secs(duration.as_secs())
}
