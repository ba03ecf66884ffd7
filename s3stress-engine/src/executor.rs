//! Concurrent execution of a [`Workload`].

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::operation::Operation;
use crate::pool::EndpointPool;
use crate::signal::StartSignal;
use crate::workload::{Worker, Workload};

/// Runs a fixed number of workers that each loop over [`Workload::step`].
pub struct Executor<W: Workload> {
    workload: Arc<W>,
    pool: Arc<EndpointPool<W::Client>>,
    concurrency: u16,
}

impl<W: Workload> Executor<W> {
    /// Creates an executor with `concurrency` workers sharing `pool`.
    pub fn new(workload: Arc<W>, pool: Arc<EndpointPool<W::Client>>, concurrency: u16) -> Self {
        Self {
            workload,
            pool,
            concurrency,
        }
    }

    /// Spawns all workers and waits until every one of them has exited.
    ///
    /// Workers block until `start` fires, then step until `stop` is cancelled or `sink` is
    /// closed. Each step holds a lease on one endpoint and each completed operation is sent to
    /// `sink`. Returns the distinct partitions of all workers.
    ///
    /// # Panics
    ///
    /// If a worker panics, the panic is resumed here once all other workers have exited.
    pub async fn run(
        &self,
        start: StartSignal,
        stop: CancellationToken,
        sink: mpsc::Sender<Operation>,
    ) -> BTreeSet<String> {
        let mut partitions = BTreeSet::new();
        let mut workers = JoinSet::new();

        for id in 0..self.concurrency {
            let partition = self.workload.partition(id);
            partitions.insert(partition.clone());

            let worker = Worker {
                id,
                partition,
                iteration: 0,
                stop: stop.clone(),
            };
            workers.spawn(run_worker(
                Arc::clone(&self.workload),
                Arc::clone(&self.pool),
                worker,
                start.clone(),
                sink.clone(),
            ));
        }
        drop(sink);
        tracing::debug!(workers = self.concurrency, "spawned workers");

        let mut panic = None;
        while let Some(result) = workers.join_next().await {
            match result {
                Ok(()) => {}
                Err(error) if error.is_panic() => {
                    tracing::error!("worker panicked");
                    stop.cancel();
                    panic.get_or_insert(error.into_panic());
                }
                Err(error) => tracing::warn!(%error, "worker cancelled"),
            }
        }

        if let Some(payload) = panic {
            std::panic::resume_unwind(payload);
        }
        partitions
    }
}

impl<W: Workload> fmt::Debug for Executor<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Executor")
            .field("workload", &self.workload.name())
            .field("pool", &self.pool)
            .field("concurrency", &self.concurrency)
            .finish()
    }
}

async fn run_worker<W: Workload>(
    workload: Arc<W>,
    pool: Arc<EndpointPool<W::Client>>,
    mut worker: Worker,
    mut start: StartSignal,
    sink: mpsc::Sender<Operation>,
) {
    tokio::select! {
        started = start.wait() => {
            if !started {
                return;
            }
        }
        _ = worker.stop.cancelled() => return,
    }

    while !worker.stop.is_cancelled() {
        let lease = pool.acquire();
        let op = workload.step(&mut worker, &lease).await;
        lease.release();

        worker.iteration += 1;
        if sink.send(op).await.is_err() {
            tracing::debug!(worker = worker.id, "collector closed, stopping worker");
            break;
        }
    }
}
