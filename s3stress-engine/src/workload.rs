//! The contract between the engine and a concrete benchmark.

use std::collections::BTreeSet;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::operation::Operation;
use crate::pool::{EndpointPool, Lease};

/// Per-worker state handed to every [`Workload::step`].
#[derive(Debug)]
pub struct Worker {
    /// Index of this worker, `0..concurrency`.
    pub id: u16,
    /// The object namespace owned by this worker, as returned by [`Workload::partition`].
    pub partition: String,
    /// Number of steps this worker has completed so far.
    pub iteration: u64,
    /// Cancelled when the run is over. Steps may use it to abandon long requests.
    pub stop: CancellationToken,
}

/// Reports setup progress as a fraction between `0.0` and `1.0`.
#[derive(Debug)]
pub struct Progress(watch::Sender<f64>);

impl Progress {
    pub(crate) fn new(sender: watch::Sender<f64>) -> Self {
        Self(sender)
    }

    /// A progress reporter nobody listens to.
    pub fn detached() -> Self {
        Self(watch::channel(0.0).0)
    }

    /// Publishes the current fraction, clamped to `0.0..=1.0`.
    pub fn set(&self, fraction: f64) {
        self.0.send_replace(fraction.clamp(0.0, 1.0));
    }
}

/// A benchmark: setup, a repeated measured step, and teardown.
///
/// The engine calls [`prepare`](Self::prepare) once, then runs [`step`](Self::step) in a loop on
/// every worker until the run stops, and finally calls [`cleanup`](Self::cleanup) with the
/// partitions of all workers. Every step runs under a [`Lease`] on one endpoint of the pool.
#[async_trait]
pub trait Workload: Send + Sync + 'static {
    /// The client type held by the endpoint pool.
    type Client: Send + Sync + 'static;

    /// Short name used in logs and dataset file names.
    fn name(&self) -> &str;

    /// Sets up resources the measured phase depends on.
    async fn prepare(
        &self,
        pool: &EndpointPool<Self::Client>,
        progress: &Progress,
    ) -> anyhow::Result<()>;

    /// The object namespace for worker `worker`.
    ///
    /// Called once per worker before the run starts.
    fn partition(&self, worker: u16) -> String;

    /// Performs and measures one operation against the leased endpoint.
    ///
    /// Failures are recorded on the returned [`Operation`], they do not end the run.
    async fn step(&self, worker: &mut Worker, client: &Lease<Self::Client>) -> Operation;

    /// Removes what the run created under `partitions`.
    async fn cleanup(
        &self,
        pool: &EndpointPool<Self::Client>,
        partitions: &BTreeSet<String>,
    ) -> anyhow::Result<()>;
}
