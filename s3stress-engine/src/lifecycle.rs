//! Phased execution of a benchmark run.
//!
//! A run moves strictly forward through [`Stage::NotStarted`], [`Stage::Prepare`],
//! [`Stage::Running`], [`Stage::Cleanup`] and [`Stage::Done`]. The [`Lifecycle`] records the
//! outcome of every stage and lets observers wait for stages to begin or end. [`Benchmark`] drives
//! a [`Workload`] through the stages:
//!
//! - Prepare runs the workload's setup and reports progress on a channel that closes when the
//!   stage ends. A failed Prepare skips Running.
//! - Running releases all workers at one start instant, either after a grace period or at a
//!   synchronized wall-clock time, and stops them at `start + duration` or once throughput has
//!   stabilized. The collected dataset is written before Cleanup begins.
//! - Cleanup tears down the partitions the workers touched, unless disabled. It is not bound by
//!   the run's deadline.
//!
//! The first error of Prepare or Running is the canonical error of the run. Cleanup errors are
//! recorded on their stage only.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Local, Utc};
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::autoterm::Convergence;
use crate::codec;
use crate::collector::Collector;
use crate::config::{Output, RunConfig};
use crate::error::Result;
use crate::executor::Executor;
use crate::operation::Operations;
use crate::pool::EndpointPool;
use crate::signal::start_signal;
use crate::workload::{Progress, Workload};

/// A phase of a benchmark run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    /// Nothing has happened yet.
    NotStarted,
    /// The workload sets up its resources.
    Prepare,
    /// Workers execute measured operations.
    Running,
    /// The workload removes what it created.
    Cleanup,
    /// The run is over.
    Done,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::NotStarted => "not started",
            Self::Prepare => "prepare",
            Self::Running => "running",
            Self::Cleanup => "cleanup",
            Self::Done => "done",
        })
    }
}

/// The current stage and whether it has finished.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StagePosition {
    /// The most recently entered stage.
    pub stage: Stage,
    /// Whether that stage has finished.
    pub done: bool,
}

impl StagePosition {
    /// Whether `stage` has been entered.
    pub fn has_started(&self, stage: Stage) -> bool {
        self.stage >= stage
    }

    /// Whether `stage` has finished.
    pub fn has_finished(&self, stage: Stage) -> bool {
        self.stage > stage || (self.stage == stage && self.done)
    }
}

/// The outcome of one stage.
#[derive(Clone, Debug, Default)]
pub struct StageRecord {
    /// When the stage was entered.
    pub started_at: Option<DateTime<Utc>>,
    /// When the stage finished.
    pub finished_at: Option<DateTime<Utc>>,
    /// The stage was passed without doing any work.
    pub skipped: bool,
    /// Free-form details about the stage.
    pub metadata: BTreeMap<String, String>,
    /// Why the stage failed.
    pub error: Option<Arc<anyhow::Error>>,
}

#[derive(Debug, Default)]
struct State {
    records: BTreeMap<Stage, StageRecord>,
    error: Option<Arc<anyhow::Error>>,
}

/// Shared state of one run, observable from other tasks.
#[derive(Debug)]
pub struct Lifecycle {
    state: Mutex<State>,
    position: watch::Sender<StagePosition>,
    progress: Mutex<Option<watch::Sender<f64>>>,
    progress_rx: watch::Receiver<f64>,
    abort: CancellationToken,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    /// Creates a lifecycle in [`Stage::NotStarted`].
    pub fn new() -> Self {
        let (progress, progress_rx) = watch::channel(0.0);
        let (position, _) = watch::channel(StagePosition {
            stage: Stage::NotStarted,
            done: true,
        });

        Self {
            state: Mutex::default(),
            position,
            progress: Mutex::new(Some(progress)),
            progress_rx,
            abort: CancellationToken::new(),
        }
    }

    /// The most recently entered stage.
    pub fn stage(&self) -> Stage {
        self.position.borrow().stage
    }

    /// Observes stage transitions.
    pub fn subscribe(&self) -> watch::Receiver<StagePosition> {
        self.position.subscribe()
    }

    /// Waits until `stage` has been entered.
    pub async fn wait_started(&self, stage: Stage) {
        let mut rx = self.subscribe();
        // The sender lives as long as `self`, so the channel cannot close while waiting.
        let _ = rx.wait_for(|position| position.has_started(stage)).await;
    }

    /// Waits until `stage` has finished, including being skipped.
    pub async fn wait_finished(&self, stage: Stage) {
        let mut rx = self.subscribe();
        let _ = rx.wait_for(|position| position.has_finished(stage)).await;
    }

    /// Setup progress as a fraction. The channel closes once Prepare has ended.
    pub fn prepare_progress(&self) -> watch::Receiver<f64> {
        self.progress_rx.clone()
    }

    /// A snapshot of the outcome of `stage`.
    pub fn record(&self, stage: Stage) -> StageRecord {
        self.state
            .lock()
            .records
            .get(&stage)
            .cloned()
            .unwrap_or_default()
    }

    /// The first error of the run.
    pub fn error(&self) -> Option<Arc<anyhow::Error>> {
        self.state.lock().error.clone()
    }

    /// Attaches a detail to the record of `stage`.
    pub fn set_metadata(&self, stage: Stage, key: impl Into<String>, value: impl ToString) {
        self.state
            .lock()
            .records
            .entry(stage)
            .or_default()
            .metadata
            .insert(key.into(), value.to_string());
    }

    /// Stops the run as soon as possible. Cleanup still runs.
    pub fn abort(&self) {
        self.abort.cancel();
    }

    /// Whether [`abort`](Self::abort) has been called.
    pub fn is_aborted(&self) -> bool {
        self.abort.is_cancelled()
    }

    /// # Panics
    ///
    /// Panics if `stage` does not come after the current stage, or if the current stage has not
    /// finished.
    fn enter(&self, stage: Stage) {
        self.begin(stage, false);
    }

    /// Records the start of `stage` and publishes it, marking it skipped first if requested.
    fn begin(&self, stage: Stage, skipped: bool) {
        let current = *self.position.borrow();
        assert!(
            stage > current.stage && current.done,
            "cannot enter stage {stage} from {current:?}"
        );

        {
            let mut state = self.state.lock();
            let record = state.records.entry(stage).or_default();
            record.started_at = Some(Utc::now());
            record.skipped = skipped;
        }
        self.position.send_replace(StagePosition { stage, done: false });
        tracing::debug!(%stage, "stage started");
    }

    /// # Panics
    ///
    /// Panics if `stage` is not the current unfinished stage.
    fn finish(&self, stage: Stage, result: anyhow::Result<()>) {
        let current = *self.position.borrow();
        assert!(
            current.stage == stage && !current.done,
            "cannot finish stage {stage} from {current:?}"
        );

        {
            let mut state = self.state.lock();
            let record = state.records.entry(stage).or_default();
            record.finished_at = Some(Utc::now());

            if let Err(error) = result {
                tracing::error!(
                    %stage,
                    error = &*error as &dyn std::error::Error,
                    "stage failed"
                );
                let error = Arc::new(error);
                record.error = Some(Arc::clone(&error));
                if stage != Stage::Cleanup && state.error.is_none() {
                    state.error = Some(error);
                }
            }
        }

        if stage == Stage::Prepare {
            self.progress.lock().take();
        }
        self.position.send_replace(StagePosition { stage, done: true });
        tracing::debug!(%stage, "stage finished");
    }

    fn skip(&self, stage: Stage) {
        self.begin(stage, true);
        tracing::info!(%stage, "stage skipped");
        self.finish(stage, Ok(()));
    }

    fn take_progress(&self) -> Progress {
        match self.progress.lock().take() {
            Some(sender) => Progress::new(sender),
            None => Progress::detached(),
        }
    }
}

/// What a run produced.
#[derive(Debug, Default)]
pub struct RunReport {
    /// All collected operations, sorted by start time.
    pub operations: Operations,
    /// Partitions touched by the workers.
    pub partitions: BTreeSet<String>,
    /// When the workers were released.
    pub started_at: Option<Instant>,
    /// When the last worker exited.
    pub finished_at: Option<Instant>,
    /// Set if the run ended early on stable throughput.
    pub converged: Option<Convergence>,
    /// The written dataset.
    pub dataset: Option<PathBuf>,
    /// The canonical error of the run.
    pub error: Option<Arc<anyhow::Error>>,
}

impl RunReport {
    /// Wall-clock length of the measured phase.
    pub fn elapsed(&self) -> Option<Duration> {
        Some(self.finished_at? - self.started_at?)
    }
}

/// A workload bound to endpoints and run parameters.
pub struct Benchmark<W: Workload> {
    workload: Arc<W>,
    pool: Arc<EndpointPool<W::Client>>,
    config: RunConfig,
}

impl<W: Workload> Benchmark<W> {
    /// Validates `config` and creates the benchmark.
    pub fn new(workload: W, pool: EndpointPool<W::Client>, config: RunConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            workload: Arc::new(workload),
            pool: Arc::new(pool),
            config,
        })
    }

    /// The workload being run.
    pub fn workload(&self) -> &W {
        &self.workload
    }

    /// The endpoints the workload runs against.
    pub fn pool(&self) -> &EndpointPool<W::Client> {
        &self.pool
    }

    /// Drives the workload through all stages, recording outcomes on `lifecycle`.
    ///
    /// # Panics
    ///
    /// Panics if `lifecycle` has been used for another run.
    pub async fn run(&self, lifecycle: &Lifecycle) -> RunReport {
        let mut report = RunReport::default();
        tracing::info!(
            workload = self.workload.name(),
            concurrency = self.config.concurrency,
            duration = ?self.config.duration,
            "starting benchmark"
        );

        lifecycle.enter(Stage::Prepare);
        let prepared = self.prepare(lifecycle).await;
        let prepared_ok = prepared.is_ok();
        lifecycle.finish(Stage::Prepare, prepared);

        if prepared_ok && !lifecycle.is_aborted() {
            lifecycle.enter(Stage::Running);
            let result = self.running(lifecycle, &mut report).await;
            lifecycle.finish(Stage::Running, result);
        } else {
            lifecycle.skip(Stage::Running);
        }

        if self.config.cleanup {
            lifecycle.enter(Stage::Cleanup);
            let result = self
                .workload
                .cleanup(&self.pool, &report.partitions)
                .await
                .context("cleanup failed");
            lifecycle.finish(Stage::Cleanup, result);
        } else {
            lifecycle.skip(Stage::Cleanup);
        }

        lifecycle.enter(Stage::Done);
        lifecycle.finish(Stage::Done, Ok(()));

        report.error = lifecycle.error();
        report
    }

    async fn prepare(&self, lifecycle: &Lifecycle) -> anyhow::Result<()> {
        let progress = lifecycle.take_progress();
        tokio::select! {
            result = self.workload.prepare(&self.pool, &progress) => {
                result.context("prepare failed")?;
            }
            _ = lifecycle.abort.cancelled() => anyhow::bail!("aborted during prepare"),
        }
        progress.set(1.0);
        Ok(())
    }

    async fn running(&self, lifecycle: &Lifecycle, report: &mut RunReport) -> anyhow::Result<()> {
        let stop = lifecycle.abort.child_token();
        let capacity = usize::from(self.config.concurrency);
        let collector = match &self.config.auto_term {
            Some(auto_term) => Collector::with_auto_term(capacity, auto_term.clone(), stop.clone()),
            None => Collector::new(capacity),
        };

        let start_at = self.start_instant();
        let deadline = start_at + self.config.duration;
        lifecycle.set_metadata(Stage::Running, "concurrency", self.config.concurrency);
        lifecycle.set_metadata(
            Stage::Running,
            "duration",
            format!("{:?}", self.config.duration),
        );

        let (trigger, start) = start_signal();
        let observer = start.clone();
        let timer = tokio::spawn({
            let stop = stop.clone();
            async move {
                tokio::select! {
                    _ = tokio::time::sleep_until(start_at) => {}
                    _ = stop.cancelled() => return,
                }
                trigger.fire();
                tracing::info!("benchmark started");

                tokio::select! {
                    _ = tokio::time::sleep_until(deadline) => {
                        tracing::debug!("deadline reached");
                        stop.cancel();
                    }
                    _ = stop.cancelled() => {}
                }
            }
        });

        let executor = Executor::new(
            Arc::clone(&self.workload),
            Arc::clone(&self.pool),
            self.config.concurrency,
        );
        report.partitions = executor.run(start, stop.clone(), collector.sender()).await;
        let finished_at = Instant::now();
        stop.cancel();
        timer.abort();

        let collected = collector.close().await;
        if observer.is_started() {
            report.started_at = Some(start_at);
            report.finished_at = Some(finished_at);
        }
        if let Some(convergence) = &collected.converged {
            lifecycle.set_metadata(Stage::Running, "terminated early", convergence);
        }
        lifecycle.set_metadata(Stage::Running, "operations", collected.operations.len());
        tracing::info!(
            operations = collected.operations.len(),
            errors = collected.operations.errors(),
            "benchmark finished"
        );

        report.converged = collected.converged;
        report.operations = collected.operations;

        if let Some(output) = &self.config.output {
            let operations = std::mem::take(&mut report.operations);
            let (operations, result) = persist(operations, output.clone()).await;
            report.operations = operations;
            result.with_context(|| format!("unable to write {}", output.path.display()))?;

            tracing::info!(path = %output.path.display(), "benchmark data written");
            report.dataset = Some(output.path.clone());
        }
        Ok(())
    }

    fn start_instant(&self) -> Instant {
        let now = Instant::now();
        let Some(sync_start) = self.config.sync_start else {
            return now + self.config.grace;
        };

        match (sync_start - Utc::now()).to_std() {
            Ok(wait) => {
                tracing::info!(
                    start = %sync_start.with_timezone(&Local).format("%H:%M:%S"),
                    "waiting for synchronized start"
                );
                now + wait
            }
            Err(_) => {
                tracing::error!(
                    start = %sync_start.with_timezone(&Local).format("%H:%M:%S"),
                    "synchronized start has already passed, starting now"
                );
                now
            }
        }
    }
}

impl<W: Workload> fmt::Debug for Benchmark<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Benchmark")
            .field("workload", &self.workload.name())
            .field("pool", &self.pool)
            .field("config", &self.config)
            .finish()
    }
}

async fn persist(mut operations: Operations, output: Output) -> (Operations, Result<()>) {
    let handle = tokio::task::spawn_blocking(move || {
        operations.set_client_id(&output.client_id);
        let result = codec::write_dataset(&operations, &output.path, &output.command_line);
        (operations, result)
    });

    match handle.await {
        Ok(written) => written,
        Err(error) => std::panic::resume_unwind(error.into_panic()),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use async_trait::async_trait;
    use chrono::TimeDelta;

    use super::*;
    use crate::autoterm::AutoTerm;
    use crate::endpoint::Endpoint;
    use crate::operation::{OpType, Operation};
    use crate::pool::{HostSelect, Lease};
    use crate::workload::Worker;

    /// Each step sleeps for a fixed latency. Timestamps follow tokio's clock so they advance
    /// with paused time.
    struct Sleepy {
        latency: Duration,
        fail_prepare: bool,
        cleaned: Arc<AtomicBool>,
        cleaned_partitions: Mutex<BTreeSet<String>>,
        steps: AtomicUsize,
        clock: (Instant, DateTime<Utc>),
    }

    impl Sleepy {
        fn new(latency: Duration) -> Self {
            Self {
                latency,
                fail_prepare: false,
                cleaned: Arc::default(),
                cleaned_partitions: Mutex::default(),
                steps: AtomicUsize::new(0),
                clock: (Instant::now(), Utc::now()),
            }
        }

        fn now(&self) -> DateTime<Utc> {
            let (origin, base) = self.clock;
            base + TimeDelta::from_std(origin.elapsed()).unwrap()
        }
    }

    #[async_trait]
    impl Workload for Sleepy {
        type Client = ();

        fn name(&self) -> &str {
            "sleepy"
        }

        async fn prepare(&self, _pool: &EndpointPool<()>, progress: &Progress) -> anyhow::Result<()> {
            progress.set(0.5);
            if self.fail_prepare {
                anyhow::bail!("bucket already exists");
            }
            Ok(())
        }

        fn partition(&self, worker: u16) -> String {
            format!("w{worker}")
        }

        async fn step(&self, worker: &mut Worker, client: &Lease<()>) -> Operation {
            self.steps.fetch_add(1, Ordering::SeqCst);
            let mut op = Operation::begin(OpType::Put, worker.id, client.host());
            op.start = self.now();
            op.size = 1024;
            op.file = format!("{}/{}", worker.partition, worker.iteration);
            tokio::time::sleep(self.latency).await;
            op.end = self.now();
            op
        }

        async fn cleanup(
            &self,
            _pool: &EndpointPool<()>,
            partitions: &BTreeSet<String>,
        ) -> anyhow::Result<()> {
            self.cleaned.store(true, Ordering::SeqCst);
            *self.cleaned_partitions.lock() = partitions.clone();
            Ok(())
        }
    }

    fn benchmark(workload: Sleepy, config: RunConfig) -> Benchmark<Sleepy> {
        let endpoints = vec![Endpoint::new("a:9000"), Endpoint::new("b:9000")];
        let pool = EndpointPool::new(endpoints, HostSelect::Weighted, |_| Ok(())).unwrap();
        Benchmark::new(workload, pool, config).unwrap()
    }

    fn config(concurrency: u16, duration: Duration) -> RunConfig {
        RunConfig {
            grace: Duration::from_secs(1),
            ..RunConfig::new(concurrency, duration)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn fixed_duration_run() {
        s3stress_test::tracing::init();
        let benchmark = benchmark(
            Sleepy::new(Duration::from_millis(300)),
            config(20, Duration::from_secs(5)),
        );
        let lifecycle = Lifecycle::new();
        let report = benchmark.run(&lifecycle).await;

        assert!(report.error.is_none());
        assert_eq!(lifecycle.stage(), Stage::Done);

        // Steps start at 0ms, 300ms, ..., 4800ms; the one starting at 4800ms ends past the
        // deadline and is the last of each worker.
        assert_eq!(report.operations.len(), 20 * 17);
        assert_eq!(benchmark.workload().steps.load(Ordering::SeqCst), 20 * 17);
        assert!(report.operations.is_sorted_by_start_time());

        let mut files: Vec<_> = report.operations.iter().map(|op| &op.file).collect();
        files.sort();
        files.dedup();
        assert_eq!(files.len(), 20 * 17);

        let elapsed = report.elapsed().unwrap();
        assert!(elapsed >= Duration::from_secs(5), "{elapsed:?}");
        assert!(elapsed <= Duration::from_millis(5300), "{elapsed:?}");

        assert_eq!(report.partitions.len(), 20);
        assert!(benchmark.workload().cleaned.load(Ordering::SeqCst));
        assert_eq!(
            *benchmark.workload().cleaned_partitions.lock(),
            report.partitions
        );
        assert_eq!(benchmark.pool().in_flight(), [0, 0]);
    }

    #[tokio::test(start_paused = true)]
    async fn prepare_failure_skips_running() {
        s3stress_test::tracing::init();
        let workload = Sleepy {
            fail_prepare: true,
            ..Sleepy::new(Duration::from_millis(10))
        };
        let benchmark = benchmark(workload, config(4, Duration::from_secs(5)));
        let lifecycle = Lifecycle::new();
        let report = benchmark.run(&lifecycle).await;

        let error = report.error.expect("canonical error");
        assert_eq!(format!("{:#}", error), "prepare failed: bucket already exists");
        assert!(Arc::ptr_eq(
            &error,
            lifecycle.record(Stage::Prepare).error.as_ref().unwrap()
        ));

        assert!(lifecycle.record(Stage::Running).skipped);
        assert!(report.started_at.is_none());
        assert!(report.operations.is_empty());
        assert_eq!(benchmark.workload().steps.load(Ordering::SeqCst), 0);

        let cleanup = lifecycle.record(Stage::Cleanup);
        assert!(!cleanup.skipped);
        assert!(benchmark.workload().cleaned.load(Ordering::SeqCst));
        assert!(benchmark.workload().cleaned_partitions.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn cleanup_can_be_disabled() {
        let workload = Sleepy {
            fail_prepare: true,
            ..Sleepy::new(Duration::from_millis(10))
        };
        let config = RunConfig {
            cleanup: false,
            ..config(2, Duration::from_secs(1))
        };
        let benchmark = benchmark(workload, config);
        let lifecycle = Lifecycle::new();
        benchmark.run(&lifecycle).await;

        assert!(lifecycle.record(Stage::Cleanup).skipped);
        assert!(!benchmark.workload().cleaned.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn progress_closes_after_prepare() {
        let benchmark = benchmark(
            Sleepy::new(Duration::from_millis(50)),
            config(2, Duration::from_secs(1)),
        );
        let lifecycle = Lifecycle::new();
        let progress = lifecycle.prepare_progress();
        benchmark.run(&lifecycle).await;

        assert_eq!(*progress.borrow(), 1.0);
        assert!(progress.has_changed().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn observers_see_every_stage() {
        let benchmark = Arc::new(benchmark(
            Sleepy::new(Duration::from_millis(50)),
            config(2, Duration::from_secs(1)),
        ));
        let lifecycle = Arc::new(Lifecycle::new());

        let observer = tokio::spawn({
            let lifecycle = Arc::clone(&lifecycle);
            async move {
                let mut seen = Vec::new();
                for stage in [Stage::Prepare, Stage::Running, Stage::Cleanup, Stage::Done] {
                    lifecycle.wait_started(stage).await;
                    lifecycle.wait_finished(stage).await;
                    seen.push(stage);
                }
                seen
            }
        });

        let report = benchmark.run(&lifecycle).await;
        assert!(report.error.is_none());
        assert_eq!(observer.await.unwrap().len(), 4);

        let running = lifecycle.record(Stage::Running);
        assert!(running.started_at.unwrap() <= running.finished_at.unwrap());
        assert_eq!(running.metadata["concurrency"], "2");
    }

    #[tokio::test(start_paused = true)]
    async fn synchronized_start_in_the_past() {
        let config = RunConfig {
            sync_start: Some(Utc::now() - TimeDelta::minutes(1)),
            ..config(2, Duration::from_secs(2))
        };
        let benchmark = benchmark(Sleepy::new(Duration::from_millis(300)), config);
        let lifecycle = Lifecycle::new();

        let before = Instant::now();
        let report = benchmark.run(&lifecycle).await;
        assert_eq!(report.started_at.unwrap(), before);
        // Steps start at 0ms, 300ms, ..., 1800ms.
        assert_eq!(report.operations.len(), 2 * 7);
    }

    #[tokio::test(start_paused = true)]
    async fn auto_term_ends_run_early() {
        let auto_term = AutoTerm::new(OpType::Put, 5.0, Duration::from_secs(3))
            .unwrap()
            .with_window(Duration::from_secs(1))
            .with_min_samples(10);
        let config = RunConfig {
            auto_term: Some(auto_term),
            ..config(4, Duration::from_secs(600))
        };
        let benchmark = benchmark(Sleepy::new(Duration::from_millis(100)), config);
        let lifecycle = Lifecycle::new();
        let report = benchmark.run(&lifecycle).await;

        let converged = report.converged.as_ref().expect("run converged");
        assert!(converged.elapsed >= Duration::from_secs(3));
        assert!(report.elapsed().unwrap() < Duration::from_secs(10));
        assert!(lifecycle.record(Stage::Running).metadata.contains_key("terminated early"));
    }

    #[tokio::test(start_paused = true)]
    async fn abort_before_start() {
        let benchmark = benchmark(
            Sleepy::new(Duration::from_millis(100)),
            config(2, Duration::from_secs(60)),
        );
        let lifecycle = Arc::new(Lifecycle::new());

        tokio::spawn({
            let lifecycle = Arc::clone(&lifecycle);
            async move {
                lifecycle.wait_started(Stage::Running).await;
                lifecycle.abort();
            }
        });

        let report = benchmark.run(&lifecycle).await;
        assert!(report.operations.is_empty());
        assert!(report.started_at.is_none());
        assert!(benchmark.workload().cleaned.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn dataset_written_before_cleanup() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.csv.zst");
        let config = RunConfig {
            output: Some(Output {
                path: path.clone(),
                command_line: "S3STRESS__CONCURRENCY=3 s3stress put".into(),
                client_id: "Zq7w".into(),
            }),
            ..config(3, Duration::from_secs(1))
        };
        let benchmark = benchmark(Sleepy::new(Duration::from_millis(100)), config);
        let report = benchmark.run(&Lifecycle::new()).await;

        assert_eq!(report.dataset.as_deref(), Some(path.as_path()));
        let dataset = codec::read_dataset(&path).unwrap();
        assert_eq!(dataset.command_line, "S3STRESS__CONCURRENCY=3 s3stress put");
        assert_eq!(dataset.operations, report.operations);
        assert!(dataset.operations.iter().all(|op| op.client_id == "Zq7w"));
    }

    #[test]
    #[should_panic(expected = "cannot enter stage prepare")]
    fn stages_only_move_forward() {
        let lifecycle = Lifecycle::new();
        lifecycle.enter(Stage::Running);
        lifecycle.finish(Stage::Running, Ok(()));
        lifecycle.enter(Stage::Prepare);
    }

    #[test]
    #[should_panic(expected = "cannot finish stage running")]
    fn stages_finish_once() {
        let lifecycle = Lifecycle::new();
        lifecycle.enter(Stage::Running);
        lifecycle.finish(Stage::Running, Ok(()));
        lifecycle.finish(Stage::Running, Ok(()));
    }

    #[test]
    fn skipped_stages_are_marked_before_they_start() {
        let lifecycle = Lifecycle::new();
        lifecycle.enter(Stage::Prepare);
        lifecycle.finish(Stage::Prepare, Err(anyhow::anyhow!("no bucket")));

        let lifecycle = &lifecycle;
        let mut position = lifecycle.subscribe();
        std::thread::scope(|scope| {
            let observer = scope.spawn(move || {
                loop {
                    if position.borrow_and_update().stage == Stage::Running {
                        return lifecycle.record(Stage::Running).skipped;
                    }
                    std::thread::yield_now();
                }
            });
            lifecycle.skip(Stage::Running);
            assert!(observer.join().unwrap());
        });
    }

    #[test]
    fn cleanup_errors_are_not_canonical() {
        let lifecycle = Lifecycle::new();
        lifecycle.enter(Stage::Cleanup);
        lifecycle.finish(Stage::Cleanup, Err(anyhow::anyhow!("bucket busy")));

        assert!(lifecycle.error().is_none());
        assert!(lifecycle.record(Stage::Cleanup).error.is_some());
    }
}
