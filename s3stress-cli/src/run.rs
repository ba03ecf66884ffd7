//! Entry points of the subcommands.

use std::path::Path;

use anyhow::{Context, Result};
use s3stress_engine::{Benchmark, EndpointPool, Lifecycle, RunReport, Workload, codec};

use crate::config::Config;
use crate::http::HttpClient;
use crate::workload::put::PutWorkload;
use crate::workload::video::{CapacityPlan, VideoWorkload};
use crate::{progress, report};

/// Runs the `put` workload against the configured endpoints.
pub async fn put(config: &Config) -> Result<RunReport> {
    let workload = PutWorkload::new(&config.put, &config.bucket, !config.noclear)?;
    run_benchmark(config, "put", workload).await
}

/// Prints the capacity plan, then runs the `video` workload against the configured endpoints.
pub async fn video(config: &Config) -> Result<RunReport> {
    let workload = VideoWorkload::new(&config.video, &config.bucket, !config.noclear)?;
    report::print_plan(&workload.plan().summary());
    run_benchmark(config, "video", workload).await
}

/// Prints the capacity plan of the video settings without running anything.
pub fn plan(config: &Config) -> Result<()> {
    let plan = CapacityPlan::new(&config.video).context("invalid video settings")?;
    report::print_plan(&plan.summary());
    Ok(())
}

/// Decodes a dataset and prints its statistics.
pub fn analyze(path: &Path) -> Result<()> {
    let dataset =
        codec::read_dataset(path).with_context(|| format!("unable to read {}", path.display()))?;
    report::print_dataset(path, &dataset);
    Ok(())
}

/// Drives `workload` through all stages and prints the results.
///
/// Ctrl-C aborts the run, cleanup still happens. Returns an error if the run failed.
async fn run_benchmark<W>(config: &Config, command: &str, workload: W) -> Result<RunReport>
where
    W: Workload<Client = HttpClient>,
{
    let run_config = config.run_config(command)?;
    let endpoints = config.endpoints().await?;
    let pool = EndpointPool::new(endpoints, config.host_select()?, HttpClient::connect)?;
    tracing::debug!(?pool, "connected");

    let benchmark = Benchmark::new(workload, pool, run_config)?;
    let lifecycle = Lifecycle::new();

    let run = async { tokio::join!(benchmark.run(&lifecycle), progress::track(&lifecycle)) };
    tokio::pin!(run);
    let (report, tracked) = tokio::select! {
        result = &mut run => result,
        Ok(()) = tokio::signal::ctrl_c() => {
            tracing::warn!("interrupted, stopping benchmark");
            lifecycle.abort();
            run.await
        }
    };
    if let Err(error) = tracked {
        tracing::warn!(error = &*error as &dyn std::error::Error, "progress display failed");
    }

    report::print_run(&report, &lifecycle);
    if let Some(error) = &report.error {
        anyhow::bail!("benchmark failed: {error:#}");
    }
    Ok(report)
}
