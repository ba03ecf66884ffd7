//! Prints benchmark results to stdout.

use std::path::Path;
use std::time::Duration;

use bytesize::ByteSize;
use s3stress_engine::analysis::{self, OpSummary};
use s3stress_engine::codec::Dataset;
use s3stress_engine::{Lifecycle, RunReport, Stage};
use yansi::Paint;

/// Stages that appear in the stage overview.
const STAGES: [Stage; 3] = [Stage::Prepare, Stage::Running, Stage::Cleanup];

/// Prints the outcome of every stage and the statistics of the collected operations.
pub fn print_run(report: &RunReport, lifecycle: &Lifecycle) {
    println!();
    println!("{}", "## STAGES".bold());
    for stage in STAGES {
        let record = lifecycle.record(stage);
        let status = if record.skipped {
            "skipped".yellow()
        } else if record.error.is_some() {
            "failed".red()
        } else {
            "ok".green()
        };
        let took = match (record.started_at, record.finished_at) {
            (Some(start), Some(end)) => (end - start).to_std().unwrap_or_default(),
            _ => Duration::ZERO,
        };

        print!("{:>8}: {} ({took:.2?})", stage.to_string().bold(), status.bold());
        for (key, value) in &record.metadata {
            print!("; {key}: {value}");
        }
        println!();
        if let Some(error) = &record.error {
            println!("  {}", format!("{error:#}").red());
        }
    }

    if let Some(elapsed) = report.elapsed() {
        println!("{} {elapsed:.2?}", "measured:".bold());
    }
    if let Some(path) = &report.dataset {
        println!("{} {}", "dataset:".bold(), path.display().blue());
    }

    print_operations(&analysis::analyze(&report.operations));
}

/// Prints the header and statistics of a dataset read from `path`.
pub fn print_dataset(path: &Path, dataset: &Dataset) {
    println!("{} {}", "## DATASET".bold(), path.display().blue());
    println!("  {}", dataset.command_line);

    let operations = &dataset.operations;
    print!("  {} operations", operations.len().bold());
    if let Some((start, end)) = operations.time_range() {
        print!(" from {start} to {end}");
    }
    println!();

    print_operations(&analysis::analyze(operations));
}

/// Prints labelled values, aligned on the label.
pub fn print_plan(summary: &[(&'static str, String)]) {
    println!("{}", "## CAPACITY PLAN".bold());
    let width = summary.iter().map(|(label, _)| label.len()).max().unwrap_or(0);
    for (label, value) in summary {
        println!("  {label:<width$}  {}", value.bold());
    }
}

fn print_operations(summaries: &[OpSummary]) {
    if summaries.is_empty() {
        println!();
        println!("{}", "no operations recorded".yellow());
        return;
    }

    for summary in summaries {
        println!();
        print_summary(summary);
    }
}

fn print_summary(summary: &OpSummary) {
    print!(
        "{} ({} ops",
        format!("{}:", summary.op).bold().green(),
        summary.ops.bold()
    );
    if summary.errors > 0 {
        print!(", {}", format!("{} FAILURES", summary.errors).bold().red());
    }
    println!(")");

    if summary.ops == 0 {
        return;
    }

    print!("  {:.2} operations/s", summary.ops_per_sec().bold());
    if summary.bytes > 0 {
        let throughput = ByteSize::b(summary.bytes_per_sec() as u64);
        print!(", {:.2}/s", throughput.bold());
    }
    println!(" over {:.2?}", summary.active());

    if let Some(avg) = summary.latency_avg() {
        let p50 = summary.latency_quantile(0.5).unwrap_or_default();
        let p90 = summary.latency_quantile(0.9).unwrap_or_default();
        let p99 = summary.latency_quantile(0.99).unwrap_or_default();
        println!(
            "  avg: {:.2?}; p50: {p50:.2?}; p90: {p90:.2?}; p99: {p99:.2?}",
            avg.bold()
        );
    }

    if summary.endpoints.len() > 1 {
        for (endpoint, ops) in &summary.endpoints {
            println!("  {endpoint}: {ops} ops");
        }
    }
}
