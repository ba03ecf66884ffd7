//! Terminal progress display of a running benchmark.

use std::time::Duration;

use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};
use s3stress_engine::{Lifecycle, Stage};

const TICK: Duration = Duration::from_millis(100);

/// Renders the stages of `lifecycle` until cleanup has ended.
///
/// Prepare is shown as a progress bar fed by the lifecycle's progress channel, the later stages as
/// spinners.
pub async fn track(lifecycle: &Lifecycle) -> Result<()> {
    lifecycle.wait_started(Stage::Prepare).await;
    let bar = ProgressBar::new(100)
        .with_style(ProgressStyle::with_template("{msg} {wide_bar} {percent}%")?)
        .with_message("Preparing:");
    bar.enable_steady_tick(TICK);

    // The channel closes once Prepare has ended.
    let mut progress = lifecycle.prepare_progress();
    loop {
        bar.set_position((*progress.borrow_and_update() * 100.0) as u64);
        if progress.changed().await.is_err() {
            break;
        }
    }
    bar.finish_and_clear();

    spinner(lifecycle, Stage::Running, "Running benchmark:").await?;
    spinner(lifecycle, Stage::Cleanup, "Cleaning up:").await?;
    Ok(())
}

async fn spinner(lifecycle: &Lifecycle, stage: Stage, message: &'static str) -> Result<()> {
    lifecycle.wait_started(stage).await;
    if lifecycle.record(stage).skipped {
        return Ok(());
    }

    let bar = ProgressBar::new_spinner()
        .with_style(ProgressStyle::with_template("{spinner} {msg} {elapsed}")?)
        .with_message(message);
    bar.enable_steady_tick(TICK);

    lifecycle.wait_finished(stage).await;
    bar.finish_and_clear();
    Ok(())
}
