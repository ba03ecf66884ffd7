//! Command line parsing and dispatch.

use std::path::PathBuf;

use anyhow::Result;
use argh::FromArgs;

use crate::config::Config;
use crate::{observability, run};

/// Object storage benchmark.
#[derive(Debug, FromArgs)]
struct Args {
    /// path to the YAML configuration file
    #[argh(option, short = 'c')]
    pub config: Option<PathBuf>,

    #[argh(subcommand)]
    pub command: Command,
}

#[derive(Debug, FromArgs)]
#[argh(subcommand)]
enum Command {
    Put(PutCommand),
    Video(VideoCommand),
    Plan(PlanCommand),
    Analyze(AnalyzeCommand),
    Version(VersionCommand),
}

/// upload objects as fast as possible
#[derive(Debug, FromArgs)]
#[argh(subcommand, name = "put")]
struct PutCommand {}

/// simulate continuous video ingestion
///
/// Prints the capacity plan of the configured channels, then uploads video segments into a
/// per-day, per-channel key layout.
#[derive(Debug, FromArgs)]
#[argh(subcommand, name = "video")]
struct VideoCommand {}

/// print the capacity plan of the video settings
#[derive(Debug, FromArgs)]
#[argh(subcommand, name = "plan")]
struct PlanCommand {}

/// print the statistics of a recorded dataset
#[derive(Debug, FromArgs)]
#[argh(subcommand, name = "analyze")]
struct AnalyzeCommand {
    /// path to a `.csv.zst` dataset
    #[argh(positional)]
    file: PathBuf,
}

/// print the s3stress version
#[derive(Default, Debug, FromArgs)]
#[argh(subcommand, name = "version")]
struct VersionCommand {}

/// Bootstrap the runtime and execute the CLI command.
pub fn execute() -> Result<()> {
    let args: Args = argh::from_env();

    // Special switch to just print the version and exit.
    if let Command::Version(_) = args.command {
        println!("{}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let config = Config::load(args.config.as_deref())?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .thread_name("main-rt")
        .enable_all()
        .build()?;
    let _runtime_guard = runtime.enter();

    observability::init_tracing();
    tracing::debug!(?config);

    runtime.block_on(async move {
        match args.command {
            Command::Put(PutCommand {}) => run::put(&config).await.map(drop),
            Command::Video(VideoCommand {}) => run::video(&config).await.map(drop),
            Command::Plan(PlanCommand {}) => run::plan(&config),
            Command::Analyze(AnalyzeCommand { file }) => run::analyze(&file),
            Command::Version(VersionCommand {}) => unreachable!(),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recorded_command_line_parses() {
        let config = Config {
            bucket: "bench".to_owned(),
            concurrency: 4,
            ..Default::default()
        };
        let line = config.command_line("put");
        let words: Vec<&str> = line.split(' ').skip_while(|w| w.contains('=')).collect();
        assert_eq!(words, ["s3stress", "put"]);

        let args = Args::from_args(&words[..1], &words[1..]).unwrap();
        assert!(matches!(args.command, Command::Put(_)));
        assert!(args.config.is_none());
    }
}
