//! Logging setup of the binary.

use std::env;

use tracing::Level;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{EnvFilter, prelude::*};

/// Installs the global subscriber, logging to stderr.
///
/// `RUST_LOG` may be a plain level, which is applied on top of the default directives, or a full
/// filter expression that replaces them.
pub fn init_tracing() {
    let (level, env_filter) = parse_rust_log();
    let format = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true);

    tracing_subscriber::registry()
        .with(format.with_filter(LevelFilter::from(level)))
        .with(env_filter)
        .init();
}

/// Splits `RUST_LOG` into the maximum level and the filter directives.
pub fn parse_rust_log() -> (Level, EnvFilter) {
    // Try to parse RUST_LOG as a simple level filter and apply default levels internally.
    // Otherwise, use it literally if the user knows which overrides they want to run.
    let level = match env::var(EnvFilter::DEFAULT_ENV) {
        Ok(value) => match value.parse::<Level>() {
            Ok(level) => level,
            Err(_) => return (Level::TRACE, EnvFilter::new(value)),
        },
        Err(_) => Level::INFO,
    };

    // This is the maximum verbosity that will be logged, we filter this down to `level`.
    let env_filter = EnvFilter::new(
        "INFO,\
        hyper_util=WARN,\
        reqwest=WARN,\
        s3stress=TRACE,\
        s3stress_cli=TRACE,\
        s3stress_engine=TRACE,\
        ",
    );

    (level, env_filter)
}
