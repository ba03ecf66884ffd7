//! The `s3stress` command line tool.
//!
//! This builds on top of [`s3stress_engine`] and provides the parts a benchmark run needs besides
//! the engine itself: layered configuration, an HTTP object client, the `put` and `video`
//! workloads, progress display and result printing.
#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

pub mod cli;
pub mod config;
pub mod http;
pub mod observability;
pub mod payload;
pub mod progress;
pub mod report;
pub mod run;
pub mod transport;
pub mod workload;
