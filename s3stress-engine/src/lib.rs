//! The benchmark engine drives a pluggable [`Workload`] against one or more storage endpoints.
//!
//! A run is made of four parts:
//!
//! - [`EndpointPool`] spreads operations over endpoints using a [`HostSelect`] policy.
//! - [`Executor`] runs a fixed number of workers that all start at the same instant.
//! - [`Collector`] gathers the measured [`Operation`]s and can end a run early once throughput
//!   is stable.
//! - [`Lifecycle`] and [`Benchmark`] move a run through its stages and record their outcome.
//!
//! Collected operations are persisted with [`codec`] and summarized with [`analysis`].
#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

pub mod analysis;
pub mod autoterm;
pub mod codec;
pub mod collector;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod executor;
pub mod lifecycle;
pub mod operation;
pub mod pool;
pub mod signal;
pub mod workload;

pub use autoterm::AutoTerm;
pub use collector::Collector;
pub use config::RunConfig;
pub use endpoint::{Endpoint, Secret};
pub use error::{Error, Result};
pub use executor::Executor;
pub use lifecycle::{Benchmark, Lifecycle, RunReport, Stage};
pub use operation::{OpType, Operation, Operations};
pub use pool::{EndpointPool, HostSelect, Lease};
pub use workload::{Progress, Worker, Workload};
