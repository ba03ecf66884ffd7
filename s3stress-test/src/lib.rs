//! Test utilities for the s3stress engine and CLI.
//!
//! This crate provides an in-memory object store to run benchmarks against, and a logger for
//! tests. See the modules for all available utilities.

pub mod server;
pub mod tracing;
