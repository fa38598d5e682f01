//! Benchmark utilities for Rusty Streams.
//!
//! This crate provides the benchmarking infrastructure for the dispatch engine and registry:
//!
//! - **Microbenchmarks**: Individual operations in isolation (subscribe, dispose, broadcast
//!   fan-out, run-once drain, registry lookup)
//! - **Scenario benchmarks**: Game-like workloads with many entity contexts
//!
//! # Running Benchmarks
//!
//! ```bash
//! # Run all benchmarks
//! cargo bench -p rusty_streams_bench
//!
//! # Run specific benchmark group
//! cargo bench -p rusty_streams_bench -- broadcast
//! ```
//!
//! # Benchmark Results
//!
//! Results are written to `target/criterion/` with HTML reports for visualization.

pub mod events;
pub mod scenarios;
