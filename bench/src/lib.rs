//! Benchmarks for the Bappa warehouse.
//!
//! - **Microbenchmarks**: individual storage operations (create, iterate, reshape, deferral)
//! - **Scenario benchmarks**: a particle workload that destroys and respawns during iteration
//!
//! # Running Benchmarks
//!
//! ```bash
//! # Run all benchmarks
//! cargo bench -p bappa_bench
//!
//! # Run specific benchmark group
//! cargo bench -p bappa_bench -- create
//!
//! # Compare against the raw cache strategy
//! cargo bench -p bappa_bench --features unsafe-storage
//! ```
//!
//! Results are written to `target/criterion/` with HTML reports for visualization.

pub mod components;
pub mod scenarios;
