//! # Distributed Push/Pull and Pub/Sub Transport Benchmark
//!
//! A coordinator process and a fleet of worker processes that sweep a
//! matrix of message sizes, counts, zero-copy settings, and
//! high-water-mark tunings across configurable sender-to-receiver
//! fan-out shapes, measuring throughput between one sender and its
//! group of receivers.

pub mod callbacks;
pub mod cli;
pub mod config;
pub mod coordinator;
pub mod messages;
pub mod metrics;
pub mod registry;
pub mod results;
pub mod transport;
pub mod worker;

pub use config::BenchmarkSettings;
pub use messages::{Role, TestConfig, TestResult, WorkerState};

/// The current version of the benchmark suite.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
