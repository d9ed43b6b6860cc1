//! Layered settings: defaults, then an optional key/value config file,
//! then the `BENCH_`-prefixed environment, matching the precedence the
//! `config` subcommand reports.
//!
//! CLI flags are the final, highest-precedence layer; [`crate::cli`]
//! applies them on top of the [`BenchmarkSettings`] this module
//! produces rather than feeding them through `config` itself, since
//! clap already owns their parsing and defaults.

use crate::callbacks::BufferFormat;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "INFO".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkSettings {
    pub coordinator_ip: String,
    pub coordinator_router_port: u16,
    pub coordinator_pub_port: u16,
    pub data_port_start: u16,
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            coordinator_ip: "127.0.0.1".into(),
            coordinator_router_port: 5555,
            coordinator_pub_port: 5556,
            data_port_start: 6000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TestMatrixSettings {
    pub message_counts: Vec<usize>,
    pub message_sizes: Vec<usize>,
    pub max_message_size: Option<usize>,
    pub zero_copy_options: Vec<bool>,
    pub pub_sub_options: Vec<bool>,
    pub send_hwm_values: Vec<usize>,
    pub recv_hwm_values: Vec<usize>,
}

impl Default for TestMatrixSettings {
    fn default() -> Self {
        Self {
            message_counts: vec![10_000],
            message_sizes: vec![64, 1024, 65536],
            max_message_size: None,
            zero_copy_options: vec![false],
            pub_sub_options: vec![false],
            send_hwm_values: vec![1000],
            recv_hwm_values: vec![1000],
        }
    }
}

impl TestMatrixSettings {
    /// Small matrix for `--short` smoke runs: one cell per axis, so
    /// the Cartesian product collapses to a single test.
    pub fn short() -> Self {
        Self {
            message_counts: vec![100],
            message_sizes: vec![64],
            max_message_size: None,
            zero_copy_options: vec![false],
            pub_sub_options: vec![false],
            send_hwm_values: vec![100],
            recv_hwm_values: vec![100],
        }
    }

    /// Expands the Cartesian product of every axis into the ordered
    /// test matrix the coordinator iterates, filtering out any cell
    /// whose size exceeds `max_message_size` when that filter is set.
    pub fn expand(&self) -> Vec<crate::messages::TestConfig> {
        let mut out = Vec::new();
        let mut test_number = 0;
        for &count in &self.message_counts {
            for &size in &self.message_sizes {
                if let Some(max) = self.max_message_size {
                    if size > max {
                        continue;
                    }
                }
                for &zero_copy in &self.zero_copy_options {
                    for &pub_mode in &self.pub_sub_options {
                        for &send_hwm in &self.send_hwm_values {
                            for &recv_hwm in &self.recv_hwm_values {
                                out.push(crate::messages::TestConfig {
                                    test_number,
                                    count,
                                    size,
                                    zero_copy,
                                    pub_mode,
                                    send_hwm,
                                    recv_hwm,
                                    receiver_callback: Default::default(),
                                });
                                test_number += 1;
                            }
                        }
                    }
                }
            }
        }
        out
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerSettings {
    pub sender_bind: bool,
    pub setup_delay_s: f64,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            sender_bind: false,
            setup_delay_s: 1.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputSettings {
    pub add_date_time: bool,
    pub results_file: PathBuf,
    pub config_file: PathBuf,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            add_date_time: false,
            results_file: PathBuf::from("results.csv"),
            config_file: PathBuf::from("settings.json"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CallbackSettings {
    pub npy_base_directory: Option<PathBuf>,
    pub npy_buffer_size_bytes: usize,
    pub npy_buffer_format: BufferFormat,
}

impl Default for CallbackSettings {
    fn default() -> Self {
        Self {
            npy_base_directory: None,
            npy_buffer_size_bytes: 1024 * 1024,
            npy_buffer_format: BufferFormat::Binary,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BenchmarkSettings {
    pub num_pairs: usize,
    pub receivers_per_sender: usize,
    pub short_test: bool,
    pub logging: LoggingSettings,
    pub network: NetworkSettings,
    pub test_matrix: TestMatrixSettings,
    pub worker: WorkerSettings,
    pub output: OutputSettings,
    pub callbacks: CallbackSettings,
}

impl Default for BenchmarkSettings {
    fn default() -> Self {
        Self {
            num_pairs: 1,
            receivers_per_sender: 1,
            short_test: false,
            logging: LoggingSettings::default(),
            network: NetworkSettings::default(),
            test_matrix: TestMatrixSettings::default(),
            worker: WorkerSettings::default(),
            output: OutputSettings::default(),
            callbacks: CallbackSettings::default(),
        }
    }
}

impl BenchmarkSettings {
    /// Loads defaults, an optional key/value config file, then the
    /// `BENCH_`-prefixed environment, in that increasing-precedence
    /// order. `config_file` may point at a TOML, YAML, or JSON file;
    /// the `config` crate picks the format from its extension.
    pub fn load(config_file: Option<&std::path::Path>) -> anyhow::Result<Self> {
        let defaults = Self::default();
        let mut builder = config::Config::builder()
            .add_source(config::Config::try_from(&defaults)?);

        if let Some(path) = config_file {
            builder = builder.add_source(config::File::from(path).required(false));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("BENCH")
                .separator("__")
                .try_parsing(true),
        );

        builder
            .build()
            .context("failed to assemble layered configuration")?
            .try_deserialize()
            .context("failed to deserialize layered configuration into BenchmarkSettings")
    }

    pub fn matrix(&self) -> Vec<crate::messages::TestConfig> {
        if self.short_test {
            TestMatrixSettings::short().expand()
        } else {
            self.test_matrix.expand()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_network_ports() {
        let settings = BenchmarkSettings::default();
        assert_eq!(settings.network.coordinator_router_port, 5555);
        assert_eq!(settings.network.coordinator_pub_port, 5556);
        assert_eq!(settings.network.data_port_start, 6000);
        assert_eq!(settings.worker.setup_delay_s, 1.0);
    }

    #[test]
    fn short_matrix_expands_to_exactly_one_test() {
        let matrix = TestMatrixSettings::short().expand();
        assert_eq!(matrix.len(), 1);
        assert_eq!(matrix[0].count, 100);
        assert_eq!(matrix[0].size, 64);
    }

    #[test]
    fn max_message_size_filters_the_product() {
        let settings = TestMatrixSettings {
            message_counts: vec![10],
            message_sizes: vec![64, 128, 256],
            max_message_size: Some(128),
            zero_copy_options: vec![false],
            pub_sub_options: vec![false],
            send_hwm_values: vec![100],
            recv_hwm_values: vec![100],
        };
        let matrix = settings.expand();
        assert_eq!(matrix.len(), 2);
        assert!(matrix.iter().all(|c| c.size <= 128));
    }

    #[test]
    fn test_numbers_are_assigned_sequentially() {
        let settings = TestMatrixSettings {
            message_counts: vec![10],
            message_sizes: vec![64, 128],
            max_message_size: None,
            zero_copy_options: vec![true, false],
            pub_sub_options: vec![false],
            send_hwm_values: vec![100],
            recv_hwm_values: vec![100],
        };
        let matrix = settings.expand();
        let numbers: Vec<usize> = matrix.iter().map(|c| c.test_number).collect();
        assert_eq!(numbers, vec![0, 1, 2, 3]);
    }
}
