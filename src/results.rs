//! Persisted output: an append-mode CSV of per-worker test results
//! and a one-shot JSON snapshot of the effective settings.
//!
//! Owned exclusively by the coordinator; appends happen from the
//! single control-loop task, so no internal locking is needed here.

use crate::config::{BenchmarkSettings, OutputSettings};
use crate::messages::TestResult;
use anyhow::Context;
use chrono::Utc;
use std::path::{Path, PathBuf};

pub struct ResultsManager {
    writer: csv::Writer<std::fs::File>,
}

impl ResultsManager {
    /// Opens (creating if absent) the results file at `path` in
    /// append mode, writing the header row only if the file is new.
    pub fn create(path: &Path) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create results directory {}", parent.display()))?;
            }
        }
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open results file {}", path.display()))?;
        let needs_header = file
            .metadata()
            .with_context(|| format!("failed to stat results file {}", path.display()))?
            .len()
            == 0;

        let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(file);
        if needs_header {
            writer.write_record([
                "worker_id",
                "role",
                "config",
                "messages_sent",
                "messages_received",
                "throughput_mbps",
                "start_time",
                "end_time",
            ])?;
            writer.flush()?;
        }
        Ok(Self { writer })
    }

    /// Appends one row per result, then flushes — each test's bucket
    /// must be durable on disk before the coordinator moves on.
    pub fn append(&mut self, results: &[TestResult]) -> anyhow::Result<()> {
        for result in results {
            let config_json = serde_json::to_string(&result.config)
                .context("failed to serialize test config for results row")?;
            self.writer.write_record([
                result.worker_id.as_str(),
                &result.role.to_string(),
                &config_json,
                &result.messages_sent.map(|v| v.to_string()).unwrap_or_default(),
                &result.messages_received.map(|v| v.to_string()).unwrap_or_default(),
                &result.throughput_mbps.to_string(),
                &result.start_time.to_rfc3339(),
                &result.end_time.to_rfc3339(),
            ])?;
        }
        self.writer.flush().context("failed to flush results file")?;
        Ok(())
    }

    /// Writes the resolved settings to `path` as pretty JSON, for
    /// reproducing a run later.
    pub fn write_settings_snapshot(settings: &BenchmarkSettings, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create settings directory {}", parent.display()))?;
            }
        }
        let json = serde_json::to_string_pretty(settings)
            .context("failed to serialize settings snapshot")?;
        std::fs::write(path, json)
            .with_context(|| format!("failed to write settings snapshot {}", path.display()))
    }
}

/// Resolves the results-file and config-file paths from `output`,
/// prefixing both with the same `YYYYMMDD_HHMMSS_` stamp when
/// `add_date_time` is set, so a single run's two output files always
/// share one timestamp.
pub fn resolve_output_paths(output: &OutputSettings) -> (PathBuf, PathBuf) {
    if !output.add_date_time {
        return (output.results_file.clone(), output.config_file.clone());
    }
    let stamp = Utc::now().format("%Y%m%d_%H%M%S").to_string();
    (stamp_path(&output.results_file, &stamp), stamp_path(&output.config_file, &stamp))
}

fn stamp_path(path: &Path, stamp: &str) -> PathBuf {
    let parent = path.parent().filter(|p| !p.as_os_str().is_empty());
    let filename = path
        .file_name()
        .map(|f| f.to_string_lossy().to_string())
        .unwrap_or_default();
    let stamped = format!("{stamp}_{filename}");
    match parent {
        Some(parent) => parent.join(stamped),
        None => PathBuf::from(stamped),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::Role;

    fn sample_result() -> TestResult {
        TestResult {
            worker_id: "sender-0".into(),
            role: Role::Sender,
            config: crate::messages::TestConfig {
                test_number: 0,
                count: 100,
                size: 64,
                zero_copy: false,
                pub_mode: false,
                send_hwm: 1000,
                recv_hwm: 1000,
                receiver_callback: Default::default(),
            },
            messages_sent: Some(100),
            messages_received: None,
            throughput_mbps: 1.23,
            start_time: Utc::now(),
            end_time: Utc::now(),
        }
    }

    #[test]
    fn creating_twice_does_not_duplicate_the_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results.csv");

        {
            let mut manager = ResultsManager::create(&path).unwrap();
            manager.append(&[sample_result()]).unwrap();
        }
        {
            let mut manager = ResultsManager::create(&path).unwrap();
            manager.append(&[sample_result()]).unwrap();
        }

        let contents = std::fs::read_to_string(&path).unwrap();
        let header_count = contents.matches("worker_id,role,config").count();
        assert_eq!(header_count, 1);
        assert_eq!(contents.lines().count(), 3); // header + 2 rows
    }

    #[test]
    fn stamped_paths_share_one_timestamp() {
        let output = OutputSettings {
            add_date_time: true,
            results_file: PathBuf::from("out/results.csv"),
            config_file: PathBuf::from("out/settings.json"),
        };
        let (results_path, config_path) = resolve_output_paths(&output);
        let results_stamp = results_path.file_name().unwrap().to_string_lossy()[..15].to_string();
        let config_stamp = config_path.file_name().unwrap().to_string_lossy()[..15].to_string();
        assert_eq!(results_stamp, config_stamp);
    }
}
