//! Receiver-side sinks for incoming data-plane payloads.
//!
//! Mirrors the two-variant [`crate::messages::ReceiveCallback`] tag:
//! [`NoneCallback`] does nothing, [`BufferedCallback`] accumulates
//! payloads into an in-memory buffer and flushes it to disk once the
//! buffer crosses a size threshold (or immediately, per-message, when
//! the threshold is zero).

use crate::config::CallbackSettings;
use crate::messages::{ReceiveCallback, TestConfig};
use anyhow::Context;
use std::path::{Path, PathBuf};

/// On-disk encoding for a flushed buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BufferFormat {
    Binary,
    Npy,
}

impl Default for BufferFormat {
    fn default() -> Self {
        BufferFormat::Binary
    }
}

pub trait MessageSink: Send {
    fn on_message(&mut self, payload: &[u8], message_number: usize, config: &TestConfig);
    fn finalize(&mut self) -> anyhow::Result<()>;
}

/// No-op sink: the default when a test's `receiver_callback` is `None`.
pub struct NoneCallback;

impl MessageSink for NoneCallback {
    fn on_message(&mut self, _payload: &[u8], _message_number: usize, _config: &TestConfig) {}
    fn finalize(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Buffers received payloads and flushes them to `output_dir` once the
/// buffer reaches `buffer_size` bytes (flushing after every message
/// when `buffer_size` is zero). Each flush writes one file named after
/// the message range it covers, so a crashed or killed worker leaves
/// partial-but-readable output behind instead of one unfinished file.
pub struct BufferedCallback {
    output_dir: PathBuf,
    buffer_size: usize,
    format: BufferFormat,
    buffer: Vec<u8>,
    buffer_start_message: usize,
    messages_in_buffer: usize,
    file_counter: usize,
    test_number: Option<usize>,
}

impl BufferedCallback {
    pub fn new(output_dir: PathBuf, buffer_size: usize, format: BufferFormat) -> Self {
        Self {
            output_dir,
            buffer_size,
            format,
            buffer: Vec::new(),
            buffer_start_message: 1,
            messages_in_buffer: 0,
            file_counter: 0,
            test_number: None,
        }
    }

    fn should_flush(&self) -> bool {
        self.buffer_size == 0 || self.buffer.len() >= self.buffer_size
    }

    fn flush(&mut self, test_number: usize, end_message: usize) -> anyhow::Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let basename = if self.buffer_start_message == end_message {
            format!("test_{test_number:03}_message_{:06}", self.buffer_start_message)
        } else {
            format!(
                "test_{test_number:03}_messages_{:06}_to_{:06}",
                self.buffer_start_message, end_message
            )
        };
        let suffix = match self.format {
            BufferFormat::Npy => "npy",
            BufferFormat::Binary => "bin",
        };
        let filename = format!("{basename}_part_{:03}.{suffix}", self.file_counter);
        let filepath = self.output_dir.join(&filename);

        match self.format {
            BufferFormat::Npy => write_npy_u8(&filepath, &self.buffer),
            BufferFormat::Binary => std::fs::write(&filepath, &self.buffer),
        }
        .with_context(|| format!("failed to write buffer to {}", filepath.display()))?;

        self.buffer.clear();
        self.messages_in_buffer = 0;
        self.file_counter += 1;
        self.buffer_start_message = end_message + 1;
        Ok(())
    }
}

impl MessageSink for BufferedCallback {
    fn on_message(&mut self, payload: &[u8], message_number: usize, config: &TestConfig) {
        if self.test_number.is_none() {
            self.test_number = Some(config.test_number);
        }
        self.buffer.extend_from_slice(payload);
        self.messages_in_buffer += 1;

        if self.should_flush() {
            let test_number = self.test_number.unwrap_or(config.test_number);
            if let Err(e) = self.flush(test_number, message_number) {
                tracing::error!(error = %e, "buffered callback flush failed");
            }
        }
    }

    fn finalize(&mut self) -> anyhow::Result<()> {
        if let Some(test_number) = self.test_number {
            if !self.buffer.is_empty() {
                let end_message =
                    self.buffer_start_message + self.messages_in_buffer.saturating_sub(1);
                self.flush(test_number, end_message)?;
            }
        }
        Ok(())
    }
}

/// Minimal single-segment `.npy` writer for a flat `uint8` array —
/// just enough header to make the file loadable with `numpy.load`,
/// with no dependency on a numpy-format crate.
fn write_npy_u8(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let mut header = format!(
        "{{'descr': '|u1', 'fortran_order': False, 'shape': ({},), }}",
        data.len()
    );
    // Pad so magic(6) + version(2) + header_len(2) + header is a multiple of 64.
    let prefix_len = 6 + 2 + 2;
    let unpadded = prefix_len + header.len() + 1;
    let padded = unpadded.div_ceil(64) * 64;
    header.push_str(&" ".repeat(padded - unpadded));
    header.push('\n');

    let mut out = Vec::with_capacity(padded + data.len());
    out.extend_from_slice(b"\x93NUMPY");
    out.push(1); // major version
    out.push(0); // minor version
    out.extend_from_slice(&(header.len() as u16).to_le_bytes());
    out.extend_from_slice(header.as_bytes());
    out.extend_from_slice(data);

    std::fs::write(path, out)
}

/// Builds the sink a test's [`ReceiveCallback`] tag names. `WriteNpy`
/// requires `callbacks.npy_base_directory` to be set and creates a
/// worker-specific subdirectory under it, named with a fresh UUID so
/// concurrent workers never collide.
pub fn build(
    callback: ReceiveCallback,
    settings: &CallbackSettings,
) -> anyhow::Result<Box<dyn MessageSink>> {
    match callback {
        ReceiveCallback::None => Ok(Box::new(NoneCallback)),
        ReceiveCallback::WriteNpy => {
            let base_dir = settings
                .npy_base_directory
                .as_ref()
                .context("write_npy callback requires callbacks.npy_base_directory to be set")?;
            let output_dir = base_dir.join(uuid::Uuid::new_v4().to_string());
            std::fs::create_dir_all(&output_dir).with_context(|| {
                format!("failed to create callback output directory {}", output_dir.display())
            })?;
            Ok(Box::new(BufferedCallback::new(
                output_dir,
                settings.npy_buffer_size_bytes,
                settings.npy_buffer_format,
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::ReceiveCallback as RC;

    fn config() -> TestConfig {
        TestConfig {
            test_number: 1,
            count: 10,
            size: 4,
            zero_copy: false,
            pub_mode: false,
            send_hwm: 1000,
            recv_hwm: 1000,
            receiver_callback: RC::None,
        }
    }

    #[test]
    fn none_callback_is_inert() {
        let mut sink = NoneCallback;
        sink.on_message(&[1, 2, 3], 1, &config());
        sink.finalize().unwrap();
    }

    #[test]
    fn buffered_callback_flushes_immediately_at_zero_buffer_size() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = BufferedCallback::new(dir.path().to_path_buf(), 0, BufferFormat::Binary);
        sink.on_message(&[1, 2, 3, 4], 1, &config());

        let entries: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn buffered_callback_accumulates_until_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = BufferedCallback::new(dir.path().to_path_buf(), 8, BufferFormat::Binary);
        sink.on_message(&[1, 2, 3, 4], 1, &config());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);

        sink.on_message(&[5, 6, 7, 8], 2, &config());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn finalize_flushes_remaining_partial_buffer() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = BufferedCallback::new(dir.path().to_path_buf(), 1024, BufferFormat::Binary);
        sink.on_message(&[1, 2, 3], 1, &config());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);

        sink.finalize().unwrap();
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    /// `end_message` must come from the number of buffered messages, not
    /// the byte length of the buffer — a multi-byte payload would
    /// otherwise name the file after a byte offset instead of a message
    /// index.
    #[test]
    fn finalize_names_the_file_after_message_count_not_byte_length() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = BufferedCallback::new(dir.path().to_path_buf(), 1024, BufferFormat::Binary);
        sink.on_message(&[1, 2, 3, 4], 1, &config());
        sink.on_message(&[5, 6, 7, 8], 2, &config());
        sink.finalize().unwrap();

        let entries: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(
            entries,
            vec!["test_001_messages_000001_to_000002_part_000.bin".to_string()]
        );
    }

    #[test]
    fn npy_file_carries_a_valid_magic_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.npy");
        write_npy_u8(&path, &[1, 2, 3, 4]).unwrap();
        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(&bytes[0..6], b"\x93NUMPY");
    }
}
