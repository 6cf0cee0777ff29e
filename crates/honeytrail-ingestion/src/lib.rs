//! Honeytrail Ingestion
//!
//! Tailers that follow a live log source and emit raw lines in order.
//! Supports append-only files and the combined output of a process.

pub mod command;
pub mod file;
pub mod tailer;

pub use command::CommandTailer;
pub use file::FileTailer;
pub use tailer::Tailer;

use honeytrail_core::LogLine;
use tokio::sync::mpsc;

/// Default channel buffer size for raw lines
pub const DEFAULT_CHANNEL_SIZE: usize = 10_000;

/// Create a new channel for raw log lines
pub fn create_line_channel(buffer_size: usize) -> (mpsc::Sender<LogLine>, mpsc::Receiver<LogLine>) {
    mpsc::channel(buffer_size)
}

/// Turn one newline-delimited segment into line content.
///
/// Invalid UTF-8 is replaced rather than rejected; blank lines yield `None`.
pub(crate) fn decode_line(bytes: &[u8]) -> Option<String> {
    let content = String::from_utf8_lossy(bytes);
    let content = content.trim_end_matches(['\n', '\r']).trim_end();
    if content.is_empty() {
        None
    } else {
        Some(content.to_string())
    }
}
