//! Honeytrail Core
//!
//! Core types, errors, and configuration shared by the honeytrail tailer,
//! classifier, forwarder, and collector.

pub mod config;
pub mod error;
pub mod event;

// Re-export commonly used types
pub use config::Config;
pub use error::{ForwardError, HoneytrailError, Result, StoreError, TailError};
pub use event::{Event, EventCandidate, LineOrigin, LogLine, UNKNOWN_IP};
