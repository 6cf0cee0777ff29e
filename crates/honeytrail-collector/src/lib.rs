//! Honeytrail Collector
//!
//! Receives classified events over HTTP, assigns identifiers, persists
//! them in SQLite and serves the most recent ones back, newest first.

pub mod metrics;
pub mod server;
pub mod service;
pub mod store;

pub use metrics::CollectorMetrics;
pub use server::CollectorServer;
pub use service::{IngestError, IngestionService};
pub use store::EventStore;
