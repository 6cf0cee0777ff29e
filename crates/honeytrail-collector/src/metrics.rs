//! Prometheus metrics for the collector

use honeytrail_core::HoneytrailError;
use prometheus::{Counter, Encoder, Registry, TextEncoder};
use tracing::error;

/// Collector counters, served on `/metrics`
pub struct CollectorMetrics {
    registry: Registry,
    events_ingested_total: Counter,
    ingest_rejected_total: Counter,
    store_errors_total: Counter,
    list_requests_total: Counter,
}

fn counter(registry: &Registry, name: &str, help: &str) -> Result<Counter, HoneytrailError> {
    let counter = Counter::new(name, help)
        .map_err(|e| HoneytrailError::Server(format!("Failed to create metric: {}", e)))?;
    registry
        .register(Box::new(counter.clone()))
        .map_err(|e| HoneytrailError::Server(format!("Failed to register metric: {}", e)))?;
    Ok(counter)
}

impl CollectorMetrics {
    pub fn new() -> Result<Self, HoneytrailError> {
        let registry = Registry::new();

        let events_ingested_total = counter(
            &registry,
            "honeytrail_events_ingested_total",
            "Events accepted and stored",
        )?;
        let ingest_rejected_total = counter(
            &registry,
            "honeytrail_ingest_rejected_total",
            "Ingest requests rejected as malformed",
        )?;
        let store_errors_total = counter(
            &registry,
            "honeytrail_store_errors_total",
            "Storage operations that failed",
        )?;
        let list_requests_total = counter(
            &registry,
            "honeytrail_list_requests_total",
            "Event list requests served",
        )?;

        Ok(Self {
            registry,
            events_ingested_total,
            ingest_rejected_total,
            store_errors_total,
            list_requests_total,
        })
    }

    pub fn record_ingested(&self) {
        self.events_ingested_total.inc();
    }

    pub fn record_rejected(&self) {
        self.ingest_rejected_total.inc();
    }

    pub fn record_store_error(&self) {
        self.store_errors_total.inc();
    }

    pub fn record_list(&self) {
        self.list_requests_total.inc();
    }

    /// Metrics in Prometheus text format
    pub fn gather(&self) -> String {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buffer) {
            error!(error = %e, "Failed to encode metrics");
            return String::new();
        }
        String::from_utf8_lossy(&buffer).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = CollectorMetrics::new().unwrap();
        assert!(metrics.gather().contains("honeytrail_events_ingested_total 0"));
    }

    #[test]
    fn test_counters() {
        let metrics = CollectorMetrics::new().unwrap();
        metrics.record_ingested();
        metrics.record_ingested();
        metrics.record_rejected();
        metrics.record_store_error();
        metrics.record_list();

        let text = metrics.gather();
        assert!(text.contains("honeytrail_events_ingested_total 2"));
        assert!(text.contains("honeytrail_ingest_rejected_total 1"));
        assert!(text.contains("honeytrail_store_errors_total 1"));
        assert!(text.contains("honeytrail_list_requests_total 1"));
    }

    #[test]
    fn test_instances_are_independent() {
        let a = CollectorMetrics::new().unwrap();
        let b = CollectorMetrics::new().unwrap();
        a.record_list();
        assert!(b.gather().contains("honeytrail_list_requests_total 0"));
    }
}
