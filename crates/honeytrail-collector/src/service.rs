use crate::metrics::CollectorMetrics;
use crate::store::EventStore;
use chrono::Utc;
use honeytrail_core::config::CollectorConfig;
use honeytrail_core::{Event, EventCandidate, StoreError};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, warn};
use uuid::Uuid;

/// Why an ingest or list call failed
#[derive(Debug, Error)]
pub enum IngestError {
    /// The request itself is at fault; nothing was stored
    #[error("Invalid event: {0}")]
    Invalid(String),

    /// Storage failed; the caller may retry
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Accepts events, assigns identity and answers recent-event queries
#[derive(Clone)]
pub struct IngestionService {
    store: EventStore,
    metrics: Arc<CollectorMetrics>,
    default_limit: usize,
    max_limit: usize,
}

impl IngestionService {
    pub fn new(store: EventStore, metrics: Arc<CollectorMetrics>, config: &CollectorConfig) -> Self {
        Self {
            store,
            metrics,
            default_limit: config.default_limit,
            max_limit: config.max_limit,
        }
    }

    pub fn metrics(&self) -> &Arc<CollectorMetrics> {
        &self.metrics
    }

    /// Decode a request body into a candidate
    pub fn parse_candidate(&self, body: &[u8]) -> Result<EventCandidate, IngestError> {
        let candidate: EventCandidate = serde_json::from_slice(body).map_err(|e| {
            self.metrics.record_rejected();
            warn!(error = %e, body = %String::from_utf8_lossy(body), "Rejected malformed event");
            IngestError::Invalid(e.to_string())
        })?;
        Ok(candidate)
    }

    /// Persist a candidate and return the stored event
    pub async fn ingest(&self, candidate: EventCandidate) -> Result<Event, IngestError> {
        if !candidate.has_payload() {
            self.metrics.record_rejected();
            warn!("Rejected event with neither command nor metadata");
            return Err(IngestError::Invalid(
                "event needs a command or metadata".to_string(),
            ));
        }

        let event = Event::from_candidate(candidate, Uuid::new_v4().to_string(), Utc::now());
        let store = self.store.clone();

        let result = tokio::task::spawn_blocking(move || store.insert(&event).map(|()| event))
            .await
            .map_err(|e| StoreError::Task(e.to_string()))
            .and_then(|inner| inner);

        match result {
            Ok(event) => {
                self.metrics.record_ingested();
                debug!(id = %event.id, src_ip = %event.src_ip, "Event stored");
                Ok(event)
            }
            Err(e) => {
                self.metrics.record_store_error();
                error!(error = %e, "Failed to store event");
                Err(e.into())
            }
        }
    }

    /// Most recent events, newest first.
    ///
    /// `None` means the default limit; anything above the cap is lowered to it.
    pub async fn list_events(&self, limit: Option<usize>) -> Result<Vec<Event>, IngestError> {
        self.metrics.record_list();
        let limit = self.effective_limit(limit);
        let store = self.store.clone();

        let result = tokio::task::spawn_blocking(move || store.recent(limit))
            .await
            .map_err(|e| StoreError::Task(e.to_string()))
            .and_then(|inner| inner);

        result.map_err(|e| {
            self.metrics.record_store_error();
            error!(error = %e, "Failed to list events");
            e.into()
        })
    }

    pub fn effective_limit(&self, limit: Option<usize>) -> usize {
        limit.unwrap_or(self.default_limit).min(self.max_limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone};

    fn service() -> IngestionService {
        IngestionService::new(
            EventStore::open_in_memory().unwrap(),
            Arc::new(CollectorMetrics::new().unwrap()),
            &CollectorConfig {
                default_limit: 3,
                max_limit: 5,
                ..Default::default()
            },
        )
    }

    #[tokio::test]
    async fn test_ingest_fills_defaults() {
        let service = service();
        let before = Utc::now();

        let event = service
            .ingest(EventCandidate::new("whoami", "[x] CMD: whoami"))
            .await
            .unwrap();

        assert_eq!(event.src_ip, "unknown");
        assert!(event.timestamp >= before);
        assert!(Uuid::parse_str(&event.id).is_ok());
    }

    #[tokio::test]
    async fn test_ingest_keeps_supplied_timestamp() {
        let service = service();
        let ts = Utc.with_ymd_and_hms(2023, 6, 1, 8, 0, 0).unwrap();

        let event = service
            .ingest(EventCandidate::new("ls", "CMD: ls").with_timestamp(ts))
            .await
            .unwrap();
        assert_eq!(event.timestamp, ts);

        let listed = service.list_events(None).await.unwrap();
        assert_eq!(listed[0].timestamp, ts);
    }

    #[tokio::test]
    async fn test_listed_event_matches_ingested_event() {
        let service = service();
        let ts = DateTime::parse_from_rfc3339("2024-05-01T10:00:00.123456789Z")
            .unwrap()
            .with_timezone(&Utc);

        let stored = service
            .ingest(
                EventCandidate::new("uname -a", "[x,1,10.0.0.5] CMD: uname -a")
                    .with_timestamp(ts)
                    .with_src_ip("10.0.0.5")
                    .with_src_port(40022)
                    .with_session_id("1")
                    .with_dest_service("ssh")
                    .with_username("root"),
            )
            .await
            .unwrap();

        let listed = service.list_events(None).await.unwrap();
        assert_eq!(listed, vec![stored]);
    }

    #[tokio::test]
    async fn test_now_timestamps_survive_storage() {
        let service = service();
        let stored = service
            .ingest(EventCandidate::new("id", "CMD: id").with_timestamp(Utc::now()))
            .await
            .unwrap();

        let listed = service.list_events(Some(1)).await.unwrap();
        assert_eq!(listed[0].timestamp, stored.timestamp);
    }

    #[tokio::test]
    async fn test_empty_candidate_rejected() {
        let service = service();
        let result = service.ingest(EventCandidate::default()).await;
        assert!(matches!(result, Err(IngestError::Invalid(_))));
        assert!(service.list_events(None).await.unwrap().is_empty());
    }

    #[test]
    fn test_parse_candidate() {
        let service = service();
        let candidate = service
            .parse_candidate(br#"{"command":"id","src_port":2222,"extra":true}"#)
            .unwrap();
        assert_eq!(candidate.command.as_deref(), Some("id"));
        assert_eq!(candidate.src_port, Some(2222));

        assert!(service.parse_candidate(b"{not json").is_err());
        assert!(service.parse_candidate(br#"{"src_port":70000}"#).is_err());
        assert!(service.parse_candidate(br#"{"timestamp":"soon"}"#).is_err());
    }

    #[tokio::test]
    async fn test_limits_are_defaulted_and_capped() {
        let service = service();
        for i in 0..8 {
            service
                .ingest(EventCandidate::new(format!("cmd{}", i), "CMD"))
                .await
                .unwrap();
        }

        assert_eq!(service.list_events(None).await.unwrap().len(), 3);
        assert_eq!(service.list_events(Some(100)).await.unwrap().len(), 5);
        assert_eq!(service.list_events(Some(2)).await.unwrap().len(), 2);
        assert!(service.list_events(Some(0)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_ingest_assigns_distinct_ids() {
        let service = service();
        let handles: Vec<_> = (0..50)
            .map(|i| {
                let service = service.clone();
                tokio::spawn(async move {
                    service
                        .ingest(EventCandidate::new(format!("cmd{}", i), "CMD"))
                        .await
                        .unwrap()
                        .id
                })
            })
            .collect();

        let mut ids = std::collections::HashSet::new();
        for handle in handles {
            assert!(ids.insert(handle.await.unwrap()));
        }
        assert_eq!(ids.len(), 50);
    }
}
