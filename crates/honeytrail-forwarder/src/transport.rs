use async_trait::async_trait;
use honeytrail_core::{EventCandidate, ForwardError};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// Result of a single delivery attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// The collector stored the event
    Delivered { id: Option<String> },
    /// Network failure, timeout or a server-side error; worth retrying
    Transient(String),
    /// The collector refused the event; retrying would not help
    Permanent(String),
}

/// A way of getting one event to the collector
#[async_trait]
pub trait Transport: Send + Sync {
    /// Destination, for log messages
    fn endpoint(&self) -> &str;

    /// Make one delivery attempt
    async fn send(&self, event: &EventCandidate) -> SendOutcome;
}

/// Collector acknowledgement body
#[derive(Debug, Deserialize)]
struct IngestResponse {
    #[serde(default)]
    id: Option<String>,
}

/// Posts events as JSON to the collector's ingest endpoint
pub struct HttpTransport {
    endpoint: String,
    client: Client,
}

impl HttpTransport {
    /// Create a transport whose every attempt is bounded by `timeout`
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, ForwardError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ForwardError::Client(e.to_string()))?;

        Ok(Self {
            endpoint: endpoint.into(),
            client,
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn send(&self, event: &EventCandidate) -> SendOutcome {
        let response = match self.client.post(&self.endpoint).json(event).send().await {
            Ok(response) => response,
            Err(e) if e.is_builder() => return SendOutcome::Permanent(e.to_string()),
            Err(e) => return SendOutcome::Transient(e.to_string()),
        };

        let status = response.status();
        if status.is_success() {
            let id = response
                .json::<IngestResponse>()
                .await
                .ok()
                .and_then(|body| body.id);
            debug!(status = %status, id = ?id, "Collector accepted event");
            return SendOutcome::Delivered { id };
        }

        let body = response.text().await.unwrap_or_default();
        let reason = format!("collector returned {}: {}", status, body.trim());
        if is_retryable(status) {
            SendOutcome::Transient(reason)
        } else {
            SendOutcome::Permanent(reason)
        }
    }
}

/// Server errors, timeouts and throttling are temporary; other client
/// errors mean the event itself was refused
pub(crate) fn is_retryable(status: StatusCode) -> bool {
    status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event() -> EventCandidate {
        EventCandidate::new("whoami", "[x] CMD: whoami").with_src_ip("unknown")
    }

    #[test]
    fn test_is_retryable() {
        assert!(is_retryable(StatusCode::INTERNAL_SERVER_ERROR));
        assert!(is_retryable(StatusCode::SERVICE_UNAVAILABLE));
        assert!(is_retryable(StatusCode::TOO_MANY_REQUESTS));
        assert!(is_retryable(StatusCode::REQUEST_TIMEOUT));
        assert!(!is_retryable(StatusCode::BAD_REQUEST));
        assert!(!is_retryable(StatusCode::NOT_FOUND));
    }

    #[tokio::test]
    async fn test_delivered_returns_id() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/events")
            .match_header("content-type", "application/json")
            .match_body(mockito::Matcher::PartialJsonString(
                r#"{"command":"whoami","metadata":"[x] CMD: whoami"}"#.to_string(),
            ))
            .with_status(201)
            .with_header("content-type", "application/json")
            .with_body(r#"{"status":"ok","id":"evt-1"}"#)
            .create_async()
            .await;

        let transport =
            HttpTransport::new(format!("{}/api/events", server.url()), Duration::from_secs(2))
                .unwrap();
        let outcome = transport.send(&event()).await;

        assert_eq!(
            outcome,
            SendOutcome::Delivered {
                id: Some("evt-1".to_string())
            }
        );
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_server_error_is_transient() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/api/events")
            .with_status(503)
            .with_body("storage unavailable")
            .create_async()
            .await;

        let transport =
            HttpTransport::new(format!("{}/api/events", server.url()), Duration::from_secs(2))
                .unwrap();

        match transport.send(&event()).await {
            SendOutcome::Transient(reason) => assert!(reason.contains("503")),
            other => panic!("expected transient, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_client_error_is_permanent() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/api/events")
            .with_status(400)
            .with_body(r#"{"status":"error","detail":"bad"}"#)
            .create_async()
            .await;

        let transport =
            HttpTransport::new(format!("{}/api/events", server.url()), Duration::from_secs(2))
                .unwrap();

        assert!(matches!(
            transport.send(&event()).await,
            SendOutcome::Permanent(_)
        ));
    }

    #[tokio::test]
    async fn test_unreachable_is_transient() {
        let transport =
            HttpTransport::new("http://127.0.0.1:1/api/events", Duration::from_secs(2)).unwrap();
        assert!(matches!(
            transport.send(&event()).await,
            SendOutcome::Transient(_)
        ));
    }
}
