//! HTTP front end of the collector

use crate::service::{IngestError, IngestionService};
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::{Bytes, Incoming};
use hyper::header::{HeaderValue, ALLOW, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use honeytrail_core::HoneytrailError;
use serde::Serialize;
use serde_json::json;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const EVENTS_PATH: &str = "/api/events";

/// Time given to open connections once shutdown begins
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

type HttpResponse = Response<Full<Bytes>>;

/// Ingestion HTTP server
pub struct CollectorServer {
    listener: TcpListener,
    service: IngestionService,
    max_body_bytes: usize,
}

impl CollectorServer {
    /// Bind the listening socket. Port 0 picks a free port.
    pub async fn bind(
        addr: SocketAddr,
        service: IngestionService,
        max_body_bytes: usize,
    ) -> Result<Self, HoneytrailError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| HoneytrailError::Server(format!("Failed to bind {}: {}", addr, e)))?;

        Ok(Self {
            listener,
            service,
            max_body_bytes,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, HoneytrailError> {
        self.listener
            .local_addr()
            .map_err(|e| HoneytrailError::Server(format!("No local address: {}", e)))
    }

    /// Serve until `shutdown` is cancelled, then let open connections finish
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), HoneytrailError> {
        let addr = self.local_addr()?;
        info!(address = %addr, "Collector listening");

        let mut connections = JoinSet::new();

        loop {
            let (stream, peer) = tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        warn!(error = %e, "Accept failed");
                        continue;
                    }
                },
            };

            // Reap finished connection tasks
            while connections.try_join_next().is_some() {}

            let io = TokioIo::new(stream);
            let service = self.service.clone();
            let max_body_bytes = self.max_body_bytes;
            let shutdown = shutdown.clone();

            connections.spawn(async move {
                let handler = service_fn(move |req: Request<Incoming>| {
                    let service = service.clone();
                    async move { Ok::<_, Infallible>(handle_request(req, &service, max_body_bytes).await) }
                });

                let conn = http1::Builder::new().serve_connection(io, handler);
                tokio::pin!(conn);

                let result = tokio::select! {
                    result = conn.as_mut() => result,
                    _ = shutdown.cancelled() => {
                        conn.as_mut().graceful_shutdown();
                        conn.await
                    }
                };
                if let Err(err) = result {
                    debug!(peer = %peer, error = %err, "Connection closed with error");
                }
            });
        }

        info!(open = connections.len(), "Collector shutting down");
        let drained = tokio::time::timeout(DRAIN_TIMEOUT, async {
            while connections.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!("Open connections did not finish in time");
            connections.abort_all();
        }

        Ok(())
    }
}

async fn handle_request(
    req: Request<Incoming>,
    service: &IngestionService,
    max_body_bytes: usize,
) -> HttpResponse {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    debug!(method = %method, path = %path, "Request");

    match (method, path.as_str()) {
        (Method::POST, EVENTS_PATH) => post_event(req, service, max_body_bytes).await,
        (Method::GET, EVENTS_PATH) => get_events(req.uri().query(), service).await,
        (_, EVENTS_PATH) => {
            let mut response = error_response(StatusCode::METHOD_NOT_ALLOWED, "method not allowed");
            response
                .headers_mut()
                .insert(ALLOW, HeaderValue::from_static("GET, POST"));
            response
        }
        (Method::GET, "/health") => text_response(StatusCode::OK, "OK".to_string(), "text/plain"),
        (Method::GET, "/metrics") => text_response(
            StatusCode::OK,
            service.metrics().gather(),
            "text/plain; version=0.0.4; charset=utf-8",
        ),
        _ => error_response(StatusCode::NOT_FOUND, "not found"),
    }
}

async fn post_event(
    req: Request<Incoming>,
    service: &IngestionService,
    max_body_bytes: usize,
) -> HttpResponse {
    let body = match Limited::new(req.into_body(), max_body_bytes).collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => {
            service.metrics().record_rejected();
            warn!(limit = max_body_bytes, "Rejected oversized event body");
            return error_response(StatusCode::PAYLOAD_TOO_LARGE, "request body too large");
        }
        Err(e) => {
            return error_response(StatusCode::BAD_REQUEST, &format!("unreadable body: {}", e));
        }
    };

    let result = match service.parse_candidate(&body) {
        Ok(candidate) => service.ingest(candidate).await,
        Err(e) => Err(e),
    };

    match result {
        Ok(event) => json_response(
            StatusCode::CREATED,
            &json!({ "status": "ok", "id": event.id }),
        ),
        Err(IngestError::Invalid(detail)) => error_response(StatusCode::BAD_REQUEST, &detail),
        Err(IngestError::Store(e)) => {
            error_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string())
        }
    }
}

async fn get_events(query: Option<&str>, service: &IngestionService) -> HttpResponse {
    let limit = match parse_limit(query) {
        Ok(limit) => limit,
        Err(detail) => return error_response(StatusCode::BAD_REQUEST, &detail),
    };

    match service.list_events(limit).await {
        Ok(events) => json_response(StatusCode::OK, &events),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()),
    }
}

/// `limit` from a query string; absent means the service default
fn parse_limit(query: Option<&str>) -> Result<Option<usize>, String> {
    let Some(query) = query else {
        return Ok(None);
    };

    for pair in query.split('&') {
        if let Some(value) = pair.strip_prefix("limit=") {
            return value
                .parse::<usize>()
                .map(Some)
                .map_err(|_| format!("limit must be a non-negative integer, got '{}'", value));
        }
    }
    Ok(None)
}

fn json_response<T: Serialize>(status: StatusCode, body: &T) -> HttpResponse {
    match serde_json::to_vec(body) {
        Ok(bytes) => with_content_type(status, Bytes::from(bytes), "application/json"),
        Err(e) => {
            error!(error = %e, "Failed to encode response");
            with_content_type(
                StatusCode::INTERNAL_SERVER_ERROR,
                Bytes::from_static(br#"{"status":"error","detail":"encoding failed"}"#),
                "application/json",
            )
        }
    }
}

fn error_response(status: StatusCode, detail: &str) -> HttpResponse {
    json_response(status, &json!({ "status": "error", "detail": detail }))
}

fn text_response(status: StatusCode, body: String, content_type: &'static str) -> HttpResponse {
    with_content_type(status, Bytes::from(body), content_type)
}

fn with_content_type(status: StatusCode, body: Bytes, content_type: &'static str) -> HttpResponse {
    let mut response = Response::new(Full::new(body));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}
