use crate::retry::RetryPolicy;
use crate::transport::{HttpTransport, SendOutcome, Transport};
use honeytrail_core::config::ForwarderConfig;
use honeytrail_core::{EventCandidate, ForwardError};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Successful delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ack {
    /// Identifier assigned by the collector, when it reported one
    pub id: Option<String>,
    /// Sends it took, including the successful one
    pub attempts: u32,
}

/// Delivers one event at a time with bounded retries.
///
/// Delivery is at-least-once: a send whose response was lost is retried and
/// may store the event twice.
pub struct Forwarder {
    transport: Arc<dyn Transport>,
    policy: RetryPolicy,
}

impl Forwarder {
    pub fn new(transport: Arc<dyn Transport>, policy: RetryPolicy) -> Self {
        Self { transport, policy }
    }

    /// HTTP forwarder for the configured collector endpoint
    pub fn from_config(config: &ForwarderConfig) -> Result<Self, ForwardError> {
        let transport = HttpTransport::new(config.endpoint.clone(), config.timeout())?;
        Ok(Self::new(Arc::new(transport), RetryPolicy::from_config(config)))
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn endpoint(&self) -> &str {
        self.transport.endpoint()
    }

    /// Deliver `event`, retrying transient failures per the retry policy
    pub async fn forward(&self, event: &EventCandidate) -> Result<Ack, ForwardError> {
        self.forward_until(event, &CancellationToken::new()).await
    }

    /// Like [`Forwarder::forward`], but no further retry is started once
    /// `shutdown` is cancelled. An attempt already in flight is completed.
    pub async fn forward_until(
        &self,
        event: &EventCandidate,
        shutdown: &CancellationToken,
    ) -> Result<Ack, ForwardError> {
        let mut attempt = 0u32;

        loop {
            attempt += 1;

            let reason = match self.transport.send(event).await {
                SendOutcome::Delivered { id } => {
                    debug!(attempts = attempt, id = ?id, "Event delivered");
                    return Ok(Ack {
                        id,
                        attempts: attempt,
                    });
                }
                SendOutcome::Permanent(reason) => {
                    return Err(ForwardError::Rejected { reason });
                }
                SendOutcome::Transient(reason) => reason,
            };

            if attempt >= self.policy.max_attempts {
                return Err(ForwardError::Exhausted {
                    attempts: attempt,
                    reason,
                });
            }

            let delay = self.policy.backoff_for(attempt);
            warn!(
                endpoint = %self.transport.endpoint(),
                attempt,
                max_attempts = self.policy.max_attempts,
                delay = ?delay,
                error = %reason,
                "Delivery attempt failed, retrying"
            );

            if shutdown.is_cancelled() {
                return Err(ForwardError::Cancelled {
                    attempts: attempt,
                    reason,
                });
            }
            tokio::select! {
                _ = shutdown.cancelled() => {
                    return Err(ForwardError::Cancelled { attempts: attempt, reason });
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::time::Duration;

    /// Replays scripted outcomes and counts sends
    struct ScriptedTransport {
        outcomes: Mutex<VecDeque<SendOutcome>>,
        sends: Mutex<u32>,
    }

    impl ScriptedTransport {
        fn new(outcomes: Vec<SendOutcome>) -> Arc<Self> {
            Arc::new(Self {
                outcomes: Mutex::new(outcomes.into()),
                sends: Mutex::new(0),
            })
        }

        fn sends(&self) -> u32 {
            *self.sends.lock()
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        fn endpoint(&self) -> &str {
            "scripted"
        }

        async fn send(&self, _event: &EventCandidate) -> SendOutcome {
            *self.sends.lock() += 1;
            self.outcomes
                .lock()
                .pop_front()
                .unwrap_or_else(|| SendOutcome::Transient("script exhausted".to_string()))
        }
    }

    fn event() -> EventCandidate {
        EventCandidate::new("ls", "[x] CMD: ls")
    }

    #[tokio::test]
    async fn test_delivers_first_time() {
        let transport = ScriptedTransport::new(vec![SendOutcome::Delivered {
            id: Some("a".to_string()),
        }]);
        let forwarder = Forwarder::new(transport.clone(), RetryPolicy::immediate(3));

        let ack = forwarder.forward(&event()).await.unwrap();
        assert_eq!(ack.id.as_deref(), Some("a"));
        assert_eq!(ack.attempts, 1);
        assert_eq!(transport.sends(), 1);
    }

    #[tokio::test]
    async fn test_retries_transient_then_delivers() {
        let transport = ScriptedTransport::new(vec![
            SendOutcome::Transient("timeout".to_string()),
            SendOutcome::Transient("503".to_string()),
            SendOutcome::Delivered { id: None },
        ]);
        let forwarder = Forwarder::new(transport.clone(), RetryPolicy::immediate(3));

        let ack = forwarder.forward(&event()).await.unwrap();
        assert_eq!(ack.attempts, 3);
        assert_eq!(transport.sends(), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let transport = ScriptedTransport::new(Vec::new());
        let forwarder = Forwarder::new(transport.clone(), RetryPolicy::immediate(4));

        let err = forwarder.forward(&event()).await.unwrap_err();
        assert!(matches!(err, ForwardError::Exhausted { attempts: 4, .. }));
        assert_eq!(transport.sends(), 4);
    }

    #[tokio::test]
    async fn test_permanent_failure_is_not_retried() {
        let transport =
            ScriptedTransport::new(vec![SendOutcome::Permanent("400 bad".to_string())]);
        let forwarder = Forwarder::new(transport.clone(), RetryPolicy::immediate(5));

        let err = forwarder.forward(&event()).await.unwrap_err();
        assert!(matches!(err, ForwardError::Rejected { .. }));
        assert_eq!(transport.sends(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_backoff_between_attempts() {
        let transport = ScriptedTransport::new(Vec::new());
        let policy = RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(10),
            multiplier: 2.0,
        };
        let forwarder = Forwarder::new(transport.clone(), policy);

        let start = tokio::time::Instant::now();
        let _ = forwarder.forward(&event()).await;
        // 1s + 2s of backoff under the paused clock
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(3));
        assert!(elapsed < Duration::from_secs(4));
        assert_eq!(transport.sends(), 3);
    }

    #[tokio::test]
    async fn test_shutdown_stops_retries() {
        let transport = ScriptedTransport::new(Vec::new());
        let policy = RetryPolicy {
            max_attempts: 10,
            initial_backoff: Duration::from_secs(60),
            max_backoff: Duration::from_secs(60),
            multiplier: 1.0,
        };
        let forwarder = Forwarder::new(transport.clone(), policy);
        let token = CancellationToken::new();
        token.cancel();

        let err = forwarder.forward_until(&event(), &token).await.unwrap_err();
        assert!(matches!(err, ForwardError::Cancelled { attempts: 1, .. }));
        assert_eq!(transport.sends(), 1);
    }

    #[tokio::test]
    async fn test_unreachable_collector_retries_configured_times() {
        let config = ForwarderConfig {
            endpoint: "http://127.0.0.1:1/api/events".to_string(),
            max_attempts: 3,
            initial_backoff_ms: 10,
            max_backoff_ms: 20,
            timeout_ms: 1_000,
            ..Default::default()
        };
        let forwarder = Forwarder::from_config(&config).unwrap();

        let err = forwarder.forward(&event()).await.unwrap_err();
        assert!(matches!(err, ForwardError::Exhausted { attempts: 3, .. }));
    }

    #[tokio::test]
    async fn test_flaky_collector_over_http() {
        let mut server = mockito::Server::new_async().await;
        let failing = server
            .mock("POST", "/api/events")
            .with_status(500)
            .expect(3)
            .create_async()
            .await;

        let config = ForwarderConfig {
            endpoint: format!("{}/api/events", server.url()),
            max_attempts: 3,
            initial_backoff_ms: 1,
            max_backoff_ms: 5,
            ..Default::default()
        };
        let forwarder = Forwarder::from_config(&config).unwrap();

        let err = forwarder.forward(&event()).await.unwrap_err();
        assert!(matches!(err, ForwardError::Exhausted { attempts: 3, .. }));
        failing.assert_async().await;
    }
}
