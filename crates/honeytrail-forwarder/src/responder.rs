use crate::retry::RetryPolicy;
use crate::transport::is_retryable;
use honeytrail_core::config::ResponderConfig;
use honeytrail_core::ForwardError;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, warn};

/// Reply used whenever the response generator cannot be reached or answers badly
pub const UNAVAILABLE_RESPONSE: &str = "(system unavailable)";

#[derive(Serialize)]
struct RespondRequest<'a> {
    command: &'a str,
}

#[derive(Deserialize)]
struct RespondReply {
    response: String,
}

/// Why a request to the generator failed
enum Failure {
    Transient(String),
    Permanent(String),
}

/// Client for the external response generator.
///
/// Common commands are answered from a canned table without a network call.
/// Network errors and server-side failures are retried a bounded number of
/// times; failures never surface to the caller.
pub struct ResponderClient {
    endpoint: String,
    client: Client,
    canned: BTreeMap<String, String>,
    policy: RetryPolicy,
}

impl ResponderClient {
    pub fn new(config: &ResponderConfig) -> Result<Self, ForwardError> {
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| ForwardError::Client(e.to_string()))?;

        Ok(Self {
            endpoint: config.endpoint.clone(),
            client,
            canned: config.canned.clone(),
            policy: RetryPolicy {
                max_attempts: config.max_attempts.max(1),
                initial_backoff: Duration::from_millis(config.retry_backoff_ms),
                max_backoff: Duration::from_millis(config.retry_backoff_ms),
                multiplier: 1.0,
            },
        })
    }

    /// Canned reply for `command`, matched on its first word
    pub fn canned_response(&self, command: &str) -> Option<&str> {
        let program = command.split_whitespace().next()?;
        self.canned.get(program).map(String::as_str)
    }

    /// Terminal output to show for `command`
    pub async fn respond(&self, command: &str) -> String {
        if let Some(reply) = self.canned_response(command) {
            debug!(command, "Answered from canned replies");
            return reply.to_string();
        }

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let reason = match self.request(command).await {
                Ok(reply) => return reply,
                Err(Failure::Permanent(reason)) => reason,
                Err(Failure::Transient(reason)) if attempt < self.policy.max_attempts => {
                    debug!(command, attempt, reason = %reason, "Response generator failed, retrying");
                    tokio::time::sleep(self.policy.backoff_for(attempt)).await;
                    continue;
                }
                Err(Failure::Transient(reason)) => reason,
            };

            warn!(
                command,
                endpoint = %self.endpoint,
                attempts = attempt,
                reason = %reason,
                "Response generator unavailable"
            );
            return UNAVAILABLE_RESPONSE.to_string();
        }
    }

    async fn request(&self, command: &str) -> Result<String, Failure> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&RespondRequest { command })
            .send()
            .await
            .map_err(|e| Failure::Transient(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let reason = format!("status {}", status);
            return Err(if is_retryable(status) {
                Failure::Transient(reason)
            } else {
                Failure::Permanent(reason)
            });
        }

        response
            .json::<RespondReply>()
            .await
            .map(|reply| reply.response)
            .map_err(|e| Failure::Permanent(e.to_string()))
    }
}
