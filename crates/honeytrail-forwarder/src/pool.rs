use crate::forwarder::Forwarder;
use crate::queue::EventQueue;
use honeytrail_core::EventCandidate;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Delivery counters shared by all workers
#[derive(Debug, Default)]
pub struct ForwardStats {
    delivered: AtomicU64,
    failed: AtomicU64,
}

impl ForwardStats {
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }
}

/// Event a worker is currently delivering
type InFlight = Arc<Mutex<Option<EventCandidate>>>;

struct Worker {
    handle: JoinHandle<()>,
    in_flight: InFlight,
}

/// Fixed set of workers draining an [`EventQueue`] through a [`Forwarder`]
pub struct ForwarderPool {
    workers: Vec<Worker>,
    stats: Arc<ForwardStats>,
}

impl ForwarderPool {
    /// Start `workers` delivery tasks.
    ///
    /// Workers exit when the queue is closed and empty, or as soon as
    /// `shutdown` is cancelled. An event in flight at cancellation gets its
    /// current attempt finished but no further retries.
    pub fn spawn(
        workers: usize,
        forwarder: Arc<Forwarder>,
        queue: Arc<EventQueue>,
        shutdown: CancellationToken,
    ) -> Self {
        let stats = Arc::new(ForwardStats::default());
        let workers = workers.max(1);

        let spawned = (0..workers)
            .map(|worker_id| {
                let forwarder = forwarder.clone();
                let queue = queue.clone();
                let shutdown = shutdown.clone();
                let stats = stats.clone();
                let in_flight = InFlight::default();
                let slot = in_flight.clone();
                let handle = tokio::spawn(async move {
                    run_worker(worker_id, forwarder, queue, shutdown, stats, slot).await;
                });
                Worker { handle, in_flight }
            })
            .collect();

        info!(workers, endpoint = forwarder.endpoint(), "Forwarder workers started");

        Self {
            workers: spawned,
            stats,
        }
    }

    pub fn stats(&self) -> Arc<ForwardStats> {
        self.stats.clone()
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Wait for every worker, aborting any still running after `grace`.
    /// Returns `true` when all workers finished on their own.
    ///
    /// An event held by an aborted worker is counted as failed and logged.
    pub async fn join(self, grace: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + grace;
        let mut clean = true;

        for Worker {
            mut handle,
            in_flight,
        } in self.workers
        {
            match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => error!(error = %e, "Forwarder worker panicked"),
                Err(_) => {
                    warn!("Forwarder worker did not stop in time, aborting");
                    handle.abort();
                    // Wait for the abort so the slot is no longer written to
                    let _ = handle.await;
                }
            }
            clean = false;

            if let Some(event) = in_flight.lock().take() {
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                error!(event = %event.summary(), "Event abandoned during delivery");
            }
        }

        clean
    }
}

async fn run_worker(
    worker_id: usize,
    forwarder: Arc<Forwarder>,
    queue: Arc<EventQueue>,
    shutdown: CancellationToken,
    stats: Arc<ForwardStats>,
    in_flight: InFlight,
) {
    debug!(worker_id, "Forwarder worker running");

    loop {
        let event = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            event = queue.pop() => match event {
                Some(event) => event,
                None => break,
            },
        };

        *in_flight.lock() = Some(event.clone());
        let result = forwarder.forward_until(&event, &shutdown).await;
        in_flight.lock().take();

        match result {
            Ok(ack) => {
                stats.delivered.fetch_add(1, Ordering::Relaxed);
                debug!(worker_id, id = ?ack.id, attempts = ack.attempts, "Forwarded event");
            }
            Err(e) => {
                stats.failed.fetch_add(1, Ordering::Relaxed);
                error!(
                    worker_id,
                    error = %e,
                    event = %event.summary(),
                    "Event could not be delivered"
                );
            }
        }
    }

    debug!(worker_id, "Forwarder worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::RetryPolicy;
    use crate::transport::{SendOutcome, Transport};
    use async_trait::async_trait;
    use honeytrail_core::config::OverflowPolicy;

    #[derive(Default)]
    struct RecordingTransport {
        seen: Mutex<Vec<String>>,
        fail: bool,
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        fn endpoint(&self) -> &str {
            "memory://"
        }

        async fn send(&self, event: &EventCandidate) -> SendOutcome {
            if self.fail {
                return SendOutcome::Transient("down".to_string());
            }
            let command = event.command.clone().unwrap_or_default();
            self.seen.lock().push(command.clone());
            SendOutcome::Delivered { id: Some(command) }
        }
    }

    fn event(command: &str) -> EventCandidate {
        EventCandidate::new(command, format!("CMD: {}", command))
    }

    #[tokio::test]
    async fn test_pool_delivers_everything_then_stops_on_close() {
        let transport = Arc::new(RecordingTransport::default());
        let forwarder = Arc::new(Forwarder::new(transport.clone(), RetryPolicy::immediate(1)));
        let queue = Arc::new(EventQueue::new(100, OverflowPolicy::DropOldest));

        for i in 0..20 {
            queue.push(event(&format!("cmd{}", i)));
        }
        queue.close();

        let pool = ForwarderPool::spawn(3, forwarder, queue.clone(), CancellationToken::new());
        let stats = pool.stats();
        assert_eq!(pool.worker_count(), 3);
        assert!(pool.join(Duration::from_secs(5)).await);

        assert_eq!(stats.delivered(), 20);
        assert_eq!(stats.failed(), 0);
        assert_eq!(transport.seen.lock().len(), 20);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_failures_are_counted() {
        let transport = Arc::new(RecordingTransport {
            fail: true,
            ..Default::default()
        });
        let forwarder = Arc::new(Forwarder::new(transport, RetryPolicy::immediate(2)));
        let queue = Arc::new(EventQueue::new(10, OverflowPolicy::DropOldest));
        queue.push(event("a"));
        queue.push(event("b"));
        queue.close();

        let pool = ForwarderPool::spawn(1, forwarder, queue, CancellationToken::new());
        let stats = pool.stats();
        assert!(pool.join(Duration::from_secs(5)).await);

        assert_eq!(stats.failed(), 2);
        assert_eq!(stats.delivered(), 0);
    }

    struct StalledTransport;

    #[async_trait]
    impl Transport for StalledTransport {
        fn endpoint(&self) -> &str {
            "memory://"
        }

        async fn send(&self, _event: &EventCandidate) -> SendOutcome {
            tokio::time::sleep(Duration::from_secs(2)).await;
            SendOutcome::Delivered { id: None }
        }
    }

    #[tokio::test]
    async fn test_aborted_delivery_is_counted_as_failed() {
        let forwarder = Arc::new(Forwarder::new(
            Arc::new(StalledTransport),
            RetryPolicy::immediate(1),
        ));
        let queue = Arc::new(EventQueue::new(10, OverflowPolicy::DropOldest));
        queue.push(event("stuck"));
        queue.close();

        let pool = ForwarderPool::spawn(1, forwarder, queue.clone(), CancellationToken::new());
        let stats = pool.stats();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(!pool.join(Duration::from_millis(200)).await);
        assert_eq!(stats.delivered(), 0);
        assert_eq!(stats.failed(), 1);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_cancel_stops_idle_workers() {
        let transport = Arc::new(RecordingTransport::default());
        let forwarder = Arc::new(Forwarder::new(transport, RetryPolicy::immediate(1)));
        let queue = Arc::new(EventQueue::new(10, OverflowPolicy::DropOldest));
        let shutdown = CancellationToken::new();

        let pool = ForwarderPool::spawn(2, forwarder, queue, shutdown.clone());
        tokio::time::sleep(Duration::from_millis(20)).await;
        shutdown.cancel();

        assert!(pool.join(Duration::from_secs(2)).await);
    }
}
