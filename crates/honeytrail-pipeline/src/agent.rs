use crate::pipeline::{Pipeline, PipelineStats};
use honeytrail_classifier::Classifier;
use honeytrail_core::{Config, HoneytrailError, Result};
use honeytrail_forwarder::{EventQueue, Forwarder, ForwarderPool};
use honeytrail_ingestion::{create_line_channel, Tailer, DEFAULT_CHANNEL_SIZE};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Summary of a finished agent run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AgentReport {
    pub pipeline: PipelineStats,
    pub delivered: u64,
    pub failed: u64,
    /// Events still queued when the workers stopped
    pub abandoned: usize,
}

/// Honeypot-side process: tail, classify, forward
pub struct Agent {
    tailer: Tailer,
    pipeline: Pipeline,
    forwarder: Arc<Forwarder>,
    workers: usize,
    send_timeout: Duration,
}

impl Agent {
    pub fn new(
        tailer: Tailer,
        classifier: Classifier,
        forwarder: Forwarder,
        queue: EventQueue,
        workers: usize,
        send_timeout: Duration,
    ) -> Self {
        Self {
            tailer,
            pipeline: Pipeline::new(classifier, Arc::new(queue)),
            forwarder: Arc::new(forwarder),
            workers,
            send_timeout,
        }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let forwarder = Forwarder::from_config(&config.forwarder)?;
        let queue = EventQueue::new(config.general.queue_capacity, config.forwarder.overflow);

        Ok(Self::new(
            Tailer::from_config(&config.tail),
            Classifier::new(&config.classifier),
            forwarder,
            queue,
            config.forwarder.workers,
            config.forwarder.timeout(),
        ))
    }

    /// Longest a single event can spend in `forward`
    fn delivery_budget(&self) -> Duration {
        let policy = self.forwarder.policy();
        let backoff: Duration = policy.schedule().into_iter().sum();
        self.send_timeout * policy.max_attempts + backoff
    }

    /// Run until `shutdown` is cancelled or the log source is lost.
    ///
    /// On either path the queue is closed and the workers are given a grace
    /// period. Anything still queued afterwards is logged as dropped.
    pub async fn run(self, shutdown: CancellationToken) -> Result<AgentReport> {
        let drain_budget = self.delivery_budget();
        let Agent {
            tailer,
            pipeline,
            forwarder,
            workers,
            send_timeout,
        } = self;

        let queue = pipeline.queue().clone();
        let source = tailer.source_name();
        let (sender, receiver) = create_line_channel(DEFAULT_CHANNEL_SIZE);

        let tail_task = tokio::spawn(tailer.run(sender, shutdown.clone()));
        let pool = ForwarderPool::spawn(workers, forwarder, queue.clone(), shutdown.clone());
        let forward_stats = pool.stats();

        info!(source = %source, workers, capacity = queue.capacity(), "Agent running");

        // Ends once the tailer task drops its sender
        let pipeline_stats = pipeline.run(receiver).await;

        let tail_result = match tail_task.await {
            Ok(result) => result.map_err(HoneytrailError::from),
            Err(e) => Err(HoneytrailError::Task(e.to_string())),
        };
        if let Err(e) = &tail_result {
            error!(source = %source, error = %e, "Log source lost, stopping pipeline");
        }

        queue.close();
        let grace = if shutdown.is_cancelled() {
            send_timeout + Duration::from_secs(1)
        } else {
            // Every queued event plus the one each worker holds, worst case
            let rounds = queue.len().div_ceil(pool.worker_count().max(1)) + 1;
            drain_budget.saturating_mul(u32::try_from(rounds).unwrap_or(u32::MAX))
        };
        if !pool.join(grace).await {
            warn!(grace_ms = grace.as_millis() as u64, "Forwarder workers stopped forcibly");
        }

        let leftovers = queue.drain_remaining();
        for event in &leftovers {
            warn!(event = %event.summary(), "Undelivered event dropped at shutdown");
        }

        let report = AgentReport {
            pipeline: pipeline_stats,
            delivered: forward_stats.delivered(),
            failed: forward_stats.failed(),
            abandoned: leftovers.len(),
        };
        info!(
            lines = report.pipeline.lines,
            events = report.pipeline.events,
            delivered = report.delivered,
            failed = report.failed,
            dropped = report.pipeline.dropped + report.abandoned as u64,
            "Agent stopped"
        );

        tail_result.map(|()| report)
    }
}
