use honeytrail_classifier::Classifier;
use honeytrail_core::LogLine;
use honeytrail_forwarder::{EventQueue, PushOutcome};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// What happened to a single line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineOutcome {
    /// Not an event of interest
    Ignored,
    /// Classified and queued for delivery
    Queued,
    /// Classified and queued, but the queue was full and an event was discarded
    Overflowed,
    /// Classified after the queue was closed; the event was discarded
    Rejected,
}

/// Counters for one pipeline run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub lines: u64,
    pub events: u64,
    pub dropped: u64,
}

/// Classifies raw lines and hands events to the delivery queue
pub struct Pipeline {
    classifier: Classifier,
    queue: Arc<EventQueue>,
}

impl Pipeline {
    pub fn new(classifier: Classifier, queue: Arc<EventQueue>) -> Self {
        Self { classifier, queue }
    }

    pub fn queue(&self) -> &Arc<EventQueue> {
        &self.queue
    }

    /// Process a single line
    pub fn process(&self, line: LogLine) -> LineOutcome {
        let Some(event) = self.classifier.classify_line(&line) else {
            return LineOutcome::Ignored;
        };

        debug!(event = %event.summary(), origin = %line.origin, "Classified line");

        match self.queue.push(event) {
            PushOutcome::Queued => LineOutcome::Queued,
            PushOutcome::Dropped(dropped) => {
                warn!(
                    capacity = self.queue.capacity(),
                    raw = dropped.metadata.as_deref().unwrap_or(""),
                    "Delivery queue full, event dropped"
                );
                LineOutcome::Overflowed
            }
            PushOutcome::Closed(dropped) => {
                warn!(
                    raw = dropped.metadata.as_deref().unwrap_or(""),
                    "Delivery queue closed, event dropped"
                );
                LineOutcome::Rejected
            }
        }
    }

    /// Consume lines until every sender is gone
    pub async fn run(&self, mut receiver: mpsc::Receiver<LogLine>) -> PipelineStats {
        let mut stats = PipelineStats::default();

        while let Some(line) = receiver.recv().await {
            stats.lines += 1;
            match self.process(line) {
                LineOutcome::Ignored => {}
                LineOutcome::Queued => stats.events += 1,
                LineOutcome::Overflowed | LineOutcome::Rejected => {
                    stats.events += 1;
                    stats.dropped += 1;
                }
            }
        }

        info!(
            lines = stats.lines,
            events = stats.events,
            dropped = stats.dropped,
            "Line stream ended"
        );
        stats
    }
}
