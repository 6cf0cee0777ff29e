//! Honeytrail Pipeline
//!
//! Wires a tailer, the classifier and the forwarder workers together.
//! Lines flow through a channel to the classifier; events flow through a
//! bounded queue to the workers, so delivery never stalls log consumption.

pub mod agent;
pub mod pipeline;

pub use agent::{Agent, AgentReport};
pub use pipeline::{LineOutcome, Pipeline, PipelineStats};
