//! Honeytrail Forwarder
//!
//! Delivers classified events to the collector with bounded retries, off
//! the tailing path: events wait in a bounded queue drained by workers.
//! Also hosts the client for the external response generator.

pub mod forwarder;
pub mod pool;
pub mod queue;
pub mod responder;
pub mod retry;
pub mod transport;

pub use forwarder::{Ack, Forwarder};
pub use pool::{ForwardStats, ForwarderPool};
pub use queue::{EventQueue, PushOutcome};
pub use responder::{ResponderClient, UNAVAILABLE_RESPONSE};
pub use retry::RetryPolicy;
pub use transport::{HttpTransport, SendOutcome, Transport};
