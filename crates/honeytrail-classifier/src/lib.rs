//! Honeytrail Classifier
//!
//! Turns raw honeypot log lines into event candidates. Rules are tried in
//! order and the first one that recognizes a line wins; lines no rule
//! recognizes are discarded.

pub mod classifier;
pub mod extract;
pub mod recognizer;

pub use classifier::{Classifier, LOGIN_ATTEMPT};
pub use extract::{extract_ip, extract_session_id, extract_src_port, extract_username};
pub use recognizer::{CommandSource, Recognizer};
