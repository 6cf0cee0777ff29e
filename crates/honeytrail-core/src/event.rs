use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Sentinel used when no source address could be extracted
pub const UNKNOWN_IP: &str = "unknown";

/// Where a raw log line came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LineOrigin {
    File { path: String },
    Command { program: String },
}

impl std::fmt::Display for LineOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LineOrigin::File { path } => write!(f, "file://{}", path),
            LineOrigin::Command { program } => write!(f, "exec://{}", program),
        }
    }
}

/// Raw log line as read by a tailer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogLine {
    /// Time the line was read from the source
    pub received_at: DateTime<Utc>,

    /// Source of the line
    pub origin: LineOrigin,

    /// Line content without the trailing newline
    pub content: String,
}

impl LogLine {
    /// Create a new line stamped with the current time
    pub fn new(origin: LineOrigin, content: String) -> Self {
        Self {
            received_at: Utc::now(),
            origin,
            content,
        }
    }
}

/// Event as produced by the classifier and sent to the collector.
///
/// Every field is optional on the wire; the collector fills `timestamp`
/// and `src_ip` when they are absent and assigns the identifier.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventCandidate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub src_ip: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub src_port: Option<u16>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dest_service: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,

    /// Original raw line, kept verbatim
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<String>,
}

impl EventCandidate {
    /// Create a candidate carrying a command and the line it came from
    pub fn new(command: impl Into<String>, metadata: impl Into<String>) -> Self {
        Self {
            command: Some(command.into()),
            metadata: Some(metadata.into()),
            ..Default::default()
        }
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn with_src_ip(mut self, src_ip: impl Into<String>) -> Self {
        self.src_ip = Some(src_ip.into());
        self
    }

    pub fn with_src_port(mut self, src_port: u16) -> Self {
        self.src_port = Some(src_port);
        self
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_dest_service(mut self, dest_service: impl Into<String>) -> Self {
        self.dest_service = Some(dest_service.into());
        self
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    /// Whether the candidate carries anything worth persisting
    pub fn has_payload(&self) -> bool {
        self.command.is_some() || self.metadata.is_some()
    }

    /// Short description for log messages
    pub fn summary(&self) -> String {
        format!(
            "command={:?} src_ip={} line={:?}",
            self.command.as_deref().unwrap_or(""),
            self.src_ip.as_deref().unwrap_or(UNKNOWN_IP),
            self.metadata.as_deref().unwrap_or("")
        )
    }
}

/// Persisted event with collector-assigned identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub session_id: Option<String>,
    pub src_ip: String,
    pub src_port: Option<u16>,
    pub dest_service: Option<String>,
    pub username: Option<String>,
    pub command: Option<String>,
    pub metadata: Option<String>,
}

impl Event {
    /// Give a candidate its identity, filling the receipt time and
    /// address sentinel where the producer left them out
    pub fn from_candidate(
        candidate: EventCandidate,
        id: String,
        received_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            timestamp: candidate.timestamp.unwrap_or(received_at),
            session_id: candidate.session_id,
            src_ip: candidate
                .src_ip
                .unwrap_or_else(|| UNKNOWN_IP.to_string()),
            src_port: candidate.src_port,
            dest_service: candidate.dest_service,
            username: candidate.username,
            command: candidate.command,
            metadata: candidate.metadata,
        }
    }
}
