use crate::extract::{extract_ip, extract_session_id, extract_src_port, extract_username};
use crate::recognizer::Recognizer;
use honeytrail_core::config::ClassifierConfig;
use honeytrail_core::{EventCandidate, LogLine};
use regex::Regex;
use std::sync::OnceLock;
use tracing::{debug, warn};

/// Command value for events that record a login attempt rather than a command
pub const LOGIN_ATTEMPT: &str = "login_attempt";

static CMD_MARKER_REGEX: OnceLock<Regex> = OnceLock::new();
static COMMAND_FOUND_REGEX: OnceLock<Regex> = OnceLock::new();

fn get_cmd_marker_regex() -> &'static Regex {
    // "[HoneyPotSSHTransport,3,10.0.0.5] CMD: uname -a"
    CMD_MARKER_REGEX.get_or_init(|| Regex::new(r"\] .*CMD:\s*(.+)$").unwrap())
}

fn get_command_found_regex() -> &'static Regex {
    COMMAND_FOUND_REGEX.get_or_init(|| Regex::new(r"Command found:\s*(.+)$").unwrap())
}

/// Ordered set of recognizers mapping one log line to at most one event.
///
/// Order is the priority: command markers, then custom patterns, then the
/// login-failure phrases. The first rule that recognizes a line decides
/// the event; a line no rule recognizes is not an error, just uninteresting.
pub struct Classifier {
    recognizers: Vec<Recognizer>,
    dest_service: String,
}

impl Classifier {
    /// Build a classifier from configuration.
    ///
    /// Custom patterns that fail to compile are skipped with a warning.
    pub fn new(config: &ClassifierConfig) -> Self {
        let mut recognizers = vec![
            Recognizer::from_regex("cmd_marker", get_cmd_marker_regex().clone()),
            Recognizer::from_regex("command_found", get_command_found_regex().clone()),
        ];

        for custom in &config.custom_patterns {
            match Recognizer::capture(custom.name.clone(), &custom.pattern) {
                Ok(recognizer) => recognizers.push(recognizer),
                Err(e) => {
                    warn!(
                        pattern_name = %custom.name,
                        error = %e,
                        "Failed to compile custom pattern, skipping"
                    );
                }
            }
        }

        match Recognizer::phrases("login_failure", &config.login_phrases, LOGIN_ATTEMPT) {
            Ok(recognizer) => recognizers.push(recognizer),
            Err(e) => warn!(error = %e, "Failed to build login phrase matcher, skipping"),
        }

        Self::from_recognizers(recognizers, config.dest_service.clone())
    }

    /// Create with default configuration
    pub fn with_defaults() -> Self {
        Self::new(&ClassifierConfig::default())
    }

    /// Build from an explicit rule list, evaluated in the given order
    pub fn from_recognizers(recognizers: Vec<Recognizer>, dest_service: impl Into<String>) -> Self {
        Self {
            recognizers,
            dest_service: dest_service.into(),
        }
    }

    /// Names of the rules in evaluation order
    pub fn recognizer_names(&self) -> Vec<&str> {
        self.recognizers.iter().map(|r| r.name()).collect()
    }

    /// Classify one line. Pure: the same line always gives the same result.
    ///
    /// The candidate carries no timestamp; see [`Classifier::classify_line`].
    pub fn classify(&self, line: &str) -> Option<EventCandidate> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return None;
        }

        let (rule, command) = self
            .recognizers
            .iter()
            .find_map(|r| r.recognize(trimmed).map(|command| (r.name(), command)))?;

        debug!(rule, command = %command, "Line recognized");

        let mut candidate = EventCandidate::new(command, line)
            .with_src_ip(extract_ip(trimmed))
            .with_dest_service(self.dest_service.clone());

        if let Some(session_id) = extract_session_id(trimmed) {
            candidate = candidate.with_session_id(session_id);
        }
        if let Some(port) = extract_src_port(trimmed) {
            candidate = candidate.with_src_port(port);
        }
        if candidate.command.as_deref() == Some(LOGIN_ATTEMPT) {
            if let Some(username) = extract_username(trimmed) {
                candidate = candidate.with_username(username);
            }
        }

        Some(candidate)
    }

    /// Classify a tailed line, stamping the event with the time it was read
    pub fn classify_line(&self, line: &LogLine) -> Option<EventCandidate> {
        self.classify(&line.content)
            .map(|candidate| candidate.with_timestamp(line.received_at))
    }
}

impl Default for Classifier {
    fn default() -> Self {
        Self::with_defaults()
    }
}
