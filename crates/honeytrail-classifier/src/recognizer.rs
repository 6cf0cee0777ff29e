use aho_corasick::AhoCorasick;
use regex::Regex;

/// How a recognizer decides whether a line is its concern, and what
/// command it reports when it is
enum Matcher {
    /// Regex whose `command` group (or first group) is the command
    Capture(Regex),
    /// Case-insensitive literal phrases that map to a fixed command
    Phrases {
        phrases: AhoCorasick,
        command: &'static str,
    },
}

/// Where the event's `command` comes from once a line is recognized
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandSource {
    /// Text captured by the regex
    Captured,
    /// A fixed sentinel such as `login_attempt`
    Fixed(&'static str),
}

/// One classification rule: a pattern paired with how to build the command
pub struct Recognizer {
    name: String,
    matcher: Matcher,
}

impl Recognizer {
    /// Rule that extracts the command from a regex capture
    pub fn capture(name: impl Into<String>, pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self::from_regex(name, Regex::new(pattern)?))
    }

    pub(crate) fn from_regex(name: impl Into<String>, regex: Regex) -> Self {
        Self {
            name: name.into(),
            matcher: Matcher::Capture(regex),
        }
    }

    /// Rule that fires on any of the given phrases, ignoring ASCII case
    pub fn phrases<S: AsRef<str>>(
        name: impl Into<String>,
        phrases: &[S],
        command: &'static str,
    ) -> Result<Self, aho_corasick::BuildError> {
        // An empty phrase would match every line
        let phrases: Vec<&str> = phrases
            .iter()
            .map(|p| p.as_ref())
            .filter(|p| !p.trim().is_empty())
            .collect();

        let phrases = AhoCorasick::builder()
            .ascii_case_insensitive(true)
            .build(phrases)?;

        Ok(Self {
            name: name.into(),
            matcher: Matcher::Phrases { phrases, command },
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn command_source(&self) -> CommandSource {
        match self.matcher {
            Matcher::Capture(_) => CommandSource::Captured,
            Matcher::Phrases { command, .. } => CommandSource::Fixed(command),
        }
    }

    /// Return the command for `line` if this rule recognizes it.
    ///
    /// A capture that is blank after trimming (a line cut off right after
    /// its marker) does not count as a match.
    pub fn recognize(&self, line: &str) -> Option<String> {
        match &self.matcher {
            Matcher::Capture(regex) => {
                let caps = regex.captures(line)?;
                let captured = caps.name("command").or_else(|| caps.get(1))?;
                let command = captured.as_str().trim();
                if command.is_empty() {
                    None
                } else {
                    Some(command.to_string())
                }
            }
            Matcher::Phrases { phrases, command } => {
                phrases.is_match(line).then(|| command.to_string())
            }
        }
    }
}

impl std::fmt::Debug for Recognizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Recognizer")
            .field("name", &self.name)
            .field("command", &self.command_source())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_trims_command() {
        let rule = Recognizer::capture("cmd", r"CMD:\s*(.+)$").unwrap();
        assert_eq!(rule.recognize("x CMD:   cat /etc/passwd  ").as_deref(), Some("cat /etc/passwd"));
        assert_eq!(rule.command_source(), CommandSource::Captured);
    }

    #[test]
    fn test_capture_prefers_named_group() {
        let rule = Recognizer::capture("exec", r"(user=\w+) exec: (?P<command>.+)$").unwrap();
        assert_eq!(rule.recognize("user=root exec: id").as_deref(), Some("id"));
    }

    #[test]
    fn test_capture_without_group_is_no_match() {
        let rule = Recognizer::capture("plain", r"CMD").unwrap();
        assert_eq!(rule.recognize("CMD: ls"), None);
    }

    #[test]
    fn test_blank_capture_is_no_match() {
        let rule = Recognizer::capture("cmd", r"CMD:(.*)$").unwrap();
        assert_eq!(rule.recognize("[x] CMD:   "), None);
    }

    #[test]
    fn test_phrases_case_insensitive() {
        let rule = Recognizer::phrases("login", &["login attempt"], "login_attempt").unwrap();
        assert_eq!(rule.recognize("Failed LOGIN Attempt").as_deref(), Some("login_attempt"));
        assert_eq!(rule.recognize("logout"), None);
        assert_eq!(rule.command_source(), CommandSource::Fixed("login_attempt"));
    }

    #[test]
    fn test_empty_phrases_never_match() {
        let rule = Recognizer::phrases("login", &["", "  "], "login_attempt").unwrap();
        assert_eq!(rule.recognize("anything at all"), None);
    }

    #[test]
    fn test_invalid_pattern_is_error() {
        assert!(Recognizer::capture("broken", r"CMD: (").is_err());
    }
}
