//! Secondary field extraction applied to recognized lines.

use honeytrail_core::UNKNOWN_IP;
use regex::Regex;
use std::sync::OnceLock;

static IP_REGEX: OnceLock<Regex> = OnceLock::new();
static PORT_REGEX: OnceLock<Regex> = OnceLock::new();
static SESSION_REGEX: OnceLock<Regex> = OnceLock::new();
static USERNAME_REGEX: OnceLock<Regex> = OnceLock::new();

fn get_ip_regex() -> &'static Regex {
    IP_REGEX.get_or_init(|| Regex::new(r"\b\d{1,3}(?:\.\d{1,3}){3}\b").unwrap())
}

fn get_port_regex() -> &'static Regex {
    PORT_REGEX.get_or_init(|| Regex::new(r"\b\d{1,3}(?:\.\d{1,3}){3}:(\d{1,5})\b").unwrap())
}

fn get_session_regex() -> &'static Regex {
    SESSION_REGEX.get_or_init(|| {
        // Cowrie transport prefix: [HoneyPotSSHTransport,3,10.0.0.5]
        // or an explicit marker:   [session: 8a1f2c]
        Regex::new(r"\[[A-Za-z][\w.]*,(\d+),\d{1,3}(?:\.\d{1,3}){3}\]|\[session: ([0-9A-Za-z]+)\]")
            .unwrap()
    })
}

fn get_username_regex() -> &'static Regex {
    USERNAME_REGEX.get_or_init(|| {
        // login attempt [b'root'/b'123456'] or [root/123456]
        Regex::new(r"\[(?:b')?([^'/\[\]]+)'?/").unwrap()
    })
}

/// First dotted-quad address in the line, or the `unknown` sentinel
pub fn extract_ip(line: &str) -> String {
    get_ip_regex()
        .find(line)
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| UNKNOWN_IP.to_string())
}

/// Port written directly after an address (`10.0.0.5:51234`)
pub fn extract_src_port(line: &str) -> Option<u16> {
    get_port_regex()
        .captures(line)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Honeypot session identifier, when the line carries one
pub fn extract_session_id(line: &str) -> Option<String> {
    let caps = get_session_regex().captures(line)?;
    caps.get(1)
        .or_else(|| caps.get(2))
        .map(|m| m.as_str().to_string())
}

/// Username from a credential tuple, when the line carries one
pub fn extract_username(line: &str) -> Option<String> {
    get_username_regex()
        .captures(line)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|user| !user.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_ip() {
        assert_eq!(extract_ip("Failed login attempt from 10.0.0.5 port 22"), "10.0.0.5");
        assert_eq!(extract_ip("a 1.2.3.4 then 5.6.7.8"), "1.2.3.4");
    }

    #[test]
    fn test_extract_ip_unknown() {
        assert_eq!(extract_ip("[12:00:01] session CMD: whoami"), UNKNOWN_IP);
        assert_eq!(extract_ip("version 5.4.0"), UNKNOWN_IP);
    }

    #[test]
    fn test_extract_ip_ignores_longer_runs() {
        assert_eq!(extract_ip("id 1234.5.6.7"), UNKNOWN_IP);
    }

    #[test]
    fn test_extract_src_port() {
        assert_eq!(
            extract_src_port("New connection: 192.168.1.5:51234 (172.17.0.2:2222)"),
            Some(51234)
        );
        assert_eq!(extract_src_port("from 10.0.0.5"), None);
        assert_eq!(extract_src_port("from 10.0.0.5:99999"), None);
    }

    #[test]
    fn test_extract_session_id() {
        assert_eq!(
            extract_session_id("[HoneyPotSSHTransport,3,192.168.1.5] CMD: ls").as_deref(),
            Some("3")
        );
        assert_eq!(
            extract_session_id("New connection [session: 8a1f2c]").as_deref(),
            Some("8a1f2c")
        );
        assert_eq!(extract_session_id("[12:00:01] session CMD: whoami"), None);
    }

    #[test]
    fn test_extract_username() {
        assert_eq!(
            extract_username("login attempt [b'root'/b'123456'] failed").as_deref(),
            Some("root")
        );
        assert_eq!(
            extract_username("login attempt [admin/admin] succeeded").as_deref(),
            Some("admin")
        );
        assert_eq!(extract_username("Failed login attempt from 203.0.113.7"), None);
    }
}
