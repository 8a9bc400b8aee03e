//! Endpoint admission: format, blacklist, and dedup checks.
//!
//! All checks here are pure. The orchestrator runs them before touching any
//! slot state so a rejected request leaves nothing behind.

use std::sync::OnceLock;

use regex::Regex;

use skybot_types::{Endpoint, SlotError};

/// `<host>:<port>` where host is one or more DNS labels.
const ENDPOINT_PATTERN: &str =
    r"^([A-Za-z0-9](?:[A-Za-z0-9-]{0,61}[A-Za-z0-9])?(?:\.[A-Za-z0-9](?:[A-Za-z0-9-]{0,61}[A-Za-z0-9])?)*\.?):([0-9]{1,5})$";

/// Hosts that always resolve to the daemon's own machine.
const LOCAL_ALIASES: &[&str] = &["127.0.0.1", "localhost", "0.0.0.0"];

const MAX_HOST_LEN: usize = 253;

fn endpoint_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(ENDPOINT_PATTERN).expect("endpoint pattern is valid"))
}

/// Parse `raw` into a normalized endpoint, checking format only.
pub fn parse_endpoint(raw: &str) -> Result<Endpoint, SlotError> {
    let invalid = || SlotError::InvalidFormat(raw.to_string());

    let caps = endpoint_regex().captures(raw.trim()).ok_or_else(invalid)?;
    let host = &caps[1];
    if host.len() > MAX_HOST_LEN {
        return Err(invalid());
    }
    let port: u16 = caps[2].parse().map_err(|_| invalid())?;
    if port == 0 {
        return Err(invalid());
    }
    Ok(Endpoint::new(host, port))
}

/// Whether `host` is a loopback or wildcard alias.
pub fn is_blacklisted(host: &str) -> bool {
    let host = host.trim_end_matches('.').to_ascii_lowercase();
    LOCAL_ALIASES.contains(&host.as_str())
}

/// Index of another occupied slot already using `endpoint`, if any.
///
/// `occupied` yields `(slot_index, endpoint)` for every occupied slot.
pub fn find_duplicate<'a>(
    occupied: impl IntoIterator<Item = (usize, &'a Endpoint)>,
    endpoint: &Endpoint,
    excluding: Option<usize>,
) -> Option<usize> {
    occupied
        .into_iter()
        .find(|(index, other)| Some(*index) != excluding && *other == endpoint)
        .map(|(index, _)| index)
}

/// Format and blacklist checks with the configured extra blacklist.
#[derive(Debug, Clone, Default)]
pub struct EndpointValidator {
    extra_blacklist: Vec<String>,
}

impl EndpointValidator {
    pub fn new(extra_blacklist: &[String]) -> Self {
        Self {
            extra_blacklist: extra_blacklist
                .iter()
                .map(|h| h.trim_end_matches('.').to_ascii_lowercase())
                .collect(),
        }
    }

    /// Whether `host` is a built-in alias or in the configured blacklist.
    pub fn is_blacklisted(&self, host: &str) -> bool {
        is_blacklisted(host) || self.extra_blacklist.iter().any(|h| h == host)
    }

    /// Parse `raw` and reject blacklisted hosts.
    pub fn validate(&self, raw: &str) -> Result<Endpoint, SlotError> {
        let endpoint = parse_endpoint(raw)?;
        if self.is_blacklisted(&endpoint.host) {
            return Err(SlotError::BlacklistedHost(endpoint.host));
        }
        Ok(endpoint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_hostname_with_port() {
        let ep = EndpointValidator::default()
            .validate("play.example.com:25565")
            .unwrap();
        assert_eq!(ep.host, "play.example.com");
        assert_eq!(ep.port, 25565);
    }

    #[test]
    fn accepts_ipv4_and_single_label() {
        let v = EndpointValidator::default();
        assert_eq!(v.validate("203.0.113.7:19132").unwrap().host, "203.0.113.7");
        assert_eq!(v.validate("minecraft:25565").unwrap().host, "minecraft");
    }

    #[test]
    fn normalizes_case_whitespace_and_trailing_dot() {
        let ep = parse_endpoint("  Play.Example.COM.:25565 ").unwrap();
        assert_eq!(ep.to_string(), "play.example.com:25565");
    }

    #[test]
    fn rejects_malformed() {
        for raw in [
            "not-an-endpoint",
            "",
            ":25565",
            "host:",
            "host:port",
            "host:0",
            "host:65536",
            "host:-1",
            "-bad.example.com:1",
            "bad-.example.com:1",
            "a..b:1",
            "http://example.com:80",
            "example.com:80/path",
            "exa mple.com:80",
        ] {
            assert!(
                matches!(parse_endpoint(raw), Err(SlotError::InvalidFormat(_))),
                "should reject {raw:?}"
            );
        }
    }

    #[test]
    fn rejects_overlong_host() {
        let label = "a".repeat(63);
        let host = [label.as_str(); 5].join(".");
        assert!(host.len() > MAX_HOST_LEN);
        assert!(parse_endpoint(&format!("{host}:1")).is_err());
    }

    #[test]
    fn loopback_aliases_are_blacklisted() {
        let v = EndpointValidator::default();
        assert_eq!(
            v.validate("localhost:25565"),
            Err(SlotError::BlacklistedHost("localhost".into()))
        );
        assert!(matches!(
            v.validate("127.0.0.1:25565"),
            Err(SlotError::BlacklistedHost(_))
        ));
        assert!(matches!(
            v.validate("0.0.0.0:1"),
            Err(SlotError::BlacklistedHost(_))
        ));
        assert!(is_blacklisted("LOCALHOST."));
        assert!(!is_blacklisted("play.example.com"));
    }

    #[test]
    fn configured_blacklist_applies() {
        let v = EndpointValidator::new(&["Internal.LAN".to_string()]);
        assert!(matches!(
            v.validate("internal.lan:25565"),
            Err(SlotError::BlacklistedHost(_))
        ));
        assert!(v.validate("public.example.net:25565").is_ok());
    }

    #[test]
    fn find_duplicate_skips_excluded_slot() {
        let a = Endpoint::new("a.example.com", 1);
        let b = Endpoint::new("b.example.com", 1);
        let occupied = [(0, &a), (2, &b)];

        assert_eq!(find_duplicate(occupied, &a, None), Some(0));
        assert_eq!(find_duplicate(occupied, &a, Some(0)), None);
        assert_eq!(find_duplicate(occupied, &b, Some(0)), Some(2));
        assert_eq!(
            find_duplicate(occupied, &Endpoint::new("c.example.com", 1), None),
            None
        );
    }
}
