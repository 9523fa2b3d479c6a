//! Navigation allow/deny matching for per-tab `BrowserContext`s.
//!
//! Mirrors the host-level policy/gateway pattern (snapshot settings at setup,
//! re-evaluate per navigation) rather than re-checking config on every call.

use serde::{Deserialize, Serialize};
use url::Url;

/// Snapshot of firewall settings read once at executor setup. Changes to the
/// underlying config only take effect for the next task.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FirewallConfig {
    pub enabled: bool,
    #[serde(default)]
    pub allow_list: Vec<String>,
    #[serde(default)]
    pub deny_list: Vec<String>,
}

impl FirewallConfig {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            allow_list: Vec::new(),
            deny_list: Vec::new(),
        }
    }

    /// Check whether `url` may be navigated to. Returns `Ok(())` if allowed,
    /// `Err(reason)` otherwise.
    pub fn check(&self, url: &str) -> Result<(), String> {
        if !self.enabled {
            return Ok(());
        }
        let parsed = Url::parse(url).map_err(|err| format!("unparseable URL '{url}': {err}"))?;
        let host = parsed.host_str().unwrap_or("").to_ascii_lowercase();
        let path = parsed.path();
        let subject = format!("{host}{path}");

        if self
            .deny_list
            .iter()
            .any(|pattern| glob_match(pattern, &host) || glob_match(pattern, &subject))
        {
            return Err(format!("{url} matches a denied pattern"));
        }

        if !self.allow_list.is_empty()
            && !self
                .allow_list
                .iter()
                .any(|pattern| glob_match(pattern, &host) || glob_match(pattern, &subject))
        {
            return Err(format!("{url} is not in the allow list"));
        }

        Ok(())
    }
}

/// Minimal glob-ish matcher supporting a leading/trailing `*` wildcard, the
/// common shape of host/path allow-deny patterns (`*.example.com`,
/// `example.com/admin*`).
fn glob_match(pattern: &str, subject: &str) -> bool {
    let pattern = pattern.to_ascii_lowercase();
    match (pattern.strip_prefix('*'), pattern.strip_suffix('*')) {
        (Some(suffix), _) if pattern.starts_with('*') => subject.ends_with(suffix),
        (_, Some(prefix)) => subject.starts_with(prefix),
        _ => subject == pattern || subject.starts_with(&format!("{pattern}/")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_firewall_allows_everything() {
        let fw = FirewallConfig::disabled();
        assert!(fw.check("https://evil.example/anything").is_ok());
    }

    #[test]
    fn deny_list_blocks_matching_host() {
        let fw = FirewallConfig {
            enabled: true,
            allow_list: Vec::new(),
            deny_list: vec!["example.com".to_string()],
        };
        assert!(fw.check("https://example.com/page").is_err());
        assert!(fw.check("https://other.com/page").is_ok());
    }

    #[test]
    fn allow_list_is_exclusive_when_non_empty() {
        let fw = FirewallConfig {
            enabled: true,
            allow_list: vec!["*.trusted.com".to_string()],
            deny_list: Vec::new(),
        };
        assert!(fw.check("https://app.trusted.com/dashboard").is_ok());
        assert!(fw.check("https://untrusted.com").is_err());
    }
}
