//! Identity and derived fields of blocklist/allowlist entries.

use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};
use url::Url;

pub const ENTRY_ID_HEX_LEN: usize = 12;

pub const SCOPE_DOMAIN: &str = "domain";
pub const SCOPE_PATH: &str = "path";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    Blocked,
    Verified,
}

impl EntryKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EntryKind::Blocked => "blocked",
            EntryKind::Verified => "verified",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "blocked" => Some(EntryKind::Blocked),
            "verified" => Some(EntryKind::Verified),
            _ => None,
        }
    }
}

/// Canonical URL for a row that carries a url, a bare name, or both.
pub fn canonical_url(url: Option<&str>, name: Option<&str>) -> Option<String> {
    let url = url.map(str::trim).filter(|value| !value.is_empty());
    let name = name.map(str::trim).filter(|value| !value.is_empty());
    match (url, name) {
        (Some(url), _) if url.contains("://") => Some(url.to_string()),
        (Some(url), _) => Some(format!("http://{url}")),
        (None, Some(name)) => Some(format!("http://{}", strip_scheme(name))),
        (None, None) => None,
    }
}

/// Stable id: keccak of the lowercased canonical URL, truncated.
pub fn entry_id(canonical_url: &str) -> String {
    let normalized = canonical_url.trim().to_ascii_lowercase();
    let digest = Keccak256::digest(normalized.as_bytes());
    let mut id = hex::encode(digest);
    id.truncate(ENTRY_ID_HEX_LEN);
    id
}

/// Hostname without scheme, port or a leading `www.`, lowercased.
pub fn hostname_of(input: &str) -> Option<String> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return None;
    }
    let parsed = if trimmed.contains("://") {
        Url::parse(trimmed)
    } else {
        Url::parse(&format!("http://{trimmed}"))
    }
    .ok()?;
    let host = parsed.host_str()?.to_ascii_lowercase();
    let host = host.strip_prefix("www.").unwrap_or(&host);
    if host.is_empty() {
        return None;
    }
    Some(host.to_string())
}

/// `domain` when the URL covers the whole host, `path` when it names a specific page.
pub fn path_scope(canonical_url: &str) -> &'static str {
    match Url::parse(canonical_url) {
        Ok(parsed) if parsed.path() != "/" && !parsed.path().is_empty() => SCOPE_PATH,
        Ok(parsed) if parsed.query().is_some() => SCOPE_PATH,
        _ => SCOPE_DOMAIN,
    }
}

/// 0 for allowlisted entries; blocked entries rank by category and scope.
pub fn severity(kind: EntryKind, category: Option<&str>, scope: &str) -> i32 {
    if kind == EntryKind::Verified {
        return 0;
    }
    let base = match category.map(|value| value.trim().to_ascii_lowercase()) {
        Some(category) if category == "phishing" || category == "malware" => 3,
        Some(category) if category == "scamming" || category == "fake ico" => 2,
        Some(category) if category == "hacked" => 2,
        _ => 1,
    };
    // A whole-domain listing is more severe than a single compromised page.
    if scope == SCOPE_DOMAIN { base + 1 } else { base }
}

pub fn strip_scheme(value: &str) -> &str {
    let value = value.trim();
    value
        .strip_prefix("https://")
        .or_else(|| value.strip_prefix("http://"))
        .unwrap_or(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_is_stable_under_case_and_whitespace() {
        let a = entry_id("http://MyEtherWallet-Login.com");
        let b = entry_id("  http://myetherwallet-login.com \n");
        assert_eq!(a, b);
        assert_eq!(a.len(), ENTRY_ID_HEX_LEN);
        assert_ne!(a, entry_id("http://myetherwallet-login.net"));
    }

    #[test]
    fn canonical_url_prefers_url_then_name() {
        assert_eq!(
            canonical_url(Some("https://scam.io/x"), Some("other.io")).as_deref(),
            Some("https://scam.io/x")
        );
        assert_eq!(
            canonical_url(Some("scam.io"), None).as_deref(),
            Some("http://scam.io")
        );
        assert_eq!(
            canonical_url(None, Some("https://scam.io")).as_deref(),
            Some("http://scam.io")
        );
        assert_eq!(canonical_url(Some("  "), None), None);
    }

    #[test]
    fn hostname_strips_scheme_port_and_www() {
        assert_eq!(
            hostname_of("https://www.Example.com:8443/path?q=1").as_deref(),
            Some("example.com")
        );
        assert_eq!(hostname_of("example.com").as_deref(), Some("example.com"));
        assert_eq!(hostname_of(""), None);
    }

    #[test]
    fn scope_and_severity() {
        assert_eq!(path_scope("http://scam.io"), SCOPE_DOMAIN);
        assert_eq!(path_scope("http://scam.io/"), SCOPE_DOMAIN);
        assert_eq!(path_scope("http://sites.google.com/view/claim"), SCOPE_PATH);

        assert_eq!(severity(EntryKind::Verified, Some("Phishing"), SCOPE_DOMAIN), 0);
        assert_eq!(severity(EntryKind::Blocked, Some("Phishing"), SCOPE_DOMAIN), 4);
        assert_eq!(severity(EntryKind::Blocked, Some("Phishing"), SCOPE_PATH), 3);
        assert_eq!(severity(EntryKind::Blocked, None, SCOPE_PATH), 1);
    }
}
