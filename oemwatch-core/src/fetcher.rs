//! Cheap check: fetch + normalize + fingerprint. The only output relevant
//! upstream is `(fingerprint, normalized_html)`.

use std::time::Duration;

use regex::Regex;
use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request error: {0}")]
    Request(#[from] reqwest::Error),
    #[error("non-success status {0}")]
    Status(u16),
}

pub type Result<T> = std::result::Result<T, FetchError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckResult {
    pub fingerprint: String,
    pub normalized_html: String,
}

/// Noise-field attribute/parameter names stripped before hashing, per
/// `spec.md` §4.2 and the noise patterns in §4.6.
const NOISE_ATTR_PATTERNS: &[&str] = &[
    r#"\s+data-[a-z-]*csrf[a-z-]*="[^"]*""#,
    r#"\s+data-[a-z-]*nonce[a-z-]*="[^"]*""#,
];

mod patterns {
    use super::Regex;

    pub fn script_style() -> Regex {
        Regex::new(r"(?is)<script\b[^>]*>.*?</script>|<style\b[^>]*>.*?</style>").unwrap()
    }

    pub fn comments() -> Regex {
        Regex::new(r"(?s)<!--.*?-->").unwrap()
    }

    pub fn query_noise() -> Regex {
        Regex::new(r#"(?i)([?&])(utm_[a-z]+|gclid|fbclid|sessionid|session_id|token|csrftoken)=[^&\s"']*"#).unwrap()
    }

    pub fn whitespace() -> Regex {
        Regex::new(r"\s+").unwrap()
    }
}

/// Strips script/style/comments, tracking query params and noise
/// attributes, lowercases, and collapses whitespace so equivalent loads
/// hash identically.
pub fn normalize_html(raw: &str) -> String {
    let mut text = patterns::script_style().replace_all(raw, "").into_owned();
    text = patterns::comments().replace_all(&text, "").into_owned();
    text = patterns::query_noise().replace_all(&text, "$1").into_owned();
    for pattern in NOISE_ATTR_PATTERNS {
        let re = Regex::new(pattern).unwrap();
        text = re.replace_all(&text, "").into_owned();
    }
    text = text.to_lowercase();
    patterns::whitespace()
        .replace_all(&text, " ")
        .trim()
        .to_string()
}

pub fn fingerprint(normalized_html: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalized_html.as_bytes());
    hex::encode(hasher.finalize())
}

pub struct Fetcher {
    client: reqwest::Client,
    timeout: Duration,
}

impl Fetcher {
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            timeout,
        }
    }

    pub async fn check(&self, url: &str) -> Result<CheckResult> {
        let response = self
            .client
            .get(url)
            .timeout(self.timeout)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }
        let raw = response.text().await?;
        let normalized_html = normalize_html(&raw);
        let fingerprint = fingerprint(&normalized_html);
        Ok(CheckResult {
            fingerprint,
            normalized_html,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_script_style_and_comments() {
        let raw = "<html><head><style>.a{}</style></head><body><!-- hi -->Hello</body></html>";
        let normalized = normalize_html(raw);
        assert!(!normalized.contains("style"));
        assert!(!normalized.contains("hi"));
        assert!(normalized.contains("hello"));
    }

    #[test]
    fn noise_only_mutation_yields_same_fingerprint() {
        let a = r#"<a href="/x?utm_source=foo">Link</a>"#;
        let b = r#"<a href="/x?utm_source=bar">Link</a>"#;
        assert_eq!(fingerprint(&normalize_html(a)), fingerprint(&normalize_html(b)));
    }

    #[test]
    fn content_change_yields_different_fingerprint() {
        let a = "<p>Price: $30000</p>";
        let b = "<p>Price: $29990</p>";
        assert_ne!(fingerprint(&normalize_html(a)), fingerprint(&normalize_html(b)));
    }
}
