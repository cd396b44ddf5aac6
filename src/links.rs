//! Source-link validation.
//!
//! Membership is a case-insensitive substring match against a domain list,
//! so `https://evil.example/?facebook.com` is accepted too. The resolver is
//! the real gate; this only filters obvious non-links before a paid lookup.

use thiserror::Error;

/// Domains accepted by default.
pub const DEFAULT_ALLOWED_DOMAINS: &[&str] = &[
    "facebook.com",
    "fb.com",
    "fb.watch",
    "www.facebook.com",
    "m.facebook.com",
    "web.facebook.com",
];

/// Longest link worth sending to the resolver.
pub const MAX_LINK_LENGTH: usize = 2048;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LinkError {
    #[error("message is empty")]
    Empty,

    #[error("link is longer than {MAX_LINK_LENGTH} characters")]
    TooLong,

    #[error("not a supported source link")]
    UnsupportedDomain,
}

#[derive(Debug, Clone)]
pub struct SourceLinkValidator {
    domains: Vec<String>,
}

impl Default for SourceLinkValidator {
    fn default() -> Self {
        Self::new(DEFAULT_ALLOWED_DOMAINS.iter().copied())
    }
}

impl SourceLinkValidator {
    /// Blank entries are ignored. An empty list accepts nothing.
    pub fn new<I, S>(domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let domains = domains
            .into_iter()
            .map(|d| d.as_ref().trim().to_ascii_lowercase())
            .filter(|d| !d.is_empty())
            .collect();
        Self { domains }
    }

    pub fn domains(&self) -> &[String] {
        &self.domains
    }

    /// Validate a user message, returning the trimmed link.
    pub fn validate<'a>(&self, text: &'a str) -> Result<&'a str, LinkError> {
        let link = text.trim();
        if link.is_empty() {
            return Err(LinkError::Empty);
        }
        if link.len() > MAX_LINK_LENGTH {
            return Err(LinkError::TooLong);
        }
        let lowered = link.to_lowercase();
        if self.domains.iter().any(|d| lowered.contains(d.as_str())) {
            Ok(link)
        } else {
            Err(LinkError::UnsupportedDomain)
        }
    }

    pub fn is_supported(&self, text: &str) -> bool {
        self.validate(text).is_ok()
    }
}
