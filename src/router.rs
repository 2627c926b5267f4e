//! Recognises hash-stamped request paths.
//!
//! A stamped path is `<prefix path><10 hex chars><key>`. Only a stamp that
//! equals the live fingerprint of `key` is served; any other stamp is
//! answered with a redirect to the bare key.

use regex::{Regex, RegexBuilder};

use crate::cache::AssetCache;
use crate::error::ConfigError;
use crate::hasher::FINGERPRINT_LEN;

/// Outcome of matching a request path against the live cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route<'a> {
    /// Hash-stamped path whose hash matches the cached entry for `key`.
    Hit { hash: &'a str, key: &'a str },
    /// Hash-stamped path for an unknown key or an outdated hash.
    Stale { hash: &'a str, key: &'a str },
    /// Not a hash-stamped path.
    Pass,
}

#[derive(Debug, Clone)]
pub struct UrlRouter {
    prefix_path: String,
    pattern: Regex,
}

impl UrlRouter {
    pub fn new(prefix: &str) -> Result<Self, ConfigError> {
        let prefix_path = prefix_path(prefix)?;
        let pattern = Regex::new(&format!(
            "^{}([a-f0-9]{{{}}})(.*)$",
            regex::escape(&prefix_path),
            FINGERPRINT_LEN
        ))?;
        Ok(Self { prefix_path, pattern })
    }

    /// The path portion of the configured prefix.
    pub fn prefix_path(&self) -> &str {
        &self.prefix_path
    }

    /// Splits a hash-stamped path into its hash and key.
    pub fn match_path<'a>(&self, path: &'a str) -> Option<(&'a str, &'a str)> {
        let caps = self.pattern.captures(path)?;
        let hash = caps.get(1)?.as_str();
        let key = caps.get(2).map(|m| m.as_str()).unwrap_or("");
        Some((hash, key))
    }

    pub fn route<'a>(&self, path: &'a str, cache: &AssetCache) -> Route<'a> {
        match self.match_path(path) {
            Some((hash, key)) if cache.hash(key) == Some(hash) => Route::Hit { hash, key },
            Some((hash, key)) => Route::Stale { hash, key },
            None => Route::Pass,
        }
    }
}

/// Strips `scheme://host[:port]` from a prefix, keeping the path.
pub fn prefix_path(prefix: &str) -> Result<String, ConfigError> {
    if !prefix.contains("://") {
        return Ok(prefix.to_string());
    }
    let absolute = RegexBuilder::new(r"^[a-z]{3,5}://[a-z0-9\-_.]*(?::[0-9]*)?(/.*)$")
        .case_insensitive(true)
        .build()?;
    absolute
        .captures(prefix)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| ConfigError::InvalidPrefix(prefix.to_string()))
}

/// Bare path a stale hashed URL is redirected to. Leading slashes collapse
/// to one so the target can never be a protocol-relative URL.
pub fn redirect_target(key: &str) -> String {
    format!("/{}", key.trim_start_matches(['/', '\\']))
}
