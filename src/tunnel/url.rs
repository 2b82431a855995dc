//! Public URL extraction from tunnel output

use crate::error::{Error, Result};
use regex::Regex;

/// Matches `https://<subdomain>.<provider-domain>` in a line of tunnel output
#[derive(Clone, Debug)]
pub struct TunnelUrlMatcher {
    pattern: Regex,
    api_host: String,
}

impl TunnelUrlMatcher {
    /// Build a matcher for the given provider domain (e.g. `trycloudflare.com`)
    pub fn new(domain: &str) -> Result<Self> {
        let domain = domain.trim().trim_start_matches('.');
        if domain.is_empty() {
            return Err(Error::Config {
                message: "tunnel provider domain must not be empty".to_string(),
                key: Some("provider_domain".to_string()),
            });
        }
        let pattern = format!(
            r"https://[A-Za-z0-9-]+(?:\.[A-Za-z0-9-]+)*\.{}\b",
            regex::escape(domain)
        );
        let pattern = Regex::new(&pattern).map_err(|e| Error::Config {
            message: format!("invalid tunnel provider domain '{domain}': {e}"),
            key: Some("provider_domain".to_string()),
        })?;
        Ok(Self {
            pattern,
            api_host: format!("https://api.{domain}"),
        })
    }

    /// First public URL in `line`, if any
    ///
    /// The provider's own API endpoint shows up in error messages
    /// (`https://api.<domain>/tunnel`) and is never a tunnel URL.
    pub fn find(&self, line: &str) -> Option<String> {
        self.pattern
            .find_iter(line)
            .map(|m| m.as_str())
            .find(|url| *url != self.api_host)
            .map(str::to_string)
    }
}
