//! Engine Configuration

use std::collections::BTreeMap;

use serde::Deserialize;

/// Engine configuration options
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Rewrite edited HTML into the most compact equivalent markup
    pub scrub_wikitext: bool,

    /// Strip bidi control characters next to category links
    pub scrub_bidi_chars: bool,

    /// Limits for the markup -> HTML direction
    pub wt2html_limits: BTreeMap<String, u64>,

    /// Limits for the HTML -> markup direction
    pub html2wt_limits: BTreeMap<String, u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            scrub_wikitext: false,
            scrub_bidi_chars: false,
            wt2html_limits: BTreeMap::from([("wikitextSize".to_string(), 1_000_000)]), // 1MB
            html2wt_limits: BTreeMap::from([("htmlSize".to_string(), 10_000_000)]), // 10MB
        }
    }
}

impl Config {
    pub fn with_scrub_wikitext(mut self, on: bool) -> Self {
        self.scrub_wikitext = on;
        self
    }

    pub fn with_scrub_bidi_chars(mut self, on: bool) -> Self {
        self.scrub_bidi_chars = on;
        self
    }

    /// Set one markup -> HTML limit
    pub fn with_wt2html_limit(mut self, resource: &str, limit: u64) -> Self {
        self.wt2html_limits.insert(resource.to_string(), limit);
        self
    }

    /// Set one HTML -> markup limit
    pub fn with_html2wt_limit(mut self, resource: &str, limit: u64) -> Self {
        self.html2wt_limits.insert(resource.to_string(), limit);
        self
    }
}
