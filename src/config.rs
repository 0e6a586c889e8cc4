//! # Pipeline Configuration Module
//!
//! Composition-level options for the fragment pipeline.
//!
//! ## Environment Variables
//!
//! - `WEFT_MAX_ASSET_LINKS`: index step between successive fragments
//!   (default: 1). Each fragment reserves this many identifier slots for
//!   its client-side scripts and styles.
//! - `WEFT_FRAGMENT_TAG`: tag name recognised as a fragment placeholder
//!   (default: `fragment`).
//! - `WEFT_DEFAULT_TIMEOUT_MS`: per-fragment timeout applied when a tag
//!   carries no `timeout` attribute (default: 3000).

use crate::fragment::FragmentAttributes;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Projection applied to the primary fragment's upstream response headers
/// before they are merged into the page response.
pub type HeaderFilter =
    Arc<dyn Fn(&FragmentAttributes, &HashMap<String, String>) -> Vec<(String, String)> + Send + Sync>;

/// Options governing template processing and fragment composition.
#[derive(Clone)]
pub struct PipelineConfig {
    /// Index step between successive fragments (must be >= 1)
    pub max_asset_links: usize,
    /// Tag name recognised as a fragment placeholder
    pub fragment_tag: String,
    /// Timeout applied when a fragment tag carries no `timeout` attribute
    pub default_timeout: Duration,
    /// HTML substituted inline when a fragment fails without a fallback URL
    pub fallback_snippet: String,
    /// Response header projection for the primary fragment
    pub filter_response_headers: HeaderFilter,
}

impl PipelineConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults for anything unset or unparseable.
    pub fn from_env() -> Self {
        let max_asset_links = std::env::var("WEFT_MAX_ASSET_LINKS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(1);

        let fragment_tag =
            std::env::var("WEFT_FRAGMENT_TAG").unwrap_or_else(|_| "fragment".to_string());

        let default_timeout_ms = std::env::var("WEFT_DEFAULT_TIMEOUT_MS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(3000);

        Self {
            max_asset_links: max_asset_links.max(1),
            fragment_tag,
            default_timeout: Duration::from_millis(default_timeout_ms),
            ..Self::default()
        }
    }

    /// Replace the primary response header projection.
    pub fn with_header_filter(mut self, filter: HeaderFilter) -> Self {
        self.filter_response_headers = filter;
        self
    }

    /// Replace the inline fallback snippet.
    pub fn with_fallback_snippet(mut self, snippet: impl Into<String>) -> Self {
        self.fallback_snippet = snippet.into();
        self
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_asset_links: 1,
            fragment_tag: "fragment".to_string(),
            default_timeout: Duration::from_millis(3000),
            fallback_snippet: String::new(),
            filter_response_headers: Arc::new(|_, _| Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.max_asset_links, 1);
        assert_eq!(config.fragment_tag, "fragment");
        assert_eq!(config.default_timeout, Duration::from_millis(3000));
        assert!(config.fallback_snippet.is_empty());
    }

    #[test]
    fn test_header_filter_override() {
        let config = PipelineConfig::default().with_header_filter(Arc::new(|_, headers| {
            headers
                .get("set-cookie")
                .map(|v| vec![("set-cookie".to_string(), v.clone())])
                .unwrap_or_default()
        }));
        let mut upstream = HashMap::new();
        upstream.insert("set-cookie".to_string(), "a=b".to_string());
        upstream.insert("server".to_string(), "x".to_string());
        let attrs = FragmentAttributes::new("http://frag.test/".parse().unwrap());
        let kept = (config.filter_response_headers)(&attrs, &upstream);
        assert_eq!(kept, vec![("set-cookie".to_string(), "a=b".to_string())]);
    }
}
