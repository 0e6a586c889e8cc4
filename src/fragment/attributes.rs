use crate::error::WeftError;
use std::collections::HashMap;
use std::time::Duration;
use url::Url;

/// Immutable record parsed from a fragment placeholder tag.
///
/// Recognised attributes: `src`, `id`, `primary`, `async`, `public`,
/// `fallback-url`, `timeout`, `return-headers`.
#[derive(Debug, Clone)]
pub struct FragmentAttributes {
    /// Upstream endpoint (required, absolute)
    pub url: Url,
    /// Stable identifier for logging and perf correlation
    pub id: Option<String>,
    /// Promote this fragment's upstream status and headers to the page response
    pub primary: bool,
    /// Stream the body through the async section instead of inline
    pub is_async: bool,
    /// Forward the full inbound header set upstream; scrubbed otherwise
    pub public: bool,
    /// Tried once when the primary URL fails
    pub fallback_url: Option<Url>,
    /// Dispatch-to-first-byte budget
    pub timeout: Duration,
    /// Opt-in to response header propagation
    pub return_headers: bool,
}

fn flag(attrs: &HashMap<String, String>, name: &str) -> bool {
    match attrs.get(name) {
        Some(value) => value != "false",
        None => false,
    }
}

impl FragmentAttributes {
    /// Minimal attributes for the given upstream URL; everything else off.
    pub fn new(url: Url) -> Self {
        Self {
            url,
            id: None,
            primary: false,
            is_async: false,
            public: false,
            fallback_url: None,
            timeout: Duration::from_millis(3000),
            return_headers: false,
        }
    }

    /// Build attributes from a parsed tag's attribute map.
    ///
    /// # Errors
    ///
    /// Returns `WeftError::TemplateParse` when `src` is missing or not an
    /// absolute URL, or when `fallback-url` is present but invalid.
    pub fn from_tag(
        attrs: &HashMap<String, String>,
        default_timeout: Duration,
    ) -> Result<Self, WeftError> {
        let src = attrs
            .get("src")
            .ok_or_else(|| WeftError::TemplateParse("fragment tag without src".to_string()))?;
        let url = Url::parse(src)
            .map_err(|e| WeftError::TemplateParse(format!("invalid fragment src {src:?}: {e}")))?;

        let fallback_url = match attrs.get("fallback-url") {
            Some(raw) => Some(Url::parse(raw).map_err(|e| {
                WeftError::TemplateParse(format!("invalid fallback-url {raw:?}: {e}"))
            })?),
            None => None,
        };

        let timeout = attrs
            .get("timeout")
            .and_then(|t| t.parse::<u64>().ok())
            .map(Duration::from_millis)
            .unwrap_or(default_timeout);

        Ok(Self {
            url,
            id: attrs.get("id").cloned(),
            primary: flag(attrs, "primary"),
            is_async: flag(attrs, "async"),
            public: flag(attrs, "public"),
            fallback_url,
            timeout,
            return_headers: flag(attrs, "return-headers"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tag(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_minimal_tag() {
        let attrs = FragmentAttributes::from_tag(
            &tag(&[("src", "http://upstream.test/a")]),
            Duration::from_millis(3000),
        )
        .unwrap();
        assert_eq!(attrs.url.as_str(), "http://upstream.test/a");
        assert!(!attrs.primary);
        assert!(!attrs.is_async);
        assert_eq!(attrs.timeout, Duration::from_millis(3000));
    }

    #[test]
    fn test_full_tag() {
        let attrs = FragmentAttributes::from_tag(
            &tag(&[
                ("src", "http://upstream.test/a"),
                ("id", "header"),
                ("primary", ""),
                ("async", ""),
                ("public", ""),
                ("fallback-url", "http://fallback.test/a"),
                ("timeout", "250"),
                ("return-headers", ""),
            ]),
            Duration::from_millis(3000),
        )
        .unwrap();
        assert_eq!(attrs.id.as_deref(), Some("header"));
        assert!(attrs.primary && attrs.is_async && attrs.public && attrs.return_headers);
        assert_eq!(
            attrs.fallback_url.as_ref().map(|u| u.as_str()),
            Some("http://fallback.test/a")
        );
        assert_eq!(attrs.timeout, Duration::from_millis(250));
    }

    #[test]
    fn test_explicit_false_flag() {
        let attrs = FragmentAttributes::from_tag(
            &tag(&[("src", "http://upstream.test/a"), ("primary", "false")]),
            Duration::from_millis(3000),
        )
        .unwrap();
        assert!(!attrs.primary);
    }

    #[test]
    fn test_missing_src_rejected() {
        assert!(FragmentAttributes::from_tag(&tag(&[("id", "x")]), Duration::from_millis(1)).is_err());
    }

    #[test]
    fn test_relative_src_rejected() {
        assert!(
            FragmentAttributes::from_tag(&tag(&[("src", "/relative")]), Duration::from_millis(1))
                .is_err()
        );
    }
}
