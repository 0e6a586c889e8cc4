//! Preload hint composition from upstream `link` headers.
//!
//! The primary fragment may advertise its assets through `link` response
//! headers. Stylesheet and fragment-script relations are rewritten into
//! `rel="preload"` hints on the page response so the browser discovers the
//! assets before the fragment's markup arrives.

use url::Url;

/// One entry of a parsed `link` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkEntry {
    pub uri: String,
    pub rel: Option<String>,
}

/// Parse a `link` header value into its entries.
///
/// Tolerant of missing or unquoted parameters; entries without a URI are
/// skipped.
pub fn parse_link_header(value: &str) -> Vec<LinkEntry> {
    let mut entries = Vec::new();
    for part in value.split(',') {
        let part = part.trim();
        let (Some(start), Some(end)) = (part.find('<'), part.find('>')) else {
            continue;
        };
        if end <= start {
            continue;
        }
        let uri = part[start + 1..end].to_string();
        let mut rel = None;
        for param in part[end + 1..].split(';') {
            if let Some((name, raw)) = param.split_once('=') {
                if name.trim().eq_ignore_ascii_case("rel") {
                    rel = Some(raw.trim().trim_matches('"').to_string());
                }
            }
        }
        entries.push(LinkEntry { uri, rel });
    }
    entries
}

/// Rewrite a primary fragment's `link` header into page preload hints.
///
/// Stylesheets become `as="style"` preloads; fragment scripts become
/// `as="script"` preloads, marked `crossorigin` when the script host
/// differs from the requesting host. Other relations are dropped.
pub fn preload_hints(link_value: &str, request_host: Option<&str>) -> Vec<String> {
    parse_link_header(link_value)
        .into_iter()
        .filter_map(|entry| match entry.rel.as_deref() {
            Some("stylesheet") => Some(format!(
                "<{}>; rel=\"preload\"; as=\"style\"; nopush",
                entry.uri
            )),
            Some("fragment-script") => {
                let mut hint = format!("<{}>; rel=\"preload\"; as=\"script\"; nopush", entry.uri);
                if cross_origin(&entry.uri, request_host) {
                    hint.push_str("; crossorigin");
                }
                Some(hint)
            }
            _ => None,
        })
        .collect()
}

/// Whether `uri` points at a host other than the one serving the page.
/// Ports are ignored; an unparseable URI is treated as same-origin.
fn cross_origin(uri: &str, request_host: Option<&str>) -> bool {
    let Some(host) = request_host else {
        return false;
    };
    let host = host.split(':').next().unwrap_or(host);
    match Url::parse(uri) {
        Ok(parsed) => parsed
            .host_str()
            .map(|h| !h.eq_ignore_ascii_case(host))
            .unwrap_or(false),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_single_entry() {
        let entries = parse_link_header("<http://cdn.test/a.css>; rel=\"stylesheet\"");
        assert_eq!(
            entries,
            vec![LinkEntry {
                uri: "http://cdn.test/a.css".to_string(),
                rel: Some("stylesheet".to_string()),
            }]
        );
    }

    #[test]
    fn test_parse_multiple_entries() {
        let entries = parse_link_header(
            "<http://cdn.test/a.css>; rel=\"stylesheet\",<http://cdn.test/a.js>; rel=\"fragment-script\"",
        );
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].rel.as_deref(), Some("fragment-script"));
    }

    #[test]
    fn test_stylesheet_hint() {
        let hints = preload_hints("<http://cdn.test/a.css>; rel=\"stylesheet\"", Some("page.test"));
        assert_eq!(
            hints,
            vec!["<http://cdn.test/a.css>; rel=\"preload\"; as=\"style\"; nopush".to_string()]
        );
    }

    #[test]
    fn test_same_origin_script_hint() {
        let hints = preload_hints(
            "<http://page.test/frag.js>; rel=\"fragment-script\"",
            Some("page.test:8080"),
        );
        assert_eq!(
            hints,
            vec!["<http://page.test/frag.js>; rel=\"preload\"; as=\"script\"; nopush".to_string()]
        );
    }

    #[test]
    fn test_cross_origin_script_hint() {
        let hints = preload_hints(
            "<http://cdn.test/frag.js>; rel=\"fragment-script\"",
            Some("page.test"),
        );
        assert_eq!(
            hints,
            vec![
                "<http://cdn.test/frag.js>; rel=\"preload\"; as=\"script\"; nopush; crossorigin"
                    .to_string()
            ]
        );
    }

    #[test]
    fn test_unrelated_relations_dropped() {
        let hints = preload_hints("<http://cdn.test/a>; rel=\"canonical\"", None);
        assert!(hints.is_empty());
    }
}
