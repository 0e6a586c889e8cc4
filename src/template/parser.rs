use super::{TemplateParser, Token};
use crate::error::WeftError;
use crate::fragment::FragmentAttributes;
use bytes::Bytes;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::time::Duration;

/// `key="value"` and bare-flag attribute pairs inside a tag.
static ATTR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"([a-zA-Z0-9_-]+)(?:\s*=\s*"([^"]*)")?"#).unwrap());

/// Default template parser recognising self-closing fragment placeholder
/// tags and `<slot name="…"/>` insertion points.
///
/// The fragment tag name is configurable (`fragment` by default) so pages
/// migrating from another composition layer can keep their markup.
/// Everything between recognised tags is passed through verbatim.
pub struct TagParser {
    tag_re: Regex,
    default_timeout: Duration,
}

impl TagParser {
    /// # Arguments
    ///
    /// * `fragment_tag` - tag name treated as a fragment placeholder
    /// * `default_timeout` - timeout for tags without a `timeout` attribute
    pub fn new(fragment_tag: &str, default_timeout: Duration) -> Self {
        let pattern = format!(
            r#"<(?P<name>{}|slot)(?P<attrs>(?:\s[^>]*?)?)/?>"#,
            regex::escape(fragment_tag)
        );
        Self {
            // The pattern is built from an escaped tag name, so it always compiles.
            tag_re: Regex::new(&pattern).expect("tag pattern"),
            default_timeout,
        }
    }

    fn parse_attrs(raw: &str) -> HashMap<String, String> {
        ATTR_RE
            .captures_iter(raw)
            .map(|caps| {
                (
                    caps[1].to_string(),
                    caps.get(2).map(|m| m.as_str().to_string()).unwrap_or_default(),
                )
            })
            .collect()
    }
}

impl TemplateParser for TagParser {
    fn parse(&self, raw: &str) -> Result<Vec<Token>, WeftError> {
        let mut tokens = Vec::new();
        let mut cursor = 0;

        for caps in self.tag_re.captures_iter(raw) {
            let whole = caps.get(0).unwrap();
            if whole.start() > cursor {
                tokens.push(Token::Raw(Bytes::from(raw[cursor..whole.start()].to_string())));
            }
            cursor = whole.end();

            let attrs = Self::parse_attrs(caps.name("attrs").map(|m| m.as_str()).unwrap_or(""));
            if &caps["name"] == "slot" {
                let name = attrs
                    .get("name")
                    .filter(|n| !n.is_empty())
                    .ok_or_else(|| WeftError::TemplateParse("slot tag without name".to_string()))?;
                tokens.push(Token::Slot(name.clone()));
            } else {
                tokens.push(Token::Fragment(FragmentAttributes::from_tag(
                    &attrs,
                    self.default_timeout,
                )?));
            }
        }

        if cursor < raw.len() {
            tokens.push(Token::Raw(Bytes::from(raw[cursor..].to_string())));
        }
        Ok(tokens)
    }
}
