use super::{TemplateParser, Token};
use crate::error::WeftError;
use crate::handler::PageRequest;
use std::path::PathBuf;
use tracing::debug;

/// Template source backed by a directory of `.html` files.
///
/// `/` resolves to `index.html`; any other path resolves to
/// `<root>/<path>.html`. Path traversal segments are rejected as not
/// found.
pub struct FsTemplateSource {
    root: PathBuf,
}

impl FsTemplateSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn template_path(&self, request_path: &str) -> Option<PathBuf> {
        let name = request_path.trim_matches('/');
        let name = if name.is_empty() { "index" } else { name };
        if name.split('/').any(|seg| seg == "..") {
            return None;
        }
        Some(self.root.join(format!("{name}.html")))
    }
}

impl super::TemplateSource for FsTemplateSource {
    fn fetch(
        &self,
        request: &PageRequest,
        parser: &dyn TemplateParser,
    ) -> Result<Vec<Token>, WeftError> {
        let path = self
            .template_path(&request.path)
            .ok_or_else(|| WeftError::TemplateNotFound {
                path: request.path.clone(),
                presentable: None,
            })?;
        debug!(request_id = %request.request_id, template = %path.display(), "Loading template");

        match std::fs::read_to_string(&path) {
            Ok(raw) => parser.parse(&raw),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(WeftError::TemplateNotFound {
                    path: request.path.clone(),
                    presentable: None,
                })
            }
            Err(e) => Err(WeftError::TemplateFetch {
                reason: e.to_string(),
                presentable: None,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::{TagParser, TemplateSource};
    use super::*;
    use std::time::Duration;

    fn request(path: &str) -> PageRequest {
        PageRequest::new(path)
    }

    #[test]
    fn test_index_template_for_root() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("index.html"), "<p>home</p>").unwrap();
        let source = FsTemplateSource::new(dir.path());
        let parser = TagParser::new("fragment", Duration::from_millis(100));
        let tokens = source.fetch(&request("/"), &parser).unwrap();
        assert_eq!(tokens.len(), 1);
    }

    #[test]
    fn test_missing_template_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let source = FsTemplateSource::new(dir.path());
        let parser = TagParser::new("fragment", Duration::from_millis(100));
        let err = source.fetch(&request("/nope"), &parser).unwrap_err();
        assert!(matches!(err, WeftError::TemplateNotFound { .. }));
    }

    #[test]
    fn test_traversal_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let source = FsTemplateSource::new(dir.path());
        let parser = TagParser::new("fragment", Duration::from_millis(100));
        let err = source.fetch(&request("/../etc/passwd"), &parser).unwrap_err();
        assert!(matches!(err, WeftError::TemplateNotFound { .. }));
    }
}
