use crate::error::WeftError;
use crate::fragment::FragmentAttributes;
use crate::handler::PageRequest;
use bytes::Bytes;
use std::collections::HashMap;

/// Values resolved per request and substituted into named slots.
pub type Context = HashMap<String, String>;

/// One parsed unit of a page template.
#[derive(Debug, Clone)]
pub enum Token {
    /// Literal template bytes, emitted verbatim
    Raw(Bytes),
    /// Fragment placeholder
    Fragment(FragmentAttributes),
    /// Named insertion point resolved from the request context
    Slot(String),
}

/// Pure transformation from raw template text to tokens.
pub trait TemplateParser: Send + Sync {
    fn parse(&self, raw: &str) -> Result<Vec<Token>, WeftError>;
}

/// Provides the parsed template for a page request.
///
/// May fail with `WeftError::TemplateNotFound` (mapped to a 404) or
/// `WeftError::TemplateFetch` (mapped to a 500); both are fatal.
pub trait TemplateSource: Send + Sync {
    fn fetch(&self, request: &PageRequest, parser: &dyn TemplateParser)
        -> Result<Vec<Token>, WeftError>;
}

/// Provides the slot-resolution context for a page request.
///
/// Failures are non-fatal; the handler substitutes an empty context.
pub trait ContextSource: Send + Sync {
    fn fetch(&self, request: &PageRequest) -> Result<Context, WeftError>;
}

/// Context source that always resolves to nothing.
pub struct EmptyContext;

impl ContextSource for EmptyContext {
    fn fetch(&self, _request: &PageRequest) -> Result<Context, WeftError> {
        Ok(Context::new())
    }
}

/// Fixed context returned for every request, mainly useful in tests.
pub struct StaticContext(pub Context);

impl ContextSource for StaticContext {
    fn fetch(&self, _request: &PageRequest) -> Result<Context, WeftError> {
        Ok(self.0.clone())
    }
}
