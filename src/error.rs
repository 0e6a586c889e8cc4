//! Error types for the composition pipeline.

use thiserror::Error;

/// Request-level failures surfaced by the handler.
///
/// Template failures are fatal before the response head is written and map
/// to an HTTP status (404 for `TemplateNotFound`, 500 otherwise). Context
/// failures are recovered by substituting an empty context. Downstream
/// write failures cancel the in-flight pipeline.
#[derive(Debug, Error)]
pub enum WeftError {
    #[error("template not found: {path}")]
    TemplateNotFound {
        path: String,
        presentable: Option<String>,
    },

    #[error("template fetch failed: {reason}")]
    TemplateFetch {
        reason: String,
        presentable: Option<String>,
    },

    #[error("template parse failed: {0}")]
    TemplateParse(String),

    #[error("context fetch failed: {0}")]
    Context(String),

    #[error("upstream client setup failed: {0}")]
    Client(String),

    #[error("downstream write failed: {0}")]
    DownstreamWrite(#[from] std::io::Error),
}

impl WeftError {
    /// HTTP status code written when this error aborts a request before
    /// the head has gone out.
    pub fn status_code(&self) -> u16 {
        match self {
            WeftError::TemplateNotFound { .. } => 404,
            _ => 500,
        }
    }

    /// Optional body shown to the client in place of the page.
    pub fn presentable(&self) -> Option<&str> {
        match self {
            WeftError::TemplateNotFound { presentable, .. }
            | WeftError::TemplateFetch { presentable, .. } => presentable.as_deref(),
            _ => None,
        }
    }
}

/// Terminal failure kinds for a single fragment request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FragmentError {
    #[error("upstream timed out")]
    Timeout,

    #[error("upstream returned status {0}")]
    Status(u16),

    #[error("upstream request failed: {0}")]
    Network(String),
}
