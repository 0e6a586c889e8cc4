pub mod config;
pub mod error;
pub mod events;
pub mod fragment;
pub mod handler;
pub mod hints;
pub mod ids;
pub mod processor;
pub mod runtime_config;
pub mod server;
pub mod stream;
pub mod template;

pub use config::PipelineConfig;
pub use error::WeftError;
pub use events::{EventSink, LogSink, MetricsSink, PageEvent};
pub use fragment::{Fragment, FragmentAttributes};
pub use handler::{PageRequest, RequestHandler, ResponseWriter};
pub use template::{ContextSource, FsTemplateSource, TagParser, TemplateParser, TemplateSource, Token};

/// Client bootstrap runtime injected through the `pipe-js` slot.
pub const PIPE_JS: &str = include_str!("../static/pipe.js");
