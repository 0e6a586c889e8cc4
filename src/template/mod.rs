//! # Template Module
//!
//! Template tokens, the default placeholder-tag parser, and the template
//! and context source contracts.
//!
//! ## Overview
//!
//! A template is parsed once into a token list: literal byte runs,
//! fragment placeholders, and named slots. The [`TemplateSource`] and
//! [`ContextSource`] traits are the seams where deployments plug in their
//! own transports; [`FsTemplateSource`] and [`TagParser`] are the stock
//! implementations used by the `weft serve` binary.

mod parser;
mod source;
mod token;

pub use parser::TagParser;
pub use source::FsTemplateSource;
pub use token::{Context, ContextSource, EmptyContext, StaticContext, TemplateParser, TemplateSource, Token};
