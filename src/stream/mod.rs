//! # Stream Module
//!
//! Byte-stream plumbing for the composed response: the pass-through
//! content-length meter and the multiplexed async section channel.

mod async_stream;
mod meter;

pub use async_stream::{async_stream, AsyncStream, AsyncStreamReader, AsyncSub, PluggedError};
pub use meter::ContentLengthMeter;
