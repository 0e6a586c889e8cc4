//! # Fragment Module
//!
//! The fragment module implements the per-fragment request lifecycle: one
//! upstream fetch with timeout, status validation, a single fallback
//! attempt, and a streamed body.
//!
//! ## Overview
//!
//! Each fragment placeholder in a template materialises into a [`Fragment`]
//! which `fetch()`es its upstream on a dedicated coroutine. The body flows
//! back through an mpsc channel of [`bytes::Bytes`] chunks; lifecycle
//! events flow through the request's note channel as
//! [`crate::events::FragmentNote`]s.
//!
//! ## Failure policy
//!
//! A timeout, connection error, or unacceptable status on the primary URL
//! triggers exactly one attempt against `fallback-url` when set. The
//! fragment emits exactly one terminal event: `end` (primary URL served),
//! `fallback` (fallback URL served), or `error` (nothing served).
//! Cancellation — the downstream reader dropping the body stream — is
//! silent and produces no terminal event.

mod attributes;
mod core;

pub use attributes::FragmentAttributes;
pub use core::{Fragment, FragmentOutcome, FragmentState, FragmentStream};
