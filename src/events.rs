//! # Pipeline Events Module
//!
//! Typed lifecycle events for page requests and fragment fetches.
//!
//! ## Overview
//!
//! Fragments report their lifecycle through a closed set of events rather
//! than dynamically named listeners. Each fragment coroutine pushes
//! [`FragmentNote`]s onto a per-request channel; the handler consumes them
//! to drive the head-write latch and re-emits every note through the
//! request's [`EventSink`] for observability.
//!
//! The sink interface is push-only. Fragments and the processor never hold
//! a reference back to the handler, which keeps the object graph acyclic.

use crate::error::FragmentError;
use crate::fragment::FragmentAttributes;
use crate::ids::RequestId;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tracing::{debug, info, warn};

/// Lifecycle events emitted by a single fragment.
///
/// Every fragment emits exactly one terminal event: `End`, `Error`, or
/// `Fallback`. `Timeout` and `Warn` are informational and may precede the
/// terminal event.
#[derive(Debug, Clone)]
pub enum FragmentEvent {
    /// Upstream request dispatched
    Start,
    /// Upstream status and headers received. Headers are populated only
    /// for primary fragments and fragments with `return-headers`.
    Response {
        status: u16,
        headers: HashMap<String, String>,
    },
    /// Body fully consumed
    End { bytes: u64 },
    /// Terminal failure
    Error { error: FragmentError },
    /// Primary URL failed, fallback URL served instead
    Fallback { error: FragmentError },
    /// An attempt exceeded the fragment's timeout
    Timeout,
    /// Non-fatal condition
    Warn { message: String },
}

impl FragmentEvent {
    /// Whether this event terminates the fragment's lifecycle.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            FragmentEvent::End { .. } | FragmentEvent::Error { .. } | FragmentEvent::Fallback { .. }
        )
    }
}

/// One fragment event tagged with the fragment's identity.
#[derive(Debug, Clone)]
pub struct FragmentNote {
    pub index: usize,
    pub attributes: FragmentAttributes,
    pub event: FragmentEvent,
}

/// Request-level events emitted by the handler.
#[derive(Debug, Clone)]
pub enum PageEvent {
    /// Request accepted
    Start { path: String },
    /// Response head written
    Response { status: u16 },
    /// Response finished; `bytes` is the count actually written downstream
    End { bytes: u64 },
    /// Request failed before the head could be written
    Error { message: String },
    /// Context fetch failed; an empty context was substituted
    ContextError { message: String },
    /// A fragment lifecycle event, re-emitted by the handler
    Fragment(FragmentNote),
}

/// Push-only observer for pipeline events.
///
/// Implementations must be cheap and non-blocking; they are invoked from
/// the handler's own execution context.
pub trait EventSink: Send + Sync {
    fn emit(&self, request_id: RequestId, event: &PageEvent);
}

/// Sink that forwards every event to `tracing`.
pub struct LogSink;

impl EventSink for LogSink {
    fn emit(&self, request_id: RequestId, event: &PageEvent) {
        match event {
            PageEvent::Start { path } => {
                info!(request_id = %request_id, path = %path, "Request start");
            }
            PageEvent::Response { status } => {
                info!(request_id = %request_id, status = status, "Response head written");
            }
            PageEvent::End { bytes } => {
                info!(request_id = %request_id, bytes = bytes, "Response complete");
            }
            PageEvent::Error { message } => {
                warn!(request_id = %request_id, error = %message, "Request failed");
            }
            PageEvent::ContextError { message } => {
                warn!(request_id = %request_id, error = %message, "Context fetch failed, using empty context");
            }
            PageEvent::Fragment(note) => match &note.event {
                FragmentEvent::Error { error } | FragmentEvent::Fallback { error } => {
                    warn!(
                        request_id = %request_id,
                        index = note.index,
                        fragment_id = note.attributes.id.as_deref().unwrap_or(""),
                        error = %error,
                        event = ?note.event,
                        "Fragment event"
                    );
                }
                other => {
                    debug!(
                        request_id = %request_id,
                        index = note.index,
                        fragment_id = note.attributes.id.as_deref().unwrap_or(""),
                        event = ?other,
                        "Fragment event"
                    );
                }
            },
        }
    }
}

/// Sink collecting counters suitable for a metrics endpoint.
///
/// All counters use atomic operations so a single instance can be shared
/// across requests without locks.
pub struct MetricsSink {
    requests: AtomicUsize,
    responses: AtomicUsize,
    fragment_errors: AtomicUsize,
    fragment_fallbacks: AtomicUsize,
    fragment_timeouts: AtomicUsize,
    bytes_total: AtomicU64,
}

impl Default for MetricsSink {
    fn default() -> Self {
        Self {
            requests: AtomicUsize::new(0),
            responses: AtomicUsize::new(0),
            fragment_errors: AtomicUsize::new(0),
            fragment_fallbacks: AtomicUsize::new(0),
            fragment_timeouts: AtomicUsize::new(0),
            bytes_total: AtomicU64::new(0),
        }
    }
}

impl MetricsSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::Relaxed)
    }

    pub fn response_count(&self) -> usize {
        self.responses.load(Ordering::Relaxed)
    }

    pub fn fragment_error_count(&self) -> usize {
        self.fragment_errors.load(Ordering::Relaxed)
    }

    pub fn fragment_fallback_count(&self) -> usize {
        self.fragment_fallbacks.load(Ordering::Relaxed)
    }

    pub fn fragment_timeout_count(&self) -> usize {
        self.fragment_timeouts.load(Ordering::Relaxed)
    }

    /// Total bytes written to clients across all completed requests.
    pub fn bytes_total(&self) -> u64 {
        self.bytes_total.load(Ordering::Relaxed)
    }
}

impl EventSink for MetricsSink {
    fn emit(&self, _request_id: RequestId, event: &PageEvent) {
        match event {
            PageEvent::Start { .. } => {
                self.requests.fetch_add(1, Ordering::Relaxed);
            }
            PageEvent::Response { .. } => {
                self.responses.fetch_add(1, Ordering::Relaxed);
            }
            PageEvent::End { bytes } => {
                self.bytes_total.fetch_add(*bytes, Ordering::Relaxed);
            }
            PageEvent::Fragment(note) => match note.event {
                FragmentEvent::Error { .. } => {
                    self.fragment_errors.fetch_add(1, Ordering::Relaxed);
                }
                FragmentEvent::Fallback { .. } => {
                    self.fragment_fallbacks.fetch_add(1, Ordering::Relaxed);
                }
                FragmentEvent::Timeout => {
                    self.fragment_timeouts.fetch_add(1, Ordering::Relaxed);
                }
                _ => {}
            },
            _ => {}
        }
    }
}
