//! # Request Handler Module
//!
//! The request handler is the top-level pipeline for one page request. It
//! fetches the template and context in parallel, wires the template
//! processor, drives the head-write latch from the primary fragment's
//! events, and pumps the composed stream through the content-length meter
//! into the response.
//!
//! ## Head-write latch
//!
//! The response head is written exactly once, before any body byte. The
//! first of these claims it, in priority order:
//!
//! 1. the primary fragment's `response` — its status and filtered headers
//!    promote to the page, with preload hints derived from its `link`
//!    header;
//! 2. the primary fragment's `fallback` — 500 with baseline headers, body
//!    still streamed (it contains the fallback markup);
//! 3. the primary fragment's `error` — 500, response ended immediately;
//! 4. no fragment declares `primary` — 200 with baseline headers, written
//!    before streaming begins so primary-less pages flush progressively.
//!
//! Primary events arriving after the latch is cleared degrade to `warn`.
//!
//! ## Failure policy
//!
//! Context errors are swallowed (empty context). Template errors are fatal
//! and map to 404/500 with an optional presentable body. After head-write
//! nothing can change the status code; downstream write failures cancel
//! the in-flight pipeline through dropped channels. The meter always
//! closes, so the `end` event fires with the transmitted byte count no
//! matter how the request ended.

use crate::config::PipelineConfig;
use crate::error::WeftError;
use crate::events::{EventSink, FragmentEvent, FragmentNote, LogSink, PageEvent};
use crate::hints::preload_hints;
use crate::ids::RequestId;
use crate::processor::TemplateProcessor;
use crate::runtime_config::{spawn_pipeline, RuntimeConfig};
use crate::stream::{async_stream, ContentLengthMeter};
use crate::template::{Context, ContextSource, EmptyContext, TagParser, TemplateParser, TemplateSource, Token};
use may::sync::mpsc;
use std::collections::HashMap;
use std::io::{self, Write};
use std::sync::Arc;
use tracing::debug;

/// Inbound page request as seen by the composition pipeline.
#[derive(Debug, Clone)]
pub struct PageRequest {
    pub request_id: RequestId,
    pub method: String,
    /// Request path without the query string
    pub path: String,
    /// Headers with lowercased names
    pub headers: HashMap<String, String>,
}

impl PageRequest {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            request_id: RequestId::new(),
            method: "GET".to_string(),
            path: path.into(),
            headers: HashMap::new(),
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers
            .insert(name.to_ascii_lowercase(), value.to_string());
        self
    }

    /// Value of the `host` header, if any.
    pub fn host(&self) -> Option<&str> {
        self.headers.get("host").map(|s| s.as_str())
    }
}

/// Downstream response contract driven by the handler.
///
/// `write_head` is called exactly once per request, before any
/// `write_chunk`. Implementations should flush each chunk so composed
/// bytes reach the client progressively.
pub trait ResponseWriter {
    fn write_head(&mut self, status: u16, headers: &[(String, String)]) -> io::Result<()>;
    fn write_chunk(&mut self, chunk: &[u8]) -> io::Result<()>;
    fn finish(&mut self) -> io::Result<()>;
}

/// Headers present on every page response.
fn baseline_headers() -> Vec<(String, String)> {
    vec![
        (
            "cache-control".to_string(),
            "no-cache, no-store, must-revalidate".to_string(),
        ),
        ("pragma".to_string(), "no-cache".to_string()),
        ("content-type".to_string(), "text/html".to_string()),
    ]
}

/// Hop-by-hop headers never forwarded to fragment upstreams.
const HOP_HEADERS: [&str; 10] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "host",
    "content-length",
];

/// Headers forwarded to non-`public` fragment upstreams.
const PRIVATE_ALLOW: [&str; 3] = ["accept-language", "referer", "user-agent"];

/// Adapts a [`ResponseWriter`] body to `io::Write` for the meter.
struct ChunkSink<'a, W: ResponseWriter>(&'a mut W);

impl<W: ResponseWriter> Write for ChunkSink<'_, W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write_chunk(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Top-level pipeline composing one page per call.
///
/// Holds the shared upstream client and the pluggable template, context,
/// parser, and sink collaborators. One instance serves many requests.
pub struct RequestHandler {
    config: Arc<PipelineConfig>,
    runtime: RuntimeConfig,
    templates: Arc<dyn TemplateSource>,
    contexts: Arc<dyn ContextSource>,
    parser: Arc<dyn TemplateParser>,
    sink: Arc<dyn EventSink>,
    client: reqwest::blocking::Client,
}

impl RequestHandler {
    /// Build a handler with the stock collaborators: the tag parser from
    /// the config, an empty context source, and the logging sink.
    ///
    /// # Errors
    ///
    /// Returns `WeftError::Client` when the upstream HTTP client cannot be
    /// constructed.
    pub fn new(
        config: PipelineConfig,
        templates: Arc<dyn TemplateSource>,
    ) -> Result<Self, WeftError> {
        // Redirects stay with the fragment: a primary's 3xx must promote
        // to the page instead of being followed.
        let client = reqwest::blocking::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| WeftError::Client(e.to_string()))?;

        let parser = Arc::new(TagParser::new(&config.fragment_tag, config.default_timeout));
        Ok(Self {
            config: Arc::new(config),
            runtime: RuntimeConfig::from_env(),
            templates,
            contexts: Arc::new(EmptyContext),
            parser,
            sink: Arc::new(LogSink),
            client,
        })
    }

    pub fn with_context_source(mut self, contexts: Arc<dyn ContextSource>) -> Self {
        self.contexts = contexts;
        self
    }

    pub fn with_parser(mut self, parser: Arc<dyn TemplateParser>) -> Self {
        self.parser = parser;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_runtime(mut self, runtime: RuntimeConfig) -> Self {
        self.runtime = runtime;
        self
    }

    /// Compose the page for `request` into `response`.
    ///
    /// Blocks until the response is complete (including the async
    /// section) or the downstream write fails. Returns the number of body
    /// bytes written.
    pub fn handle<W: ResponseWriter>(
        &self,
        request: PageRequest,
        response: &mut W,
    ) -> Result<u64, WeftError> {
        let request_id = request.request_id;
        self.sink.emit(
            request_id,
            &PageEvent::Start {
                path: request.path.clone(),
            },
        );

        // Context resolves on its own coroutine while the template loads.
        let (ctx_tx, ctx_rx) = mpsc::channel();
        let contexts = self.contexts.clone();
        let ctx_request = request.clone();
        spawn_pipeline(self.runtime.stack_size, "context-fetch", move || {
            let _ = ctx_tx.send(contexts.fetch(&ctx_request));
        });

        let tokens = match self.templates.fetch(&request, self.parser.as_ref()) {
            Ok(tokens) => tokens,
            Err(err) => return self.fail_before_head(request_id, err, response),
        };

        let context = match ctx_rx.recv() {
            Ok(Ok(context)) => context,
            Ok(Err(err)) => {
                self.sink.emit(
                    request_id,
                    &PageEvent::ContextError {
                        message: err.to_string(),
                    },
                );
                Context::new()
            }
            Err(_) => {
                self.sink.emit(
                    request_id,
                    &PageEvent::ContextError {
                        message: "context fetch did not complete".to_string(),
                    },
                );
                Context::new()
            }
        };

        let has_primary = tokens
            .iter()
            .any(|t| matches!(t, Token::Fragment(attrs) if attrs.primary));

        let (notes_tx, notes_rx) = mpsc::channel();
        let (out_tx, out_rx) = mpsc::channel();
        let (late, late_reader) = async_stream(self.runtime.stack_size);

        let processor = TemplateProcessor::new(
            self.config.clone(),
            self.client.clone(),
            request_id,
            self.runtime.stack_size,
            notes_tx,
            out_tx,
            self.public_forward_headers(&request),
            self.private_forward_headers(&request),
        );
        spawn_pipeline(self.runtime.stack_size, "template-processor", move || {
            processor.run(tokens, context, late, late_reader);
        });

        // Head-write latch: wait for the primary's claim when one exists.
        let mut status: u16 = 200;
        let mut head_headers = baseline_headers();
        if has_primary {
            loop {
                let Ok(note) = notes_rx.recv() else {
                    // Pipeline wound down without a primary claim; stream
                    // whatever was composed under the defaults.
                    break;
                };
                self.sink
                    .emit(request_id, &PageEvent::Fragment(note.clone()));
                if !note.attributes.primary {
                    continue;
                }
                match &note.event {
                    FragmentEvent::Response {
                        status: upstream_status,
                        headers,
                    } => {
                        status = *upstream_status;
                        let filtered =
                            (self.config.filter_response_headers)(&note.attributes, headers);
                        head_headers.extend(filtered);
                        if let Some(location) = headers.get("location") {
                            head_headers.push(("location".to_string(), location.clone()));
                        }
                        if let Some(link) = headers.get("link") {
                            let hints = preload_hints(link, request.host());
                            if !hints.is_empty() {
                                head_headers.push(("link".to_string(), hints.join(",")));
                            }
                        }
                        break;
                    }
                    FragmentEvent::Fallback { .. } => {
                        status = 500;
                        break;
                    }
                    FragmentEvent::Error { .. } => {
                        return self.end_for_primary_error(request_id, notes_rx, response);
                    }
                    _ => {}
                }
            }
        }

        response.write_head(status, &head_headers)?;
        self.sink
            .emit(request_id, &PageEvent::Response { status });
        self.spawn_note_drain(request_id, notes_rx);

        // Pump composed bytes through the meter into the response.
        let sink = self.sink.clone();
        let mut meter = ContentLengthMeter::new(ChunkSink(&mut *response))
            .on_complete(move |bytes| sink.emit(request_id, &PageEvent::End { bytes }));
        let mut write_error: Option<io::Error> = None;
        while let Ok(chunk) = out_rx.recv() {
            if let Err(e) = meter.write_all(&chunk) {
                write_error = Some(e);
                break;
            }
        }
        // Dropping the receiver cancels a still-running processor.
        drop(out_rx);

        match write_error {
            Some(e) => {
                debug!(request_id = %request_id, error = %e, "Downstream write failed, cancelling pipeline");
                drop(meter);
                Err(WeftError::DownstreamWrite(e))
            }
            None => {
                let bytes = meter.finish()?;
                response.finish()?;
                Ok(bytes)
            }
        }
    }

    /// Primary fragment errored: 500 head, response ended with no body.
    fn end_for_primary_error<W: ResponseWriter>(
        &self,
        request_id: RequestId,
        notes_rx: mpsc::Receiver<FragmentNote>,
        response: &mut W,
    ) -> Result<u64, WeftError> {
        response.write_head(500, &baseline_headers())?;
        self.sink
            .emit(request_id, &PageEvent::Response { status: 500 });
        self.spawn_note_drain(request_id, notes_rx);

        let sink = self.sink.clone();
        let meter = ContentLengthMeter::new(ChunkSink(&mut *response))
            .on_complete(move |bytes| sink.emit(request_id, &PageEvent::End { bytes }));
        let bytes = meter.finish()?;
        response.finish()?;
        Ok(bytes)
    }

    /// A fatal error before the head: map to a status, emit `error`, and
    /// serve the presentable body when one exists.
    fn fail_before_head<W: ResponseWriter>(
        &self,
        request_id: RequestId,
        err: WeftError,
        response: &mut W,
    ) -> Result<u64, WeftError> {
        self.sink.emit(
            request_id,
            &PageEvent::Error {
                message: err.to_string(),
            },
        );
        let status = err.status_code();
        if response.write_head(status, &baseline_headers()).is_ok() {
            self.sink
                .emit(request_id, &PageEvent::Response { status });
            let sink = self.sink.clone();
            let mut meter = ContentLengthMeter::new(ChunkSink(&mut *response))
                .on_complete(move |bytes| sink.emit(request_id, &PageEvent::End { bytes }));
            if let Some(body) = err.presentable() {
                let _ = meter.write_all(body.as_bytes());
            }
            let _ = meter.finish();
            let _ = response.finish();
        }
        Err(err)
    }

    /// Forward the remaining fragment events to the sink after the head
    /// has been written, degrading late primary claims to warnings.
    fn spawn_note_drain(&self, request_id: RequestId, notes_rx: mpsc::Receiver<FragmentNote>) {
        let sink = self.sink.clone();
        spawn_pipeline(self.runtime.stack_size, "note-drain", move || {
            while let Ok(note) = notes_rx.recv() {
                let late_primary = note.attributes.primary
                    && matches!(
                        note.event,
                        FragmentEvent::Response { .. } | FragmentEvent::Fallback { .. }
                    );
                sink.emit(request_id, &PageEvent::Fragment(note.clone()));
                if late_primary {
                    sink.emit(
                        request_id,
                        &PageEvent::Fragment(FragmentNote {
                            index: note.index,
                            attributes: note.attributes,
                            event: FragmentEvent::Warn {
                                message: "primary response after head write; ignored".to_string(),
                            },
                        }),
                    );
                }
            }
        });
    }

    /// Full inbound header set minus hop-by-hop headers, for `public`
    /// fragments.
    fn public_forward_headers(&self, request: &PageRequest) -> HashMap<String, String> {
        request
            .headers
            .iter()
            .filter(|(name, _)| !HOP_HEADERS.contains(&name.as_str()))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect()
    }

    /// Minimal allow-list for everything else.
    fn private_forward_headers(&self, request: &PageRequest) -> HashMap<String, String> {
        request
            .headers
            .iter()
            .filter(|(name, _)| PRIVATE_ALLOW.contains(&name.as_str()))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_baseline_headers() {
        let headers = baseline_headers();
        assert!(headers.iter().any(|(n, v)| n == "cache-control"
            && v == "no-cache, no-store, must-revalidate"));
        assert!(headers.iter().any(|(n, v)| n == "pragma" && v == "no-cache"));
        assert!(headers.iter().any(|(n, v)| n == "content-type" && v == "text/html"));
    }

    #[test]
    fn test_forward_header_split() {
        let dir = tempfile::tempdir().unwrap();
        let handler = RequestHandler::new(
            PipelineConfig::default(),
            Arc::new(crate::template::FsTemplateSource::new(dir.path())),
        )
        .unwrap();
        let request = PageRequest::new("/")
            .with_header("host", "page.test")
            .with_header("cookie", "session=1")
            .with_header("accept-language", "en")
            .with_header("connection", "keep-alive");

        let public = handler.public_forward_headers(&request);
        assert!(public.contains_key("cookie"));
        assert!(public.contains_key("accept-language"));
        assert!(!public.contains_key("host"));
        assert!(!public.contains_key("connection"));

        let private = handler.private_forward_headers(&request);
        assert_eq!(private.len(), 1);
        assert!(private.contains_key("accept-language"));
    }
}
