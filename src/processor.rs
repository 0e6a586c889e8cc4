//! # Template Processor Module
//!
//! The template processor turns a parsed token list into the composed
//! response byte stream.
//!
//! ## Overview
//!
//! Processing happens in two passes. The first pass walks the tokens,
//! assigns each fragment its index, and dispatches every fragment fetch —
//! all fragments of a page are in flight before any body byte is spliced,
//! so a slow fragment never delays a later fragment's dispatch. The second
//! pass emits bytes in strict template order: raw runs verbatim, slots
//! from the context, inline fragment bodies between their `Pipe.start` /
//! `Pipe.end` script hooks, and a `Pipe.placeholder` hook for each async
//! fragment whose body is routed through the async stream instead.
//!
//! When the tokens are exhausted the async stream is plugged and its
//! sub-streams are appended, each wrapped in the same script hooks,
//! ordered by body arrival.
//!
//! ## Failure policy
//!
//! A fragment failure never aborts the page. A failed inline fragment is
//! replaced by the configured fallback snippet; a failed async fragment
//! leaves an HTML comment in the async section. The processor stops only
//! when the downstream consumer goes away, which cancels all remaining
//! fragments through their dropped channels.

use crate::config::PipelineConfig;
use crate::events::FragmentNote;
use crate::fragment::{Fragment, FragmentOutcome, FragmentStream};
use crate::ids::RequestId;
use crate::runtime_config::spawn_pipeline;
use crate::stream::{AsyncStream, AsyncStreamReader};
use crate::template::{Context, Token};
use bytes::Bytes;
use may::sync::mpsc;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Strictly increasing fragment index sequence.
///
/// The step equals `max_asset_links`, so each fragment reserves a
/// contiguous identifier range for its client-side scripts and styles.
pub struct IndexGenerator {
    next: usize,
    step: usize,
}

impl IndexGenerator {
    pub fn new(step: usize) -> Self {
        Self {
            next: 0,
            step: step.max(1),
        }
    }

    pub fn next_index(&mut self) -> usize {
        let index = self.next;
        self.next += self.step;
        index
    }
}

fn start_marker(index: usize) -> Bytes {
    Bytes::from(format!("<script>Pipe.start({index})</script>"))
}

fn end_marker(index: usize, script: Option<&str>) -> Bytes {
    let marker = match script {
        Some(script) => format!("<script>Pipe.end({index},\"{script}\")</script>"),
        None => format!("<script>Pipe.end({index})</script>"),
    };
    Bytes::from(marker)
}

fn placeholder_marker(index: usize) -> Bytes {
    Bytes::from(format!("<script>Pipe.placeholder({index})</script>"))
}

fn failure_comment(index: usize) -> Bytes {
    Bytes::from(format!("<!-- fragment {index} failed -->"))
}

enum Entry {
    Raw(Bytes),
    Slot(String),
    Inline { index: usize, stream: FragmentStream },
    AsyncPlaceholder { index: usize },
}

/// Consumes the token stream and produces the assembled output bytes.
pub struct TemplateProcessor {
    config: Arc<PipelineConfig>,
    client: reqwest::blocking::Client,
    request_id: RequestId,
    stack_size: usize,
    notes: mpsc::Sender<FragmentNote>,
    out: mpsc::Sender<Bytes>,
    /// Forwarded upstream for `public` fragments
    public_headers: HashMap<String, String>,
    /// Forwarded upstream for everything else
    private_headers: HashMap<String, String>,
}

impl TemplateProcessor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<PipelineConfig>,
        client: reqwest::blocking::Client,
        request_id: RequestId,
        stack_size: usize,
        notes: mpsc::Sender<FragmentNote>,
        out: mpsc::Sender<Bytes>,
        public_headers: HashMap<String, String>,
        private_headers: HashMap<String, String>,
    ) -> Self {
        Self {
            config,
            client,
            request_id,
            stack_size,
            notes,
            out,
            public_headers,
            private_headers,
        }
    }

    /// Process the whole template. Runs on its own coroutine; the output
    /// channel closes when it returns.
    pub fn run(
        self,
        tokens: Vec<Token>,
        context: Context,
        mut async_stream: AsyncStream,
        async_reader: AsyncStreamReader,
    ) {
        let mut indexes = IndexGenerator::new(self.config.max_asset_links);

        // Pass 1: materialise every fragment so all fetches are in flight
        // before any body is spliced.
        let mut entries = Vec::with_capacity(tokens.len());
        for token in tokens {
            match token {
                Token::Raw(bytes) => entries.push(Entry::Raw(bytes)),
                Token::Slot(name) => entries.push(Entry::Slot(name)),
                Token::Fragment(attrs) => {
                    let index = indexes.next_index();
                    let is_async = attrs.is_async;
                    let forward = if attrs.public {
                        self.public_headers.clone()
                    } else {
                        self.private_headers.clone()
                    };
                    let fragment =
                        Fragment::new(index, attrs, self.request_id, self.notes.clone());
                    let stream = fragment.fetch(self.client.clone(), forward, self.stack_size);

                    if is_async {
                        let (wrapped_tx, wrapped_rx) = mpsc::channel();
                        if async_stream.attach(index, wrapped_rx).is_ok() {
                            spawn_pipeline(self.stack_size, "async-wrap", move || {
                                wrap_async(index, stream, wrapped_tx);
                            });
                        }
                        entries.push(Entry::AsyncPlaceholder { index });
                    } else {
                        entries.push(Entry::Inline { index, stream });
                    }
                }
            }
        }

        // Pass 2: compose the inline section in template order.
        for entry in entries {
            let delivered = match entry {
                Entry::Raw(bytes) => self.send(bytes),
                Entry::Slot(name) => self.emit_slot(&name, &context),
                Entry::AsyncPlaceholder { index } => self.send(placeholder_marker(index)),
                Entry::Inline { index, stream } => self.splice_inline(index, stream),
            };
            if !delivered {
                debug!(request_id = %self.request_id, "Downstream gone, aborting template processing");
                return;
            }
        }

        async_stream.plug();
        while let Some(sub) = async_reader.next_sub() {
            let mut delivered = true;
            sub.drain(|chunk| {
                if delivered {
                    delivered = self.send(chunk);
                }
            });
            if !delivered {
                debug!(request_id = %self.request_id, "Downstream gone during async section");
                return;
            }
        }
        debug!(request_id = %self.request_id, "Template processing finished");
    }

    /// Send one chunk downstream; false means the consumer went away.
    fn send(&self, bytes: Bytes) -> bool {
        if bytes.is_empty() {
            return true;
        }
        self.out.send(bytes).is_ok()
    }

    fn emit_slot(&self, name: &str, context: &Context) -> bool {
        let value = match context.get(name) {
            Some(value) => value.clone(),
            None if name == "pipe-js" => format!(
                "<script type=\"text/javascript\">{}</script>",
                crate::PIPE_JS
            ),
            None => {
                debug!(request_id = %self.request_id, slot = name, "Slot missing from context");
                String::new()
            }
        };
        self.send(Bytes::from(value))
    }

    /// Splice an inline fragment between its script hooks, reading the
    /// body until the fragment's stream closes.
    fn splice_inline(&self, index: usize, stream: FragmentStream) -> bool {
        if !self.send(start_marker(index)) {
            return false;
        }

        let mut wrote_any = false;
        while let Ok(chunk) = stream.body.recv() {
            wrote_any = true;
            if !self.send(chunk) {
                return false;
            }
        }

        let outcome = stream.outcome.recv().ok();
        let script = match &outcome {
            Some(FragmentOutcome::Ended { script, .. }) => script.clone(),
            _ => None,
        };
        if let Some(FragmentOutcome::Failed { .. }) = outcome {
            if !wrote_any && !self.config.fallback_snippet.is_empty() {
                if !self.send(Bytes::from(self.config.fallback_snippet.clone())) {
                    return false;
                }
            }
        }

        self.send(end_marker(index, script.as_deref()))
    }
}

/// Relay an async fragment into the async stream, wrapped in its script
/// hooks. The opening hook is held back until the body's first chunk so
/// the async section is ordered by body arrival.
fn wrap_async(index: usize, stream: FragmentStream, out: mpsc::Sender<Bytes>) {
    match stream.body.recv() {
        Ok(first) => {
            if out.send(start_marker(index)).is_err() || out.send(first).is_err() {
                return;
            }
            while let Ok(chunk) = stream.body.recv() {
                if out.send(chunk).is_err() {
                    return;
                }
            }
            let script = match stream.outcome.recv() {
                Ok(FragmentOutcome::Ended { script, .. }) => script,
                _ => None,
            };
            let _ = out.send(end_marker(index, script.as_deref()));
        }
        Err(_) => match stream.outcome.recv() {
            Ok(FragmentOutcome::Failed { .. }) | Err(_) => {
                let _ = out.send(failure_comment(index));
            }
            Ok(_) => {
                // Completed with an empty body; keep the hook pairing.
                if out.send(start_marker(index)).is_ok() {
                    let _ = out.send(end_marker(index, None));
                }
            }
        },
    }
}
