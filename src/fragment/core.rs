use super::FragmentAttributes;
use crate::error::FragmentError;
use crate::events::{FragmentEvent, FragmentNote};
use crate::hints::parse_link_header;
use crate::ids::{RequestId, REQUEST_ID_HEADER};
use crate::runtime_config::spawn_pipeline;
use bytes::Bytes;
use may::sync::mpsc;
use std::collections::HashMap;
use std::io::Read;
use tracing::{debug, warn};

/// Lifecycle states of a fragment request.
///
/// `pending → requesting → responding → streaming` followed by exactly one
/// of `ended`, `fallback`, or `errored`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FragmentState {
    Pending,
    Requesting,
    Responding,
    Streaming,
    Ended,
    Fallback,
    Errored,
}

/// How a fragment's fetch concluded, reported on a side channel once the
/// body stream has closed.
#[derive(Debug, Clone)]
pub enum FragmentOutcome {
    /// Primary URL served the body. `script` is the first
    /// `rel="fragment-script"` link advertised by the upstream.
    Ended { bytes: u64, script: Option<String> },
    /// Fallback URL served the body
    Fallback { bytes: u64 },
    /// Nothing usable was served
    Failed { error: FragmentError },
}

/// Readable side of a dispatched fragment.
///
/// `body` yields chunks as they arrive from the upstream; it closes when
/// the fragment is done. `outcome` then reports how it ended.
pub struct FragmentStream {
    pub body: mpsc::Receiver<Bytes>,
    pub outcome: mpsc::Receiver<FragmentOutcome>,
}

/// State machine for one upstream fragment request.
///
/// Created by the template processor when its token is reached. `fetch()`
/// dispatches the upstream request on its own coroutine and immediately
/// returns the body stream; lifecycle events flow through the per-request
/// note channel.
pub struct Fragment {
    index: usize,
    attributes: FragmentAttributes,
    request_id: RequestId,
    notes: mpsc::Sender<FragmentNote>,
}

enum StreamAbort {
    /// Downstream reader went away; cancel quietly.
    Cancelled,
    Upstream(String),
}

impl Fragment {
    pub fn new(
        index: usize,
        attributes: FragmentAttributes,
        request_id: RequestId,
        notes: mpsc::Sender<FragmentNote>,
    ) -> Self {
        Self {
            index,
            attributes,
            request_id,
            notes,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn attributes(&self) -> &FragmentAttributes {
        &self.attributes
    }

    /// Dispatch the upstream request and return the body stream.
    ///
    /// The request runs on its own coroutine; reading the returned stream
    /// blocks until body bytes arrive. Dropping the stream cancels the
    /// fetch at the next chunk boundary.
    ///
    /// # Arguments
    ///
    /// * `client` - shared blocking HTTP client (redirects disabled)
    /// * `forward_headers` - request headers to forward upstream, already
    ///   filtered according to the fragment's `public` attribute
    /// * `stack_size` - coroutine stack size from the runtime config
    pub fn fetch(
        self,
        client: reqwest::blocking::Client,
        forward_headers: HashMap<String, String>,
        stack_size: usize,
    ) -> FragmentStream {
        let (body_tx, body_rx) = mpsc::channel();
        let (outcome_tx, outcome_rx) = mpsc::channel();
        spawn_pipeline(stack_size, "fragment", move || {
            self.run(client, forward_headers, body_tx, outcome_tx);
        });
        FragmentStream {
            body: body_rx,
            outcome: outcome_rx,
        }
    }

    fn run(
        self,
        client: reqwest::blocking::Client,
        forward_headers: HashMap<String, String>,
        body_tx: mpsc::Sender<Bytes>,
        outcome_tx: mpsc::Sender<FragmentOutcome>,
    ) {
        self.note(FragmentEvent::Start);
        self.trace_state(FragmentState::Requesting);

        let outcome = match self.attempt(&client, &self.attributes.url, &forward_headers) {
            Ok(response) => self.serve_primary(response, &body_tx),
            Err(error) => {
                if error == FragmentError::Timeout {
                    self.note(FragmentEvent::Timeout);
                }
                match &self.attributes.fallback_url {
                    Some(fallback) => self.serve_fallback(&client, fallback.clone(), &forward_headers, error, &body_tx),
                    None => {
                        self.trace_state(FragmentState::Errored);
                        self.note(FragmentEvent::Error {
                            error: error.clone(),
                        });
                        Some(FragmentOutcome::Failed { error })
                    }
                }
            }
        };

        if let Some(outcome) = outcome {
            let _ = outcome_tx.send(outcome);
        }
        // body_tx drops here, closing the stream
    }

    /// Stream the successful primary response.
    fn serve_primary(
        &self,
        response: reqwest::blocking::Response,
        body_tx: &mpsc::Sender<Bytes>,
    ) -> Option<FragmentOutcome> {
        let status = response.status().as_u16();
        let headers = header_map(&response);
        let script = headers.get("link").and_then(|link| {
            parse_link_header(link)
                .into_iter()
                .find(|e| e.rel.as_deref() == Some("fragment-script"))
                .map(|e| e.uri)
        });

        self.trace_state(FragmentState::Responding);
        let exposed = if self.attributes.primary || self.attributes.return_headers {
            headers
        } else {
            HashMap::new()
        };
        self.note(FragmentEvent::Response {
            status,
            headers: exposed,
        });

        self.trace_state(FragmentState::Streaming);
        match self.stream_body(response, body_tx) {
            Ok(bytes) => {
                self.trace_state(FragmentState::Ended);
                self.note(FragmentEvent::End { bytes });
                Some(FragmentOutcome::Ended { bytes, script })
            }
            Err(StreamAbort::Cancelled) => None,
            Err(StreamAbort::Upstream(reason)) => {
                let error = FragmentError::Network(reason);
                self.trace_state(FragmentState::Errored);
                self.note(FragmentEvent::Error {
                    error: error.clone(),
                });
                Some(FragmentOutcome::Failed { error })
            }
        }
    }

    /// One retry against the fallback URL. Emits `fallback` only once the
    /// fallback upstream has actually produced a response, so the terminal
    /// event stays unique even when the fallback fails too.
    fn serve_fallback(
        &self,
        client: &reqwest::blocking::Client,
        fallback: url::Url,
        forward_headers: &HashMap<String, String>,
        original: FragmentError,
        body_tx: &mpsc::Sender<Bytes>,
    ) -> Option<FragmentOutcome> {
        debug!(
            request_id = %self.request_id,
            index = self.index,
            fallback_url = %fallback,
            error = %original,
            "Primary URL failed, trying fallback"
        );
        match self.attempt(client, &fallback, forward_headers) {
            Ok(response) => {
                self.trace_state(FragmentState::Fallback);
                self.note(FragmentEvent::Fallback { error: original });
                match self.stream_body(response, body_tx) {
                    Ok(bytes) => Some(FragmentOutcome::Fallback { bytes }),
                    Err(StreamAbort::Cancelled) => None,
                    Err(StreamAbort::Upstream(reason)) => {
                        warn!(
                            request_id = %self.request_id,
                            index = self.index,
                            error = %reason,
                            "Fallback body aborted mid-stream"
                        );
                        Some(FragmentOutcome::Failed {
                            error: FragmentError::Network(reason),
                        })
                    }
                }
            }
            Err(error) => {
                self.trace_state(FragmentState::Errored);
                self.note(FragmentEvent::Error {
                    error: error.clone(),
                });
                Some(FragmentOutcome::Failed { error })
            }
        }
    }

    /// Dispatch one upstream attempt and validate its status.
    ///
    /// 2xx is acceptable everywhere; 3xx is additionally acceptable for
    /// primary fragments, whose redirect status promotes to the page.
    fn attempt(
        &self,
        client: &reqwest::blocking::Client,
        url: &url::Url,
        forward_headers: &HashMap<String, String>,
    ) -> Result<reqwest::blocking::Response, FragmentError> {
        let mut builder = client
            .get(url.as_str())
            .timeout(self.attributes.timeout)
            .header(REQUEST_ID_HEADER, self.request_id.to_string());
        for (name, value) in forward_headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder.send().map_err(|e| {
            if e.is_timeout() {
                FragmentError::Timeout
            } else {
                FragmentError::Network(e.to_string())
            }
        })?;

        let status = response.status();
        let acceptable =
            status.is_success() || (self.attributes.primary && status.is_redirection());
        if acceptable {
            Ok(response)
        } else {
            Err(FragmentError::Status(status.as_u16()))
        }
    }

    fn stream_body(
        &self,
        mut response: reqwest::blocking::Response,
        body_tx: &mpsc::Sender<Bytes>,
    ) -> Result<u64, StreamAbort> {
        let mut total = 0u64;
        let mut buf = [0u8; 4096];
        loop {
            match response.read(&mut buf) {
                Ok(0) => return Ok(total),
                Ok(n) => {
                    total += n as u64;
                    if body_tx.send(Bytes::copy_from_slice(&buf[..n])).is_err() {
                        debug!(
                            request_id = %self.request_id,
                            index = self.index,
                            bytes = total,
                            "Downstream gone, cancelling fragment"
                        );
                        return Err(StreamAbort::Cancelled);
                    }
                }
                Err(e) => return Err(StreamAbort::Upstream(e.to_string())),
            }
        }
    }

    fn note(&self, event: FragmentEvent) {
        let _ = self.notes.send(FragmentNote {
            index: self.index,
            attributes: self.attributes.clone(),
            event,
        });
    }

    fn trace_state(&self, state: FragmentState) {
        debug!(
            request_id = %self.request_id,
            index = self.index,
            fragment_id = self.attributes.id.as_deref().unwrap_or(""),
            state = ?state,
            "Fragment state"
        );
    }
}

/// Flatten upstream response headers into a lowercase map, joining
/// repeated headers (notably `link`) with commas.
fn header_map(response: &reqwest::blocking::Response) -> HashMap<String, String> {
    let mut map: HashMap<String, String> = HashMap::new();
    for (name, value) in response.headers() {
        let value = String::from_utf8_lossy(value.as_bytes()).to_string();
        map.entry(name.as_str().to_ascii_lowercase())
            .and_modify(|existing| {
                existing.push(',');
                existing.push_str(&value);
            })
            .or_insert(value);
    }
    map
}
