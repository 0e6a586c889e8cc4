use crate::runtime_config::spawn_pipeline;
use bytes::Bytes;
use may::sync::mpsc;
use thiserror::Error;
use tracing::{debug, warn};

/// Attachment attempted after the stream was plugged.
#[derive(Debug, Error)]
#[error("async stream already plugged")]
pub struct PluggedError;

/// Ordered multiplexed channel for late fragment output.
///
/// Sub-streams are attached while the template's synchronous portion is
/// being processed and may start producing bytes at any time. The reader
/// side emits each sub-stream's bytes contiguously, ordered by the arrival
/// of each sub-stream's first chunk. Once `plug()` is called no further
/// attachments are accepted; the reader closes when every attached
/// sub-stream has ended. With zero attachments it closes immediately on
/// plug.
pub struct AsyncStream {
    ready_tx: Option<mpsc::Sender<AsyncSub>>,
    stack_size: usize,
}

/// Consuming side of the async section.
pub struct AsyncStreamReader {
    ready_rx: mpsc::Receiver<AsyncSub>,
}

/// One attached sub-stream, handed to the reader once its first chunk
/// (or its end) has arrived.
pub struct AsyncSub {
    index: usize,
    first: Option<Bytes>,
    rest: mpsc::Receiver<Bytes>,
}

/// Create the attachment and reader halves of an async stream.
pub fn async_stream(stack_size: usize) -> (AsyncStream, AsyncStreamReader) {
    let (ready_tx, ready_rx) = mpsc::channel();
    (
        AsyncStream {
            ready_tx: Some(ready_tx),
            stack_size,
        },
        AsyncStreamReader { ready_rx },
    )
}

impl AsyncStream {
    /// Attach a sub-stream identified by `index`.
    ///
    /// Spawns a relay coroutine that waits for the sub-stream's first
    /// chunk before announcing it to the reader, which is what orders the
    /// async section by body arrival rather than attachment order.
    ///
    /// # Errors
    ///
    /// Returns [`PluggedError`] when called after `plug()`; late
    /// attachments are a caller bug and are logged.
    pub fn attach(&self, index: usize, body: mpsc::Receiver<Bytes>) -> Result<(), PluggedError> {
        let Some(ready_tx) = &self.ready_tx else {
            warn!(index = index, "Attachment rejected: async stream already plugged");
            return Err(PluggedError);
        };
        let ready = ready_tx.clone();
        spawn_pipeline(self.stack_size, "async-sub", move || {
            let first = body.recv().ok();
            let _ = ready.send(AsyncSub { index, first, rest: body });
        });
        Ok(())
    }

    /// Seal the attachment set. Idempotent.
    pub fn plug(&mut self) {
        if self.ready_tx.take().is_some() {
            debug!("Async stream plugged");
        }
    }

    /// Whether `plug()` has been called.
    pub fn is_plugged(&self) -> bool {
        self.ready_tx.is_none()
    }
}

impl AsyncStreamReader {
    /// Block until the next sub-stream is ready, or return `None` when the
    /// stream is plugged and all attachments have been consumed.
    pub fn next_sub(&self) -> Option<AsyncSub> {
        self.ready_rx.recv().ok()
    }
}

impl AsyncSub {
    pub fn index(&self) -> usize {
        self.index
    }

    /// Whether the sub-stream closed without producing any bytes.
    pub fn is_empty(&self) -> bool {
        self.first.is_none()
    }

    /// Deliver every chunk of this sub-stream, in order, until it closes.
    pub fn drain(self, mut f: impl FnMut(Bytes)) {
        if let Some(first) = self.first {
            f(first);
        }
        while let Ok(chunk) = self.rest.recv() {
            f(chunk);
        }
    }
}
