use crate::handler::ResponseWriter;
use std::io::{self, Write};

fn status_reason(status: u16) -> &'static str {
    http::StatusCode::from_u16(status)
        .ok()
        .and_then(|s| s.canonical_reason())
        .unwrap_or("OK")
}

/// HTTP/1.1 response writer using chunked transfer encoding.
///
/// Each chunk is flushed as it is written so composed bytes reach the
/// client while fragments are still in flight. The connection is marked
/// `close`; the composition pipeline owns the socket for the lifetime of
/// one page.
pub struct ChunkedWriter<W: Write> {
    inner: W,
    head_written: bool,
    finished: bool,
}

impl<W: Write> ChunkedWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            head_written: false,
            finished: false,
        }
    }
}

impl<W: Write> ResponseWriter for ChunkedWriter<W> {
    fn write_head(&mut self, status: u16, headers: &[(String, String)]) -> io::Result<()> {
        if self.head_written {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "response head already written",
            ));
        }
        self.head_written = true;

        let mut head = format!("HTTP/1.1 {} {}\r\n", status, status_reason(status));
        for (name, value) in headers {
            head.push_str(name);
            head.push_str(": ");
            head.push_str(value);
            head.push_str("\r\n");
        }
        head.push_str("transfer-encoding: chunked\r\nconnection: close\r\n\r\n");
        self.inner.write_all(head.as_bytes())?;
        self.inner.flush()
    }

    fn write_chunk(&mut self, chunk: &[u8]) -> io::Result<()> {
        // An empty chunk would terminate the chunked stream early.
        if chunk.is_empty() {
            return Ok(());
        }
        write!(self.inner, "{:X}\r\n", chunk.len())?;
        self.inner.write_all(chunk)?;
        self.inner.write_all(b"\r\n")?;
        self.inner.flush()
    }

    fn finish(&mut self) -> io::Result<()> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;
        self.inner.write_all(b"0\r\n\r\n")?;
        self.inner.flush()
    }
}
