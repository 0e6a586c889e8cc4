use std::io::{self, Write};

/// Pass-through writer that counts the bytes flowing to the response.
///
/// Every chunk is forwarded unchanged; write errors propagate upstream
/// untouched while the counter keeps the bytes that did get through. The
/// completion callback fires exactly once with the total — on `finish()`,
/// or on drop when the request is torn down early.
pub struct ContentLengthMeter<W: Write> {
    inner: W,
    written: u64,
    on_complete: Option<Box<dyn FnOnce(u64) + Send>>,
}

impl<W: Write> ContentLengthMeter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            written: 0,
            on_complete: None,
        }
    }

    /// Register the completion callback invoked with the final byte count.
    pub fn on_complete(mut self, callback: impl FnOnce(u64) + Send + 'static) -> Self {
        self.on_complete = Some(Box::new(callback));
        self
    }

    /// Bytes successfully forwarded so far.
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Flush the downstream writer and deliver the final count.
    pub fn finish(mut self) -> io::Result<u64> {
        self.inner.flush()?;
        let written = self.written;
        if let Some(callback) = self.on_complete.take() {
            callback(written);
        }
        Ok(written)
    }
}

impl<W: Write> Write for ContentLengthMeter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl<W: Write> Drop for ContentLengthMeter<W> {
    fn drop(&mut self) {
        if let Some(callback) = self.on_complete.take() {
            callback(self.written);
        }
    }
}
