#![allow(dead_code)]

use std::sync::Mutex;
use weft::events::{EventSink, PageEvent};
use weft::handler::PageRequest;
use weft::ids::RequestId;
use weft::template::{TemplateParser, TemplateSource, Token};
use weft::{ResponseWriter, WeftError};

pub mod upstream {
    use std::io::{Read, Write};
    use std::net::{SocketAddr, TcpListener, TcpStream};
    use std::time::Duration;

    /// Canned HTTP/1.1 response served by a mock fragment upstream.
    #[derive(Clone)]
    pub struct UpstreamResponse {
        pub status: u16,
        pub headers: Vec<(String, String)>,
        pub body: String,
        /// Wait this long after the request before responding
        pub delay: Duration,
    }

    impl UpstreamResponse {
        pub fn ok(body: &str) -> Self {
            Self {
                status: 200,
                headers: Vec::new(),
                body: body.to_string(),
                delay: Duration::ZERO,
            }
        }

        pub fn status(mut self, status: u16) -> Self {
            self.status = status;
            self
        }

        pub fn header(mut self, name: &str, value: &str) -> Self {
            self.headers.push((name.to_string(), value.to_string()));
            self
        }

        pub fn delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }
    }

    fn reason(status: u16) -> &'static str {
        match status {
            200 => "OK",
            301 => "Moved Permanently",
            404 => "Not Found",
            500 => "Internal Server Error",
            _ => "OK",
        }
    }

    fn serve_connection(mut stream: TcpStream, response: &UpstreamResponse) {
        let _ = stream.set_read_timeout(Some(Duration::from_millis(2000)));
        let mut buf = [0u8; 4096];
        let mut head = Vec::new();
        loop {
            match stream.read(&mut buf) {
                Ok(0) => return,
                Ok(n) => {
                    head.extend_from_slice(&buf[..n]);
                    if head.windows(4).any(|w| w == b"\r\n\r\n") {
                        break;
                    }
                }
                Err(_) => return,
            }
        }

        if !response.delay.is_zero() {
            std::thread::sleep(response.delay);
        }

        let mut out = format!("HTTP/1.1 {} {}\r\n", response.status, reason(response.status));
        for (name, value) in &response.headers {
            out.push_str(&format!("{name}: {value}\r\n"));
        }
        out.push_str(&format!(
            "content-length: {}\r\nconnection: close\r\n\r\n{}",
            response.body.len(),
            response.body
        ));
        let _ = stream.write_all(out.as_bytes());
    }

    /// Spawn a mock upstream serving `connections` requests, then exit.
    pub fn spawn(response: UpstreamResponse, connections: usize) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        std::thread::spawn(move || {
            for _ in 0..connections {
                let Ok((stream, _)) = listener.accept() else {
                    break;
                };
                let response = response.clone();
                std::thread::spawn(move || serve_connection(stream, &response));
            }
        });
        addr
    }

    /// Spawn an upstream that accepts connections but never answers,
    /// for timeout scenarios.
    pub fn black_hole() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        std::thread::spawn(move || {
            let mut held = Vec::new();
            while let Ok((stream, _)) = listener.accept() {
                held.push(stream);
                if held.len() > 16 {
                    break;
                }
            }
        });
        addr
    }

    pub fn url(addr: SocketAddr, path: &str) -> String {
        format!("http://{addr}{path}")
    }
}

pub mod http {
    use std::io::{Read, Write};
    use std::net::{SocketAddr, TcpStream};
    use std::time::Duration;

    /// Send a raw HTTP request string and read the full response until the
    /// server closes the connection (weft responses are `connection:
    /// close`).
    pub fn send_request(addr: &SocketAddr, req: &str) -> String {
        let mut stream = TcpStream::connect(addr).unwrap();
        stream.write_all(req.as_bytes()).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_millis(3000)))
            .unwrap();

        let mut buf = Vec::new();
        let mut tmp = [0u8; 4096];
        loop {
            match stream.read(&mut tmp) {
                Ok(0) => break,
                Ok(n) => buf.extend_from_slice(&tmp[..n]),
                Err(ref e)
                    if e.kind() == std::io::ErrorKind::WouldBlock
                        || e.kind() == std::io::ErrorKind::TimedOut =>
                {
                    break;
                }
                Err(e) => panic!("read error: {e:?}"),
            }
        }
        String::from_utf8_lossy(&buf).to_string()
    }

    /// Reassemble the body of a chunked HTTP/1.1 response.
    pub fn decode_chunked(raw: &str) -> String {
        let Some(head_end) = raw.find("\r\n\r\n") else {
            return String::new();
        };
        let mut body = String::new();
        let mut rest = &raw[head_end + 4..];
        loop {
            let Some(line_end) = rest.find("\r\n") else {
                break;
            };
            let Ok(size) = usize::from_str_radix(rest[..line_end].trim(), 16) else {
                break;
            };
            if size == 0 {
                break;
            }
            let chunk_start = line_end + 2;
            if rest.len() < chunk_start + size {
                break;
            }
            body.push_str(&rest[chunk_start..chunk_start + size]);
            rest = &rest[chunk_start + size + 2..];
        }
        body
    }
}

/// `ResponseWriter` capturing everything the handler writes.
pub struct CaptureWriter {
    pub head: Option<(u16, Vec<(String, String)>)>,
    pub head_writes: usize,
    pub body: Vec<u8>,
    pub finished: bool,
    /// When set, `write_chunk` fails once this many body bytes were taken
    pub fail_after: Option<usize>,
}

impl CaptureWriter {
    pub fn new() -> Self {
        Self {
            head: None,
            head_writes: 0,
            body: Vec::new(),
            finished: false,
            fail_after: None,
        }
    }

    pub fn failing_after(bytes: usize) -> Self {
        let mut writer = Self::new();
        writer.fail_after = Some(bytes);
        writer
    }

    pub fn status(&self) -> u16 {
        self.head.as_ref().expect("head written").0
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.head
            .as_ref()
            .expect("head written")
            .1
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).to_string()
    }
}

impl ResponseWriter for CaptureWriter {
    fn write_head(&mut self, status: u16, headers: &[(String, String)]) -> std::io::Result<()> {
        self.head_writes += 1;
        self.head = Some((status, headers.to_vec()));
        Ok(())
    }

    fn write_chunk(&mut self, chunk: &[u8]) -> std::io::Result<()> {
        if let Some(limit) = self.fail_after {
            if self.body.len() >= limit {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::BrokenPipe,
                    "client disconnected",
                ));
            }
        }
        self.body.extend_from_slice(chunk);
        Ok(())
    }

    fn finish(&mut self) -> std::io::Result<()> {
        self.finished = true;
        Ok(())
    }
}

/// Sink recording every emitted event for assertions.
pub struct RecordingSink {
    events: Mutex<Vec<PageEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
        }
    }

    pub fn events(&self) -> Vec<PageEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, _request_id: RequestId, event: &PageEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

/// Template source serving a fixed template string for every request.
pub struct StaticTemplate(pub String);

impl TemplateSource for StaticTemplate {
    fn fetch(
        &self,
        _request: &PageRequest,
        parser: &dyn TemplateParser,
    ) -> Result<Vec<Token>, WeftError> {
        parser.parse(&self.0)
    }
}

/// Template source that always reports the template as missing.
pub struct NotFoundTemplate {
    pub presentable: Option<String>,
}

impl TemplateSource for NotFoundTemplate {
    fn fetch(
        &self,
        request: &PageRequest,
        _parser: &dyn TemplateParser,
    ) -> Result<Vec<Token>, WeftError> {
        Err(WeftError::TemplateNotFound {
            path: request.path.clone(),
            presentable: self.presentable.clone(),
        })
    }
}
