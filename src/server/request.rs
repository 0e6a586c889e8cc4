use std::collections::HashMap;
use std::io::{self, Read};

/// Upper bound on the request head; anything larger is rejected.
const MAX_HEAD_BYTES: usize = 16 * 1024;

/// Parsed HTTP request head used to build a `PageRequest`.
#[derive(Debug, PartialEq)]
pub struct ParsedHead {
    pub method: String,
    /// Path with the query string stripped
    pub path: String,
    pub headers: HashMap<String, String>,
}

/// Read from the socket until the end of the request head.
///
/// The body, if any, is left unread; page composition only looks at the
/// request line and headers.
pub fn read_head(stream: &mut impl Read) -> io::Result<Vec<u8>> {
    let mut head = Vec::new();
    let mut buf = [0u8; 1024];
    loop {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed before request head",
            ));
        }
        head.extend_from_slice(&buf[..n]);
        if head.windows(4).any(|w| w == b"\r\n\r\n") {
            return Ok(head);
        }
        if head.len() > MAX_HEAD_BYTES {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "request head too large",
            ));
        }
    }
}

/// Parse the request line and headers out of a raw head.
pub fn parse_head(raw: &[u8]) -> io::Result<ParsedHead> {
    let text = String::from_utf8_lossy(raw);
    let mut lines = text.split("\r\n");

    let request_line = lines
        .next()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "empty request"))?;
    let mut parts = request_line.split_whitespace();
    let method = parts
        .next()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "missing method"))?
        .to_string();
    let raw_path = parts
        .next()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "missing path"))?;
    let path = raw_path.split('?').next().unwrap_or("/").to_string();

    let mut headers = HashMap::new();
    for line in lines {
        if line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
        }
    }

    Ok(ParsedHead {
        method,
        path,
        headers,
    })
}
