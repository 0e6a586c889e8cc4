//! # Server Module
//!
//! Thin HTTP/1.1 listener feeding the composition pipeline.
//!
//! ## Overview
//!
//! Each accepted connection runs on its own coroutine: the request head is
//! parsed into a [`PageRequest`], a [`ChunkedWriter`] wraps the socket,
//! and [`RequestHandler::handle`] streams the composed page through it.
//! Chunked transfer encoding lets the head and every composed chunk go out
//! as soon as they exist, which is the point of the whole pipeline.

mod request;
mod response;

pub use request::{parse_head, read_head, ParsedHead};
pub use response::ChunkedWriter;

use crate::handler::{PageRequest, RequestHandler};
use crate::ids::{RequestId, REQUEST_ID_HEADER};
use may::coroutine::JoinHandle;
use std::io::{self, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

/// Handle to a running fragment server.
///
/// Provides methods for waiting until the listener is accepting, stopping
/// it, or joining the accept coroutine.
pub struct ServerHandle {
    addr: SocketAddr,
    handle: JoinHandle<()>,
}

impl ServerHandle {
    /// Address the listener is bound to; useful with port 0.
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn wait_ready(&self) -> io::Result<()> {
        for _ in 0..50 {
            if TcpStream::connect(self.addr).is_ok() {
                return Ok(());
            }
            thread::sleep(Duration::from_millis(5));
        }
        Err(io::Error::new(io::ErrorKind::TimedOut, "server not ready"))
    }

    pub fn stop(self) {
        unsafe {
            self.handle.coroutine().cancel();
        }
        let _ = self.handle.join();
    }

    pub fn join(self) -> std::thread::Result<()> {
        self.handle.join()
    }
}

/// HTTP listener serving composed pages.
pub struct FragmentServer {
    handler: Arc<RequestHandler>,
}

impl FragmentServer {
    pub fn new(handler: RequestHandler) -> Self {
        Self {
            handler: Arc::new(handler),
        }
    }

    /// Bind and start accepting connections under the may runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if the address is invalid or the port cannot be
    /// bound.
    pub fn start<A: ToSocketAddrs>(self, addr: A) -> io::Result<ServerHandle> {
        let addr = addr
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "invalid address"))?;
        let listener = may::net::TcpListener::bind(addr)?;
        let local = listener.local_addr()?;
        let handler = self.handler;

        let handle = may::go!(move || {
            for stream in listener.incoming() {
                match stream {
                    Ok(stream) => {
                        let handler = handler.clone();
                        may::go!(move || handle_connection(handler, stream));
                    }
                    Err(e) => warn!(error = %e, "Accept failed"),
                }
            }
        });

        Ok(ServerHandle {
            addr: local,
            handle,
        })
    }
}

fn handle_connection(handler: Arc<RequestHandler>, mut stream: may::net::TcpStream) {
    let head = match read_head(&mut stream).and_then(|raw| parse_head(&raw)) {
        Ok(head) => head,
        Err(e) => {
            debug!(error = %e, "Rejecting malformed request");
            let _ = stream
                .write_all(b"HTTP/1.1 400 Bad Request\r\nconnection: close\r\ncontent-length: 0\r\n\r\n");
            return;
        }
    };

    let request = PageRequest {
        request_id: RequestId::from_header_or_new(
            head.headers.get(REQUEST_ID_HEADER).map(|s| s.as_str()),
        ),
        method: head.method,
        path: head.path,
        headers: head.headers,
    };
    let request_id = request.request_id;

    let mut writer = ChunkedWriter::new(&mut stream);
    if let Err(e) = handler.handle(request, &mut writer) {
        // The handler has already written whatever response was possible.
        debug!(request_id = %request_id, error = %e, "Request ended with error");
    }
}
