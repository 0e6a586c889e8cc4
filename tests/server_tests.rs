mod common;

use common::http::{decode_chunked, send_request};
use common::upstream::{self, UpstreamResponse};
use std::sync::Arc;
use std::sync::Once;
use weft::server::FragmentServer;
use weft::template::FsTemplateSource;
use weft::{PipelineConfig, RequestHandler};

static MAY_INIT: Once = Once::new();

fn setup_may_runtime() {
    MAY_INIT.call_once(|| {
        may::config().set_stack_size(0x10000);
    });
}

fn start_server(templates: &std::path::Path) -> weft::server::ServerHandle {
    setup_may_runtime();
    let handler = RequestHandler::new(
        PipelineConfig::default(),
        Arc::new(FsTemplateSource::new(templates)),
    )
    .unwrap();
    let server = FragmentServer::new(handler).start("127.0.0.1:0").unwrap();
    server.wait_ready().unwrap();
    server
}

#[test]
fn test_serves_composed_page_over_http() {
    let upstream_addr = upstream::spawn(UpstreamResponse::ok("HELLO"), 1);
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("index.html"),
        format!(r#"<a><fragment src="{}"/><b>"#, upstream::url(upstream_addr, "/1")),
    )
    .unwrap();

    let server = start_server(dir.path());
    let raw = send_request(
        &server.local_addr(),
        "GET / HTTP/1.1\r\nHost: localhost\r\n\r\n",
    );
    server.stop();

    assert!(raw.starts_with("HTTP/1.1 200 OK\r\n"), "raw: {raw}");
    assert!(raw.contains("transfer-encoding: chunked"));
    assert!(raw.contains("cache-control: no-cache, no-store, must-revalidate"));
    assert_eq!(
        decode_chunked(&raw),
        "<a><script>Pipe.start(0)</script>HELLO<script>Pipe.end(0)</script><b>"
    );
}

#[test]
fn test_missing_template_is_http_404() {
    let dir = tempfile::tempdir().unwrap();
    let server = start_server(dir.path());
    let raw = send_request(
        &server.local_addr(),
        "GET /nope HTTP/1.1\r\nHost: localhost\r\n\r\n",
    );
    server.stop();

    assert!(raw.starts_with("HTTP/1.1 404 Not Found\r\n"), "raw: {raw}");
    assert_eq!(decode_chunked(&raw), "");
}

#[test]
fn test_malformed_request_is_http_400() {
    let dir = tempfile::tempdir().unwrap();
    let server = start_server(dir.path());
    let raw = send_request(&server.local_addr(), "\r\n\r\n");
    server.stop();

    assert!(raw.starts_with("HTTP/1.1 400 Bad Request\r\n"), "raw: {raw}");
}
