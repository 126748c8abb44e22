use std::fs;
use std::path::Path;

use palisade::config::Config;
use palisade::server::Server;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Starts a server over `root` on an ephemeral port, sends `raw`, and
/// returns the full response.
async fn exchange(root: &Path, raw: &[u8]) -> String {
    let cfg = Config {
        port: 0,
        root: root.to_path_buf(),
    };
    let raw = raw.to_vec();

    let local = tokio::task::LocalSet::new();
    local
        .run_until(async move {
            let server = Server::bind(&cfg).unwrap();
            let addr = server.local_addr().unwrap();
            tokio::task::spawn_local(server.serve());

            let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
            stream.write_all(&raw).await.unwrap();

            let mut response = Vec::new();
            stream.read_to_end(&mut response).await.unwrap();
            String::from_utf8_lossy(&response).into_owned()
        })
        .await
}

fn body_of(response: &str) -> &str {
    response.split("\r\n\r\n").nth(1).unwrap_or("")
}

fn header_of<'a>(response: &'a str, name: &str) -> Option<&'a str> {
    let prefix = format!("{name}: ");
    response
        .split("\r\n")
        .find_map(|line| line.strip_prefix(prefix.as_str()))
}

#[tokio::test]
async fn test_root_serves_welcome_document() {
    let tmp = TempDir::new().unwrap();
    let response = exchange(tmp.path(), b"GET / HTTP/1.1\r\nHost: x\r\n\r\n").await;

    assert!(response.starts_with("HTTP/1.1 200 OK\r\n"), "{response}");
    assert!(response.contains("Hello from my HTTP server"));

    let body = body_of(&response);
    let content_length: usize = header_of(&response, "Content-Length").unwrap().parse().unwrap();
    assert_eq!(content_length, body.len());
    assert_eq!(header_of(&response, "Connection"), Some("close"));
}

#[tokio::test]
async fn test_index_html_serves_welcome_document() {
    let tmp = TempDir::new().unwrap();
    let response = exchange(tmp.path(), b"GET /index.html HTTP/1.1\r\nHost: x\r\n\r\n").await;

    assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(response.contains("Hello from my HTTP server"));
}

#[tokio::test]
async fn test_missing_file_is_404() {
    let tmp = TempDir::new().unwrap();
    let response = exchange(tmp.path(), b"GET /missing HTTP/1.1\r\nHost: x\r\n\r\n").await;

    assert!(response.starts_with("HTTP/1.1 404 Not Found\r\n"), "{response}");
    assert_eq!(body_of(&response), "Not Found");
}

#[tokio::test]
async fn test_http_1_0_is_rejected() {
    let tmp = TempDir::new().unwrap();
    let response = exchange(tmp.path(), b"GET / HTTP/1.0\r\nHost: x\r\n\r\n").await;

    assert!(
        response.starts_with("HTTP/1.1 505 HTTP Version Not Supported\r\n"),
        "{response}"
    );
    assert_eq!(body_of(&response), "HTTP Version Not Supported");
}

#[tokio::test]
async fn test_unknown_method_is_501() {
    let tmp = TempDir::new().unwrap();
    let response = exchange(tmp.path(), b"FROB / HTTP/1.1\r\nHost: x\r\n\r\n").await;

    assert!(response.starts_with("HTTP/1.1 501 Not Implemented\r\n"), "{response}");
    assert_eq!(body_of(&response), "Not Implemented");
}

#[tokio::test]
async fn test_huge_url_is_413() {
    let tmp = TempDir::new().unwrap();

    let mut raw = Vec::from(&b"GET /"[..]);
    raw.extend(std::iter::repeat(b'A').take(16 * 1024));
    raw.extend_from_slice(b" HTTP/1.1\r\nHost: x\r\n\r\n");

    let response = exchange(tmp.path(), &raw).await;

    assert!(
        response.starts_with("HTTP/1.1 413 Payload Too Large\r\n"),
        "{response}"
    );
    assert_eq!(body_of(&response), "Payload Too Large");
}

#[tokio::test]
async fn test_percent_encoded_slash_reaches_nested_file() {
    let tmp = TempDir::new().unwrap();
    fs::create_dir(tmp.path().join("a")).unwrap();
    fs::write(tmp.path().join("a").join("b"), "nested").unwrap();

    let response = exchange(tmp.path(), b"GET /a%2Fb HTTP/1.1\r\nHost: x\r\n\r\n").await;

    assert!(response.starts_with("HTTP/1.1 200 OK\r\n"), "{response}");
    assert_eq!(body_of(&response), "nested");
}

#[tokio::test]
async fn test_file_response_headers() {
    let tmp = TempDir::new().unwrap();
    fs::write(tmp.path().join("styles.css"), "body { margin: 0 }").unwrap();

    let response = exchange(tmp.path(), b"GET /styles.css HTTP/1.1\r\nHost: x\r\n\r\n").await;

    assert!(response.starts_with("HTTP/1.1 200 OK\r\n"), "{response}");
    assert_eq!(header_of(&response, "Content-Type"), Some("text/css"));
    assert_eq!(header_of(&response, "Content-Length"), Some("18"));
    assert_eq!(header_of(&response, "Connection"), Some("close"));

    let last_modified = header_of(&response, "Last-Modified").unwrap();
    assert!(last_modified.ends_with(" GMT"), "{last_modified}");
    assert_eq!(body_of(&response), "body { margin: 0 }");
}

#[tokio::test]
async fn test_traversal_is_rejected_with_400() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().join("root");
    fs::create_dir(&root).unwrap();
    fs::write(tmp.path().join("secret.txt"), "top secret").unwrap();

    let response = exchange(&root, b"GET /../secret.txt HTTP/1.1\r\nHost: x\r\n\r\n").await;

    assert!(response.starts_with("HTTP/1.1 400 Bad Request\r\n"), "{response}");
    assert!(!response.contains("top secret"));
}
