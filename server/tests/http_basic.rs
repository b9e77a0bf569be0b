//! Integration tests for HTTP request handling.
//!
//! Each test starts a real server on an ephemeral port and talks to it
//! with plain blocking `TcpStream`s.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

/// Get an available port for testing.
fn get_available_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

/// Create a throwaway document root with an index page and a text file.
fn make_docroot(name: &str) -> PathBuf {
    let root = std::env::temp_dir().join(format!("ember-it-{}-{}", name, std::process::id()));
    let _ = std::fs::remove_dir_all(&root);
    std::fs::create_dir_all(&root).unwrap();
    std::fs::write(root.join("index.html"), b"<html>welcome</html>").unwrap();
    std::fs::write(root.join("hello.txt"), b"hello world").unwrap();
    root
}

/// Start a test server and return its shutdown flag and join handle.
fn start_test_server(
    port: u16,
    docroot: &std::path::Path,
) -> (Arc<AtomicBool>, thread::JoinHandle<()>) {
    let config_str = format!(
        r#"
        [listener]
        address = "127.0.0.1:{port}"

        [workers]
        threads = 2

        [limits]
        max_connections = 64
        max_queued_tasks = 64

        [http]
        document_root = "{docroot}"
        "#,
        port = port,
        docroot = docroot.display(),
    );

    let config: server::Config = toml::from_str(&config_str).unwrap();
    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = shutdown.clone();

    let handle = thread::spawn(move || {
        server::server::run(&config, flag).unwrap();
    });

    wait_for_server(port);
    (shutdown, handle)
}

/// Wait until the server accepts connections.
fn wait_for_server(port: u16) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if TcpStream::connect(("127.0.0.1", port)).is_ok() {
            return;
        }
        thread::sleep(Duration::from_millis(20));
    }
    panic!("server did not start listening on port {port}");
}

fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Read one full response (headers plus Content-Length body).
fn read_response(stream: &mut TcpStream) -> String {
    stream
        .set_read_timeout(Some(Duration::from_secs(2)))
        .unwrap();

    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        if let Some(pos) = find_subsequence(&buf, b"\r\n\r\n") {
            let headers = String::from_utf8_lossy(&buf[..pos]).to_string();
            let content_length = headers
                .lines()
                .find_map(|line| {
                    let (name, value) = line.split_once(':')?;
                    if name.eq_ignore_ascii_case("content-length") {
                        value.trim().parse::<usize>().ok()
                    } else {
                        None
                    }
                })
                .unwrap_or(0);
            if buf.len() >= pos + 4 + content_length {
                return String::from_utf8_lossy(&buf[..pos + 4 + content_length]).to_string();
            }
        }
        match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
            Err(e) => panic!("read failed: {e}"),
        }
    }
    String::from_utf8_lossy(&buf).to_string()
}

#[test]
fn get_serves_a_file_and_keeps_the_connection_alive() {
    let docroot = make_docroot("get");
    let port = get_available_port();
    let (shutdown, handle) = start_test_server(port, &docroot);

    let mut stream = TcpStream::connect(("127.0.0.1", port)).unwrap();
    stream.set_nodelay(true).unwrap();

    stream
        .write_all(b"GET /index.html HTTP/1.1\r\nHost: x\r\n\r\n")
        .unwrap();
    let response = read_response(&mut stream);
    assert!(response.starts_with("HTTP/1.1 200 OK\r\n"), "{response}");
    assert!(response.contains("Content-Type: text/html\r\n"));
    assert!(response.contains("Connection: keep-alive\r\n"));
    assert!(response.ends_with("<html>welcome</html>"));

    // Keep-alive: a second request on the same connection is served too.
    stream
        .write_all(b"GET /hello.txt HTTP/1.1\r\nHost: x\r\n\r\n")
        .unwrap();
    let response = read_response(&mut stream);
    assert!(response.starts_with("HTTP/1.1 200 OK\r\n"), "{response}");
    assert!(response.ends_with("hello world"));

    shutdown.store(true, Ordering::SeqCst);
    handle.join().unwrap();
}

#[test]
fn slow_client_request_in_chunks_is_served() {
    let docroot = make_docroot("chunks");
    let port = get_available_port();
    let (shutdown, handle) = start_test_server(port, &docroot);

    let mut stream = TcpStream::connect(("127.0.0.1", port)).unwrap();
    stream.set_nodelay(true).unwrap();

    // Deliver the request in three arbitrary pieces.
    for piece in [
        b"GET /hello".as_slice(),
        b".txt HTTP/1.1\r\nHo".as_slice(),
        b"st: x\r\n\r\n".as_slice(),
    ] {
        stream.write_all(piece).unwrap();
        thread::sleep(Duration::from_millis(50));
    }

    let response = read_response(&mut stream);
    assert!(response.starts_with("HTTP/1.1 200 OK\r\n"), "{response}");
    assert!(response.ends_with("hello world"));

    shutdown.store(true, Ordering::SeqCst);
    handle.join().unwrap();
}

#[test]
fn missing_file_is_404() {
    let docroot = make_docroot("missing");
    let port = get_available_port();
    let (shutdown, handle) = start_test_server(port, &docroot);

    let mut stream = TcpStream::connect(("127.0.0.1", port)).unwrap();
    stream
        .write_all(b"GET /nope.html HTTP/1.1\r\nHost: x\r\n\r\n")
        .unwrap();
    let response = read_response(&mut stream);
    assert!(response.starts_with("HTTP/1.1 404 Not Found\r\n"), "{response}");

    shutdown.store(true, Ordering::SeqCst);
    handle.join().unwrap();
}

#[test]
fn malformed_request_gets_400_then_close() {
    let docroot = make_docroot("malformed");
    let port = get_available_port();
    let (shutdown, handle) = start_test_server(port, &docroot);

    let mut stream = TcpStream::connect(("127.0.0.1", port)).unwrap();
    stream.write_all(b"THIS IS NOT HTTP\r\n\r\n").unwrap();

    let response = read_response(&mut stream);
    assert!(response.starts_with("HTTP/1.1 400 Bad Request\r\n"), "{response}");
    assert!(response.contains("Connection: close\r\n"));

    // The server hangs up after the error response.
    let mut rest = [0u8; 16];
    stream
        .set_read_timeout(Some(Duration::from_secs(2)))
        .unwrap();
    assert_eq!(stream.read(&mut rest).unwrap(), 0);

    shutdown.store(true, Ordering::SeqCst);
    handle.join().unwrap();
}

#[test]
fn connection_close_is_honored() {
    let docroot = make_docroot("close");
    let port = get_available_port();
    let (shutdown, handle) = start_test_server(port, &docroot);

    let mut stream = TcpStream::connect(("127.0.0.1", port)).unwrap();
    stream
        .write_all(b"GET / HTTP/1.1\r\nConnection: close\r\n\r\n")
        .unwrap();

    let response = read_response(&mut stream);
    assert!(response.starts_with("HTTP/1.1 200 OK\r\n"), "{response}");
    assert!(response.contains("Connection: close\r\n"));

    let mut rest = [0u8; 16];
    stream
        .set_read_timeout(Some(Duration::from_secs(2)))
        .unwrap();
    assert_eq!(stream.read(&mut rest).unwrap(), 0);

    shutdown.store(true, Ordering::SeqCst);
    handle.join().unwrap();
}
