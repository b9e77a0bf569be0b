//! Per-connection state for the HTTP server.
//!
//! `HttpConn` is the session type driven by the spindle event loop: the
//! reactor thread drains socket bytes into the read buffer (`fill`) and
//! continues partial writes (`flush`); a worker thread parses buffered
//! requests and builds responses (`work`). The one-dispatch-at-a-time
//! discipline of the event loop means none of this state needs a lock.

use std::io::{ErrorKind, Read, Write};
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::BytesMut;
use mio::net::TcpStream;
use spindle::{Next, Session};
use tracing::trace;

use crate::execute::{HttpOptions, execute};
use crate::http::{ParseStatus, RequestParser, Response, Status};
use crate::metrics::{
    CONNECTIONS_ACCEPTED, CONNECTIONS_ACTIVE, CONNECTIONS_CLOSED, PROTOCOL_ERRORS,
};

const READ_CHUNK: usize = 4096;

pub struct HttpConn {
    stream: TcpStream,
    peer: SocketAddr,
    options: Arc<HttpOptions>,
    read_buf: BytesMut,
    write_buf: BytesMut,
    write_pos: usize,
    parser: RequestParser,
    should_close: bool,
}

impl HttpConn {
    pub fn new(stream: TcpStream, peer: SocketAddr, options: Arc<HttpOptions>) -> Self {
        CONNECTIONS_ACCEPTED.increment();
        CONNECTIONS_ACTIVE.increment();

        let parser = RequestParser::new(options.buffer_ceiling);
        HttpConn {
            stream,
            peer,
            options,
            read_buf: BytesMut::with_capacity(READ_CHUNK),
            write_buf: BytesMut::with_capacity(READ_CHUNK),
            write_pos: 0,
            parser,
            should_close: false,
        }
    }

    fn has_pending_write(&self) -> bool {
        self.write_pos < self.write_buf.len()
    }

    /// Drain the write buffer from the cursor. A partial write updates the
    /// cursor and asks for write readiness; it is not an error.
    fn write_pending(&mut self) -> Next {
        while self.has_pending_write() {
            match self.stream.write(&self.write_buf[self.write_pos..]) {
                Ok(0) => return Next::Close,
                Ok(n) => self.write_pos += n,
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Next::Write,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    trace!(peer = %self.peer, error = %e, "write failed");
                    return Next::Close;
                }
            }
        }
        self.write_buf.clear();
        self.write_pos = 0;
        if self.should_close { Next::Close } else { Next::Read }
    }
}

impl Session for HttpConn {
    fn source(&mut self) -> &mut TcpStream {
        &mut self.stream
    }

    fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    fn fill(&mut self) -> Next {
        let start = self.read_buf.len();
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            if self.read_buf.len() >= self.options.buffer_ceiling {
                // Ceiling hit before a request completed: the worker
                // answers 413 and the connection closes, bounding memory
                // per misbehaving peer.
                self.parser.poison(Status::PayloadTooLarge);
                return Next::Dispatch;
            }
            match self.stream.read(&mut chunk) {
                Ok(0) => return Next::Close,
                Ok(n) => self.read_buf.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    trace!(peer = %self.peer, error = %e, "read failed");
                    return Next::Close;
                }
            }
        }
        if self.read_buf.len() > start {
            Next::Dispatch
        } else {
            Next::Read
        }
    }

    fn work(&mut self) -> Next {
        loop {
            match self.parser.advance(&mut self.read_buf) {
                ParseStatus::Complete => {
                    let Some(request) = self.parser.take_request() else {
                        break;
                    };
                    if execute(&request, &self.options, &mut self.write_buf) {
                        self.should_close = true;
                        break;
                    }
                }
                ParseStatus::NeedMore => break,
                ParseStatus::Malformed(status) => {
                    PROTOCOL_ERRORS.increment();
                    Response::error(status).encode(false, false, &mut self.write_buf);
                    self.should_close = true;
                    break;
                }
            }
        }
        self.write_pending()
    }

    fn flush(&mut self) -> Next {
        self.write_pending()
    }
}

impl Drop for HttpConn {
    fn drop(&mut self) {
        CONNECTIONS_ACTIVE.decrement();
        CONNECTIONS_CLOSED.increment();
        trace!(peer = %self.peer, "connection dropped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    fn test_options(name: &str, buffer_ceiling: usize) -> Arc<HttpOptions> {
        let root =
            std::env::temp_dir().join(format!("ember-conn-{}-{}", name, std::process::id()));
        let _ = std::fs::remove_dir_all(&root);
        std::fs::create_dir_all(&root).unwrap();
        std::fs::write(root.join("index.html"), b"<html>home</html>").unwrap();
        Arc::new(HttpOptions {
            document_root: root,
            buffer_ceiling,
        })
    }

    /// An accepted non-blocking server-side stream plus its client peer.
    fn socket_pair() -> (HttpConnArgs, std::net::TcpStream) {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = std::net::TcpStream::connect(addr).unwrap();
        let (server, peer) = listener.accept().unwrap();
        server.set_nonblocking(true).unwrap();
        ((TcpStream::from_std(server), peer), client)
    }

    type HttpConnArgs = (TcpStream, SocketAddr);

    fn settle() {
        thread::sleep(Duration::from_millis(50));
    }

    fn read_available(client: &mut std::net::TcpStream) -> Vec<u8> {
        client
            .set_read_timeout(Some(Duration::from_millis(500)))
            .unwrap();
        let mut collected = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            match client.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => collected.extend_from_slice(&chunk[..n]),
                Err(_) => break,
            }
        }
        collected
    }

    #[test]
    fn request_round_trip() {
        let options = test_options("roundtrip", 65536);
        let ((stream, peer), mut client) = socket_pair();
        let mut conn = HttpConn::new(stream, peer, options);

        client
            .write_all(b"GET /index.html HTTP/1.1\r\nHost: x\r\n\r\n")
            .unwrap();
        settle();

        assert_eq!(conn.fill(), Next::Dispatch);
        // Keep-alive request: the connection awaits the next one.
        assert_eq!(conn.work(), Next::Read);

        let response = read_available(&mut client);
        let text = std::str::from_utf8(&response).unwrap();
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("Connection: keep-alive\r\n"));
        assert!(text.ends_with("<html>home</html>"));
    }

    #[test]
    fn request_in_chunks_parses_once_complete() {
        let options = test_options("chunks", 65536);
        let ((stream, peer), mut client) = socket_pair();
        let mut conn = HttpConn::new(stream, peer, options);

        client.write_all(b"GET /index.html HT").unwrap();
        settle();
        assert_eq!(conn.fill(), Next::Dispatch);
        assert_eq!(conn.work(), Next::Read, "incomplete request keeps waiting");

        client.write_all(b"TP/1.1\r\n\r\n").unwrap();
        settle();
        assert_eq!(conn.fill(), Next::Dispatch);
        assert_eq!(conn.work(), Next::Read);

        let response = read_available(&mut client);
        assert!(response.starts_with(b"HTTP/1.1 200 OK\r\n"));
    }

    #[test]
    fn malformed_request_gets_400_and_close() {
        let options = test_options("malformed", 65536);
        let ((stream, peer), mut client) = socket_pair();
        let mut conn = HttpConn::new(stream, peer, options);

        client.write_all(b"NOT A REQUEST\r\n\r\n").unwrap();
        settle();

        assert_eq!(conn.fill(), Next::Dispatch);
        assert_eq!(conn.work(), Next::Close);

        let response = read_available(&mut client);
        assert!(response.starts_with(b"HTTP/1.1 400 Bad Request\r\n"));
    }

    #[test]
    fn peer_eof_closes() {
        let options = test_options("eof", 65536);
        let ((stream, peer), client) = socket_pair();
        let mut conn = HttpConn::new(stream, peer, options);

        drop(client);
        settle();
        assert_eq!(conn.fill(), Next::Close);
    }

    #[test]
    fn buffer_ceiling_maps_to_413() {
        let options = test_options("ceiling", 64);
        let ((stream, peer), mut client) = socket_pair();
        let mut conn = HttpConn::new(stream, peer, options);

        // A request line that never ends, larger than the ceiling.
        client.write_all(&[b'a'; 256]).unwrap();
        settle();

        assert_eq!(conn.fill(), Next::Dispatch);
        assert_eq!(conn.work(), Next::Close);
        assert!(conn.read_buf.len() <= 64 + READ_CHUNK, "growth stays bounded");

        let response = read_available(&mut client);
        assert!(response.starts_with(b"HTTP/1.1 413 Payload Too Large\r\n"));
    }

    #[test]
    fn pipelined_requests_get_pipelined_responses() {
        let options = test_options("pipeline", 65536);
        let ((stream, peer), mut client) = socket_pair();
        let mut conn = HttpConn::new(stream, peer, options);

        client
            .write_all(b"GET / HTTP/1.1\r\n\r\nGET / HTTP/1.1\r\n\r\n")
            .unwrap();
        settle();

        assert_eq!(conn.fill(), Next::Dispatch);
        assert_eq!(conn.work(), Next::Read);

        let response = read_available(&mut client);
        let text = std::str::from_utf8(&response).unwrap();
        assert_eq!(text.matches("HTTP/1.1 200 OK\r\n").count(), 2);
    }
}
