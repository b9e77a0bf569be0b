use std::net::SocketAddr;

use mio::net::TcpStream;

/// What the event loop should do with a session after a processing step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Next {
    /// Await read readiness for the next request bytes.
    Read,
    /// Output remains buffered; await write readiness to flush it.
    Write,
    /// Buffered input is ready for a worker; hand the session off.
    Dispatch,
    /// Tear the session down.
    Close,
}

/// Per-connection state driven by the event loop.
///
/// The event loop calls `fill` and `flush` on the reactor thread and `work`
/// on a worker thread, never concurrently for the same session: a
/// dispatched session is deregistered and moved to the worker, and only
/// re-registered once the worker returns it. Implementations therefore
/// need no internal locking.
pub trait Session: Send + 'static {
    /// The registered event source. Only the reactor thread calls this.
    fn source(&mut self) -> &mut TcpStream;

    /// The peer address, for diagnostics.
    fn peer_addr(&self) -> SocketAddr;

    /// Drain readable bytes into the session's buffer without blocking.
    ///
    /// Returns `Dispatch` when buffered bytes await processing, `Read`
    /// when there is nothing new, and `Close` on EOF or a read error.
    fn fill(&mut self) -> Next;

    /// Process buffered input: parse, build output, write what the socket
    /// permits. Runs on a worker thread.
    ///
    /// Returns `Read` to await the next request, `Write` when output could
    /// not be fully flushed, and `Close` to tear the session down.
    fn work(&mut self) -> Next;

    /// Continue a partial write after a write-readiness event.
    ///
    /// A partial write is not an error; it simply returns `Write` again.
    /// `Dispatch` may be returned when the output drained and buffered
    /// input remains (a pipelined request).
    fn flush(&mut self) -> Next;
}
