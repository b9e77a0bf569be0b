use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crossbeam_channel::{Receiver, unbounded};
use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token, Waker};
use slab::Slab;
use tracing::{debug, trace, warn};

use crate::config::Config;
use crate::error::Error;
use crate::session::{Next, Session};
use crate::worker::WorkerPool;

/// Token for the listening socket, above any session slot.
const LISTENER: Token = Token(1 << 30);
/// Token for the cross-thread waker.
const WAKER: Token = Token((1 << 30) + 1);

/// Handle to trigger a graceful shutdown of the event loop.
///
/// The reactor stops accepting, lets in-flight tasks drain, joins the
/// workers, and releases all sessions. Calling `shutdown` more than once
/// is a no-op.
#[derive(Clone)]
pub struct ShutdownHandle {
    flag: Arc<AtomicBool>,
    waker: Arc<Waker>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        if !self.flag.swap(true, Ordering::AcqRel) {
            let _ = self.waker.wake();
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

/// The reactor: owns the poll registration, the accept loop, and the
/// dispatch of readiness events to sessions and the worker pool.
///
/// Sessions live in a pre-allocated arena indexed by their poll token.
/// Dispatching a session to a worker removes it from the arena and
/// deregisters it, so at most one thread ever touches a given session;
/// the reactor re-registers it only when the worker hands it back.
pub struct EventLoop<S, F>
where
    S: Session,
    F: FnMut(TcpStream, SocketAddr) -> S,
{
    config: Config,
    poll: Poll,
    events: Events,
    listener: TcpListener,
    sessions: Slab<S>,
    pool: WorkerPool<S>,
    done_rx: Receiver<(S, Next)>,
    accept: F,
    active: usize,
    shutdown: Arc<AtomicBool>,
    waker: Arc<Waker>,
}

impl<S, F> EventLoop<S, F>
where
    S: Session,
    F: FnMut(TcpStream, SocketAddr) -> S,
{
    /// Bind the listening socket and spawn the worker pool.
    pub fn bind(config: Config, addr: SocketAddr, accept: F) -> Result<Self, Error> {
        if config.worker_threads == 0 {
            return Err(Error::InvalidConfig("worker_threads must be nonzero".into()));
        }
        if config.max_connections == 0 {
            return Err(Error::InvalidConfig("max_connections must be nonzero".into()));
        }
        if config.max_queued_tasks == 0 {
            return Err(Error::InvalidConfig("max_queued_tasks must be nonzero".into()));
        }

        let poll = Poll::new()?;
        let mut listener = bind_listener(addr, config.backlog)?;
        poll.registry()
            .register(&mut listener, LISTENER, Interest::READABLE)?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKER)?);

        let (done_tx, done_rx) = unbounded();
        let pool = WorkerPool::new(
            config.worker_threads,
            config.max_queued_tasks,
            |session: &mut S| session.work(),
            done_tx,
            Arc::clone(&waker),
        )?;

        Ok(EventLoop {
            events: Events::with_capacity(config.events_capacity),
            sessions: Slab::with_capacity(config.max_connections),
            poll,
            listener,
            pool,
            done_rx,
            accept,
            active: 0,
            shutdown: Arc::new(AtomicBool::new(false)),
            waker,
            config,
        })
    }

    /// The address the listener is bound to.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            flag: Arc::clone(&self.shutdown),
            waker: Arc::clone(&self.waker),
        }
    }

    /// Run the event loop. Blocks the current thread until shutdown or a
    /// fatal poll failure; either way all sessions and workers are torn
    /// down before returning.
    pub fn run(&mut self) -> Result<(), Error> {
        loop {
            if self.shutdown.load(Ordering::Acquire) {
                break;
            }

            if let Err(e) = self.poll.poll(&mut self.events, None) {
                // Signal interruptions are benign; everything else is fatal.
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                self.teardown();
                return Err(e.into());
            }

            // Collect event info first so sessions can be mutated while
            // handling the batch.
            let batch: Vec<(Token, bool, bool, bool)> = self
                .events
                .iter()
                .map(|e| {
                    (
                        e.token(),
                        e.is_readable(),
                        e.is_writable(),
                        e.is_read_closed() || e.is_write_closed() || e.is_error(),
                    )
                })
                .collect();

            for (token, readable, writable, closed) in batch {
                match token {
                    LISTENER => self.accept_pending(),
                    WAKER => {}
                    Token(slot) => self.session_event(slot, readable, writable, closed),
                }
            }

            self.drain_completions();
        }

        self.teardown();
        Ok(())
    }

    /// Accept all pending connections on the listener.
    fn accept_pending(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    if self.active >= self.config.max_connections {
                        // Admission control: at capacity the socket is
                        // closed immediately and no response is sent.
                        debug!(%peer, "connection table full, rejecting");
                        drop(stream);
                        continue;
                    }
                    let _ = stream.set_nodelay(true);
                    self.insert_session(stream, peer);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    break;
                }
            }
        }
    }

    fn insert_session(&mut self, stream: TcpStream, peer: SocketAddr) {
        let entry = self.sessions.vacant_entry();
        let token = Token(entry.key());
        let mut session = (self.accept)(stream, peer);
        match self
            .poll
            .registry()
            .register(session.source(), token, Interest::READABLE)
        {
            Ok(()) => {
                entry.insert(session);
                self.active += 1;
                trace!(%peer, slot = token.0, "connection accepted");
            }
            Err(e) => {
                warn!(%peer, error = %e, "failed to register connection");
            }
        }
    }

    fn session_event(&mut self, slot: usize, readable: bool, writable: bool, closed: bool) {
        // Stale events for slots already closed or dispatched are ignored.
        if !self.sessions.contains(slot) {
            return;
        }

        if closed {
            self.close_slot(slot);
            return;
        }

        if readable {
            match self.sessions[slot].fill() {
                Next::Close => {
                    self.close_slot(slot);
                    return;
                }
                Next::Dispatch => {
                    self.dispatch_slot(slot);
                    return;
                }
                Next::Read | Next::Write => {}
            }
        }

        if writable {
            match self.sessions[slot].flush() {
                Next::Read => self.rearm(slot, Interest::READABLE),
                Next::Write => {}
                Next::Dispatch => self.dispatch_slot(slot),
                Next::Close => self.close_slot(slot),
            }
        }
    }

    /// Hand a session to the worker pool: deregister it and move it out of
    /// the arena so no readiness event can reach it while a worker owns it.
    fn dispatch_slot(&mut self, slot: usize) {
        let mut session = self.sessions.remove(slot);
        if let Err(e) = self.poll.registry().deregister(session.source()) {
            warn!(error = %e, "failed to deregister session");
        }
        if let Err(session) = self.pool.dispatch(session) {
            debug!(peer = %session.peer_addr(), "task queue full, closing connection");
            self.active -= 1;
            drop(session);
        }
    }

    fn rearm(&mut self, slot: usize, interest: Interest) {
        let registry = self.poll.registry();
        let token = Token(slot);
        if let Err(e) = registry.reregister(self.sessions[slot].source(), token, interest) {
            warn!(error = %e, "failed to re-arm session");
            self.close_slot(slot);
        }
    }

    /// Collect sessions the workers finished and re-arm or release them.
    fn drain_completions(&mut self) {
        while let Ok((session, next)) = self.done_rx.try_recv() {
            self.finish(session, next);
        }
    }

    fn finish(&mut self, mut session: S, next: Next) {
        let interest = match next {
            Next::Read => Interest::READABLE,
            Next::Write => Interest::WRITABLE,
            Next::Dispatch => {
                if let Err(session) = self.pool.dispatch(session) {
                    debug!(peer = %session.peer_addr(), "task queue full, closing connection");
                    self.active -= 1;
                    drop(session);
                }
                return;
            }
            Next::Close => {
                self.active -= 1;
                drop(session);
                return;
            }
        };

        let entry = self.sessions.vacant_entry();
        let token = Token(entry.key());
        match self.poll.registry().register(session.source(), token, interest) {
            Ok(()) => {
                entry.insert(session);
            }
            Err(e) => {
                warn!(error = %e, "failed to re-register session");
                self.active -= 1;
            }
        }
    }

    /// Close a session still resident in the arena. Vacant slots are a
    /// no-op, so double close is harmless.
    fn close_slot(&mut self, slot: usize) {
        if let Some(mut session) = self.sessions.try_remove(slot) {
            let _ = self.poll.registry().deregister(session.source());
            self.active -= 1;
            trace!(peer = %session.peer_addr(), "connection closed");
        }
    }

    /// Stop accepting, drain the worker pool, and release every session.
    fn teardown(&mut self) {
        let _ = self.poll.registry().deregister(&mut self.listener);

        self.pool.shutdown();
        while let Ok((session, _next)) = self.done_rx.try_recv() {
            drop(session);
        }

        for session in self.sessions.drain() {
            drop(session);
        }
        self.active = 0;
        debug!("event loop stopped");
    }
}

/// Create the listening socket: address reuse on, non-blocking, bound and
/// listening with the configured backlog.
fn bind_listener(addr: SocketAddr, backlog: i32) -> io::Result<TcpListener> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(backlog)?;

    let std_listener: std::net::TcpListener = socket.into();
    Ok(TcpListener::from_std(std_listener))
}
