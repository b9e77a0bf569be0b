//! Readiness-driven event loop with a bounded worker pool.
//!
//! One reactor thread owns the poll registration and the accept loop; a
//! fixed set of worker threads drains a bounded FIFO task queue. A
//! connection is dispatched to at most one worker at a time: dispatch
//! deregisters the connection and moves the session value to the worker,
//! and the reactor re-arms readiness interest only once the worker hands
//! the session back.

pub mod config;
pub mod error;
pub mod event_loop;
pub mod session;
pub mod worker;

pub use config::Config;
pub use error::Error;
pub use event_loop::{EventLoop, ShutdownHandle};
pub use session::{Next, Session};
pub use worker::WorkerPool;
