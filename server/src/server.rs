//! Server run loop: wires the configuration, the session factory, and the
//! spindle event loop together.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use mio::net::TcpStream;
use tracing::info;

use crate::config::Config;
use crate::connection::HttpConn;
use crate::execute::HttpOptions;
use crate::metrics;

/// Run the server until `shutdown` is set or the event loop fails.
///
/// Blocks the calling thread on the reactor loop. On return all
/// connections are released and the worker pool is joined.
pub fn run(config: &Config, shutdown: Arc<AtomicBool>) -> Result<(), Box<dyn std::error::Error>> {
    let spindle_config = spindle::Config {
        backlog: config.listener.backlog,
        max_connections: config.limits.max_connections,
        max_queued_tasks: config.limits.max_queued_tasks,
        worker_threads: config.threads(),
        ..spindle::Config::default()
    };

    let options = Arc::new(HttpOptions {
        document_root: config.http.document_root.clone(),
        buffer_ceiling: config.limits.buffer_ceiling,
    });

    let factory = move |stream: TcpStream, peer: SocketAddr| {
        HttpConn::new(stream, peer, Arc::clone(&options))
    };

    let mut event_loop =
        spindle::EventLoop::bind(spindle_config, config.listener.address, factory)?;

    info!(
        address = %event_loop.local_addr()?,
        workers = config.threads(),
        "server listening"
    );

    // Bridge the external shutdown flag to the event loop handle so a
    // signal can interrupt the blocking poll.
    let handle = event_loop.shutdown_handle();
    let monitor = {
        let shutdown = Arc::clone(&shutdown);
        let handle = handle.clone();
        thread::Builder::new()
            .name("shutdown-monitor".to_string())
            .spawn(move || {
                while !shutdown.load(Ordering::Relaxed) && !handle.is_shutdown() {
                    thread::sleep(Duration::from_millis(100));
                }
                handle.shutdown();
            })?
    };

    let result = event_loop.run();

    // Unblock the monitor if the loop ended on its own.
    shutdown.store(true, Ordering::Relaxed);
    let _ = monitor.join();

    metrics::log_summary();
    info!("server shutdown complete");
    result.map_err(Into::into)
}
