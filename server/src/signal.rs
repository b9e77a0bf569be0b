//! Signal handling.
//!
//! SIGINT/SIGTERM trigger a graceful shutdown via a shared flag; a second
//! signal forces immediate exit. SIGPIPE is ignored so a peer that goes
//! away mid-write surfaces as an ordinary EPIPE error on that one
//! connection instead of terminating the process.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Ignore SIGPIPE so broken-pipe writes fail with EPIPE.
///
/// The Rust runtime already arranges this for binaries; the explicit call
/// keeps the guarantee when the server is embedded elsewhere.
pub fn ignore_sigpipe() {
    unsafe {
        libc::signal(libc::SIGPIPE, libc::SIG_IGN);
    }
}

/// Install signal handlers for graceful shutdown.
///
/// Returns an `Arc<AtomicBool>` that flips to `true` when a shutdown
/// signal (SIGINT or SIGTERM) is received.
pub fn install_signal_handler() -> Arc<AtomicBool> {
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_flag = shutdown.clone();

    ctrlc::set_handler(move || {
        if shutdown_flag.swap(true, Ordering::SeqCst) {
            // Second signal - force exit
            tracing::warn!("received second signal, forcing immediate exit");
            std::process::exit(1);
        }
        tracing::info!("received shutdown signal, initiating graceful shutdown...");
    })
    .expect("failed to set signal handler");

    shutdown
}
