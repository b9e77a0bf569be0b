//! Startup banner utilities.

use crate::config::format_size;
use std::fmt::Write;
use std::net::SocketAddr;
use std::path::Path;

/// Configuration for the startup banner.
pub struct BannerConfig<'a> {
    /// Version string
    pub version: &'a str,
    /// Listening address
    pub address: SocketAddr,
    /// Number of worker threads
    pub workers: usize,
    /// Maximum concurrent connections
    pub max_connections: usize,
    /// Maximum queued tasks
    pub max_queued_tasks: usize,
    /// Per-connection buffer ceiling in bytes
    pub buffer_ceiling: usize,
    /// Document root
    pub document_root: &'a Path,
}

/// Print a startup banner to stdout.
pub fn print_banner(config: &BannerConfig) {
    let mut output = String::with_capacity(512);

    let name = "ember-server";
    writeln!(output, "{} v{}", name, config.version).unwrap();
    writeln!(
        output,
        "{}",
        "=".repeat(name.len() + config.version.len() + 2)
    )
    .unwrap();
    writeln!(output).unwrap();

    writeln!(output, "Listener:  {}", config.address).unwrap();
    writeln!(output, "Workers:   {}", config.workers).unwrap();
    writeln!(output, "Docroot:   {}", config.document_root.display()).unwrap();

    writeln!(output).unwrap();

    writeln!(output, "Limits:").unwrap();
    writeln!(output, "  Connections: {}", config.max_connections).unwrap();
    writeln!(output, "  Task queue:  {}", config.max_queued_tasks).unwrap();
    writeln!(
        output,
        "  Buffer:      {}",
        format_size(config.buffer_ceiling)
    )
    .unwrap();

    writeln!(output).unwrap();

    print!("{}", output);
}
