//! Ember HTTP server binary.

use clap::Parser;
use server::banner::{BannerConfig, print_banner};
use server::config::Config;
use server::{logging, signal};
use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "ember-server")]
#[command(about = "Readiness-driven multi-threaded HTTP server")]
struct Args {
    /// Port to listen on (all interfaces); overrides the configured address
    port: Option<u16>,

    /// Path to configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Print default configuration and exit
    #[arg(long)]
    print_config: bool,
}

fn main() {
    let args = Args::parse();

    if args.print_config {
        print_default_config();
        return;
    }

    let mut config = match &args.config {
        Some(path) => match Config::load(path) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("Failed to load config: {}", e);
                std::process::exit(1);
            }
        },
        None => Config::default(),
    };

    match args.port {
        Some(port) => config.listener.address = SocketAddr::from(([0, 0, 0, 0], port)),
        None if args.config.is_none() => {
            eprintln!("No port or config file specified. Usage: ember-server <port> [--config <path>]");
            std::process::exit(1);
        }
        None => {}
    }

    // Initialize logging first
    logging::init(&config.logging);

    signal::ignore_sigpipe();
    let shutdown = signal::install_signal_handler();

    print_banner(&BannerConfig {
        version: env!("CARGO_PKG_VERSION"),
        address: config.listener.address,
        workers: config.threads(),
        max_connections: config.limits.max_connections,
        max_queued_tasks: config.limits.max_queued_tasks,
        buffer_ceiling: config.limits.buffer_ceiling,
        document_root: &config.http.document_root,
    });

    if let Err(e) = server::server::run(&config, shutdown) {
        tracing::error!(error = %e, "server error");
        std::process::exit(1);
    }
}

fn print_default_config() {
    let config = r#"# Ember Server Configuration

[listener]
# Address to listen on
address = "0.0.0.0:8080"
# TCP listen backlog
backlog = 1024

[workers]
# Number of worker threads (default: number of CPUs)
# threads = 8

[limits]
# Maximum concurrent connections; accepts beyond this are closed
# immediately without a response
max_connections = 4096

# Maximum tasks waiting for a worker; reads that become ready while the
# queue is full close their connection
max_queued_tasks = 1024

# Per-connection read buffer ceiling (e.g. "64KB", "1MB"); a request that
# exceeds it is answered with 413 and the connection is closed
buffer_ceiling = "64KB"

[http]
# Directory static files are served from
document_root = "public"

[logging]
# Log level: "error", "warn", "info", "debug", "trace"
# Can be overridden with the RUST_LOG environment variable
level = "info"
# Log format: "pretty" (human-readable), "json", or "compact"
format = "pretty"
# Include timestamps
timestamps = true
# Include thread names
thread_names = false
# Include module target
target = true
"#;
    print!("{}", config);
}
