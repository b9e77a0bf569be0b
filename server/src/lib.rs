//! Ember HTTP server.
//!
//! A readiness-driven, multi-threaded HTTP/1.x server: one reactor thread
//! multiplexes readiness over all connections and a bounded worker pool
//! parses requests and writes responses, built on the spindle event loop.

pub mod banner;
pub mod config;
pub mod connection;
pub mod execute;
pub mod http;
pub mod logging;
pub mod metrics;
pub mod server;
pub mod signal;

pub use config::Config;
