//! Server configuration.
//!
//! Loaded from a TOML file; every section has sensible defaults so a bare
//! `[listener]` with a port is enough to run.

use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Server configuration loaded from a TOML file.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Listening socket
    #[serde(default)]
    pub listener: ListenerConfig,

    /// Worker thread configuration
    #[serde(default)]
    pub workers: WorkersConfig,

    /// Capacity ceilings
    #[serde(default)]
    pub limits: LimitsConfig,

    /// HTTP behavior
    #[serde(default)]
    pub http: HttpConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Listening socket configuration.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ListenerConfig {
    /// Address to listen on
    #[serde(default = "default_address")]
    pub address: SocketAddr,

    /// TCP listen backlog
    #[serde(default = "default_backlog")]
    pub backlog: i32,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            backlog: default_backlog(),
        }
    }
}

/// Worker thread configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkersConfig {
    /// Number of worker threads (default: number of CPUs)
    pub threads: Option<usize>,
}

/// Capacity ceilings.
///
/// All three are back-pressure decisions, not errors: connections beyond
/// `max_connections` are closed at accept without a response, reads that
/// become ready while the task queue is full close their connection, and a
/// connection whose buffered request exceeds `buffer_ceiling` is answered
/// with 413 and closed.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LimitsConfig {
    /// Maximum concurrent connections
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Maximum tasks waiting for a worker
    #[serde(default = "default_max_queued_tasks")]
    pub max_queued_tasks: usize,

    /// Per-connection read buffer ceiling (e.g. "64KB")
    #[serde(
        default = "default_buffer_ceiling",
        deserialize_with = "deserialize_size"
    )]
    pub buffer_ceiling: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            max_queued_tasks: default_max_queued_tasks(),
            buffer_ceiling: default_buffer_ceiling(),
        }
    }
}

/// HTTP behavior.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HttpConfig {
    /// Directory static files are served from
    #[serde(default = "default_document_root")]
    pub document_root: PathBuf,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            document_root: default_document_root(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Log level: "error", "warn", "info", "debug", "trace".
    /// RUST_LOG takes precedence when set.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format
    #[serde(default)]
    pub format: LogFormat,

    /// Include timestamps
    #[serde(default = "default_true")]
    pub timestamps: bool,

    /// Include thread names
    #[serde(default)]
    pub thread_names: bool,

    /// Include module target
    #[serde(default = "default_true")]
    pub target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
            timestamps: true,
            thread_names: false,
            target: true,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable output
    #[default]
    Pretty,
    /// Structured JSON output
    Json,
    /// Compact single-line output
    Compact,
}

// Default value functions

fn default_address() -> SocketAddr {
    "0.0.0.0:8080".parse().unwrap()
}

fn default_backlog() -> i32 {
    1024
}

fn default_max_connections() -> usize {
    4096
}

fn default_max_queued_tasks() -> usize {
    1024
}

fn default_buffer_ceiling() -> usize {
    64 * 1024
}

fn default_document_root() -> PathBuf {
    PathBuf::from("public")
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

/// Deserialize a size string like "64KB" or "1MB" into bytes.
fn deserialize_size<'de, D>(deserializer: D) -> Result<usize, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Error;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum SizeValue {
        Number(usize),
        String(String),
    }

    match SizeValue::deserialize(deserializer)? {
        SizeValue::Number(n) => Ok(n),
        SizeValue::String(s) => parse_size(&s).map_err(D::Error::custom),
    }
}

/// Parse a size string like "4KB", "64MB", "1GB" into bytes.
pub fn parse_size(s: &str) -> Result<usize, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty size string".to_string());
    }

    let (num_str, suffix) = match s.find(|c: char| c.is_alphabetic()) {
        Some(idx) => (&s[..idx], s[idx..].to_uppercase()),
        None => (s, String::new()),
    };

    let num: usize = num_str
        .trim()
        .parse()
        .map_err(|_| format!("invalid number: {}", num_str))?;

    let multiplier: usize = match suffix.as_str() {
        "" | "B" => 1,
        "K" | "KB" | "KIB" => 1024,
        "M" | "MB" | "MIB" => 1024 * 1024,
        "G" | "GB" | "GIB" => 1024 * 1024 * 1024,
        _ => return Err(format!("unknown size suffix: {}", suffix)),
    };

    num.checked_mul(multiplier)
        .ok_or_else(|| "size overflow".to_string())
}

/// Format a size in bytes as a human-readable string.
pub fn format_size(bytes: usize) -> String {
    const KB: usize = 1024;
    const MB: usize = 1024 * KB;

    if bytes >= MB && bytes % MB == 0 {
        format!("{} MB", bytes / MB)
    } else if bytes >= KB && bytes % KB == 0 {
        format!("{} KB", bytes / KB)
    } else {
        format!("{} bytes", bytes)
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), Box<dyn std::error::Error>> {
        if self.limits.max_connections == 0 {
            return Err("max_connections must be nonzero".into());
        }
        if self.limits.max_queued_tasks == 0 {
            return Err("max_queued_tasks must be nonzero".into());
        }
        if self.limits.buffer_ceiling < 1024 {
            return Err(format!(
                "buffer_ceiling ({}) must be at least 1KB",
                self.limits.buffer_ceiling
            )
            .into());
        }
        if let Some(0) = self.workers.threads {
            return Err("workers.threads must be nonzero".into());
        }
        Ok(())
    }

    /// Number of worker threads.
    pub fn threads(&self) -> usize {
        self.workers.threads.unwrap_or_else(num_cpus::get)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("1024").unwrap(), 1024);
        assert_eq!(parse_size("4K").unwrap(), 4096);
        assert_eq!(parse_size("64KB").unwrap(), 64 * 1024);
        assert_eq!(parse_size("1MB").unwrap(), 1024 * 1024);
        assert!(parse_size("12parsecs").is_err());
        assert!(parse_size("").is_err());
    }

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.listener.address, default_address());
        assert_eq!(config.limits.max_connections, 4096);
        assert!(config.threads() >= 1);
    }

    #[test]
    fn toml_round_trip() {
        let config: Config = toml::from_str(
            r#"
            [listener]
            address = "127.0.0.1:9000"
            backlog = 64

            [workers]
            threads = 2

            [limits]
            max_connections = 128
            max_queued_tasks = 8
            buffer_ceiling = "16KB"

            [http]
            document_root = "/srv/www"

            [logging]
            level = "debug"
            format = "compact"
            "#,
        )
        .unwrap();

        config.validate().unwrap();
        assert_eq!(config.listener.address.port(), 9000);
        assert_eq!(config.threads(), 2);
        assert_eq!(config.limits.max_queued_tasks, 8);
        assert_eq!(config.limits.buffer_ceiling, 16 * 1024);
        assert_eq!(config.http.document_root, PathBuf::from("/srv/www"));
        assert_eq!(config.logging.format, LogFormat::Compact);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let parsed: Result<Config, _> = toml::from_str(
            r#"
            [listener]
            address = "127.0.0.1:9000"
            frobnicate = true
            "#,
        );
        assert!(parsed.is_err());
    }

    #[test]
    fn zero_capacities_fail_validation() {
        let config: Config = toml::from_str(
            r#"
            [limits]
            max_connections = 0
            "#,
        )
        .unwrap();
        assert!(config.validate().is_err());
    }
}
