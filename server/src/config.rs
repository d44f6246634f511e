//! Server configuration.
//!
//! Loaded from a TOML file; every option has a compiled-in default, so an
//! empty file (or no file at all) runs.

use reactor::ReactorConfig;
use serde::Deserialize;
use std::path::Path;

/// Top-level configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub uring: UringConfig,

    #[serde(default)]
    pub buffers: BuffersConfig,

    #[serde(default)]
    pub workers: WorkersConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Listener and connection limits.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// TCP listen port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Listen backlog.
    #[serde(default = "default_backlog")]
    pub backlog: i32,

    /// Connection record cap.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Root directory for static files.
    #[serde(default = "default_static_root")]
    pub static_root: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            backlog: default_backlog(),
            max_connections: default_max_connections(),
            static_root: default_static_root(),
        }
    }
}

/// io_uring specific settings.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UringConfig {
    /// Submission queue depth.
    #[serde(default = "default_sq_depth")]
    pub sq_depth: u32,

    /// Accept submissions kept armed on the listen fd.
    #[serde(default = "default_accept_prearm")]
    pub accept_prearm: usize,
}

impl Default for UringConfig {
    fn default() -> Self {
        Self {
            sq_depth: default_sq_depth(),
            accept_prearm: default_accept_prearm(),
        }
    }
}

/// Staging buffer sizing.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BuffersConfig {
    /// Per-direction ring buffer capacity per connection (e.g., "32KB").
    #[serde(
        default = "default_ring_buffer_size",
        deserialize_with = "deserialize_size"
    )]
    pub ring_buffer_size: usize,

    /// Buddy arena size for overflow buffers (e.g., "1MB").
    #[serde(default = "default_pool_size", deserialize_with = "deserialize_size")]
    pub pool_size: usize,

    /// Buddy minimum block size (e.g., "4KB").
    #[serde(
        default = "default_min_block_size",
        deserialize_with = "deserialize_size"
    )]
    pub min_block_size: usize,
}

impl Default for BuffersConfig {
    fn default() -> Self {
        Self {
            ring_buffer_size: default_ring_buffer_size(),
            pool_size: default_pool_size(),
            min_block_size: default_min_block_size(),
        }
    }
}

/// Worker thread configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkersConfig {
    /// Number of worker threads (default: hardware concurrency, minimum 4).
    pub threads: Option<usize>,
}

/// Logging configuration.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "server=debug").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format: "pretty", "compact", or "json".
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Compact,
    Json,
}

// Default value functions

fn default_port() -> u16 {
    2025
}

fn default_backlog() -> i32 {
    128
}

fn default_max_connections() -> usize {
    1024
}

fn default_static_root() -> String {
    "./html".to_string()
}

fn default_sq_depth() -> u32 {
    1024
}

fn default_accept_prearm() -> usize {
    10
}

fn default_ring_buffer_size() -> usize {
    32 * 1024
}

fn default_pool_size() -> usize {
    1024 * 1024
}

fn default_min_block_size() -> usize {
    4 * 1024
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Deserialize a size string like "32KB" or "1MB" into bytes.
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

/// Parse a size string like "32KB", "1MB", "4GB" into bytes.
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
    const GB: usize = 1024 * MB;

    if bytes >= GB && bytes % GB == 0 {
        format!("{} GB", bytes / GB)
    } else if bytes >= MB && bytes % MB == 0 {
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
        if self.server.max_connections == 0 {
            return Err("max_connections must be non-zero".into());
        }

        if !self.buffers.pool_size.is_power_of_two()
            || !self.buffers.min_block_size.is_power_of_two()
        {
            return Err("pool_size and min_block_size must be powers of two".into());
        }

        if self.buffers.min_block_size > self.buffers.pool_size {
            return Err(format!(
                "min_block_size ({}) must not exceed pool_size ({})",
                self.buffers.min_block_size, self.buffers.pool_size
            )
            .into());
        }

        if self.buffers.ring_buffer_size < 1024 {
            return Err("ring_buffer_size must be at least 1KB".into());
        }

        if self.uring.sq_depth == 0 {
            return Err("sq_depth must be non-zero".into());
        }

        if self.server.static_root.is_empty() {
            return Err("static_root must not be empty".into());
        }

        Ok(())
    }

    /// Resolved worker thread count: explicit value, else hardware
    /// concurrency with a floor of four.
    pub fn threads(&self) -> usize {
        match self.workers.threads {
            Some(n) if n > 0 => n,
            _ => num_cpus::get().max(4),
        }
    }

    /// Flatten into the reactor's runtime record.
    pub fn to_reactor_config(&self) -> ReactorConfig {
        ReactorConfig {
            sq_entries: self.uring.sq_depth,
            max_connections: self.server.max_connections,
            ring_buffer_size: self.buffers.ring_buffer_size,
            buffer_pool_size: self.buffers.pool_size,
            min_block_size: self.buffers.min_block_size,
            worker_threads: self.threads(),
            accept_prearm: self.uring.accept_prearm,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("1024").unwrap(), 1024);
        assert_eq!(parse_size("32KB").unwrap(), 32 * 1024);
        assert_eq!(parse_size("1MB").unwrap(), 1024 * 1024);
        assert_eq!(parse_size("4K").unwrap(), 4096);
        assert!(parse_size("12XB").is_err());
        assert!(parse_size("").is_err());
    }

    #[test]
    fn defaults_match_the_compiled_in_constants() {
        let config = Config::default();
        assert_eq!(config.server.port, 2025);
        assert_eq!(config.server.backlog, 128);
        assert_eq!(config.server.max_connections, 1024);
        assert_eq!(config.uring.sq_depth, 1024);
        assert_eq!(config.uring.accept_prearm, 10);
        assert_eq!(config.buffers.ring_buffer_size, 32 * 1024);
        assert_eq!(config.buffers.pool_size, 1024 * 1024);
        assert_eq!(config.buffers.min_block_size, 4 * 1024);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn parses_a_full_file() {
        let config: Config = toml::from_str(
            r#"
            [server]
            port = 8080
            backlog = 256
            max_connections = 2048
            static_root = "/srv/html"

            [uring]
            sq_depth = 512
            accept_prearm = 4

            [buffers]
            ring_buffer_size = "64KB"
            pool_size = "2MB"
            min_block_size = "8KB"

            [workers]
            threads = 2

            [logging]
            level = "debug"
            format = "compact"
            "#,
        )
        .unwrap();

        assert_eq!(config.server.port, 8080);
        assert_eq!(config.buffers.ring_buffer_size, 64 * 1024);
        assert_eq!(config.threads(), 2);
        assert_eq!(config.logging.format, LogFormat::Compact);
        assert!(config.validate().is_ok());

        let rc = config.to_reactor_config();
        assert_eq!(rc.sq_entries, 512);
        assert_eq!(rc.max_connections, 2048);
    }

    #[test]
    fn rejects_unknown_fields_and_bad_sizes() {
        assert!(toml::from_str::<Config>("[server]\nbogus = 1\n").is_err());

        let config: Config = toml::from_str("[buffers]\npool_size = \"3MB\"\n").unwrap();
        assert!(config.validate().is_err());
    }
}
