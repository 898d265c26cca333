//! Configuration loader.
//!
//! Parses the same line-oriented `key = value;` file format the original
//! server's `config_parser.c` consumes: `#`-prefixed and blank lines are
//! skipped, every other line must contain exactly one `key = value;` pair,
//! and nothing but whitespace may follow the trailing `;`. Unlike the
//! original, this loader does not mutate a pre-`malloc`'d struct in place —
//! it produces a validated [`ServerConfig`] or a descriptive [`ServerError`].

use std::fs;
use std::str::FromStr;

use storage_core::EvictionPolicy;

use crate::error::{ServerError, ServerResult};

pub const DEFAULT_N_WORKERS: usize = 4;
pub const DEFAULT_DIM_WORKERS_QUEUE: usize = 64;
pub const DEFAULT_MAX_FILE_NUM: usize = 10;
pub const DEFAULT_MAX_BYTES: usize = 1_000_000;
pub const DEFAULT_MAX_LOCKS: usize = 100;
pub const DEFAULT_EXPECTED_CLIENTS: usize = 10;
pub const DEFAULT_SOCKET_PATH: &str = "./storage_socket";
pub const DEFAULT_LOG_PATH: &str = "./log.csv";

/// Validated server configuration, built from defaults overridden by
/// whatever keys a config file specifies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub n_workers: usize,
    pub dim_workers_queue: usize,
    pub max_file_num: usize,
    pub max_bytes: usize,
    pub max_locks: usize,
    pub expected_clients: usize,
    pub socket_path: String,
    pub log_file_path: String,
    pub eviction_policy: EvictionPolicy,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            n_workers: DEFAULT_N_WORKERS,
            dim_workers_queue: DEFAULT_DIM_WORKERS_QUEUE,
            max_file_num: DEFAULT_MAX_FILE_NUM,
            max_bytes: DEFAULT_MAX_BYTES,
            max_locks: DEFAULT_MAX_LOCKS,
            expected_clients: DEFAULT_EXPECTED_CLIENTS,
            socket_path: DEFAULT_SOCKET_PATH.to_owned(),
            log_file_path: DEFAULT_LOG_PATH.to_owned(),
            eviction_policy: EvictionPolicy::Fifo,
        }
    }
}

/// Reads and validates a config file at `path`. A missing key keeps its
/// default; a key repeated, unrecognized, or carrying a malformed value is
/// fatal, matching the original's "file di configurazione mal formattato"
/// behavior.
pub fn load(path: &str) -> ServerResult<ServerConfig> {
    let text = fs::read_to_string(path).map_err(|source| ServerError::ConfigIo { path: path.to_owned(), source })?;
    parse(&text).map_err(|reason| ServerError::ConfigMalformed { path: path.to_owned(), reason })
}

fn parse(text: &str) -> Result<ServerConfig, String> {
    let mut config = ServerConfig::default();
    let mut seen = std::collections::HashSet::new();

    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        let without_semicolon = trimmed.strip_suffix(';').ok_or_else(|| format!("line missing trailing ';': '{line}'"))?;
        let (key, value) = without_semicolon.split_once('=').ok_or_else(|| format!("line missing '=': '{line}'"))?;
        let key = key.trim();
        let value = value.trim();

        if !seen.insert(key.to_owned()) {
            return Err(format!("'{key}' may only be specified once"));
        }

        apply(&mut config, key, value)?;
    }

    Ok(config)
}

fn apply(config: &mut ServerConfig, key: &str, value: &str) -> Result<(), String> {
    match key {
        "n_workers" => config.n_workers = parse_positive(key, value)?,
        "dim_workers_queue" => config.dim_workers_queue = parse_positive(key, value)?,
        "max_file_num" => config.max_file_num = parse_positive(key, value)?,
        "max_bytes" => config.max_bytes = parse_positive(key, value)?,
        "max_locks" => config.max_locks = parse_positive(key, value)?,
        "expected_clients" => config.expected_clients = parse_positive(key, value)?,
        "socket_path" => config.socket_path = value.to_owned(),
        "log_file_path" => config.log_file_path = value.to_owned(),
        "eviction_policy" => config.eviction_policy = EvictionPolicy::from_str(value)?,
        other => return Err(format!("'{other}' is not a recognized configuration key")),
    }
    Ok(())
}

fn parse_positive(key: &str, value: &str) -> Result<usize, String> {
    let parsed: i64 = value.parse().map_err(|_| format!("'{value}' is not a valid number for '{key}'"))?;
    if parsed <= 0 {
        return Err(format!("'{key}' must be a positive number, got '{value}'"));
    }
    Ok(parsed as usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_file_is_empty() {
        let config = parse("").unwrap();
        assert_eq!(config, ServerConfig::default());
    }

    #[test]
    fn comments_and_blank_lines_are_ignored() {
        let config = parse("# a comment\n\nn_workers = 8;\n").unwrap();
        assert_eq!(config.n_workers, 8);
    }

    #[test]
    fn overrides_socket_and_policy() {
        let config = parse("socket_path = /tmp/s;\neviction_policy = lru;\n").unwrap();
        assert_eq!(config.socket_path, "/tmp/s");
        assert_eq!(config.eviction_policy, EvictionPolicy::Lru);
    }

    #[test]
    fn rejects_repeated_key() {
        let err = parse("n_workers = 1;\nn_workers = 2;\n").unwrap_err();
        assert!(err.contains("once"));
    }

    #[test]
    fn rejects_non_positive_value() {
        assert!(parse("max_bytes = 0;\n").is_err());
        assert!(parse("max_bytes = -1;\n").is_err());
    }

    #[test]
    fn rejects_unrecognized_key() {
        assert!(parse("bogus_key = 1;\n").is_err());
    }

    #[test]
    fn rejects_missing_semicolon() {
        assert!(parse("n_workers = 1\n").is_err());
    }
}
