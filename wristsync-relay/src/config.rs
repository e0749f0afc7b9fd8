//! Load config from file and environment.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

/// Relay configuration. File: ~/.config/wristsync/config.toml or /etc/wristsync/config.toml.
/// Env overrides: WRISTSYNC_PORT, WRISTSYNC_PEER_ADDR, WRISTSYNC_DATA_FILE,
/// WRISTSYNC_IDENTITY_FILE, WRISTSYNC_REPLY_TIMEOUT_MS, WRISTSYNC_LOG_LEVEL.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Phone role listen port (default 45690).
    #[serde(default = "default_port")]
    pub port: u16,
    /// Where the watch role connects (default 127.0.0.1:45690).
    #[serde(default = "default_peer_addr")]
    pub peer_addr: String,
    /// Exercise list served by the phone role (JSON array).
    #[serde(default = "default_data_file")]
    pub data_file: PathBuf,
    /// Per-installation identifier, created on first run.
    #[serde(default = "default_identity_file")]
    pub identity_file: PathBuf,
    /// How long the watch role waits for a reply (default 10 s).
    #[serde(default = "default_reply_timeout_ms")]
    pub reply_timeout_ms: u64,
    /// Delay between watch reconnect attempts (default 2 s).
    #[serde(default = "default_reconnect_interval_ms")]
    pub reconnect_interval_ms: u64,
    /// `tracing` filter used when RUST_LOG is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_port() -> u16 {
    45690
}
fn default_peer_addr() -> String {
    "127.0.0.1:45690".to_string()
}
fn data_dir() -> PathBuf {
    match std::env::var_os("HOME") {
        Some(h) => PathBuf::from(h).join(".local/share/wristsync"),
        None => PathBuf::from("/var/lib/wristsync"),
    }
}
fn default_data_file() -> PathBuf {
    data_dir().join("exercises.json")
}
fn default_identity_file() -> PathBuf {
    data_dir().join("device_id")
}
fn default_reply_timeout_ms() -> u64 {
    10_000
}
fn default_reconnect_interval_ms() -> u64 {
    2_000
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: default_port(),
            peer_addr: default_peer_addr(),
            data_file: default_data_file(),
            identity_file: default_identity_file(),
            reply_timeout_ms: default_reply_timeout_ms(),
            reconnect_interval_ms: default_reconnect_interval_ms(),
            log_level: default_log_level(),
        }
    }
}

impl Config {
    pub fn reply_timeout(&self) -> Duration {
        Duration::from_millis(self.reply_timeout_ms)
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }

    /// Apply overrides from `lookup` (the process environment in production).
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(p) = lookup("WRISTSYNC_PORT").and_then(|s| s.parse::<u16>().ok()) {
            self.port = p;
        }
        if let Some(addr) = lookup("WRISTSYNC_PEER_ADDR") {
            self.peer_addr = addr;
        }
        if let Some(path) = lookup("WRISTSYNC_DATA_FILE") {
            self.data_file = PathBuf::from(path);
        }
        if let Some(path) = lookup("WRISTSYNC_IDENTITY_FILE") {
            self.identity_file = PathBuf::from(path);
        }
        if let Some(ms) = lookup("WRISTSYNC_REPLY_TIMEOUT_MS").and_then(|s| s.parse::<u64>().ok()) {
            self.reply_timeout_ms = ms;
        }
        if let Some(level) = lookup("WRISTSYNC_LOG_LEVEL") {
            self.log_level = level;
        }
    }
}

/// Load config: merge default, then config file (if present), then env vars.
/// An explicit `path` replaces the search of the default locations.
pub fn load(path: Option<&Path>) -> Config {
    let file = match path {
        Some(p) => load_file(p),
        None => config_paths().iter().find(|p| p.exists()).and_then(|p| load_file(p)),
    };
    let mut c = file.unwrap_or_default();
    c.apply_env(|key| std::env::var(key).ok());
    c
}

fn config_paths() -> Vec<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let mut out = Vec::new();
    if let Some(h) = home {
        out.push(h.join(".config/wristsync/config.toml"));
    }
    out.push(PathBuf::from("/etc/wristsync/config.toml"));
    out
}

/// Logging is not up yet when config loads, so problems go to stderr.
fn load_file(path: &Path) -> Option<Config> {
    let s = match std::fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("wristsync: cannot read {}: {e}", path.display());
            return None;
        }
    };
    match toml::from_str::<Config>(&s) {
        Ok(c) => Some(c),
        Err(e) => {
            eprintln!("wristsync: ignoring {}: {e}", path.display());
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn file_values_override_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "port = 5000\nreply_timeout_ms = 250\n").unwrap();
        let c = load_file(&path).unwrap();
        assert_eq!(c.port, 5000);
        assert_eq!(c.reply_timeout(), Duration::from_millis(250));
        assert_eq!(c.peer_addr, default_peer_addr());
    }

    #[test]
    fn unknown_fields_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "proxy_port = 3128\n").unwrap();
        assert!(load_file(&path).is_none());
    }

    #[test]
    fn env_overrides_apply_and_bad_numbers_are_ignored() {
        let env: HashMap<&str, &str> = [
            ("WRISTSYNC_PORT", "not-a-port"),
            ("WRISTSYNC_PEER_ADDR", "10.0.0.7:45690"),
            ("WRISTSYNC_REPLY_TIMEOUT_MS", "1500"),
            ("WRISTSYNC_LOG_LEVEL", "debug"),
        ]
        .into_iter()
        .collect();
        let mut c = Config::default();
        c.apply_env(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(c.port, default_port());
        assert_eq!(c.peer_addr, "10.0.0.7:45690");
        assert_eq!(c.reply_timeout_ms, 1500);
        assert_eq!(c.log_level, "debug");
    }
}
