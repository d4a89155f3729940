//! Load config from file and environment.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::engine::EngineConfig;
use crate::lan::LanConfig;

/// Node configuration. File: ~/.config/bluechat/config.toml or /etc/bluechat/config.toml.
/// Env overrides: BLUECHAT_NAME, BLUECHAT_DEBUG, BLUECHAT_DISCOVERY_PORT, BLUECHAT_SERVICE_PORT.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Display name sent in the handshake.
    #[serde(default)]
    pub name: Option<String>,
    /// Mirror engine log lines into the chat output.
    #[serde(default)]
    pub debug: bool,
    /// Discovery UDP port (default 45680).
    #[serde(default = "default_discovery_port")]
    pub discovery_port: u16,
    /// Chat service TCP port (default 45681).
    #[serde(default = "default_service_port")]
    pub service_port: u16,
    #[serde(default = "default_send_interval_secs")]
    pub send_interval_secs: u64,
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
    #[serde(default = "default_inquiry_window_ms")]
    pub inquiry_window_ms: u64,
    #[serde(default = "default_search_timeout_ms")]
    pub search_timeout_ms: u64,
}

fn default_discovery_port() -> u16 {
    45680
}
fn default_service_port() -> u16 {
    45681
}
fn default_send_interval_secs() -> u64 {
    5
}
fn default_settle_delay_ms() -> u64 {
    100
}
fn default_shutdown_grace_secs() -> u64 {
    5
}
fn default_inquiry_window_ms() -> u64 {
    2000
}
fn default_search_timeout_ms() -> u64 {
    1500
}

impl Default for Config {
    fn default() -> Self {
        Self {
            name: None,
            debug: false,
            discovery_port: default_discovery_port(),
            service_port: default_service_port(),
            send_interval_secs: default_send_interval_secs(),
            settle_delay_ms: default_settle_delay_ms(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
            inquiry_window_ms: default_inquiry_window_ms(),
            search_timeout_ms: default_search_timeout_ms(),
        }
    }
}

impl Config {
    pub fn engine(&self) -> EngineConfig {
        EngineConfig {
            send_interval: Duration::from_secs(self.send_interval_secs),
            settle_delay: Duration::from_millis(self.settle_delay_ms),
            shutdown_grace: Duration::from_secs(self.shutdown_grace_secs),
            ..EngineConfig::default()
        }
    }

    pub fn lan(&self) -> LanConfig {
        LanConfig {
            discovery_port: self.discovery_port,
            service_port: self.service_port,
            inquiry_window: Duration::from_millis(self.inquiry_window_ms),
            search_timeout: Duration::from_millis(self.search_timeout_ms),
        }
    }
}

/// Load config: defaults, then the given file or the first standard one present, then env vars.
pub fn load(explicit: Option<&Path>) -> Config {
    let mut c = match explicit {
        Some(p) => load_path(p),
        None => load_file(),
    }
    .unwrap_or_default();
    apply_env(&mut c, |key| std::env::var(key).ok());
    c
}

fn apply_env(c: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(s) = var("BLUECHAT_NAME") {
        if !s.trim().is_empty() {
            c.name = Some(s);
        }
    }
    if let Some(s) = var("BLUECHAT_DEBUG") {
        c.debug = matches!(s.as_str(), "1" | "true" | "yes");
    }
    if let Some(s) = var("BLUECHAT_DISCOVERY_PORT") {
        match s.parse::<u16>() {
            Ok(p) => c.discovery_port = p,
            Err(_) => tracing::warn!(value = %s, "ignoring BLUECHAT_DISCOVERY_PORT"),
        }
    }
    if let Some(s) = var("BLUECHAT_SERVICE_PORT") {
        match s.parse::<u16>() {
            Ok(p) => c.service_port = p,
            Err(_) => tracing::warn!(value = %s, "ignoring BLUECHAT_SERVICE_PORT"),
        }
    }
}

fn config_paths() -> Vec<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let mut out = Vec::new();
    if let Some(h) = home {
        out.push(h.join(".config/bluechat/config.toml"));
    }
    out.push(PathBuf::from("/etc/bluechat/config.toml"));
    out
}

fn load_file() -> Option<Config> {
    let p = config_paths().into_iter().find(|p| p.exists())?;
    load_path(&p)
}

fn load_path(p: &Path) -> Option<Config> {
    let s = match std::fs::read_to_string(p) {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!(path = %p.display(), error = %e, "cannot read config");
            return None;
        }
    };
    match toml::from_str::<Config>(&s) {
        Ok(c) => Some(c),
        Err(e) => {
            tracing::warn!(path = %p.display(), error = %e, "invalid config, using defaults");
            None
        }
    }
}
