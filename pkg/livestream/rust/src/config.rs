// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use crate::dispatcher::{QueryDispatcher, VariableResolver};
use crate::errors::Error;
use crate::query::{DEFAULT_BUFFER, DataSourceOptions};
use anyhow::{Context, Result, bail};
use log::warn;
use serde::Deserialize;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_CONFIG_PATH: &str = "/etc/datadog-agent/livestream.yaml";

fn default_log_level() -> String {
    "info".to_string()
}

fn default_buffer() -> usize {
    DEFAULT_BUFFER
}

fn default_channel_capacity() -> usize {
    crate::handler::DEFAULT_CHANNEL_CAPACITY
}

fn default_max_line_bytes() -> usize {
    crate::decoder::DEFAULT_MAX_LINE_BYTES
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_reap_interval() -> u64 {
    60
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub base_url: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Series capacity for queries that do not set one.
    #[serde(default = "default_buffer")]
    pub default_buffer: usize,
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    #[serde(default = "default_max_line_bytes")]
    pub max_line_bytes: usize,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// Evict streams nobody has used for this long. Unset keeps them forever.
    #[serde(default)]
    pub idle_timeout_secs: Option<u64>,
    #[serde(default = "default_reap_interval")]
    pub reap_interval_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            log_level: default_log_level(),
            default_buffer: default_buffer(),
            channel_capacity: default_channel_capacity(),
            max_line_bytes: default_max_line_bytes(),
            connect_timeout_secs: default_connect_timeout(),
            idle_timeout_secs: None,
            reap_interval_secs: default_reap_interval(),
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.default_buffer == 0 {
            return Err(Error::InvalidCapacity { capacity: 0 }).context("default_buffer");
        }
        if self.channel_capacity == 0 {
            bail!("channel_capacity must be greater than zero");
        }
        self.log_level()?;
        Ok(())
    }

    pub fn log_level(&self) -> Result<log::Level> {
        log::Level::from_str(&self.log_level)
            .with_context(|| format!("invalid log_level: {}", self.log_level))
    }

    pub fn options(&self) -> DataSourceOptions {
        DataSourceOptions {
            base_url: self.base_url.clone(),
        }
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout_secs.map(Duration::from_secs)
    }

    pub fn reap_interval(&self) -> Duration {
        Duration::from_secs(self.reap_interval_secs)
    }

    /// HTTP client for stream requests. Only connecting is bounded in time;
    /// bodies are expected to never end.
    pub fn http_client(&self) -> std::result::Result<reqwest::Client, Error> {
        reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(self.connect_timeout_secs))
            .build()
            .map_err(Error::Client)
    }

    pub fn dispatcher(&self, variables: Arc<dyn VariableResolver>) -> Result<QueryDispatcher> {
        let client = self.http_client()?;
        Ok(QueryDispatcher::new(&self.options(), client)
            .with_variables(variables)
            .with_default_buffer(self.default_buffer)
            .with_channel_capacity(self.channel_capacity)
            .with_max_line_bytes(self.max_line_bytes))
    }
}

/// Load the config. An explicit path must exist; without one the default
/// location is tried and built-in defaults are used if it is missing.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let config = match path {
        Some(path) => parse_config(path)?,
        None => {
            let path = Path::new(DEFAULT_CONFIG_PATH);
            if path.exists() {
                parse_config(path)?
            } else {
                warn!(
                    "config file not found at {}, using defaults",
                    path.display()
                );
                Config::default()
            }
        }
    };
    config.validate()?;
    Ok(config)
}

fn parse_config(path: &Path) -> Result<Config> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    if contents.trim().is_empty() {
        return Ok(Config::default());
    }
    let config: Config =
        serde_yaml::from_str(&contents).with_context(|| format!("parsing {}", path.display()))?;
    Ok(config)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::PathBuf;

    fn write(dir: &Path, contents: &str) -> PathBuf {
        let path = dir.join("livestream.yaml");
        fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_parse_full_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            dir.path(),
            r#"
base_url: http://localhost:9000
log_level: debug
default_buffer: 500
channel_capacity: 8
max_line_bytes: 4096
connect_timeout_secs: 3
idle_timeout_secs: 600
reap_interval_secs: 30
"#,
        );

        let cfg = load_config(Some(&path)).unwrap();
        assert_eq!(cfg.base_url, "http://localhost:9000");
        assert_eq!(cfg.log_level().unwrap(), log::Level::Debug);
        assert_eq!(cfg.default_buffer, 500);
        assert_eq!(cfg.channel_capacity, 8);
        assert_eq!(cfg.max_line_bytes, 4096);
        assert_eq!(cfg.connect_timeout_secs, 3);
        assert_eq!(cfg.idle_timeout(), Some(Duration::from_secs(600)));
        assert_eq!(cfg.reap_interval(), Duration::from_secs(30));
        assert_eq!(cfg.options().base_url, "http://localhost:9000");
    }

    #[test]
    fn test_parse_minimal_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "base_url: http://h\n");

        let cfg = load_config(Some(&path)).unwrap();
        assert_eq!(cfg.base_url, "http://h");
        assert_eq!(cfg.default_buffer, 2000);
        assert_eq!(cfg.log_level().unwrap(), log::Level::Info);
        assert_eq!(cfg.idle_timeout(), None);
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "\n");
        assert_eq!(load_config(Some(&path)).unwrap(), Config::default());
    }

    #[test]
    fn test_zero_buffer_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "default_buffer: 0\n");
        let err = load_config(Some(&path)).unwrap_err();
        assert!(format!("{err:#}").contains("invalid buffer capacity"));
    }

    #[test]
    fn test_bad_log_level_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "log_level: loud\n");
        assert!(load_config(Some(&path)).is_err());
    }

    #[test]
    fn test_invalid_yaml_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "not: valid: yaml: [");
        assert!(load_config(Some(&path)).is_err());
    }

    #[test]
    fn test_missing_explicit_file_rejected() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_config(Some(&dir.path().join("missing.yaml"))).is_err());
    }
}
