//! Store client configuration.
//!
//! Loaded from hardcoded defaults, an optional TOML file, and `ETCD_*`
//! environment variables, in that priority order. `ETCD_ENDPOINT` selects
//! the store endpoint the same way the conventional deployment environment
//! does.

use std::time::Duration;

use config::Config;
use config::Environment;
use config::File;
use serde::Deserialize;

use crate::errors::Error;
use crate::errors::Result;

pub const DEFAULT_ENDPOINT: &str = "http://127.0.0.1:2379";

fn default_endpoint() -> String {
    DEFAULT_ENDPOINT.to_string()
}

fn default_connect_timeout() -> u64 {
    1_000
}

fn default_request_timeout() -> u64 {
    5_000
}

fn default_watch_timeout() -> u64 {
    60
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// Store endpoint URL. Only a single endpoint is supported.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// TCP connect timeout in milliseconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_in_ms: u64,

    /// Request completion timeout in milliseconds, for everything except
    /// watch
    #[serde(default = "default_request_timeout")]
    pub request_timeout_in_ms: u64,

    /// Bound on the blocking watch wait, in seconds
    #[serde(default = "default_watch_timeout")]
    pub watch_timeout_in_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            endpoint: default_endpoint(),
            connect_timeout_in_ms: default_connect_timeout(),
            request_timeout_in_ms: default_request_timeout(),
            watch_timeout_in_secs: default_watch_timeout(),
        }
    }
}

impl StoreConfig {
    /// Load configuration with priority:
    /// 1. Hardcoded defaults
    /// 2. Optional config file
    /// 3. `ETCD_*` environment variables (highest priority)
    ///
    /// # Arguments
    /// * `config_path` - Optional path to a TOML config file
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = Config::builder();

        if let Some(path) = config_path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        builder = builder.add_source(
            Environment::with_prefix("ETCD")
                .ignore_empty(true)
                .try_parsing(true),
        );

        builder
            .build()
            .and_then(|config| config.try_deserialize())
            .map_err(|e| Error::Invalid(format!("config: {e}")))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_in_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_in_ms)
    }

    pub fn watch_timeout(&self) -> Duration {
        Duration::from_secs(self.watch_timeout_in_secs)
    }
}
