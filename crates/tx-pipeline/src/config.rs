//! Pipeline configuration loaded from TOML.
//!
//! ```toml
//! cluster = "devnet"
//! request_timeout_ms = 30000
//!
//! [endpoints]
//! devnet = "https://devnet.example-rpc.com"
//!
//! [headers]
//! x-api-key = "..."
//!
//! [send]
//! maxRetries = 5
//! awaitConfirmation = true
//!
//! [logging]
//! level = "info"
//! format = "json"
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use sol_rpc::{ClientOptions, Cluster};

use crate::submit::SendOptions;

fn default_request_timeout_ms() -> u64 {
    30_000
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive; `RUST_LOG` takes precedence.
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::Text,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Cluster used when a request names none.
    #[serde(default)]
    pub cluster: Cluster,

    /// Endpoint overrides keyed by cluster name.
    #[serde(default)]
    pub endpoints: BTreeMap<String, String>,

    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Extra HTTP headers sent with every RPC request.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    /// Defaults for `send` when a request omits its options.
    #[serde(default)]
    pub send: SendOptions,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            cluster: Cluster::default(),
            endpoints: BTreeMap::new(),
            request_timeout_ms: default_request_timeout_ms(),
            headers: BTreeMap::new(),
            send: SendOptions::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl PipelineConfig {
    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        let config: PipelineConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        Self::from_toml(&content)
            .with_context(|| format!("failed to parse config {}", path.display()))
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.request_timeout_ms == 0 {
            anyhow::bail!("request_timeout_ms must be > 0");
        }
        for (name, url) in &self.endpoints {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                anyhow::bail!("endpoint for {name} must be an http(s) URL");
            }
        }
        Ok(())
    }

    /// RPC URL for `cluster`, honouring overrides.
    pub fn endpoint_for(&self, cluster: &Cluster) -> String {
        self.endpoints
            .get(cluster.name())
            .cloned()
            .unwrap_or_else(|| cluster.url().to_string())
    }

    pub fn client_options(&self) -> ClientOptions {
        ClientOptions {
            request_timeout: Duration::from_millis(self.request_timeout_ms),
            headers: self.headers.clone(),
        }
    }
}
