use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, bail};
use tokio::sync::Semaphore;
use tracing::trace;

use crate::util::{get_api_key, get_default_backend_url};

/// Process-wide tunables
///
/// These are read once from the initial configuration. A reload may carry
/// different values, but the throttle and channel sizes are fixed for the
/// lifetime of the process.
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
pub struct Tunables {
    /// Maximum number of hosts probed at the same time
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Metric channel capacity as a multiple of `batch_size`
    #[serde(default = "default_buffer_multiplier")]
    pub buffer_multiplier: usize,

    /// Maximum relay batch size before a size-triggered flush
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default = "default_probe_interval_secs")]
    pub probe_interval_secs: u64,

    #[serde(default = "default_flush_interval_secs")]
    pub flush_interval_secs: u64,

    #[serde(default = "default_retry_backoff_secs")]
    pub retry_backoff_secs: u64,
}

impl Default for Tunables {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            buffer_multiplier: default_buffer_multiplier(),
            batch_size: default_batch_size(),
            probe_interval_secs: default_probe_interval_secs(),
            flush_interval_secs: default_flush_interval_secs(),
            retry_backoff_secs: default_retry_backoff_secs(),
        }
    }
}

impl Tunables {
    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_secs)
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_secs(self.retry_backoff_secs)
    }

    /// Capacity of the metric channel between executors and the relay worker
    pub fn channel_capacity(&self) -> usize {
        self.batch_size.saturating_mul(self.buffer_multiplier)
    }

    fn validate(&self) -> anyhow::Result<()> {
        let checks = [
            ("max_concurrency", self.max_concurrency as u64),
            ("buffer_multiplier", self.buffer_multiplier as u64),
            ("batch_size", self.batch_size as u64),
            ("probe_interval_secs", self.probe_interval_secs),
            ("flush_interval_secs", self.flush_interval_secs),
            ("retry_backoff_secs", self.retry_backoff_secs),
        ];

        for (name, value) in checks {
            if value == 0 {
                bail!("tunable `{name}` must be greater than zero");
            }
        }

        let intervals = [
            ("probe_interval_secs", self.probe_interval_secs),
            ("flush_interval_secs", self.flush_interval_secs),
            ("retry_backoff_secs", self.retry_backoff_secs),
        ];

        for (name, value) in intervals {
            if value > MAX_INTERVAL_SECS {
                bail!("tunable `{name}` must be at most {MAX_INTERVAL_SECS} seconds");
            }
        }

        if self.max_concurrency > MAX_CONCURRENCY {
            bail!("tunable `max_concurrency` must be at most {MAX_CONCURRENCY}");
        }

        match self.batch_size.checked_mul(self.buffer_multiplier) {
            Some(capacity) if capacity <= MAX_CHANNEL_CAPACITY => {}
            _ => bail!(
                "`batch_size * buffer_multiplier` must be at most {MAX_CHANNEL_CAPACITY}"
            ),
        }

        Ok(())
    }
}

/// Upper bound for every interval tunable (one day)
pub const MAX_INTERVAL_SECS: u64 = 24 * 60 * 60;

/// Upper bound for the metric channel capacity
pub const MAX_CHANNEL_CAPACITY: usize = 1_000_000;

/// Upper bound for the throttle size
pub const MAX_CONCURRENCY: usize = Semaphore::MAX_PERMITS;

fn default_max_concurrency() -> usize {
    100
}

fn default_buffer_multiplier() -> usize {
    10
}

fn default_batch_size() -> usize {
    100
}

fn default_probe_interval_secs() -> u64 {
    60
}

fn default_flush_interval_secs() -> u64 {
    10
}

fn default_retry_backoff_secs() -> u64 {
    10
}

#[derive(Clone, PartialEq, Eq, serde::Deserialize)]
pub struct Config {
    /// Backend API key. Falls back to `MACKEREL_APIKEY` when empty.
    #[serde(default)]
    pub api_key: String,

    #[serde(default = "get_default_backend_url")]
    pub backend_url: String,

    /// Dump samples instead of posting them
    #[serde(default)]
    pub probe_only: bool,

    #[serde(default)]
    pub probes: Vec<ProbeDefinition>,

    #[serde(default)]
    pub tunables: Tunables,
}

// hand-written so the API key never ends up in logs
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let api_key = if self.api_key.is_empty() {
            "<unset>"
        } else {
            "<redacted>"
        };

        f.debug_struct("Config")
            .field("api_key", &api_key)
            .field("backend_url", &self.backend_url)
            .field("probe_only", &self.probe_only)
            .field("probes", &self.probes)
            .field("tunables", &self.tunables)
            .finish()
    }
}

/// Which hosts to target and which probes to generate for each of them
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
pub struct ProbeDefinition {
    pub service: String,

    #[serde(default)]
    pub roles: Vec<String>,

    #[serde(default)]
    pub tcp: Vec<TcpProbeConfig>,

    #[serde(default)]
    pub http: Vec<HttpProbeConfig>,

    #[serde(default)]
    pub command: Vec<CommandProbeConfig>,
}

impl ProbeDefinition {
    /// Number of probe templates carried by this definition
    pub fn template_count(&self) -> usize {
        self.tcp.len() + self.http.len() + self.command.len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
pub struct TcpProbeConfig {
    pub host: String,
    pub port: String,
    pub send: Option<String>,
    pub expect_pattern: Option<String>,
    #[serde(default = "default_probe_timeout")]
    pub timeout: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
    Head,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
pub struct HttpProbeConfig {
    pub url: String,
    #[serde(default)]
    pub method: HttpMethod,
    pub body: Option<String>,
    pub expected_status: Option<Vec<u16>>,
    pub body_pattern: Option<String>,
    #[serde(default = "default_probe_timeout")]
    pub timeout: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
pub struct CommandProbeConfig {
    pub command: Vec<String>,
    #[serde(default = "default_probe_timeout")]
    pub timeout: u64,
}

fn default_probe_timeout() -> u64 {
    5
}

impl Config {
    /// Fill in values that may come from the environment and check the result
    fn resolve(mut self) -> anyhow::Result<Self> {
        if self.api_key.is_empty() {
            self.api_key = get_api_key().unwrap_or_default();
        }

        if !self.probe_only && self.api_key.is_empty() {
            bail!("no API key configured (set `api_key` or MACKEREL_APIKEY)");
        }

        for (index, definition) in self.probes.iter().enumerate() {
            if definition.service.is_empty() {
                bail!("probe definition #{index} has an empty service");
            }
        }

        self.tunables.validate()?;

        Ok(self)
    }
}

pub fn parse_config(content: &str) -> anyhow::Result<Config> {
    parse_config_with(content, false)
}

/// Parse a document, forcing dump mode when `force_probe_only` is set
fn parse_config_with(content: &str, force_probe_only: bool) -> anyhow::Result<Config> {
    let mut config: Config =
        serde_json::from_str(content).context("invalid configuration document")?;
    config.probe_only |= force_probe_only;
    config.resolve()
}

fn read_config(path: &Path, force_probe_only: bool) -> anyhow::Result<Config> {
    let file_content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    parse_config_with(&file_content, force_probe_only)
        .with_context(|| format!("failed to load config file {}", path.display()))
        .inspect(|config| trace!("loaded config: {config:?}"))
}

/// Somewhere a configuration can be (re)loaded from
pub trait ConfigSource: Send + Sync {
    fn load(&self) -> anyhow::Result<Config>;
}

/// JSON config file, re-read on every load
#[derive(Debug, Clone)]
pub struct FileConfigSource {
    path: PathBuf,
    force_probe_only: bool,
}

impl FileConfigSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            force_probe_only: false,
        }
    }

    /// Treat every loaded config as probe-only regardless of its contents
    pub fn probe_only(mut self, force: bool) -> Self {
        self.force_probe_only = force;
        self
    }
}

impl ConfigSource for FileConfigSource {
    fn load(&self) -> anyhow::Result<Config> {
        read_config(&self.path, self.force_probe_only)
    }
}
