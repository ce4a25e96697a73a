//! Layered demo configuration: defaults → `queuepool.toml` → `QUEUEPOOL_*`
//! environment → command-line flags.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use queuepool::PoolConfig;
use serde::{Deserialize, Serialize};

/// File picked up from the working directory when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "queuepool.toml";

/// Prefix for environment overrides, e.g. `QUEUEPOOL_POOL__BASE_CAPACITY=4`.
pub const ENV_PREFIX: &str = "QUEUEPOOL_";

/// Everything the demo needs to run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DemoConfig {
    pub pool: PoolConfig,
    pub workload: WorkloadConfig,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            pool: PoolConfig::new(3, 1).with_timeout(Duration::from_secs(5)),
            workload: WorkloadConfig::default(),
        }
    }
}

/// Shape of the simulated traffic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkloadConfig {
    /// Concurrent `query_all` requests.
    pub requests: usize,
    /// How long each request keeps its connection.
    #[serde(with = "humantime_serde")]
    pub hold: Duration,
    /// Simulated connection setup latency.
    #[serde(with = "humantime_serde")]
    pub handshake: Duration,
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            requests: 6,
            hold: Duration::from_secs(10),
            handshake: Duration::from_millis(50),
        }
    }
}

/// Flag values; `None` leaves the lower layers in charge.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Overrides {
    pub pool: PoolOverrides,
    pub workload: WorkloadOverrides,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PoolOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_capacity: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_overflow: Option<usize>,
    #[serde(
        with = "humantime_serde::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub default_timeout: Option<Duration>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct WorkloadOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requests: Option<usize>,
    #[serde(
        with = "humantime_serde::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub hold: Option<Duration>,
    #[serde(
        with = "humantime_serde::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub handshake: Option<Duration>,
}

impl DemoConfig {
    /// Merge every layer and validate the result.
    ///
    /// An explicit `path` must exist; the implicit `queuepool.toml` is
    /// optional.
    pub fn load(path: Option<&Path>, overrides: &Overrides) -> Result<Self> {
        let file = match path {
            Some(path) => {
                if !path.exists() {
                    bail!("config file {} does not exist", path.display());
                }
                path.to_path_buf()
            }
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        let config: Self = Self::figment(&file, overrides)
            .extract()
            .with_context(|| format!("failed to load configuration (file: {})", file.display()))?;
        config.pool.validate().context("invalid pool configuration")?;
        Ok(config)
    }

    fn figment(file: &Path, overrides: &Overrides) -> Figment {
        Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file(file))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .merge(Serialized::defaults(overrides))
    }

    /// Render as TOML, in the same shape the loader reads.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("failed to render configuration")
    }
}
