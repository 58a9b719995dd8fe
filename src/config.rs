//! Client configuration
//!
//! Layered the usual way: built-in defaults, then an optional TOML file,
//! then `KVBRIDGE_*` environment variables (`KVBRIDGE_HOST`,
//! `KVBRIDGE_ASYNC_LIMIT`, `KVBRIDGE_TIMER_POLICY`, ...).

use crate::connection::{DEFAULT_ADMISSION_LIMIT, MAX_ADMISSION_LIMIT, MIN_ADMISSION_LIMIT};
use crate::error::{Error, Result};
use crate::transport::ConnectParams;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

pub const ENV_PREFIX: &str = "KVBRIDGE";

/// What happens to a deadline whose operation resolved first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimerPolicy {
    /// Leave the timer armed; it releases its ticket when it fires
    #[default]
    Lazy,
    /// Cancel the timer as soon as the operation resolves
    Eager,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub host: String,
    pub user: String,
    pub password: String,
    pub bucket: String,
    /// Deadline applied by [`crate::Client`] when a call gives none; 0 disables
    pub default_timeout_ms: u64,
    pub async_limit: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_slabs: Option<usize>,
    pub timer_policy: TimerPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            user: String::new(),
            password: String::new(),
            bucket: "default".to_string(),
            default_timeout_ms: 0,
            async_limit: DEFAULT_ADMISSION_LIMIT,
            max_slabs: None,
            timer_policy: TimerPolicy::Lazy,
        }
    }
}

impl ClientConfig {
    /// Load from `path` (if given) and the `KVBRIDGE_*` environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with_prefix(path, ENV_PREFIX)
    }

    pub fn load_with_prefix(path: Option<&Path>, env_prefix: &str) -> Result<Self> {
        let defaults = config::Config::try_from(&ClientConfig::default()).map_err(config_error)?;
        let mut builder = config::Config::builder().add_source(defaults);
        if let Some(path) = path {
            debug!(path = %path.display(), "Loading configuration file");
            builder = builder.add_source(
                config::File::from(path)
                    .format(config::FileFormat::Toml)
                    .required(true),
            );
        }
        let settings = builder
            .add_source(config::Environment::with_prefix(env_prefix).try_parsing(true))
            .build()
            .map_err(config_error)?;

        let loaded: ClientConfig = settings.try_deserialize().map_err(config_error)?;
        loaded.validate()?;
        Ok(loaded)
    }

    pub fn validate(&self) -> Result<()> {
        if !(MIN_ADMISSION_LIMIT..=MAX_ADMISSION_LIMIT).contains(&self.async_limit) {
            return Err(Error::Config(format!(
                "async_limit must be within {}..={}, got {}",
                MIN_ADMISSION_LIMIT, MAX_ADMISSION_LIMIT, self.async_limit
            )));
        }
        if self.max_slabs == Some(0) {
            return Err(Error::Config("max_slabs must be at least 1".to_string()));
        }
        Ok(())
    }

    pub fn connect_params(&self) -> ConnectParams {
        ConnectParams::new(&self.host, &self.user, &self.password, &self.bucket)
    }

    pub fn default_timeout(&self) -> Option<Duration> {
        (self.default_timeout_ms > 0).then(|| Duration::from_millis(self.default_timeout_ms))
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::Config(format!("failed to render config: {e}")))
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)
                .map_err(|e| Error::Config(format!("failed to create {}: {e}", dir.display())))?;
        }
        fs::write(path, self.to_toml()?)
            .map_err(|e| Error::Config(format!("failed to write {}: {e}", path.display())))
    }
}

fn config_error(e: config::ConfigError) -> Error {
    Error::Config(e.to_string())
}
