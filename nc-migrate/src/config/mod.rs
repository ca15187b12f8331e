//! Settings file and connection profiles
//!
//! Settings live in `<config dir>/nc-migrate/config.toml`. A missing file
//! yields defaults, and every section may be omitted.

pub mod profile;

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::api::{ClientOptions, ResilienceConfig};
use crate::export::ExportFormat;
use crate::transfer::{DuplicatePolicy, EngineOptions};

pub use profile::{ConfigError, Connection, Profile};

const APP_DIR: &str = "nc-migrate";
const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_profile: Option<String>,
    pub api: ApiSettings,
    pub migration: MigrationSettings,
    pub export: ExportSettings,
    pub profiles: BTreeMap<String, Profile>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiSettings {
    pub page_size: u32,
    pub timeout_secs: u64,
    pub retry: RetrySettings,
    pub concurrency: ConcurrencySettings,
}

impl Default for ApiSettings {
    fn default() -> Self {
        ApiSettings {
            page_size: 100,
            timeout_secs: 60,
            retry: RetrySettings::default(),
            concurrency: ConcurrencySettings::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub jitter: bool,
}

impl Default for RetrySettings {
    fn default() -> Self {
        RetrySettings {
            max_attempts: 3,
            base_delay_ms: 500,
            max_delay_ms: 30_000,
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConcurrencySettings {
    pub enabled: bool,
    pub max_concurrent_requests: usize,
}

impl Default for ConcurrencySettings {
    fn default() -> Self {
        ConcurrencySettings {
            enabled: true,
            max_concurrent_requests: 5,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrationSettings {
    pub duplicate_policy: DuplicatePolicy,
    /// CSV of `permissionName,permissionId` used to rebuild role permissions
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permission_map: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportSettings {
    pub output_dir: PathBuf,
    pub formats: Vec<ExportFormat>,
}

impl Default for ExportSettings {
    fn default() -> Self {
        ExportSettings {
            output_dir: PathBuf::from("./nc_export"),
            formats: vec![ExportFormat::Csv],
        }
    }
}

impl Config {
    /// `<config dir>/nc-migrate/config.toml`
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        dirs::config_dir()
            .map(|dir| dir.join(APP_DIR).join(CONFIG_FILE))
            .ok_or(ConfigError::NoConfigDir)
    }

    /// Load from `path`, or defaults when the file does not exist
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            debug!("No settings file at {}, using defaults", path.display());
            return Ok(Config::default());
        }

        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config: Config = toml::from_str(&text).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;

        for (name, profile) in &config.profiles {
            profile.validate(name)?;
        }
        debug!(
            "Loaded settings from {} ({} profiles)",
            path.display(),
            config.profiles.len()
        );
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let io_err = |source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        let text = toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))?;
        fs::write(path, text).map_err(io_err)?;
        debug!("Saved settings to {}", path.display());
        Ok(())
    }

    pub fn profile(&self, name: &str) -> Result<&Profile, ConfigError> {
        self.profiles
            .get(name)
            .ok_or_else(|| ConfigError::UnknownProfile(name.to_string()))
    }

    /// The profile named on the command line, falling back to the active one
    pub fn resolve_profile<'a>(
        &'a self,
        requested: Option<&'a str>,
    ) -> Result<(&'a str, &'a Profile), ConfigError> {
        let name = requested
            .or(self.active_profile.as_deref())
            .ok_or(ConfigError::NoActiveProfile)?;
        Ok((name, self.profile(name)?))
    }

    /// Add or replace a profile
    pub fn set_profile(&mut self, name: &str, profile: Profile) -> Result<(), ConfigError> {
        profile.validate(name)?;
        self.profiles.insert(name.to_string(), profile);
        if self.active_profile.is_none() {
            self.active_profile = Some(name.to_string());
        }
        Ok(())
    }

    pub fn remove_profile(&mut self, name: &str) -> Result<Profile, ConfigError> {
        let removed = self
            .profiles
            .remove(name)
            .ok_or_else(|| ConfigError::UnknownProfile(name.to_string()))?;
        if self.active_profile.as_deref() == Some(name) {
            self.active_profile = None;
        }
        Ok(removed)
    }

    pub fn use_profile(&mut self, name: &str) -> Result<(), ConfigError> {
        self.profile(name)?;
        self.active_profile = Some(name.to_string());
        Ok(())
    }

    pub fn client_options(&self) -> ClientOptions {
        let retry = &self.api.retry;
        let concurrency = &self.api.concurrency;
        let resilience = ResilienceConfig::builder()
            .max_attempts(retry.max_attempts.max(1))
            .base_delay(Duration::from_millis(retry.base_delay_ms))
            .max_delay(Duration::from_millis(retry.max_delay_ms))
            .backoff_multiplier(retry.backoff_multiplier)
            .jitter(retry.jitter)
            .max_concurrent_requests(concurrency.max_concurrent_requests.max(1))
            .enable_concurrency_limiting(concurrency.enabled)
            .build();

        ClientOptions {
            timeout: Duration::from_secs(self.api.timeout_secs.max(1)),
            page_size: self.api.page_size,
            resilience,
        }
    }

    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            duplicate_policy: self.migration.duplicate_policy,
        }
    }

    pub fn export_formats(&self) -> BTreeSet<ExportFormat> {
        self.export.formats.iter().copied().collect()
    }
}
