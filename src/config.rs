use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use crate::error::TaxrefError;

pub const DEFAULT_CONFIG_FILE: &str = "taxref.json";
pub const LOCAL_CACHE_ENV: &str = "TAXREF_LOCAL_CACHE";

/// On-disk shape of `taxref.json`. Every field is optional.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub ftp_host: Option<String>,
    #[serde(default)]
    pub ftp_root: Option<String>,
    #[serde(default)]
    pub https_root: Option<String>,
    #[serde(default)]
    pub data_version: Option<String>,
    #[serde(default)]
    pub taxonomy_url: Option<String>,
    #[serde(default)]
    pub local_cache: Option<String>,
    #[serde(default)]
    pub http_timeout_secs: Option<u64>,
    #[serde(default)]
    pub retry: Option<RetryEntry>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct RetryEntry {
    #[serde(default)]
    pub max_attempts: Option<u32>,
    #[serde(default)]
    pub delay_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositorySettings {
    pub ftp_host: String,
    pub ftp_root: String,
    pub https_root: String,
    pub data_version: String,
}

impl RepositorySettings {
    pub fn manifest_name(&self) -> String {
        format!("{}.mft", self.data_version)
    }

    pub fn manifest_url(&self) -> String {
        format!("{}/{}", self.https_root, self.manifest_name())
    }

    pub fn url_for(&self, logical: &str) -> String {
        format!("{}/{logical}", self.https_root)
    }

    pub fn ftp_path_for(&self, logical: &str) -> String {
        format!("{}/{logical}", self.ftp_root)
    }
}

impl Default for RepositorySettings {
    fn default() -> Self {
        Self {
            ftp_host: "ftp.ncbi.nlm.nih.gov".to_string(),
            ftp_root: "genomes/TOOLS/EGAP/support_data".to_string(),
            https_root: "https://ftp.ncbi.nlm.nih.gov/genomes/TOOLS/EGAP/support_data".to_string(),
            data_version: "current".to_string(),
        }
    }
}

/// Reconnect-and-retry policy for transient transfer failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            delay: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub repository: RepositorySettings,
    pub taxonomy_url: String,
    pub local_cache: Option<Utf8PathBuf>,
    pub http_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            repository: RepositorySettings::default(),
            taxonomy_url: "https://api.ncbi.nlm.nih.gov/datasets/v2alpha/taxonomy/taxon"
                .to_string(),
            local_cache: None,
            http_timeout: Duration::from_secs(60),
            retry: RetryPolicy::default(),
        }
    }
}

pub struct SettingsLoader;

impl SettingsLoader {
    /// Loads settings from `path`, or from `taxref.json` in the current
    /// directory when it exists, then applies the environment.
    pub fn resolve(path: Option<&str>) -> Result<Settings, TaxrefError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        let config = if path.is_none() && !config_path.exists() {
            Config::default()
        } else {
            let content = fs::read_to_string(&config_path)
                .map_err(|_| TaxrefError::ConfigRead(config_path.clone()))?;
            serde_json::from_str(&content)
                .map_err(|err| TaxrefError::ConfigParse(err.to_string()))?
        };

        let mut settings = Self::resolve_config(config);
        if let Ok(cache) = std::env::var(LOCAL_CACHE_ENV) {
            if !cache.trim().is_empty() {
                settings.local_cache = Some(Utf8PathBuf::from(cache.trim()));
            }
        }
        Ok(settings)
    }

    pub fn resolve_config(config: Config) -> Settings {
        let defaults = Settings::default();
        let repository = RepositorySettings {
            ftp_host: config.ftp_host.unwrap_or(defaults.repository.ftp_host),
            ftp_root: trim_slashes(config.ftp_root.unwrap_or(defaults.repository.ftp_root)),
            https_root: config
                .https_root
                .map(|root| root.trim_end_matches('/').to_string())
                .unwrap_or(defaults.repository.https_root),
            data_version: config
                .data_version
                .unwrap_or(defaults.repository.data_version),
        };
        let retry = match config.retry {
            Some(entry) => RetryPolicy {
                max_attempts: entry
                    .max_attempts
                    .unwrap_or(defaults.retry.max_attempts)
                    .max(1),
                delay: entry
                    .delay_ms
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.retry.delay),
            },
            None => defaults.retry,
        };

        Settings {
            repository,
            taxonomy_url: config
                .taxonomy_url
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or(defaults.taxonomy_url),
            local_cache: config
                .local_cache
                .filter(|value| !value.trim().is_empty())
                .map(Utf8PathBuf::from),
            http_timeout: config
                .http_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.http_timeout),
            retry,
        }
    }
}

fn trim_slashes(value: String) -> String {
    value.trim_matches('/').to_string()
}
