//! CLI configuration handling.
//!
//! Values come from an optional TOML file and are overridden by command-line
//! flags.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use samlgate_core::{DEFAULT_CALLBACK_PORT, DEFAULT_TIMEOUT};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Base URL of the application that accepts the SAML assertion.
    pub app_url: Option<String>,

    pub metadata_url: Option<String>,

    pub metadata_file: Option<PathBuf>,

    /// Service provider entity ID sent as the request issuer.
    pub service_provider_issuer: Option<String>,

    pub callback_port: u16,

    pub timeout_secs: u64,

    /// Browser command overriding OS detection, e.g. `["firefox", "--private-window"]`.
    pub browser: Vec<String>,

    pub use_cache: bool,

    /// Logging level used when `RUST_LOG` is unset.
    pub log_level: String,

    /// Path to the configuration file that was loaded.
    #[serde(skip)]
    pub config_path: Option<PathBuf>,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            app_url: None,
            metadata_url: None,
            metadata_file: None,
            service_provider_issuer: None,
            callback_port: DEFAULT_CALLBACK_PORT,
            timeout_secs: DEFAULT_TIMEOUT.as_secs(),
            browser: Vec::new(),
            use_cache: true,
            log_level: "warn".to_string(),
            config_path: None,
        }
    }
}

/// Load configuration from `path`, or from the default location if it exists.
///
/// An explicit path that cannot be read is an error; a missing default file
/// yields defaults.
pub fn load_config(path: Option<&Path>) -> Result<CliConfig> {
    let (config_path, required) = match path {
        Some(p) => (Some(p.to_path_buf()), true),
        None => (default_config_path(), false),
    };

    let Some(config_path) = config_path else {
        return Ok(CliConfig::default());
    };

    if !required && !config_path.exists() {
        return Ok(CliConfig::default());
    }

    let contents = std::fs::read_to_string(&config_path)
        .with_context(|| format!("Failed to read config from {:?}", config_path))?;
    let mut config: CliConfig = toml::from_str(&contents)
        .with_context(|| format!("Failed to parse config from {:?}", config_path))?;

    config.config_path = Some(config_path);
    Ok(config)
}

pub fn default_config_path() -> Option<PathBuf> {
    project_dirs().map(|d| d.config_dir().join("config.toml"))
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("com", "samlgate", "samlgate")
}

/// Where to get identity provider metadata from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetadataSource {
    Url(String),
    File(PathBuf),
}

/// Command-line values for `login`; `None` defers to the file.
#[derive(Debug, Clone, Default)]
pub struct LoginOverrides {
    pub app_url: Option<String>,
    pub metadata_url: Option<String>,
    pub metadata_file: Option<PathBuf>,
    pub issuer: Option<String>,
    pub port: Option<u16>,
    pub timeout_secs: Option<u64>,
    pub no_cache: bool,
}

/// Fully resolved settings for one login.
#[derive(Debug, Clone)]
pub struct LoginSettings {
    pub app_url: String,
    pub metadata: MetadataSource,
    pub issuer: String,
    pub callback_port: u16,
    pub timeout: Duration,
    pub browser: Vec<String>,
    pub use_cache: bool,
}

impl CliConfig {
    /// Merge command-line overrides over the file values.
    pub fn resolve_login(&self, overrides: LoginOverrides) -> Result<LoginSettings> {
        let app_url = overrides
            .app_url
            .or_else(|| self.app_url.clone())
            .filter(|u| !u.is_empty())
            .context("No application URL configured; pass --app-url or set app_url")?;

        let metadata = match (overrides.metadata_file, overrides.metadata_url) {
            (Some(file), _) => MetadataSource::File(file),
            (None, Some(url)) => MetadataSource::Url(url),
            (None, None) => match (&self.metadata_file, &self.metadata_url) {
                (Some(file), _) => MetadataSource::File(file.clone()),
                (None, Some(url)) => MetadataSource::Url(url.clone()),
                (None, None) => bail!(
                    "No SAML metadata configured; pass --metadata-url or --metadata-file, \
                     or set metadata_url or metadata_file"
                ),
            },
        };

        let issuer = overrides
            .issuer
            .or_else(|| self.service_provider_issuer.clone())
            .filter(|i| !i.is_empty())
            .context("No service provider issuer configured; pass --issuer or set service_provider_issuer")?;

        Ok(LoginSettings {
            app_url,
            metadata,
            issuer,
            callback_port: overrides.port.unwrap_or(self.callback_port),
            timeout: Duration::from_secs(overrides.timeout_secs.unwrap_or(self.timeout_secs)),
            browser: self.browser.clone(),
            use_cache: self.use_cache && !overrides.no_cache,
        })
    }

    /// Application URL for commands that only need that.
    pub fn resolve_app_url(&self, app_url: Option<String>) -> Result<String> {
        app_url
            .or_else(|| self.app_url.clone())
            .filter(|u| !u.is_empty())
            .context("No application URL configured; pass --app-url or set app_url")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CliConfig::default();
        assert_eq!(config.callback_port, 8400);
        assert_eq!(config.timeout_secs, 300);
        assert!(config.use_cache);
        assert_eq!(config.log_level, "warn");
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config: CliConfig = toml::from_str(r#"app_url = "https://app.example""#).unwrap();
        assert_eq!(config.app_url.as_deref(), Some("https://app.example"));
        assert_eq!(config.callback_port, 8400);
        assert!(config.use_cache);
    }
}
