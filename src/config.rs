use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

const MIN_API_KEY_LEN: usize = 10;

/// Optional `KEY=value` file in the working directory, read before the
/// command line so `REDMINE_URL` / `REDMINE_API_KEY` can live there.
pub const ENV_FILE: &str = ".env";

#[derive(Debug, Deserialize, Default)]
pub struct FileConfig {
    pub redmine: Option<RedmineSection>,
}

#[derive(Debug, Deserialize, Default)]
pub struct RedmineSection {
    pub url: Option<String>,
    pub api_key: Option<String>,
}

/// Validated connection settings handed to the sync pipeline.
#[derive(Clone, PartialEq, Eq)]
pub struct RedmineConfig {
    pub url: String,
    pub api_key: String,
}

impl fmt::Debug for RedmineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedmineConfig")
            .field("url", &self.url)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("REDMINE_URL is not set (use --url, the environment or the config file)")]
    MissingUrl,
    #[error("REDMINE_API_KEY is not set (use --api-key, the environment or the config file)")]
    MissingApiKey,
    #[error("invalid REDMINE_URL {0:?}: must start with http:// or https://")]
    InvalidUrl(String),
    #[error("REDMINE_API_KEY seems too short, please check it")]
    ApiKeyTooShort,
    #[error("failed to read config from {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("failed to load {}: {source}", .path.display())]
    EnvFile {
        path: PathBuf,
        #[source]
        source: dotenvy::Error,
    },
}

pub fn config_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".redmine-fetch")
        .join("config.toml")
}

/// Exports the variables of an env file into the process environment.
/// Variables that are already set keep their value; a missing file is fine.
pub fn load_env_file(path: &Path) -> Result<(), ConfigError> {
    match dotenvy::from_path(path) {
        Ok(()) => Ok(()),
        Err(e) if e.not_found() => Ok(()),
        Err(source) => Err(ConfigError::EnvFile {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// A missing file is not an error; the values may come from elsewhere.
pub fn load_file_config(path: &Path) -> Result<FileConfig, ConfigError> {
    if !path.exists() {
        return Ok(FileConfig::default());
    }
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Explicit values (flags or environment) win over the config file.
pub fn resolve(
    url: Option<String>,
    api_key: Option<String>,
    file: FileConfig,
) -> Result<RedmineConfig, ConfigError> {
    let section = file.redmine.unwrap_or_default();
    let url = non_blank(url)
        .or_else(|| non_blank(section.url))
        .ok_or(ConfigError::MissingUrl)?;
    let api_key = non_blank(api_key)
        .or_else(|| non_blank(section.api_key))
        .ok_or(ConfigError::MissingApiKey)?;

    let config = RedmineConfig {
        url: url.trim().to_string(),
        api_key: api_key.trim().to_string(),
    };
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &RedmineConfig) -> Result<(), ConfigError> {
    if config.url.trim().is_empty() {
        return Err(ConfigError::MissingUrl);
    }
    if !(config.url.starts_with("http://") || config.url.starts_with("https://")) {
        return Err(ConfigError::InvalidUrl(config.url.clone()));
    }
    if config.api_key.trim().is_empty() {
        return Err(ConfigError::MissingApiKey);
    }
    if config.api_key.trim().len() < MIN_API_KEY_LEN {
        return Err(ConfigError::ApiKeyTooShort);
    }
    Ok(())
}

pub fn load_config(
    url: Option<String>,
    api_key: Option<String>,
    path: Option<&Path>,
) -> Result<RedmineConfig, ConfigError> {
    let path = path.map(Path::to_path_buf).unwrap_or_else(config_path);
    let file = load_file_config(&path)?;
    resolve(url, api_key, file)
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}
