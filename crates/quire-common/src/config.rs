//! File-backed configuration for editor hosts.

use std::collections::BTreeMap;
use std::future::Future;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::QuireError;
use crate::transport::ReconnectPolicy;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Collaboration server settings.
    pub realtime: RealtimeSettings,
    /// Offline cache settings.
    pub cache: CacheSettings,
    /// Defaults for editor sessions created by the host.
    pub editor: EditorSettings,
}

/// Where and how to reach the collaboration server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RealtimeSettings {
    /// Websocket endpoint, e.g. `wss://live.example.com/collaboration`.
    pub endpoint: String,
    /// Extra query parameters appended to the endpoint on connect.
    pub query: BTreeMap<String, String>,
    /// Backoff used for transient disconnects.
    pub reconnect: ReconnectPolicy,
}

impl Default for RealtimeSettings {
    fn default() -> Self {
        Self {
            endpoint: "ws://localhost:3100/collaboration".to_owned(),
            query: BTreeMap::new(),
            reconnect: ReconnectPolicy::default(),
        }
    }
}

impl RealtimeSettings {
    /// Parse the endpoint string.
    pub fn endpoint_url(&self) -> Result<url::Url, QuireError> {
        Ok(url::Url::parse(&self.endpoint)?)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub enabled: bool,
    /// Root directory for cached documents. `None` keeps the cache in memory.
    pub root: Option<PathBuf>,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            root: None,
        }
    }
}

/// Serializable subset of the editor construction options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EditorSettings {
    pub editable: bool,
    pub placeholder: Option<String>,
    pub tab_index: Option<i32>,
    pub disabled_extensions: Vec<String>,
    pub flagged_extensions: Vec<String>,
}

impl Default for EditorSettings {
    fn default() -> Self {
        Self {
            editable: true,
            placeholder: None,
            tab_index: None,
            disabled_extensions: Vec::new(),
            flagged_extensions: Vec::new(),
        }
    }
}

impl Config {
    /// Loads the configuration from the provided loader.
    pub async fn load(loader: &impl Loader) -> Result<Self, QuireError> {
        loader.load().await
    }

    /// Saves the configuration using the provided saver.
    pub async fn save(&self, saver: &impl Saver) -> Result<(), QuireError> {
        saver.save(self).await
    }
}

/// The trait for loading configuration data.
pub trait Loader {
    fn load(&self) -> impl Future<Output = Result<Config, QuireError>> + Send;
}

/// The trait for saving configuration data.
pub trait Saver {
    fn save(&self, config: &Config) -> impl Future<Output = Result<(), QuireError>> + Send;
}

/// An implementation of [`Loader`] and [`Saver`] that reads and writes a configuration file.
///
/// The format is picked from the file extension: `.json` or `.toml`.
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    fn extension(&self) -> Option<&str> {
        self.path.extension().and_then(|ext| ext.to_str())
    }
}

impl Loader for FileStore {
    async fn load(&self) -> Result<Config, QuireError> {
        match self.extension() {
            Some("json") => Ok(serde_json::from_str(&std::fs::read_to_string(&self.path)?)?),
            Some("toml") => Ok(toml::from_str(&std::fs::read_to_string(&self.path)?)?),
            other => Err(QuireError::UnsupportedFormat(
                other.unwrap_or_default().to_owned(),
            )),
        }
    }
}

impl Saver for FileStore {
    async fn save(&self, config: &Config) -> Result<(), QuireError> {
        match self.extension() {
            Some("json") => Ok(std::fs::write(
                &self.path,
                serde_json::to_string_pretty(config)?,
            )?),
            Some("toml") => Ok(std::fs::write(&self.path, toml::to_string_pretty(config)?)?),
            other => Err(QuireError::UnsupportedFormat(
                other.unwrap_or_default().to_owned(),
            )),
        }
    }
}
