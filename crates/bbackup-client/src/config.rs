//! Client configuration.
//!
//! Loaded from TOML:
//!
//! ```toml
//! data_directory = "/var/bbackupd"
//! file_tracking_size_threshold = 65536
//! map_backend = "persistent"
//!
//! [[locations]]
//! name = "home"
//! path = "/home"
//! ```

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bbackup_idmap::{MapStorage, MemoryStorage, SqliteStorage};
use serde::{Deserialize, Serialize};

use crate::error::{ClientError, ClientResult};

/// Which inode map backend to use.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MapBackendKind {
    /// One SQLite file per location, kept in the data directory.
    #[default]
    Persistent,
    /// Process-local tables; nothing survives a restart.
    Memory,
}

/// A directory tree to back up.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationConfig {
    /// Name of the location's directory on the store.
    pub name: String,
    /// Local root of the location.
    pub path: PathBuf,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Where the client keeps its state, including the inode maps.
    pub data_directory: PathBuf,
    /// Files smaller than this many bytes are not tracked in the inode map.
    pub file_tracking_size_threshold: u64,
    pub map_backend: MapBackendKind,
    pub locations: Vec<LocationConfig>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            data_directory: PathBuf::from("/var/bbackupd"),
            file_tracking_size_threshold: Self::DEFAULT_FILE_TRACKING_SIZE_THRESHOLD,
            map_backend: MapBackendKind::Persistent,
            locations: Vec::new(),
        }
    }
}

impl ClientConfig {
    pub const DEFAULT_FILE_TRACKING_SIZE_THRESHOLD: u64 = 64 * 1024;

    /// Parse and validate a TOML configuration.
    pub fn from_toml_str(s: &str) -> ClientResult<Self> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a configuration file.
    pub fn load(path: impl AsRef<Path>) -> ClientResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> ClientResult<()> {
        if self.locations.is_empty() {
            return Err(ClientError::Config("no backup locations configured".into()));
        }
        let mut names = HashSet::new();
        let mut paths = HashSet::new();
        for location in &self.locations {
            if location.name.is_empty() {
                return Err(ClientError::Config("location with empty name".into()));
            }
            if location.path.as_os_str().is_empty() {
                return Err(ClientError::Config(format!(
                    "location {} has an empty path",
                    location.name
                )));
            }
            if !names.insert(location.name.as_str()) {
                return Err(ClientError::Config(format!(
                    "duplicate location name: {}",
                    location.name
                )));
            }
            if !paths.insert(location.path.as_path()) {
                return Err(ClientError::Config(format!(
                    "duplicate location path: {}",
                    location.path.display()
                )));
            }
        }
        Ok(())
    }

    /// Find a location by name.
    pub fn location(&self, name: &str) -> Option<&LocationConfig> {
        self.locations.iter().find(|l| l.name == name)
    }

    /// Construct the configured inode map backend.
    pub fn map_storage(&self) -> Arc<dyn MapStorage> {
        match self.map_backend {
            MapBackendKind::Persistent => Arc::new(SqliteStorage::new()),
            MapBackendKind::Memory => Arc::new(MemoryStorage::new()),
        }
    }
}
