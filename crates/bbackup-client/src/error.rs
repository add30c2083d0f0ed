//! Error types for the backup client.

use bbackup_idmap::MapError;

/// Errors that can occur while configuring or running a backup.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// An inode map operation failed.
    #[error("inode map error: {0}")]
    Map(#[from] MapError),

    /// The configuration is structurally valid TOML but not usable.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The configuration file could not be parsed.
    #[error("failed to parse configuration: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// The store rejected a request.
    #[error("store error: {0}")]
    Store(String),

    /// I/O error reading local files.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The run was asked to stop.
    #[error("backup run cancelled")]
    Cancelled,
}

impl ClientError {
    /// Returns `true` if an inode map backend reported the failure. The
    /// location's maps should be deleted so the next run starts clean.
    pub fn is_map_backend_failure(&self) -> bool {
        matches!(self, Self::Map(e) if e.is_backend_failure())
    }
}

/// Convenience alias for client results.
pub type ClientResult<T> = Result<T, ClientError>;
