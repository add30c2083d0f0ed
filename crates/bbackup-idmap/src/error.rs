//! Error types for inode map operations.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur during inode map operations.
///
/// Misuse errors (calling an operation in the wrong state) and backend
/// failures are separate variants so callers can decide which are
/// recoverable. "Not found" is never an error: [`lookup`] returns `None`.
///
/// [`lookup`]: crate::InodeToObjectMap::lookup
#[derive(Debug, Error)]
pub enum MapError {
    /// The map has not been opened.
    #[error("inode map not open")]
    NotOpen,

    /// `open` or `open_empty` was called on a map that is already open.
    #[error("inode map already open: {0}")]
    AlreadyOpen(String),

    /// The map was opened and closed; a new map must be constructed.
    #[error("inode map has been closed and cannot be reopened")]
    Retired,

    /// A mutation was attempted on a read-only or empty map.
    #[error("inode map is read-only")]
    ReadOnly,

    /// A map cannot be both created fresh and opened read-only.
    #[error("cannot open inode map read-only and create it new: {}", .0.display())]
    InvalidOpenMode(PathBuf),

    /// The storage backend reported an error other than "not found".
    #[error("{reason}: {}: {source}", .path.display())]
    Backend {
        reason: String,
        path: PathBuf,
        #[source]
        source: BackendError,
    },
}

impl MapError {
    /// Build a backend failure for `path`.
    pub fn backend(
        reason: impl Into<String>,
        path: impl Into<PathBuf>,
        source: impl Into<BackendError>,
    ) -> Self {
        Self::Backend {
            reason: reason.into(),
            path: path.into(),
            source: source.into(),
        }
    }

    /// Returns `true` for failures reported by the storage backend.
    pub fn is_backend_failure(&self) -> bool {
        matches!(self, Self::Backend { .. })
    }

    /// Returns `true` for errors caused by calling an operation in the wrong
    /// state. These are programming errors and are never retried.
    pub fn is_misuse(&self) -> bool {
        !self.is_backend_failure()
    }
}

/// The underlying cause of a [`MapError::Backend`].
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Message(String),
}

impl From<String> for BackendError {
    fn from(message: String) -> Self {
        Self::Message(message)
    }
}

impl From<&str> for BackendError {
    fn from(message: &str) -> Self {
        Self::Message(message.to_string())
    }
}

/// Convenience alias for inode map results.
pub type MapResult<T> = Result<T, MapError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_message_names_path_and_cause() {
        let err = MapError::backend(
            "failed to open inode database",
            "/var/bbackupd/mnt_home",
            "disk on fire",
        );
        assert_eq!(
            err.to_string(),
            "failed to open inode database: /var/bbackupd/mnt_home: disk on fire"
        );
        assert!(err.is_backend_failure());
        assert!(!err.is_misuse());
    }

    #[test]
    fn misuse_errors_are_classified() {
        for err in [
            MapError::NotOpen,
            MapError::ReadOnly,
            MapError::Retired,
            MapError::AlreadyOpen("x".into()),
            MapError::InvalidOpenMode("x".into()),
        ] {
            assert!(err.is_misuse(), "{err} should be misuse");
        }
    }
}
