//! Backend strategy traits for the inode map.
//!
//! A [`MapStorage`] is the strategy chosen when a map is constructed: it
//! knows how to open a named map and how to manage map files as a whole. An
//! open map is a [`MapHandle`], owned exclusively by one
//! [`InodeToObjectMap`](crate::InodeToObjectMap) until it is closed.

use std::fmt;
use std::path::Path;

use bbackup_types::{InodeRef, MapEntry};

use crate::error::MapResult;

/// How a map should be opened.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OpenMode {
    /// Open an existing map for lookups only.
    ReadOnly,
    /// Open an existing map for lookups and writes.
    ReadWrite,
    /// Create a fresh, empty, writable map, discarding any previous one.
    CreateNew,
}

impl OpenMode {
    /// Translate the `(read_only, create_new)` flag pair.
    ///
    /// Returns `None` for `(true, true)`: a map cannot be created fresh and
    /// refuse writes at the same time.
    pub fn from_flags(read_only: bool, create_new: bool) -> Option<Self> {
        match (read_only, create_new) {
            (true, true) => None,
            (true, false) => Some(Self::ReadOnly),
            (false, false) => Some(Self::ReadWrite),
            (false, true) => Some(Self::CreateNew),
        }
    }

    pub fn is_read_only(self) -> bool {
        self == Self::ReadOnly
    }
}

/// A backing store strategy for inode maps.
///
/// Implementations must behave identically for every operation except that
/// only a persistent strategy can fail with I/O errors:
/// - opening a missing map without [`OpenMode::CreateNew`] is a backend failure;
/// - [`OpenMode::CreateNew`] always yields an empty map;
/// - entries written through a handle are visible to other handles on the
///   same path only once that handle has been closed;
/// - a writable handle dropped without `close` discards its writes.
pub trait MapStorage: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &'static str;

    /// Open (or create) the map at `path`.
    fn open(&self, path: &Path, mode: OpenMode) -> MapResult<Box<dyn MapHandle>>;

    /// Whether a map exists at `path`.
    fn exists(&self, path: &Path) -> MapResult<bool>;

    /// Remove the map at `path`. Removing a missing map is not an error.
    fn remove(&self, path: &Path) -> MapResult<()>;

    /// Move the map at `from` to `to`, replacing any map already at `to`.
    fn rename(&self, from: &Path, to: &Path) -> MapResult<()>;
}

/// An open backend handle.
///
/// Lookups of keys that were never written return `Ok(None)`; `Err` is
/// reserved for backend failures.
pub trait MapHandle: Send + fmt::Debug {
    /// Insert or overwrite the entry for `inode`.
    fn put(&mut self, inode: InodeRef, entry: &MapEntry) -> MapResult<()>;

    /// Fetch the entry for `inode`, if any.
    fn get(&self, inode: InodeRef) -> MapResult<Option<MapEntry>>;

    /// Number of entries in the map.
    fn entry_count(&self) -> MapResult<u64>;

    /// Flush and release the handle.
    fn close(self: Box<Self>) -> MapResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_mode_from_flags() {
        assert_eq!(OpenMode::from_flags(true, false), Some(OpenMode::ReadOnly));
        assert_eq!(OpenMode::from_flags(false, false), Some(OpenMode::ReadWrite));
        assert_eq!(OpenMode::from_flags(false, true), Some(OpenMode::CreateNew));
        assert_eq!(OpenMode::from_flags(true, true), None);
    }

    #[test]
    fn only_read_only_mode_is_read_only() {
        assert!(OpenMode::ReadOnly.is_read_only());
        assert!(!OpenMode::ReadWrite.is_read_only());
        assert!(!OpenMode::CreateNew.is_read_only());
    }
}
