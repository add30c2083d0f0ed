//! The inode to store object map.
//!
//! [`InodeToObjectMap`] enforces the map's lifecycle and error rules on top
//! of whichever [`MapStorage`] it was constructed with, so every strategy
//! reports misuse the same way:
//!
//! ```text
//! Closed --open / open_empty--> Open | Empty --close--> Retired
//! ```
//!
//! There is no way back from `Retired`; construct a new map instead.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bbackup_types::{InodeRef, MapEntry, ObjectId};
use tracing::{trace, warn};

use crate::error::{MapError, MapResult};
use crate::memory::MemoryStorage;
use crate::persistent::SqliteStorage;
use crate::traits::{MapHandle, MapStorage, OpenMode};

enum MapState {
    Closed,
    /// Opened with `open_empty`: read-only, every lookup misses, no backend.
    Empty,
    Open {
        path: PathBuf,
        read_only: bool,
        handle: Box<dyn MapHandle>,
    },
    Retired,
}

/// Map of local inode numbers to the store objects they were uploaded as.
///
/// One map is owned by one scan for the duration of one backup location's
/// run. It is not meant to be shared between threads.
pub struct InodeToObjectMap {
    storage: Arc<dyn MapStorage>,
    state: MapState,
}

impl InodeToObjectMap {
    /// Create a closed map that will use `storage` when opened.
    pub fn new(storage: Arc<dyn MapStorage>) -> Self {
        Self {
            storage,
            state: MapState::Closed,
        }
    }

    /// Create a closed map backed by SQLite files.
    pub fn persistent() -> Self {
        Self::new(Arc::new(SqliteStorage::new()))
    }

    /// Create a closed map backed by a private in-memory storage.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStorage::new()))
    }

    /// Open the map stored at `path`.
    ///
    /// `create_new` discards any existing map at `path` and starts an empty,
    /// writable one. Asking for a map that is both read-only and newly
    /// created is rejected. On failure the map stays closed.
    pub fn open(
        &mut self,
        path: impl AsRef<Path>,
        read_only: bool,
        create_new: bool,
    ) -> MapResult<()> {
        let path = path.as_ref();
        self.ensure_closed()?;
        let mode = OpenMode::from_flags(read_only, create_new)
            .ok_or_else(|| MapError::InvalidOpenMode(path.to_path_buf()))?;

        let handle = self.storage.open(path, mode)?;
        trace!(
            path = %path.display(),
            backend = self.storage.name(),
            ?mode,
            "inode map opened"
        );
        self.state = MapState::Open {
            path: path.to_path_buf(),
            read_only,
            handle,
        };
        Ok(())
    }

    /// Open the map with no backing store: read-only, and every lookup
    /// reports "not found". Used when there is no previous run to compare
    /// against.
    pub fn open_empty(&mut self) -> MapResult<()> {
        self.ensure_closed()?;
        self.state = MapState::Empty;
        Ok(())
    }

    /// Record that `inode` was backed up as `object_id` inside the store
    /// directory `parent_directory_id`, replacing any earlier entry.
    pub fn add_to_map(
        &mut self,
        inode: InodeRef,
        object_id: ObjectId,
        parent_directory_id: ObjectId,
    ) -> MapResult<()> {
        match &mut self.state {
            MapState::Closed | MapState::Retired => Err(MapError::NotOpen),
            MapState::Empty => Err(MapError::ReadOnly),
            MapState::Open {
                read_only: true, ..
            } => Err(MapError::ReadOnly),
            MapState::Open { handle, .. } => {
                handle.put(inode, &MapEntry::new(object_id, parent_directory_id))
            }
        }
    }

    /// Look up `inode`. `Ok(None)` means the inode is not in the map.
    pub fn lookup(&self, inode: InodeRef) -> MapResult<Option<MapEntry>> {
        match &self.state {
            MapState::Closed | MapState::Retired => Err(MapError::NotOpen),
            MapState::Empty => Ok(None),
            MapState::Open { handle, .. } => handle.get(inode),
        }
    }

    /// Release the backend handle. Closing a map that is not open is an
    /// error, including closing it twice.
    pub fn close(&mut self) -> MapResult<()> {
        match std::mem::replace(&mut self.state, MapState::Retired) {
            MapState::Closed => {
                self.state = MapState::Closed;
                Err(MapError::NotOpen)
            }
            MapState::Retired => Err(MapError::NotOpen),
            MapState::Empty => Ok(()),
            MapState::Open { handle, .. } => handle.close(),
        }
    }

    /// Number of entries in the map; zero for an empty map.
    pub fn entry_count(&self) -> MapResult<u64> {
        match &self.state {
            MapState::Closed | MapState::Retired => Err(MapError::NotOpen),
            MapState::Empty => Ok(0),
            MapState::Open { handle, .. } => handle.entry_count(),
        }
    }

    /// Returns `true` between a successful open and close.
    pub fn is_open(&self) -> bool {
        matches!(self.state, MapState::Empty | MapState::Open { .. })
    }

    /// Returns `true` if mutations would be rejected.
    pub fn is_read_only(&self) -> bool {
        !matches!(
            self.state,
            MapState::Open {
                read_only: false,
                ..
            }
        )
    }

    /// Returns `true` if opened with [`open_empty`](Self::open_empty).
    pub fn is_empty(&self) -> bool {
        matches!(self.state, MapState::Empty)
    }

    /// The path of the open map, if it has one.
    pub fn path(&self) -> Option<&Path> {
        match &self.state {
            MapState::Open { path, .. } => Some(path),
            _ => None,
        }
    }

    fn ensure_closed(&self) -> MapResult<()> {
        match &self.state {
            MapState::Closed => Ok(()),
            MapState::Empty => Err(MapError::AlreadyOpen("(empty map)".to_string())),
            MapState::Open { path, .. } => {
                Err(MapError::AlreadyOpen(path.display().to_string()))
            }
            MapState::Retired => Err(MapError::Retired),
        }
    }
}

impl Drop for InodeToObjectMap {
    fn drop(&mut self) {
        if let MapState::Open { path, handle, .. } =
            std::mem::replace(&mut self.state, MapState::Retired)
        {
            if let Err(e) = handle.close() {
                warn!(path = %path.display(), error = %e, "failed to close inode map");
            }
        }
    }
}

impl fmt::Debug for InodeToObjectMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &self.state {
            MapState::Closed => "closed",
            MapState::Empty => "empty",
            MapState::Open { read_only: true, .. } => "open (read-only)",
            MapState::Open { .. } => "open",
            MapState::Retired => "retired",
        };
        f.debug_struct("InodeToObjectMap")
            .field("backend", &self.storage.name())
            .field("state", &state)
            .field("path", &self.path())
            .finish()
    }
}
