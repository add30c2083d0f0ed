//! Per-location inode map files and their rotation between runs.
//!
//! Every location has two maps in the data directory:
//!
//! - `mnt<path>`: the map written by the last completed run, opened
//!   read-only as the "previous" map
//! - `mnt<path>.n`: the map being written by the current run
//!
//! A run opens both, scans, then closes both and renames the new map over
//! the previous one. A `.n` map found at the start of a run belongs to a run
//! that never completed and is discarded.

use std::path::{Path, PathBuf, MAIN_SEPARATOR};
use std::sync::Arc;

use bbackup_idmap::{InodeToObjectMap, MapStorage};
use tracing::{debug, info, warn};

use crate::error::ClientResult;

/// Suffix of the map written during a run.
pub const NEW_MAP_SUFFIX: &str = ".n";

/// The two maps a location's scan works with.
#[derive(Debug)]
pub struct LocationMaps {
    /// Read-only map from the last completed run (possibly empty).
    pub previous: InodeToObjectMap,
    /// Writable map for this run.
    pub current: InodeToObjectMap,
}

/// Manages the inode map files of every backup location.
#[derive(Clone)]
pub struct IdMapSet {
    storage: Arc<dyn MapStorage>,
    data_directory: PathBuf,
}

impl IdMapSet {
    pub fn new(storage: Arc<dyn MapStorage>, data_directory: impl Into<PathBuf>) -> Self {
        Self {
            storage,
            data_directory: data_directory.into(),
        }
    }

    pub fn storage(&self) -> &Arc<dyn MapStorage> {
        &self.storage
    }

    /// Path of the committed map for the location rooted at `location_path`.
    ///
    /// `/home/user` maps to `<data_directory>/mnt_home_user`.
    pub fn base_path(&self, location_path: &Path) -> PathBuf {
        let leaf: String = location_path
            .to_string_lossy()
            .chars()
            .map(|c| if c == MAIN_SEPARATOR || c == '/' { '_' } else { c })
            .collect();
        self.data_directory.join(format!("mnt{leaf}"))
    }

    /// Path of the map written during a run.
    pub fn new_map_path(&self, location_path: &Path) -> PathBuf {
        let mut name = self.base_path(location_path).into_os_string();
        name.push(NEW_MAP_SUFFIX);
        PathBuf::from(name)
    }

    /// Open the previous and current maps for a location's scan.
    ///
    /// Failing to create the current map is an error. A previous map that is
    /// missing or unreadable is replaced by an empty one, which makes the
    /// run behave like the location's first.
    pub fn setup_for_sync(&self, location_path: &Path) -> ClientResult<LocationMaps> {
        let new_path = self.new_map_path(location_path);
        if self.storage.exists(&new_path)? {
            info!(
                path = %new_path.display(),
                "found an incomplete ID map database, deleting it to start afresh"
            );
            if let Err(e) = self.storage.remove(&new_path) {
                warn!(
                    path = %new_path.display(),
                    error = %e,
                    "failed to delete incomplete ID map database"
                );
            }
        }

        let mut current = InodeToObjectMap::new(Arc::clone(&self.storage));
        current.open(&new_path, false, true)?;

        let previous = self.open_previous(&self.base_path(location_path))?;
        Ok(LocationMaps { previous, current })
    }

    fn open_previous(&self, path: &Path) -> ClientResult<InodeToObjectMap> {
        let mut map = InodeToObjectMap::new(Arc::clone(&self.storage));
        let exists = match self.storage.exists(path) {
            Ok(exists) => exists,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "cannot check for previous ID map");
                false
            }
        };

        if exists {
            match map.open(path, true, false) {
                Ok(()) => return Ok(map),
                Err(e) => warn!(
                    path = %path.display(),
                    error = %e,
                    "cannot read previous ID map, treating this as the first run"
                ),
            }
        } else {
            debug!(path = %path.display(), "no previous ID map, using an empty one");
        }

        map.open_empty()?;
        Ok(map)
    }

    /// Close a completed run's maps and make the new map the previous one
    /// for the next run.
    pub fn commit_after_sync(&self, location_path: &Path, maps: LocationMaps) -> ClientResult<()> {
        let LocationMaps {
            mut previous,
            mut current,
        } = maps;

        if let Err(e) = previous.close() {
            warn!(error = %e, "failed to close previous ID map");
        }
        let entries = current.entry_count()?;
        current.close()?;

        let new_path = self.new_map_path(location_path);
        let base_path = self.base_path(location_path);
        self.storage.rename(&new_path, &base_path)?;
        info!(path = %base_path.display(), entries, "committed ID map");
        Ok(())
    }

    /// Delete both of a location's maps, so the next run starts without
    /// one. Used after a map backend failure.
    pub fn delete_corrupt_maps(&self, location_path: &Path) -> ClientResult<()> {
        for path in [
            self.base_path(location_path),
            self.new_map_path(location_path),
        ] {
            debug!(path = %path.display(), "deleting ID map");
            self.storage.remove(&path)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for IdMapSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdMapSet")
            .field("backend", &self.storage.name())
            .field("data_directory", &self.data_directory)
            .finish()
    }
}
