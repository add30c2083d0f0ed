//! Walking a backup location and keeping its inode map current.
//!
//! For every directory and file under the location root the scanner finds
//! the matching store object, by name in the parent directory or else by
//! inode through the previous run's map (a rename), and only creates or
//! uploads when neither works. Tracked objects are recorded in the current
//! run's map so the next run can recognise them wherever they move.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use bbackup_types::{InodeRef, ObjectId};
use serde::Serialize;
use tracing::{debug, trace, warn};
use walkdir::{DirEntry, WalkDir};

use crate::error::{ClientError, ClientResult};
use crate::idmaps::LocationMaps;
use crate::store::StoreClient;

/// Counters for one location's scan.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ScanStats {
    /// Directories seen below the root.
    pub directories: u64,
    /// Regular files seen.
    pub files: u64,
    /// Objects already on the store under the same name.
    pub existing: u64,
    /// Directories created on the store.
    pub created: u64,
    /// Files uploaded.
    pub uploaded: u64,
    /// Objects found through the previous map and moved into place.
    pub renamed: u64,
    /// Entries written to the current map, including the root.
    pub tracked: u64,
}

/// Scans one location against the store.
pub struct LocationScanner<'a> {
    store: &'a mut dyn StoreClient,
    maps: &'a mut LocationMaps,
    threshold: u64,
    stop: &'a AtomicBool,
    root_path: PathBuf,
    root_id: ObjectId,
    stats: ScanStats,
}

impl<'a> LocationScanner<'a> {
    /// `threshold` is the smallest file size, in bytes, that is tracked in
    /// the map. Directories are always tracked.
    pub fn new(
        store: &'a mut dyn StoreClient,
        maps: &'a mut LocationMaps,
        threshold: u64,
        stop: &'a AtomicBool,
    ) -> Self {
        Self {
            store,
            maps,
            threshold,
            stop,
            root_path: PathBuf::new(),
            root_id: ObjectId::null(),
            stats: ScanStats::default(),
        }
    }

    /// Scan the tree at `root_path`, whose store directory is `root_id`.
    ///
    /// Problems with single entries are logged and the entry skipped. Map
    /// failures and cancellation end the scan with an error.
    pub fn scan(mut self, root_path: &Path, root_id: ObjectId) -> ClientResult<ScanStats> {
        self.root_path = root_path.to_path_buf();
        self.root_id = root_id;

        let metadata = std::fs::metadata(root_path)?;
        if !metadata.is_dir() {
            return Err(ClientError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("location root is not a directory: {}", root_path.display()),
            )));
        }
        self.record(
            InodeRef::from_metadata(&metadata),
            root_id,
            ObjectId::ROOT_DIRECTORY,
        )?;

        let mut dir_ids: HashMap<PathBuf, ObjectId> = HashMap::new();
        dir_ids.insert(root_path.to_path_buf(), root_id);

        let mut walker = WalkDir::new(root_path)
            .min_depth(1)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter();

        while let Some(next) = walker.next() {
            if self.stop.load(Ordering::Relaxed) {
                return Err(ClientError::Cancelled);
            }

            let entry = match next {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(
                        path = ?e.path(),
                        error = %e,
                        "cannot read entry, skipping"
                    );
                    continue;
                }
            };

            let file_type = entry.file_type();
            if !file_type.is_dir() && !file_type.is_file() {
                trace!(path = %entry.path().display(), "not a file or directory, skipping");
                continue;
            }

            let parent_id = match entry.path().parent().and_then(|p| dir_ids.get(p)) {
                Some(id) => *id,
                None => {
                    // The parent was skipped; so are its contents.
                    if file_type.is_dir() {
                        walker.skip_current_dir();
                    }
                    continue;
                }
            };

            match self.process_entry(&entry, parent_id) {
                Ok(id) => {
                    if file_type.is_dir() {
                        dir_ids.insert(entry.path().to_path_buf(), id);
                    }
                }
                Err(e @ (ClientError::Map(_) | ClientError::Cancelled)) => return Err(e),
                Err(e) => {
                    warn!(path = %entry.path().display(), error = %e, "skipping entry");
                    if file_type.is_dir() {
                        walker.skip_current_dir();
                    }
                }
            }
        }

        debug!(
            root = %root_path.display(),
            directories = self.stats.directories,
            files = self.stats.files,
            uploaded = self.stats.uploaded,
            renamed = self.stats.renamed,
            "location scanned"
        );
        Ok(self.stats)
    }

    fn process_entry(&mut self, entry: &DirEntry, parent_id: ObjectId) -> ClientResult<ObjectId> {
        let path = entry.path();
        let name = entry.file_name().to_str().ok_or_else(|| {
            ClientError::Io(io::Error::new(
                io::ErrorKind::InvalidData,
                "file name is not valid UTF-8",
            ))
        })?;
        let metadata = entry.metadata().map_err(io::Error::from)?;
        let is_dir = metadata.is_dir();
        let inode = InodeRef::from_metadata(&metadata);
        let tracked = is_dir || metadata.len() >= self.threshold;

        if is_dir {
            self.stats.directories += 1;
        } else {
            self.stats.files += 1;
        }

        let object_id = if let Some(id) = self.store.find_object(parent_id, name)? {
            self.stats.existing += 1;
            id
        } else if let Some(id) =
            self.check_for_rename(path, inode.filter(|_| tracked), is_dir, parent_id, name)?
        {
            self.stats.renamed += 1;
            id
        } else if is_dir {
            let id = self.store.create_directory(parent_id, name)?;
            self.stats.created += 1;
            id
        } else {
            let id = self.store.upload_file(parent_id, name, path)?;
            self.stats.uploaded += 1;
            id
        };

        if tracked {
            self.record(inode, object_id, parent_id)?;
        }
        Ok(object_id)
    }

    /// Look for `path` in the previous map and, if it is the same object
    /// under a new name, move that object into place. Untracked entries
    /// pass `None` for `inode`.
    fn check_for_rename(
        &mut self,
        path: &Path,
        inode: Option<InodeRef>,
        is_dir: bool,
        parent_id: ObjectId,
        name: &str,
    ) -> ClientResult<Option<ObjectId>> {
        let Some(inode) = inode else {
            return Ok(None);
        };
        let Some(previous) = self.maps.previous.lookup(inode)? else {
            return Ok(None);
        };

        let located = self.store.locate(
            self.root_id,
            previous.object_id,
            previous.parent_directory_id,
        )?;
        let remote = match located {
            Some(remote) => remote,
            None => {
                trace!(
                    path = %path.display(),
                    %inode,
                    object = %previous.object_id,
                    "inode seen before but its object is gone from the store"
                );
                return Ok(None);
            }
        };
        if remote.is_directory != is_dir {
            trace!(
                path = %path.display(),
                %inode,
                "inode seen before as a different kind of object"
            );
            return Ok(None);
        }

        let old_path: PathBuf = remote
            .components
            .iter()
            .fold(self.root_path.clone(), |p, c| p.join(c));
        match std::fs::symlink_metadata(&old_path) {
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Ok(_) => {
                trace!(
                    path = %path.display(),
                    old_path = %old_path.display(),
                    "inode seen before but its old path still exists"
                );
                return Ok(None);
            }
            Err(e) => {
                trace!(
                    path = %path.display(),
                    old_path = %old_path.display(),
                    error = %e,
                    "inode seen before but its old path cannot be checked"
                );
                return Ok(None);
            }
        }

        if previous.parent_directory_id != parent_id {
            debug!(
                path = %path.display(),
                %inode,
                from = %previous.parent_directory_id,
                to = %parent_id,
                "object moved between directories"
            );
        }
        if !self.store.move_object(
            previous.object_id,
            previous.parent_directory_id,
            parent_id,
            name,
        )? {
            return Ok(None);
        }
        debug!(
            path = %path.display(),
            old_path = %old_path.display(),
            object = %previous.object_id,
            "renamed on store"
        );
        Ok(Some(previous.object_id))
    }

    fn record(
        &mut self,
        inode: Option<InodeRef>,
        object_id: ObjectId,
        parent_id: ObjectId,
    ) -> ClientResult<()> {
        if let Some(inode) = inode {
            self.maps.current.add_to_map(inode, object_id, parent_id)?;
            self.stats.tracked += 1;
        }
        Ok(())
    }
}
