//! In-memory map storage for platforms without an embedded database, and
//! for tests.
//!
//! [`MemoryStorage`] keeps a namespace of named tables, one per map path,
//! each an ordered `BTreeMap` keyed by inode. Nothing touches the disk: the
//! path is only a name. Sharing one storage between several
//! [`InodeToObjectMap`](crate::InodeToObjectMap) instances lets a later map
//! reopen what an earlier one wrote, the same way a file would. As with a
//! database transaction, writes only become visible to other handles when
//! the writing handle is closed.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use bbackup_types::{InodeRef, MapEntry};

use crate::error::{MapError, MapResult};
use crate::traits::{MapHandle, MapStorage, OpenMode};

type Table = Arc<RwLock<BTreeMap<InodeRef, MapEntry>>>;

fn lock_poisoned(path: &Path, e: impl std::fmt::Display) -> MapError {
    MapError::backend("inode map lock poisoned", path, format!("{e}"))
}

/// An in-memory implementation of [`MapStorage`].
#[derive(Debug, Default)]
pub struct MemoryStorage {
    tables: RwLock<HashMap<PathBuf, Table>>,
}

impl MemoryStorage {
    /// Create a storage with no maps.
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    fn map_names(&self) -> Vec<PathBuf> {
        let tables = match self.tables.read() {
            Ok(tables) => tables,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut names: Vec<PathBuf> = tables.keys().cloned().collect();
        names.sort();
        names
    }
}

impl MapStorage for MemoryStorage {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn open(&self, path: &Path, mode: OpenMode) -> MapResult<Box<dyn MapHandle>> {
        let mut tables = self.tables.write().map_err(|e| lock_poisoned(path, e))?;
        let table = match mode {
            OpenMode::CreateNew => {
                let table = Table::default();
                tables.insert(path.to_path_buf(), Arc::clone(&table));
                table
            }
            OpenMode::ReadOnly | OpenMode::ReadWrite => match tables.get(path) {
                Some(table) => Arc::clone(table),
                None => {
                    return Err(MapError::backend(
                        "failed to open inode database",
                        path,
                        "no such map",
                    ))
                }
            },
        };
        // Writers work on a private copy that `close` publishes, so a
        // handle dropped without closing leaves the table untouched.
        let staged = match mode {
            OpenMode::ReadOnly => None,
            OpenMode::CreateNew => Some(BTreeMap::new()),
            OpenMode::ReadWrite => Some(
                table
                    .read()
                    .map_err(|e| lock_poisoned(path, e))?
                    .clone(),
            ),
        };
        Ok(Box::new(MemoryHandle {
            path: path.to_path_buf(),
            table,
            staged,
        }))
    }

    fn exists(&self, path: &Path) -> MapResult<bool> {
        let tables = self.tables.read().map_err(|e| lock_poisoned(path, e))?;
        Ok(tables.contains_key(path))
    }

    fn remove(&self, path: &Path) -> MapResult<()> {
        let mut tables = self.tables.write().map_err(|e| lock_poisoned(path, e))?;
        tables.remove(path);
        Ok(())
    }

    fn rename(&self, from: &Path, to: &Path) -> MapResult<()> {
        let mut tables = self.tables.write().map_err(|e| lock_poisoned(from, e))?;
        let table = tables.remove(from).ok_or_else(|| {
            MapError::backend(
                format!("failed to rename inode map to {}", to.display()),
                from,
                "no such map",
            )
        })?;
        tables.insert(to.to_path_buf(), table);
        Ok(())
    }
}

/// A handle onto one table of a [`MemoryStorage`].
///
/// Read-only handles read the shared table directly. Writable handles keep
/// their own copy in `staged` until closed.
#[derive(Debug)]
struct MemoryHandle {
    path: PathBuf,
    table: Table,
    staged: Option<BTreeMap<InodeRef, MapEntry>>,
}

impl MemoryHandle {
    fn read<T>(&self, f: impl FnOnce(&BTreeMap<InodeRef, MapEntry>) -> T) -> MapResult<T> {
        if let Some(staged) = &self.staged {
            return Ok(f(staged));
        }
        let table = self
            .table
            .read()
            .map_err(|e| lock_poisoned(&self.path, e))?;
        Ok(f(&table))
    }
}

impl MapHandle for MemoryHandle {
    fn put(&mut self, inode: InodeRef, entry: &MapEntry) -> MapResult<()> {
        let Some(staged) = self.staged.as_mut() else {
            return Err(MapError::ReadOnly);
        };
        staged.insert(inode, *entry);
        Ok(())
    }

    fn get(&self, inode: InodeRef) -> MapResult<Option<MapEntry>> {
        self.read(|entries| entries.get(&inode).copied())
    }

    fn entry_count(&self) -> MapResult<u64> {
        self.read(|entries| entries.len() as u64)
    }

    fn close(self: Box<Self>) -> MapResult<()> {
        let MemoryHandle {
            path,
            table,
            staged,
        } = *self;
        if let Some(staged) = staged {
            let mut table = table.write().map_err(|e| lock_poisoned(&path, e))?;
            *table = staged;
        }
        Ok(())
    }
}
