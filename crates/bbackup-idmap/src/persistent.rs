//! Persistent map storage on an embedded SQLite database.
//!
//! Each map is one database file holding two tables:
//!
//! - `meta`: the map format version, checked on every non-create open
//! - `inode_map`: `inode` (8-byte key) to `record` (16-byte [`MapEntry`])
//!
//! The database is used purely as a key-value store. Writable handles keep a
//! transaction open and commit it on close, so a run that dies half-way
//! leaves no partially written map behind.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use bbackup_types::{InodeRef, MapEntry};
use rusqlite::types::ValueRef;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use tracing::{debug, warn};

use crate::error::{MapError, MapResult};
use crate::traits::{MapHandle, MapStorage, OpenMode};

/// Version of the on-disk map layout written by this crate.
pub const MAP_FORMAT_VERSION: i64 = 1;

const VERSION_KEY: &str = "inode_map.format_version";

const SCHEMA: &str = r#"
    CREATE TABLE meta (
        key TEXT PRIMARY KEY,
        value INTEGER NOT NULL
    );
    CREATE TABLE inode_map (
        inode BLOB PRIMARY KEY,
        record BLOB NOT NULL
    ) WITHOUT ROWID;
"#;

/// A [`MapStorage`] keeping each map in its own SQLite file.
#[derive(Debug, Clone)]
pub struct SqliteStorage {
    file_mode: u32,
}

impl SqliteStorage {
    /// Permission bits given to newly created map files.
    pub const DEFAULT_FILE_MODE: u32 = 0o600;

    pub fn new() -> Self {
        Self {
            file_mode: Self::DEFAULT_FILE_MODE,
        }
    }

    /// Use different permission bits for new map files (Unix only).
    pub fn with_file_mode(file_mode: u32) -> Self {
        Self { file_mode }
    }

    fn create(&self, path: &Path) -> MapResult<Connection> {
        self.remove(path)?;
        // SQLite gives its journal the mode of the database file, so the
        // file is created with the final mode before SQLite first opens it.
        create_private_file(path, self.file_mode)
            .map_err(|e| MapError::backend("failed to create inode database", path, e))?;

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| MapError::backend("failed to create inode database", path, e))?;

        conn.execute_batch(SCHEMA)
            .map_err(|e| MapError::backend("failed to initialize inode database", path, e))?;
        conn.execute(
            "INSERT INTO meta (key, value) VALUES (?1, ?2)",
            params![VERSION_KEY, MAP_FORMAT_VERSION],
        )
        .map_err(|e| {
            MapError::backend(
                "failed to write version number to inode database",
                path,
                e,
            )
        })?;

        restrict_permissions(path, self.file_mode).map_err(|e| {
            MapError::backend("failed to set permissions on inode database", path, e)
        })?;
        Ok(conn)
    }

    fn open_existing(&self, path: &Path, read_only: bool) -> MapResult<Connection> {
        let access = if read_only {
            OpenFlags::SQLITE_OPEN_READ_ONLY
        } else {
            OpenFlags::SQLITE_OPEN_READ_WRITE
        };
        let conn = Connection::open_with_flags(path, access | OpenFlags::SQLITE_OPEN_NO_MUTEX)
            .map_err(|e| MapError::backend("failed to open inode database", path, e))?;
        check_version(&conn, path)?;
        Ok(conn)
    }
}

impl Default for SqliteStorage {
    fn default() -> Self {
        Self::new()
    }
}

fn check_version(conn: &Connection, path: &Path) -> MapResult<()> {
    let version: Option<i64> = conn
        .query_row(
            "SELECT value FROM meta WHERE key = ?1",
            params![VERSION_KEY],
            |row| row.get(0),
        )
        .optional()
        .map_err(|e| {
            MapError::backend("failed to read version number of inode database", path, e)
        })?;

    match version {
        Some(MAP_FORMAT_VERSION) => Ok(()),
        Some(found) => Err(MapError::backend(
            "wrong version number in inode database",
            path,
            format!(
                "expected {MAP_FORMAT_VERSION} but found {found}, perhaps it needs to be recreated"
            ),
        )),
        None => Err(MapError::backend(
            "missing version number in inode database",
            path,
            "perhaps it needs to be recreated",
        )),
    }
}

#[cfg(unix)]
fn create_private_file(path: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::OpenOptionsExt;
    std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(mode)
        .open(path)
        .map(drop)
}

#[cfg(not(unix))]
fn create_private_file(path: &Path, mode: u32) -> io::Result<()> {
    let _ = mode;
    std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map(drop)
}

#[cfg(unix)]
fn restrict_permissions(path: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn restrict_permissions(path: &Path, mode: u32) -> io::Result<()> {
    let _ = (path, mode);
    Ok(())
}

fn journal_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push("-journal");
    PathBuf::from(name)
}

fn remove_if_present(path: &Path) -> io::Result<()> {
    match std::fs::remove_file(path) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

impl MapStorage for SqliteStorage {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn open(&self, path: &Path, mode: OpenMode) -> MapResult<Box<dyn MapHandle>> {
        let conn = match mode {
            OpenMode::CreateNew => self.create(path)?,
            OpenMode::ReadWrite => self.open_existing(path, false)?,
            OpenMode::ReadOnly => self.open_existing(path, true)?,
        };

        let in_transaction = !mode.is_read_only();
        if in_transaction {
            conn.execute_batch("BEGIN IMMEDIATE")
                .map_err(|e| MapError::backend("failed to lock inode database", path, e))?;
        }

        debug!(path = %path.display(), ?mode, "opened inode database");
        Ok(Box::new(SqliteHandle {
            conn,
            path: path.to_path_buf(),
            in_transaction,
        }))
    }

    fn exists(&self, path: &Path) -> MapResult<bool> {
        path.try_exists()
            .map_err(|e| MapError::backend("failed to check for inode database", path, e))
    }

    fn remove(&self, path: &Path) -> MapResult<()> {
        // A stale hot journal would otherwise be replayed into the next
        // database created at this path.
        remove_if_present(&journal_path(path))
            .and_then(|()| remove_if_present(path))
            .map_err(|e| MapError::backend("failed to delete inode database", path, e))
    }

    fn rename(&self, from: &Path, to: &Path) -> MapResult<()> {
        std::fs::rename(from, to).map_err(|e| {
            MapError::backend(
                format!("failed to rename inode database to {}", to.display()),
                from,
                e,
            )
        })
    }
}

struct SqliteHandle {
    conn: Connection,
    path: PathBuf,
    in_transaction: bool,
}

impl fmt::Debug for SqliteHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqliteHandle")
            .field("path", &self.path)
            .field("in_transaction", &self.in_transaction)
            .finish_non_exhaustive()
    }
}

impl MapHandle for SqliteHandle {
    fn put(&mut self, inode: InodeRef, entry: &MapEntry) -> MapResult<()> {
        let key = inode.to_key_bytes();
        let record = entry.to_record();
        self.conn
            .prepare_cached("INSERT OR REPLACE INTO inode_map (inode, record) VALUES (?1, ?2)")
            .and_then(|mut stmt| stmt.execute(params![&key[..], &record[..]]))
            .map_err(|e| {
                MapError::backend("failed to add record to inode database", &self.path, e)
            })?;
        Ok(())
    }

    fn get(&self, inode: InodeRef) -> MapResult<Option<MapEntry>> {
        let key = inode.to_key_bytes();
        let value = self
            .conn
            .prepare_cached("SELECT record FROM inode_map WHERE inode = ?1")
            .and_then(|mut stmt| {
                stmt.query_row(params![&key[..]], |row| {
                    Ok(match row.get_ref(0)? {
                        ValueRef::Blob(bytes) => Some(bytes.to_vec()),
                        _ => None,
                    })
                })
                .optional()
            })
            .map_err(|e| {
                MapError::backend("failed to look up record in inode database", &self.path, e)
            })?;

        // A record of the wrong shape is reported as absent rather than as
        // corruption; the next run rewrites it.
        match value {
            None => Ok(None),
            Some(None) => {
                warn!(
                    path = %self.path.display(),
                    %inode,
                    "inode map record is not a blob, treating as not found"
                );
                Ok(None)
            }
            Some(Some(bytes)) => match MapEntry::from_record(&bytes) {
                Ok(entry) => Ok(Some(entry)),
                Err(e) => {
                    warn!(
                        path = %self.path.display(),
                        %inode,
                        error = %e,
                        "malformed inode map record, treating as not found"
                    );
                    Ok(None)
                }
            },
        }
    }

    fn entry_count(&self) -> MapResult<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM inode_map", [], |row| row.get(0))
            .map_err(|e| {
                MapError::backend("failed to count inode database records", &self.path, e)
            })?;
        Ok(count.max(0) as u64)
    }

    fn close(self: Box<Self>) -> MapResult<()> {
        let SqliteHandle {
            conn,
            path,
            in_transaction,
        } = *self;

        if in_transaction {
            conn.execute_batch("COMMIT")
                .map_err(|e| MapError::backend("failed to commit inode database", &path, e))?;
        }
        conn.close()
            .map_err(|(_, e)| MapError::backend("failed to close inode database", &path, e))?;
        debug!(path = %path.display(), "closed inode database");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bbackup_types::ObjectId;

    fn entry(object: i64, parent: i64) -> MapEntry {
        MapEntry::new(ObjectId::new(object), ObjectId::new(parent))
    }

    fn create_with(path: &Path, entries: &[(u64, MapEntry)]) {
        let storage = SqliteStorage::new();
        let mut handle = storage.open(path, OpenMode::CreateNew).unwrap();
        for (inode, e) in entries {
            handle.put(InodeRef::new(*inode), e).unwrap();
        }
        handle.close().unwrap();
    }

    fn raw_insert(path: &Path, inode: u64, value: rusqlite::types::Value) {
        let conn = Connection::open(path).unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO inode_map (inode, record) VALUES (?1, ?2)",
            params![&InodeRef::new(inode).to_key_bytes()[..], value],
        )
        .unwrap();
    }

    // -----------------------------------------------------------------------
    // Open / create
    // -----------------------------------------------------------------------

    #[test]
    fn created_map_is_readable_after_close() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.map");
        create_with(&path, &[(42, entry(1001, 5)), (43, entry(1002, 5))]);

        let handle = SqliteStorage::new()
            .open(&path, OpenMode::ReadOnly)
            .unwrap();
        assert_eq!(handle.get(InodeRef::new(42)).unwrap(), Some(entry(1001, 5)));
        assert_eq!(handle.get(InodeRef::new(43)).unwrap(), Some(entry(1002, 5)));
        assert_eq!(handle.get(InodeRef::new(99)).unwrap(), None);
        assert_eq!(handle.entry_count().unwrap(), 2);
        handle.close().unwrap();
    }

    #[test]
    fn lookup_immediately_after_create_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fresh.map");
        let handle = SqliteStorage::new()
            .open(&path, OpenMode::CreateNew)
            .unwrap();
        assert_eq!(handle.get(InodeRef::new(1)).unwrap(), None);
        assert_eq!(handle.entry_count().unwrap(), 0);
    }

    #[test]
    fn create_new_discards_existing_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.map");
        create_with(&path, &[(1, entry(2, 1))]);
        create_with(&path, &[]);

        let handle = SqliteStorage::new()
            .open(&path, OpenMode::ReadOnly)
            .unwrap();
        assert_eq!(handle.get(InodeRef::new(1)).unwrap(), None);
    }

    #[test]
    fn read_write_open_keeps_existing_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.map");
        create_with(&path, &[(1, entry(2, 1))]);

        let storage = SqliteStorage::new();
        let mut handle = storage.open(&path, OpenMode::ReadWrite).unwrap();
        handle.put(InodeRef::new(3), &entry(4, 1)).unwrap();
        handle.close().unwrap();

        let handle = storage.open(&path, OpenMode::ReadOnly).unwrap();
        assert_eq!(handle.get(InodeRef::new(1)).unwrap(), Some(entry(2, 1)));
        assert_eq!(handle.get(InodeRef::new(3)).unwrap(), Some(entry(4, 1)));
    }

    #[test]
    fn open_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.map");
        for mode in [OpenMode::ReadOnly, OpenMode::ReadWrite] {
            let err = SqliteStorage::new().open(&path, mode).unwrap_err();
            assert!(err.is_backend_failure(), "{err}");
        }
        assert!(!path.exists());
    }

    #[test]
    fn open_garbage_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("garbage.map");
        std::fs::write(&path, b"this is not a database, just some bytes on disk").unwrap();

        let err = SqliteStorage::new()
            .open(&path, OpenMode::ReadOnly)
            .unwrap_err();
        assert!(err.is_backend_failure());
    }

    #[test]
    fn wrong_version_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("old.map");
        create_with(&path, &[]);
        Connection::open(&path)
            .unwrap()
            .execute(
                "UPDATE meta SET value = 2 WHERE key = ?1",
                params![VERSION_KEY],
            )
            .unwrap();

        let err = SqliteStorage::new()
            .open(&path, OpenMode::ReadOnly)
            .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("wrong version number"), "{msg}");
        assert!(msg.contains("expected 1 but found 2"), "{msg}");
    }

    #[test]
    fn missing_version_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("unversioned.map");
        create_with(&path, &[]);
        Connection::open(&path)
            .unwrap()
            .execute("DELETE FROM meta", [])
            .unwrap();

        let err = SqliteStorage::new()
            .open(&path, OpenMode::ReadOnly)
            .unwrap_err();
        assert!(err.to_string().contains("missing version number"));
    }

    #[cfg(unix)]
    #[test]
    fn new_map_file_is_private() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.map");
        create_with(&path, &[]);
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[cfg(unix)]
    #[test]
    fn custom_file_mode_covers_database_and_journal() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.map");
        let storage = SqliteStorage::with_file_mode(0o640);
        let mut handle = storage.open(&path, OpenMode::CreateNew).unwrap();
        handle.put(InodeRef::new(1), &entry(2, 1)).unwrap();

        let mode_of = |p: &Path| std::fs::metadata(p).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode_of(&path), 0o640);
        let journal = journal_path(&path);
        if journal.exists() {
            assert_eq!(mode_of(&journal), 0o640);
        }

        handle.close().unwrap();
        assert_eq!(mode_of(&path), 0o640);
    }

    #[test]
    fn debug_names_path_not_connection() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.map");
        let handle = SqliteStorage::new()
            .open(&path, OpenMode::CreateNew)
            .unwrap();
        let debug = format!("{handle:?}");
        assert!(debug.contains("SqliteHandle"));
        assert!(debug.contains("test.map"));
        assert!(debug.contains("in_transaction: true"));
    }

    // -----------------------------------------------------------------------
    // Records
    // -----------------------------------------------------------------------

    #[test]
    fn put_overwrites_existing_entry() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.map");
        let mut handle = SqliteStorage::new()
            .open(&path, OpenMode::CreateNew)
            .unwrap();
        handle.put(InodeRef::new(7), &entry(100, 1)).unwrap();
        handle.put(InodeRef::new(7), &entry(200, 2)).unwrap();
        assert_eq!(handle.get(InodeRef::new(7)).unwrap(), Some(entry(200, 2)));
        assert_eq!(handle.entry_count().unwrap(), 1);
    }

    #[test]
    fn wrong_size_record_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.map");
        create_with(&path, &[(1, entry(2, 1))]);
        raw_insert(&path, 9, rusqlite::types::Value::Blob(vec![0xab; 12]));

        let handle = SqliteStorage::new()
            .open(&path, OpenMode::ReadOnly)
            .unwrap();
        assert_eq!(handle.get(InodeRef::new(9)).unwrap(), None);
        assert_eq!(handle.get(InodeRef::new(1)).unwrap(), Some(entry(2, 1)));
    }

    #[test]
    fn non_blob_record_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.map");
        create_with(&path, &[]);
        raw_insert(&path, 9, rusqlite::types::Value::Text("1001".into()));

        let handle = SqliteStorage::new()
            .open(&path, OpenMode::ReadOnly)
            .unwrap();
        assert_eq!(handle.get(InodeRef::new(9)).unwrap(), None);
    }

    #[test]
    fn unclosed_writer_leaves_no_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.map");
        let storage = SqliteStorage::new();
        let mut handle = storage.open(&path, OpenMode::CreateNew).unwrap();
        handle.put(InodeRef::new(1), &entry(2, 1)).unwrap();
        drop(handle);

        // Schema and version were written before the write transaction began.
        let handle = storage.open(&path, OpenMode::ReadOnly).unwrap();
        assert_eq!(handle.get(InodeRef::new(1)).unwrap(), None);
    }

    // -----------------------------------------------------------------------
    // File management
    // -----------------------------------------------------------------------

    #[test]
    fn rename_replaces_target_file() {
        let dir = tempfile::tempdir().unwrap();
        let current = dir.path().join("mnt_home");
        let new = dir.path().join("mnt_home.n");
        create_with(&current, &[(1, entry(10, 1))]);
        create_with(&new, &[(1, entry(20, 1))]);

        let storage = SqliteStorage::new();
        storage.rename(&new, &current).unwrap();
        assert!(!storage.exists(&new).unwrap());

        let handle = storage.open(&current, OpenMode::ReadOnly).unwrap();
        assert_eq!(handle.get(InodeRef::new(1)).unwrap(), Some(entry(20, 1)));
    }

    #[test]
    fn remove_deletes_file_and_journal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mnt_home.n");
        create_with(&path, &[]);
        std::fs::write(journal_path(&path), b"stale").unwrap();

        let storage = SqliteStorage::new();
        storage.remove(&path).unwrap();
        assert!(!path.exists());
        assert!(!journal_path(&path).exists());
        // Removing again is fine.
        storage.remove(&path).unwrap();
    }
}
