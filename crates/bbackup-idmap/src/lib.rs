//! Inode to store object ID map for the Box Backup client.
//!
//! During a backup scan the client needs to know which local filesystem
//! objects it has already uploaded, and as which store objects, so that an
//! unchanged or renamed file is never uploaded a second time. This crate
//! provides that map: local inode number in, `(object ID, containing
//! directory ID)` out.
//!
//! Each run writes a fresh map and compares against the previous run's map,
//! opened read-only. A location with no previous run uses an empty map
//! ([`InodeToObjectMap::open_empty`]), which needs no file at all.
//!
//! # Storage Backends
//!
//! All backends implement the [`MapStorage`] trait and are chosen when the
//! map is constructed:
//!
//! - [`SqliteStorage`] -- one embedded SQLite file per map
//! - [`MemoryStorage`] -- ordered in-memory tables, for tests and for
//!   platforms without an embedded database
//!
//! # Design Rules
//!
//! 1. Keys are unique within a map; a second write for the same inode wins.
//! 2. Entries are never deleted individually; a new map replaces the old one.
//! 3. A lookup that misses returns `Ok(None)`; `Err` always means misuse or
//!    a backend failure.
//! 4. A map opened read-only, or opened empty, rejects every write.
//! 5. Errors are returned immediately and never retried inside the map.

pub mod error;
pub mod map;
pub mod memory;
pub mod persistent;
pub mod traits;

pub use error::{BackendError, MapError, MapResult};
pub use map::InodeToObjectMap;
pub use memory::MemoryStorage;
pub use persistent::{SqliteStorage, MAP_FORMAT_VERSION};
pub use traits::{MapHandle, MapStorage, OpenMode};
