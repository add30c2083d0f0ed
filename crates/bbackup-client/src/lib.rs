//! Client side of a Box Backup run.
//!
//! A run walks each configured location and brings the store in line with
//! it. Uploading is expensive, so the client remembers which inode became
//! which store object in a per-location inode map, and on the next run
//! recognises renamed files and directories by inode instead of uploading
//! them again.
//!
//! # Components
//!
//! - [`ClientConfig`] -- data directory, tracking threshold, map backend,
//!   locations (TOML)
//! - [`IdMapSet`] -- names, opens and rotates each location's maps
//! - [`StoreClient`] -- the store operations a scan needs, with
//!   [`InMemoryStore`] for tests
//! - [`LocationScanner`] -- walks one location against the store
//! - [`SyncRunner`] -- runs every location, isolating failures
//!
//! # Design Rules
//!
//! 1. The previous run's map is only read; the current run writes a fresh
//!    map that replaces it once the location completes.
//! 2. A map left behind by an interrupted run is discarded, never reused.
//! 3. A broken previous map degrades to an empty one; the run still
//!    completes, only without rename detection.
//! 4. After a map database failure the location's maps are deleted so the
//!    next run starts clean.

pub mod config;
pub mod error;
pub mod idmaps;
pub mod scan;
pub mod store;
pub mod sync;

pub use config::{ClientConfig, LocationConfig, MapBackendKind};
pub use error::{ClientError, ClientResult};
pub use idmaps::{IdMapSet, LocationMaps, NEW_MAP_SUFFIX};
pub use scan::{LocationScanner, ScanStats};
pub use store::{InMemoryStore, RemoteObject, StoreClient, StoredEntry};
pub use sync::{LocationOutcome, SyncRunner};
