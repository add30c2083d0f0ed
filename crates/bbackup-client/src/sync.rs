//! Running a backup across every configured location.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use bbackup_idmap::MapStorage;
use tracing::{error, info, warn};

use crate::config::{ClientConfig, LocationConfig};
use crate::error::{ClientError, ClientResult};
use crate::idmaps::IdMapSet;
use crate::scan::{LocationScanner, ScanStats};
use crate::store::StoreClient;

/// What happened to one location during a run.
#[derive(Debug)]
pub struct LocationOutcome {
    pub name: String,
    pub result: ClientResult<ScanStats>,
}

impl LocationOutcome {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// Backs up each configured location in turn.
#[derive(Debug)]
pub struct SyncRunner {
    config: ClientConfig,
    maps: IdMapSet,
    stop: Arc<AtomicBool>,
}

impl SyncRunner {
    /// Create a runner that keeps its maps in `storage`. The same storage
    /// must be passed to every run for renames to be detected across runs.
    pub fn new(config: ClientConfig, storage: Arc<dyn MapStorage>) -> Self {
        let maps = IdMapSet::new(storage, config.data_directory.clone());
        Self {
            config,
            maps,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Create a runner using the map backend named in the configuration.
    pub fn from_config(config: ClientConfig) -> Self {
        let storage = config.map_storage();
        Self::new(config, storage)
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn id_maps(&self) -> &IdMapSet {
        &self.maps
    }

    /// Setting the returned flag stops the run at the next entry.
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    /// Back up every location. A failing location is logged and reported
    /// in its outcome; the others still run. Cancellation ends the whole
    /// run with [`ClientError::Cancelled`].
    pub fn run(&self, store: &mut dyn StoreClient) -> ClientResult<Vec<LocationOutcome>> {
        let mut outcomes = Vec::with_capacity(self.config.locations.len());
        for location in &self.config.locations {
            let result = self.sync_location(store, location);
            match &result {
                Ok(stats) => info!(
                    location = %location.name,
                    uploaded = stats.uploaded,
                    renamed = stats.renamed,
                    tracked = stats.tracked,
                    "location backed up"
                ),
                Err(ClientError::Cancelled) => {
                    warn!(location = %location.name, "backup run cancelled");
                    return Err(ClientError::Cancelled);
                }
                Err(e) => {
                    error!(location = %location.name, error = %e, "failed to back up location");
                    if e.is_map_backend_failure() {
                        warn!(
                            location = %location.name,
                            "deleting ID maps after database failure"
                        );
                        if let Err(e) = self.maps.delete_corrupt_maps(&location.path) {
                            error!(
                                location = %location.name,
                                error = %e,
                                "failed to delete ID maps"
                            );
                        }
                    }
                }
            }
            outcomes.push(LocationOutcome {
                name: location.name.clone(),
                result,
            });
        }
        Ok(outcomes)
    }

    fn sync_location(
        &self,
        store: &mut dyn StoreClient,
        location: &LocationConfig,
    ) -> ClientResult<ScanStats> {
        let root_id = store.location_root(&location.name)?;
        let mut maps = self.maps.setup_for_sync(&location.path)?;
        let stats = LocationScanner::new(
            store,
            &mut maps,
            self.config.file_tracking_size_threshold,
            &self.stop,
        )
        .scan(&location.path, root_id)?;
        self.maps.commit_after_sync(&location.path, maps)?;
        Ok(stats)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::config::MapBackendKind;
    use crate::store::InMemoryStore;
    use bbackup_idmap::{MemoryStorage, SqliteStorage};
    use std::fs;
    use std::path::Path;
    use std::sync::atomic::Ordering;

    fn config(data: &Path, locations: &[(&str, &Path)]) -> ClientConfig {
        ClientConfig {
            data_directory: data.to_path_buf(),
            file_tracking_size_threshold: 16,
            map_backend: MapBackendKind::Persistent,
            locations: locations
                .iter()
                .map(|(name, path)| LocationConfig {
                    name: name.to_string(),
                    path: path.to_path_buf(),
                })
                .collect(),
        }
    }

    fn backends() -> Vec<Arc<dyn MapStorage>> {
        vec![Arc::new(MemoryStorage::new()), Arc::new(SqliteStorage::new())]
    }

    #[test]
    fn two_runs_detect_rename() {
        for storage in backends() {
            let data = tempfile::tempdir().unwrap();
            let tree = tempfile::tempdir().unwrap();
            fs::write(tree.path().join("report.pdf"), vec![0u8; 64]).unwrap();

            let runner = SyncRunner::new(config(data.path(), &[("docs", tree.path())]), storage);
            let mut store = InMemoryStore::new();

            let first = runner.run(&mut store).unwrap();
            assert_eq!(first.len(), 1);
            assert_eq!(first[0].result.as_ref().unwrap().uploaded, 1);

            fs::rename(
                tree.path().join("report.pdf"),
                tree.path().join("report-final.pdf"),
            )
            .unwrap();
            let second = runner.run(&mut store).unwrap();
            let stats = second[0].result.as_ref().unwrap();
            assert_eq!(stats.renamed, 1);
            assert_eq!(stats.uploaded, 0);

            // No map is left half-written.
            let location = tree.path();
            let set = runner.id_maps();
            assert!(set.storage().exists(&set.base_path(location)).unwrap());
            assert!(!set.storage().exists(&set.new_map_path(location)).unwrap());
        }
    }

    #[test]
    fn failing_location_does_not_stop_others() {
        let data = tempfile::tempdir().unwrap();
        let tree = tempfile::tempdir().unwrap();
        fs::write(tree.path().join("a"), b"hello").unwrap();
        let missing = tree.path().join("missing");

        let runner = SyncRunner::new(
            config(data.path(), &[("gone", missing.as_path()), ("ok", tree.path())]),
            Arc::new(MemoryStorage::new()),
        );
        let mut store = InMemoryStore::new();
        let outcomes = runner.run(&mut store).unwrap();

        assert_eq!(outcomes.len(), 2);
        assert_eq!(outcomes[0].name, "gone");
        assert!(!outcomes[0].is_ok());
        assert!(outcomes[1].is_ok());
        assert_eq!(outcomes[1].result.as_ref().unwrap().files, 1);
    }

    #[test]
    fn map_failure_deletes_maps() {
        let data = tempfile::tempdir().unwrap();
        let tree = tempfile::tempdir().unwrap();
        fs::write(tree.path().join("a"), vec![0u8; 32]).unwrap();

        let runner = SyncRunner::new(
            config(data.path(), &[("home", tree.path())]),
            Arc::new(SqliteStorage::new()),
        );
        let mut store = InMemoryStore::new();
        runner.run(&mut store).unwrap();

        // A directory where the new map should go makes creating it fail.
        let set = runner.id_maps();
        let new_path = set.new_map_path(tree.path());
        fs::create_dir(&new_path).unwrap();
        fs::write(new_path.join("blocker"), b"x").unwrap();

        let outcomes = runner.run(&mut store).unwrap();
        let err = outcomes[0].result.as_ref().unwrap_err();
        assert!(err.is_map_backend_failure(), "{err}");
        assert!(!set.base_path(tree.path()).exists());
    }

    #[test]
    fn cancelled_run_returns_error() {
        let data = tempfile::tempdir().unwrap();
        let tree = tempfile::tempdir().unwrap();
        fs::write(tree.path().join("a"), b"x").unwrap();

        let runner = SyncRunner::new(
            config(data.path(), &[("home", tree.path())]),
            Arc::new(MemoryStorage::new()),
        );
        runner.stop_flag().store(true, Ordering::Relaxed);
        let mut store = InMemoryStore::new();
        assert!(matches!(
            runner.run(&mut store),
            Err(ClientError::Cancelled)
        ));
    }

    #[test]
    fn from_config_uses_configured_backend() {
        let data = tempfile::tempdir().unwrap();
        let tree = tempfile::tempdir().unwrap();
        let mut cfg = config(data.path(), &[("home", tree.path())]);
        cfg.map_backend = MapBackendKind::Memory;
        let runner = SyncRunner::from_config(cfg);
        assert_eq!(runner.id_maps().storage().name(), "memory");
        assert_eq!(runner.config().locations.len(), 1);
    }
}
