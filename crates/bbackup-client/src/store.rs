//! The server-side view the scanner needs.
//!
//! The store holds a tree of directories and files, each with an
//! [`ObjectId`]. The scanner only ever asks for a handful of operations, so
//! the protocol connection is reduced to the [`StoreClient`] trait.
//! [`InMemoryStore`] implements it without a server.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use bbackup_types::ObjectId;
use tracing::trace;

use crate::error::{ClientError, ClientResult};

/// Operations the scanner performs against the backup store.
pub trait StoreClient {
    /// Find or create the top-level directory for a location.
    fn location_root(&mut self, name: &str) -> ClientResult<ObjectId>;

    /// Find the entry called `name` in the directory `directory`.
    fn find_object(&self, directory: ObjectId, name: &str) -> ClientResult<Option<ObjectId>>;

    /// Create a directory called `name` in `parent`.
    fn create_directory(&mut self, parent: ObjectId, name: &str) -> ClientResult<ObjectId>;

    /// Upload the local file at `local_path` as `name` in `parent`.
    fn upload_file(
        &mut self,
        parent: ObjectId,
        name: &str,
        local_path: &Path,
    ) -> ClientResult<ObjectId>;

    /// Move `object` from the directory `from` into `to`, renaming it to
    /// `name`. Returns `false` if the object no longer exists or is not in
    /// `from`, in which case nothing changes.
    fn move_object(
        &mut self,
        object: ObjectId,
        from: ObjectId,
        to: ObjectId,
        name: &str,
    ) -> ClientResult<bool>;

    /// Describe `object`, which must currently be in `directory`, by the
    /// names leading down to it from `ancestor`. Returns `None` if it is not
    /// there or not below `ancestor`.
    fn locate(
        &self,
        ancestor: ObjectId,
        object: ObjectId,
        directory: ObjectId,
    ) -> ClientResult<Option<RemoteObject>>;
}

/// Where an object sits on the store, relative to some ancestor directory.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteObject {
    /// Entry names from just below the ancestor down to the object itself.
    pub components: Vec<String>,
    pub is_directory: bool,
}

/// An object held by [`InMemoryStore`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredEntry {
    pub name: String,
    pub parent: ObjectId,
    pub is_directory: bool,
    /// Bytes uploaded; zero for directories.
    pub size: u64,
}

/// A store kept entirely in memory.
///
/// Object IDs are allocated sequentially after the root directory.
#[derive(Debug)]
pub struct InMemoryStore {
    objects: HashMap<ObjectId, StoredEntry>,
    listings: HashMap<ObjectId, BTreeMap<String, ObjectId>>,
    next_id: i64,
}

impl InMemoryStore {
    pub fn new() -> Self {
        let mut listings = HashMap::new();
        listings.insert(ObjectId::ROOT_DIRECTORY, BTreeMap::new());
        Self {
            objects: HashMap::new(),
            listings,
            next_id: ObjectId::ROOT_DIRECTORY.get() + 1,
        }
    }

    pub fn get(&self, id: ObjectId) -> Option<&StoredEntry> {
        self.objects.get(&id)
    }

    /// Number of objects, not counting the root directory.
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Entries of a directory, sorted by name.
    pub fn children(&self, directory: ObjectId) -> Vec<(String, ObjectId)> {
        self.listings
            .get(&directory)
            .map(|listing| listing.iter().map(|(n, id)| (n.clone(), *id)).collect())
            .unwrap_or_default()
    }

    fn insert(
        &mut self,
        parent: ObjectId,
        name: &str,
        is_directory: bool,
        size: u64,
    ) -> ClientResult<ObjectId> {
        let id = ObjectId::new(self.next_id);
        let listing = self
            .listings
            .get_mut(&parent)
            .ok_or_else(|| ClientError::Store(format!("no such directory: {parent}")))?;
        if let Some(old) = listing.insert(name.to_string(), id) {
            // Replacing an entry by name drops the old object.
            self.objects.remove(&old);
            self.listings.remove(&old);
        }
        self.next_id += 1;

        self.objects.insert(
            id,
            StoredEntry {
                name: name.to_string(),
                parent,
                is_directory,
                size,
            },
        );
        if is_directory {
            self.listings.insert(id, BTreeMap::new());
        }
        trace!(%id, %parent, name, is_directory, "stored object");
        Ok(id)
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StoreClient for InMemoryStore {
    fn location_root(&mut self, name: &str) -> ClientResult<ObjectId> {
        match self.find_object(ObjectId::ROOT_DIRECTORY, name)? {
            Some(id) => Ok(id),
            None => self.create_directory(ObjectId::ROOT_DIRECTORY, name),
        }
    }

    fn find_object(&self, directory: ObjectId, name: &str) -> ClientResult<Option<ObjectId>> {
        Ok(self
            .listings
            .get(&directory)
            .and_then(|listing| listing.get(name))
            .copied())
    }

    fn create_directory(&mut self, parent: ObjectId, name: &str) -> ClientResult<ObjectId> {
        self.insert(parent, name, true, 0)
    }

    fn upload_file(
        &mut self,
        parent: ObjectId,
        name: &str,
        local_path: &Path,
    ) -> ClientResult<ObjectId> {
        let size = std::fs::metadata(local_path)?.len();
        self.insert(parent, name, false, size)
    }

    fn move_object(
        &mut self,
        object: ObjectId,
        from: ObjectId,
        to: ObjectId,
        name: &str,
    ) -> ClientResult<bool> {
        match self.objects.get(&object) {
            Some(entry) if entry.parent == from => {}
            _ => return Ok(false),
        }
        if !self.listings.contains_key(&to) {
            return Err(ClientError::Store(format!("no such directory: {to}")));
        }

        if let Some(entry) = self.objects.get_mut(&object) {
            let old_name = std::mem::replace(&mut entry.name, name.to_string());
            entry.parent = to;
            if let Some(listing) = self.listings.get_mut(&from) {
                listing.remove(&old_name);
            }
        }
        if let Some(listing) = self.listings.get_mut(&to) {
            if let Some(displaced) = listing.insert(name.to_string(), object) {
                if displaced != object {
                    self.objects.remove(&displaced);
                    self.listings.remove(&displaced);
                }
            }
        }
        trace!(%object, %from, %to, name, "moved object");
        Ok(true)
    }

    fn locate(
        &self,
        ancestor: ObjectId,
        object: ObjectId,
        directory: ObjectId,
    ) -> ClientResult<Option<RemoteObject>> {
        let Some(entry) = self.objects.get(&object) else {
            return Ok(None);
        };
        if entry.parent != directory {
            return Ok(None);
        }

        let mut components = vec![entry.name.clone()];
        let mut current = entry.parent;
        while current != ancestor {
            match self.objects.get(&current) {
                Some(dir) => {
                    components.push(dir.name.clone());
                    current = dir.parent;
                }
                None => return Ok(None),
            }
        }
        components.reverse();
        Ok(Some(RemoteObject {
            components,
            is_directory: entry.is_directory,
        }))
    }
}
