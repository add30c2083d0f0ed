use std::fmt;
use std::fs::Metadata;

use serde::{Deserialize, Serialize};

/// Local filesystem object identifier, used as the inode map key.
///
/// On Unix this is the `st_ino` of the object. It stays stable while a
/// file's contents change and across renames within one filesystem, but not
/// across a move to another volume.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InodeRef(u64);

impl InodeRef {
    /// Width in bytes of the key written to a map backend.
    pub const KEY_SIZE: usize = 8;

    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw platform value.
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Fixed-width little-endian key bytes.
    pub fn to_key_bytes(self) -> [u8; Self::KEY_SIZE] {
        self.0.to_le_bytes()
    }

    /// Read the inode reference of a filesystem object.
    ///
    /// Returns `None` on platforms without a stable inode number; objects
    /// there are simply not tracked.
    pub fn from_metadata(metadata: &Metadata) -> Option<Self> {
        #[cfg(unix)]
        {
            use std::os::unix::fs::MetadataExt;
            Some(Self(metadata.ino()))
        }

        #[cfg(not(unix))]
        {
            let _ = metadata;
            None
        }
    }
}

impl fmt::Debug for InodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InodeRef({})", self.0)
    }
}

impl fmt::Display for InodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for InodeRef {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

impl From<InodeRef> for u64 {
    fn from(inode: InodeRef) -> Self {
        inode.0
    }
}
