//! The inode map value and its fixed on-disk record.
//!
//! A record is exactly [`RECORD_SIZE`] bytes: the object ID followed by the
//! containing directory ID, each a little-endian `i64`. The layout does not
//! depend on the host, so a map file written on one architecture reads the
//! same on another.

use serde::{Deserialize, Serialize};

use crate::error::TypeError;
use crate::object::ObjectId;

/// Width in bytes of an encoded [`MapEntry`].
pub const RECORD_SIZE: usize = 16;

/// What the inode map remembers about one local filesystem object.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MapEntry {
    /// The store object the local file or directory was uploaded as.
    pub object_id: ObjectId,
    /// The store directory containing that object when it was recorded.
    pub parent_directory_id: ObjectId,
}

impl MapEntry {
    pub fn new(object_id: ObjectId, parent_directory_id: ObjectId) -> Self {
        Self {
            object_id,
            parent_directory_id,
        }
    }

    /// Encode as a fixed 16-byte record.
    pub fn to_record(&self) -> [u8; RECORD_SIZE] {
        let mut buf = [0u8; RECORD_SIZE];
        buf[..8].copy_from_slice(&self.object_id.get().to_le_bytes());
        buf[8..].copy_from_slice(&self.parent_directory_id.get().to_le_bytes());
        buf
    }

    /// Decode a record produced by [`MapEntry::to_record`].
    pub fn from_record(bytes: &[u8]) -> Result<Self, TypeError> {
        if bytes.len() != RECORD_SIZE {
            return Err(TypeError::InvalidLength {
                expected: RECORD_SIZE,
                actual: bytes.len(),
            });
        }
        let mut object_id = [0u8; 8];
        let mut parent = [0u8; 8];
        object_id.copy_from_slice(&bytes[..8]);
        parent.copy_from_slice(&bytes[8..]);
        Ok(Self {
            object_id: ObjectId::new(i64::from_le_bytes(object_id)),
            parent_directory_id: ObjectId::new(i64::from_le_bytes(parent)),
        })
    }
}
