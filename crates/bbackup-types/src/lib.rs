//! Foundation types for the Box Backup client.
//!
//! This crate provides the small value types shared by the inode map, the
//! location scanner and the command-line tools.
//!
//! # Key Types
//!
//! - [`InodeRef`] -- Local filesystem object identifier (the inode map key)
//! - [`ObjectId`] -- Identifier the store assigned to an uploaded object
//! - [`MapEntry`] -- Object ID and containing directory ID recorded for an inode
//! - [`RECORD_SIZE`] -- Width of the fixed on-disk record for a [`MapEntry`]

pub mod error;
pub mod inode;
pub mod object;
pub mod record;

pub use error::TypeError;
pub use inode::InodeRef;
pub use object::ObjectId;
pub use record::{MapEntry, RECORD_SIZE};
