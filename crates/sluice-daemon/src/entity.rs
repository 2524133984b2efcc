//! Entities of a virtual namespace
//!
//! An entity is either a file or a directory. Backends own their entities and
//! hand out shared [`Entity`] handles; the path cache keeps those handles
//! alive between lookups.

use std::sync::Arc;
use std::time::SystemTime;

use sluice_core::{FsError, FsResult, Permissions, Principal};

use crate::channel::{FileChannel, OpenOptions};

/// Shared handle to a file or directory
pub type Entity = Arc<dyn VirtualFile>;

/// A node of a virtual namespace
pub trait VirtualFile: Send + Sync {
    fn name(&self) -> &str;

    /// Content length in bytes (0 for directories)
    fn size(&self) -> u64;

    fn permissions(&self) -> Permissions;

    fn modified(&self) -> Option<SystemTime> {
        None
    }

    fn accessed(&self) -> Option<SystemTime> {
        None
    }

    fn created(&self) -> Option<SystemTime> {
        None
    }

    /// Owner recorded by the backend, if any
    fn owner(&self) -> Option<Principal> {
        None
    }

    fn group(&self) -> Option<Principal> {
        None
    }

    /// Open the entity's content
    fn open(&self, options: &OpenOptions) -> FsResult<Box<dyn FileChannel>>;

    fn set_permissions(&self, _permissions: Permissions) -> FsResult<()> {
        Err(FsError::unsupported("set permissions"))
    }

    /// Update the given times, leaving `None` ones untouched
    fn set_times(
        &self,
        _modified: Option<SystemTime>,
        _accessed: Option<SystemTime>,
        _created: Option<SystemTime>,
    ) -> FsResult<()> {
        Err(FsError::unsupported("set times"))
    }

    fn set_owner(&self, _owner: Principal) -> FsResult<()> {
        Err(FsError::unsupported("set owner"))
    }

    fn set_group(&self, _group: Principal) -> FsResult<()> {
        Err(FsError::unsupported("set group"))
    }

    /// Directory view of this entity
    fn as_directory(&self) -> Option<&dyn VirtualDirectory> {
        None
    }

    fn is_directory(&self) -> bool {
        self.as_directory().is_some()
    }
}

/// A node that contains other nodes
pub trait VirtualDirectory: VirtualFile {
    /// Look up a direct child by name
    fn find(&self, name: &str) -> FsResult<Option<Entity>>;

    /// All direct children, produced lazily
    fn children(&self) -> FsResult<Box<dyn Iterator<Item = Entity> + Send>>;

    /// Create (or replace) the child `name` and open it for writing
    fn create_file(&self, _name: &str, _options: &OpenOptions) -> FsResult<Box<dyn FileChannel>> {
        Err(FsError::unsupported("create file"))
    }
}
