//! Lazy directory listings

use sluice_core::VirtualPath;
use tracing::warn;

use crate::entity::Entity;

/// One listed child together with its full path
#[derive(Clone)]
pub struct DirEntry {
    pub path: VirtualPath,
    pub entity: Entity,
}

impl std::fmt::Debug for DirEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirEntry")
            .field("path", &self.path.to_string())
            .field("directory", &self.entity.is_directory())
            .finish()
    }
}

/// Predicate on child paths
pub type EntryFilter = Box<dyn Fn(&VirtualPath) -> bool + Send>;

/// Finite, single-pass sequence of directory children.
///
/// Children are pulled from the backend as the listing is iterated. After
/// `close` the listing yields nothing more.
pub struct DirectoryListing {
    base: VirtualPath,
    children: Box<dyn Iterator<Item = Entity> + Send>,
    filter: Option<EntryFilter>,
    closed: bool,
}

impl DirectoryListing {
    pub fn new(base: VirtualPath, children: Box<dyn Iterator<Item = Entity> + Send>) -> Self {
        Self {
            base,
            children,
            filter: None,
            closed: false,
        }
    }

    /// Listing with no children
    pub fn empty(base: VirtualPath) -> Self {
        Self::new(base, Box::new(std::iter::empty()))
    }

    /// Only yield children whose path satisfies `filter`
    pub fn with_filter(mut self, filter: EntryFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn base(&self) -> &VirtualPath {
        &self.base
    }

    pub fn close(&mut self) {
        self.closed = true;
        self.children = Box::new(std::iter::empty());
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Iterator for DirectoryListing {
    type Item = DirEntry;

    fn next(&mut self) -> Option<DirEntry> {
        if self.closed {
            return None;
        }
        for entity in self.children.by_ref() {
            let path = match self.base.join(entity.name()) {
                Ok(path) => path,
                Err(e) => {
                    warn!(base = %self.base, "skipping unlistable child: {}", e);
                    continue;
                }
            };
            if let Some(filter) = &self.filter {
                if !filter(&path) {
                    continue;
                }
            }
            return Some(DirEntry { path, entity });
        }
        None
    }
}
