//! Mount registry
//!
//! Maps mount URIs (e.g. `sluice://reports`) to mounted filesystems. Closing
//! a filesystem takes it out of the registry: closed mounts are dropped the
//! next time they are looked up.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, info, warn};

use sluice_core::{FsError, FsResult};

use crate::filesystem::FileSystem;

/// Live mounts keyed by URI
#[derive(Default)]
pub struct MountRegistry {
    mounts: DashMap<String, Arc<dyn FileSystem>>,
}

impl MountRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mount `fs` under `uri`. Fails with `AlreadyExists` while another open
    /// filesystem holds the URI.
    pub fn mount(&self, uri: &str, fs: Arc<dyn FileSystem>) -> FsResult<Arc<dyn FileSystem>> {
        match self.mounts.entry(uri.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_open() {
                    return Err(FsError::already_exists(uri));
                }
                debug!(uri, "replacing closed mount");
                occupied.insert(Arc::clone(&fs));
            }
            Entry::Vacant(vacant) => {
                vacant.insert(Arc::clone(&fs));
            }
        }
        info!(uri, fs = fs.name(), "mounted");
        Ok(fs)
    }

    /// Look up an open mount
    pub fn get(&self, uri: &str) -> FsResult<Arc<dyn FileSystem>> {
        let fs = self
            .mounts
            .get(uri)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| FsError::not_found(uri))?;
        if !fs.is_open() {
            self.mounts.remove_if(uri, |_, mounted| !mounted.is_open());
            debug!(uri, "dropped closed mount");
            return Err(FsError::not_found(uri));
        }
        Ok(fs)
    }

    /// Remove and close the mount at `uri`
    pub fn unmount(&self, uri: &str) -> FsResult<()> {
        let (_, fs) = self
            .mounts
            .remove(uri)
            .ok_or_else(|| FsError::not_found(uri))?;
        fs.close()?;
        info!(uri, "unmounted");
        Ok(())
    }

    /// URIs of open mounts, sorted
    pub fn uris(&self) -> Vec<String> {
        let mut uris: Vec<String> = self
            .mounts
            .iter()
            .filter(|entry| entry.value().is_open())
            .map(|entry| entry.key().clone())
            .collect();
        uris.sort();
        uris
    }

    pub fn len(&self) -> usize {
        self.mounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mounts.is_empty()
    }

    /// Unmount everything
    pub fn close_all(&self) {
        let uris: Vec<String> = self.mounts.iter().map(|e| e.key().clone()).collect();
        for uri in uris {
            if let Err(e) = self.unmount(&uri) {
                warn!(uri = %uri, "unmount failed: {}", e);
            }
        }
    }
}
