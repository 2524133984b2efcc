//! File service: the surface the protocol layer calls into
//!
//! Every request passes the admission throttle, then looks up its mount in
//! the registry and runs against that filesystem. Channels and listings
//! outlive the request that opened them; only the call itself holds a
//! permit.

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info};

use sluice_core::{
    AccessMode, AttributeValue, CacheConfig, Config, FileAttributes, FsResult, VirtualPath,
};

use crate::channel::{FileChannel, OpenOptions};
use crate::entity::Entity;
use crate::filesystem::{
    AttributeMap, AttributeReader, AttributeWriter, FileSystem, Namespace, PathResolver,
    VirtualFileSystem,
};
use crate::listing::DirectoryListing;
use crate::local::local_filesystem;
use crate::registry::MountRegistry;
use crate::throttle::AdmissionThrottle;
use crate::tree::TreeDirectory;
use crate::write_only::{WriteOnlyFileSystem, WriteSink};

pub struct FileService {
    registry: MountRegistry,
    throttle: AdmissionThrottle,
    cache_config: CacheConfig,
    pipe_capacity: usize,
}

impl FileService {
    pub fn new(config: &Config) -> Self {
        let capacity = config.service.capacity.as_usize();
        let pipe_capacity = config.service.pipe_capacity.as_usize();
        info!(capacity, pipe_capacity, "file service created");
        Self {
            registry: MountRegistry::new(),
            throttle: AdmissionThrottle::new(capacity),
            cache_config: config.cache.clone(),
            pipe_capacity,
        }
    }

    pub fn registry(&self) -> &MountRegistry {
        &self.registry
    }

    pub fn throttle(&self) -> &AdmissionThrottle {
        &self.throttle
    }

    pub fn pipe_capacity(&self) -> usize {
        self.pipe_capacity
    }

    /// Empty in-memory tree whose streaming files use the service's pipe size
    pub fn new_tree(&self) -> Arc<TreeDirectory> {
        TreeDirectory::with_pipe_capacity("", self.pipe_capacity)
    }

    pub fn mount(&self, uri: &str, fs: Arc<dyn FileSystem>) -> FsResult<Arc<dyn FileSystem>> {
        self.registry.mount(uri, fs)
    }

    /// Mount an in-memory tree behind a path cache
    pub fn mount_tree(&self, uri: &str, root: Arc<TreeDirectory>) -> FsResult<Arc<dyn FileSystem>> {
        let fs = VirtualFileSystem::new(uri, root, &self.cache_config);
        self.mount(uri, Arc::new(fs))
    }

    /// Mount a host directory read-only
    pub fn mount_local(&self, uri: &str, dir: &Path) -> FsResult<Arc<dyn FileSystem>> {
        let fs = local_filesystem(uri, dir, &self.cache_config)?;
        self.mount(uri, Arc::new(fs))
    }

    /// Mount an upload-only namespace
    pub fn mount_write_only(&self, uri: &str, sink: Arc<dyn WriteSink>) -> FsResult<Arc<dyn FileSystem>> {
        self.mount(uri, Arc::new(WriteOnlyFileSystem::new(uri, sink)))
    }

    pub fn unmount(&self, uri: &str) -> FsResult<()> {
        self.registry.unmount(uri)
    }

    /// Run `request` against the mount at `uri` once admitted
    pub fn submit<T, F>(&self, uri: &str, request: F) -> FsResult<T>
    where
        F: FnOnce(&dyn FileSystem) -> FsResult<T>,
    {
        let _permit = self.throttle.acquire()?;
        let fs = self.registry.get(uri)?;
        request(fs.as_ref())
    }

    pub fn resolve(&self, uri: &str, path: &VirtualPath) -> FsResult<Entity> {
        self.submit(uri, |fs| fs.resolve(path))
    }

    pub fn list_children(&self, uri: &str, dir: &VirtualPath) -> FsResult<DirectoryListing> {
        self.submit(uri, |fs| fs.list_children(dir))
    }

    pub fn open_for_read(&self, uri: &str, path: &VirtualPath) -> FsResult<Box<dyn FileChannel>> {
        debug!(uri, path = %path, "open for read");
        self.submit(uri, |fs| fs.open_for_read(path))
    }

    pub fn open_for_write(
        &self,
        uri: &str,
        path: &VirtualPath,
        options: &OpenOptions,
    ) -> FsResult<Box<dyn FileChannel>> {
        debug!(uri, path = %path, "open for write");
        self.submit(uri, |fs| fs.open_for_write(path, options))
    }

    pub fn read_attributes(&self, uri: &str, path: &VirtualPath) -> FsResult<FileAttributes> {
        self.submit(uri, |fs| fs.read_attributes(path))
    }

    pub fn read_attribute_map(
        &self,
        uri: &str,
        path: &VirtualPath,
        attributes: &str,
    ) -> FsResult<AttributeMap> {
        self.submit(uri, |fs| fs.read_attribute_map(path, attributes))
    }

    pub fn set_attribute(
        &self,
        uri: &str,
        path: &VirtualPath,
        attribute: &str,
        value: AttributeValue,
    ) -> FsResult<()> {
        self.submit(uri, |fs| fs.set_attribute(path, attribute, value))
    }

    pub fn check_access(&self, uri: &str, path: &VirtualPath, modes: &[AccessMode]) -> FsResult<()> {
        self.submit(uri, |fs| fs.check_access(path, modes))
    }

    /// Stop admitting requests and unmount everything
    pub fn shutdown(&self) {
        self.throttle.shutdown();
        self.registry.close_all();
        info!("file service shut down");
    }
}
