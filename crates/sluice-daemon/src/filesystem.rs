//! Filesystem capabilities and the cached virtual filesystem
//!
//! The protocol layer talks to a mounted namespace through four capability
//! traits:
//!
//! - [`PathResolver`]: path to entity
//! - [`Namespace`]: listings, opening channels, structural operations
//! - [`AttributeReader`]: attribute snapshots, named attribute maps, access checks
//! - [`AttributeWriter`]: permission, time and ownership updates
//!
//! [`VirtualFileSystem`] implements all of them over a tree of entities with
//! a [`PathCache`] in front of it.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tracing::{debug, info};

use sluice_core::{
    AccessMode, AttributeValue, CacheConfig, FileAttributes, FileType, FsError, FsResult,
    Permissions, Principal, VirtualPath, ALL_ATTRIBUTES, NO_TIME, SUPPORTED_VIEWS,
};

use crate::cache::PathCache;
use crate::channel::{FileChannel, OpenOptions};
use crate::entity::{Entity, VirtualFile};
use crate::listing::DirectoryListing;

/// Named attributes returned by `read_attribute_map`
pub type AttributeMap = BTreeMap<String, AttributeValue>;

/// Decides who owns an entity
pub trait PrincipalLookup: Send + Sync {
    fn owner(&self, entity: &dyn VirtualFile) -> Principal;
    fn group(&self, entity: &dyn VirtualFile) -> Principal;
}

/// Uses what the entity records, falling back to fixed principals
#[derive(Clone, Debug)]
pub struct FixedPrincipals {
    owner: Principal,
    group: Principal,
}

impl FixedPrincipals {
    pub fn new(owner: Principal, group: Principal) -> Self {
        Self { owner, group }
    }
}

impl Default for FixedPrincipals {
    fn default() -> Self {
        Self::new(Principal::root(), Principal::root())
    }
}

impl PrincipalLookup for FixedPrincipals {
    fn owner(&self, entity: &dyn VirtualFile) -> Principal {
        entity.owner().unwrap_or_else(|| self.owner.clone())
    }

    fn group(&self, entity: &dyn VirtualFile) -> Principal {
        entity.group().unwrap_or_else(|| self.group.clone())
    }
}

pub trait PathResolver: Send + Sync {
    fn resolve(&self, path: &VirtualPath) -> FsResult<Entity>;
}

pub trait Namespace: Send + Sync {
    fn list_children(&self, dir: &VirtualPath) -> FsResult<DirectoryListing>;

    fn open_for_read(&self, path: &VirtualPath) -> FsResult<Box<dyn FileChannel>>;

    fn open_for_write(
        &self,
        path: &VirtualPath,
        options: &OpenOptions,
    ) -> FsResult<Box<dyn FileChannel>>;

    fn create_directory(&self, path: &VirtualPath) -> FsResult<()> {
        Err(FsError::unsupported(format!("create directory {}", path)))
    }

    fn delete(&self, path: &VirtualPath) -> FsResult<()> {
        Err(FsError::unsupported(format!("delete {}", path)))
    }

    fn copy(&self, from: &VirtualPath, to: &VirtualPath) -> FsResult<()> {
        Err(FsError::unsupported(format!("copy {} to {}", from, to)))
    }

    fn rename(&self, from: &VirtualPath, to: &VirtualPath) -> FsResult<()> {
        Err(FsError::unsupported(format!("move {} to {}", from, to)))
    }
}

pub trait AttributeReader: Send + Sync {
    fn read_attributes(&self, path: &VirtualPath) -> FsResult<FileAttributes>;

    /// Read attributes by name, e.g. `"size,owner"`, `"posix:*"`.
    ///
    /// Without a view prefix the `basic` view is assumed.
    fn read_attribute_map(&self, path: &VirtualPath, attributes: &str) -> FsResult<AttributeMap> {
        let (_, names) = parse_attribute_list(attributes)?;
        let attrs = self.read_attributes(path)?;
        let mut map = AttributeMap::new();
        for name in names {
            let value = attrs
                .get(name)
                .ok_or_else(|| FsError::unsupported(format!("attribute {}", name)))?;
            map.insert(name.to_string(), value);
        }
        Ok(map)
    }

    fn check_access(&self, path: &VirtualPath, modes: &[AccessMode]) -> FsResult<()>;
}

pub trait AttributeWriter: Send + Sync {
    fn set_permissions(&self, path: &VirtualPath, permissions: Permissions) -> FsResult<()>;

    fn set_times(
        &self,
        path: &VirtualPath,
        modified: Option<SystemTime>,
        accessed: Option<SystemTime>,
        created: Option<SystemTime>,
    ) -> FsResult<()>;

    fn set_owner(&self, path: &VirtualPath, owner: Principal) -> FsResult<()>;

    fn set_group(&self, path: &VirtualPath, group: Principal) -> FsResult<()>;

    /// Set one attribute by name, e.g. `"posix:permissions"`.
    ///
    /// Sizes and type flags are never settable.
    fn set_attribute(&self, path: &VirtualPath, attribute: &str, value: AttributeValue) -> FsResult<()> {
        let (_, name) = split_view(attribute)?;
        match (name, value) {
            ("permissions", AttributeValue::Permissions(p)) => self.set_permissions(path, p),
            ("owner", AttributeValue::Principal(p)) => self.set_owner(path, p),
            ("group", AttributeValue::Principal(p)) => self.set_group(path, p),
            ("lastModifiedTime", AttributeValue::Time(t)) => self.set_times(path, Some(t), None, None),
            ("lastAccessTime", AttributeValue::Time(t)) => self.set_times(path, None, Some(t), None),
            ("creationTime", AttributeValue::Time(t)) => self.set_times(path, None, None, Some(t)),
            (name, value) => Err(FsError::unsupported(format!(
                "set attribute {} to {:?}",
                name, value
            ))),
        }
    }
}

/// Everything a mounted namespace provides
pub trait FileSystem: Namespace + PathResolver + AttributeReader + AttributeWriter {
    fn name(&self) -> &str;

    /// Release the namespace; later operations fail with `Closed`
    fn close(&self) -> FsResult<()>;

    fn is_open(&self) -> bool;

    fn is_read_only(&self) -> bool;

    fn supported_views(&self) -> &'static [&'static str] {
        SUPPORTED_VIEWS
    }
}

/// Split `"view:name"`; no prefix means the `basic` view
fn split_view(attribute: &str) -> FsResult<(&str, &str)> {
    let (view, name) = attribute.split_once(':').unwrap_or(("basic", attribute));
    if !SUPPORTED_VIEWS.contains(&view) {
        return Err(FsError::unsupported(format!("attribute view {}", view)));
    }
    Ok((view, name))
}

/// Parse `"view:a,b,c"` or `"view:*"` into the view and attribute names.
///
/// Names the view does not know are skipped.
pub fn parse_attribute_list(attributes: &str) -> FsResult<(&str, Vec<&str>)> {
    let (view, list) = split_view(attributes)?;
    let mut names = Vec::new();
    for name in list.split(',').map(str::trim) {
        match name {
            "*" => names.extend_from_slice(ALL_ATTRIBUTES),
            "" => {}
            name if ALL_ATTRIBUTES.contains(&name) => names.push(name),
            name => {
                debug!(view, attribute = name, "skipping unknown attribute");
            }
        }
    }
    names.dedup();
    Ok((view, names))
}

/// Attribute snapshot of an entity
pub fn attributes_of(entity: &dyn VirtualFile, principals: &dyn PrincipalLookup) -> FileAttributes {
    FileAttributes {
        file_type: if entity.is_directory() {
            FileType::Directory
        } else {
            FileType::File
        },
        size: entity.size(),
        permissions: entity.permissions(),
        owner: principals.owner(entity),
        group: principals.group(entity),
        modified: entity.modified().unwrap_or(NO_TIME),
        accessed: entity.accessed().unwrap_or(NO_TIME),
        created: entity.created().unwrap_or(NO_TIME),
    }
}

/// Cached virtual filesystem over a tree of entities
pub struct VirtualFileSystem {
    name: String,
    cache: PathCache,
    principals: Arc<dyn PrincipalLookup>,
    read_only: bool,
    closed: AtomicBool,
}

impl VirtualFileSystem {
    pub fn new(name: impl Into<String>, root: Entity, config: &CacheConfig) -> Self {
        Self {
            name: name.into(),
            cache: PathCache::new(
                root,
                config.max_entries,
                Duration::from_secs(config.ttl_secs),
            ),
            principals: Arc::new(FixedPrincipals::default()),
            read_only: false,
            closed: AtomicBool::new(false),
        }
    }

    pub fn with_principals(mut self, principals: Arc<dyn PrincipalLookup>) -> Self {
        self.principals = principals;
        self
    }

    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    pub fn cache(&self) -> &PathCache {
        &self.cache
    }

    fn ensure_open(&self) -> FsResult<()> {
        if self.closed.load(Ordering::Acquire) {
            Err(FsError::closed(format!("filesystem {}", self.name)))
        } else {
            Ok(())
        }
    }

    fn ensure_writable(&self, what: &str) -> FsResult<()> {
        self.ensure_open()?;
        if self.read_only {
            return Err(FsError::unsupported(format!(
                "{} on read-only filesystem {}",
                what, self.name
            )));
        }
        Ok(())
    }

    /// Apply an in-place change to an entity and forget its cached state
    fn mutate<F>(&self, path: &VirtualPath, what: &str, change: F) -> FsResult<()>
    where
        F: FnOnce(&dyn VirtualFile) -> FsResult<()>,
    {
        self.ensure_writable(what)?;
        let entity = self.cache.resolve(path)?;
        change(entity.as_ref())?;
        self.cache.invalidate(path);
        debug!(fs = %self.name, path = %path, "{}", what);
        Ok(())
    }
}

impl PathResolver for VirtualFileSystem {
    fn resolve(&self, path: &VirtualPath) -> FsResult<Entity> {
        self.ensure_open()?;
        self.cache.resolve(path)
    }
}

impl Namespace for VirtualFileSystem {
    fn list_children(&self, dir: &VirtualPath) -> FsResult<DirectoryListing> {
        let entity = self.resolve(dir)?;
        let directory = entity
            .as_directory()
            .ok_or_else(|| FsError::not_a_directory(dir.to_string()))?;
        Ok(DirectoryListing::new(dir.to_absolute(), directory.children()?))
    }

    fn open_for_read(&self, path: &VirtualPath) -> FsResult<Box<dyn FileChannel>> {
        let entity = self.resolve(path)?;
        if entity.is_directory() {
            return Err(FsError::is_a_directory(path.to_string()));
        }
        entity.open(&OpenOptions::for_read())
    }

    fn open_for_write(
        &self,
        path: &VirtualPath,
        options: &OpenOptions,
    ) -> FsResult<Box<dyn FileChannel>> {
        self.ensure_writable("write")?;
        let options = options.write(true);
        let path = path.to_absolute();

        let channel = if options.is_new_file() {
            let (parent, name) = match (path.parent(), path.file_name()) {
                (Some(parent), Some(name)) => (parent, name),
                _ => return Err(FsError::is_a_directory(path.to_string())),
            };
            let parent_entity = self.cache.resolve(&parent)?;
            let directory = parent_entity
                .as_directory()
                .ok_or_else(|| FsError::not_a_directory(parent.to_string()))?;
            let channel = directory.create_file(name, &options)?;
            self.cache.invalidate(&parent);
            channel
        } else {
            let entity = self.cache.resolve(&path)?;
            if entity.is_directory() {
                return Err(FsError::is_a_directory(path.to_string()));
            }
            entity.open(&options)?
        };

        self.cache.invalidate(&path);
        debug!(fs = %self.name, path = %path, "opened for write");
        Ok(channel)
    }
}

impl AttributeReader for VirtualFileSystem {
    fn read_attributes(&self, path: &VirtualPath) -> FsResult<FileAttributes> {
        let entity = self.resolve(path)?;
        Ok(attributes_of(entity.as_ref(), self.principals.as_ref()))
    }

    fn check_access(&self, path: &VirtualPath, modes: &[AccessMode]) -> FsResult<()> {
        self.resolve(path)?;
        for mode in modes {
            match mode {
                AccessMode::Read => {}
                AccessMode::Write if self.read_only => {
                    return Err(FsError::permission_denied(format!("write {}", path)))
                }
                AccessMode::Write => {}
                AccessMode::Execute => {
                    return Err(FsError::permission_denied(format!("execute {}", path)))
                }
            }
        }
        Ok(())
    }
}

impl AttributeWriter for VirtualFileSystem {
    fn set_permissions(&self, path: &VirtualPath, permissions: Permissions) -> FsResult<()> {
        self.mutate(path, "set permissions", |e| e.set_permissions(permissions))
    }

    fn set_times(
        &self,
        path: &VirtualPath,
        modified: Option<SystemTime>,
        accessed: Option<SystemTime>,
        created: Option<SystemTime>,
    ) -> FsResult<()> {
        self.mutate(path, "set times", |e| e.set_times(modified, accessed, created))
    }

    fn set_owner(&self, path: &VirtualPath, owner: Principal) -> FsResult<()> {
        self.mutate(path, "set owner", |e| e.set_owner(owner))
    }

    fn set_group(&self, path: &VirtualPath, group: Principal) -> FsResult<()> {
        self.mutate(path, "set group", |e| e.set_group(group))
    }
}

impl FileSystem for VirtualFileSystem {
    fn name(&self) -> &str {
        &self.name
    }

    fn close(&self) -> FsResult<()> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.cache.invalidate_all();
            info!(fs = %self.name, "filesystem closed");
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        !self.closed.load(Ordering::Acquire)
    }

    fn is_read_only(&self) -> bool {
        self.read_only
    }
}
