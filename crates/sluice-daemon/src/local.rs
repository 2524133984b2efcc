//! Read-only namespace over a host directory
//!
//! Entities are built from `std::fs` metadata when they are looked up.
//! Directory listings read the host directory lazily. Files are opened
//! through a [`SeekableReadChannel`] that reopens the host file on backward
//! seeks.

use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use tracing::{debug, warn};

use sluice_core::path::validate_filename;
use sluice_core::{CacheConfig, FsError, FsResult, Permissions};

use crate::channel::{FileChannel, OpenOptions};
use crate::entity::{Entity, VirtualDirectory, VirtualFile};
use crate::filesystem::VirtualFileSystem;
use crate::seekable::{SeekableReadChannel, StreamOpener};

#[derive(Clone, Debug)]
struct HostMeta {
    size: u64,
    permissions: Permissions,
    modified: Option<SystemTime>,
    accessed: Option<SystemTime>,
    created: Option<SystemTime>,
}

impl HostMeta {
    fn from_metadata(metadata: &fs::Metadata) -> Self {
        Self {
            size: if metadata.is_dir() { 0 } else { metadata.len() },
            permissions: host_permissions(metadata),
            modified: metadata.modified().ok(),
            accessed: metadata.accessed().ok(),
            created: metadata.created().ok(),
        }
    }
}

#[cfg(unix)]
fn host_permissions(metadata: &fs::Metadata) -> Permissions {
    use std::os::unix::fs::PermissionsExt;
    Permissions::from_mode(metadata.permissions().mode())
}

#[cfg(not(unix))]
fn host_permissions(metadata: &fs::Metadata) -> Permissions {
    let base = if metadata.is_dir() {
        Permissions::DIR_DEFAULT
    } else {
        Permissions::FILE_DEFAULT
    };
    if metadata.permissions().readonly() {
        base.difference(Permissions::OWNER_WRITE)
    } else {
        base
    }
}

/// Build the entity for a host path
fn host_entity(name: String, path: PathBuf) -> io::Result<Entity> {
    let metadata = fs::metadata(&path)?;
    let meta = HostMeta::from_metadata(&metadata);
    if metadata.is_dir() {
        Ok(Arc::new(LocalDirectory { name, path, meta }))
    } else {
        Ok(Arc::new(LocalFile { name, path, meta }))
    }
}

/// Host file
pub struct LocalFile {
    name: String,
    path: PathBuf,
    meta: HostMeta,
}

macro_rules! host_meta_accessors {
    () => {
        fn size(&self) -> u64 {
            self.meta.size
        }

        fn permissions(&self) -> Permissions {
            self.meta.permissions
        }

        fn modified(&self) -> Option<SystemTime> {
            self.meta.modified
        }

        fn accessed(&self) -> Option<SystemTime> {
            self.meta.accessed
        }

        fn created(&self) -> Option<SystemTime> {
            self.meta.created
        }
    };
}

impl VirtualFile for LocalFile {
    fn name(&self) -> &str {
        &self.name
    }

    host_meta_accessors!();

    fn open(&self, options: &OpenOptions) -> FsResult<Box<dyn FileChannel>> {
        if options.write {
            return Err(FsError::unsupported(format!(
                "write to read-only host file {}",
                self.path.display()
            )));
        }
        let path = self.path.clone();
        let opener: StreamOpener = Arc::new(move || {
            let file = fs::File::open(&path)?;
            Ok(Box::new(io::BufReader::new(file)) as Box<dyn Read + Send>)
        });
        debug!(path = %self.path.display(), "opened host file");
        Ok(Box::new(SeekableReadChannel::with_size(opener, self.meta.size)))
    }
}

/// Host directory
pub struct LocalDirectory {
    name: String,
    path: PathBuf,
    meta: HostMeta,
}

impl LocalDirectory {
    /// Entity for the directory at `path`
    pub fn open(path: &Path) -> FsResult<Arc<LocalDirectory>> {
        let metadata = fs::metadata(path)?;
        if !metadata.is_dir() {
            return Err(FsError::not_a_directory(path.display().to_string()));
        }
        Ok(Arc::new(LocalDirectory {
            name: String::new(),
            path: path.to_path_buf(),
            meta: HostMeta::from_metadata(&metadata),
        }))
    }
}

impl VirtualFile for LocalDirectory {
    fn name(&self) -> &str {
        &self.name
    }

    host_meta_accessors!();

    fn open(&self, _options: &OpenOptions) -> FsResult<Box<dyn FileChannel>> {
        Err(FsError::is_a_directory(self.path.display().to_string()))
    }

    fn as_directory(&self) -> Option<&dyn VirtualDirectory> {
        Some(self)
    }
}

impl VirtualDirectory for LocalDirectory {
    fn find(&self, name: &str) -> FsResult<Option<Entity>> {
        validate_filename(name)?;
        match host_entity(name.to_string(), self.path.join(name)) {
            Ok(entity) => Ok(Some(entity)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn children(&self) -> FsResult<Box<dyn Iterator<Item = Entity> + Send>> {
        let entries = fs::read_dir(&self.path)?;
        let dir = self.path.clone();
        Ok(Box::new(entries.filter_map(move |entry| {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(dir = %dir.display(), "unreadable directory entry: {}", e);
                    return None;
                }
            };
            let name = entry.file_name().to_string_lossy().into_owned();
            match host_entity(name, entry.path()) {
                Ok(entity) => Some(entity),
                Err(e) => {
                    // vanished or dangling link
                    debug!(path = %entry.path().display(), "skipping entry: {}", e);
                    None
                }
            }
        })))
    }
}

/// Read-only cached filesystem over the host directory `dir`
pub fn local_filesystem(name: &str, dir: &Path, config: &CacheConfig) -> FsResult<VirtualFileSystem> {
    let root = LocalDirectory::open(dir)?;
    Ok(VirtualFileSystem::new(name, root, config).read_only(true))
}
