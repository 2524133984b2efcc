//! Write-only namespace
//!
//! Exposes an empty root directory that accepts uploads: every file written
//! is handed to a [`WriteSink`] as a sequential byte stream. Nothing can be
//! listed, read back or inspected apart from the root itself.

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use tracing::{debug, info};

use sluice_core::{
    AccessMode, FileAttributes, FsError, FsResult, Permissions, Principal, VirtualPath,
};

use crate::channel::{require_current_position, FileChannel, OpenOptions};
use crate::entity::{Entity, VirtualDirectory, VirtualFile};
use crate::filesystem::{
    attributes_of, AttributeReader, AttributeWriter, FileSystem, FixedPrincipals, Namespace,
    PathResolver,
};
use crate::listing::DirectoryListing;

/// Destination of uploaded files
pub trait WriteSink: Send + Sync {
    /// Start receiving the content of `path`
    fn open(&self, path: &VirtualPath) -> FsResult<Box<dyn Write + Send>>;
}

/// Sequential write channel over a [`Write`] sink
pub struct SinkChannel {
    sink: Option<Box<dyn Write + Send>>,
    position: u64,
}

impl SinkChannel {
    pub fn new(sink: Box<dyn Write + Send>) -> Self {
        Self {
            sink: Some(sink),
            position: 0,
        }
    }

    fn sink(&mut self) -> FsResult<&mut Box<dyn Write + Send>> {
        self.sink
            .as_mut()
            .ok_or_else(|| FsError::closed("sink channel"))
    }
}

impl FileChannel for SinkChannel {
    fn read(&mut self, _buf: &mut [u8]) -> FsResult<Option<usize>> {
        self.sink()?;
        Err(FsError::unsupported("read from a write-only channel"))
    }

    fn write(&mut self, buf: &[u8]) -> FsResult<usize> {
        self.sink()?.write_all(buf)?;
        self.position += buf.len() as u64;
        Ok(buf.len())
    }

    fn position(&self) -> FsResult<u64> {
        if self.sink.is_none() {
            return Err(FsError::closed("sink channel"));
        }
        Ok(self.position)
    }

    fn set_position(&mut self, position: u64) -> FsResult<()> {
        self.sink()?;
        require_current_position(self.position, position)
    }

    fn size(&mut self) -> FsResult<Option<u64>> {
        self.sink()?;
        Err(FsError::unsupported("size of a write-only channel"))
    }

    fn flush(&mut self) -> FsResult<()> {
        self.sink()?.flush()?;
        Ok(())
    }

    fn close(&mut self) -> FsResult<()> {
        match self.sink.take() {
            Some(mut sink) => {
                sink.flush()?;
                Ok(())
            }
            None => Ok(()),
        }
    }

    fn is_open(&self) -> bool {
        self.sink.is_some()
    }
}

/// The only visible entity of a write-only namespace
struct WriteOnlyRoot;

impl VirtualFile for WriteOnlyRoot {
    fn name(&self) -> &str {
        ""
    }

    fn size(&self) -> u64 {
        0
    }

    fn permissions(&self) -> Permissions {
        Permissions::all()
    }

    fn open(&self, _options: &OpenOptions) -> FsResult<Box<dyn FileChannel>> {
        Err(FsError::is_a_directory("/"))
    }

    fn as_directory(&self) -> Option<&dyn VirtualDirectory> {
        Some(self)
    }
}

impl VirtualDirectory for WriteOnlyRoot {
    fn find(&self, _name: &str) -> FsResult<Option<Entity>> {
        Ok(None)
    }

    fn children(&self) -> FsResult<Box<dyn Iterator<Item = Entity> + Send>> {
        Ok(Box::new(std::iter::empty()))
    }
}

/// Upload-only filesystem in front of a [`WriteSink`]
pub struct WriteOnlyFileSystem {
    name: String,
    root: Entity,
    sink: Arc<dyn WriteSink>,
    closed: AtomicBool,
}

impl WriteOnlyFileSystem {
    pub fn new(name: impl Into<String>, sink: Arc<dyn WriteSink>) -> Self {
        Self {
            name: name.into(),
            root: Arc::new(WriteOnlyRoot),
            sink,
            closed: AtomicBool::new(false),
        }
    }

    fn ensure_open(&self) -> FsResult<()> {
        if self.closed.load(Ordering::Acquire) {
            Err(FsError::closed(format!("filesystem {}", self.name)))
        } else {
            Ok(())
        }
    }

    /// Only the root exists
    fn root_only(&self, path: &VirtualPath) -> FsResult<()> {
        self.ensure_open()?;
        if path.to_absolute().is_root() {
            Ok(())
        } else {
            Err(FsError::not_found(path.to_string()))
        }
    }
}

/// Reject open options a sequential upload cannot honor
fn validate_write_options(options: &OpenOptions) -> FsResult<()> {
    let rejected = [
        (options.append, "append"),
        (options.read, "read"),
        (options.delete_on_close, "delete_on_close"),
        (options.sparse, "sparse"),
        (options.nofollow, "nofollow"),
    ];
    for (set, name) in rejected {
        if set {
            return Err(FsError::unsupported(format!(
                "open option {} on a write-only filesystem",
                name
            )));
        }
    }
    Ok(())
}

impl PathResolver for WriteOnlyFileSystem {
    fn resolve(&self, path: &VirtualPath) -> FsResult<Entity> {
        self.root_only(path)?;
        Ok(Arc::clone(&self.root))
    }
}

impl Namespace for WriteOnlyFileSystem {
    fn list_children(&self, dir: &VirtualPath) -> FsResult<DirectoryListing> {
        self.root_only(dir)?;
        Ok(DirectoryListing::empty(VirtualPath::root()))
    }

    fn open_for_read(&self, path: &VirtualPath) -> FsResult<Box<dyn FileChannel>> {
        self.ensure_open()?;
        Err(FsError::unsupported(format!(
            "read {} from a write-only filesystem",
            path
        )))
    }

    fn open_for_write(
        &self,
        path: &VirtualPath,
        options: &OpenOptions,
    ) -> FsResult<Box<dyn FileChannel>> {
        self.ensure_open()?;
        validate_write_options(options)?;
        let path = path.to_absolute();
        if path.is_root() {
            return Err(FsError::is_a_directory("/"));
        }
        let sink = self.sink.open(&path)?;
        debug!(fs = %self.name, path = %path, "upload started");
        Ok(Box::new(SinkChannel::new(sink)))
    }
}

impl AttributeReader for WriteOnlyFileSystem {
    fn read_attributes(&self, path: &VirtualPath) -> FsResult<FileAttributes> {
        self.root_only(path)?;
        Ok(attributes_of(self.root.as_ref(), &FixedPrincipals::default()))
    }

    fn check_access(&self, path: &VirtualPath, modes: &[AccessMode]) -> FsResult<()> {
        self.root_only(path)?;
        if modes.contains(&AccessMode::Execute) {
            return Err(FsError::permission_denied(format!("execute {}", path)));
        }
        Ok(())
    }
}

impl AttributeWriter for WriteOnlyFileSystem {
    fn set_permissions(&self, path: &VirtualPath, _permissions: Permissions) -> FsResult<()> {
        Err(FsError::unsupported(format!("set permissions on {}", path)))
    }

    fn set_times(
        &self,
        path: &VirtualPath,
        _modified: Option<SystemTime>,
        _accessed: Option<SystemTime>,
        _created: Option<SystemTime>,
    ) -> FsResult<()> {
        Err(FsError::unsupported(format!("set times on {}", path)))
    }

    fn set_owner(&self, path: &VirtualPath, _owner: Principal) -> FsResult<()> {
        Err(FsError::unsupported(format!("set owner on {}", path)))
    }

    fn set_group(&self, path: &VirtualPath, _group: Principal) -> FsResult<()> {
        Err(FsError::unsupported(format!("set group on {}", path)))
    }
}

impl FileSystem for WriteOnlyFileSystem {
    fn name(&self) -> &str {
        &self.name
    }

    fn close(&self) -> FsResult<()> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            info!(fs = %self.name, "filesystem closed");
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        !self.closed.load(Ordering::Acquire)
    }

    fn is_read_only(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use sluice_core::NO_TIME;
    use std::collections::BTreeMap;
    use std::io;

    /// Collects uploads in memory, committed when the writer is dropped
    #[derive(Default)]
    struct MemorySink {
        files: Arc<Mutex<BTreeMap<String, Vec<u8>>>>,
    }

    struct Upload {
        path: String,
        data: Vec<u8>,
        files: Arc<Mutex<BTreeMap<String, Vec<u8>>>>,
    }

    impl Write for Upload {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.data.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Drop for Upload {
        fn drop(&mut self) {
            self.files
                .lock()
                .insert(self.path.clone(), std::mem::take(&mut self.data));
        }
    }

    impl WriteSink for MemorySink {
        fn open(&self, path: &VirtualPath) -> FsResult<Box<dyn Write + Send>> {
            Ok(Box::new(Upload {
                path: path.to_string(),
                data: Vec::new(),
                files: Arc::clone(&self.files),
            }))
        }
    }

    fn sample() -> (Arc<Mutex<BTreeMap<String, Vec<u8>>>>, WriteOnlyFileSystem) {
        let sink = MemorySink::default();
        let files = Arc::clone(&sink.files);
        (files, WriteOnlyFileSystem::new("drop", Arc::new(sink)))
    }

    fn path(s: &str) -> VirtualPath {
        VirtualPath::parse(s).unwrap()
    }

    #[test]
    fn test_root_attributes() {
        let (_, fs) = sample();
        let attrs = fs.read_attributes(&VirtualPath::root()).unwrap();
        assert!(attrs.is_directory());
        assert_eq!(attrs.size, 0);
        assert_eq!(attrs.permissions, Permissions::all());
        assert_eq!(attrs.owner, Principal::root());
        assert_eq!(attrs.group, Principal::root());
        assert_eq!(attrs.modified, NO_TIME);
        assert_eq!(attrs.created, NO_TIME);
    }

    #[test]
    fn test_nothing_is_visible() {
        let (_, fs) = sample();
        assert_eq!(fs.list_children(&VirtualPath::root()).unwrap().count(), 0);
        assert!(matches!(
            fs.resolve(&path("/anything")),
            Err(FsError::NotFound(_))
        ));
        assert!(matches!(
            fs.read_attributes(&path("/x")),
            Err(FsError::NotFound(_))
        ));
        assert!(matches!(
            fs.open_for_read(&path("/x")),
            Err(FsError::Unsupported(_))
        ));
    }

    #[test]
    fn test_upload_reaches_sink() {
        let (files, fs) = sample();
        let mut ch = fs
            .open_for_write(&path("/upload.bin"), &OpenOptions::for_create())
            .unwrap();
        ch.write(b"abc").unwrap();
        ch.write(b"def").unwrap();
        assert_eq!(ch.position().unwrap(), 6);
        assert!(ch.set_position(6).is_ok());
        assert!(matches!(ch.set_position(0), Err(FsError::Unsupported(_))));
        assert!(matches!(ch.size(), Err(FsError::Unsupported(_))));
        let mut buf = [0u8; 1];
        assert!(matches!(ch.read(&mut buf), Err(FsError::Unsupported(_))));
        ch.close().unwrap();
        ch.close().unwrap();
        drop(ch);

        assert_eq!(files.lock().get("/upload.bin").unwrap(), b"abcdef");
        // still not listable afterwards
        assert_eq!(fs.list_children(&VirtualPath::root()).unwrap().count(), 0);
    }

    #[test]
    fn test_rejected_open_options() {
        let (_, fs) = sample();
        let p = path("/f");
        for options in [
            OpenOptions::for_create().append(true),
            OpenOptions::for_create().read(true),
            OpenOptions::for_create().delete_on_close(true),
            OpenOptions::for_create().sparse(true),
            OpenOptions::for_create().nofollow(true),
        ] {
            assert!(matches!(
                fs.open_for_write(&p, &options),
                Err(FsError::Unsupported(_))
            ));
        }
        assert!(matches!(
            fs.open_for_write(&VirtualPath::root(), &OpenOptions::for_create()),
            Err(FsError::IsADirectory(_))
        ));
    }

    #[test]
    fn test_mutations_unsupported() {
        let (_, fs) = sample();
        let root = VirtualPath::root();
        assert!(fs.set_permissions(&root, Permissions::empty()).is_err());
        assert!(fs.set_owner(&root, Principal::new("x")).is_err());
        assert!(fs.create_directory(&path("/d")).is_err());
        assert!(fs
            .check_access(&root, &[AccessMode::Read, AccessMode::Write])
            .is_ok());
        assert!(fs.check_access(&root, &[AccessMode::Execute]).is_err());
    }

    #[test]
    fn test_close() {
        let (_, fs) = sample();
        fs.close().unwrap();
        assert!(!fs.is_open());
        assert!(matches!(
            fs.open_for_write(&path("/f"), &OpenOptions::for_create()),
            Err(FsError::Closed(_))
        ));
    }
}
