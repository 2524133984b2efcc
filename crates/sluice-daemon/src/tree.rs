//! In-memory tree namespace
//!
//! Directories hold their children in a sorted map. File content is either a
//! byte buffer (served through a random-access [`MemoryChannel`]) or a
//! generator that streams bytes on demand (served through a
//! [`PipeReadChannel`]). Writes that create or truncate a file go through a
//! [`PipeWriteChannel`]; in-place edits of an existing file are buffered.

use std::collections::BTreeMap;
use std::io::{self, Read, Write};
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::RwLock;
use tracing::debug;

use sluice_core::path::validate_filename;
use sluice_core::{FsError, FsResult, Permissions, Principal, DEFAULT_PIPE_CAPACITY};

use crate::buffered::BufferedWriteChannel;
use crate::channel::{FileChannel, MemoryChannel, OpenOptions};
use crate::entity::{Entity, VirtualDirectory, VirtualFile};
use crate::stream_channel::{PipeReadChannel, PipeWriteChannel};

/// Streams a file's content into the given writer
pub type Generator = Arc<dyn Fn(&mut dyn Write) -> io::Result<()> + Send + Sync>;

/// Content of a tree file
#[derive(Clone)]
pub enum Content {
    Bytes(Arc<[u8]>),
    Generated {
        generator: Generator,
        /// Length if known up front
        size: Option<u64>,
    },
}

impl Content {
    fn size(&self) -> u64 {
        match self {
            Content::Bytes(bytes) => bytes.len() as u64,
            Content::Generated { size, .. } => size.unwrap_or(0),
        }
    }
}

#[derive(Clone, Debug)]
struct Meta {
    permissions: Permissions,
    modified: Option<SystemTime>,
    accessed: Option<SystemTime>,
    created: Option<SystemTime>,
    owner: Option<Principal>,
    group: Option<Principal>,
}

impl Meta {
    fn new(permissions: Permissions) -> Self {
        let now = SystemTime::now();
        Self {
            permissions,
            modified: Some(now),
            accessed: Some(now),
            created: Some(now),
            owner: None,
            group: None,
        }
    }
}

/// Attribute setters shared by files and directories
macro_rules! meta_accessors {
    () => {
        fn permissions(&self) -> Permissions {
            self.meta.read().permissions
        }

        fn modified(&self) -> Option<SystemTime> {
            self.meta.read().modified
        }

        fn accessed(&self) -> Option<SystemTime> {
            self.meta.read().accessed
        }

        fn created(&self) -> Option<SystemTime> {
            self.meta.read().created
        }

        fn owner(&self) -> Option<Principal> {
            self.meta.read().owner.clone()
        }

        fn group(&self) -> Option<Principal> {
            self.meta.read().group.clone()
        }

        fn set_permissions(&self, permissions: Permissions) -> FsResult<()> {
            self.meta.write().permissions = permissions;
            Ok(())
        }

        fn set_times(
            &self,
            modified: Option<SystemTime>,
            accessed: Option<SystemTime>,
            created: Option<SystemTime>,
        ) -> FsResult<()> {
            let mut meta = self.meta.write();
            if modified.is_some() {
                meta.modified = modified;
            }
            if accessed.is_some() {
                meta.accessed = accessed;
            }
            if created.is_some() {
                meta.created = created;
            }
            Ok(())
        }

        fn set_owner(&self, owner: Principal) -> FsResult<()> {
            self.meta.write().owner = Some(owner);
            Ok(())
        }

        fn set_group(&self, group: Principal) -> FsResult<()> {
            self.meta.write().group = Some(group);
            Ok(())
        }
    };
}

/// File node of the tree
pub struct TreeFile {
    name: String,
    meta: Arc<RwLock<Meta>>,
    content: Arc<RwLock<Content>>,
    pipe_capacity: usize,
}

impl TreeFile {
    pub fn new(name: impl Into<String>, content: Content) -> Self {
        Self::with_pipe_capacity(name, content, DEFAULT_PIPE_CAPACITY)
    }

    pub fn with_pipe_capacity(name: impl Into<String>, content: Content, pipe_capacity: usize) -> Self {
        Self {
            name: name.into(),
            meta: Arc::new(RwLock::new(Meta::new(Permissions::FILE_DEFAULT))),
            content: Arc::new(RwLock::new(content)),
            pipe_capacity,
        }
    }

    /// Snapshot of the current content
    pub fn content(&self) -> Content {
        self.content.read().clone()
    }

    /// Current bytes, draining a generator if needed
    pub fn read_all(&self) -> io::Result<Vec<u8>> {
        match self.content() {
            Content::Bytes(bytes) => Ok(bytes.to_vec()),
            Content::Generated { generator, .. } => {
                let mut out = Vec::new();
                generator(&mut out as &mut dyn Write)?;
                Ok(out)
            }
        }
    }

    fn open_read(&self) -> FsResult<Box<dyn FileChannel>> {
        match self.content() {
            Content::Bytes(bytes) => Ok(Box::new(MemoryChannel::new(bytes))),
            Content::Generated { generator, .. } => {
                let channel = PipeReadChannel::spawn(&self.name, self.pipe_capacity, move |w| {
                    generator(w as &mut dyn Write)
                })?;
                Ok(Box::new(channel))
            }
        }
    }

    /// Replace the content with whatever is streamed in before close
    fn open_replace(&self) -> FsResult<Box<dyn FileChannel>> {
        let content = Arc::clone(&self.content);
        let meta = Arc::clone(&self.meta);
        let name = self.name.clone();
        let channel = PipeWriteChannel::spawn(&self.name, self.pipe_capacity, move |r| {
            let mut bytes = Vec::new();
            r.read_to_end(&mut bytes)?;
            debug!(file = %name, bytes = bytes.len(), "content replaced");
            *content.write() = Content::Bytes(Arc::from(bytes));
            meta.write().modified = Some(SystemTime::now());
            Ok(())
        })?;
        Ok(Box::new(channel))
    }

    /// Edit the existing content in memory, committed on close
    fn open_edit(&self, append: bool) -> FsResult<Box<dyn FileChannel>> {
        let existing = self.read_all()?;
        let end = existing.len() as u64;
        let content = Arc::clone(&self.content);
        let meta = Arc::clone(&self.meta);
        let mut channel = BufferedWriteChannel::with_contents(
            existing,
            Box::new(move |bytes: Vec<u8>| {
                *content.write() = Content::Bytes(Arc::from(bytes));
                meta.write().modified = Some(SystemTime::now());
                Ok(())
            }),
        );
        if append {
            channel.set_position(end)?;
        }
        Ok(Box::new(channel))
    }
}

impl VirtualFile for TreeFile {
    fn name(&self) -> &str {
        &self.name
    }

    fn size(&self) -> u64 {
        self.content.read().size()
    }

    meta_accessors!();

    fn open(&self, options: &OpenOptions) -> FsResult<Box<dyn FileChannel>> {
        if !options.write {
            return self.open_read();
        }
        if options.read {
            return Err(FsError::unsupported("read-write channels"));
        }
        // freshly created files go through `TreeDirectory::create_file`
        if options.truncate {
            self.open_replace()
        } else {
            self.open_edit(options.append)
        }
    }
}

/// Directory node of the tree
pub struct TreeDirectory {
    name: String,
    meta: RwLock<Meta>,
    children: RwLock<BTreeMap<String, Entity>>,
    pipe_capacity: usize,
}

impl TreeDirectory {
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Self::with_pipe_capacity(name, DEFAULT_PIPE_CAPACITY)
    }

    pub fn with_pipe_capacity(name: impl Into<String>, pipe_capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            meta: RwLock::new(Meta::new(Permissions::DIR_DEFAULT)),
            children: RwLock::new(BTreeMap::new()),
            pipe_capacity,
        })
    }

    /// Insert or replace a child
    pub fn insert(&self, entity: Entity) {
        let name = entity.name().to_string();
        self.children.write().insert(name, entity);
        self.meta.write().modified = Some(SystemTime::now());
    }

    pub fn remove(&self, name: &str) -> Option<Entity> {
        let removed = self.children.write().remove(name);
        if removed.is_some() {
            self.meta.write().modified = Some(SystemTime::now());
        }
        removed
    }

    pub fn add_file(&self, name: &str, bytes: impl Into<Vec<u8>>) -> Arc<TreeFile> {
        let bytes: Vec<u8> = bytes.into();
        let content = Content::Bytes(Arc::from(bytes));
        self.add_content(name, content)
    }

    /// File whose content is produced by `generator` each time it is opened
    pub fn add_generated(
        &self,
        name: &str,
        size: Option<u64>,
        generator: Generator,
    ) -> Arc<TreeFile> {
        self.add_content(name, Content::Generated { generator, size })
    }

    fn add_content(&self, name: &str, content: Content) -> Arc<TreeFile> {
        let file = Arc::new(TreeFile::with_pipe_capacity(name, content, self.pipe_capacity));
        self.insert(file.clone());
        file
    }

    pub fn add_directory(&self, name: &str) -> Arc<TreeDirectory> {
        let dir = TreeDirectory::with_pipe_capacity(name, self.pipe_capacity);
        self.insert(dir.clone());
        dir
    }

    /// Snapshot of the children in name order
    pub fn children_iter(&self) -> Box<dyn Iterator<Item = Entity> + Send> {
        let snapshot: Vec<Entity> = self.children.read().values().cloned().collect();
        Box::new(snapshot.into_iter())
    }
}

impl VirtualFile for TreeDirectory {
    fn name(&self) -> &str {
        &self.name
    }

    fn size(&self) -> u64 {
        0
    }

    meta_accessors!();

    fn open(&self, _options: &OpenOptions) -> FsResult<Box<dyn FileChannel>> {
        Err(FsError::is_a_directory(self.name.clone()))
    }

    fn as_directory(&self) -> Option<&dyn VirtualDirectory> {
        Some(self)
    }
}

impl VirtualDirectory for TreeDirectory {
    fn find(&self, name: &str) -> FsResult<Option<Entity>> {
        Ok(self.children.read().get(name).cloned())
    }

    fn children(&self) -> FsResult<Box<dyn Iterator<Item = Entity> + Send>> {
        Ok(self.children_iter())
    }

    fn create_file(&self, name: &str, options: &OpenOptions) -> FsResult<Box<dyn FileChannel>> {
        validate_filename(name)?;
        if let Some(existing) = self.find(name)? {
            if existing.is_directory() {
                return Err(FsError::is_a_directory(name));
            }
            if options.create_new {
                return Err(FsError::already_exists(name));
            }
            // existing file: reuse its node so open handles see the new bytes
            return existing.open(options);
        }

        let file = Arc::new(TreeFile::with_pipe_capacity(
            name,
            Content::Bytes(Arc::from(Vec::new())),
            self.pipe_capacity,
        ));
        let channel = file.open_replace()?;
        self.insert(file);
        debug!(dir = %self.name, file = %name, "file created");
        Ok(channel)
    }
}
