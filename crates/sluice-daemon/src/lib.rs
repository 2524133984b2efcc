//! Sluice Daemon - Streaming channels, cached namespaces and request admission
//!
//! This crate provides:
//! - A bounded blocking byte pipe and the channel adapters built on it
//! - Virtual namespaces (in-memory tree, host directory, write-only upload)
//! - A single-flight path cache in front of every tree namespace
//! - An admission throttle and a mount registry behind [`FileService`]
//!
//! # Architecture
//!
//! Backends that can only stream are bridged to channel semantics with a
//! worker thread per open channel:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │             Protocol thread (per request)                   │
//! │  throttle permit -> registry -> path cache -> open channel  │
//! └─────────────────────────────┬───────────────────────────────┘
//!                               │ BoundedPipe
//!                               │ (fixed ring, blocking both ways)
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │             Transfer worker (per streaming channel)         │
//! │  producer writes into the pipe / consumer drains it         │
//! │  joined when the channel closes                             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Closing is the only cancellation primitive: it unblocks both sides of a
//! pipe, and every blocking wait re-checks its closed flag on a short tick.

pub mod buffered;
pub mod cache;
pub mod channel;
pub mod entity;
pub mod filesystem;
pub mod listing;
pub mod local;
pub mod pipe;
pub mod registry;
pub mod seekable;
pub mod service;
pub mod stream_channel;
pub mod throttle;
pub mod tree;
pub mod write_only;

pub use buffered::BufferedWriteChannel;
pub use cache::{CacheStatsSnapshot, PathCache};
pub use channel::{FileChannel, MemoryChannel, OpenOptions};
pub use entity::{Entity, VirtualDirectory, VirtualFile};
pub use filesystem::{
    AttributeMap, AttributeReader, AttributeWriter, FileSystem, FixedPrincipals, Namespace,
    PathResolver, PrincipalLookup, VirtualFileSystem,
};
pub use listing::{DirEntry, DirectoryListing};
pub use local::{local_filesystem, LocalDirectory, LocalFile};
pub use pipe::{BoundedPipe, PipeReader, PipeWriter};
pub use registry::MountRegistry;
pub use seekable::{SeekableReadChannel, StreamOpener};
pub use service::FileService;
pub use stream_channel::{PipeReadChannel, PipeWriteChannel};
pub use throttle::{AdmissionThrottle, Permit};
pub use tree::{Content, Generator, TreeDirectory, TreeFile};
pub use write_only::{SinkChannel, WriteOnlyFileSystem, WriteSink};

/// URI scheme of mounted namespaces
pub const URI_SCHEME: &str = "sluice";

/// Build the mount URI for a share name
pub fn mount_uri(name: &str) -> String {
    format!("{}://{}", URI_SCHEME, name)
}
