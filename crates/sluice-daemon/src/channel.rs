//! Byte channels handed out by `open_for_read` / `open_for_write`
//!
//! A channel is the protocol layer's view of an open file: read or write at
//! the current position, query the position and (maybe) the size, close.
//! Streaming channels only support sequential access; random-access backends
//! hand out a [`MemoryChannel`] directly.

use std::sync::Arc;

use sluice_core::{FsError, FsResult};

/// An open file
pub trait FileChannel: Send {
    /// Read into `buf` at the current position.
    ///
    /// `None` signals end-of-stream.
    fn read(&mut self, buf: &mut [u8]) -> FsResult<Option<usize>>;

    /// Positional read that leaves the current position untouched
    fn read_at(&mut self, _buf: &mut [u8], _offset: u64) -> FsResult<Option<usize>> {
        Err(FsError::unsupported("positional read"))
    }

    /// Write `buf` at the current position
    fn write(&mut self, buf: &[u8]) -> FsResult<usize>;

    /// Bytes consumed (read channels) or produced (write channels) so far
    fn position(&self) -> FsResult<u64>;

    fn set_position(&mut self, position: u64) -> FsResult<()>;

    /// Total size if known. Never blocks.
    fn size(&mut self) -> FsResult<Option<u64>>;

    fn truncate(&mut self, _size: u64) -> FsResult<()> {
        Err(FsError::unsupported("truncate"))
    }

    fn flush(&mut self) -> FsResult<()> {
        Ok(())
    }

    /// Release the channel. A second close is a no-op.
    fn close(&mut self) -> FsResult<()>;

    fn is_open(&self) -> bool;
}

/// Shared sequential-only `set_position` check
pub(crate) fn require_current_position(current: u64, requested: u64) -> FsResult<()> {
    if current == requested {
        Ok(())
    } else {
        Err(FsError::unsupported(format!(
            "seek from {} to {} on a sequential channel",
            current, requested
        )))
    }
}

/// How a file is opened
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct OpenOptions {
    pub read: bool,
    pub write: bool,
    pub append: bool,
    pub create: bool,
    pub create_new: bool,
    pub truncate: bool,
    pub delete_on_close: bool,
    pub sparse: bool,
    pub nofollow: bool,
}

impl OpenOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Plain read
    pub fn for_read() -> Self {
        Self::new().read(true)
    }

    /// Write creating or truncating the target, the usual upload mode
    pub fn for_create() -> Self {
        Self::new().write(true).create(true).truncate(true)
    }

    pub fn read(mut self, yes: bool) -> Self {
        self.read = yes;
        self
    }

    pub fn write(mut self, yes: bool) -> Self {
        self.write = yes;
        self
    }

    pub fn append(mut self, yes: bool) -> Self {
        self.append = yes;
        self
    }

    pub fn create(mut self, yes: bool) -> Self {
        self.create = yes;
        self
    }

    pub fn create_new(mut self, yes: bool) -> Self {
        self.create_new = yes;
        self
    }

    pub fn truncate(mut self, yes: bool) -> Self {
        self.truncate = yes;
        self
    }

    pub fn delete_on_close(mut self, yes: bool) -> Self {
        self.delete_on_close = yes;
        self
    }

    pub fn sparse(mut self, yes: bool) -> Self {
        self.sparse = yes;
        self
    }

    pub fn nofollow(mut self, yes: bool) -> Self {
        self.nofollow = yes;
        self
    }

    /// Opening with these options (re)creates the file in its parent
    pub fn is_new_file(&self) -> bool {
        self.write && (self.create || self.create_new || self.truncate)
    }
}

/// Random-access read channel over bytes already in memory
pub struct MemoryChannel {
    data: Arc<[u8]>,
    position: u64,
    open: bool,
}

impl MemoryChannel {
    pub fn new(data: Arc<[u8]>) -> Self {
        Self {
            data,
            position: 0,
            open: true,
        }
    }

    fn ensure_open(&self) -> FsResult<()> {
        if self.open {
            Ok(())
        } else {
            Err(FsError::closed("channel"))
        }
    }

    fn copy_from(&self, buf: &mut [u8], offset: u64) -> Option<usize> {
        let len = self.data.len() as u64;
        if offset >= len {
            return if buf.is_empty() { Some(0) } else { None };
        }
        let start = offset as usize;
        let n = buf.len().min(self.data.len() - start);
        buf[..n].copy_from_slice(&self.data[start..start + n]);
        Some(n)
    }
}

impl FileChannel for MemoryChannel {
    fn read(&mut self, buf: &mut [u8]) -> FsResult<Option<usize>> {
        self.ensure_open()?;
        let n = self.copy_from(buf, self.position);
        if let Some(n) = n {
            self.position += n as u64;
        }
        Ok(n)
    }

    fn read_at(&mut self, buf: &mut [u8], offset: u64) -> FsResult<Option<usize>> {
        self.ensure_open()?;
        Ok(self.copy_from(buf, offset))
    }

    fn write(&mut self, _buf: &[u8]) -> FsResult<usize> {
        self.ensure_open()?;
        Err(FsError::unsupported("write to a read-only channel"))
    }

    fn position(&self) -> FsResult<u64> {
        self.ensure_open()?;
        Ok(self.position)
    }

    fn set_position(&mut self, position: u64) -> FsResult<()> {
        self.ensure_open()?;
        self.position = position;
        Ok(())
    }

    fn size(&mut self) -> FsResult<Option<u64>> {
        self.ensure_open()?;
        Ok(Some(self.data.len() as u64))
    }

    fn close(&mut self) -> FsResult<()> {
        self.open = false;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_options_new_file() {
        assert!(OpenOptions::for_create().is_new_file());
        assert!(OpenOptions::new().write(true).create_new(true).is_new_file());
        assert!(!OpenOptions::new().write(true).is_new_file());
        assert!(!OpenOptions::for_read().create(true).is_new_file());
    }

    #[test]
    fn test_memory_channel_random_access() {
        let mut ch = MemoryChannel::new(Arc::from(&b"hello world"[..]));
        let mut buf = [0u8; 5];

        assert_eq!(ch.read(&mut buf).unwrap(), Some(5));
        assert_eq!(&buf, b"hello");
        assert_eq!(ch.position().unwrap(), 5);

        ch.set_position(6).unwrap();
        assert_eq!(ch.read(&mut buf).unwrap(), Some(5));
        assert_eq!(&buf, b"world");
        assert_eq!(ch.read(&mut buf).unwrap(), None);

        assert_eq!(ch.read_at(&mut buf[..3], 2).unwrap(), Some(3));
        assert_eq!(&buf[..3], b"llo");
        assert_eq!(ch.position().unwrap(), 11);
        assert_eq!(ch.size().unwrap(), Some(11));
    }

    #[test]
    fn test_memory_channel_close() {
        let mut ch = MemoryChannel::new(Arc::from(&b"x"[..]));
        assert!(matches!(ch.write(b"y"), Err(FsError::Unsupported(_))));
        ch.close().unwrap();
        ch.close().unwrap();
        assert!(!ch.is_open());
        let mut buf = [0u8; 1];
        assert!(matches!(ch.read(&mut buf), Err(FsError::Closed(_))));
    }

    #[test]
    fn test_require_current_position() {
        assert!(require_current_position(4, 4).is_ok());
        assert!(matches!(
            require_current_position(4, 0),
            Err(FsError::Unsupported(_))
        ));
    }
}
