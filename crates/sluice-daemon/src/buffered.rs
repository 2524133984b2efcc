//! Write channel that keeps everything in memory until close
//!
//! Used for backends that need the whole content at once. The completion
//! callback runs on the first close only.

use std::io;

use sluice_core::{FsError, FsResult};

use crate::channel::FileChannel;

/// Largest content a buffered channel will hold (1 GiB)
pub const MAX_BUFFERED_SIZE: u64 = 1 << 30;

/// Receives the accumulated bytes when the channel is closed
pub type OnClose = Box<dyn FnOnce(Vec<u8>) -> FsResult<()> + Send>;

pub struct BufferedWriteChannel {
    buffer: Vec<u8>,
    position: u64,
    limit: u64,
    on_close: Option<OnClose>,
}

impl BufferedWriteChannel {
    pub fn new(on_close: OnClose) -> Self {
        Self {
            buffer: Vec::new(),
            position: 0,
            limit: MAX_BUFFERED_SIZE,
            on_close: Some(on_close),
        }
    }

    /// Start from existing content, positioned at its start
    pub fn with_contents(contents: Vec<u8>, on_close: OnClose) -> Self {
        Self {
            buffer: contents,
            position: 0,
            limit: MAX_BUFFERED_SIZE,
            on_close: Some(on_close),
        }
    }

    /// Cap the content size; writes or seeks past it fail
    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = limit;
        self
    }

    fn check_limit(&self, end: u64) -> FsResult<()> {
        if end > self.limit {
            return Err(FsError::Io {
                kind: io::ErrorKind::InvalidInput,
                message: format!("offset {} exceeds buffered limit of {} bytes", end, self.limit),
            });
        }
        Ok(())
    }

    fn ensure_open(&self) -> FsResult<()> {
        if self.on_close.is_some() {
            Ok(())
        } else {
            Err(FsError::closed("buffered channel"))
        }
    }
}

impl FileChannel for BufferedWriteChannel {
    fn read(&mut self, _buf: &mut [u8]) -> FsResult<Option<usize>> {
        self.ensure_open()?;
        Err(FsError::unsupported("read from a write channel"))
    }

    fn write(&mut self, buf: &[u8]) -> FsResult<usize> {
        self.ensure_open()?;
        let end = self
            .position
            .checked_add(buf.len() as u64)
            .ok_or_else(|| FsError::unsupported("write past the largest offset"))?;
        self.check_limit(end)?;
        let start = self.position as usize;
        let end = end as usize;
        if self.buffer.len() < end {
            // gaps left by seeking past the end read back as zeros
            self.buffer.resize(end, 0);
        }
        self.buffer[start..end].copy_from_slice(buf);
        self.position = end as u64;
        Ok(buf.len())
    }

    fn position(&self) -> FsResult<u64> {
        self.ensure_open()?;
        Ok(self.position)
    }

    fn set_position(&mut self, position: u64) -> FsResult<()> {
        self.ensure_open()?;
        self.check_limit(position)?;
        self.position = position;
        Ok(())
    }

    fn size(&mut self) -> FsResult<Option<u64>> {
        self.ensure_open()?;
        Ok(Some(self.buffer.len() as u64))
    }

    fn truncate(&mut self, size: u64) -> FsResult<()> {
        self.ensure_open()?;
        if size < self.buffer.len() as u64 {
            self.buffer.truncate(size as usize);
        }
        self.position = self.position.min(size);
        Ok(())
    }

    fn close(&mut self) -> FsResult<()> {
        match self.on_close.take() {
            Some(on_close) => on_close(std::mem::take(&mut self.buffer)),
            None => Ok(()),
        }
    }

    fn is_open(&self) -> bool {
        self.on_close.is_some()
    }
}

impl Drop for BufferedWriteChannel {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
