//! Seekable read channel over a reopenable sequential source
//!
//! Forward seeks skip bytes on the current stream, backward seeks reopen the
//! source and skip from the start. Seeks are lazy: nothing happens until the
//! next read.

use std::io::{self, Read};
use std::sync::Arc;

use tracing::trace;

use sluice_core::{FsError, FsResult};

use crate::channel::FileChannel;

/// Opens a fresh stream positioned at byte 0
pub type StreamOpener = Arc<dyn Fn() -> io::Result<Box<dyn Read + Send>> + Send + Sync>;

pub struct SeekableReadChannel {
    opener: StreamOpener,
    stream: Option<Box<dyn Read + Send>>,
    /// Offset of the next byte `stream` yields
    stream_pos: u64,
    position: u64,
    size: Option<u64>,
    open: bool,
}

impl SeekableReadChannel {
    pub fn new(opener: StreamOpener) -> Self {
        Self {
            opener,
            stream: None,
            stream_pos: 0,
            position: 0,
            size: None,
            open: true,
        }
    }

    /// Channel whose size is already known, so `size()` never drains the source
    pub fn with_size(opener: StreamOpener, size: u64) -> Self {
        let mut channel = Self::new(opener);
        channel.size = Some(size);
        channel
    }

    fn ensure_open(&self) -> FsResult<()> {
        if self.open {
            Ok(())
        } else {
            Err(FsError::closed("seekable channel"))
        }
    }

    /// Bring the stream to `self.position`. Returns false if the source ended
    /// before reaching it.
    fn sync_stream(&mut self) -> FsResult<bool> {
        if self.stream.is_none() || self.stream_pos > self.position {
            trace!(from = self.stream_pos, to = self.position, "reopening source");
            self.stream = Some((self.opener)()?);
            self.stream_pos = 0;
        }
        let gap = self.position - self.stream_pos;
        if gap == 0 {
            return Ok(true);
        }
        let stream = match self.stream.as_mut() {
            Some(stream) => stream,
            None => return Ok(false),
        };
        let skipped = skip(stream, gap)?;
        self.stream_pos += skipped;
        Ok(skipped == gap)
    }
}

/// Discard up to `count` bytes, returning how many were actually discarded
fn skip(stream: &mut dyn Read, count: u64) -> io::Result<u64> {
    io::copy(&mut stream.take(count), &mut io::sink())
}

/// Read once, retrying only on `Interrupted`
fn read_once(stream: &mut dyn Read, buf: &mut [u8]) -> io::Result<usize> {
    loop {
        match stream.read(buf) {
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            other => return other,
        }
    }
}

impl FileChannel for SeekableReadChannel {
    fn read(&mut self, buf: &mut [u8]) -> FsResult<Option<usize>> {
        self.ensure_open()?;
        if buf.is_empty() {
            return Ok(Some(0));
        }
        if !self.sync_stream()? {
            return Ok(None);
        }
        let stream = match self.stream.as_mut() {
            Some(stream) => stream,
            None => return Ok(None),
        };
        let n = read_once(stream.as_mut(), buf)?;
        if n == 0 {
            return Ok(None);
        }
        self.stream_pos += n as u64;
        self.position += n as u64;
        Ok(Some(n))
    }

    fn read_at(&mut self, buf: &mut [u8], offset: u64) -> FsResult<Option<usize>> {
        self.ensure_open()?;
        if buf.is_empty() {
            return Ok(Some(0));
        }
        let mut stream = (self.opener)()?;
        if skip(stream.as_mut(), offset)? < offset {
            return Ok(None);
        }
        match read_once(stream.as_mut(), buf)? {
            0 => Ok(None),
            n => Ok(Some(n)),
        }
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

    /// Counted once by draining an independent stream
    fn size(&mut self) -> FsResult<Option<u64>> {
        self.ensure_open()?;
        if self.size.is_none() {
            let mut stream = (self.opener)()?;
            let total = io::copy(stream.as_mut(), &mut io::sink())?;
            self.size = Some(total);
        }
        Ok(self.size)
    }

    fn close(&mut self) -> FsResult<()> {
        self.open = false;
        self.stream = None;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_opener(data: &'static [u8]) -> (StreamOpener, Arc<AtomicUsize>) {
        let opens = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&opens);
        let opener: StreamOpener = Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(io::Cursor::new(data)) as Box<dyn Read + Send>)
        });
        (opener, opens)
    }

    #[test]
    fn test_forward_seek_skips_without_reopen() {
        let (opener, opens) = counting_opener(b"0123456789");
        let mut ch = SeekableReadChannel::new(opener);
        let mut buf = [0u8; 2];

        assert_eq!(ch.read(&mut buf).unwrap(), Some(2));
        assert_eq!(&buf, b"01");
        ch.set_position(6).unwrap();
        assert_eq!(ch.read(&mut buf).unwrap(), Some(2));
        assert_eq!(&buf, b"67");
        assert_eq!(opens.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_backward_seek_reopens() {
        let (opener, opens) = counting_opener(b"0123456789");
        let mut ch = SeekableReadChannel::new(opener);
        let mut buf = [0u8; 3];

        ch.set_position(5).unwrap();
        ch.read(&mut buf).unwrap();
        assert_eq!(&buf, b"567");

        ch.set_position(1).unwrap();
        ch.read(&mut buf).unwrap();
        assert_eq!(&buf, b"123");
        assert_eq!(ch.position().unwrap(), 4);
        assert_eq!(opens.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_seek_past_end_reads_eof() {
        let (opener, _) = counting_opener(b"abc");
        let mut ch = SeekableReadChannel::new(opener);
        let mut buf = [0u8; 3];
        ch.set_position(10).unwrap();
        assert_eq!(ch.read(&mut buf).unwrap(), None);
    }

    #[test]
    fn test_size_is_counted_once() {
        let (opener, opens) = counting_opener(b"abcdef");
        let mut ch = SeekableReadChannel::new(opener);
        assert_eq!(ch.size().unwrap(), Some(6));
        assert_eq!(ch.size().unwrap(), Some(6));
        assert_eq!(opens.load(Ordering::SeqCst), 1);

        let (opener, opens) = counting_opener(b"abcdef");
        let mut known = SeekableReadChannel::with_size(opener, 6);
        assert_eq!(known.size().unwrap(), Some(6));
        assert_eq!(opens.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_read_at_leaves_position() {
        let (opener, _) = counting_opener(b"0123456789");
        let mut ch = SeekableReadChannel::new(opener);
        let mut buf = [0u8; 4];
        ch.read(&mut buf[..1]).unwrap();

        assert_eq!(ch.read_at(&mut buf, 3).unwrap(), Some(4));
        assert_eq!(&buf, b"3456");
        assert_eq!(ch.position().unwrap(), 1);
        assert_eq!(ch.read_at(&mut buf, 10).unwrap(), None);
    }

    #[test]
    fn test_open_failure_propagates() {
        let opener: StreamOpener =
            Arc::new(|| Err(io::Error::new(io::ErrorKind::NotFound, "gone")));
        let mut ch = SeekableReadChannel::new(opener);
        let mut buf = [0u8; 1];
        assert!(matches!(ch.read(&mut buf), Err(FsError::NotFound(_))));
    }
}
