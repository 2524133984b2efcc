//! Bounded byte pipe between one producer thread and one consumer thread
//!
//! The pipe is a fixed ring buffer guarded by a mutex with two condition
//! variables. Writers block while the ring is full, readers block while it is
//! empty. Both sides wait in a timed loop and re-check the closed flag on every
//! tick, so a missed notification costs at most one tick.
//!
//! ```text
//! producer ──write──► [ ring: read_pos ... write_pos ] ──read──► consumer
//!                       0 <= write_pos - read_pos <= capacity
//! ```
//!
//! Closing is the only cancellation primitive: it wakes both sides, makes
//! pending and future writes fail, and lets readers drain what is left before
//! they see end-of-stream.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::trace;

use sluice_core::{FsError, FsResult};

/// How long a blocked side sleeps before re-checking the pipe state
pub const WAIT_TICK: Duration = Duration::from_millis(100);

struct PipeState {
    buffer: Box<[u8]>,
    write_pos: u64,
    read_pos: u64,
    closed: bool,
}

impl PipeState {
    fn capacity(&self) -> usize {
        self.buffer.len()
    }

    /// Free bytes in the ring
    fn writable(&self) -> usize {
        let used = (self.write_pos - self.read_pos) as usize;
        self.capacity() - used
    }

    /// Buffered bytes not yet read
    fn readable(&self) -> usize {
        (self.write_pos - self.read_pos) as usize
    }
}

struct Shared {
    state: Mutex<PipeState>,
    can_read: Condvar,
    can_write: Condvar,
}

/// Fixed-capacity blocking byte pipe.
///
/// Cloning produces another handle to the same pipe.
#[derive(Clone)]
pub struct BoundedPipe {
    shared: Arc<Shared>,
}

impl BoundedPipe {
    /// Create a pipe holding at most `capacity` bytes (at least one)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(PipeState {
                    buffer: vec![0u8; capacity].into_boxed_slice(),
                    write_pos: 0,
                    read_pos: 0,
                    closed: false,
                }),
                can_read: Condvar::new(),
                can_write: Condvar::new(),
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.shared.state.lock().capacity()
    }

    pub fn is_open(&self) -> bool {
        !self.shared.state.lock().closed
    }

    /// Total bytes ever written
    pub fn write_position(&self) -> u64 {
        self.shared.state.lock().write_pos
    }

    /// Total bytes ever read
    pub fn read_position(&self) -> u64 {
        self.shared.state.lock().read_pos
    }

    /// Bytes currently buffered
    pub fn available(&self) -> usize {
        self.shared.state.lock().readable()
    }

    /// Write all of `src`, blocking whenever the ring is full.
    ///
    /// Fails with `Closed` if the pipe is closed before every byte was
    /// accepted.
    pub fn write(&self, src: &[u8]) -> FsResult<usize> {
        let mut state = self.shared.state.lock();
        if state.closed {
            return Err(FsError::closed("cannot write to a closed pipe"));
        }
        let mut written = 0;
        while written < src.len() {
            written += self.write_some(&mut state, &src[written..])?;
        }
        Ok(written)
    }

    fn write_some(&self, state: &mut MutexGuard<'_, PipeState>, src: &[u8]) -> FsResult<usize> {
        // wait until there is room in the ring
        while state.writable() == 0 && !state.closed {
            self.shared.can_write.wait_for(state, WAIT_TICK);
        }
        if state.closed {
            return Err(FsError::closed("cannot write to a closed pipe"));
        }

        // copy what fits, in at most two pieces
        let to_write = src.len().min(state.writable());
        let capacity = state.capacity();
        let pos = (state.write_pos % capacity as u64) as usize;
        let first = to_write.min(capacity - pos);
        state.buffer[pos..pos + first].copy_from_slice(&src[..first]);
        state.buffer[..to_write - first].copy_from_slice(&src[first..to_write]);
        state.write_pos += to_write as u64;

        trace!(bytes = to_write, write_pos = state.write_pos, "pipe write");
        if state.readable() > 0 {
            self.shared.can_read.notify_one();
        }
        Ok(to_write)
    }

    /// Read up to `dst.len()` bytes, blocking while the pipe is empty.
    ///
    /// Returns `None` once the pipe is closed and fully drained. An empty
    /// `dst` returns `Some(0)` immediately.
    pub fn read(&self, dst: &mut [u8]) -> FsResult<Option<usize>> {
        if dst.is_empty() {
            return Ok(Some(0));
        }

        let mut state = self.shared.state.lock();
        while state.readable() == 0 && !state.closed {
            self.shared.can_read.wait_for(&mut state, WAIT_TICK);
        }

        let readable = state.readable();
        if readable == 0 {
            // closed and drained
            return Ok(None);
        }

        let to_read = dst.len().min(readable);
        let capacity = state.capacity();
        let pos = (state.read_pos % capacity as u64) as usize;
        let first = to_read.min(capacity - pos);
        dst[..first].copy_from_slice(&state.buffer[pos..pos + first]);
        dst[first..to_read].copy_from_slice(&state.buffer[..to_read - first]);
        state.read_pos += to_read as u64;

        trace!(bytes = to_read, read_pos = state.read_pos, "pipe read");
        if state.writable() > 0 {
            self.shared.can_write.notify_one();
        }
        Ok(Some(to_read))
    }

    /// Close the pipe and wake every waiter. Idempotent.
    pub fn close(&self) {
        let mut state = self.shared.state.lock();
        if !state.closed {
            state.closed = true;
            trace!(
                buffered = state.readable(),
                written = state.write_pos,
                "pipe closed"
            );
        }
        self.shared.can_read.notify_all();
        self.shared.can_write.notify_all();
    }

    /// `io::Write` end of the pipe; closes the pipe when dropped
    pub fn writer(&self) -> PipeWriter {
        PipeWriter { pipe: self.clone() }
    }

    /// `io::Read` end of the pipe; closes the pipe when dropped
    pub fn reader(&self) -> PipeReader {
        PipeReader { pipe: self.clone() }
    }
}

impl std::fmt::Debug for BoundedPipe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("BoundedPipe")
            .field("capacity", &state.capacity())
            .field("write_pos", &state.write_pos)
            .field("read_pos", &state.read_pos)
            .field("closed", &state.closed)
            .finish()
    }
}

/// Producer end handed to background transfers
pub struct PipeWriter {
    pipe: BoundedPipe,
}

impl io::Write for PipeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(self.pipe.write(buf)?)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for PipeWriter {
    fn drop(&mut self) {
        self.pipe.close();
    }
}

/// Consumer end handed to background transfers
pub struct PipeReader {
    pipe: BoundedPipe,
}

impl io::Read for PipeReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Ok(self.pipe.read(buf)?.unwrap_or(0))
    }
}

impl Drop for PipeReader {
    fn drop(&mut self) {
        self.pipe.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::bounded;
    use std::io::{Read, Write};
    use std::thread;

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 31 % 251) as u8).collect()
    }

    /// Write `data` in `chunk`-sized pieces from one thread, read with
    /// `read_chunk` from another until end-of-stream.
    fn pump(capacity: usize, data: &[u8], chunk: usize, read_chunk: usize) -> Vec<u8> {
        let pipe = BoundedPipe::new(capacity);
        let writer = pipe.clone();
        let input = data.to_vec();
        let producer = thread::spawn(move || {
            for piece in input.chunks(chunk) {
                assert_eq!(writer.write(piece).unwrap(), piece.len());
            }
            writer.close();
        });

        let mut out = Vec::new();
        let mut buf = vec![0u8; read_chunk];
        while let Some(n) = pipe.read(&mut buf).unwrap() {
            assert!(n <= capacity);
            out.extend_from_slice(&buf[..n]);
        }
        producer.join().unwrap();
        out
    }

    #[test]
    fn test_fifo_across_capacities_and_chunkings() {
        let data = pattern(10_000);
        for capacity in [1, 3, 7, 64, 4096, 20_000] {
            for (chunk, read_chunk) in [(1, 1), (5, 3), (333, 1000), (10_000, 17)] {
                let out = pump(capacity, &data, chunk, read_chunk);
                assert_eq!(
                    out, data,
                    "capacity {} chunk {} read_chunk {}",
                    capacity, chunk, read_chunk
                );
            }
        }
    }

    #[test]
    fn test_wrap_around_single_thread() {
        let pipe = BoundedPipe::new(8);
        let mut buf = [0u8; 8];

        assert_eq!(pipe.write(b"abcdef").unwrap(), 6);
        assert_eq!(pipe.read(&mut buf[..4]).unwrap(), Some(4));
        assert_eq!(&buf[..4], b"abcd");

        // 2 buffered, 6 free, write crosses the end of the ring
        assert_eq!(pipe.write(b"ghijkl").unwrap(), 6);
        assert_eq!(pipe.available(), 8);
        assert_eq!(pipe.read(&mut buf).unwrap(), Some(8));
        assert_eq!(&buf, b"efghijkl");
        assert_eq!(pipe.write_position(), 12);
        assert_eq!(pipe.read_position(), 12);
    }

    #[test]
    fn test_read_blocks_until_write() {
        let pipe = BoundedPipe::new(16);
        let reader = pipe.clone();
        let (tx, rx) = bounded(1);

        let handle = thread::spawn(move || {
            let mut buf = [0u8; 4];
            let n = reader.read(&mut buf).unwrap();
            tx.send((n, buf)).unwrap();
        });

        // Nothing written yet: the reader must still be waiting
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());

        pipe.write(b"ping").unwrap();
        let (n, buf) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(n, Some(4));
        assert_eq!(&buf, b"ping");
        handle.join().unwrap();
    }

    #[test]
    fn test_write_blocks_until_read() {
        let pipe = BoundedPipe::new(4);
        pipe.write(b"full").unwrap();

        let writer = pipe.clone();
        let (tx, rx) = bounded(1);
        let handle = thread::spawn(move || {
            let n = writer.write(b"more").unwrap();
            tx.send(n).unwrap();
        });

        // Ring is full: the writer must still be waiting
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());

        let mut buf = [0u8; 4];
        assert_eq!(pipe.read(&mut buf).unwrap(), Some(4));
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 4);
        handle.join().unwrap();

        assert_eq!(pipe.read(&mut buf).unwrap(), Some(4));
        assert_eq!(&buf, b"more");
    }

    #[test]
    fn test_close_drains_then_single_eof() {
        let pipe = BoundedPipe::new(32);
        pipe.write(b"0123456789").unwrap();
        pipe.close();

        let mut buf = [0u8; 4];
        let mut total = 0;
        let mut eofs = 0;
        loop {
            match pipe.read(&mut buf).unwrap() {
                Some(n) => total += n,
                None => {
                    eofs += 1;
                    break;
                }
            }
        }
        assert_eq!(total, 10);
        assert_eq!(eofs, 1);

        // Still end-of-stream afterwards, never blocks
        assert_eq!(pipe.read(&mut buf).unwrap(), None);
    }

    #[test]
    fn test_write_after_close_fails() {
        let pipe = BoundedPipe::new(8);
        pipe.close();
        pipe.close();
        assert!(!pipe.is_open());
        assert!(matches!(pipe.write(b"x"), Err(FsError::Closed(_))));
    }

    #[test]
    fn test_close_unblocks_reader_and_writer() {
        let pipe = BoundedPipe::new(2);
        pipe.write(b"xx").unwrap();

        let writer = pipe.clone();
        let blocked_writer = thread::spawn(move || writer.write(b"yy"));

        let empty = BoundedPipe::new(2);
        let reader = empty.clone();
        let blocked_reader = thread::spawn(move || {
            let mut buf = [0u8; 1];
            reader.read(&mut buf)
        });

        thread::sleep(Duration::from_millis(50));
        pipe.close();
        empty.close();

        assert!(matches!(
            blocked_writer.join().unwrap(),
            Err(FsError::Closed(_))
        ));
        assert_eq!(blocked_reader.join().unwrap().unwrap(), None);
    }

    #[test]
    fn test_empty_read_does_not_block() {
        let pipe = BoundedPipe::new(4);
        let mut empty: [u8; 0] = [];
        assert_eq!(pipe.read(&mut empty).unwrap(), Some(0));
    }

    #[test]
    fn test_io_adapters_close_on_drop() {
        let pipe = BoundedPipe::new(5);
        let mut writer = pipe.writer();
        let producer = thread::spawn(move || {
            writer.write_all(b"hello world, through a tiny ring").unwrap();
            // dropping the writer closes the pipe
        });

        let mut out = String::new();
        pipe.reader().read_to_string(&mut out).unwrap();
        producer.join().unwrap();
        assert_eq!(out, "hello world, through a tiny ring");
        assert!(!pipe.is_open());
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let pipe = BoundedPipe::new(0);
        assert_eq!(pipe.capacity(), 1);
    }
}
