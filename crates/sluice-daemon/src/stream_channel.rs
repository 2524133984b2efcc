//! Streaming channel adapters
//!
//! Backends that can only produce or consume a byte stream are exposed as
//! channels by running the transfer on a background worker thread connected
//! through a [`BoundedPipe`]:
//!
//! ```text
//! read:   producer (worker) ──► pipe ──► PipeReadChannel::read (caller)
//! write:  PipeWriteChannel::write (caller) ──► pipe ──► consumer (worker)
//! ```
//!
//! Closing a channel closes the pipe and then joins the worker. A failure of
//! the worker is recorded and returned from the next read or write on the
//! channel (and from the first close of a write channel). A read channel
//! closed early stops its producer; the resulting write error is not a
//! failure.

use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;
use tracing::{debug, warn};

use sluice_core::{FsError, FsResult};

use crate::channel::{require_current_position, FileChannel};
use crate::pipe::{BoundedPipe, PipeReader, PipeWriter};

#[derive(Default)]
struct TransferStatus {
    failure: Option<FsError>,
    finished: bool,
    cancelled: bool,
}

/// Background transfer thread shared by both adapters
struct Worker {
    name: String,
    status: Arc<Mutex<TransferStatus>>,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    /// Run `body` against the pipe end `end` on a new thread. The end is
    /// dropped (closing the pipe) only after the outcome is recorded.
    fn spawn<T, F>(name: &str, mut end: T, body: F) -> FsResult<Self>
    where
        T: Send + 'static,
        F: FnOnce(&mut T) -> io::Result<()> + Send + 'static,
    {
        let status = Arc::new(Mutex::new(TransferStatus::default()));
        let worker_status = Arc::clone(&status);
        let thread_name = name.to_string();

        let handle = thread::Builder::new()
            .name(format!("sluice-{}", name))
            .spawn(move || {
                debug!(transfer = %thread_name, "transfer started");
                // a panic must be recorded before `end` closes the pipe
                let result = panic::catch_unwind(AssertUnwindSafe(|| body(&mut end)))
                    .unwrap_or_else(|_| {
                        Err(io::Error::new(
                            io::ErrorKind::Other,
                            format!("transfer {} panicked", thread_name),
                        ))
                    });
                let mut status = worker_status.lock();
                match result {
                    Ok(()) => {
                        status.finished = true;
                        debug!(transfer = %thread_name, "transfer finished");
                    }
                    Err(e) if status.cancelled => {
                        debug!(transfer = %thread_name, "transfer cancelled: {}", e);
                    }
                    Err(e) => {
                        warn!(transfer = %thread_name, "transfer failed: {}", e);
                        status.failure = Some(FsError::from(e));
                    }
                }
                drop(status);
                drop(end);
            })?;

        Ok(Self {
            name: name.to_string(),
            status,
            handle: Some(handle),
        })
    }

    fn failure(&self) -> Option<FsError> {
        self.status.lock().failure.clone()
    }

    fn is_finished(&self) -> bool {
        self.status.lock().finished
    }

    fn cancel(&self) {
        self.status.lock().cancelled = true;
    }

    /// Wait for the worker thread to exit
    fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!(transfer = %self.name, "transfer thread panicked");
                let mut status = self.status.lock();
                if status.failure.is_none() {
                    status.failure = Some(FsError::Io {
                        kind: io::ErrorKind::Other,
                        message: format!("transfer {} panicked", self.name),
                    });
                }
            }
        }
    }
}

/// Read channel fed by a background producer
pub struct PipeReadChannel {
    pipe: BoundedPipe,
    worker: Worker,
    position: u64,
    open: bool,
}

impl PipeReadChannel {
    /// Start `producer` on a worker thread writing into a fresh pipe of
    /// `capacity` bytes. Returning from the producer ends the stream.
    pub fn spawn<F>(name: &str, capacity: usize, producer: F) -> FsResult<Self>
    where
        F: FnOnce(&mut PipeWriter) -> io::Result<()> + Send + 'static,
    {
        let pipe = BoundedPipe::new(capacity);
        let worker = Worker::spawn(name, pipe.writer(), producer)?;
        Ok(Self {
            pipe,
            worker,
            position: 0,
            open: true,
        })
    }

    fn ensure_open(&self) -> FsResult<()> {
        if self.open {
            Ok(())
        } else {
            Err(FsError::closed("read channel"))
        }
    }
}

impl FileChannel for PipeReadChannel {
    fn read(&mut self, buf: &mut [u8]) -> FsResult<Option<usize>> {
        self.ensure_open()?;
        if let Some(failure) = self.worker.failure() {
            return Err(failure);
        }
        match self.pipe.read(buf)? {
            Some(n) => {
                self.position += n as u64;
                Ok(Some(n))
            }
            None => match self.worker.failure() {
                // a failing producer closes the pipe; don't report a clean end
                Some(failure) => Err(failure),
                None => Ok(None),
            },
        }
    }

    fn write(&mut self, _buf: &[u8]) -> FsResult<usize> {
        self.ensure_open()?;
        Err(FsError::unsupported("write to a read channel"))
    }

    fn position(&self) -> FsResult<u64> {
        self.ensure_open()?;
        Ok(self.position)
    }

    fn set_position(&mut self, position: u64) -> FsResult<()> {
        self.ensure_open()?;
        require_current_position(self.position, position)
    }

    /// Unknown while the producer runs, the produced byte count afterwards
    fn size(&mut self) -> FsResult<Option<u64>> {
        self.ensure_open()?;
        if self.worker.is_finished() {
            Ok(Some(self.pipe.write_position()))
        } else {
            Ok(None)
        }
    }

    fn close(&mut self) -> FsResult<()> {
        if !self.open {
            return Ok(());
        }
        self.open = false;
        self.worker.cancel();
        self.pipe.close();
        self.worker.join();
        debug!(
            transfer = %self.worker.name,
            consumed = self.position,
            "read channel closed"
        );
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }
}

impl Drop for PipeReadChannel {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

/// Write channel drained by a background consumer
pub struct PipeWriteChannel {
    pipe: BoundedPipe,
    worker: Worker,
    position: u64,
    open: bool,
}

impl PipeWriteChannel {
    /// Start `consumer` on a worker thread reading from a fresh pipe of
    /// `capacity` bytes. The consumer sees end-of-stream once the channel
    /// is closed and the pipe drained.
    pub fn spawn<F>(name: &str, capacity: usize, consumer: F) -> FsResult<Self>
    where
        F: FnOnce(&mut PipeReader) -> io::Result<()> + Send + 'static,
    {
        let pipe = BoundedPipe::new(capacity);
        let worker = Worker::spawn(name, pipe.reader(), consumer)?;
        Ok(Self {
            pipe,
            worker,
            position: 0,
            open: true,
        })
    }

    fn ensure_open(&self) -> FsResult<()> {
        if self.open {
            Ok(())
        } else {
            Err(FsError::closed("write channel"))
        }
    }
}

impl FileChannel for PipeWriteChannel {
    fn read(&mut self, _buf: &mut [u8]) -> FsResult<Option<usize>> {
        self.ensure_open()?;
        Err(FsError::unsupported("read from a write channel"))
    }

    fn write(&mut self, buf: &[u8]) -> FsResult<usize> {
        self.ensure_open()?;
        if let Some(failure) = self.worker.failure() {
            return Err(failure);
        }
        match self.pipe.write(buf) {
            Ok(n) => {
                self.position += n as u64;
                Ok(n)
            }
            // the consumer went away; report why if it told us
            Err(e) => Err(self.worker.failure().unwrap_or(e)),
        }
    }

    fn position(&self) -> FsResult<u64> {
        self.ensure_open()?;
        Ok(self.position)
    }

    fn set_position(&mut self, position: u64) -> FsResult<()> {
        self.ensure_open()?;
        require_current_position(self.position, position)
    }

    fn size(&mut self) -> FsResult<Option<u64>> {
        self.ensure_open()?;
        Ok(Some(self.position))
    }

    fn close(&mut self) -> FsResult<()> {
        if !self.open {
            return Ok(());
        }
        self.open = false;
        // end-of-stream for the consumer, which drains what is buffered
        self.pipe.close();
        self.worker.join();
        debug!(
            transfer = %self.worker.name,
            written = self.position,
            "write channel closed"
        );
        match self.worker.failure() {
            Some(failure) => Err(failure),
            None => Ok(()),
        }
    }

    fn is_open(&self) -> bool {
        self.open
    }
}

impl Drop for PipeWriteChannel {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("write channel dropped with failed transfer: {}", e);
        }
    }
}
