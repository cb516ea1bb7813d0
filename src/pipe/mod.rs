//! Cross-platform named-pipe transport.
//!
//! Abstracts a single-writer/single-reader, message-oriented local IPC
//! channel: a POSIX FIFO on Unix, a named pipe with overlapped I/O on
//! Windows. A reader consumes everything its writer produced on one
//! connection, so the protocol needs no in-band length framing.
//!
//! Architecture:
//! - `create` builds a fresh endpoint owned (and deleted) by this process
//! - `write_to` opens a foreign endpoint, polling until it becomes writable
//! - `read_blocking` waits for a writer, then drains one complete message
//! - every poll interval doubles as a cooperative cancellation point

#[cfg(unix)]
mod unix;
#[cfg(windows)]
mod windows;


use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::BridgeError;

/// Poll interval of blocking reads, in milliseconds. This is also the unit
/// of cancellation responsiveness.
pub(crate) const PIPE_WAIT_INTERVAL_MS: u32 = 10;

/// Poll interval while waiting for a writable pipe to appear.
pub(crate) const PIPE_WRITE_WAIT_INTERVAL_MS: u32 = 5;

/// Chunk size of the read loop. A short read below this size marks the end
/// of a message.
pub(crate) const PIPE_BUFFER_SIZE: usize = 32;

/// Default timeout for reply writes where the caller did not pick one.
pub const DEFAULT_WRITE_TIMEOUT_MS: u32 = 1_000;

/// Read timeout that is long enough to mean "until cancelled".
pub const READ_NO_TIMEOUT: u32 = u32::MAX;

/// Shared flag that lets one thread ask another to abandon a blocking read.
#[derive(Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// RAII wrapper around one named-pipe endpoint.
///
/// The process that created the endpoint owns its destruction: dropping the
/// wrapper removes the filesystem entry (Unix) or closes the pipe handle
/// (Windows). `destroy` may be called any number of times.
pub struct NamedPipe {
    path: PathBuf,
    #[cfg(windows)]
    handle: windows::PipeHandle,
}

impl NamedPipe {
    /// Create a fresh pipe endpoint at `path`.
    ///
    /// Fails if an object already exists at that location. On Unix the FIFO
    /// is created with user-only permissions; on Windows the pipe is an
    /// inbound, byte-type, overlapped pipe limited to a single instance.
    pub fn create(path: impl Into<PathBuf>) -> Result<Self, BridgeError> {
        let path = path.into();
        #[cfg(unix)]
        {
            unix::create(&path)?;
            Ok(Self { path })
        }
        #[cfg(windows)]
        {
            let handle = windows::create(&path)?;
            Ok(Self { path, handle })
        }
    }

    /// Whether a pipe (or any other object) currently exists at `path`.
    pub fn exists(path: &Path) -> bool {
        #[cfg(unix)]
        {
            path.exists()
        }
        #[cfg(windows)]
        {
            windows::exists(path)
        }
    }

    /// Write `content` to the pipe at `path`, polling for up to
    /// `timeout_ms` milliseconds for the pipe to become writable.
    pub fn write_to(path: &Path, content: &str, timeout_ms: u32) -> Result<(), BridgeError> {
        #[cfg(unix)]
        {
            unix::write(path, content, timeout_ms)
        }
        #[cfg(windows)]
        {
            windows::write(path, content, timeout_ms)
        }
    }

    /// Write `content` to this pipe with the default reply timeout.
    pub fn write(&self, content: &str) -> Result<(), BridgeError> {
        Self::write_to(&self.path, content, DEFAULT_WRITE_TIMEOUT_MS)
    }

    /// Block until a writer delivers a message or `timeout_ms` expires.
    pub fn read_blocking(&self, timeout_ms: u32) -> Result<String, BridgeError> {
        self.read_impl(timeout_ms, None)
    }

    /// Like [`read_blocking`](Self::read_blocking), but additionally
    /// observes `cancel` at every poll interval and returns
    /// [`BridgeError::Interrupted`] once it trips.
    pub fn read_blocking_cancellable(
        &self,
        timeout_ms: u32,
        cancel: &CancelToken,
    ) -> Result<String, BridgeError> {
        self.read_impl(timeout_ms, Some(cancel))
    }

    fn read_impl(
        &self,
        timeout_ms: u32,
        cancel: Option<&CancelToken>,
    ) -> Result<String, BridgeError> {
        #[cfg(unix)]
        {
            unix::read_blocking(&self.path, timeout_ms, cancel)
        }
        #[cfg(windows)]
        {
            windows::read_blocking(&self.handle, timeout_ms, cancel)
        }
    }

    /// Path of the wrapped endpoint.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the endpoint. Idempotent; also invoked by `Drop`.
    pub fn destroy(&mut self) {
        if self.path.as_os_str().is_empty() {
            return;
        }
        #[cfg(unix)]
        unix::destroy(&self.path);
        #[cfg(windows)]
        self.handle.close();
        self.path = PathBuf::new();
    }
}

impl Drop for NamedPipe {
    fn drop(&mut self) {
        self.destroy();
    }
}
