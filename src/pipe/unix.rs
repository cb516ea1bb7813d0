//! FIFO-backed transport for POSIX systems.
//!
//! All fd-level work goes through libc directly; the wrappers here add the
//! polling, timeout bookkeeping and RAII the rest of the crate relies on.

use std::ffi::CString;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use std::thread;
use std::time::Duration;

use crate::error::BridgeError;

use super::{CancelToken, PIPE_BUFFER_SIZE, PIPE_WAIT_INTERVAL_MS, PIPE_WRITE_WAIT_INTERVAL_MS};

/// Closes the wrapped descriptor on drop.
struct FdGuard(libc::c_int);

impl Drop for FdGuard {
    fn drop(&mut self) {
        if unsafe { libc::close(self.0) } != 0 {
            let err = io::Error::last_os_error();
            eprintln!("mumble-json-bridge: failed to close pipe descriptor: {err}");
        }
    }
}

fn path_cstring(path: &Path, context: &'static str) -> Result<CString, BridgeError> {
    CString::new(path.as_os_str().as_bytes()).map_err(|_| {
        BridgeError::pipe(
            context,
            io::Error::new(io::ErrorKind::InvalidInput, "pipe path contains a NUL byte"),
        )
    })
}

pub(super) fn create(path: &Path) -> Result<(), BridgeError> {
    assert!(
        path.parent().map(Path::is_dir).unwrap_or(false),
        "pipe parent directory does not exist: {}",
        path.display()
    );

    let c_path = path_cstring(path, "Create")?;

    // A FIFO only the owning user can read and write.
    if unsafe { libc::mkfifo(c_path.as_ptr(), libc::S_IRUSR | libc::S_IWUSR) } != 0 {
        return Err(BridgeError::pipe("Create", io::Error::last_os_error()));
    }
    Ok(())
}

pub(super) fn write(path: &Path, content: &str, timeout_ms: u32) -> Result<(), BridgeError> {
    let c_path = path_cstring(path, "Open for write")?;

    // Opening a FIFO write-only and non-blocking fails with ENXIO until a
    // reader has the other end open, which is exactly the condition we are
    // polling for.
    let mut timeout = timeout_ms;
    let handle = loop {
        let fd = unsafe { libc::open(c_path.as_ptr(), libc::O_WRONLY | libc::O_NONBLOCK) };
        if fd >= 0 {
            break FdGuard(fd);
        }
        if timeout > PIPE_WRITE_WAIT_INTERVAL_MS {
            timeout -= PIPE_WRITE_WAIT_INTERVAL_MS;
            thread::sleep(Duration::from_millis(u64::from(PIPE_WRITE_WAIT_INTERVAL_MS)));
        } else {
            return Err(BridgeError::Timeout);
        }
    };

    let written = unsafe {
        libc::write(
            handle.0,
            content.as_ptr() as *const libc::c_void,
            content.len(),
        )
    };
    if written < 0 {
        return Err(BridgeError::pipe("Write", io::Error::last_os_error()));
    }
    Ok(())
}

pub(super) fn read_blocking(
    path: &Path,
    timeout_ms: u32,
    cancel: Option<&CancelToken>,
) -> Result<String, BridgeError> {
    let c_path = path_cstring(path, "Open")?;

    let handle = {
        let fd = unsafe { libc::open(c_path.as_ptr(), libc::O_RDONLY | libc::O_NONBLOCK) };
        if fd < 0 {
            return Err(BridgeError::pipe("Open", io::Error::last_os_error()));
        }
        FdGuard(fd)
    };

    let mut poll_data = libc::pollfd {
        fd: handle.0,
        events: libc::POLLIN,
        revents: 0,
    };
    let mut timeout = timeout_ms;
    loop {
        let ready = unsafe { libc::poll(&mut poll_data, 1, PIPE_WAIT_INTERVAL_MS as libc::c_int) };
        if ready < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            return Err(BridgeError::pipe("Poll", err));
        }
        if poll_data.revents & libc::POLLIN != 0 {
            break;
        }
        if let Some(cancel) = cancel {
            if cancel.is_cancelled() {
                return Err(BridgeError::Interrupted);
            }
        }
        if timeout > PIPE_WAIT_INTERVAL_MS {
            timeout -= PIPE_WAIT_INTERVAL_MS;
        } else {
            return Err(BridgeError::Timeout);
        }
    }

    let mut content = Vec::new();
    let mut buffer = [0u8; PIPE_BUFFER_SIZE];
    loop {
        let read = unsafe {
            libc::read(
                handle.0,
                buffer.as_mut_ptr() as *mut libc::c_void,
                PIPE_BUFFER_SIZE,
            )
        };
        if read > 0 {
            content.extend_from_slice(&buffer[..read as usize]);
            continue;
        }
        if read == 0 {
            // EOF: the writer closed its end of the FIFO.
            break;
        }
        let err = io::Error::last_os_error();
        match err.raw_os_error() {
            // The message has been read completely; asking for more data
            // would block because no more is currently available.
            Some(libc::EAGAIN) => break,
            Some(libc::EINTR) => continue,
            _ => return Err(BridgeError::pipe("Read", err)),
        }
    }

    String::from_utf8(content).map_err(|_| {
        BridgeError::pipe(
            "Read",
            io::Error::new(io::ErrorKind::InvalidData, "pipe payload is not valid UTF-8"),
        )
    })
}

pub(super) fn destroy(path: &Path) {
    if let Err(err) = std::fs::remove_file(path) {
        if err.kind() != io::ErrorKind::NotFound {
            eprintln!("mumble-json-bridge: failed to delete pipe object: {err}");
        }
    }
}
