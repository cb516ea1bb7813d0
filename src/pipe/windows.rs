//! Named-pipe transport for Windows, built on overlapped I/O.
//!
//! The server end is a single-instance inbound pipe. After every complete
//! read the server disconnects and reconnects so the next client can open
//! the pipe; clients open a fresh handle per message.

use std::io;
use std::mem;
use std::os::windows::ffi::OsStrExt;
use std::path::Path;
use std::ptr;
use std::thread;
use std::time::Duration;

use windows_sys::Win32::Foundation::{
    CloseHandle, GetLastError, ERROR_BROKEN_PIPE, ERROR_FILE_NOT_FOUND, ERROR_IO_INCOMPLETE,
    ERROR_IO_PENDING, ERROR_NO_DATA, ERROR_PIPE_CONNECTED, ERROR_PIPE_LISTENING,
    ERROR_SEM_TIMEOUT, GENERIC_WRITE, HANDLE, INVALID_HANDLE_VALUE,
};
use windows_sys::Win32::Storage::FileSystem::{
    CreateFileW, ReadFile, WriteFile, FILE_FLAG_FIRST_PIPE_INSTANCE, FILE_FLAG_OVERLAPPED,
    OPEN_EXISTING,
};
use windows_sys::Win32::System::Pipes::{
    ConnectNamedPipe, CreateNamedPipeW, DisconnectNamedPipe, WaitNamedPipeW, PIPE_ACCESS_INBOUND,
    PIPE_TYPE_BYTE, PIPE_WAIT,
};
use windows_sys::Win32::System::Threading::CreateEventW;
use windows_sys::Win32::System::IO::{GetOverlappedResult, OVERLAPPED};

use crate::error::BridgeError;

use super::{CancelToken, PIPE_BUFFER_SIZE, PIPE_WAIT_INTERVAL_MS, PIPE_WRITE_WAIT_INTERVAL_MS};

/// Owning wrapper for the server end of a pipe.
pub(super) struct PipeHandle {
    raw: HANDLE,
}

// HANDLE is a kernel object reference, not thread-affine state.
unsafe impl Send for PipeHandle {}

impl PipeHandle {
    pub(super) fn close(&mut self) {
        if self.raw != INVALID_HANDLE_VALUE {
            if unsafe { CloseHandle(self.raw) } == 0 {
                let err = last_error("Close");
                eprintln!("mumble-json-bridge: failed to close pipe handle: {err}");
            }
            self.raw = INVALID_HANDLE_VALUE;
        }
    }
}

impl Drop for PipeHandle {
    fn drop(&mut self) {
        self.close();
    }
}

/// Guard for ephemeral handles (events, client-side file handles).
struct HandleGuard(HANDLE);

impl Drop for HandleGuard {
    fn drop(&mut self) {
        if self.0 != INVALID_HANDLE_VALUE && !self.0.is_null() {
            unsafe { CloseHandle(self.0) };
        }
    }
}

fn wide(path: &Path) -> Vec<u16> {
    path.as_os_str().encode_wide().chain(Some(0)).collect()
}

fn last_error(context: &'static str) -> BridgeError {
    BridgeError::pipe(
        context,
        io::Error::from_raw_os_error(unsafe { GetLastError() } as i32),
    )
}

fn zeroed_overlapped(event: HANDLE) -> OVERLAPPED {
    let mut overlapped: OVERLAPPED = unsafe { mem::zeroed() };
    overlapped.hEvent = event;
    overlapped
}

/// Poll an in-flight overlapped operation until it completes or the
/// remaining timeout budget runs out.
fn wait_on_async_io(
    handle: HANDLE,
    overlapped: &mut OVERLAPPED,
    timeout: &mut u32,
) -> Result<(), BridgeError> {
    let mut transferred: u32 = 0;
    loop {
        let result = unsafe { GetOverlappedResult(handle, overlapped, &mut transferred, 0) };
        if result != 0 {
            return Ok(());
        }
        if unsafe { GetLastError() } != ERROR_IO_INCOMPLETE {
            return Err(last_error("Waiting for pending IO"));
        }
        if *timeout > PIPE_WAIT_INTERVAL_MS {
            *timeout -= PIPE_WAIT_INTERVAL_MS;
        } else {
            return Err(BridgeError::Timeout);
        }
        thread::sleep(Duration::from_millis(u64::from(PIPE_WAIT_INTERVAL_MS)));
    }
}

pub(super) fn create(path: &Path) -> Result<PipeHandle, BridgeError> {
    assert!(
        path.parent().map(|p| p == Path::new(r"\\.\pipe")).unwrap_or(false),
        "pipe path is outside the pipe namespace: {}",
        path.display()
    );

    let name = wide(path);
    let raw = unsafe {
        CreateNamedPipeW(
            name.as_ptr(),
            PIPE_ACCESS_INBOUND | FILE_FLAG_OVERLAPPED | FILE_FLAG_FIRST_PIPE_INSTANCE,
            PIPE_TYPE_BYTE | PIPE_WAIT,
            1, // allowed pipe instances
            0, // outbound buffer size
            0, // inbound buffer size
            0, // default wait time
            ptr::null(),
        )
    };

    if raw == INVALID_HANDLE_VALUE {
        return Err(last_error("Create"));
    }
    Ok(PipeHandle { raw })
}

pub(super) fn exists(path: &Path) -> bool {
    let name = wide(path);
    // A wait of 1 ms answers "does this pipe exist" without meaningfully
    // blocking; a busy pipe reports ERROR_SEM_TIMEOUT but does exist.
    if unsafe { WaitNamedPipeW(name.as_ptr(), 1) } != 0 {
        return true;
    }
    unsafe { GetLastError() != ERROR_FILE_NOT_FOUND }
}

pub(super) fn write(path: &Path, content: &str, timeout_ms: u32) -> Result<(), BridgeError> {
    let name = wide(path);
    let mut timeout = timeout_ms;

    // A wait of 0 would be NMPWAIT_USE_DEFAULT_WAIT, so wait 1 ms per probe
    // and subtract it from the sleep below.
    loop {
        if unsafe { WaitNamedPipeW(name.as_ptr(), 1) } != 0 {
            break;
        }
        match unsafe { GetLastError() } {
            ERROR_FILE_NOT_FOUND | ERROR_SEM_TIMEOUT => {
                if timeout > PIPE_WRITE_WAIT_INTERVAL_MS {
                    timeout -= PIPE_WRITE_WAIT_INTERVAL_MS;
                } else {
                    return Err(BridgeError::Timeout);
                }
                thread::sleep(Duration::from_millis(u64::from(
                    PIPE_WRITE_WAIT_INTERVAL_MS - 1,
                )));
            }
            _ => return Err(last_error("WaitNamedPipe")),
        }
    }

    let handle = {
        let raw = unsafe {
            CreateFileW(
                name.as_ptr(),
                GENERIC_WRITE,
                0,
                ptr::null(),
                OPEN_EXISTING,
                FILE_FLAG_OVERLAPPED,
                ptr::null_mut(),
            )
        };
        if raw == INVALID_HANDLE_VALUE {
            return Err(last_error("Open for write"));
        }
        HandleGuard(raw)
    };

    let mut overlapped = zeroed_overlapped(ptr::null_mut());
    let ok = unsafe {
        WriteFile(
            handle.0,
            content.as_ptr(),
            content.len() as u32,
            ptr::null_mut(),
            &mut overlapped,
        )
    };
    if ok == 0 {
        if unsafe { GetLastError() } == ERROR_IO_PENDING {
            wait_on_async_io(handle.0, &mut overlapped, &mut timeout)?;
        } else {
            return Err(last_error("Write"));
        }
    }
    Ok(())
}

/// (Re-)connect the server end so the next client write can reach us.
fn disconnect_and_reconnect(
    handle: HANDLE,
    overlapped: &mut OVERLAPPED,
    disconnect_first: bool,
    timeout: &mut u32,
) -> Result<(), BridgeError> {
    if disconnect_first && unsafe { DisconnectNamedPipe(handle) } == 0 {
        return Err(last_error("Disconnect"));
    }

    if unsafe { ConnectNamedPipe(handle, overlapped) } == 0 {
        match unsafe { GetLastError() } {
            ERROR_IO_PENDING => wait_on_async_io(handle, overlapped, timeout)?,
            // Both codes mean a client connected already. ERROR_NO_DATA
            // nominally says the client closed its handle again, but the
            // written data is still readable.
            ERROR_NO_DATA | ERROR_PIPE_CONNECTED => {}
            _ => return Err(last_error("Connect")),
        }
    }
    Ok(())
}

pub(super) fn read_blocking(
    handle: &PipeHandle,
    timeout_ms: u32,
    cancel: Option<&CancelToken>,
) -> Result<String, BridgeError> {
    let event = {
        let raw = unsafe { CreateEventW(ptr::null(), 1, 1, ptr::null()) };
        if raw.is_null() {
            return Err(last_error("Create event"));
        }
        HandleGuard(raw)
    };

    let mut timeout = timeout_ms;
    let mut overlapped = zeroed_overlapped(event.0);
    disconnect_and_reconnect(handle.raw, &mut overlapped, false, &mut timeout)?;

    let mut overlapped = zeroed_overlapped(event.0);
    let mut content: Vec<u8> = Vec::new();
    let mut buffer = [0u8; PIPE_BUFFER_SIZE];

    loop {
        let mut read_bytes: u32 = 0;
        let mut success = unsafe {
            ReadFile(
                handle.raw,
                buffer.as_mut_ptr(),
                PIPE_BUFFER_SIZE as u32,
                &mut read_bytes,
                &mut overlapped,
            )
        } != 0;

        if !success && unsafe { GetLastError() } == ERROR_IO_PENDING {
            // Wait for the async read to finish. This wait is not
            // cancellable; cancellation latency on Windows is bounded by
            // how quickly a writer completes its message.
            success =
                unsafe { GetOverlappedResult(handle.raw, &overlapped, &mut read_bytes, 1) } != 0;
            if !success && unsafe { GetLastError() } != ERROR_BROKEN_PIPE {
                return Err(last_error("Overlapped waiting"));
            }
        }

        if !success && !content.is_empty() {
            // Some data arrived already; treat the failure as end-of-message.
            break;
        }

        if success {
            content.extend_from_slice(&buffer[..read_bytes as usize]);
            if (read_bytes as usize) < PIPE_BUFFER_SIZE {
                break;
            }
            continue;
        }

        match unsafe { GetLastError() } {
            ERROR_BROKEN_PIPE => {
                let mut reconnect_overlapped = zeroed_overlapped(event.0);
                disconnect_and_reconnect(handle.raw, &mut reconnect_overlapped, true, &mut timeout)?;
                overlapped = zeroed_overlapped(event.0);
            }
            ERROR_PIPE_LISTENING => {}
            _ => return Err(last_error("Read")),
        }

        if let Some(cancel) = cancel {
            if cancel.is_cancelled() {
                unsafe { DisconnectNamedPipe(handle.raw) };
                return Err(BridgeError::Interrupted);
            }
        }
        if timeout > PIPE_WAIT_INTERVAL_MS {
            timeout -= PIPE_WAIT_INTERVAL_MS;
        } else {
            return Err(BridgeError::Timeout);
        }
        thread::sleep(Duration::from_millis(u64::from(PIPE_WAIT_INTERVAL_MS)));
    }

    unsafe { DisconnectNamedPipe(handle.raw) };

    String::from_utf8(content).map_err(|_| {
        BridgeError::pipe(
            "Read",
            io::Error::new(io::ErrorKind::InvalidData, "pipe payload is not valid UTF-8"),
        )
    })
}
