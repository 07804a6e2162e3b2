//! Blocking file operations, transparently offloaded to the I/O executor.
//!
//! Each function may only be called from inside a running task: the calling
//! task parks, the operation runs synchronously on the I/O executor thread,
//! and the call returns on the compute executor with the operation's result.
//! Meanwhile the compute executor keeps dispatching other ready tasks.
//!
//! Failures of the underlying syscall are ordinary [`nix::Result`] values
//! returned to the task, never scheduler faults. Nothing is retried.

use crate::context;
use nix::fcntl::{self, OFlag};
use nix::sys::stat::Mode;
use nix::unistd;
use std::os::fd::{AsRawFd, FromRawFd, IntoRawFd, OwnedFd, RawFd};
use std::path::Path;

/// An open file, owned by the task that opened it.
///
/// Dropping the handle closes the descriptor synchronously on the current
/// thread; prefer [`close`] to route the final syscall through the I/O
/// executor like every other operation.
#[derive(Debug)]
pub struct FileHandle(OwnedFd);

impl AsRawFd for FileHandle {
    fn as_raw_fd(&self) -> RawFd {
        self.0.as_raw_fd()
    }
}

/// Opens `path` with the given flags and mode.
pub fn open<P: AsRef<Path>>(path: P, oflag: OFlag, mode: Mode) -> nix::Result<FileHandle> {
    // The whole task stack migrates to the I/O executor for the duration of
    // the call, so borrowing `path` across the offload is fine.
    let fd = context::offload(|| fcntl::open(path.as_ref(), oflag, mode))?;

    // Safety: `open` returned a freshly created descriptor we now own.
    Ok(FileHandle(unsafe { OwnedFd::from_raw_fd(fd) }))
}

/// Reads up to `buf.len()` bytes from the file's current offset, returning
/// the number of bytes read (0 at end of file).
pub fn read(file: &FileHandle, buf: &mut [u8]) -> nix::Result<usize> {
    context::offload(|| unistd::read(file.0.as_raw_fd(), buf))
}

/// Writes `buf` at the file's current offset, returning the number of bytes
/// written.
pub fn write(file: &FileHandle, buf: &[u8]) -> nix::Result<usize> {
    context::offload(|| unistd::write(&file.0, buf))
}

/// Closes the file.
pub fn close(file: FileHandle) -> nix::Result<()> {
    let fd = file.0.into_raw_fd();
    context::offload(move || unistd::close(fd))
}
