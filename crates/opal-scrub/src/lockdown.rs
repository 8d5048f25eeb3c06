// SPDX-License-Identifier: MIT OR Apache-2.0
//! Process-wide stream lockdown.
//!
//! Swaps the process's stdout/stderr file descriptors for pipe ends
//! whose readers pump every byte through a [`Scrubber`](crate::Scrubber)
//! into the original descriptors. The returned guard restores the
//! original descriptors; dropping it restores them too.

#![allow(unsafe_code)]

use crate::Scrubber;
use std::fs::File;
use std::io::{self, Read, Write};
use std::os::fd::{FromRawFd, RawFd};
use std::thread::JoinHandle;

const STDOUT: RawFd = 1;
const STDERR: RawFd = 2;

/// Restore handle for [`lockdown_streams`].
///
/// Holds the saved descriptors and the pump threads. [`restore`]
/// (or drop) puts the original descriptors back and joins the pumps.
///
/// [`restore`]: LockdownGuard::restore
pub struct LockdownGuard {
    saved: Vec<(RawFd, RawFd)>,
    pumps: Vec<JoinHandle<io::Result<()>>>,
    restored: bool,
}

impl LockdownGuard {
    /// Restore the original descriptors and wait for the pumps to
    /// drain.
    ///
    /// # Errors
    ///
    /// Propagates the first pump I/O error, after all descriptors are
    /// restored.
    pub fn restore(mut self) -> io::Result<()> {
        self.restore_fds();
        let mut first_err = None;
        for pump in self.pumps.drain(..) {
            match pump.join() {
                Ok(Err(e)) if first_err.is_none() => first_err = Some(e),
                Ok(_) => {}
                Err(_) => {
                    if first_err.is_none() {
                        first_err = Some(io::Error::other("stream pump panicked"));
                    }
                }
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn restore_fds(&mut self) {
        if self.restored {
            return;
        }
        self.restored = true;
        for &(fd, saved) in &self.saved {
            // Overwriting fd closes the pipe write end held there, which
            // EOFs the pump.
            unsafe {
                libc::dup2(saved, fd);
                libc::close(saved);
            }
        }
    }
}

impl Drop for LockdownGuard {
    fn drop(&mut self) {
        self.restore_fds();
        for pump in self.pumps.drain(..) {
            let _ = pump.join();
        }
    }
}

fn pipe() -> io::Result<(RawFd, RawFd)> {
    let mut fds = [0 as RawFd; 2];
    if unsafe { libc::pipe(fds.as_mut_ptr()) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok((fds[0], fds[1]))
}

fn dup(fd: RawFd) -> io::Result<RawFd> {
    let copy = unsafe { libc::dup(fd) };
    if copy < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(copy)
}

fn redirect(fd: RawFd, secrets: &[(Vec<u8>, String)]) -> io::Result<((RawFd, RawFd), JoinHandle<io::Result<()>>)> {
    let saved = dup(fd)?;
    let (read_end, write_end) = pipe()?;
    if unsafe { libc::dup2(write_end, fd) } < 0 {
        let err = io::Error::last_os_error();
        unsafe {
            libc::close(read_end);
            libc::close(write_end);
            libc::close(saved);
        }
        return Err(err);
    }
    unsafe { libc::close(write_end) };

    // The pump owns the pipe read end and a dup of the saved target.
    let target = dup(saved)?;
    let mut source = unsafe { File::from_raw_fd(read_end) };
    let sink = unsafe { File::from_raw_fd(target) };
    let scrubber = Scrubber::new(sink);
    for (value, placeholder) in secrets {
        scrubber.register_secret(value, placeholder);
    }

    let pump = std::thread::spawn(move || -> io::Result<()> {
        let mut scrubber = scrubber;
        let mut buf = [0u8; 8192];
        loop {
            match source.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => scrubber.write_all(&buf[..n])?,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        scrubber.close()
    });

    Ok(((fd, saved), pump))
}

/// Swap stdout and stderr for scrubbed pipes.
///
/// Every `(value, placeholder)` pair is registered on both streams.
/// Bytes written to the process's stdout/stderr — including by child
/// code that writes to the raw descriptors — pass through the scrubber
/// before reaching the original targets.
///
/// # Errors
///
/// Propagates descriptor-duplication and pipe-creation failures; on
/// error nothing is left redirected.
pub fn lockdown_streams(secrets: &[(Vec<u8>, String)]) -> io::Result<LockdownGuard> {
    let mut guard = LockdownGuard {
        saved: Vec::with_capacity(2),
        pumps: Vec::with_capacity(2),
        restored: false,
    };
    for fd in [STDOUT, STDERR] {
        match redirect(fd, secrets) {
            Ok((saved, pump)) => {
                guard.saved.push(saved);
                guard.pumps.push(pump);
            }
            Err(e) => {
                guard.restore_fds();
                return Err(e);
            }
        }
    }
    Ok(guard)
}
