// Copyright (C) 2025 The Android Open Source Project
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Errors are tagged with the step that failed so the managed caller sees
//! messages of the form `"<step>: <strerror>"`, or the interpreter's own
//! diagnostic when the failure came from the runtime.

use nix::errno::Errno;
use std::ffi::CStr;
use std::io;
use thiserror::Error;

/// Shorthand for results carrying [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// All failures surfaced across the JNI boundary.
#[derive(Debug, Error)]
pub enum Error {
    /// A system call failed. `op` names the failing step.
    #[error("{}: {}", .op, strerror(.errno))]
    Os { op: &'static str, errno: Errno },

    /// The embedded runtime rejected its configuration or failed to start.
    /// Carries the runtime's own message, which may be empty.
    #[error("{0}")]
    Runtime(String),

    /// The runtime's shared library or one of its symbols could not be found.
    #[error("{context}: {detail}")]
    Library { context: String, detail: String },

    /// A string argument cannot be passed to C.
    #[error("{0} contains an interior nul byte")]
    InteriorNul(&'static str),

    /// An operation was attempted in the wrong launcher state.
    #[error("cannot {operation} while {state}")]
    InvalidState { operation: &'static str, state: &'static str },
}

impl Error {
    /// Creates an [`Error::Os`] from the current `errno`.
    pub fn last_os(op: &'static str) -> Self {
        Error::Os { op, errno: Errno::last() }
    }

    /// Returns the failing step name for system call errors.
    pub fn op(&self) -> Option<&'static str> {
        match self {
            Error::Os { op, .. } => Some(*op),
            _ => None,
        }
    }

    /// Returns the errno for system call errors.
    pub fn errno(&self) -> Option<Errno> {
        match self {
            Error::Os { errno, .. } => Some(*errno),
            _ => None,
        }
    }
}

/// Returns the platform's message for `errno`, as `strerror(3)` would.
pub fn strerror(errno: &Errno) -> String {
    let mut buf = [0 as libc::c_char; 256];
    // SAFETY: `buf` is writable for its full length and `strerror_r` always
    // nul-terminates on success.
    let ret = unsafe { libc::strerror_r(*errno as libc::c_int, buf.as_mut_ptr(), buf.len()) };
    if ret != 0 {
        return errno.desc().to_string();
    }
    // SAFETY: `buf` holds a nul-terminated string written above.
    unsafe { CStr::from_ptr(buf.as_ptr()) }.to_string_lossy().into_owned()
}

/// Attaches a step name to a failed system call result, similar to
/// `anyhow::Context` but keeping the errno.
pub trait OsContext<T> {
    /// Tags the error with `op`.
    fn step(self, op: &'static str) -> Result<T>;
}

impl<T> OsContext<T> for nix::Result<T> {
    fn step(self, op: &'static str) -> Result<T> {
        self.map_err(|errno| Error::Os { op, errno })
    }
}

impl<T> OsContext<T> for io::Result<T> {
    fn step(self, op: &'static str) -> Result<T> {
        self.map_err(|e| Error::Os {
            op,
            errno: e.raw_os_error().map(Errno::from_raw).unwrap_or(Errno::UnknownErrno),
        })
    }
}
