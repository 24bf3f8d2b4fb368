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

//! # Stdio redirection
//!
//! Most apps won't need this, because the Python-level `sys.stdout` and
//! `sys.stderr` already go to logcat. In the testbed it is still useful to
//! redirect the native descriptors, to debug problems in interpreter startup
//! or in that Python-level redirection itself.
//!
//! Each redirected descriptor is replaced by the write end of a pipe. A
//! detached thread drains the read end and forwards every chunk as one log
//! record.

use crate::error::{OsContext, Result};
use crate::log_sink::{self, LogSink, Priority};
use crate::MAX_BYTES_PER_WRITE;
use log::{debug, info};
use nix::errno::Errno;
use nix::unistd;
use std::ffi::{CStr, CString};
use std::os::fd::{AsRawFd, FromRawFd, IntoRawFd, OwnedFd, RawFd};
use std::sync::Arc;
use std::thread;

extern "C" {
    static mut stdout: *mut libc::FILE;
    static mut stderr: *mut libc::FILE;
}

/// One of the C standard streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StdStream {
    Stdout,
    Stderr,
}

impl StdStream {
    /// The descriptor the stream writes to.
    pub fn fd(self) -> RawFd {
        match self {
            StdStream::Stdout => libc::STDOUT_FILENO,
            StdStream::Stderr => libc::STDERR_FILENO,
        }
    }

    /// The C library's `FILE` object for this stream.
    pub fn file(self) -> *mut libc::FILE {
        // SAFETY: the C library initializes these before any Rust code runs and
        // they are only read here.
        unsafe {
            match self {
                StdStream::Stdout => stdout,
                StdStream::Stderr => stderr,
            }
        }
    }

    fn default_priority(self) -> Priority {
        match self {
            StdStream::Stdout => Priority::Info,
            StdStream::Stderr => Priority::Warn,
        }
    }

    fn default_tag(self) -> &'static str {
        match self {
            StdStream::Stdout => "native.stdout",
            StdStream::Stderr => "native.stderr",
        }
    }
}

/// Describes one descriptor to redirect into the log.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    file: Option<StdStream>,
    fd: RawFd,
    priority: Priority,
    tag: CString,
}

impl StreamConfig {
    /// Redirects `fd`, logging what is written to it under `tag`.
    pub fn new(fd: RawFd, priority: Priority, tag: &str) -> Self {
        Self { file: None, fd, priority, tag: log_sink::tag(tag) }
    }

    /// The standard configuration for `stream`: its own descriptor, with the C
    /// `FILE` made unbuffered so no message is lost in a stdio buffer.
    pub fn standard(stream: StdStream) -> Self {
        Self::new(stream.fd(), stream.default_priority(), stream.default_tag()).with_file(stream)
    }

    /// Makes the C `FILE` of `stream` unbuffered before redirecting.
    pub fn with_file(mut self, stream: StdStream) -> Self {
        self.file = Some(stream);
        self
    }

    pub fn fd(&self) -> RawFd {
        self.fd
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn tag(&self) -> &CStr {
        &self.tag
    }
}

/// stdout at `INFO` as `native.stdout`, then stderr at `WARN` as `native.stderr`.
pub fn standard_streams() -> Vec<StreamConfig> {
    vec![StreamConfig::standard(StdStream::Stdout), StreamConfig::standard(StdStream::Stderr)]
}

/// Redirects every stream in `streams`, in order, into `sink`.
///
/// Setup stops at the first failing step and reports that step's name. Streams
/// redirected before the failure stay redirected.
pub fn redirect_streams(streams: &[StreamConfig], sink: Arc<dyn LogSink>) -> Result<()> {
    for stream in streams {
        redirect_stream(stream, sink.clone())?;
    }
    Ok(())
}

fn redirect_stream(stream: &StreamConfig, sink: Arc<dyn LogSink>) -> Result<()> {
    redirect_stream_with(stream, sink, thread::Builder::new())
}

fn redirect_stream_with(
    stream: &StreamConfig,
    sink: Arc<dyn LogSink>,
    builder: thread::Builder,
) -> Result<()> {
    // Unbuffered, so messages are never lost.
    if let Some(file) = stream.file {
        // SAFETY: `file.file()` is a valid stream and a null buffer with _IONBF
        // is accepted.
        let ret = unsafe { libc::setvbuf(file.file(), std::ptr::null_mut(), libc::_IONBF, 0) };
        if ret != 0 {
            return Err(crate::Error::last_os("setvbuf"));
        }
    }

    let (read_end, write_end) = unistd::pipe().step("pipe")?;
    unistd::dup2(write_end.as_raw_fd(), stream.fd).step("dup2")?;
    // `stream.fd` now holds the write end open by itself.
    drop(write_end);

    // Ownership passes to the thread only once it runs. If the spawn fails the
    // read end stays open, so writes to `stream.fd` don't raise SIGPIPE.
    let read_fd = read_end.into_raw_fd();
    let priority = stream.priority;
    let tag = stream.tag.clone();
    builder
        .name(tag.to_string_lossy().into_owned())
        .spawn(move || {
            // SAFETY: `read_fd` is an open descriptor that nothing else owns.
            let pipe = unsafe { OwnedFd::from_raw_fd(read_fd) };
            forward_pipe(pipe, priority, &tag, sink.as_ref())
        })
        .step("pthread_create")?;

    info!("Redirected fd {} to the log as {:?}", stream.fd, stream.tag);
    Ok(())
}

/// Reads chunks from `pipe` until EOF or error and writes each as one record.
fn forward_pipe(pipe: OwnedFd, priority: Priority, tag: &CStr, sink: &dyn LogSink) {
    let mut buf = [0u8; MAX_BYTES_PER_WRITE];
    loop {
        let read_size = match unistd::read(pipe.as_raw_fd(), &mut buf[..MAX_BYTES_PER_WRITE - 1]) {
            Ok(0) => break,
            Ok(n) => n,
            Err(Errno::EINTR) => continue,
            Err(e) => {
                debug!("Stopped reading {:?}: {}", tag, e);
                return;
            }
        };
        buf[read_size] = 0;
        // Everything after an embedded nul is dropped, as liblog would.
        if let Ok(message) = CStr::from_bytes_until_nul(&buf[..=read_size]) {
            sink.write(priority, tag, message);
        }
    }
    debug!("{:?} reached end of stream", tag);
}
