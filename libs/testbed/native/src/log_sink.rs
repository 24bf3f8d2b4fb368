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

//! Android log priorities and the destinations log records are written to.

use std::ffi::{CStr, CString};
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// Android log priority, matching `android_LogPriority`.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    Unknown = 0,
    Default = 1,
    Verbose = 2,
    Debug = 3,
    Info = 4,
    Warn = 5,
    Error = 6,
    Fatal = 7,
    Silent = 8,
}

impl Priority {
    /// Maps the priority onto the `log` crate's levels. `Unknown`, `Default`
    /// and `Silent` have no counterpart.
    pub fn level(self) -> Option<log::Level> {
        match self {
            Priority::Verbose => Some(log::Level::Trace),
            Priority::Debug => Some(log::Level::Debug),
            Priority::Info => Some(log::Level::Info),
            Priority::Warn => Some(log::Level::Warn),
            Priority::Error | Priority::Fatal => Some(log::Level::Error),
            Priority::Unknown | Priority::Default | Priority::Silent => None,
        }
    }

    /// The single-letter marker logcat prints for this priority.
    pub fn marker(self) -> char {
        match self {
            Priority::Verbose => 'V',
            Priority::Debug => 'D',
            Priority::Info => 'I',
            Priority::Warn => 'W',
            Priority::Error => 'E',
            Priority::Fatal => 'F',
            Priority::Silent => 'S',
            Priority::Unknown | Priority::Default => '?',
        }
    }
}

/// A destination for complete log records.
///
/// Implementations must be callable from the background threads that drain
/// redirected streams.
pub trait LogSink: Send + Sync {
    /// Writes one record. `message` has already been cut to fit a single entry.
    fn write(&self, priority: Priority, tag: &CStr, message: &CStr);
}

/// Writes records to the platform log: liblog on Android, the `log` facade
/// elsewhere.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlatformLog;

impl LogSink for PlatformLog {
    #[cfg(target_os = "android")]
    fn write(&self, priority: Priority, tag: &CStr, message: &CStr) {
        // SAFETY: `tag` and `message` are valid nul-terminated strings for the
        // duration of the call.
        unsafe {
            android_log_sys::__android_log_write(
                priority as libc::c_int,
                tag.as_ptr(),
                message.as_ptr(),
            );
        }
    }

    #[cfg(not(target_os = "android"))]
    fn write(&self, priority: Priority, tag: &CStr, message: &CStr) {
        if let Some(level) = priority.level() {
            log::log!(
                target: "native",
                level,
                "{}: {}",
                tag.to_string_lossy(),
                message.to_string_lossy()
            );
        }
    }
}

/// A record captured by [`RecordingSink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub priority: Priority,
    pub tag: String,
    pub message: Vec<u8>,
}

/// Keeps every record in memory. Used to observe redirected output without
/// reading logcat.
#[derive(Debug, Default)]
pub struct RecordingSink {
    records: Mutex<Vec<Record>>,
    changed: Condvar,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of everything written so far.
    pub fn records(&self) -> Vec<Record> {
        self.records.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Blocks until `done` accepts the records written so far or `timeout`
    /// elapses. Returns the records seen last.
    pub fn wait_for<F>(&self, timeout: Duration, mut done: F) -> Vec<Record>
    where
        F: FnMut(&[Record]) -> bool,
    {
        let deadline = Instant::now() + timeout;
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        loop {
            if done(&records) {
                break;
            }
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            records = match self.changed.wait_timeout(records, deadline - now) {
                Ok((guard, _)) => guard,
                Err(e) => e.into_inner().0,
            };
        }
        records.clone()
    }
}

impl LogSink for RecordingSink {
    fn write(&self, priority: Priority, tag: &CStr, message: &CStr) {
        let record = Record {
            priority,
            tag: tag.to_string_lossy().into_owned(),
            message: message.to_bytes().to_vec(),
        };
        self.records.lock().unwrap_or_else(|e| e.into_inner()).push(record);
        self.changed.notify_all();
    }
}

/// Builds a tag for [`LogSink::write`], dropping anything after a nul byte.
pub fn tag(name: &str) -> CString {
    let bytes = name.as_bytes();
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    // The slice cannot contain a nul byte.
    CString::new(&bytes[..end]).unwrap_or_default()
}

/// Set-up of the crate's own diagnostics.
pub mod logging {
    use log::LevelFilter;

    /// Initializes the `log` facade for this library. Later calls are ignored.
    ///
    /// On Android records go to logcat under `tag`; elsewhere they go to
    /// stderr through `env_logger`, filtered by `RUST_LOG` when set.
    pub fn init(tag: &str, max_level: LevelFilter) {
        #[cfg(target_os = "android")]
        android_logger::init_once(
            android_logger::Config::default().with_tag(tag).with_max_level(max_level),
        );

        #[cfg(not(target_os = "android"))]
        {
            let _ = tag;
            let _ = env_logger::Builder::new()
                .filter_level(max_level)
                .parse_default_env()
                .try_init();
        }
    }
}
