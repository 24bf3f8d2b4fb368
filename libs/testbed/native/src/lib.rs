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

//! # Testbed native support
//!
//! This crate holds the native half of the Android testbed that hosts an
//! embedded Python interpreter. It is loaded into the app process through
//! JNI and provides three independent groups of operations:
//!
//! * redirecting the native stdout and stderr descriptors into logcat,
//! * delivering, unblocking and abusing signals to stop individual threads,
//! * configuring and running the interpreter in isolated mode.
//!
//! The groups share no state. The JNI entry points live in a separate cdylib
//! crate that only marshals arguments and raises Java exceptions.

/// Error type shared by every operation in the crate.
pub mod error;
/// Log priorities and the sinks that records are written to.
pub mod log_sink;
/// Line-oriented text and binary writers that chunk for logcat.
pub mod log_stream;
/// Interpreter configuration and launch.
pub mod runtime;
/// Signal delivery, masking and thread termination.
pub mod signal;
/// Redirection of standard descriptors into the log.
pub mod stdio;

pub use error::{Error, Result};
pub use log_sink::{logging, LogSink, PlatformLog, Priority};

/// The maximum length of a log message in bytes, including the level marker and
/// tag, is `LOGGER_ENTRY_MAX_PAYLOAD` in liblog's `log/log.h`. Longer messages
/// are truncated by logcat. The limit already shrank once (4076 to 4068 between
/// API levels 23 and 26), so stay well below it.
pub const MAX_BYTES_PER_WRITE: usize = 4000;
