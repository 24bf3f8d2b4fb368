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

//! Writers that turn text or bytes into log records, one record per line
//! wherever possible, without ever exceeding [`MAX_BYTES_PER_WRITE`].
//!
//! These follow the behaviour the interpreter uses for its own `sys.stdout` and
//! `sys.stderr` on Android, so native and Python output is split the same way.

use crate::log_sink::{self, LogSink, Priority};
use crate::MAX_BYTES_PER_WRITE;
use std::ffi::{CStr, CString};
use std::{fmt, io};
use std::sync::Arc;

/// UTF-8 uses at most 4 bytes per character, so text pieces of this many
/// characters always fit in [`MAX_BYTES_PER_WRITE`]. Consecutive pieces are
/// joined again when they are smaller than that.
pub const MAX_CHARS_PER_WRITE: usize = MAX_BYTES_PER_WRITE / 4;

/// Writes each non-empty byte slice as a single record.
pub struct BinaryLogStream {
    sink: Arc<dyn LogSink>,
    priority: Priority,
    tag: CString,
}

impl BinaryLogStream {
    pub fn new(sink: Arc<dyn LogSink>, priority: Priority, tag: &str) -> Self {
        Self { sink, priority, tag: log_sink::tag(tag) }
    }

    pub fn tag(&self) -> &CStr {
        &self.tag
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    /// Logs `bytes` and returns its length. Empty input has no effect.
    ///
    /// Nul bytes are encoded as the modified UTF-8 pair `C0 80` so they don't
    /// truncate the record. The returned length still counts the original bytes.
    pub fn write(&self, bytes: &[u8]) -> usize {
        if bytes.is_empty() {
            return 0;
        }
        let mut encoded = Vec::with_capacity(bytes.len());
        for &b in bytes {
            if b == 0 {
                encoded.extend_from_slice(&[0xc0, 0x80]);
            } else {
                encoded.push(b);
            }
        }
        if let Ok(message) = CString::new(encoded) {
            self.sink.write(self.priority, &self.tag, &message);
        }
        bytes.len()
    }
}

impl fmt::Debug for BinaryLogStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<BinaryLogStream {:?}>", self.tag)
    }
}

impl io::Write for BinaryLogStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(BinaryLogStream::write(self, buf))
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Line-buffered text writer on top of a [`BinaryLogStream`].
///
/// Line buffering cannot be turned off: a newline always flushes. With
/// write-through enabled every write flushes as well.
pub struct TextLogStream {
    buffer: BinaryLogStream,
    pending: Vec<u8>,
    write_through: bool,
}

impl TextLogStream {
    pub fn new(sink: Arc<dyn LogSink>, priority: Priority, tag: &str) -> Self {
        Self {
            buffer: BinaryLogStream::new(sink, priority, tag),
            pending: Vec::with_capacity(MAX_BYTES_PER_WRITE),
            write_through: false,
        }
    }

    /// The stream `sys.stdout` uses: `python.stdout` at `INFO`.
    pub fn stdout(sink: Arc<dyn LogSink>) -> Self {
        Self::new(sink, Priority::Info, "python.stdout")
    }

    /// The stream `sys.stderr` uses: `python.stderr` at `WARN`.
    pub fn stderr(sink: Arc<dyn LogSink>) -> Self {
        Self::new(sink, Priority::Warn, "python.stderr")
    }

    pub fn buffer(&self) -> &BinaryLogStream {
        &self.buffer
    }

    pub fn write_through(&self) -> bool {
        self.write_through
    }

    pub fn set_write_through(&mut self, write_through: bool) {
        self.write_through = write_through;
    }

    pub fn line_buffering(&self) -> bool {
        true
    }

    /// Writes `s` and returns its length in characters.
    pub fn write(&mut self, s: &str) -> usize {
        // An empty string has no lines, so nothing is logged for it.
        for line in split_lines(s) {
            let mut rest = line;
            while !rest.is_empty() {
                let end = rest
                    .char_indices()
                    .nth(MAX_CHARS_PER_WRITE)
                    .map_or(rest.len(), |(i, _)| i);
                let (chunk, tail) = rest.split_at(end);
                self.write_chunk(chunk);
                rest = tail;
            }
        }
        s.chars().count()
    }

    fn write_chunk(&mut self, chunk: &str) {
        let bytes = chunk.as_bytes();
        if self.pending.len() + bytes.len() > MAX_BYTES_PER_WRITE {
            self.flush();
        }

        self.pending.extend_from_slice(bytes);
        if self.write_through
            || bytes.ends_with(b"\n")
            || self.pending.len() > MAX_BYTES_PER_WRITE
        {
            self.flush();
        }
    }

    /// Sends everything pending as one record.
    pub fn flush(&mut self) {
        self.buffer.write(&self.pending);
        self.pending.clear();
    }
}

/// Line terminators recognised by Python's `str.splitlines`.
fn is_line_break(c: char) -> bool {
    matches!(
        c,
        '\n' | '\r' | '\x0b' | '\x0c' | '\x1c' | '\x1d' | '\x1e' | '\u{85}' | '\u{2028}' | '\u{2029}'
    )
}

/// Splits `s` the way `str.splitlines(keepends=True)` does: every line keeps
/// its terminator and `\r\n` counts as one.
fn split_lines(s: &str) -> impl Iterator<Item = &str> {
    let mut rest = s;
    std::iter::from_fn(move || {
        if rest.is_empty() {
            return None;
        }
        let end = match rest.char_indices().find(|&(_, c)| is_line_break(c)) {
            Some((i, '\r')) if rest[i + 1..].starts_with('\n') => i + 2,
            Some((i, c)) => i + c.len_utf8(),
            None => rest.len(),
        };
        let (line, tail) = rest.split_at(end);
        rest = tail;
        Some(line)
    })
}

impl fmt::Debug for TextLogStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<TextLogStream {:?}>", self.buffer.tag)
    }
}

impl fmt::Write for TextLogStream {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        TextLogStream::write(self, s);
        Ok(())
    }
}

impl Drop for TextLogStream {
    fn drop(&mut self) {
        self.flush();
    }
}
