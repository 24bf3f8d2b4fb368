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

#[cfg(test)]
mod stdio_tests {
    use nix::errno::Errno;
    use nix::sys::resource::{getrlimit, setrlimit, Resource};
    use serial_test::serial;
    use nix::unistd;
    use std::os::fd::AsRawFd;
    use std::sync::Arc;
    use std::time::Duration;
    use testbed_native::log_sink::{RecordingSink, Record};
    use testbed_native::stdio::{redirect_streams, StdStream, StreamConfig};
    use testbed_native::{Priority, MAX_BYTES_PER_WRITE};

    const WAIT: Duration = Duration::from_secs(5);

    fn messages(records: &[Record]) -> Vec<u8> {
        records.iter().flat_map(|r| r.message.iter().copied()).collect()
    }

    #[test]
    #[serial]
    fn writes_to_redirected_fd_become_records() {
        let target = tempfile::tempfile().expect("Failed to create temp file");
        let sink = Arc::new(RecordingSink::new());
        let streams = [StreamConfig::new(target.as_raw_fd(), Priority::Info, "native.stdout")];

        redirect_streams(&streams, sink.clone()).expect("redirect failed");
        unistd::write(&target, b"Hello world").unwrap();

        let records = sink.wait_for(WAIT, |r| !r.is_empty());
        assert_eq!(
            records,
            vec![Record {
                priority: Priority::Info,
                tag: "native.stdout".into(),
                message: b"Hello world".to_vec(),
            }]
        );
    }

    #[test]
    #[serial]
    fn each_stream_keeps_its_own_tag_and_priority() {
        let out = tempfile::tempfile().unwrap();
        let err = tempfile::tempfile().unwrap();
        let sink = Arc::new(RecordingSink::new());
        let streams = [
            StreamConfig::new(out.as_raw_fd(), Priority::Info, "native.stdout"),
            StreamConfig::new(err.as_raw_fd(), Priority::Warn, "native.stderr"),
        ];

        redirect_streams(&streams, sink.clone()).unwrap();
        unistd::write(&err, b"to stderr").unwrap();
        assert_eq!(sink.wait_for(WAIT, |r| !r.is_empty()).len(), 1);
        unistd::write(&out, b"to stdout").unwrap();
        let records = sink.wait_for(WAIT, |r| r.len() == 2);

        assert_eq!(records[0].tag, "native.stderr");
        assert_eq!(records[0].priority, Priority::Warn);
        assert_eq!(records[0].message, b"to stderr");
        assert_eq!(records[1].tag, "native.stdout");
        assert_eq!(records[1].priority, Priority::Info);
        assert_eq!(records[1].message, b"to stdout");
    }

    #[test]
    #[serial]
    fn long_writes_are_chunked_below_the_limit() {
        let target = tempfile::tempfile().unwrap();
        let sink = Arc::new(RecordingSink::new());
        let streams = [StreamConfig::new(target.as_raw_fd(), Priority::Warn, "native.stderr")];
        redirect_streams(&streams, sink.clone()).unwrap();

        let payload: Vec<u8> = (0..10_000).map(|i| b'a' + (i % 26) as u8).collect();
        let mut written = 0;
        while written < payload.len() {
            written += unistd::write(&target, &payload[written..]).unwrap();
        }

        let records = sink.wait_for(WAIT, |r| messages(r).len() >= payload.len());
        assert!(records.len() >= 3);
        assert!(records.iter().all(|r| r.message.len() <= MAX_BYTES_PER_WRITE - 1));
        assert_eq!(messages(&records), payload);
    }

    #[test]
    #[serial]
    fn nul_bytes_truncate_the_record() {
        let target = tempfile::tempfile().unwrap();
        let sink = Arc::new(RecordingSink::new());
        let streams = [StreamConfig::new(target.as_raw_fd(), Priority::Info, "native.stdout")];
        redirect_streams(&streams, sink.clone()).unwrap();

        unistd::write(&target, b"a\0b").unwrap();
        let records = sink.wait_for(WAIT, |r| !r.is_empty());
        assert_eq!(records[0].message, b"a");
    }

    #[test]
    #[serial]
    fn invalid_target_fails_at_dup2() {
        let sink = Arc::new(RecordingSink::new());
        let streams = [StreamConfig::new(-1, Priority::Info, "native.stdout")];

        let err = redirect_streams(&streams, sink).unwrap_err();
        assert_eq!(err.op(), Some("dup2"));
        assert_eq!(err.errno(), Some(Errno::EBADF));
        assert!(err.to_string().starts_with("dup2: "));
    }

    #[test]
    #[serial]
    fn setup_stops_at_first_failure() {
        let good = tempfile::tempfile().unwrap();
        let sink = Arc::new(RecordingSink::new());
        let streams = [
            StreamConfig::new(-1, Priority::Info, "native.stdout"),
            StreamConfig::new(good.as_raw_fd(), Priority::Warn, "native.stderr"),
        ];

        assert!(redirect_streams(&streams, sink.clone()).is_err());

        // The second stream was never touched, so writes still reach the file.
        unistd::write(&good, b"plain").unwrap();
        let records = sink.wait_for(Duration::from_millis(100), |r| !r.is_empty());
        assert!(records.is_empty());
    }

    #[test]
    #[serial]
    fn descriptor_exhaustion_fails_at_pipe() {
        let target = tempfile::tempfile().unwrap();
        let sink = Arc::new(RecordingSink::new());
        let streams = [StreamConfig::new(target.as_raw_fd(), Priority::Info, "native.stdout")];

        let (soft, hard) = getrlimit(Resource::RLIMIT_NOFILE).unwrap();
        setrlimit(Resource::RLIMIT_NOFILE, 0, hard).unwrap();
        let result = redirect_streams(&streams, sink);
        setrlimit(Resource::RLIMIT_NOFILE, soft, hard).unwrap();

        let err = result.unwrap_err();
        assert_eq!(err.op(), Some("pipe"));
        assert_eq!(err.errno(), Some(Errno::EMFILE));
        assert_eq!(err.to_string(), "pipe: Too many open files");

        // Nothing was redirected, so writes still reach the file.
        assert_eq!(unistd::write(&target, b"plain").unwrap(), 5);
    }

    #[test]
    #[serial]
    fn stream_with_file_is_unbuffered_and_redirected() {
        let target = tempfile::tempfile().unwrap();
        let sink = Arc::new(RecordingSink::new());
        // Only the stdio buffering of stdout changes; its descriptor is untouched.
        let streams = [StreamConfig::new(target.as_raw_fd(), Priority::Warn, "native.stderr")
            .with_file(StdStream::Stdout)];

        redirect_streams(&streams, sink.clone()).expect("redirect failed");
        unistd::write(&target, b"unbuffered").unwrap();

        let records = sink.wait_for(WAIT, |r| !r.is_empty());
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].priority, Priority::Warn);
        assert_eq!(records[0].tag, "native.stderr");
        assert_eq!(records[0].message, b"unbuffered");
    }
}
