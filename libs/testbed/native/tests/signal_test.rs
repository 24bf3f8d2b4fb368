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
mod signal_tests {
    use nix::errno::Errno;
    use nix::sys::signal::{self, SigHandler, SigSet, Signal};
    use nix::unistd;
    use serial_test::serial;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::thread;
    use std::time::{Duration, Instant};
    use testbed_native::signal::{
        kill_thread, kill_thread_with, send_signal, unblock_signal, KillThreadConfig, Termination,
    };

    static USR1_COUNT: AtomicUsize = AtomicUsize::new(0);

    extern "C" fn count_usr1(_sig: libc::c_int) {
        USR1_COUNT.fetch_add(1, Ordering::SeqCst);
    }

    fn wait_until(timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if done() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        done()
    }

    fn task_exists(tid: libc::pid_t) -> bool {
        Path::new(&format!("/proc/self/task/{}", tid)).exists()
    }

    /// Sets the disposition of `sig` and returns the previous one.
    fn set_handler(sig: Signal, handler: SigHandler) -> SigHandler {
        unsafe { signal::signal(sig, handler) }.expect("Failed to set signal handler")
    }

    #[test]
    #[serial]
    fn send_signal_runs_installed_handler() {
        let old = set_handler(Signal::SIGUSR1, SigHandler::Handler(count_usr1));
        let before = USR1_COUNT.load(Ordering::SeqCst);

        send_signal(Signal::SIGUSR1 as libc::c_int).expect("send_signal failed");
        assert!(wait_until(Duration::from_secs(1), || USR1_COUNT.load(Ordering::SeqCst) > before));

        set_handler(Signal::SIGUSR1, old);
    }

    #[test]
    #[serial]
    fn unblocking_delivers_pending_signal() {
        let old = set_handler(Signal::SIGUSR1, SigHandler::Handler(count_usr1));

        // Run on a fresh thread so the test harness thread's mask is untouched.
        thread::spawn(|| {
            let mut set = SigSet::empty();
            set.add(Signal::SIGUSR1);
            set.thread_block().unwrap();

            let before = USR1_COUNT.load(Ordering::SeqCst);
            signal::raise(Signal::SIGUSR1).unwrap();
            assert_eq!(USR1_COUNT.load(Ordering::SeqCst), before, "signal should be pending");

            unblock_signal(Signal::SIGUSR1 as libc::c_int).expect("unblock_signal failed");
            assert_eq!(USR1_COUNT.load(Ordering::SeqCst), before + 1);
        })
        .join()
        .unwrap();

        set_handler(Signal::SIGUSR1, old);
    }

    #[test]
    #[serial]
    fn kill_thread_stops_thread_blocked_in_syscall() {
        let (tid_tx, tid_rx) = mpsc::channel();
        let (read_end, _write_end) = unistd::pipe().unwrap();
        thread::spawn(move || {
            tid_tx.send(unistd::gettid().as_raw()).unwrap();
            let mut buf = [0u8; 1];
            let _ = unistd::read(std::os::fd::AsRawFd::as_raw_fd(&read_end), &mut buf);
        });
        let tid = tid_rx.recv().unwrap();
        assert!(task_exists(tid));

        assert_eq!(kill_thread(tid).expect("kill_thread failed"), Termination::Exited);
        assert!(wait_until(Duration::from_secs(1), || !task_exists(tid)));
    }

    #[test]
    #[serial]
    fn surviving_thread_is_reported_and_handler_restored() {
        let old = set_handler(Signal::SIGUSR2, SigHandler::SigIgn);

        let (tid_tx, tid_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let survivor = thread::spawn(move || {
            let mut set = SigSet::empty();
            set.add(Signal::SIGUSR2);
            set.thread_block().unwrap();
            tid_tx.send(unistd::gettid().as_raw()).unwrap();
            let _ = release_rx.recv();
        });
        let tid = tid_rx.recv().unwrap();

        let config = KillThreadConfig::default().with_probe_delay(Duration::from_millis(20));
        let termination = kill_thread_with(tid, &config).expect("kill_thread failed");
        assert_eq!(termination, Termination::StillAlive);
        assert!(!termination.exited());
        assert!(task_exists(tid));

        // The ignore disposition is back in place, which also drops the pending signals.
        assert!(matches!(set_handler(Signal::SIGUSR2, old), SigHandler::SigIgn));

        release_tx.send(()).unwrap();
        survivor.join().unwrap();
    }

    #[test]
    #[serial]
    fn missing_thread_fails_at_tgkill_and_restores_handler() {
        let old = set_handler(Signal::SIGUSR2, SigHandler::SigIgn);

        let err = kill_thread(i32::MAX).unwrap_err();
        assert_eq!(err.op(), Some("tgkill"));
        assert_eq!(err.errno(), Some(Errno::ESRCH));
        assert_eq!(err.to_string(), "tgkill: No such process");

        assert!(matches!(set_handler(Signal::SIGUSR2, old), SigHandler::SigIgn));
    }

    #[test]
    #[serial]
    fn custom_kill_signal() {
        let (tid_tx, tid_rx) = mpsc::channel();
        let (_release_tx, release_rx) = mpsc::channel::<()>();
        thread::spawn(move || {
            tid_tx.send(unistd::gettid().as_raw()).unwrap();
            let _ = release_rx.recv();
        });
        let tid = tid_rx.recv().unwrap();

        let config = KillThreadConfig::default().with_signal(Signal::SIGUSR1);
        assert!(kill_thread_with(tid, &config).unwrap().exited());
        assert!(wait_until(Duration::from_secs(1), || !task_exists(tid)));
    }
}
