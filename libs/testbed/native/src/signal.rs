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

//! # Signal bridge
//!
//! Signal operations the test runner needs but cannot perform from managed
//! code: process-directed delivery, unblocking on the calling thread, and
//! stopping a single thread. Android doesn't implement `pthread_cancel`, but
//! forcing a thread to run a handler that exits it has a similar effect.

use crate::error::{OsContext, Result};
use log::{debug, warn};
use nix::errno::Errno;
use nix::sys::signal::{self as nix_signal, SigHandler, Signal};
use nix::unistd;
use std::io::Write;
use std::sync::{LazyLock, Mutex};
use std::time::Duration;
use std::{io, mem, thread};

/// Default signal used to stop threads.
pub const KILL_THREAD_SIGNAL: Signal = Signal::SIGUSR2;

/// Default time a stopped thread gets to exit before it is probed.
pub const KILL_THREAD_PROBE_DELAY: Duration = Duration::from_millis(100);

// The exit handler is installed process-wide, so only one kill may be in
// flight at a time.
static KILL_THREAD_LOCK: LazyLock<Mutex<()>> = LazyLock::new(|| Mutex::new(()));

/// Sends `sig` to the current process. Zero only checks that the process exists.
pub fn send_signal(sig: libc::c_int) -> Result<()> {
    // SAFETY: kill has no memory safety requirements.
    Errno::result(unsafe { libc::kill(unistd::getpid().as_raw(), sig) }).step("kill")?;
    debug!("Sent signal {} to the process", sig);
    Ok(())
}

/// Removes `sig` from the calling thread's blocked set.
pub fn unblock_signal(sig: libc::c_int) -> Result<()> {
    let mut set = mem::MaybeUninit::<libc::sigset_t>::uninit();
    // SAFETY: `set` is valid for writes.
    Errno::result(unsafe { libc::sigemptyset(set.as_mut_ptr()) }).step("sigemptyset")?;
    // SAFETY: `set` was initialized by sigemptyset.
    Errno::result(unsafe { libc::sigaddset(set.as_mut_ptr(), sig) }).step("sigaddset")?;
    // SAFETY: `set` is initialized and the old set isn't requested.
    Errno::result(unsafe {
        libc::sigprocmask(libc::SIG_UNBLOCK, set.as_ptr(), std::ptr::null_mut())
    })
    .step("sigprocmask")?;
    Ok(())
}

/// What [`kill_thread`] observed after the probe delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// The thread no longer exists.
    Exited,
    /// The thread could still be signalled after the delay. It may be blocking
    /// the signal, or simply slow to exit.
    StillAlive,
}

impl Termination {
    /// Whether the thread was gone at the probe.
    pub fn exited(self) -> bool {
        self == Termination::Exited
    }
}

/// Settings for [`kill_thread_with`].
#[derive(Debug, Clone, Copy)]
pub struct KillThreadConfig {
    signal: Signal,
    probe_delay: Duration,
}

impl Default for KillThreadConfig {
    fn default() -> Self {
        Self { signal: KILL_THREAD_SIGNAL, probe_delay: KILL_THREAD_PROBE_DELAY }
    }
}

impl KillThreadConfig {
    /// Uses `signal` for the exit handler. Its previous disposition is
    /// restored afterwards.
    pub fn with_signal(mut self, signal: Signal) -> Self {
        self.signal = signal;
        self
    }

    pub fn with_probe_delay(mut self, probe_delay: Duration) -> Self {
        self.probe_delay = probe_delay;
        self
    }

    pub fn signal(&self) -> Signal {
        self.signal
    }

    pub fn probe_delay(&self) -> Duration {
        self.probe_delay
    }
}

/// Calls the raw exit system call, which terminates only the current thread.
extern "C" fn exit_handler(_sig: libc::c_int) {
    // SAFETY: SYS_exit never returns and is async-signal-safe.
    unsafe {
        libc::syscall(libc::SYS_exit, 0);
    }
}

fn tgkill(tid: libc::pid_t, sig: Signal) -> nix::Result<()> {
    // SAFETY: tgkill has no memory safety requirements.
    let ret = unsafe {
        libc::syscall(libc::SYS_tgkill, unistd::getpid().as_raw(), tid, sig as libc::c_int)
    };
    Errno::result(ret).map(drop)
}

/// Stops the thread with kernel id `tid` using the default configuration.
pub fn kill_thread(tid: libc::pid_t) -> Result<Termination> {
    kill_thread_with(tid, &KillThreadConfig::default())
}

/// Stops the thread with kernel id `tid` by making it run a handler that exits.
///
/// This is best effort. After the delay the thread is probed with the same
/// signal; if it still exists a diagnostic goes to stderr and
/// [`Termination::StillAlive`] is returned. The previous handler is restored
/// in every case.
pub fn kill_thread_with(tid: libc::pid_t, config: &KillThreadConfig) -> Result<Termination> {
    let _guard = KILL_THREAD_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let sig = config.signal;

    // SAFETY: `exit_handler` only performs an async-signal-safe system call.
    let old_handler = unsafe { nix_signal::signal(sig, SigHandler::Handler(exit_handler)) }
        .step("signal (install)")?;

    let result = deliver_and_probe(tid, config);

    // SAFETY: `old_handler` was the disposition in place before this call.
    let restored = unsafe { nix_signal::signal(sig, old_handler) }.step("signal (uninstall)");

    let termination = result?;
    restored?;
    Ok(termination)
}

fn deliver_and_probe(tid: libc::pid_t, config: &KillThreadConfig) -> Result<Termination> {
    tgkill(tid, config.signal).step("tgkill")?;

    // After a short delay, verify that the thread has exited.
    thread::sleep(config.probe_delay);
    if tgkill(tid, config.signal).is_ok() {
        let message =
            format!("SignalCatcher TID {} still exists - signal tests may be unreliable", tid);
        // The same line goes to the log below, so a failed stderr write loses nothing.
        writeln!(io::stderr(), "{}", message).ok();
        warn!("{}", message);
        return Ok(Termination::StillAlive);
    }
    debug!("Thread {} exited", tid);
    Ok(Termination::Exited)
}
