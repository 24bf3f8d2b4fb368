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

//! # Runtime launcher
//!
//! Starts the embedded interpreter in isolated mode with an explicit home
//! directory and entry module, then runs it to completion on the calling
//! thread.
//!
//! The interpreter's C API is reached through [`RuntimeApi`], and [`Launcher`]
//! enforces the order of calls:
//!
//! ```text
//! Unconfigured -> Configured -> Initialized -> Running -> Terminated
//! ```
//!
//! A configuration or initialization failure moves straight to `Terminated`.

use crate::error::{Error, Result};
use log::{error, info};
use std::ffi::CString;

mod cpython;

pub use cpython::{CPython, RuntimeLibrary};

/// Settings for one interpreter launch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    home: String,
    run_module: String,
    install_signal_handlers: bool,
    library: Option<String>,
}

impl RuntimeConfig {
    /// Runs `run_module` as `__main__` using the standard library under `home`.
    pub fn new(home: impl Into<String>, run_module: impl Into<String>) -> Self {
        Self {
            home: home.into(),
            run_module: run_module.into(),
            install_signal_handlers: true,
            library: None,
        }
    }

    /// Loads the C API from `library` instead of looking in the process.
    pub fn with_library(mut self, library: impl Into<String>) -> Self {
        self.library = Some(library.into());
        self
    }

    /// Whether the runtime installs its own signal handlers. Enabled by
    /// default: some tests generate SIGPIPE and SIGXFSZ, which must be ignored.
    pub fn with_install_signal_handlers(mut self, install: bool) -> Self {
        self.install_signal_handlers = install;
        self
    }

    pub fn home(&self) -> &str {
        &self.home
    }

    pub fn run_module(&self) -> &str {
        &self.run_module
    }

    pub fn install_signal_handlers(&self) -> bool {
        self.install_signal_handlers
    }

    pub fn library(&self) -> Option<&str> {
        self.library.as_deref()
    }
}

/// The embedded runtime's configuration and startup calls.
///
/// Each call maps onto one step of the C initialization API. Failures carry
/// the runtime's own diagnostic as [`Error::Runtime`].
pub trait RuntimeApi {
    /// Sets the directory holding the standard library.
    fn set_home(&mut self, home: &std::ffi::CStr) -> Result<()>;

    /// Sets the module run as `__main__`.
    fn set_run_module(&mut self, module: &std::ffi::CStr) -> Result<()>;

    /// Lets the runtime install its own signal handlers.
    fn set_install_signal_handlers(&mut self, install: bool);

    /// Initializes the runtime from the configuration built so far.
    fn initialize(&mut self) -> Result<()>;

    /// Runs the configured module and finalizes the runtime, returning the
    /// process exit status it would have used.
    fn run_main(&mut self) -> i32;
}

/// Where a [`Launcher`] is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LauncherState {
    Unconfigured,
    Configured,
    Initialized,
    Running,
    /// Finished. `exit_status` is `None` when startup failed.
    Terminated { exit_status: Option<i32> },
}

impl LauncherState {
    fn name(self) -> &'static str {
        match self {
            LauncherState::Unconfigured => "unconfigured",
            LauncherState::Configured => "configured",
            LauncherState::Initialized => "initialized",
            LauncherState::Running => "running",
            LauncherState::Terminated { .. } => "terminated",
        }
    }
}

/// Drives a [`RuntimeApi`] through configuration, initialization and run.
pub struct Launcher<A: RuntimeApi> {
    api: A,
    state: LauncherState,
}

impl<A: RuntimeApi> Launcher<A> {
    pub fn new(api: A) -> Self {
        Self { api, state: LauncherState::Unconfigured }
    }

    pub fn state(&self) -> LauncherState {
        self.state
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    fn expect_state(&self, expected: LauncherState, operation: &'static str) -> Result<()> {
        if self.state != expected {
            return Err(Error::InvalidState { operation, state: self.state.name() });
        }
        Ok(())
    }

    /// Copies `config` into the runtime's isolated configuration.
    pub fn configure(&mut self, config: &RuntimeConfig) -> Result<()> {
        self.expect_state(LauncherState::Unconfigured, "configure")?;
        let result = self.apply(config);
        self.state = match result {
            Ok(()) => LauncherState::Configured,
            Err(_) => LauncherState::Terminated { exit_status: None },
        };
        result
    }

    fn apply(&mut self, config: &RuntimeConfig) -> Result<()> {
        let home = CString::new(config.home.as_str()).map_err(|_| Error::InteriorNul("home"))?;
        let run_module = CString::new(config.run_module.as_str())
            .map_err(|_| Error::InteriorNul("run module"))?;
        self.api.set_home(&home)?;
        self.api.set_run_module(&run_module)?;
        self.api.set_install_signal_handlers(config.install_signal_handlers);
        Ok(())
    }

    /// Initializes the runtime from the applied configuration.
    pub fn initialize(&mut self) -> Result<()> {
        self.expect_state(LauncherState::Configured, "initialize")?;
        let result = self.api.initialize();
        self.state = match result {
            Ok(()) => LauncherState::Initialized,
            Err(_) => LauncherState::Terminated { exit_status: None },
        };
        result
    }

    /// Runs the runtime to completion and returns its exit status.
    pub fn run(&mut self) -> Result<i32> {
        self.expect_state(LauncherState::Initialized, "run")?;
        self.state = LauncherState::Running;
        let exit_status = self.api.run_main();
        self.state = LauncherState::Terminated { exit_status: Some(exit_status) };
        Ok(exit_status)
    }
}

/// Configures, initializes and runs the interpreter described by `config`.
///
/// Blocks until the entry module finishes and returns its exit status.
pub fn launch(config: &RuntimeConfig) -> Result<i32> {
    let api = CPython::load(config.library())?;
    let mut launcher = Launcher::new(api);
    let startup = launcher.configure(config).and_then(|()| launcher.initialize());
    if let Err(e) = startup {
        error!("Failed to start the interpreter: {}", e);
        return Err(e);
    }

    info!("Running module {} with home {}", config.run_module(), config.home());
    let exit_status = launcher.run()?;
    info!("Module {} exited with status {}", config.run_module(), exit_status);
    Ok(exit_status)
}
