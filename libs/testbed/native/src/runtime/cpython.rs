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

use super::RuntimeApi;
use crate::error::{Error, Result};
use log::debug;
use libc::wchar_t;
use pyo3_ffi::{PyConfig, PyStatus};
use std::ffi::{c_char, c_int, c_void, CStr, CString};
use std::fs;
use std::path::PathBuf;
use std::ptr;

// Library searched for in the process when none is configured.
const LIBRARY_PREFIX: &str = "libpython3";

macro_rules! bail_with_dlerror {
    ($fmt:literal $(, $($arg:tt)+)?) => {
        {
            // SAFETY: trivially safe.
            let error = unsafe { libc::dlerror() };
            let detail = if error.is_null() {
                String::from("unknown error")
            } else {
                // SAFETY: `error` is a pointer to a valid C string returned by `dlerror()`.
                unsafe { CStr::from_ptr(error) }.to_string_lossy().into_owned()
            };
            return Err(Error::Library { context: format!($fmt $(, $($arg)+)?), detail });
        }
    };
}

/// Handle to the library holding the runtime's C API.
///
/// The interpreter cannot be unloaded, so the handle is never closed.
pub struct RuntimeLibrary {
    handle: *mut c_void,
}

impl RuntimeLibrary {
    /// Looks symbols up in every library already loaded into the global
    /// namespace.
    pub fn global() -> Self {
        Self { handle: libc::RTLD_DEFAULT }
    }

    /// Loads `library_name`, or reuses it if the host already loaded it.
    pub fn open(library_name: &str) -> Result<Self> {
        let library = CString::new(library_name).map_err(|_| Error::InteriorNul("library name"))?;
        // SAFETY: `library` is a valid C string. The runtime library has no
        // initialization routines that depend on being loaded at a particular time.
        let handle = unsafe { libc::dlopen(library.as_ptr(), libc::RTLD_NOW | libc::RTLD_GLOBAL) };
        if handle.is_null() {
            bail_with_dlerror!("Failed to open the library {}", library_name);
        }
        Ok(Self { handle })
    }

    /// Finds an already mapped library whose file name starts with `prefix`.
    pub fn find_loaded(prefix: &str) -> Option<PathBuf> {
        let maps = fs::read_to_string("/proc/self/maps").ok()?;
        maps.lines()
            .filter_map(|line| line.split_whitespace().nth(5))
            .map(PathBuf::from)
            .find(|path| {
                path.file_name()
                    .and_then(|name| name.to_str())
                    .is_some_and(|name| name.starts_with(prefix) && name.contains(".so"))
            })
    }

    pub fn find_symbol(&self, symbol_name: &str) -> Result<*mut c_void> {
        let symbol = CString::new(symbol_name).map_err(|_| Error::InteriorNul("symbol name"))?;
        // SAFETY: `self.handle` is a valid library handle or RTLD_DEFAULT, and
        // `symbol` is a valid C string.
        let symbol_handle = unsafe { libc::dlsym(self.handle, symbol.as_ptr()) };
        if symbol_handle.is_null() {
            bail_with_dlerror!("Failed to find the symbol {}", symbol_name);
        }
        Ok(symbol_handle)
    }
}

type InitIsolatedConfigFn = unsafe extern "C" fn(*mut PyConfig);
type SetBytesStringFn =
    unsafe extern "C" fn(*mut PyConfig, *mut *mut wchar_t, *const c_char) -> PyStatus;
type StatusExceptionFn = unsafe extern "C" fn(PyStatus) -> c_int;
type InitializeFromConfigFn = unsafe extern "C" fn(*const PyConfig) -> PyStatus;
type ConfigClearFn = unsafe extern "C" fn(*mut PyConfig);
type RunMainFn = unsafe extern "C" fn() -> c_int;

struct Symbols {
    init_isolated_config: InitIsolatedConfigFn,
    set_bytes_string: SetBytesStringFn,
    status_exception: StatusExceptionFn,
    initialize_from_config: InitializeFromConfigFn,
    config_clear: ConfigClearFn,
    run_main: RunMainFn,
}

macro_rules! resolve {
    ($library:expr, $name:literal) => {{
        let symbol = $library.find_symbol($name)?;
        // SAFETY: the symbol is the CPython API function of the same name, whose
        // signature matches the field it is assigned to.
        unsafe { std::mem::transmute::<*mut c_void, _>(symbol) }
    }};
}

impl Symbols {
    fn resolve(library: &RuntimeLibrary) -> Result<Self> {
        Ok(Self {
            init_isolated_config: resolve!(library, "PyConfig_InitIsolatedConfig"),
            set_bytes_string: resolve!(library, "PyConfig_SetBytesString"),
            status_exception: resolve!(library, "PyStatus_Exception"),
            initialize_from_config: resolve!(library, "Py_InitializeFromConfig"),
            config_clear: resolve!(library, "PyConfig_Clear"),
            run_main: resolve!(library, "Py_RunMain"),
        })
    }
}

/// [`RuntimeApi`] backed by CPython's `PyConfig` initialization API.
pub struct CPython {
    symbols: Symbols,
    // Boxed so the address handed to C stays fixed.
    config: Box<PyConfig>,
}

impl CPython {
    /// Resolves the C API and creates an isolated configuration.
    ///
    /// Without `library`, symbols are taken from the global namespace, then from
    /// any `libpython3*` already mapped into the process.
    pub fn load(library: Option<&str>) -> Result<Self> {
        let symbols = match library {
            Some(name) => Symbols::resolve(&RuntimeLibrary::open(name)?)?,
            None => match Symbols::resolve(&RuntimeLibrary::global()) {
                Ok(symbols) => symbols,
                Err(global_err) => {
                    let Some(path) = RuntimeLibrary::find_loaded(LIBRARY_PREFIX) else {
                        return Err(global_err);
                    };
                    debug!("Using runtime library {}", path.display());
                    Symbols::resolve(&RuntimeLibrary::open(&path.to_string_lossy())?)?
                }
            },
        };

        // SAFETY: PyConfig only holds integers and pointers, for which all zeroes
        // is valid. It is fully initialized by the call below.
        let mut config: Box<PyConfig> = Box::new(unsafe { std::mem::zeroed() });
        // SAFETY: `config` points to writable memory of the right size.
        unsafe { (symbols.init_isolated_config)(&mut *config) };
        Ok(Self { symbols, config })
    }

    fn check(&self, status: PyStatus) -> Result<()> {
        let err_msg = status.err_msg;
        // SAFETY: `status` was returned by the runtime.
        if unsafe { (self.symbols.status_exception)(status) } == 0 {
            return Ok(());
        }
        let message = if err_msg.is_null() {
            String::new()
        } else {
            // SAFETY: a non-null `err_msg` points to a static C string.
            unsafe { CStr::from_ptr(err_msg) }.to_string_lossy().into_owned()
        };
        Err(Error::Runtime(message))
    }

    fn set_string(
        &mut self,
        field: fn(*mut PyConfig) -> *mut *mut wchar_t,
        value: &CStr,
    ) -> Result<()> {
        let config: *mut PyConfig = &mut *self.config;
        // SAFETY: `config` is an initialized PyConfig and `field` returns a
        // pointer to one of its string members.
        let status =
            unsafe { (self.symbols.set_bytes_string)(config, field(config), value.as_ptr()) };
        self.check(status)
    }
}

impl RuntimeApi for CPython {
    fn set_home(&mut self, home: &CStr) -> Result<()> {
        // SAFETY: `config` is valid; only the field address is taken.
        self.set_string(|config| unsafe { ptr::addr_of_mut!((*config).home) }, home)
    }

    fn set_run_module(&mut self, module: &CStr) -> Result<()> {
        // SAFETY: `config` is valid; only the field address is taken.
        self.set_string(|config| unsafe { ptr::addr_of_mut!((*config).run_module) }, module)
    }

    fn set_install_signal_handlers(&mut self, install: bool) {
        self.config.install_signal_handlers = c_int::from(install);
    }

    fn initialize(&mut self) -> Result<()> {
        // SAFETY: `config` is an initialized PyConfig.
        let status = unsafe { (self.symbols.initialize_from_config)(&*self.config) };
        self.check(status)
    }

    fn run_main(&mut self) -> i32 {
        // SAFETY: only reached after a successful initialize().
        unsafe { (self.symbols.run_main)() }
    }
}

impl Drop for CPython {
    fn drop(&mut self) {
        // The runtime copies the configuration during initialization, so it can
        // always be released here.
        // SAFETY: `config` was initialized by PyConfig_InitIsolatedConfig.
        unsafe { (self.symbols.config_clear)(&mut *self.config) };
    }
}
