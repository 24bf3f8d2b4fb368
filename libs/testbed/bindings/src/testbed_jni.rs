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

//! # PythonTestRunner native methods
//!
//! Every entry point maps onto one operation of `testbed_native`. Failures are
//! raised as `java.lang.RuntimeException` carrying the error's message.
use anyhow::{Context, Result};
use jni::objects::{JObject, JString};
use jni::sys::jint;
use jni::JNIEnv;
use log::{error, info, trace, LevelFilter};
use std::fmt::Display;
use std::sync::Arc;
use testbed_native::runtime::{self, RuntimeConfig};
use testbed_native::signal::{self, Termination};
use testbed_native::stdio;
use testbed_native::{logging, PlatformLog};

const RUNTIME_EXCEPTION: &str = "java/lang/RuntimeException";

fn init_logging() {
    logging::init("testbed", LevelFilter::Info);
}

fn throw_runtime_exception(env: &mut JNIEnv, message: impl Display) {
    if let Err(e) = env.throw_new(RUNTIME_EXCEPTION, message.to_string()) {
        error!("Failed to throw {}: {}", RUNTIME_EXCEPTION, e);
    }
}

fn get_string(env: &mut JNIEnv, value: &JString, name: &str) -> Result<String> {
    let value = env.get_string(value).with_context(|| format!("Failed to read {}", name))?;
    Ok(value.into())
}

/// Redirects the native stdout and stderr to logcat.
#[no_mangle]
pub extern "system" fn Java_org_python_testbed_PythonTestRunner_redirectStdioToLogcat<'a>(
    mut env: JNIEnv<'a>,
    _obj: JObject<'a>,
) {
    init_logging();
    if let Err(e) = stdio::redirect_streams(&stdio::standard_streams(), Arc::new(PlatformLog)) {
        throw_runtime_exception(&mut env, e);
    }
}

/// Sends a signal to the current process.
#[no_mangle]
pub extern "system" fn Java_org_python_testbed_PythonTestRunner_sendSignal<'a>(
    mut env: JNIEnv<'a>,
    _obj: JObject<'a>,
    sig: jint,
) {
    trace!("sendSignal with {}", sig);
    if let Err(e) = signal::send_signal(sig) {
        throw_runtime_exception(&mut env, e);
    }
}

/// Forces the thread with the given kernel id to exit.
#[no_mangle]
pub extern "system" fn Java_org_python_testbed_PythonTestRunner_killThread<'a>(
    mut env: JNIEnv<'a>,
    _obj: JObject<'a>,
    tid: jint,
) {
    init_logging();
    match signal::kill_thread(tid) {
        Ok(Termination::Exited) => info!("Thread {} exited", tid),
        // Already reported on stderr.
        Ok(Termination::StillAlive) => {}
        Err(e) => throw_runtime_exception(&mut env, e),
    }
}

/// Unblocks a signal on the calling thread.
#[no_mangle]
pub extern "system" fn Java_org_python_testbed_PythonTestRunner_unblockSignal<'a>(
    mut env: JNIEnv<'a>,
    _obj: JObject<'a>,
    sig: jint,
) {
    trace!("unblockSignal with {}", sig);
    if let Err(e) = signal::unblock_signal(sig) {
        throw_runtime_exception(&mut env, e);
    }
}

fn run_python(env: &mut JNIEnv, home: &JString, run_module: &JString) -> Result<jint> {
    let home = get_string(env, home, "home")?;
    let run_module = get_string(env, run_module, "runModule")?;
    Ok(runtime::launch(&RuntimeConfig::new(home, run_module))?)
}

/// Runs the interpreter to completion and returns its exit status.
#[no_mangle]
pub extern "system" fn Java_org_python_testbed_PythonTestRunner_runPython<'a>(
    mut env: JNIEnv<'a>,
    _obj: JObject<'a>,
    home: JString<'a>,
    run_module: JString<'a>,
) -> jint {
    init_logging();
    match run_python(&mut env, &home, &run_module) {
        Ok(status) => status,
        Err(e) => {
            // Keep the runtime's message unchanged; only JNI failures add context.
            throw_runtime_exception(&mut env, format!("{:#}", e));
            1
        }
    }
}
