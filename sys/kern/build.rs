// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::env;
use std::fs::File;
use std::io::Write;
use std::path::PathBuf;

use abi::KernelConfig;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    generate_statics()?;

    Ok(())
}

fn generate_statics() -> Result<(), Box<dyn std::error::Error>> {
    println!("cargo:rerun-if-env-changed=SPRINTER_KCONFIG");
    let kconfig: KernelConfig = match env::var("SPRINTER_KCONFIG") {
        Ok(text) => ron::de::from_str(&text)?,
        Err(env::VarError::NotPresent) => KernelConfig::default(),
        Err(e) => return Err(e.into()),
    };
    kconfig.validate().map_err(|e| e.to_string())?;

    let out = &PathBuf::from(env::var_os("OUT_DIR").ok_or("OUT_DIR unset")?);
    let mut file = File::create(out.join("kconfig.rs"))?;

    writeln!(file, "// See build.rs for details")?;
    writeln!(
        file,
        "/// Number of slots in the task table.\n\
         pub const MAX_TASKS: usize = {};",
        kconfig.max_tasks
    )?;
    writeln!(
        file,
        "/// Capacity of the scheduler's ready queue.\n\
         pub const READY_QUEUE_DEPTH: usize = {};",
        kconfig.ready_queue_depth
    )?;
    writeln!(
        file,
        "/// Score weight of a task's estimated execution time.\n\
         pub const ALPHA: u32 = {};",
        kconfig.alpha
    )?;
    writeln!(
        file,
        "/// Score weight of a task's priority.\n\
         pub const BETA: u32 = {};",
        kconfig.beta
    )?;
    writeln!(
        file,
        "/// Smallest stack, in bytes, a task may be given.\n\
         pub const MIN_STACK_SIZE: u16 = {:#x};",
        kconfig.min_stack_size
    )?;
    writeln!(
        file,
        "/// Main loop sleep when the ready queue is empty.\n\
         pub const IDLE_DELAY_MS: u32 = {};",
        kconfig.idle_delay_ms
    )?;
    writeln!(
        file,
        "/// Number of entries in the kernel trace ring.\n\
         pub const TRACE_DEPTH: usize = {};",
        kconfig.trace_depth
    )?;

    Ok(())
}
