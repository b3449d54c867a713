// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Descriptor types, used to describe tasks to the kernel.
//!
//! A task is described in two halves. `TaskDesc` says *what* the task is: its
//! code, its argument, and how much stack it needs. `SchedParams` says *when*
//! it should run relative to its peers. The task table keeps both; the ready
//! queue only ever sees a `SchedRecord` derived from them.

use abi::{Priority, TaskId, TaskState};

/// Entry point of a task. The argument is opaque to the kernel.
pub type TaskEntry = fn(usize);

/// Record describing a single task.
#[derive(Copy, Clone, Debug)]
pub struct TaskDesc {
    /// Function run when the task is dispatched.
    pub entry: TaskEntry,
    /// Argument passed to `entry`.
    pub arg: usize,
    /// Size of the task's stack, in bytes. Must be a multiple of 8 and at
    /// least `config::MIN_STACK_SIZE`.
    pub stack_size: u16,
    /// Collection of boolean flags controlling task behavior.
    pub flags: TaskFlags,
}

bitflags::bitflags! {
    #[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
    #[repr(transparent)]
    pub struct TaskFlags: u8 {
        /// Put the task on the ready queue as soon as it is spawned.
        const START_AT_BOOT = 1 << 0;
    }
}

/// Scheduling inputs for a task.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct SchedParams {
    pub priority: Priority,
    /// Estimated execution time, in whatever unit the creator of the task
    /// uses consistently. The scheduler only ever compares these.
    pub estimated_time: u32,
    /// Moment the task became known to the kernel. Carried for the benefit of
    /// the dispatcher; it does not affect ordering.
    pub arrival_time: u32,
}

/// Location of a task's stack once it has been allocated.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct StackDesc {
    /// Address of the heap block backing the stack.
    pub base: usize,
    pub size: u16,
}

/// What the ready queue holds for a task: enough to order it, and enough for
/// the dispatcher to start it without going back to the task table.
///
/// `id` is generation-checked, so a record that outlives its task simply
/// fails to resolve when it is dispatched.
#[derive(Copy, Clone, Debug)]
pub struct SchedRecord {
    pub id: TaskId,
    pub params: SchedParams,
    /// State of the task when the record was made.
    pub state: TaskState,
    pub entry: TaskEntry,
    pub arg: usize,
}
