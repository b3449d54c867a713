// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! SprinterOS kernel core.
//!
//! This is the part of the system that runs after the bootloader has brought
//! up clocks and peripherals and handed over control. It provides the
//! primitive building blocks of an RTOS:
//!
//! - [`heap`]: a first-fit allocator over one contiguous region, with block
//!   headers stored in the region itself.
//! - [`task`]: a fixed-capacity table of task control blocks.
//! - [`sched`]: a bounded ready queue ordered by a weighted score.
//! - [`startup`]: the kernel object tying the three together, and the main
//!   loop.
//!
//! # Design principles
//!
//! 1. Static configuration. Table sizes and scheduling weights are fixed at
//!    build time (see [`config`]).
//! 2. Cooperative and synchronous. Every operation runs to completion and
//!    returns a definite result; nothing here preempts anything. A future
//!    preemptive dispatcher will have to wrap every mutating call in a
//!    critical section, since none of the multi-step updates are atomic.
//! 3. A strong preference for safe code where reasonable. The only `unsafe`
//!    is in the architecture layer, where we have to talk to the linker.
//! 4. A preference for simple and clear algorithms over fast and clever
//!    algorithms.

// Allow std-y things to be used in test.
#![cfg_attr(not(test), no_std)]
#![forbid(clippy::wildcard_imports)]

#[macro_use]
pub mod trace;

#[macro_use]
pub mod arch;

pub mod config;
pub mod descs;
pub mod err;
pub mod heap;
pub mod sched;
pub mod startup;
pub mod task;
