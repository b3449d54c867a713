// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Architecture support for ARMv{6,7,8}-M.
//!
//! # Memory layout
//!
//! The linker script places static data at the bottom of RAM and the main
//! stack at the top, reserving `_Min_Stack_Size` bytes for it. Everything in
//! between belongs to the kernel heap:
//!
//! ```text
//! _end                              _estack - _Min_Stack_Size     _estack
//!  |------------- heap_region() ------------|---- main stack ------|
//! ```
//!
//! `_Min_Stack_Size` is an absolute symbol; its *address* is the size.

use core::ptr::{addr_of, addr_of_mut};

use super::Platform;

extern "C" {
    static mut _end: u8;
    static _estack: u8;
    #[allow(non_upper_case_globals)]
    static _Min_Stack_Size: u8;
}

/// Returns the memory between the end of static data and the bottom of the
/// main stack reservation.
///
/// # Safety
///
/// This hands out a `'static` mutable view of memory nothing else claims, so
/// it may be called at most once per boot.
pub unsafe fn heap_region() -> &'static mut [u8] {
    // Safety: we only take addresses here, and never read through them.
    let (start, top, reserve) = unsafe {
        (
            addr_of_mut!(_end),
            addr_of!(_estack) as usize,
            addr_of!(_Min_Stack_Size) as usize,
        )
    };
    let end = top.saturating_sub(reserve);
    let len = end.saturating_sub(start as usize);

    // Safety: the linker guarantees `_end..end` is RAM nobody else uses, and
    // our caller guarantees we're only handing it out once.
    unsafe { core::slice::from_raw_parts_mut(start, len) }
}

pub fn reset() -> ! {
    cortex_m::peripheral::SCB::sys_reset()
}

/// Generic Cortex-M platform. Timing comes from spinning the core; the console
/// and watchdog are board-specific and supplied as functions.
pub struct CortexM {
    cycles_per_ms: u32,
    putc: fn(u8),
    pet: fn(),
}

impl CortexM {
    /// `cycles_per_ms` is the core clock in kHz.
    pub const fn new(cycles_per_ms: u32, putc: fn(u8), pet: fn()) -> Self {
        Self {
            cycles_per_ms,
            putc,
            pet,
        }
    }
}

impl Platform for CortexM {
    fn delay_ms(&mut self, ms: u32) {
        for _ in 0..ms {
            cortex_m::asm::delay(self.cycles_per_ms);
        }
    }

    fn pet_watchdog(&mut self) {
        (self.pet)();
    }

    fn putc(&mut self, byte: u8) {
        (self.putc)(byte);
    }
}
