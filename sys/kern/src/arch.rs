// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Architecture-specific support.
//!
//! In practice, this works by
//!
//! - Conditionally defining a nested module (below).
//! - `pub use`-ing its contents
//!
//! Thus, all architecture-specific types and functions show up right here in
//! the `arch` module, tailored for the current target. Each architecture
//! support module must define `reset`.
//!
//! The board-facing half of the interface is the [`Platform`] trait, which the
//! kernel uses for timing, the watchdog and its console.

/// Formats a line to a [`Platform`]'s console.
///
/// ```ignore
/// klog!(self.platform, "ready queue full, dropping {:?}", id);
/// ```
#[macro_export]
macro_rules! klog {
    ($platform:expr, $($arg:tt)*) => {{
        use core::fmt::Write as _;
        let mut console = $crate::arch::Console::new(&mut $platform);
        // Console writes can't fail.
        let _ = writeln!(console, $($arg)*);
    }};
}

/// Services the kernel needs from the board it's running on.
pub trait Platform {
    /// Busy-waits for at least `ms` milliseconds.
    fn delay_ms(&mut self, ms: u32);

    /// Restarts the watchdog countdown.
    fn pet_watchdog(&mut self);

    /// Emits one byte on the console.
    fn putc(&mut self, byte: u8);
}

/// Adapts a [`Platform`]'s `putc` to `core::fmt::Write`.
pub struct Console<'a, P: Platform + ?Sized>(&'a mut P);

impl<'a, P: Platform + ?Sized> Console<'a, P> {
    pub fn new(platform: &'a mut P) -> Self {
        Self(platform)
    }
}

impl<P: Platform + ?Sized> core::fmt::Write for Console<'_, P> {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        for b in s.bytes() {
            if b == b'\n' {
                self.0.putc(b'\r');
            }
            self.0.putc(b);
        }
        Ok(())
    }
}

cfg_if::cfg_if! {
    if #[cfg(target_arch = "arm")] {
        pub mod arm_m;
        pub use arm_m::*;
    } else {
        pub mod fake;
        pub use fake::*;
    }
}
