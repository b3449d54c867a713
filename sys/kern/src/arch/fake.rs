// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Stand-in architecture for building and testing the kernel on a host.

use super::Platform;

/// Console bytes kept by `FakePlatform`; anything past this is dropped.
pub const CONSOLE_CAPACITY: usize = 1024;

pub fn reset() -> ! {
    panic!("SYSTEM RESET");
}

/// A `Platform` that doesn't wait for anything, and remembers what it was
/// asked to do.
#[derive(Debug, Default)]
pub struct FakePlatform {
    console: heapless::Vec<u8, CONSOLE_CAPACITY>,
    delays: usize,
    delayed_ms: u64,
    pets: usize,
}

impl FakePlatform {
    pub fn new() -> Self {
        Self::default()
    }

    /// Console output so far. Anything that isn't UTF-8 reads as empty.
    pub fn console(&self) -> &str {
        core::str::from_utf8(&self.console).unwrap_or("")
    }

    /// Number of calls to `delay_ms`.
    pub fn delays(&self) -> usize {
        self.delays
    }

    /// Sum of all requested delays.
    pub fn delayed_ms(&self) -> u64 {
        self.delayed_ms
    }

    pub fn pets(&self) -> usize {
        self.pets
    }
}

impl Platform for FakePlatform {
    fn delay_ms(&mut self, ms: u32) {
        self.delays += 1;
        self.delayed_ms += u64::from(ms);
    }

    fn pet_watchdog(&mut self) {
        self.pets += 1;
    }

    fn putc(&mut self, byte: u8) {
        let _ = self.console.push(byte);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn klog_ends_lines_for_a_serial_terminal() {
        let mut p = FakePlatform::new();
        klog!(p, "hello {}", 42);
        assert_eq!(p.console(), "hello 42\r\n");
    }

    #[test]
    fn console_drops_overflow() {
        let mut p = FakePlatform::new();
        for _ in 0..CONSOLE_CAPACITY + 10 {
            p.putc(b'x');
        }
        assert_eq!(p.console().len(), CONSOLE_CAPACITY);
    }

    #[test]
    fn records_delays_and_pets() {
        let mut p = FakePlatform::new();
        p.delay_ms(3);
        p.delay_ms(4);
        p.pet_watchdog();

        assert_eq!(p.delays(), 2);
        assert_eq!(p.delayed_ms(), 7);
        assert_eq!(p.pets(), 1);
    }
}
