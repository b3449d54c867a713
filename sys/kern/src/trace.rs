// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Kernel trace ring.
//!
//! A fixed-size ring of recent kernel events, meant to be read out of a
//! halted target with a debugger, or out of a `Kernel` in a test. The type in
//! the ring must implement both `Copy` and `PartialEq`.
//!
//! Entries are recorded with [`ktrace!`], which stamps them with the source
//! line:
//!
//! ```ignore
//! ktrace!(self, Trace::Dispatched(id));
//! ```
//!
//! When an entry is recorded with an identical payload to the most recent
//! entry (in terms of both `line` and `payload`), the existing entry's `count`
//! is incremented rather than using up a new slot. Every slot also carries a
//! generation that goes up each time it is overwritten, so a reader can tell
//! how many times the ring has gone around.

use abi::TaskId;

/// Records an entry into anything implementing [`Record`], tagged with the
/// current line number.
#[macro_export]
macro_rules! ktrace {
    ($sink:expr, $payload:expr) => {
        $crate::trace::Record::record(&mut *$sink, line!() as u16, $payload)
    };
}

/// Something that accepts trace entries.
pub trait Record<T> {
    fn record(&mut self, line: u16, payload: T);
}

/// Events the kernel leaves in its trace ring.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Trace {
    /// Filler for slots that haven't been written.
    None,
    Spawned(TaskId),
    /// The heap couldn't supply a stack, so the task was withdrawn.
    StackDenied(TaskId),
    Queued(TaskId),
    QueueFull(TaskId),
    Dispatched(TaskId),
    /// A queued record named a task that no longer exists.
    StaleRecord(TaskId),
    Suspended(TaskId),
    Reclaimed { id: TaskId, blocks: u16 },
    Killed(TaskId),
    HeapCorrupt { offset: u32 },
    Idle,
}

/// A single entry in a [`Ringbuf`].
#[derive(Debug, Copy, Clone)]
pub struct RingbufEntry<T: Copy + PartialEq> {
    pub line: u16,
    pub generation: u16,
    pub count: u32,
    pub payload: T,
}

/// A ring buffer of parametrized type and size.
#[derive(Debug)]
pub struct Ringbuf<T: Copy + PartialEq, const N: usize> {
    last: Option<usize>,
    buffer: [RingbufEntry<T>; N],
}

impl<T: Copy + PartialEq, const N: usize> Ringbuf<T, N> {
    /// Creates an empty ring, with every slot holding `filler`.
    pub const fn new(filler: T) -> Self {
        Self {
            last: None,
            buffer: [RingbufEntry {
                line: 0,
                generation: 0,
                count: 0,
                payload: filler,
            }; N],
        }
    }

    pub fn entry(&mut self, line: u16, payload: T) {
        // Treat an untouched ring as having an out-of-range last index, so
        // the first entry lands in slot 0 and never bumps a count.
        let last = self.last.unwrap_or(usize::MAX);

        if let Some(ent) = self.buffer.get_mut(last) {
            if ent.line == line && ent.payload == payload {
                // Only reuse this entry if we don't overflow the count.
                if let Some(new_count) = ent.count.checked_add(1) {
                    ent.count = new_count;
                    return;
                }
            }
        }

        // Wraps usize::MAX to 0 for the starting case.
        let ndx = {
            let last_plus_1 = last.wrapping_add(1);
            if last_plus_1 >= self.buffer.len() {
                0
            } else {
                last_plus_1
            }
        };

        // N == 0 leaves nothing to write.
        if let Some(ent) = self.buffer.get_mut(ndx) {
            *ent = RingbufEntry {
                line,
                payload,
                count: 1,
                generation: ent.generation.wrapping_add(1),
            };
            self.last = Some(ndx);
        }
    }

    /// The most recently written entry.
    pub fn last(&self) -> Option<&RingbufEntry<T>> {
        self.last.and_then(|i| self.buffer.get(i))
    }

    /// Walks the written entries from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &RingbufEntry<T>> + '_ {
        let start = self.last.map_or(0, |i| i + 1);
        let (newer, older) = self.buffer.split_at(start.min(N));
        older.iter().chain(newer).filter(|e| e.count != 0)
    }
}

impl<T: Copy + PartialEq, const N: usize> Record<T> for Ringbuf<T, N> {
    fn record(&mut self, line: u16, payload: T) {
        self.entry(line, payload);
    }
}
