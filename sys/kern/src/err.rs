// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Common error-handling support.
//!
//! Each component reports failure through its own error enum, so callers that
//! only touch the heap (say) don't have to match on task-table conditions.
//! Code that strings several components together, like the kernel object in
//! `startup`, uses `KernError`, which every component error converts into so
//! that `?` works.
//!
//! Everything here maps onto the three-way `abi::ResponseCode`: any error is
//! `Err`. The only way to produce `NoOp` is `heap::Freed::AlreadyFree`.

use abi::ResponseCode;

/// Failures reported by the heap allocator.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum HeapError {
    /// The region handed to `Heap::init` can't hold even one block header
    /// past its first aligned byte.
    RegionTooSmall,
    /// The region handed to `Heap::init` is too big to be addressed by the
    /// 32-bit offsets used in block headers.
    RegionTooLarge,
    /// No free block is large enough for the request.
    OutOfMemory,
    /// The block header at `offset` doesn't hold up: its signature is neither
    /// zero nor `SIGNATURE`, or its links don't tile the region. The walk
    /// stopped there; nothing was modified.
    Corrupt { offset: u32 },
    /// The handle doesn't name an allocated block.
    InvalidHandle,
}

/// Failures reported by the task table.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TaskError {
    /// Every slot is occupied.
    Full,
    /// The identifier doesn't name any slot in the table, or names a slot
    /// that is currently empty.
    NotFound,
    /// The identifier names a slot that has since been reused. The task it
    /// referred to is gone.
    Stale,
    /// Another task is already `Running`.
    AlreadyRunning,
    /// The requested stack is smaller than `MIN_STACK_SIZE` or not a multiple
    /// of 8 bytes.
    BadStack,
}

/// Failures reported by the ready queue.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SchedError {
    /// The ready queue is at capacity; the record was not added.
    QueueFull,
}

/// Umbrella error for operations that cross components.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum KernError {
    Heap(HeapError),
    Task(TaskError),
    Sched(SchedError),
}

impl KernError {
    /// A fatal error means the kernel's own bookkeeping can no longer be
    /// trusted. The only way out is to reset.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Heap(HeapError::Corrupt { .. }))
    }
}

impl From<HeapError> for KernError {
    fn from(e: HeapError) -> Self {
        Self::Heap(e)
    }
}

impl From<TaskError> for KernError {
    fn from(e: TaskError) -> Self {
        Self::Task(e)
    }
}

impl From<SchedError> for KernError {
    fn from(e: SchedError) -> Self {
        Self::Sched(e)
    }
}

impl From<HeapError> for ResponseCode {
    fn from(_: HeapError) -> Self {
        ResponseCode::Err
    }
}

impl From<TaskError> for ResponseCode {
    fn from(_: TaskError) -> Self {
        ResponseCode::Err
    }
}

impl From<SchedError> for ResponseCode {
    fn from(_: SchedError) -> Self {
        ResponseCode::Err
    }
}

impl From<KernError> for ResponseCode {
    fn from(_: KernError) -> Self {
        ResponseCode::Err
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::Freed;

    #[test]
    fn component_errors_compose_with_question_mark() {
        fn inner() -> Result<(), KernError> {
            Err::<(), _>(TaskError::Stale)?;
            Ok(())
        }
        assert_eq!(inner(), Err(KernError::Task(TaskError::Stale)));
    }

    #[test]
    fn free_outcomes_map_to_three_way_codes() {
        let released: Result<Freed, HeapError> = Ok(Freed::Released);
        let again: Result<Freed, HeapError> = Ok(Freed::AlreadyFree);
        let bogus: Result<Freed, HeapError> = Err(HeapError::InvalidHandle);

        assert_eq!(ResponseCode::from(released), ResponseCode::Ok);
        assert_eq!(ResponseCode::from(again), ResponseCode::NoOp);
        assert_eq!(ResponseCode::from(bogus), ResponseCode::Err);
    }

    #[test]
    fn only_heap_corruption_is_fatal() {
        let corrupt = KernError::from(HeapError::Corrupt { offset: 0x40 });
        assert!(corrupt.is_fatal());
        for e in [
            KernError::Heap(HeapError::OutOfMemory),
            KernError::Heap(HeapError::InvalidHandle),
            KernError::Task(TaskError::Stale),
            KernError::Sched(SchedError::QueueFull),
        ] {
            assert!(!e.is_fatal(), "{e:?}");
        }
    }

    #[test]
    fn every_kernel_error_is_err() {
        for e in [
            KernError::Heap(HeapError::OutOfMemory),
            KernError::Task(TaskError::Full),
            KernError::Sched(SchedError::QueueFull),
        ] {
            assert_eq!(ResponseCode::from(e), ResponseCode::Err);
        }
    }
}
