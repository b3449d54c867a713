// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Kernel heap.
//!
//! The heap manages one contiguous region of bytes. The region is carved into
//! blocks, each of which starts with a `BlockHeader` stored *in the region*
//! and is followed by the bytes it governs:
//!
//! ```text
//!  0                                                               span
//!  +--------+----------+--------+------------------+--------+-------+
//!  | header | payload  | header |  payload         | header |  ...  |
//!  +--------+----------+--------+------------------+--------+-------+
//!  ^ head                                                   ^ tail
//! ```
//!
//! Headers are linked into a doubly-linked list by offset. The list is in
//! address order and the blocks tile the region exactly: a block's `next` is
//! always `offset + HEADER_SIZE + size`, and the tail block ends at the end of
//! the region.
//!
//! Allocation is first-fit. A block with more than a header's worth of
//! surplus is split, and the remainder becomes a new free block. Freeing does
//! *not* merge neighbours; that is left for a separate compaction pass.
//!
//! Because headers live alongside payloads, a task that writes past the end
//! of its block will trample its neighbour's header. Each header carries a
//! signature (`SIGNATURE` when allocated, zero when free) and the walk checks
//! the links as it goes, so that sort of damage is reported as
//! `HeapError::Corrupt` rather than being followed.
//!
//! Headers and payloads are kept 8-byte aligned: `init` skips any misaligned
//! bytes at the front of the region, and requests are rounded up to a multiple
//! of 8, so every split lands on an aligned offset.
//!
//! Callers name blocks by `BlockHandle`, which is the offset of the block's
//! *header*. There is no way to get a handle from a payload, and no way to
//! get at a payload without going through the heap, which checks the handle.

use abi::TaskId;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::err::HeapError;

/// Value stored in the header of every allocated block.
pub const SIGNATURE: u32 = 0x0427_7DC9;

/// Bytes taken up by the header in front of every block.
pub const HEADER_SIZE: usize = core::mem::size_of::<BlockHeader>();

const H: u32 = HEADER_SIZE as u32;

/// Alignment of every header and payload.
pub const ALIGN: usize = 8;

static_assertions::const_assert_eq!(HEADER_SIZE % ALIGN, 0);

/// Link value meaning "no block".
const NIL: u32 = u32::MAX;

const FREE: u32 = 0;
const ALLOCATED: u32 = 1;
const NO_OWNER: u32 = TaskId::NULL.0 as u32;

/// In-memory block header. All fields are native-endian words so the header
/// can be read and written with plain copies at any offset.
#[derive(Copy, Clone, Debug, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C)]
struct BlockHeader {
    allocated: u32,
    signature: u32,
    /// Payload bytes governed by this block, not counting the header.
    size: u32,
    /// `TaskId` of the task that allocated the block, or `NO_OWNER`.
    owner: u32,
    prev: u32,
    next: u32,
}

impl BlockHeader {
    fn free(size: u32, prev: u32, next: u32) -> Self {
        Self {
            allocated: FREE,
            signature: 0,
            size,
            owner: NO_OWNER,
            prev,
            next,
        }
    }

    fn is_allocated(&self) -> bool {
        self.allocated == ALLOCATED
    }
}

/// Names a block by the offset of its header within the heap.
///
/// Handles are plain values and can be forged; every operation that takes
/// one checks it before trusting it.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct BlockHandle(u32);

impl BlockHandle {
    pub fn from_offset(offset: u32) -> Self {
        Self(offset)
    }

    pub fn offset(self) -> u32 {
        self.0
    }
}

/// Successful outcomes of `Heap::free`.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Freed {
    /// The block was allocated and is now free.
    Released,
    /// The block was already free. Nothing changed.
    AlreadyFree,
}

impl From<Freed> for abi::ResponseCode {
    fn from(f: Freed) -> Self {
        match f {
            Freed::Released => abi::ResponseCode::Ok,
            Freed::AlreadyFree => abi::ResponseCode::NoOp,
        }
    }
}

/// Snapshot of one block, as seen by `Heap::blocks`.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct BlockInfo {
    pub handle: BlockHandle,
    pub size: usize,
    /// Owning task, for allocated blocks.
    pub owner: Option<TaskId>,
}

impl BlockInfo {
    pub fn is_allocated(&self) -> bool {
        self.owner.is_some()
    }
}

/// Usage summary produced by `Heap::verify`.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct HeapStats {
    pub blocks: usize,
    pub allocated_blocks: usize,
    pub allocated_bytes: usize,
    pub free_bytes: usize,
    pub largest_free: usize,
}

/// First-fit allocator over a borrowed region.
#[derive(Debug)]
pub struct Heap<'m> {
    mem: &'m mut [u8],
    head: u32,
    tail: u32,
}

impl<'m> Heap<'m> {
    /// Takes over `mem` and lays a single free block across all of it,
    /// starting at the first `ALIGN`-aligned byte.
    ///
    /// Fails if what's left can't hold one header, or is too large to address
    /// with 32-bit offsets.
    pub fn init(mem: &'m mut [u8]) -> Result<Self, HeapError> {
        let skip = mem.as_ptr().align_offset(ALIGN);
        let mem = match mem.get_mut(skip..) {
            Some(mem) if mem.len() >= HEADER_SIZE => mem,
            _ => return Err(HeapError::RegionTooSmall),
        };
        let span = u32::try_from(mem.len())
            .ok()
            .filter(|&s| s != NIL)
            .ok_or(HeapError::RegionTooLarge)?;

        let mut heap = Heap { mem, head: 0, tail: 0 };
        heap.store(0, &BlockHeader::free(span - H, NIL, NIL))?;
        Ok(heap)
    }

    /// Allocates `size` bytes, rounded up to a multiple of `ALIGN`, on behalf
    /// of `owner`.
    ///
    /// Walks the blocks in address order and takes the first free one that is
    /// big enough. If more than a header's worth of bytes would be left over,
    /// the block is split and the remainder becomes a new free block;
    /// otherwise the whole block is handed out, slack included.
    ///
    /// Any block on the walk that fails its consistency checks stops the
    /// allocation with `HeapError::Corrupt`. Nothing is modified in that case.
    pub fn alloc(
        &mut self,
        size: usize,
        owner: TaskId,
    ) -> Result<BlockHandle, HeapError> {
        let size = size
            .checked_add(ALIGN - 1)
            .map(|s| s & !(ALIGN - 1))
            .and_then(|s| u32::try_from(s).ok())
            .ok_or(HeapError::OutOfMemory)?;

        let mut prev = NIL;
        let mut cursor = self.head;
        while cursor != NIL {
            let block = self.load(cursor)?;
            self.check(cursor, prev, &block)?;

            if !block.is_allocated() && block.size >= size {
                self.claim(cursor, block, size, owner)?;
                return Ok(BlockHandle(cursor));
            }

            prev = cursor;
            cursor = block.next;
        }

        Err(HeapError::OutOfMemory)
    }

    /// Marks the free block at `at` allocated, splitting off the tail end if
    /// it is worth keeping as its own block.
    fn claim(
        &mut self,
        at: u32,
        mut block: BlockHeader,
        size: u32,
        owner: TaskId,
    ) -> Result<(), HeapError> {
        block.allocated = ALLOCATED;
        block.signature = SIGNATURE;
        block.owner = u32::from(owner.0);

        let surplus = block.size - size;
        if surplus > H {
            let rest_at = at + H + size;
            let rest = BlockHeader::free(surplus - H, at, block.next);

            if block.next == NIL {
                self.tail = rest_at;
            } else {
                let mut next = self.load(block.next)?;
                next.prev = rest_at;
                self.store(block.next, &next)?;
            }
            self.store(rest_at, &rest)?;

            block.size = size;
            block.next = rest_at;
        }

        self.store(at, &block)
    }

    /// Releases the block named by `handle`.
    ///
    /// Freeing a block that is already free is harmless and reported as
    /// `Freed::AlreadyFree`. A handle that doesn't point at a block header
    /// with a recognizable signature is rejected with `InvalidHandle`.
    ///
    /// Neighbouring free blocks are not merged.
    pub fn free(&mut self, handle: BlockHandle) -> Result<Freed, HeapError> {
        let at = handle.0;
        if !self.header_fits(at) {
            return Err(HeapError::InvalidHandle);
        }
        let mut block = self.load(at)?;

        match block.signature {
            0 => Ok(Freed::AlreadyFree),
            SIGNATURE => {
                block.allocated = FREE;
                block.owner = NO_OWNER;
                block.signature = 0;
                self.store(at, &block)?;
                Ok(Freed::Released)
            }
            _ => Err(HeapError::InvalidHandle),
        }
    }

    /// Frees every block allocated on behalf of `owner`, returning how many
    /// there were.
    pub fn free_owned_by(&mut self, owner: TaskId) -> Result<usize, HeapError> {
        let owner = u32::from(owner.0);
        let mut released = 0;

        let mut prev = NIL;
        let mut cursor = self.head;
        while cursor != NIL {
            let mut block = self.load(cursor)?;
            self.check(cursor, prev, &block)?;
            let next = block.next;

            if block.is_allocated() && block.owner == owner {
                block.allocated = FREE;
                block.owner = NO_OWNER;
                block.signature = 0;
                self.store(cursor, &block)?;
                released += 1;
            }

            prev = cursor;
            cursor = next;
        }

        Ok(released)
    }

    /// Returns the task that allocated the block named by `handle`.
    pub fn owner(&self, handle: BlockHandle) -> Result<TaskId, HeapError> {
        let block = self.allocated_block(handle)?;
        Ok(TaskId(block.owner as u16))
    }

    /// Returns the payload size of the block named by `handle`. This can be
    /// larger than what was asked for, if the block was too small to split.
    pub fn size(&self, handle: BlockHandle) -> Result<usize, HeapError> {
        let block = self.allocated_block(handle)?;
        Ok(block.size as usize)
    }

    /// Borrows the payload of an allocated block.
    pub fn payload(&self, handle: BlockHandle) -> Result<&[u8], HeapError> {
        let range = self.payload_range(handle)?;
        self.mem.get(range).ok_or(HeapError::InvalidHandle)
    }

    /// Mutably borrows the payload of an allocated block.
    pub fn payload_mut(
        &mut self,
        handle: BlockHandle,
    ) -> Result<&mut [u8], HeapError> {
        let range = self.payload_range(handle)?;
        self.mem.get_mut(range).ok_or(HeapError::InvalidHandle)
    }

    /// Address of the header of the block named by `handle`.
    pub fn addr(&self, handle: BlockHandle) -> usize {
        self.mem.as_ptr() as usize + handle.0 as usize
    }

    /// Converts a header address back into a handle, if it falls inside the
    /// heap with room for a header. This does not check that a block actually
    /// starts there.
    pub fn handle_at(&self, addr: usize) -> Option<BlockHandle> {
        let offset = addr.checked_sub(self.mem.as_ptr() as usize)?;
        let offset = u32::try_from(offset).ok()?;
        self.header_fits(offset).then_some(BlockHandle(offset))
    }

    /// Total bytes managed, headers included.
    pub fn span(&self) -> usize {
        self.mem.len()
    }

    pub fn head(&self) -> BlockHandle {
        BlockHandle(self.head)
    }

    pub fn tail(&self) -> BlockHandle {
        BlockHandle(self.tail)
    }

    /// Walks the blocks in address order.
    ///
    /// Each item is checked the same way `alloc` checks it; the first block
    /// that fails produces an `Err` and ends the walk.
    pub fn blocks(&self) -> Blocks<'_, 'm> {
        Blocks {
            heap: self,
            prev: NIL,
            cursor: self.head,
        }
    }

    /// Checks every block and the head/tail pointers, and summarizes usage.
    pub fn verify(&self) -> Result<HeapStats, HeapError> {
        let mut stats = HeapStats::default();
        let mut last = NIL;

        for info in self.blocks() {
            let info = info?;
            stats.blocks += 1;
            if info.is_allocated() {
                stats.allocated_blocks += 1;
                stats.allocated_bytes += info.size;
            } else {
                stats.free_bytes += info.size;
                stats.largest_free = stats.largest_free.max(info.size);
            }
            last = info.handle.0;
        }

        if last != self.tail {
            return Err(HeapError::Corrupt { offset: self.tail });
        }
        Ok(stats)
    }

    fn payload_range(
        &self,
        handle: BlockHandle,
    ) -> Result<core::ops::Range<usize>, HeapError> {
        let block = self.allocated_block(handle)?;
        let start = handle.0 as usize + HEADER_SIZE;
        let end = start
            .checked_add(block.size as usize)
            .ok_or(HeapError::InvalidHandle)?;
        Ok(start..end)
    }

    fn allocated_block(
        &self,
        handle: BlockHandle,
    ) -> Result<BlockHeader, HeapError> {
        if !self.header_fits(handle.0) {
            return Err(HeapError::InvalidHandle);
        }
        let block = self.load(handle.0)?;
        if block.signature != SIGNATURE || !block.is_allocated() {
            return Err(HeapError::InvalidHandle);
        }
        Ok(block)
    }

    /// Validates the header found at `at`, reached from `prev`.
    fn check(
        &self,
        at: u32,
        prev: u32,
        block: &BlockHeader,
    ) -> Result<(), HeapError> {
        let corrupt = HeapError::Corrupt { offset: at };

        match (block.allocated, block.signature) {
            (FREE, 0) | (ALLOCATED, SIGNATURE) => (),
            _ => return Err(corrupt),
        }
        if block.prev != prev {
            return Err(corrupt);
        }

        let end = at
            .checked_add(H)
            .and_then(|e| e.checked_add(block.size))
            .ok_or(corrupt)?;
        let expected_next = if end as usize == self.mem.len() {
            NIL
        } else {
            end
        };
        if block.next != expected_next || end as usize > self.mem.len() {
            return Err(corrupt);
        }
        Ok(())
    }

    fn header_fits(&self, at: u32) -> bool {
        (at as usize)
            .checked_add(HEADER_SIZE)
            .is_some_and(|end| end <= self.mem.len())
    }

    fn load(&self, at: u32) -> Result<BlockHeader, HeapError> {
        let bytes = self
            .mem
            .get(at as usize..)
            .ok_or(HeapError::Corrupt { offset: at })?;
        BlockHeader::read_from_prefix(bytes)
            .map(|(header, _rest)| header)
            .map_err(|_| HeapError::Corrupt { offset: at })
    }

    fn store(
        &mut self,
        at: u32,
        header: &BlockHeader,
    ) -> Result<(), HeapError> {
        let bytes = self
            .mem
            .get_mut(at as usize..)
            .ok_or(HeapError::Corrupt { offset: at })?;
        header
            .write_to_prefix(bytes)
            .map_err(|_| HeapError::Corrupt { offset: at })
    }
}

#[cfg(test)]
impl Heap<'_> {
    /// Overwrites word `field` of the header at `at`, the way a stray store
    /// from a neighbouring block would.
    pub(crate) fn scribble(&mut self, at: u32, field: usize, value: u32) {
        let at = at as usize + field * 4;
        self.mem[at..at + 4].copy_from_slice(&value.to_ne_bytes());
    }
}

/// Iterator returned by `Heap::blocks`.
pub struct Blocks<'h, 'm> {
    heap: &'h Heap<'m>,
    prev: u32,
    cursor: u32,
}

impl Iterator for Blocks<'_, '_> {
    type Item = Result<BlockInfo, HeapError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor == NIL {
            return None;
        }
        let at = self.cursor;

        let block = match self.heap.load(at) {
            Ok(b) => b,
            Err(e) => {
                self.cursor = NIL;
                return Some(Err(e));
            }
        };
        if let Err(e) = self.heap.check(at, self.prev, &block) {
            self.cursor = NIL;
            return Some(Err(e));
        }

        self.prev = at;
        self.cursor = block.next;
        Some(Ok(BlockInfo {
            handle: BlockHandle(at),
            size: block.size as usize,
            owner: block
                .is_allocated()
                .then_some(TaskId(block.owner as u16)),
        }))
    }
}
