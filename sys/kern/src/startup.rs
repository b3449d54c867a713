// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Kernel startup, and the kernel object.
//!
//! `Kernel` owns one each of the heap, the task table and the ready queue, plus
//! the board's `Platform`. It's the only thing that moves a task through its
//! whole life:
//!
//! ```text
//! spawn ──> make_ready ──> dispatch ──> (entry runs) ──> exit
//!   │                         ↑
//!   └── START_AT_BOOT ────────┘
//! ```
//!
//! Tasks run to completion: `step` calls the entry point and reclaims the task
//! as soon as it returns, releasing everything it allocated.

use abi::TaskId;

use crate::arch::Platform;
use crate::config;
use crate::descs::{SchedParams, SchedRecord, StackDesc, TaskDesc, TaskFlags};
use crate::err::{HeapError, KernError, TaskError};
use crate::heap::{Heap, HEADER_SIZE};
use crate::sched::Scheduler;
use crate::task::{Task, TaskStore};
use crate::trace::{Record, Ringbuf, Trace};

pub struct Kernel<'m, P: Platform> {
    heap: Heap<'m>,
    tasks: TaskStore,
    sched: Scheduler,
    trace: Ringbuf<Trace, { config::TRACE_DEPTH }>,
    platform: P,
}

impl<'m, P: Platform> Kernel<'m, P> {
    /// Brings up a kernel with an empty task table and ready queue, using
    /// `heap_region` for task stacks and anything else tasks allocate.
    pub fn new(
        heap_region: &'m mut [u8],
        platform: P,
    ) -> Result<Self, KernError> {
        Ok(Self {
            heap: Heap::init(heap_region)?,
            tasks: TaskStore::new(),
            sched: Scheduler::new(),
            trace: Ringbuf::new(Trace::None),
            platform,
        })
    }

    /// Creates a task and allocates its stack from the heap.
    ///
    /// If there's no room for the stack, the task is withdrawn again. Tasks
    /// flagged `START_AT_BOOT` are put straight on the ready queue; if that
    /// fails, the task is withdrawn too.
    pub fn spawn(
        &mut self,
        desc: TaskDesc,
        params: SchedParams,
    ) -> Result<TaskId, KernError> {
        let id = self.tasks.add(desc, params)?;

        let block = match self.heap.alloc(usize::from(desc.stack_size), id) {
            Ok(block) => block,
            Err(e) => {
                ktrace!(self, Trace::StackDenied(id));
                self.tasks.remove(id)?;
                return Err(self.heap_failed(e));
            }
        };
        self.tasks.set_stack(
            id,
            StackDesc {
                base: self.heap.addr(block) + HEADER_SIZE,
                size: desc.stack_size,
            },
        )?;
        ktrace!(self, Trace::Spawned(id));

        if desc.flags.contains(TaskFlags::START_AT_BOOT) {
            if let Err(e) = self.make_ready(id) {
                self.exit(id)?;
                return Err(e);
            }
        }
        Ok(id)
    }

    /// Puts `id` on the ready queue.
    pub fn make_ready(&mut self, id: TaskId) -> Result<(), KernError> {
        let record = self.tasks.sched_record(id)?;
        if let Err(e) = self.sched.add(record) {
            ktrace!(self, Trace::QueueFull(id));
            klog!(self.platform, "ready queue full, dropping {:#x}", id.0);
            return Err(e.into());
        }
        ktrace!(self, Trace::Queued(id));
        Ok(())
    }

    /// Takes the best record off the ready queue and marks its task running.
    ///
    /// Records whose task has gone away since they were queued are thrown
    /// away. Returns `None` once the queue runs dry.
    pub fn dispatch(&mut self) -> Result<Option<SchedRecord>, KernError> {
        if self.tasks.running().is_some() {
            return Err(TaskError::AlreadyRunning.into());
        }

        while let Some(record) = self.sched.next() {
            match self.tasks.run(record.id) {
                Ok(()) => {
                    ktrace!(self, Trace::Dispatched(record.id));
                    return Ok(Some(record));
                }
                Err(TaskError::Stale | TaskError::NotFound) => {
                    ktrace!(self, Trace::StaleRecord(record.id));
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(None)
    }

    /// Runs the next ready task to completion and reclaims it, returning its
    /// identifier, or `None` if nothing was ready.
    pub fn step(&mut self) -> Result<Option<TaskId>, KernError> {
        let Some(record) = self.dispatch()? else {
            return Ok(None);
        };
        (record.entry)(record.arg);
        self.exit(record.id)?;
        Ok(Some(record.id))
    }

    /// Reclaims a task that has finished, freeing everything it owns on the
    /// heap.
    pub fn exit(&mut self, id: TaskId) -> Result<Task, KernError> {
        let task = self.tasks.remove(id)?;
        let blocks = match self.heap.free_owned_by(id) {
            Ok(n) => n,
            Err(e) => return Err(self.heap_failed(e)),
        };
        ktrace!(
            self,
            Trace::Reclaimed {
                id,
                blocks: u16::try_from(blocks).unwrap_or(u16::MAX),
            }
        );
        Ok(task)
    }

    /// Reclaims a task that hasn't finished. Any record for it still on the
    /// ready queue is discarded when it comes up.
    pub fn kill(&mut self, id: TaskId) -> Result<Task, KernError> {
        ktrace!(self, Trace::Killed(id));
        self.exit(id)
    }

    /// Stops `id` from being dispatched until it's made ready again. Any
    /// records it has on the ready queue are withdrawn.
    pub fn suspend(&mut self, id: TaskId) -> Result<(), KernError> {
        self.tasks.suspend(id)?;
        self.sched.remove(id);
        ktrace!(self, Trace::Suspended(id));
        Ok(())
    }

    /// One pass of the main loop: run a task if there is one, otherwise
    /// idle; then pet the watchdog.
    ///
    /// Errors are reported on the console and otherwise ignored, except for
    /// fatal ones (see `KernError::is_fatal`), which are handed back without
    /// petting the watchdog.
    pub fn tick(&mut self) -> Result<Option<TaskId>, KernError> {
        let ran = match self.step() {
            Ok(Some(id)) => Some(id),
            Ok(None) => {
                ktrace!(self, Trace::Idle);
                self.platform.delay_ms(config::IDLE_DELAY_MS);
                None
            }
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                klog!(self.platform, "kernel: {:?}", e);
                None
            }
        };
        self.platform.pet_watchdog();
        Ok(ran)
    }

    pub fn heap(&self) -> &Heap<'m> {
        &self.heap
    }

    /// Mutable access to the heap, for tasks and board code that allocate
    /// outside of `spawn`.
    pub fn heap_mut(&mut self) -> &mut Heap<'m> {
        &mut self.heap
    }

    pub fn tasks(&self) -> &TaskStore {
        &self.tasks
    }

    pub fn sched(&self) -> &Scheduler {
        &self.sched
    }

    pub fn trace(&self) -> &Ringbuf<Trace, { config::TRACE_DEPTH }> {
        &self.trace
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    pub fn platform_mut(&mut self) -> &mut P {
        &mut self.platform
    }

    fn heap_failed(&mut self, e: HeapError) -> KernError {
        if let HeapError::Corrupt { offset } = e {
            ktrace!(self, Trace::HeapCorrupt { offset });
            klog!(self.platform, "heap corrupt at offset {:#x}", offset);
        }
        e.into()
    }
}

impl<P: Platform> Record<Trace> for Kernel<'_, P> {
    fn record(&mut self, line: u16, payload: Trace) {
        self.trace.entry(line, payload);
        #[cfg(feature = "klog-trace")]
        klog!(self.platform, "trace {}: {:?}", line, payload);
    }
}

/// The main kernel entry point.
///
/// We currently expect an application to provide its own `main`-equivalent
/// function, which does basic hardware setup, builds a `Kernel`, spawns its
/// initial tasks, and then calls this function. It never returns; a fatal
/// error resets the system.
pub fn start_kernel<P: Platform>(mut kernel: Kernel<'_, P>) -> ! {
    loop {
        if let Err(e) = kernel.tick() {
            klog!(kernel.platform, "kernel: {:?}, resetting", e);
            crate::arch::reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::FakePlatform;
    use abi::{Priority, TaskState};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use zerocopy::IntoBytes;

    const STACK: u16 = config::MIN_STACK_SIZE;

    fn nop(_: usize) {}

    fn desc(entry: fn(usize), arg: usize, flags: TaskFlags) -> TaskDesc {
        TaskDesc {
            entry,
            arg,
            stack_size: STACK,
            flags,
        }
    }

    fn params(priority: u8, estimated_time: u32) -> SchedParams {
        SchedParams {
            priority: Priority(priority),
            estimated_time,
            arrival_time: 0,
        }
    }

    /// Room for `n` stacks and nothing else. Words, so the heap starts out
    /// aligned.
    fn region(n: usize) -> Vec<u64> {
        vec![0; n * (HEADER_SIZE + usize::from(STACK)) / 8]
    }

    /// Runs the lowest-scoring task of a pair, after the other's stack
    /// header has been trampled. Reclaiming the first walks over the second.
    fn trampled_pair(k: &mut Kernel<'_, FakePlatform>) -> u32 {
        k.spawn(desc(nop, 0, TaskFlags::START_AT_BOOT), params(0, 0))
            .unwrap();
        let victim = k
            .spawn(desc(nop, 0, TaskFlags::empty()), params(0, 0))
            .unwrap();
        let stack = k.tasks().get(victim).and_then(Task::stack).unwrap();
        let block = k.heap().handle_at(stack.base - HEADER_SIZE).unwrap();
        k.heap_mut().scribble(block.offset(), 1, 0xDEAD_BEEF);
        block.offset()
    }

    #[test]
    fn spawn_gives_the_task_a_stack_it_owns() {
        let mut mem = region(2);
        let mut k =
            Kernel::new(mem.as_mut_bytes(), FakePlatform::new()).unwrap();

        let id = k
            .spawn(desc(nop, 0, TaskFlags::empty()), params(0, 0))
            .unwrap();

        let stack = k.tasks().get(id).and_then(Task::stack).unwrap();
        assert_eq!(stack.size, STACK);
        assert_eq!(stack.base % 8, 0);
        let block = k.heap().handle_at(stack.base - HEADER_SIZE).unwrap();
        assert_eq!(k.heap().owner(block), Ok(id));
        assert_eq!(k.tasks().state(id), TaskState::Ready);
        assert!(k.sched().is_empty());
    }

    #[test]
    fn start_at_boot_queues_immediately() {
        let mut mem = region(2);
        let mut k =
            Kernel::new(mem.as_mut_bytes(), FakePlatform::new()).unwrap();

        let id = k
            .spawn(desc(nop, 0, TaskFlags::START_AT_BOOT), params(0, 0))
            .unwrap();
        assert_eq!(k.sched().peek().map(|r| r.id), Some(id));
    }

    #[test]
    fn spawn_without_room_for_a_stack_leaves_no_task() {
        let mut mem = region(1);
        let mut k =
            Kernel::new(mem.as_mut_bytes(), FakePlatform::new()).unwrap();
        k.spawn(desc(nop, 0, TaskFlags::empty()), params(0, 0)).unwrap();

        assert_eq!(
            k.spawn(desc(nop, 0, TaskFlags::empty()), params(0, 0)),
            Err(KernError::Heap(HeapError::OutOfMemory))
        );
        assert_eq!(k.tasks().len(), 1);
    }

    #[test]
    fn step_runs_tasks_in_score_order() {
        static ORDER: AtomicUsize = AtomicUsize::new(0);
        fn push(arg: usize) {
            // Shift in one decimal digit per task run.
            let prev = ORDER.load(Ordering::SeqCst);
            ORDER.store(prev * 10 + arg, Ordering::SeqCst);
        }

        let mut mem = region(3);
        let mut k =
            Kernel::new(mem.as_mut_bytes(), FakePlatform::new()).unwrap();
        let boot = TaskFlags::START_AT_BOOT;
        let slow = k.spawn(desc(push, 1, boot), params(0, 50)).unwrap();
        let fast = k.spawn(desc(push, 2, boot), params(0, 5)).unwrap();
        let mid = k.spawn(desc(push, 3, boot), params(0, 20)).unwrap();

        assert_eq!(k.step(), Ok(Some(fast)));
        assert_eq!(k.step(), Ok(Some(mid)));
        assert_eq!(k.step(), Ok(Some(slow)));
        assert_eq!(k.step(), Ok(None));

        assert_eq!(ORDER.load(Ordering::SeqCst), 231);
        assert!(k.tasks().is_empty());
    }

    #[test]
    fn finished_tasks_give_their_stack_back() {
        let mut mem = region(1);
        let mut k =
            Kernel::new(mem.as_mut_bytes(), FakePlatform::new()).unwrap();

        for _ in 0..3 {
            k.spawn(desc(nop, 0, TaskFlags::START_AT_BOOT), params(0, 0))
                .unwrap();
            assert!(k.step().unwrap().is_some());
        }
        let stats = k.heap().verify().unwrap();
        assert_eq!(stats.allocated_blocks, 0);
    }

    #[test]
    fn exit_frees_everything_the_task_owns() {
        let mut mem = region(4);
        let mut k =
            Kernel::new(mem.as_mut_bytes(), FakePlatform::new()).unwrap();
        let id = k
            .spawn(desc(nop, 0, TaskFlags::empty()), params(0, 0))
            .unwrap();
        k.heap_mut().alloc(32, id).unwrap();
        k.heap_mut().alloc(64, id).unwrap();

        k.exit(id).unwrap();

        assert_eq!(k.heap().verify().unwrap().allocated_blocks, 0);
        assert_eq!(
            k.trace().last().map(|e| e.payload),
            Some(Trace::Reclaimed { id, blocks: 3 })
        );
    }

    #[test]
    fn dispatch_skips_records_of_killed_tasks() {
        let mut mem = region(2);
        let mut k =
            Kernel::new(mem.as_mut_bytes(), FakePlatform::new()).unwrap();
        let boot = TaskFlags::START_AT_BOOT;
        let doomed = k.spawn(desc(nop, 0, boot), params(0, 1)).unwrap();
        let other = k.spawn(desc(nop, 0, boot), params(0, 2)).unwrap();

        k.kill(doomed).unwrap();
        // Reuse the slot, so the stale record would resolve by index alone.
        let reborn = k
            .spawn(desc(nop, 0, TaskFlags::empty()), params(0, 0))
            .unwrap();
        assert_eq!(reborn.index(), doomed.index());

        let record = k.dispatch().unwrap().unwrap();
        assert_eq!(record.id, other);
        assert_eq!(k.tasks().state(reborn), TaskState::Ready);
        assert!(k
            .trace()
            .iter()
            .any(|e| e.payload == Trace::StaleRecord(doomed)));
    }

    #[test]
    fn dispatch_refuses_while_a_task_runs() {
        let mut mem = region(2);
        let mut k =
            Kernel::new(mem.as_mut_bytes(), FakePlatform::new()).unwrap();
        let boot = TaskFlags::START_AT_BOOT;
        k.spawn(desc(nop, 0, boot), params(0, 1)).unwrap();
        k.spawn(desc(nop, 0, boot), params(0, 2)).unwrap();

        k.dispatch().unwrap();
        assert_eq!(
            k.dispatch().map(|r| r.map(|r| r.id)),
            Err(KernError::Task(TaskError::AlreadyRunning))
        );
        assert_eq!(k.sched().len(), 1);
    }

    #[test]
    fn suspended_task_can_be_requeued() {
        let mut mem = region(1);
        let mut k =
            Kernel::new(mem.as_mut_bytes(), FakePlatform::new()).unwrap();
        let id = k
            .spawn(desc(nop, 0, TaskFlags::START_AT_BOOT), params(0, 0))
            .unwrap();

        k.dispatch().unwrap();
        k.suspend(id).unwrap();
        assert_eq!(k.tasks().state(id), TaskState::Suspended);
        assert_eq!(k.tasks().running(), None);

        k.make_ready(id).unwrap();
        assert_eq!(k.step(), Ok(Some(id)));
    }

    #[test]
    fn suspended_task_is_not_dispatched_from_an_old_record() {
        let mut mem = region(2);
        let mut k =
            Kernel::new(mem.as_mut_bytes(), FakePlatform::new()).unwrap();
        let id = k
            .spawn(desc(nop, 0, TaskFlags::START_AT_BOOT), params(0, 0))
            .unwrap();
        k.make_ready(id).unwrap();

        k.suspend(id).unwrap();
        assert!(k.sched().is_empty());
        assert_eq!(k.dispatch().map(|r| r.map(|r| r.id)), Ok(None));
        assert_eq!(k.tasks().state(id), TaskState::Suspended);
        assert_eq!(k.tasks().running(), None);
    }

    #[test]
    fn suspending_one_task_leaves_the_others_queued() {
        let mut mem = region(2);
        let mut k =
            Kernel::new(mem.as_mut_bytes(), FakePlatform::new()).unwrap();
        let boot = TaskFlags::START_AT_BOOT;
        let held = k.spawn(desc(nop, 0, boot), params(0, 1)).unwrap();
        let other = k.spawn(desc(nop, 0, boot), params(0, 2)).unwrap();

        k.suspend(held).unwrap();
        assert_eq!(k.step(), Ok(Some(other)));
        assert_eq!(k.step(), Ok(None));
        assert_eq!(k.tasks().state(held), TaskState::Suspended);
    }

    #[test]
    fn heap_corruption_is_fatal_to_tick() {
        let mut mem = region(2);
        let mut k =
            Kernel::new(mem.as_mut_bytes(), FakePlatform::new()).unwrap();
        let offset = trampled_pair(&mut k);

        assert_eq!(
            k.tick(),
            Err(KernError::Heap(HeapError::Corrupt { offset }))
        );
        assert_eq!(k.platform().pets(), 0);
        assert!(k.platform().console().contains("heap corrupt"));
    }

    #[test]
    #[should_panic(expected = "SYSTEM RESET")]
    fn main_loop_resets_on_heap_corruption() {
        let mut mem = region(2);
        let mut k =
            Kernel::new(mem.as_mut_bytes(), FakePlatform::new()).unwrap();
        trampled_pair(&mut k);

        start_kernel(k);
    }

    #[test]
    fn idle_tick_sleeps_and_pets() {
        let mut mem = region(1);
        let mut k =
            Kernel::new(mem.as_mut_bytes(), FakePlatform::new()).unwrap();

        assert_eq!(k.tick(), Ok(None));
        assert_eq!(k.tick(), Ok(None));

        let p = k.platform();
        assert_eq!(p.delays(), 2);
        assert_eq!(p.delayed_ms(), 2 * u64::from(config::IDLE_DELAY_MS));
        assert_eq!(p.pets(), 2);
    }

    #[test]
    fn busy_tick_runs_a_task_without_sleeping() {
        let mut mem = region(1);
        let mut k =
            Kernel::new(mem.as_mut_bytes(), FakePlatform::new()).unwrap();
        let id = k
            .spawn(desc(nop, 0, TaskFlags::START_AT_BOOT), params(0, 0))
            .unwrap();

        assert_eq!(k.tick(), Ok(Some(id)));
        assert_eq!(k.platform().delays(), 0);
        assert_eq!(k.platform().pets(), 1);
    }

    #[test]
    fn full_queue_is_reported_on_the_console() {
        let mut mem = region(1);
        let mut k =
            Kernel::new(mem.as_mut_bytes(), FakePlatform::new()).unwrap();
        let id = k
            .spawn(desc(nop, 0, TaskFlags::empty()), params(0, 0))
            .unwrap();

        // Nothing stops a task being queued more than once.
        for _ in 0..config::READY_QUEUE_DEPTH {
            k.make_ready(id).unwrap();
        }
        assert!(k.sched().is_full());

        assert!(k.make_ready(id).is_err());
        assert!(k.platform().console().contains("ready queue full"));
        assert_eq!(
            k.trace().last().map(|e| e.payload),
            Some(Trace::QueueFull(id))
        );
    }

    #[test]
    fn heap_too_small_for_a_header_is_refused() {
        let mut mem = [0u8; HEADER_SIZE - 1];
        assert!(matches!(
            Kernel::new(&mut mem, FakePlatform::new()),
            Err(KernError::Heap(HeapError::RegionTooSmall))
        ));
    }
}
