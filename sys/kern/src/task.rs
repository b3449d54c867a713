// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Implementation of the task table.

use abi::{Generation, Priority, TaskId, TaskState};

use crate::config;
use crate::descs::{SchedParams, SchedRecord, StackDesc, TaskDesc};
use crate::err::TaskError;

static_assertions::const_assert!(
    config::MAX_TASKS <= TaskId::INDEX_MASK as usize
);

/// Internal representation of a task.
///
/// The fields of this struct are private to this module so that state changes
/// only happen through `TaskStore`, which is what keeps the "at most one task
/// running" rule.
#[derive(Debug)]
pub struct Task {
    id: TaskId,
    state: TaskState,
    descriptor: TaskDesc,
    sched: SchedParams,
    /// Filled in once the kernel has found memory for the stack.
    stack: Option<StackDesc>,
}

impl Task {
    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    pub fn descriptor(&self) -> &TaskDesc {
        &self.descriptor
    }

    pub fn sched_params(&self) -> &SchedParams {
        &self.sched
    }

    pub fn priority(&self) -> Priority {
        self.sched.priority
    }

    pub fn stack(&self) -> Option<StackDesc> {
        self.stack
    }

    /// Produces the record the ready queue holds for this task.
    pub fn sched_record(&self) -> SchedRecord {
        SchedRecord {
            id: self.id,
            params: self.sched,
            state: self.state,
            entry: self.descriptor.entry,
            arg: self.descriptor.arg,
        }
    }
}

#[derive(Debug)]
struct Slot {
    /// Generation handed out with the next task to occupy this slot. Advanced
    /// every time a task leaves.
    generation: Generation,
    task: Option<Task>,
    /// Link in the free list; meaningless while occupied.
    next_free: Option<u16>,
}

/// Fixed-capacity table of tasks.
///
/// Slots are kept on a free list, so `add` and `remove` don't scan. A `TaskId`
/// is the slot index plus the slot's generation at the time the task was
/// added; an identifier that outlives its task reports `TaskError::Stale`
/// rather than quietly naming whatever took the slot over.
#[derive(Debug)]
pub struct TaskStore<const N: usize = { config::MAX_TASKS }> {
    slots: [Slot; N],
    free_head: Option<u16>,
    live: usize,
    running: Option<usize>,
}

impl<const N: usize> TaskStore<N> {
    const CAPACITY_FITS_IN_ID: () = assert!(
        N <= TaskId::INDEX_MASK as usize,
        "task table too large for TaskId index bits"
    );

    pub fn new() -> Self {
        #[allow(clippy::let_unit_value)]
        let () = Self::CAPACITY_FITS_IN_ID;

        Self {
            slots: core::array::from_fn(|i| Slot {
                generation: Generation::ZERO,
                task: None,
                next_free: (i + 1 < N).then_some((i + 1) as u16),
            }),
            free_head: (N > 0).then_some(0),
            live: 0,
            running: None,
        }
    }

    /// Adds a task described by `descriptor`, returning its new identifier.
    /// The task starts out `Ready`.
    ///
    /// On failure nothing in the table changes.
    pub fn add(
        &mut self,
        descriptor: TaskDesc,
        sched: SchedParams,
    ) -> Result<TaskId, TaskError> {
        if descriptor.stack_size < config::MIN_STACK_SIZE
            || descriptor.stack_size % 8 != 0
        {
            return Err(TaskError::BadStack);
        }
        let index = usize::from(self.free_head.ok_or(TaskError::Full)?);

        let slot = &mut self.slots[index];
        let id = TaskId::for_index_and_gen(index, slot.generation);
        self.free_head = slot.next_free.take();
        slot.task = Some(Task {
            id,
            state: TaskState::Ready,
            descriptor,
            sched,
            stack: None,
        });
        self.live += 1;

        Ok(id)
    }

    /// Removes the task named by `id` and hands it back.
    ///
    /// The slot goes back on the free list with its generation advanced, so
    /// `id` stops resolving even once the slot is reused.
    pub fn remove(&mut self, id: TaskId) -> Result<Task, TaskError> {
        self.lookup(id)?;
        let index = id.index();

        let slot = &mut self.slots[index];
        let task = slot.task.take().ok_or(TaskError::NotFound)?;
        slot.generation = slot.generation.next();
        slot.next_free = self.free_head;
        self.free_head = Some(index as u16);
        self.live -= 1;

        if self.running == Some(index) {
            self.running = None;
        }
        Ok(task)
    }

    /// Marks `id` as the running task.
    ///
    /// Only one task may be running at a time. If one already is, this fails
    /// with `AlreadyRunning` and changes nothing, whatever `id` is.
    pub fn run(&mut self, id: TaskId) -> Result<(), TaskError> {
        if self.running.is_some() {
            return Err(TaskError::AlreadyRunning);
        }
        let task = self.lookup_mut(id)?;
        if !task.state.can_run() {
            return Err(TaskError::AlreadyRunning);
        }
        task.state = TaskState::Running;
        self.running = Some(id.index());
        Ok(())
    }

    /// Suspends `id`, whatever state it was in. Suspending the running task
    /// frees up the "running" position.
    pub fn suspend(&mut self, id: TaskId) -> Result<(), TaskError> {
        self.lookup_mut(id)?.state = TaskState::Suspended;
        if self.running == Some(id.index()) {
            self.running = None;
        }
        Ok(())
    }

    /// Records where the stack for `id` ended up.
    pub fn set_stack(
        &mut self,
        id: TaskId,
        stack: StackDesc,
    ) -> Result<(), TaskError> {
        self.lookup_mut(id)?.stack = Some(stack);
        Ok(())
    }

    /// Builds the ready-queue record for `id`.
    pub fn sched_record(&self, id: TaskId) -> Result<SchedRecord, TaskError> {
        self.lookup(id).map(Task::sched_record)
    }

    /// State of `id`, or `Null` if it doesn't name a live task.
    pub fn state(&self, id: TaskId) -> TaskState {
        self.lookup(id).map(Task::state).unwrap_or_default()
    }

    pub fn get(&self, id: TaskId) -> Option<&Task> {
        self.lookup(id).ok()
    }

    /// Identifier of the running task, if there is one.
    pub fn running(&self) -> Option<TaskId> {
        self.running
            .and_then(|i| self.slots[i].task.as_ref())
            .map(Task::id)
    }

    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    pub fn is_full(&self) -> bool {
        self.live == N
    }

    pub fn capacity(&self) -> usize {
        N
    }

    /// Iterates over live tasks in slot order.
    pub fn iter(&self) -> impl Iterator<Item = &Task> + '_ {
        self.slots.iter().filter_map(|s| s.task.as_ref())
    }

    /// Resolves `id` against the table, checking its generation before its
    /// occupancy so that identifiers of departed tasks come back `Stale`.
    fn lookup(&self, id: TaskId) -> Result<&Task, TaskError> {
        let slot = self.slots.get(id.index()).ok_or(TaskError::NotFound)?;
        if slot.generation != id.generation() {
            return Err(TaskError::Stale);
        }
        slot.task.as_ref().ok_or(TaskError::NotFound)
    }

    fn lookup_mut(&mut self, id: TaskId) -> Result<&mut Task, TaskError> {
        let slot = self
            .slots
            .get_mut(id.index())
            .ok_or(TaskError::NotFound)?;
        if slot.generation != id.generation() {
            return Err(TaskError::Stale);
        }
        slot.task.as_mut().ok_or(TaskError::NotFound)
    }
}

impl<const N: usize> Default for TaskStore<N> {
    fn default() -> Self {
        Self::new()
    }
}
