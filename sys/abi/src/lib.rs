// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Kernel ABI definitions, shared between the kernel, its build script, and
//! the code that creates tasks.

#![cfg_attr(not(test), no_std)]

use num_derive::{FromPrimitive, ToPrimitive};
use serde::{Deserialize, Serialize};

/// Names a particular incarnation of a task.
///
/// A `TaskId` combines two fields, a task index (the slot the task occupies in
/// the kernel's task table) and a generation number. The generation number
/// begins counting at zero and wraps on overflow. Critically, the generation
/// of a slot is incremented whenever the task occupying it is removed, so an
/// identifier kept around after its task is gone will not resolve to whatever
/// task reuses the slot.
///
/// The task index is in the lower `TaskId::INDEX_BITS` bits, while the
/// generation is in the remaining top bits.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct TaskId(pub u16);

impl TaskId {
    /// The all-ones `TaskId` is reserved to mean "no task". It is used as the
    /// owner of free heap blocks and anywhere else an identifier is optional
    /// at the representation level.
    pub const NULL: Self = Self(!0);

    /// Number of bits in a `TaskId` used to represent task index, rather than
    /// generation number. This must currently be 15 or smaller.
    pub const INDEX_BITS: u32 = 10;

    /// Derived mask of the index bits portion.
    pub const INDEX_MASK: u16 = (1 << Self::INDEX_BITS) - 1;

    /// Fabricates a `TaskId` for a known index and generation number.
    pub const fn for_index_and_gen(index: usize, gen: Generation) -> Self {
        TaskId(
            (index as u16 & Self::INDEX_MASK)
                | (gen.0 as u16) << Self::INDEX_BITS,
        )
    }

    /// Extracts the index part of this ID.
    pub fn index(&self) -> usize {
        usize::from(self.0 & Self::INDEX_MASK)
    }

    /// Extracts the generation part of this ID.
    pub fn generation(&self) -> Generation {
        Generation((self.0 >> Self::INDEX_BITS) as u8)
    }

    pub fn is_null(&self) -> bool {
        *self == Self::NULL
    }
}

/// Type used to track generation numbers.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
#[repr(transparent)]
pub struct Generation(u8);

impl Generation {
    pub const ZERO: Self = Self(0);

    pub fn next(self) -> Self {
        const MASK: u16 = 0xFFFF << TaskId::INDEX_BITS >> TaskId::INDEX_BITS;
        Generation(self.0.wrapping_add(1) & MASK as u8)
    }
}

impl From<u8> for Generation {
    fn from(x: u8) -> Self {
        Self(x)
    }
}

/// Indicates priority of a task.
///
/// Numerically lower priorities are more important. The scheduler folds the
/// priority into a score where lower scores run sooner, so the two agree.
///
/// Note that this type *deliberately* does not implement `PartialOrd`/`Ord`;
/// the only thing the kernel does with a priority is weigh it into a score.
#[derive(
    Copy, Clone, Debug, Eq, PartialEq, Default, Serialize, Deserialize,
)]
#[repr(transparent)]
pub struct Priority(pub u8);

/// Lifecycle state of a task slot.
///
/// `Null` is what an empty slot (or an identifier that no longer resolves)
/// reports. Transitions are driven exclusively by the task table:
///
/// ```text
/// Null --add--> Ready
/// {Ready, Suspended} --run--> Running      (at most one Running)
/// {Running, Ready} --suspend--> Suspended
/// any --remove--> Null
/// ```
#[derive(
    Copy,
    Clone,
    Debug,
    Default,
    Eq,
    PartialEq,
    FromPrimitive,
    ToPrimitive,
    Serialize,
    Deserialize,
)]
#[repr(u8)]
pub enum TaskState {
    #[default]
    Null = 0,
    Ready = 1,
    Running = 2,
    Suspended = 3,
}

impl TaskState {
    /// Checks whether a task in this state may be handed the CPU.
    pub fn can_run(&self) -> bool {
        matches!(self, TaskState::Ready | TaskState::Suspended)
    }
}

/// Three-way outcome reported by kernel primitives.
///
/// `NoOp` is reserved for idempotent requests that found nothing to do, which
/// at the moment means freeing a heap block that was already free.
#[derive(
    Copy, Clone, Debug, Eq, PartialEq, FromPrimitive, ToPrimitive,
)]
#[repr(u32)]
pub enum ResponseCode {
    Ok = 0,
    Err = 1,
    NoOp = 2,
}

impl From<()> for ResponseCode {
    fn from(_: ()) -> Self {
        ResponseCode::Ok
    }
}

/// Flattens any kernel result into its response code. Success values decide
/// between `Ok` and `NoOp` themselves; every error is `Err`.
impl<T, E> From<Result<T, E>> for ResponseCode
where
    T: Into<ResponseCode>,
    E: Into<ResponseCode>,
{
    fn from(r: Result<T, E>) -> Self {
        match r {
            Ok(v) => v.into(),
            Err(e) => e.into(),
        }
    }
}

/// Build-time kernel configuration.
///
/// The kernel's build script reads this from the `SPRINTER_KCONFIG`
/// environment variable as RON. Every field is optional in the document;
/// missing ones take the values from `Default`.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    /// Number of slots in the task table.
    pub max_tasks: usize,
    /// Number of scheduling records the ready queue can hold.
    pub ready_queue_depth: usize,
    /// Weight applied to a task's estimated execution time.
    pub alpha: u32,
    /// Weight applied to a task's priority.
    pub beta: u32,
    /// Smallest stack, in bytes, a task may be given.
    pub min_stack_size: u16,
    /// How long the main loop sleeps when nothing is ready.
    pub idle_delay_ms: u32,
    /// Number of entries in the kernel trace ring.
    pub trace_depth: usize,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            max_tasks: 16,
            ready_queue_depth: 25,
            alpha: 1,
            beta: 3,
            min_stack_size: 0x200,
            idle_delay_ms: 1,
            trace_depth: 32,
        }
    }
}

impl KernelConfig {
    /// Checks the values the kernel can't work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_tasks == 0 {
            return Err(ConfigError::NoTasks);
        }
        // The all-ones index is only reachable through TaskId::NULL.
        if self.max_tasks > usize::from(TaskId::INDEX_MASK) {
            return Err(ConfigError::TooManyTasks(self.max_tasks));
        }
        if self.ready_queue_depth == 0 {
            return Err(ConfigError::NoReadyQueue);
        }
        if self.trace_depth == 0 {
            return Err(ConfigError::NoTrace);
        }
        if self.min_stack_size % 8 != 0 {
            return Err(ConfigError::MisalignedStack(self.min_stack_size));
        }
        Ok(())
    }
}

/// Reasons `KernelConfig::validate` turns a configuration down.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ConfigError {
    NoTasks,
    /// `max_tasks` doesn't fit in the index bits of a `TaskId`.
    TooManyTasks(usize),
    NoReadyQueue,
    NoTrace,
    /// `min_stack_size` isn't a multiple of 8.
    MisalignedStack(u16),
}

impl core::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NoTasks => f.write_str("max_tasks must be at least 1"),
            Self::TooManyTasks(n) => write!(
                f,
                "max_tasks {n} does not fit in {} index bits",
                TaskId::INDEX_BITS
            ),
            Self::NoReadyQueue => {
                f.write_str("ready_queue_depth must be at least 1")
            }
            Self::NoTrace => f.write_str("trace_depth must be at least 1"),
            Self::MisalignedStack(n) => {
                write!(f, "min_stack_size {n:#x} is not a multiple of 8")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_traits::FromPrimitive;

    #[test]
    fn task_id_round_trips_index_and_generation() {
        let id = TaskId::for_index_and_gen(5, Generation::from(3));
        assert_eq!(id.index(), 5);
        assert_eq!(id.generation(), Generation::from(3));
        assert!(!id.is_null());
    }

    #[test]
    fn generation_wraps_within_its_bits() {
        let mut g = Generation::ZERO;
        for _ in 0..(1 << (16 - TaskId::INDEX_BITS)) {
            g = g.next();
        }
        assert_eq!(g, Generation::ZERO);
    }

    #[test]
    fn null_id_is_all_ones() {
        assert_eq!(TaskId::NULL.0, 0xFFFF);
        assert!(TaskId::NULL.is_null());
    }

    #[test]
    fn response_codes_match_wire_values() {
        assert_eq!(ResponseCode::from_u32(0), Some(ResponseCode::Ok));
        assert_eq!(ResponseCode::from_u32(1), Some(ResponseCode::Err));
        assert_eq!(ResponseCode::from_u32(2), Some(ResponseCode::NoOp));
        assert_eq!(ResponseCode::from_u32(3), None);
    }

    #[test]
    fn results_flatten_to_response_codes() {
        let ok: Result<(), ResponseCode> = Ok(());
        let err: Result<(), ResponseCode> = Err(ResponseCode::Err);
        assert_eq!(ResponseCode::from(ok), ResponseCode::Ok);
        assert_eq!(ResponseCode::from(err), ResponseCode::Err);
    }

    #[test]
    fn only_ready_and_suspended_tasks_can_run() {
        assert!(TaskState::Ready.can_run());
        assert!(TaskState::Suspended.can_run());
        assert!(!TaskState::Running.can_run());
        assert!(!TaskState::Null.can_run());
    }

    #[test]
    fn default_config_is_valid() {
        assert_eq!(KernelConfig::default().validate(), Ok(()));
    }

    #[test]
    fn partial_ron_document_fills_in_defaults() {
        let c: KernelConfig =
            ron::de::from_str("(max_tasks: 8, beta: 5)").unwrap();
        assert_eq!(c.max_tasks, 8);
        assert_eq!(c.beta, 5);
        assert_eq!(c.alpha, KernelConfig::default().alpha);
        assert_eq!(c.min_stack_size, 0x200);
        assert_eq!(c.validate(), Ok(()));
    }

    #[test]
    fn unusable_configs_are_rejected() {
        let base = KernelConfig::default();
        let cases = [
            (
                KernelConfig { max_tasks: 0, ..base.clone() },
                ConfigError::NoTasks,
            ),
            (
                KernelConfig { max_tasks: 1024, ..base.clone() },
                ConfigError::TooManyTasks(1024),
            ),
            (
                KernelConfig { ready_queue_depth: 0, ..base.clone() },
                ConfigError::NoReadyQueue,
            ),
            (
                KernelConfig { trace_depth: 0, ..base.clone() },
                ConfigError::NoTrace,
            ),
            (
                KernelConfig { min_stack_size: 0x204, ..base.clone() },
                ConfigError::MisalignedStack(0x204),
            ),
        ];
        for (config, expected) in cases {
            assert_eq!(config.validate(), Err(expected), "{config:?}");
        }
    }

    #[test]
    fn largest_task_table_stays_clear_of_null() {
        let c = KernelConfig {
            max_tasks: usize::from(TaskId::INDEX_MASK),
            ..KernelConfig::default()
        };
        assert_eq!(c.validate(), Ok(()));
    }

    #[test]
    fn config_errors_read_as_sentences() {
        let e = ConfigError::MisalignedStack(0x204);
        assert_eq!(
            e.to_string(),
            "min_stack_size 0x204 is not a multiple of 8"
        );
    }
}
