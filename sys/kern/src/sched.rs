// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The ready queue.
//!
//! Runnable tasks wait here as `SchedRecord`s, ordered by a score computed
//! once, on insertion:
//!
//! ```text
//! score = alpha * estimated_time + beta * priority
//! ```
//!
//! Lower scores leave the queue first. Since lower priority numbers are more
//! important, short important tasks go ahead of long unimportant ones. Records
//! with equal scores leave in the order they arrived.
//!
//! There is no aging: a record's score never changes while it is queued.

use abi::TaskId;
use heapless::Vec;

use crate::config;
use crate::descs::{SchedParams, SchedRecord};
use crate::err::SchedError;

/// Coefficients of the score.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Weights {
    /// Applied to estimated execution time.
    pub alpha: u32,
    /// Applied to priority.
    pub beta: u32,
}

impl Weights {
    /// Computes the score for `params`. Saturates rather than wrapping, so a
    /// huge estimate sorts last instead of first.
    pub fn score(&self, params: &SchedParams) -> u32 {
        self.alpha
            .saturating_mul(params.estimated_time)
            .saturating_add(
                self.beta.saturating_mul(u32::from(params.priority.0)),
            )
    }
}

impl Default for Weights {
    fn default() -> Self {
        Self {
            alpha: config::ALPHA,
            beta: config::BETA,
        }
    }
}

#[derive(Copy, Clone, Debug)]
struct Ready {
    score: u32,
    record: SchedRecord,
}

/// Bounded ready queue, kept sorted by score.
#[derive(Debug)]
pub struct Scheduler<const N: usize = { config::READY_QUEUE_DEPTH }> {
    queue: Vec<Ready, N>,
    weights: Weights,
}

impl<const N: usize> Scheduler<N> {
    /// Creates an empty queue scoring with the configured weights.
    pub fn new() -> Self {
        Self::with_weights(Weights::default())
    }

    pub fn with_weights(weights: Weights) -> Self {
        Self {
            queue: Vec::new(),
            weights,
        }
    }

    /// Empties the queue.
    pub fn init(&mut self) {
        self.queue.clear();
    }

    /// Queues `record`, keeping the queue sorted.
    ///
    /// Fails with `QueueFull` if there's no room; the queue is unchanged in
    /// that case.
    pub fn add(&mut self, record: SchedRecord) -> Result<(), SchedError> {
        let score = self.weights.score(&record.params);
        self.queue
            .push(Ready { score, record })
            .map_err(|_| SchedError::QueueFull)?;

        // Bubble the new entry back past anything that scores strictly worse.
        // Stopping at equal scores keeps arrival order among ties.
        let q = &mut self.queue[..];
        let mut i = q.len() - 1;
        while i > 0 && q[i - 1].score > score {
            q.swap(i - 1, i);
            i -= 1;
        }
        Ok(())
    }

    /// Removes and returns the record with the lowest score, or `None` if the
    /// queue is empty.
    pub fn next(&mut self) -> Option<SchedRecord> {
        if self.queue.is_empty() {
            return None;
        }
        self.queue.rotate_left(1);
        self.queue.pop().map(|r| r.record)
    }

    /// Drops every queued record for `id`, keeping the rest in order, and
    /// returns how many there were.
    pub fn remove(&mut self, id: TaskId) -> usize {
        let mut kept = 0;
        for i in 0..self.queue.len() {
            if self.queue[i].record.id != id {
                self.queue.swap(kept, i);
                kept += 1;
            }
        }
        let removed = self.queue.len() - kept;
        while self.queue.len() > kept {
            self.queue.pop();
        }
        removed
    }

    /// Returns the record `next` would, without removing it.
    pub fn peek(&self) -> Option<&SchedRecord> {
        self.queue.first().map(|r| &r.record)
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.queue.is_full()
    }

    pub fn weights(&self) -> Weights {
        self.weights
    }
}

impl<const N: usize> Default for Scheduler<N> {
    fn default() -> Self {
        Self::new()
    }
}
