//! Frame scheduler: turns "advance N frames with this input" requests from
//! any thread into a strictly ordered queue of one-frame units consumed by
//! the execution thread.
//!
//! A request for `count` frames enqueues `count` unit entries, so requests
//! are never interleaved. [`FrameScheduler::next`] additionally registers a
//! completion that resolves once the frame counter reaches
//! `current + outstanding + count`, as computed when the request was made.

use std::{
    collections::VecDeque,
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use crossbeam_channel::{Receiver, Sender, bounded};
use parking_lot::Mutex;
use tracing::trace;

use crate::input::InputState;

/// One frame's worth of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameUnit {
    pub input: InputState,
    pub port: u32,
}

#[derive(Debug)]
struct PendingCompletion {
    target: u64,
    tx: Sender<u64>,
}

#[derive(Debug, Default)]
struct Queue {
    units: VecDeque<FrameUnit>,
    /// Frames enqueued and not yet executed.
    outstanding: u32,
    completions: Vec<PendingCompletion>,
}

#[derive(Debug, Default)]
pub struct FrameScheduler {
    queue: Mutex<Queue>,
    /// Only written with `queue` held so completion targets stay consistent.
    current_frame: AtomicU64,
}

impl FrameScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueues `count` frames without a completion.
    pub fn queue(&self, count: u32, input: InputState, port: u32) {
        if count == 0 {
            return;
        }
        let mut queue = self.queue.lock();
        Self::push_units(&mut queue, count, input, port);
    }

    /// Enqueues `count` frames and returns a completion that resolves with
    /// the frame index at which they have all been executed.
    ///
    /// A request for zero frames resolves immediately with the current index.
    pub fn next(&self, count: u32, input: InputState, port: u32) -> FrameCompletion {
        let (tx, rx) = bounded(1);
        let mut queue = self.queue.lock();
        let current = self.current_frame.load(Ordering::Acquire);
        if count == 0 {
            let _ = tx.send(current);
            return FrameCompletion { rx };
        }

        let target = current + u64::from(queue.outstanding) + u64::from(count);
        Self::push_units(&mut queue, count, input, port);
        queue.completions.push(PendingCompletion { target, tx });
        trace!(count, target, "frames requested");
        FrameCompletion { rx }
    }

    /// Takes the next unit for the execution thread.
    pub fn pop_unit(&self) -> Option<FrameUnit> {
        self.queue.lock().units.pop_front()
    }

    /// Advances the frame counter after one frame ran and resolves every
    /// completion whose target has been reached. Returns how many resolved.
    pub fn frame_completed(&self) -> usize {
        let mut queue = self.queue.lock();
        let current = self.current_frame.fetch_add(1, Ordering::AcqRel) + 1;
        queue.outstanding = queue.outstanding.saturating_sub(1);

        let before = queue.completions.len();
        queue.completions.retain(|pending| {
            if pending.target <= current {
                // The caller may have stopped waiting; that is fine.
                let _ = pending.tx.send(current);
                false
            } else {
                true
            }
        });
        before - queue.completions.len()
    }

    /// Zeroes the frame counter and the outstanding count after a load or
    /// reset. Queued units and pending completions are kept.
    pub fn reset_counters(&self) {
        let mut queue = self.queue.lock();
        queue.outstanding = 0;
        self.current_frame.store(0, Ordering::Release);
    }

    pub fn current_frame(&self) -> u64 {
        self.current_frame.load(Ordering::Acquire)
    }

    pub fn outstanding(&self) -> u32 {
        self.queue.lock().outstanding
    }

    pub fn pending_units(&self) -> usize {
        self.queue.lock().units.len()
    }

    fn push_units(queue: &mut Queue, count: u32, input: InputState, port: u32) {
        let unit = FrameUnit { input, port };
        queue
            .units
            .extend(std::iter::repeat_n(unit, count as usize));
        queue.outstanding = queue.outstanding.saturating_add(count);
    }
}

/// Single-assignment result of [`FrameScheduler::next`].
#[derive(Debug)]
pub struct FrameCompletion {
    rx: Receiver<u64>,
}

impl FrameCompletion {
    /// Blocks until resolved. `None` if the scheduler went away first.
    pub fn wait(&self) -> Option<u64> {
        self.rx.recv().ok()
    }

    pub fn wait_timeout(&self, timeout: Duration) -> Option<u64> {
        self.rx.recv_timeout(timeout).ok()
    }

    pub fn try_wait(&self) -> Option<u64> {
        self.rx.try_recv().ok()
    }

    /// Receiver side, for callers that want to `select!` over completions.
    pub fn receiver(&self) -> &Receiver<u64> {
        &self.rx
    }
}
