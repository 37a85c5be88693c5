// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Delayed background work that never keeps its target alive
//!
//! A scheduled task is held through a [`Weak`] reference and resolved only when
//! it fires. If every strong reference to the target is gone by then, the task
//! is skipped. The worker thread likewise holds its scheduler weakly and
//! exits once the scheduler is dropped.

use once_cell::sync::Lazy;
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashSet};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::{Duration, Instant};

/// Longest the worker sleeps before checking that its scheduler still exists
const IDLE_POLL: Duration = Duration::from_millis(250);

static GLOBAL_SCHEDULER: Lazy<Arc<DeferredScheduler>> =
    Lazy::new(|| Arc::new(DeferredScheduler::new("tablecache-deferred")));

/// Work run by a [`DeferredScheduler`]
pub trait DeferredTask: Send + Sync {
    fn run_deferred(&self);
}

struct Scheduled {
    due: Instant,
    seq: u64,
    target: usize,
    task: Weak<dyn DeferredTask>,
}

impl PartialEq for Scheduled {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl Eq for Scheduled {}

impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scheduled {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.due, self.seq).cmp(&(other.due, other.seq))
    }
}

#[derive(Default)]
struct Queue {
    entries: BinaryHeap<Reverse<Scheduled>>,
    /// Targets with an entry in `entries`
    pending: HashSet<usize>,
    seq: u64,
    worker_started: bool,
}

/// Single background thread running tasks at their deadline
pub struct DeferredScheduler {
    name: String,
    queue: Mutex<Queue>,
    wakeup: Condvar,
}

impl DeferredScheduler {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            queue: Mutex::new(Queue::default()),
            wakeup: Condvar::new(),
        }
    }

    /// The process-wide scheduler
    pub fn global() -> Arc<DeferredScheduler> {
        GLOBAL_SCHEDULER.clone()
    }

    /// Run `task` once `delay` has elapsed
    ///
    /// A target that is already queued keeps its earlier deadline. Returns
    /// false when the target was already queued or could not be scheduled.
    pub fn schedule(self: &Arc<Self>, delay: Duration, task: Weak<dyn DeferredTask>) -> bool {
        let target = task.as_ptr() as *const () as usize;
        let mut queue = self.queue.lock();

        if !queue.worker_started && !self.start_worker(&mut queue) {
            return false;
        }
        if !queue.pending.insert(target) {
            return false;
        }

        queue.seq += 1;
        let seq = queue.seq;
        queue.entries.push(Reverse(Scheduled {
            due: Instant::now() + delay,
            seq,
            target,
            task,
        }));
        self.wakeup.notify_one();
        true
    }

    /// Number of tasks waiting for their deadline
    pub fn pending(&self) -> usize {
        self.queue.lock().entries.len()
    }

    fn start_worker(self: &Arc<Self>, queue: &mut MutexGuard<'_, Queue>) -> bool {
        let scheduler = Arc::downgrade(self);
        let name = self.name.clone();
        match thread::Builder::new()
            .name(self.name.clone())
            .spawn(move || Self::run(scheduler, name))
        {
            Ok(_) => {
                queue.worker_started = true;
                true
            }
            Err(e) => {
                log::error!("Failed to start scheduler thread '{}': {}", self.name, e);
                false
            }
        }
    }

    fn run(scheduler: Weak<Self>, name: String) {
        while let Some(live) = scheduler.upgrade() {
            live.step();
        }
        log::debug!("Scheduler '{}' dropped; worker exiting", name);
    }

    /// Fire the next due task, or wait for one for at most [`IDLE_POLL`]
    fn step(&self) {
        let mut queue = self.queue.lock();
        let now = Instant::now();
        match queue.entries.peek().map(|Reverse(entry)| entry.due) {
            Some(due) if due <= now => {
                if let Some(Reverse(entry)) = queue.entries.pop() {
                    queue.pending.remove(&entry.target);
                    drop(queue);
                    Self::fire(entry);
                }
            }
            Some(due) => {
                self.wakeup.wait_until(&mut queue, due.min(now + IDLE_POLL));
            }
            None => {
                self.wakeup.wait_for(&mut queue, IDLE_POLL);
            }
        }
    }

    fn fire(entry: Scheduled) {
        let Some(task) = entry.task.upgrade() else {
            log::debug!("Deferred task target dropped before it fired; skipping");
            return;
        };
        if panic::catch_unwind(AssertUnwindSafe(|| task.run_deferred())).is_err() {
            log::error!("Deferred task panicked");
        }
    }
}
