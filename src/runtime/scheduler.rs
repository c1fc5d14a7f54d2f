//! Cooperative task scheduler.
//!
//! Tasks are polled once per tick from [`Scheduler::process`]. A task is due
//! when at least its interval has passed since it last ran (or since it was
//! scheduled). Periodic tasks are re-armed at the tick they ran; one-shot
//! tasks are removed right after their single run. A task cancelled by a
//! callback during a pass is removed before the pass reaches it.

use core::fmt::Write;

use embassy_time::{Duration, Instant};
use heapless::{String, Vec};

use crate::error::Error;
use crate::time::has_elapsed;

pub const MAX_TASK_ID_LEN: usize = 24;
/// Cancellations one callback pass can apply immediately.
pub const MAX_PENDING_CANCELS: usize = 8;

pub type TaskId = String<MAX_TASK_ID_LEN>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TaskKind {
    Periodic,
    Once,
}

#[derive(Debug, Clone)]
struct Task<F> {
    id: TaskId,
    interval: Duration,
    last_run: Instant,
    kind: TaskKind,
    callback: F,
}

/// Builds a task id, rejecting ids that do not fit.
pub fn task_id(id: &str) -> Result<TaskId, Error> {
    TaskId::try_from(id).map_err(|_| Error::capacity(id.len(), MAX_TASK_ID_LEN))
}

/// Generator for `task_<n>` / `once_<n>` ids.
#[derive(Debug, Default)]
pub struct TaskIds {
    next: u32,
}

impl TaskIds {
    pub const fn new() -> Self {
        Self { next: 0 }
    }

    pub fn allocate(&mut self, kind: TaskKind) -> Result<TaskId, Error> {
        let prefix = match kind {
            TaskKind::Periodic => "task",
            TaskKind::Once => "once",
        };
        let mut id = TaskId::new();
        write!(id, "{prefix}_{}", self.next)
            .map_err(|_| Error::capacity(MAX_TASK_ID_LEN + 1, MAX_TASK_ID_LEN))?;
        self.next = self.next.wrapping_add(1);
        Ok(id)
    }
}

/// What callbacks may change while a pass is running: ids for new tasks
/// and cancellations of existing ones.
#[derive(Debug, Default)]
pub struct TaskControl {
    ids: TaskIds,
    cancelled: Vec<TaskId, MAX_PENDING_CANCELS>,
}

impl TaskControl {
    pub const fn new() -> Self {
        Self {
            ids: TaskIds::new(),
            cancelled: Vec::new(),
        }
    }

    pub fn allocate(&mut self, kind: TaskKind) -> Result<TaskId, Error> {
        self.ids.allocate(kind)
    }

    /// Marks `id` for removal before the next task of the pass runs.
    pub fn cancel(&mut self, id: TaskId) {
        if self.cancelled.contains(&id) {
            return;
        }
        if self.cancelled.push(id).is_err() {
            debug!("too many cancellations in one pass, applying after it");
        }
    }

    /// Forgets pending cancellations once they have been applied in order.
    pub fn clear_cancelled(&mut self) {
        self.cancelled.clear();
    }
}

/// Fixed-capacity set of tasks, run in insertion order.
pub struct Scheduler<F, const N: usize> {
    tasks: Vec<Task<F>, N>,
    control: TaskControl,
}

impl<F: Clone, const N: usize> Default for Scheduler<F, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<F: Clone, const N: usize> Scheduler<F, N> {
    pub const fn new() -> Self {
        Self {
            tasks: Vec::new(),
            control: TaskControl::new(),
        }
    }

    /// Schedules `callback` under `id`, replacing any task with that id.
    ///
    /// The first run happens `interval` after `now`.
    pub fn schedule(
        &mut self,
        id: TaskId,
        kind: TaskKind,
        interval: Duration,
        now: Instant,
        callback: F,
    ) -> Result<(), Error> {
        let task = Task {
            id,
            interval,
            last_run: now,
            kind,
            callback,
        };
        if let Some(existing) = self.tasks.iter_mut().find(|t| t.id == task.id) {
            *existing = task;
            return Ok(());
        }
        self.tasks
            .push(task)
            .map_err(|_| Error::capacity(N + 1, N))
    }

    /// Schedules a periodic task under a generated `task_<n>` id.
    pub fn schedule_every(
        &mut self,
        interval: Duration,
        now: Instant,
        callback: F,
    ) -> Result<TaskId, Error> {
        let id = self.control.allocate(TaskKind::Periodic)?;
        self.schedule(id.clone(), TaskKind::Periodic, interval, now, callback)?;
        Ok(id)
    }

    /// Schedules a one-shot task under a generated `once_<n>` id.
    pub fn schedule_once(
        &mut self,
        delay: Duration,
        now: Instant,
        callback: F,
    ) -> Result<TaskId, Error> {
        let id = self.control.allocate(TaskKind::Once)?;
        self.schedule(id.clone(), TaskKind::Once, delay, now, callback)?;
        Ok(id)
    }

    /// Control handle shared with callbacks running outside a pass.
    pub fn control_mut(&mut self) -> &mut TaskControl {
        &mut self.control
    }

    /// Removes the task with `id`. Returns whether one existed.
    pub fn cancel(&mut self, id: &str) -> bool {
        match self.tasks.iter().position(|t| t.id == id) {
            Some(index) => {
                self.tasks.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.tasks.iter().any(|t| t.id == id)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Runs every due task through `run`, in insertion order.
    ///
    /// `run` receives the task id, a copy of its callback and the
    /// [`TaskControl`], so callbacks can reserve ids for tasks they schedule
    /// and cancel tasks. Cancellations take effect before the next task
    /// runs. New tasks have to be queued by the caller and added after the
    /// pass.
    pub fn process(&mut self, now: Instant, mut run: impl FnMut(&str, F, &mut TaskControl)) {
        let mut index = 0;
        self.apply_cancelled(&mut index);
        while index < self.tasks.len() {
            let task = &mut self.tasks[index];
            if !has_elapsed(now, task.last_run, task.interval) {
                index += 1;
                continue;
            }

            task.last_run = now;
            let callback = task.callback.clone();
            let kind = task.kind;
            let id = task.id.clone();

            if kind == TaskKind::Once {
                self.tasks.remove(index);
            } else {
                index += 1;
            }
            run(&id, callback, &mut self.control);
            self.apply_cancelled(&mut index);
        }
    }

    /// Removes tasks marked through [`TaskControl::cancel`], keeping
    /// `index` on the next task to visit.
    fn apply_cancelled(&mut self, index: &mut usize) {
        for id in &self.control.cancelled {
            if let Some(position) = self.tasks.iter().position(|t| t.id == *id) {
                self.tasks.remove(position);
                if position < *index {
                    *index -= 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use std::vec::Vec as StdVec;

    use super::*;

    fn at(ms: u64) -> Instant {
        Instant::from_millis(ms)
    }

    fn fired(scheduler: &mut Scheduler<u8, 4>, ms: u64) -> StdVec<u8> {
        let mut out = StdVec::new();
        scheduler.process(at(ms), |_, cb, _| out.push(cb));
        out
    }

    #[test]
    fn test_periodic_task_timing() {
        let mut s = Scheduler::<u8, 4>::new();
        s.schedule(
            task_id("blink").unwrap(),
            TaskKind::Periodic,
            Duration::from_millis(1000),
            at(0),
            1,
        )
        .unwrap();

        assert!(fired(&mut s, 500).is_empty());
        assert_eq!(fired(&mut s, 1000), [1]);
        assert!(fired(&mut s, 1999).is_empty());
        assert_eq!(fired(&mut s, 2000), [1]);
    }

    #[test]
    fn test_one_shot_runs_once() {
        let mut s = Scheduler::<u8, 4>::new();
        let id = s.schedule_once(Duration::from_millis(100), at(0), 7).unwrap();
        assert_eq!(id, "once_0");

        assert!(fired(&mut s, 99).is_empty());
        assert_eq!(fired(&mut s, 100), [7]);
        assert!(!s.contains(&id));
        assert!(fired(&mut s, 10_000).is_empty());
    }

    #[test]
    fn test_cancel() {
        let mut s = Scheduler::<u8, 4>::new();
        let a = s.schedule_every(Duration::from_millis(10), at(0), 1).unwrap();
        let b = s.schedule_every(Duration::from_millis(10), at(0), 2).unwrap();
        assert_eq!(a, "task_0");
        assert_eq!(b, "task_1");

        assert!(s.cancel(&a));
        assert!(!s.cancel(&a));
        assert!(!s.cancel("missing"));
        assert_eq!(fired(&mut s, 10), [2]);
    }

    #[test]
    fn test_same_id_replaces_task() {
        let mut s = Scheduler::<u8, 4>::new();
        let id = task_id("send_P0").unwrap();
        s.schedule(id.clone(), TaskKind::Periodic, Duration::from_millis(10), at(0), 1)
            .unwrap();
        s.schedule(id, TaskKind::Periodic, Duration::from_millis(20), at(0), 2)
            .unwrap();
        assert_eq!(s.len(), 1);
        assert!(fired(&mut s, 10).is_empty());
        assert_eq!(fired(&mut s, 20), [2]);
    }

    #[test]
    fn test_cancel_during_pass_skips_later_task() {
        let mut s = Scheduler::<u8, 4>::new();
        s.schedule(task_id("a").unwrap(), TaskKind::Periodic, Duration::from_millis(10), at(0), 1)
            .unwrap();
        s.schedule(task_id("b").unwrap(), TaskKind::Periodic, Duration::from_millis(10), at(0), 2)
            .unwrap();
        s.schedule(task_id("c").unwrap(), TaskKind::Periodic, Duration::from_millis(10), at(0), 3)
            .unwrap();

        let mut out = StdVec::new();
        s.process(at(10), |id, cb, control| {
            out.push(cb);
            if id == "a" {
                control.cancel(task_id("b").unwrap());
            }
            if id == "c" {
                control.cancel(task_id("a").unwrap());
            }
        });
        assert_eq!(out, [1, 3]);
        assert!(!s.contains("a"));
        assert!(!s.contains("b"));
        assert!(s.contains("c"));
    }

    #[test]
    fn test_capacity() {
        let mut s = Scheduler::<u8, 1>::new();
        s.schedule_every(Duration::from_millis(1), at(0), 0).unwrap();
        assert!(matches!(
            s.schedule_every(Duration::from_millis(1), at(0), 0),
            Err(Error::CapacityExceeded { needed: 2, capacity: 1 })
        ));
    }

    #[test]
    fn test_insertion_order_with_one_shot_removed_midway() {
        let mut s = Scheduler::<u8, 4>::new();
        s.schedule_every(Duration::from_millis(10), at(0), 1).unwrap();
        s.schedule_once(Duration::from_millis(10), at(0), 2).unwrap();
        s.schedule_every(Duration::from_millis(10), at(0), 3).unwrap();
        assert_eq!(fired(&mut s, 10), [1, 2, 3]);
        assert_eq!(s.len(), 2);
    }
}
