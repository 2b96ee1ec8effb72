// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
use std::sync::{Arc, Weak};
use std::thread;

use parking_lot::Mutex;
use tracing::debug;

use crate::blockfile::{BlockFile, BlockFilePtr};
use crate::context::StorageContext;
use crate::error::Result;
use crate::sequence::SharedBlockArray;

/// The part of an on-demand task that knows what its work is.
pub trait TaskWork: Send {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Rescans the tracks for blocks that still need work.
    fn update(&mut self, tracks: &[SharedBlockArray]);

    /// Performs one unit of work, typically one block, preferring the block
    /// at or after `demand_sample`.
    fn do_some_internal(&mut self, demand_sample: u64) -> Result<()>;

    /// Fraction of the work done, from 0.0 to 1.0.
    fn percent_complete(&self) -> f32;

    /// Reorders pending work so that work at `demand_sample` comes first.
    fn order(&mut self, demand_sample: u64);

    /// Lets a task choose where a slice should stop. `requested` is where
    /// the slice would stop otherwise.
    fn compute_next_work_until(&self, requested: f32) -> f32 {
        requested
    }

    fn has_work(&self) -> bool;
}

/// A unit of background work run in slices by the on-demand manager.
///
/// Every piece of shared state has its own mutex, held only for as long as
/// it takes to read or write it. `do_some` holds the terminate mutex while a
/// unit of work runs so `terminate_and_block` cannot return mid-unit.
pub struct OdTask {
    ctx: Arc<StorageContext>,
    number: usize,
    work: Mutex<Box<dyn TaskWork>>,
    percent: Mutex<f32>,
    running: Mutex<bool>,
    terminate: Mutex<bool>,
    needs_update: Mutex<bool>,
    demand_sample: Mutex<u64>,
    tracks: Mutex<Vec<Option<SharedBlockArray>>>,
    block_until_terminate: Mutex<()>,
}

impl OdTask {
    pub fn new(ctx: &Arc<StorageContext>, work: Box<dyn TaskWork>) -> Arc<Self> {
        Arc::new(OdTask {
            ctx: ctx.clone(),
            number: ctx.next_task_number(),
            work: Mutex::new(work),
            percent: Mutex::new(0.0),
            running: Mutex::new(false),
            terminate: Mutex::new(false),
            needs_update: Mutex::new(false),
            demand_sample: Mutex::new(0),
            tracks: Mutex::new(Vec::new()),
            block_until_terminate: Mutex::new(()),
        })
    }

    pub fn task_number(&self) -> usize {
        self.number
    }

    pub fn name(&self) -> &'static str {
        self.work.lock().name()
    }

    /// Runs units of work until `amount` more of the task is complete, the
    /// task finishes or it is terminated.
    pub fn do_some(&self, amount: f32) {
        self.set_running(true);
        let _slice = self.block_until_terminate.lock();

        if *self.terminate.lock() {
            self.set_running(false);
            return;
        }

        self.update();
        let requested = amount + self.percent_complete();
        let work_until = self
            .work
            .lock()
            .compute_next_work_until(requested)
            .max(self.percent_complete());

        loop {
            let terminate = self.terminate.lock();
            let percent = self.percent_complete();
            if *terminate || percent >= work_until || percent >= 1.0 {
                break;
            }

            thread::yield_now();
            let demand = self.demand_sample();
            {
                let mut work = self.work.lock();
                if let Err(e) = work.do_some_internal(demand) {
                    debug!(task = self.number, name = work.name(), "On-demand work failed");
                    self.ctx.messages().notify(e);
                }
                *self.percent.lock() = work.percent_complete();
            }
            drop(terminate);

            if self.needs_update() && self.percent_complete() < 1.0 {
                self.od_update();
            }
        }

        debug!(
            task = self.number,
            percent = self.percent_complete(),
            "Finished slice"
        );
        self.set_running(false);
    }

    /// Stops the task and waits for a running slice to finish. Once this
    /// returns, no more work touches the task's blocks.
    pub fn terminate_and_block(&self) {
        *self.terminate.lock() = true;
        drop(self.block_until_terminate.lock());
    }

    pub fn is_terminated(&self) -> bool {
        *self.terminate.lock()
    }

    pub fn stop_running(&self) {
        self.set_running(false);
    }

    fn set_running(&self, running: bool) {
        *self.running.lock() = running;
    }

    pub fn is_running(&self) -> bool {
        *self.running.lock()
    }

    pub fn percent_complete(&self) -> f32 {
        *self.percent.lock()
    }

    pub fn is_complete(&self) -> bool {
        self.percent_complete() >= 1.0 && !self.is_running()
    }

    pub fn demand_sample(&self) -> u64 {
        *self.demand_sample.lock()
    }

    pub fn set_demand_sample(&self, sample: u64) {
        *self.demand_sample.lock() = sample;
    }

    /// Moves the point of interest to `sample` of `track`, if this task
    /// works on that track.
    pub fn demand_track_update(&self, track: &SharedBlockArray, sample: u64) {
        if !self.is_task_associated_with_track(track) {
            return;
        }
        let changed = {
            let mut demand = self.demand_sample.lock();
            let changed = *demand != sample;
            *demand = sample;
            changed
        };
        if changed {
            self.set_needs_update();
        }
    }

    pub fn set_needs_update(&self) {
        *self.needs_update.lock() = true;
    }

    pub fn needs_update(&self) -> bool {
        *self.needs_update.lock()
    }

    fn reset_needs_update(&self) {
        *self.needs_update.lock() = false;
    }

    fn update(&self) {
        let tracks: Vec<SharedBlockArray> = self.tracks.lock().iter().flatten().cloned().collect();
        let demand = self.demand_sample();
        let mut work = self.work.lock();
        work.update(&tracks);
        work.order(demand);
        *self.percent.lock() = work.percent_complete();
    }

    fn od_update(&self) {
        self.update();
        self.reset_needs_update();
    }

    /// Applies a pending update so the reported percentage reflects the
    /// tracks as they are now.
    pub fn recalculate_percent_complete(&self) {
        if self.needs_update() {
            self.od_update();
        }
    }

    pub fn add_track(&self, track: SharedBlockArray) {
        self.tracks.lock().push(Some(track));
    }

    pub fn num_tracks(&self) -> usize {
        self.tracks.lock().len()
    }

    pub fn stop_using_track(&self, track: &SharedBlockArray) {
        for slot in self.tracks.lock().iter_mut() {
            if slot.as_ref().is_some_and(|t| Arc::ptr_eq(t, track)) {
                *slot = None;
            }
        }
    }

    pub fn replace_track(&self, old: &SharedBlockArray, new: SharedBlockArray) {
        for slot in self.tracks.lock().iter_mut() {
            if slot.as_ref().is_some_and(|t| Arc::ptr_eq(t, old)) {
                *slot = Some(new.clone());
            }
        }
    }

    pub fn is_task_associated_with_track(&self, track: &SharedBlockArray) -> bool {
        self.tracks
            .lock()
            .iter()
            .flatten()
            .any(|t| Arc::ptr_eq(t, track))
    }

    pub fn has_work(&self) -> bool {
        self.work.lock().has_work()
    }
}

/// The blocks a task still has to process, plus what it has seen done.
#[derive(Default)]
pub(super) struct WorkQueue {
    pending: Vec<BlockFilePtr>,
    failed: Vec<Weak<BlockFile>>,
    total: usize,
    done: usize,
}

impl WorkQueue {
    /// Collects the blocks of `tracks` that `classify` recognises.
    /// `classify` returns `Some(true)` for finished blocks and `Some(false)`
    /// for blocks needing work. Block positions are refreshed on the way.
    pub fn rebuild<F>(&mut self, tracks: &[SharedBlockArray], classify: F)
    where
        F: Fn(&BlockFile) -> Option<bool>,
    {
        self.pending.clear();
        self.total = 0;
        self.done = 0;
        self.failed.retain(|weak| weak.strong_count() > 0);

        let mut seen: Vec<*const BlockFile> = Vec::new();
        for track in tracks {
            let track = track.lock();
            for seq in track.iter() {
                let ptr = Arc::as_ptr(&seq.block);
                if seen.contains(&ptr) {
                    continue;
                }
                let Some(finished) = classify(&seq.block) else {
                    continue;
                };
                seen.push(ptr);
                set_block_start(&seq.block, seq.start);

                self.total += 1;
                if finished || self.has_failed(&seq.block) {
                    self.done += 1;
                } else {
                    self.pending.push(seq.block.clone());
                }
            }
        }
        self.pending.sort_by_key(|block| block.global_start().unwrap_or(0));
    }

    fn has_failed(&self, block: &BlockFilePtr) -> bool {
        self.failed
            .iter()
            .any(|weak| std::ptr::eq(weak.as_ptr(), Arc::as_ptr(block)))
    }

    /// Rotates the pending blocks so the first one ends after
    /// `demand_sample`; blocks before it are done last.
    pub fn order(&mut self, demand_sample: u64) {
        self.pending.sort_by_key(|block| block.global_start().unwrap_or(0));
        let first = self
            .pending
            .iter()
            .position(|block| block.global_end().unwrap_or(0) > demand_sample)
            .unwrap_or(0);
        self.pending.rotate_left(first);
    }

    pub fn next(&mut self) -> Option<BlockFilePtr> {
        if self.pending.is_empty() {
            None
        } else {
            Some(self.pending.remove(0))
        }
    }

    pub fn finished(&mut self) {
        self.done += 1;
    }

    /// Records a block that could not be processed so it is not retried.
    pub fn failed(&mut self, block: &BlockFilePtr) {
        self.failed.push(Arc::downgrade(block));
        self.done += 1;
    }

    pub fn percent_complete(&self) -> f32 {
        if self.pending.is_empty() || self.total == 0 {
            1.0
        } else {
            self.done as f32 / self.total as f32
        }
    }

    pub fn has_work(&self) -> bool {
        !self.pending.is_empty()
    }
}

fn set_block_start(block: &BlockFile, start: u64) {
    if let Some(od) = block.as_od_alias() {
        od.set_start(start);
    } else if let Some(od) = block.as_od_decode() {
        od.set_start(start);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageConfig;
    use crate::sequence::BlockArray;

    /// Counts down a fixed number of units.
    struct Countdown {
        total: usize,
        left: usize,
        updates: usize,
    }

    impl TaskWork for Countdown {
        fn name(&self) -> &'static str {
            "countdown"
        }

        fn update(&mut self, _tracks: &[SharedBlockArray]) {
            self.updates += 1;
        }

        fn do_some_internal(&mut self, _demand_sample: u64) -> Result<()> {
            self.left = self.left.saturating_sub(1);
            Ok(())
        }

        fn percent_complete(&self) -> f32 {
            (self.total - self.left) as f32 / self.total as f32
        }

        fn order(&mut self, _demand_sample: u64) {}

        fn has_work(&self) -> bool {
            self.left > 0
        }
    }

    fn countdown(total: usize) -> Box<dyn TaskWork> {
        Box::new(Countdown {
            total,
            left: total,
            updates: 0,
        })
    }

    #[test]
    fn test_do_some_in_slices() {
        let ctx = StorageContext::new(StorageConfig::default());
        let task = OdTask::new(&ctx, countdown(10));

        task.do_some(0.25);
        assert!((task.percent_complete() - 0.3).abs() < 1e-6);
        assert!(!task.is_running());
        assert!(!task.is_complete());

        task.do_some(1.0);
        assert!(task.is_complete());
        assert!(!task.has_work());
    }

    #[test]
    fn test_terminate_stops_work() {
        let ctx = StorageContext::new(StorageConfig::default());
        let task = OdTask::new(&ctx, countdown(10));
        task.terminate_and_block();
        assert!(task.is_terminated());
        task.do_some(1.0);
        assert_eq!(task.percent_complete(), 0.0);
        assert!(!task.is_running());
    }

    #[test]
    fn test_task_numbers_are_unique() {
        let ctx = StorageContext::new(StorageConfig::default());
        let first = OdTask::new(&ctx, countdown(1));
        let second = OdTask::new(&ctx, countdown(1));
        assert_ne!(first.task_number(), second.task_number());
    }

    #[test]
    fn test_track_association() {
        let ctx = StorageContext::new(StorageConfig::default());
        let task = OdTask::new(&ctx, countdown(1));
        let track = BlockArray::new().shared();
        let other = BlockArray::new().shared();

        task.add_track(track.clone());
        assert!(task.is_task_associated_with_track(&track));
        assert!(!task.is_task_associated_with_track(&other));

        task.demand_track_update(&other, 500);
        assert_eq!(task.demand_sample(), 0);
        assert!(!task.needs_update());

        task.demand_track_update(&track, 500);
        assert_eq!(task.demand_sample(), 500);
        assert!(task.needs_update());
        task.recalculate_percent_complete();
        assert!(!task.needs_update());

        task.replace_track(&track, other.clone());
        assert!(task.is_task_associated_with_track(&other));
        task.stop_using_track(&other);
        assert!(!task.is_task_associated_with_track(&other));
        assert_eq!(task.num_tracks(), 1);
    }
}
