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
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};
use parking_lot::{Condvar, Mutex};
use rayon::ThreadPoolBuilder;
use tracing::{debug, info};

use super::task::OdTask;
use crate::context::StorageContext;
use crate::error::Result;
use crate::sequence::SharedBlockArray;

struct Shared {
    slice: f32,
    tasks: Mutex<Vec<Arc<OdTask>>>,
    in_flight: Mutex<usize>,
    idle: Condvar,
    shutting_down: AtomicBool,
    completed_tx: Sender<usize>,
    completed_rx: Receiver<usize>,
}

/// Runs on-demand tasks on a dedicated worker pool.
///
/// Each task is worked in slices of `od_slice` of its total and requeued
/// until complete, so many tasks share the pool fairly and a changed demand
/// sample takes effect at the next slice.
pub struct OdManager {
    pool: rayon::ThreadPool,
    shared: Arc<Shared>,
}

impl OdManager {
    pub fn new(ctx: &StorageContext) -> Result<Self> {
        let threads = ctx.config().od_threads();
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("blockstore-od-{i}"))
            .build()?;
        let (completed_tx, completed_rx) = crossbeam_channel::unbounded();
        info!(threads, "Started on-demand workers");

        Ok(OdManager {
            pool,
            shared: Arc::new(Shared {
                slice: ctx.config().od_slice(),
                tasks: Mutex::new(Vec::new()),
                in_flight: Mutex::new(0),
                idle: Condvar::new(),
                shutting_down: AtomicBool::new(false),
                completed_tx,
                completed_rx,
            }),
        })
    }

    /// Queues `task`. Tasks added after shutdown are ignored.
    pub fn add_task(&self, task: Arc<OdTask>) {
        if self.shared.shutting_down.load(Ordering::Acquire) {
            return;
        }
        debug!(task = task.task_number(), name = task.name(), "Adding task");
        self.shared.tasks.lock().push(task.clone());
        *self.shared.in_flight.lock() += 1;

        let shared = self.shared.clone();
        self.pool.spawn(move || run_slice(task, shared));
    }

    pub fn num_tasks(&self) -> usize {
        self.shared.tasks.lock().len()
    }

    /// Moves every task's point of interest to `sample`.
    pub fn demand(&self, sample: u64) {
        for task in self.shared.tasks.lock().iter() {
            task.set_demand_sample(sample);
            task.set_needs_update();
        }
    }

    /// Moves the point of interest of the tasks working on `track`.
    pub fn demand_track(&self, track: &SharedBlockArray, sample: u64) {
        for task in self.shared.tasks.lock().iter() {
            task.demand_track_update(track, sample);
        }
    }

    /// Receives the number of each task as it completes.
    pub fn completions(&self) -> Receiver<usize> {
        self.shared.completed_rx.clone()
    }

    /// Blocks until no task is queued or running.
    pub fn run_until_idle(&self) {
        let mut in_flight = self.shared.in_flight.lock();
        while *in_flight > 0 {
            self.shared.idle.wait(&mut in_flight);
        }
    }

    /// Terminates every task and waits for the workers to let go of them.
    pub fn shutdown(&self) {
        if self.shared.shutting_down.swap(true, Ordering::AcqRel) {
            return;
        }
        let tasks: Vec<Arc<OdTask>> = self.shared.tasks.lock().clone();
        for task in &tasks {
            task.terminate_and_block();
        }
        self.run_until_idle();
        info!(tasks = tasks.len(), "On-demand workers shut down");
    }
}

impl Drop for OdManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_slice(task: Arc<OdTask>, shared: Arc<Shared>) {
    let stopping = shared.shutting_down.load(Ordering::Acquire) || task.is_terminated();
    if !stopping {
        task.do_some(shared.slice);
    }

    if !stopping && !task.is_complete() && task.has_work() {
        rayon::spawn(move || run_slice(task, shared));
        return;
    }

    if task.is_complete() {
        debug!(task = task.task_number(), name = task.name(), "Task complete");
        let _ = shared.completed_tx.send(task.task_number());
    }
    shared
        .tasks
        .lock()
        .retain(|other| !Arc::ptr_eq(other, &task));

    let mut in_flight = shared.in_flight.lock();
    *in_flight -= 1;
    if *in_flight == 0 {
        shared.idle.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::blockfile::BlockFile;
    use crate::config::StorageConfig;
    use crate::ondemand::ComputeSummaryTask;
    use crate::sequence::BlockArray;
    use crate::testutil::{eventually, ramp, write_wav};

    fn od_track(ctx: &Arc<StorageContext>, dir: &std::path::Path, blocks: u64) -> BlockArray {
        let wav = dir.join("source.wav");
        write_wav(&wav, &[ramp(blocks as usize * 1000, -1.0, 1.0)], 44100).unwrap();
        let mut array = BlockArray::new();
        for i in 0..blocks {
            let base = dir.join(format!("od{i}"));
            array.append(BlockFile::new_od_alias(ctx.clone(), &base, &wav, i * 1000, 1000, 0));
        }
        array
    }

    #[test]
    fn test_runs_tasks_to_completion() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = StorageContext::new(StorageConfig::default());
        let array = od_track(&ctx, dir.path(), 8);
        let blocks = array.blocks();

        let manager = OdManager::new(&ctx).unwrap();
        let completions = manager.completions();
        let task = OdTask::new(&ctx, Box::new(ComputeSummaryTask::new()));
        task.add_track(array.shared());
        manager.add_task(task.clone());
        manager.demand(4000);
        manager.run_until_idle();

        assert!(task.is_complete());
        assert_eq!(manager.num_tasks(), 0);
        assert!(blocks.iter().all(|b| b.is_summary_available()));
        assert_eq!(
            completions.recv_timeout(Duration::from_secs(5)).unwrap(),
            task.task_number()
        );
    }

    #[test]
    fn test_shutdown_terminates_tasks() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = StorageContext::new(StorageConfig::default());
        let array = od_track(&ctx, dir.path(), 4);

        let manager = OdManager::new(&ctx).unwrap();
        let task = OdTask::new(&ctx, Box::new(ComputeSummaryTask::new()));
        task.add_track(array.shared());
        manager.add_task(task.clone());
        manager.shutdown();

        assert!(!task.is_running());
        assert_eq!(manager.num_tasks(), 0);

        let late = OdTask::new(&ctx, Box::new(ComputeSummaryTask::new()));
        manager.add_task(late);
        assert_eq!(manager.num_tasks(), 0);
    }

    #[test]
    fn test_completes_in_background() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = StorageContext::new(StorageConfig::default());
        let array = od_track(&ctx, dir.path(), 3);
        let blocks = array.blocks();

        let manager = OdManager::new(&ctx).unwrap();
        let task = OdTask::new(&ctx, Box::new(ComputeSummaryTask::new()));
        task.add_track(array.shared());
        manager.add_task(task.clone());

        eventually(|| task.is_complete(), "Summary task never completed");
        eventually(
            || blocks.iter().all(|b| b.is_summary_available()),
            "Summaries never became available",
        );
    }
}
