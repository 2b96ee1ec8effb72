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
use tracing::debug;

use super::task::{TaskWork, WorkQueue};
use crate::error::Result;
use crate::sequence::SharedBlockArray;

/// Writes the summaries of on-demand alias blocks.
#[derive(Default)]
pub struct ComputeSummaryTask {
    queue: WorkQueue,
}

impl ComputeSummaryTask {
    pub fn new() -> Self {
        ComputeSummaryTask::default()
    }
}

impl TaskWork for ComputeSummaryTask {
    fn name(&self) -> &'static str {
        "compute-summary"
    }

    fn update(&mut self, tracks: &[SharedBlockArray]) {
        self.queue.rebuild(tracks, |block| {
            block
                .as_od_alias()
                .map(|_| block.is_summary_available())
        });
    }

    fn do_some_internal(&mut self, _demand_sample: u64) -> Result<()> {
        let Some(block) = self.queue.next() else {
            return Ok(());
        };
        match block.do_write_summary() {
            Ok(()) => {
                debug!(block = ?block.file_name(), "Computed summary");
                self.queue.finished();
                Ok(())
            }
            Err(e) => {
                self.queue.failed(&block);
                Err(e)
            }
        }
    }

    fn percent_complete(&self) -> f32 {
        self.queue.percent_complete()
    }

    fn order(&mut self, demand_sample: u64) {
        self.queue.order(demand_sample);
    }

    fn has_work(&self) -> bool {
        self.queue.has_work()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockfile::BlockFile;
    use crate::config::StorageConfig;
    use crate::context::StorageContext;
    use crate::ondemand::OdTask;
    use crate::sequence::BlockArray;
    use crate::testutil::{ramp, write_wav};

    #[test]
    fn test_summarizes_demanded_block_first() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = StorageContext::new(StorageConfig::default());
        let wav = dir.path().join("source.wav");
        write_wav(&wav, &[ramp(4000, -1.0, 1.0)], 44100).unwrap();

        let mut array = BlockArray::new();
        for i in 0..4u64 {
            let base = dir.path().join(format!("od{i}"));
            array.append(BlockFile::new_od_alias(ctx.clone(), &base, &wav, i * 1000, 1000, 0));
        }
        let blocks = array.blocks();
        let track = array.shared();

        let task = OdTask::new(&ctx, Box::new(ComputeSummaryTask::new()));
        task.add_track(track.clone());
        task.set_demand_sample(2500);

        task.do_some(0.25);
        assert!(blocks[2].is_summary_available());
        assert!(!blocks[0].is_summary_available());
        assert!((task.percent_complete() - 0.25).abs() < 1e-6);

        task.do_some(1.0);
        assert!(task.is_complete());
        assert!(blocks.iter().all(|b| b.is_summary_available()));
        assert_eq!(blocks[3].min_max_rms(true).unwrap().max, 1.0);
        assert_eq!(blocks[3].as_od_alias().unwrap().start(), 3000);
    }

    #[test]
    fn test_failed_block_is_not_retried() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = StorageContext::new(StorageConfig::default());
        let wav = dir.path().join("source.wav");
        write_wav(&wav, &[ramp(1000, -1.0, 1.0)], 44100).unwrap();

        let mut array = BlockArray::new();
        let missing = dir.path().join("missing").join("od");
        array.append(BlockFile::new_od_alias(ctx.clone(), &missing, &wav, 0, 1000, 0));
        let blocks = array.blocks();

        let batch = ctx.messages().batch();
        let task = OdTask::new(&ctx, Box::new(ComputeSummaryTask::new()));
        task.add_track(array.shared());
        task.do_some(1.0);
        assert!(task.is_complete());
        assert!(!blocks[0].is_summary_available());

        task.do_some(1.0);
        assert!(task.is_complete());
        assert_eq!(batch.finish(), 1);
    }
}
