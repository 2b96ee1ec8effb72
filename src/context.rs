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
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use tracing::{error, warn};

use crate::config::StorageConfig;
use crate::error::StorageError;

/// State shared by every block, directory manager and task of one store.
///
/// Blocks are dropped from arbitrary threads, so all counters are atomic.
#[derive(Debug)]
pub struct StorageContext {
    config: StorageConfig,
    destructions: AtomicU64,
    messages: MessageCoalescer,
    live_dir_managers: AtomicUsize,
    next_dir_manager: AtomicUsize,
    next_task: AtomicUsize,
}

impl StorageContext {
    pub fn new(config: StorageConfig) -> Arc<Self> {
        Arc::new(StorageContext {
            config,
            destructions: AtomicU64::new(0),
            messages: MessageCoalescer::default(),
            live_dir_managers: AtomicUsize::new(0),
            next_dir_manager: AtomicUsize::new(1),
            next_task: AtomicUsize::new(0),
        })
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    /// Number of blocks dropped since the context was created or reset.
    pub fn destruction_count(&self) -> u64 {
        self.destructions.load(Ordering::Acquire)
    }

    pub(crate) fn note_destruction(&self) {
        self.destructions.fetch_add(1, Ordering::AcqRel);
    }

    pub fn messages(&self) -> &MessageCoalescer {
        &self.messages
    }

    /// Clears the counters, e.g. at the start of a test.
    pub fn reset(&self) {
        self.destructions.store(0, Ordering::Release);
        self.messages.outstanding.store(0, Ordering::Release);
        self.messages.quieted.store(0, Ordering::Release);
    }

    /// Registers a new directory manager, returning its instance number.
    pub(crate) fn register_dir_manager(&self) -> usize {
        self.live_dir_managers.fetch_add(1, Ordering::AcqRel);
        self.next_dir_manager.fetch_add(1, Ordering::AcqRel)
    }

    /// Unregisters a directory manager, returning how many remain alive.
    pub(crate) fn unregister_dir_manager(&self) -> usize {
        self.live_dir_managers.fetch_sub(1, Ordering::AcqRel) - 1
    }

    pub(crate) fn next_task_number(&self) -> usize {
        self.next_task.fetch_add(1, Ordering::AcqRel)
    }
}

/// Collapses bursts of identical failures into one user-facing message.
///
/// Each failure raised through [`MessageCoalescer::raise`] is outstanding
/// until reported. Reports made while others are still outstanding are logged
/// as warnings; only the report that drains the queue is logged as an error.
/// Inside a [`MessageCoalescer::batch`] every report is quiet, and closing the
/// batch logs a single error counting them.
#[derive(Debug, Default)]
pub struct MessageCoalescer {
    outstanding: AtomicUsize,
    quieted: AtomicUsize,
}

impl MessageCoalescer {
    pub fn raise(&self, err: StorageError) -> StorageError {
        self.outstanding.fetch_add(1, Ordering::AcqRel);
        err
    }

    /// Reports a raised failure. Returns true if this report was the one
    /// surfaced to the user.
    pub fn report(&self, err: &StorageError) -> bool {
        let previous = self.release();
        if previous <= 1 {
            error!(err = %err, "Storage failure");
            true
        } else {
            warn!(err = %err, pending = previous - 1, "Storage failure");
            self.quieted.fetch_add(1, Ordering::AcqRel);
            false
        }
    }

    /// Raises and reports `err` in one step.
    pub fn notify(&self, err: StorageError) -> bool {
        let err = self.raise(err);
        self.report(&err)
    }

    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }

    /// Holds the queue open for a batch, so every report made inside the
    /// batch is logged as a warning.
    pub fn batch(&self) -> MessageGuard<'_> {
        self.outstanding.fetch_add(1, Ordering::AcqRel);
        MessageGuard {
            coalescer: self,
            closed: false,
        }
    }

    /// Drops one outstanding failure, returning the count before.
    fn release(&self) -> usize {
        self.outstanding
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                Some(n.saturating_sub(1))
            })
            .unwrap_or(0)
    }

    /// Ends a batch. When it was the last one open, logs the quieted
    /// failures once and returns how many there were.
    fn close_batch(&self) -> usize {
        if self.release() > 1 {
            return 0;
        }
        let quieted = self.quieted.swap(0, Ordering::AcqRel);
        if quieted > 0 {
            error!(failures = quieted, "Storage failures during operation");
        }
        quieted
    }
}

/// Returned by [`MessageCoalescer::batch`].
pub struct MessageGuard<'a> {
    coalescer: &'a MessageCoalescer,
    closed: bool,
}

impl MessageGuard<'_> {
    /// Closes the batch, returning the number of failures reported in it.
    pub fn finish(mut self) -> usize {
        self.closed = true;
        self.coalescer.close_batch()
    }
}

impl Drop for MessageGuard<'_> {
    fn drop(&mut self) {
        if !self.closed {
            self.coalescer.close_batch();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FileCause;

    #[test]
    fn test_burst_surfaces_once() {
        let ctx = StorageContext::new(StorageConfig::default());
        let errors: Vec<StorageError> = (0..5)
            .map(|_| {
                ctx.messages()
                    .raise(StorageError::file(FileCause::Write, "/full/disk.au"))
            })
            .collect();
        assert_eq!(ctx.messages().outstanding(), 5);

        let surfaced = errors
            .iter()
            .filter(|err| ctx.messages().report(err))
            .count();
        assert_eq!(surfaced, 1);
        assert_eq!(ctx.messages().outstanding(), 0);
    }

    #[test]
    fn test_batch_keeps_reports_quiet() {
        let ctx = StorageContext::new(StorageConfig::default());
        {
            let _batch = ctx.messages().batch();
            let err = ctx.messages().raise(StorageError::NotYetAvailable);
            assert!(!ctx.messages().report(&err));
        }
        assert_eq!(ctx.messages().outstanding(), 0);
    }

    #[test]
    fn test_batch_counts_repeated_failures() {
        let ctx = StorageContext::new(StorageConfig::default());
        let batch = ctx.messages().batch();
        for _ in 0..4 {
            assert!(!ctx
                .messages()
                .notify(StorageError::file(FileCause::Read, "/gone/source.wav")));
        }
        assert_eq!(batch.finish(), 4);
        assert_eq!(ctx.messages().outstanding(), 0);

        let batch = ctx.messages().batch();
        assert_eq!(batch.finish(), 0);
        assert!(ctx.messages().notify(StorageError::NotYetAvailable));
    }

    #[test]
    fn test_reset_clears_counters() {
        let ctx = StorageContext::new(StorageConfig::default());
        ctx.note_destruction();
        ctx.note_destruction();
        assert_eq!(ctx.destruction_count(), 2);
        ctx.reset();
        assert_eq!(ctx.destruction_count(), 0);
    }

    #[test]
    fn test_dir_manager_numbers() {
        let ctx = StorageContext::new(StorageConfig::default());
        let first = ctx.register_dir_manager();
        let second = ctx.register_dir_manager();
        assert_ne!(first, second);
        assert_eq!(ctx.unregister_dir_manager(), 1);
        assert_eq!(ctx.unregister_dir_manager(), 0);
    }
}
