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
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use super::alias::{AliasAttrs, AliasData};
use super::{bare_name, with_extension, BlockFile, BlockFilePtr, BlockKind, LoadContext};
use crate::context::StorageContext;
use crate::error::Result;
use crate::summary::MinMaxRms;
use crate::xml::{Attributes, XmlWriter};

/// Progress of an on-demand alias block's summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SummaryState {
    NoSummary,
    Computing,
    /// Terminal.
    Available,
}

/// An alias block whose summary is written later by a background task.
pub struct OdAliasData {
    pub(super) alias: AliasData,
    state: Mutex<SummaryState>,
    write_lock: Mutex<()>,
    has_been_saved: AtomicBool,
    start: AtomicU64,
    clip_offset: AtomicU64,
}

impl OdAliasData {
    fn new(alias: AliasData, summary_available: bool) -> Self {
        let state = if summary_available {
            SummaryState::Available
        } else {
            SummaryState::NoSummary
        };
        OdAliasData {
            alias,
            state: Mutex::new(state),
            write_lock: Mutex::new(()),
            has_been_saved: AtomicBool::new(false),
            start: AtomicU64::new(0),
            clip_offset: AtomicU64::new(0),
        }
    }

    pub fn state(&self) -> SummaryState {
        *self.state.lock()
    }

    fn set_state(&self, state: SummaryState) {
        *self.state.lock() = state;
    }

    /// Whether a document referencing the written summary has been saved.
    pub fn has_been_saved(&self) -> bool {
        self.has_been_saved.load(Ordering::Acquire)
    }

    /// Offset of the block within its clip, in samples.
    pub fn start(&self) -> u64 {
        self.start.load(Ordering::Acquire)
    }

    pub fn set_start(&self, start: u64) {
        self.start.store(start, Ordering::Release);
    }

    /// Offset of the block's clip within its track, in samples.
    pub fn clip_offset(&self) -> u64 {
        self.clip_offset.load(Ordering::Acquire)
    }

    pub fn set_clip_offset(&self, offset: u64) {
        self.clip_offset.store(offset, Ordering::Release);
    }
}

impl BlockFile {
    /// An alias block whose summary will live in `<base>.auf` once
    /// [`BlockFile::do_write_summary`] runs. Performs no I/O.
    pub fn new_od_alias(
        ctx: Arc<StorageContext>,
        base: &Path,
        aliased_file: &Path,
        alias_start: u64,
        alias_len: usize,
        alias_channel: usize,
    ) -> BlockFilePtr {
        BlockFile::from_existing_od_alias(
            ctx,
            with_extension(base, "auf"),
            aliased_file.to_path_buf(),
            alias_start,
            alias_len,
            alias_channel,
            MinMaxRms::default(),
            false,
        )
    }

    #[allow(clippy::too_many_arguments)]
    pub fn from_existing_od_alias(
        ctx: Arc<StorageContext>,
        summary_file: PathBuf,
        aliased_file: PathBuf,
        alias_start: u64,
        alias_len: usize,
        alias_channel: usize,
        stats: MinMaxRms,
        summary_available: bool,
    ) -> BlockFilePtr {
        let alias = AliasData::new(aliased_file, alias_start, alias_channel);
        Arc::new(BlockFile::with_kind(
            ctx,
            summary_file,
            alias_len,
            stats,
            BlockKind::OdPcmAlias(OdAliasData::new(alias, summary_available)),
        ))
    }

    /// Computes and writes the summary of an on-demand alias block.
    ///
    /// Concurrent callers are serialised and only the first does any work.
    /// On failure the block stays without a summary.
    pub fn do_write_summary(&self) -> Result<()> {
        let Some(od) = self.as_od_alias() else {
            return Ok(());
        };
        let _write = od.write_lock.lock();
        if od.state() == SummaryState::Available {
            return Ok(());
        }

        od.set_state(SummaryState::Computing);
        match self.write_alias_summary(true) {
            Ok(()) => {
                od.set_state(SummaryState::Available);
                debug!(block = %bare_name(&self.file_name()), "Summary available");
                Ok(())
            }
            Err(e) => {
                od.set_state(SummaryState::NoSummary);
                Err(e)
            }
        }
    }

    pub(super) fn copy_od_alias(&self, od: &OdAliasData, new_file: PathBuf) -> BlockFilePtr {
        let _guard = self.read_lock.lock();
        let alias = &od.alias;
        let stats = *self.stats.read();
        let available = od.state() == SummaryState::Available;
        if available && od.has_been_saved() {
            BlockFile::from_existing_alias(
                self.ctx.clone(),
                new_file,
                alias.aliased_file_name(),
                alias.alias_start(),
                self.len,
                alias.alias_channel(),
                stats,
            )
        } else {
            BlockFile::from_existing_od_alias(
                self.ctx.clone(),
                new_file,
                alias.aliased_file_name(),
                alias.alias_start(),
                self.len,
                alias.alias_channel(),
                stats,
                available,
            )
        }
    }

    /// Saves as a plain alias block once the summary exists, which also
    /// makes the block lockable.
    pub(super) fn save_od_alias_xml(&self, od: &OdAliasData, w: &mut XmlWriter) {
        let _guard = self.read_lock.lock();
        if od.state() == SummaryState::Available {
            self.save_alias_xml(&od.alias, w);
            od.has_been_saved.store(true, Ordering::Release);
            return;
        }

        let alias = &od.alias;
        w.start_tag("odpcmaliasblockfile");
        w.write_attr("summaryfile", bare_name(&self.file_name()));
        w.write_attr("aliasfile", alias.aliased_file_name().as_path());
        w.write_attr("aliasstart", alias.alias_start());
        w.write_attr("aliaslen", self.len);
        w.write_attr("aliaschannel", alias.alias_channel());
        w.end_tag("odpcmaliasblockfile");
    }

    pub(super) fn od_alias_from_xml(
        loader: &dyn LoadContext,
        attrs: &Attributes,
    ) -> Option<BlockFilePtr> {
        let parsed = AliasAttrs::parse(loader, attrs, "aliasfile");
        Some(BlockFile::from_existing_od_alias(
            loader.context().clone(),
            parsed.summary_file?,
            parsed.aliased,
            parsed.start,
            parsed.len,
            parsed.channel,
            MinMaxRms::default(),
            false,
        ))
    }
}
