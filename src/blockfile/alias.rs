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
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use super::{
    assign_from_xml, bare_name, parse_float, parse_int, parse_int64, with_extension, BlockFile,
    BlockFilePtr, BlockKind, LoadContext,
};
use crate::audiofile::AudioFile;
use crate::context::StorageContext;
use crate::error::{FileCause, Result, StorageError};
use crate::format::{clear_samples, SampleBuffer, SampleFormat};
use crate::summary::{calc_summary, fix_summary, MinMaxRms};
use crate::xml::checker::{
    is_good_file_name, is_good_path_name, is_good_path_string, is_valid_channel,
};
use crate::xml::{Attributes, XmlWriter};

/// Where an alias block's audio lives.
pub struct AliasData {
    aliased_file: Mutex<PathBuf>,
    start: u64,
    channel: usize,
    silent_alias_log: AtomicBool,
}

impl AliasData {
    pub(super) fn new(aliased_file: PathBuf, start: u64, channel: usize) -> Self {
        AliasData {
            aliased_file: Mutex::new(aliased_file),
            start,
            channel,
            silent_alias_log: AtomicBool::new(false),
        }
    }

    /// The external file, or an empty path once the block has been
    /// deliberately silenced.
    pub fn aliased_file_name(&self) -> PathBuf {
        self.aliased_file.lock().clone()
    }

    pub fn alias_start(&self) -> u64 {
        self.start
    }

    pub fn alias_channel(&self) -> usize {
        self.channel
    }

    pub fn is_alias_log_silenced(&self) -> bool {
        self.silent_alias_log.load(Ordering::Acquire)
    }
}

/// The attributes shared by the alias element kinds.
pub(super) struct AliasAttrs {
    pub summary_file: Option<PathBuf>,
    pub aliased: PathBuf,
    pub start: u64,
    pub len: usize,
    pub channel: usize,
    pub stats: MinMaxRms,
}

impl AliasAttrs {
    pub fn parse(loader: &dyn LoadContext, attrs: &Attributes, file_key: &str) -> Self {
        let mut parsed = AliasAttrs {
            summary_file: None,
            aliased: PathBuf::new(),
            start: 0,
            len: 0,
            channel: 0,
            stats: MinMaxRms::default(),
        };

        for (key, value) in attrs {
            match key.as_str() {
                "summaryfile" => parsed.summary_file = assign_from_xml(loader, value),
                "aliasstart" => {
                    if let Some(start) = parse_int64(value).filter(|n| *n >= 0) {
                        parsed.start = start as u64;
                    }
                }
                "aliaslen" => {
                    if let Some(len) = parse_int(value).filter(|n| *n >= 0) {
                        parsed.len = len as usize;
                    }
                }
                "aliaschannel" => {
                    if let Some(channel) = parse_int(value).filter(|n| is_valid_channel(*n)) {
                        parsed.channel = channel as usize;
                    }
                }
                "min" => parsed.stats.min = parse_float(value).unwrap_or(parsed.stats.min),
                "max" => parsed.stats.max = parse_float(value).unwrap_or(parsed.stats.max),
                "rms" => {
                    if let Some(rms) = parse_float(value).filter(|rms| *rms >= 0.0) {
                        parsed.stats.rms = rms;
                    }
                }
                key if key == file_key => {
                    if let Some(path) = parse_source_path(loader, value) {
                        parsed.aliased = path;
                    }
                }
                _ => {}
            }
        }
        parsed
    }
}

/// Accepts a full path to an existing file, a file in the data directory,
/// or failing both any plausible path.
pub(super) fn parse_source_path(loader: &dyn LoadContext, value: &str) -> Option<PathBuf> {
    let data_dir = loader.project_data_dir();
    if is_good_path_name(value) {
        Some(PathBuf::from(value))
    } else if is_good_file_name(value, &data_dir) {
        Some(data_dir.join(value))
    } else if is_good_path_string(value) {
        Some(PathBuf::from(value))
    } else {
        None
    }
}

impl BlockFile {
    /// Creates a block reading `alias_len` samples of `alias_channel` from
    /// `aliased_file`, computing its summary into `<base>.auf`.
    ///
    /// Fails if the aliased audio cannot be read. Failing to write the
    /// summary file is only logged; the block still works from memory.
    pub fn new_alias(
        ctx: Arc<StorageContext>,
        base: &Path,
        aliased_file: &Path,
        alias_start: u64,
        alias_len: usize,
        alias_channel: usize,
    ) -> Result<BlockFilePtr> {
        let block = BlockFile::with_kind(
            ctx,
            with_extension(base, "auf"),
            alias_len,
            MinMaxRms::default(),
            BlockKind::PcmAlias(AliasData::new(
                aliased_file.to_path_buf(),
                alias_start,
                alias_channel,
            )),
        );
        block.write_alias_summary(false)?;
        Ok(Arc::new(block))
    }

    /// Wraps an `.auf` summary already on disk.
    pub fn from_existing_alias(
        ctx: Arc<StorageContext>,
        summary_file: PathBuf,
        aliased_file: PathBuf,
        alias_start: u64,
        alias_len: usize,
        alias_channel: usize,
        stats: MinMaxRms,
    ) -> BlockFilePtr {
        Arc::new(BlockFile::with_kind(
            ctx,
            summary_file,
            alias_len,
            stats,
            BlockKind::PcmAlias(AliasData::new(aliased_file, alias_start, alias_channel)),
        ))
    }

    /// Points the block at a different source. An empty path silences it.
    pub fn change_aliased_file_name(&self, new_file: PathBuf) {
        if let Some(alias) = self.as_alias() {
            *alias.aliased_file.lock() = new_file;
        }
    }

    /// Stops repeated warnings about a missing source.
    pub fn silence_alias_log(&self) {
        if let Some(alias) = self.as_alias() {
            alias.silent_alias_log.store(true, Ordering::Release);
        }
    }

    pub(super) fn read_alias_data(
        &self,
        alias: &AliasData,
        dst: &mut SampleBuffer,
        start: usize,
        len: usize,
        may_throw: bool,
    ) -> Result<usize> {
        let aliased = alias.aliased_file_name();
        if aliased.as_os_str().is_empty() {
            clear_samples(dst, 0, len);
            return Ok(len);
        }

        let dither = self.ctx.config().dither(true);
        let result = AudioFile::open(&aliased).and_then(|mut file| {
            file.read(
                dst,
                0,
                alias.start + start as u64,
                len,
                alias.channel,
                dither,
            )
        });
        let read = match result {
            Ok(read) => read,
            Err(e) => {
                if !alias.is_alias_log_silenced() {
                    warn!(path = ?aliased, err = %e, "Unable to read aliased file");
                }
                clear_samples(dst, 0, len);
                0
            }
        };
        self.finish_read(dst, read, len, may_throw, &aliased)
    }

    /// Computes the summary from the aliased audio and writes it.
    ///
    /// With `strict`, failing to write the summary is an error and the old
    /// statistics stay; otherwise it is logged and the new statistics are
    /// kept in memory.
    pub(super) fn write_alias_summary(&self, strict: bool) -> Result<()> {
        let mut samples = SampleBuffer::new(SampleFormat::Float, self.len);
        self.read_data(&mut samples, 0, self.len, true)?;
        let summary = calc_summary(&samples.into_f32(), &self.info);

        let path = self.file_name();
        let written = {
            let _guard = self.read_lock.lock();
            File::create(&path).and_then(|mut file| file.write_all(&summary.data))
        };
        match written {
            Ok(()) => {
                self.set_stats(summary.stats);
                debug!(path = ?path, "Wrote alias summary");
                Ok(())
            }
            Err(e) => {
                warn!(path = ?path, err = %e, "Unable to write summary data");
                if strict {
                    return Err(StorageError::file(FileCause::Write, &path));
                }
                self.set_stats(summary.stats);
                Ok(())
            }
        }
    }

    pub(super) fn read_alias_summary(&self) -> (Vec<u8>, bool) {
        let path = self.file_name();
        let total = self.info.total_summary_bytes;

        let mut file = match File::open(&path) {
            Ok(file) => {
                self.silent_log.store(false, Ordering::Release);
                file
            }
            Err(e) => {
                if !self.log_is_silenced() {
                    warn!(path = ?path, err = %e, "Unable to open summary file");
                }
                self.silence_log();
                return (vec![0; total], false);
            }
        };

        let mut data = vec![0; total];
        if let Err(e) = file.read_exact(&mut data) {
            warn!(path = ?path, err = %e, "Unable to read summary file");
            return (vec![0; total], false);
        }
        fix_summary(&mut data, &self.info);
        (data, true)
    }

    pub(super) fn copy_alias(&self, alias: &AliasData, new_file: PathBuf) -> BlockFilePtr {
        BlockFile::from_existing_alias(
            self.ctx.clone(),
            new_file,
            alias.aliased_file_name(),
            alias.start,
            self.len,
            alias.channel,
            *self.stats.read(),
        )
    }

    pub(super) fn save_alias_xml(&self, alias: &AliasData, w: &mut XmlWriter) {
        let stats = *self.stats.read();
        w.start_tag("pcmaliasblockfile");
        w.write_attr("summaryfile", bare_name(&self.file_name()));
        w.write_attr("aliasfile", alias.aliased_file_name().as_path());
        w.write_attr("aliasstart", alias.start);
        w.write_attr("aliaslen", self.len);
        w.write_attr("aliaschannel", alias.channel);
        w.write_attr("min", stats.min);
        w.write_attr("max", stats.max);
        w.write_attr("rms", stats.rms);
        w.end_tag("pcmaliasblockfile");
    }

    pub(super) fn alias_from_xml(
        loader: &dyn LoadContext,
        attrs: &Attributes,
    ) -> Option<BlockFilePtr> {
        let parsed = AliasAttrs::parse(loader, attrs, "aliasfile");
        Some(BlockFile::from_existing_alias(
            loader.context().clone(),
            parsed.summary_file?,
            parsed.aliased,
            parsed.start,
            parsed.len,
            parsed.channel,
            parsed.stats,
        ))
    }
}
