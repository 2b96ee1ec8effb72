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
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use super::{
    assign_from_xml, au, bare_name, parse_float, parse_int, with_extension, BlockFile,
    BlockFilePtr, BlockKind, LoadContext,
};
use crate::context::StorageContext;
use crate::error::{FileCause, Result, StorageError};
use crate::format::{clear_samples, copy_samples, SampleBuffer, SampleFormat};
use crate::summary::{calc_summary, fix_summary, MinMaxRms, Summary};
use crate::xml::{Attributes, XmlWriter};

/// Samples and summary held in memory until written.
struct BlockCache {
    samples: SampleBuffer,
    summary: Vec<u8>,
    needs_write: bool,
}

pub(crate) struct SimpleData {
    cache: Mutex<Option<BlockCache>>,
    /// Unknown for blocks loaded from a document until the header is read.
    format: Mutex<Option<SampleFormat>>,
}

impl SimpleData {
    fn new(format: Option<SampleFormat>) -> Self {
        SimpleData {
            cache: Mutex::new(None),
            format: Mutex::new(format),
        }
    }

    pub(crate) fn needs_write(&self) -> bool {
        self.cache
            .lock()
            .as_ref()
            .is_some_and(|cache| cache.needs_write)
    }
}

impl BlockFile {
    /// Creates a block owning `samples`, stored in `<base>.au`.
    ///
    /// The file is written immediately unless `allow_deferred_write` is set
    /// and block caching is enabled, in which case it is written by
    /// [`BlockFile::write_cache_to_disk`].
    pub fn new_simple(
        ctx: Arc<StorageContext>,
        base: &Path,
        samples: &SampleBuffer,
        allow_deferred_write: bool,
    ) -> Result<BlockFilePtr> {
        let use_cache = ctx.config().cache_block_files();
        let block = BlockFile::with_kind(
            ctx,
            with_extension(base, "au"),
            samples.len(),
            MinMaxRms::default(),
            BlockKind::Simple(SimpleData::new(Some(samples.format()))),
        );

        let summary = block.summarize(samples);
        let written = if allow_deferred_write && use_cache {
            false
        } else {
            block.write_au(&summary.data, samples)?;
            true
        };

        if use_cache {
            if let BlockKind::Simple(simple) = &block.kind {
                *simple.cache.lock() = Some(BlockCache {
                    samples: samples.clone(),
                    summary: summary.data,
                    needs_write: !written,
                });
            }
        }
        Ok(Arc::new(block))
    }

    /// Wraps an `.au` file already on disk.
    pub fn from_existing_simple(
        ctx: Arc<StorageContext>,
        file: PathBuf,
        len: usize,
        stats: MinMaxRms,
    ) -> BlockFilePtr {
        Arc::new(BlockFile::with_kind(
            ctx,
            file,
            len,
            stats,
            BlockKind::Simple(SimpleData::new(None)),
        ))
    }

    /// Computes the summary of `samples` and takes its statistics.
    pub(super) fn summarize(&self, samples: &SampleBuffer) -> Summary {
        let floats = samples.to_f32(0, samples.len().min(self.len));
        let summary = calc_summary(&floats, &self.info);
        self.set_stats(summary.stats);
        summary
    }

    pub(super) fn write_au(&self, summary: &[u8], samples: &SampleBuffer) -> Result<()> {
        if summary.len() != self.info.total_summary_bytes {
            return Err(crate::inconsistency!());
        }
        let path = self.file_name();
        au::write(&path, &self.info, summary, samples).map_err(|e| {
            warn!(path = ?path, err = %e, "Unable to write block file");
            StorageError::file(FileCause::Write, &path)
        })?;
        debug!(path = ?path, len = self.len, format = %samples.format(), "Wrote block file");
        Ok(())
    }

    pub(super) fn read_simple_data(
        &self,
        simple: &SimpleData,
        dst: &mut SampleBuffer,
        start: usize,
        len: usize,
        may_throw: bool,
    ) -> Result<usize> {
        let cached = simple.cache.lock().as_ref().map(|cache| {
            let frames = len.min(self.len.saturating_sub(start));
            let dither = self.ctx.config().dither(true);
            copy_samples(&cache.samples, start, dst, 0, frames, dither);
            frames
        });
        match cached {
            Some(frames) => self.finish_read(dst, frames, len, may_throw, &self.file_name()),
            None => self.read_au_data(dst, start, len, may_throw),
        }
    }

    pub(super) fn read_au_data(
        &self,
        dst: &mut SampleBuffer,
        start: usize,
        len: usize,
        may_throw: bool,
    ) -> Result<usize> {
        let path = self.file_name();
        let dither = self.ctx.config().dither(true);
        let read = match au::read_samples(&path, start, len, dst, dither) {
            Ok(read) => read,
            Err(e) => {
                if !self.log_is_silenced() {
                    warn!(path = ?path, err = %e, "Unable to read block file");
                }
                clear_samples(dst, 0, len);
                0
            }
        };
        self.finish_read(dst, read, len, may_throw, &path)
    }

    pub(super) fn read_simple_summary(&self, simple: Option<&SimpleData>) -> (Vec<u8>, bool) {
        if let Some(cache) = simple.and_then(|s| {
            s.cache
                .lock()
                .as_ref()
                .map(|cache| cache.summary.clone())
        }) {
            return (cache, true);
        }

        let path = self.file_name();
        match au::read_summary(&path, &self.info) {
            Ok(mut data) => {
                fix_summary(&mut data, &self.info);
                (data, true)
            }
            Err(e) => {
                if !self.log_is_silenced() {
                    warn!(path = ?path, err = %e, "Unable to read block summary");
                }
                (vec![0; self.info.total_summary_bytes], false)
            }
        }
    }

    pub(super) fn copy_simple(&self, new_file: PathBuf) -> BlockFilePtr {
        BlockFile::from_existing_simple(self.ctx.clone(), new_file, self.len, *self.stats.read())
    }

    pub(super) fn save_simple_xml(&self, w: &mut XmlWriter) {
        let stats = *self.stats.read();
        w.start_tag("simpleblockfile");
        w.write_attr("filename", bare_name(&self.file_name()));
        w.write_attr("len", self.len);
        w.write_attr("min", stats.min);
        w.write_attr("max", stats.max);
        w.write_attr("rms", stats.rms);
        w.end_tag("simpleblockfile");
    }

    pub(super) fn simple_from_xml(
        loader: &dyn LoadContext,
        attrs: &Attributes,
    ) -> Option<BlockFilePtr> {
        let mut file_name = None;
        let mut len = 0;
        let mut stats = MinMaxRms::default();

        for (key, value) in attrs {
            match key.as_str() {
                "filename" => file_name = assign_from_xml(loader, value),
                "len" => {
                    if let Some(n) = parse_int(value).filter(|n| *n > 0) {
                        len = n as usize;
                    }
                }
                "min" => stats.min = parse_float(value).unwrap_or(stats.min),
                "max" => stats.max = parse_float(value).unwrap_or(stats.max),
                "rms" => {
                    if let Some(rms) = parse_float(value).filter(|rms| *rms >= 0.0) {
                        stats.rms = rms;
                    }
                }
                _ => {}
            }
        }

        Some(BlockFile::from_existing_simple(
            loader.context().clone(),
            file_name?,
            len,
            stats,
        ))
    }

    /// Replaces the file with silence of the right shape.
    pub(super) fn recover_simple(&self) -> Result<()> {
        let path = self.file_name();
        au::write_silence(&path, &self.info, self.len).map_err(|e| {
            warn!(path = ?path, err = %e, "Unable to recover block file");
            StorageError::file(FileCause::Write, &path)
        })?;
        let format = match &self.kind {
            BlockKind::Simple(simple) => Some(&simple.format),
            BlockKind::OdDecode(od) => Some(&od.format),
            _ => None,
        };
        if let Some(format) = format {
            *format.lock() = Some(SampleFormat::Int16);
        }
        debug!(path = ?path, "Recovered block file as silence");
        Ok(())
    }

    pub(super) fn simple_space_usage(&self, simple: &SimpleData) -> u64 {
        if simple.needs_write() {
            return 0;
        }
        self.au_space_usage(&simple.format)
    }

    pub(super) fn au_space_usage(&self, format: &Mutex<Option<SampleFormat>>) -> u64 {
        let mut known = format.lock();
        let format = match *known {
            Some(format) => format,
            None => {
                let header = File::open(self.file_name()).and_then(|mut f| au::read_header(&mut f));
                match header {
                    Ok(header) => {
                        *known = Some(header.format());
                        header.format()
                    }
                    Err(_) => return 0,
                }
            }
        };
        (au::AU_HEADER_LEN + self.info.total_summary_bytes + self.len * format.disk_sample_size())
            as u64
    }

    pub(super) fn flush_simple_cache(&self, simple: &SimpleData) -> Result<()> {
        let mut guard = simple.cache.lock();
        if let Some(cache) = guard.as_mut() {
            if cache.needs_write {
                self.write_au(&cache.summary, &cache.samples)?;
                cache.needs_write = false;
            }
        }
        Ok(())
    }

    /// Loads samples and summary into memory. Failures leave the cache
    /// empty.
    pub(super) fn fill_simple_cache(&self, simple: &SimpleData) {
        if simple.cache.lock().is_some() {
            return;
        }

        let path = self.file_name();
        let format = match File::open(&path).and_then(|mut f| au::read_header(&mut f)) {
            Ok(header) => header.format(),
            Err(e) => {
                warn!(path = ?path, err = %e, "Unable to fill block cache");
                return;
            }
        };

        let mut samples = SampleBuffer::new(format, self.len);
        match self.read_au_data(&mut samples, 0, self.len, false) {
            Ok(read) if read == self.len => {}
            _ => return,
        }
        let (summary, _) = self.read_simple_summary(None);
        *simple.cache.lock() = Some(BlockCache {
            samples,
            summary,
            needs_write: false,
        });
    }
}
