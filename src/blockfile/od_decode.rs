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
use tracing::{debug, warn};

use super::alias::AliasAttrs;
use super::{
    bare_name, parse_int, with_extension, BlockFile, BlockFilePtr, BlockKind, LoadContext,
};
use crate::context::StorageContext;
use crate::error::{Result, StorageError};
use crate::format::{clear_samples, SampleBuffer, SampleFormat};
use crate::ondemand::FileDecoder;
use crate::summary::MinMaxRms;
use crate::xml::{attr, Attributes, XmlWriter};

/// A simple block whose samples are decoded later from a compressed file.
pub struct OdDecodeData {
    audio_file: Mutex<PathBuf>,
    alias_start: u64,
    alias_channel: usize,
    decode_type: u32,
    data_available: AtomicBool,
    pub(super) format: Mutex<Option<SampleFormat>>,
    start: AtomicU64,
    clip_offset: AtomicU64,
}

impl OdDecodeData {
    /// The encoded file the samples come from.
    pub fn audio_file_name(&self) -> PathBuf {
        self.audio_file.lock().clone()
    }

    pub fn alias_start(&self) -> u64 {
        self.alias_start
    }

    pub fn alias_channel(&self) -> usize {
        self.alias_channel
    }

    /// Which decoder produces the samples.
    pub fn decode_type(&self) -> u32 {
        self.decode_type
    }

    pub fn is_data_available(&self) -> bool {
        self.data_available.load(Ordering::Acquire)
    }

    pub fn start(&self) -> u64 {
        self.start.load(Ordering::Acquire)
    }

    pub fn set_start(&self, start: u64) {
        self.start.store(start, Ordering::Release);
    }

    pub fn clip_offset(&self) -> u64 {
        self.clip_offset.load(Ordering::Acquire)
    }

    pub fn set_clip_offset(&self, offset: u64) {
        self.clip_offset.store(offset, Ordering::Release);
    }
}

impl BlockFile {
    /// A block whose samples will be decoded into `<base>.au`. Performs no
    /// I/O.
    pub fn new_od_decode(
        ctx: Arc<StorageContext>,
        base: &Path,
        audio_file: &Path,
        alias_start: u64,
        alias_len: usize,
        alias_channel: usize,
        decode_type: u32,
    ) -> BlockFilePtr {
        BlockFile::from_existing_od_decode(
            ctx,
            with_extension(base, "au"),
            audio_file.to_path_buf(),
            alias_start,
            alias_len,
            alias_channel,
            decode_type,
            MinMaxRms::default(),
            false,
        )
    }

    #[allow(clippy::too_many_arguments)]
    pub fn from_existing_od_decode(
        ctx: Arc<StorageContext>,
        file: PathBuf,
        audio_file: PathBuf,
        alias_start: u64,
        alias_len: usize,
        alias_channel: usize,
        decode_type: u32,
        stats: MinMaxRms,
        data_available: bool,
    ) -> BlockFilePtr {
        Arc::new(BlockFile::with_kind(
            ctx,
            file,
            alias_len,
            stats,
            BlockKind::OdDecode(OdDecodeData {
                audio_file: Mutex::new(audio_file),
                alias_start,
                alias_channel,
                decode_type,
                data_available: AtomicBool::new(data_available),
                format: Mutex::new(None),
                start: AtomicU64::new(0),
                clip_offset: AtomicU64::new(0),
            }),
        ))
    }

    /// Decodes this block's range and writes it as a simple block.
    ///
    /// Returns the decoder's status; a failed write returns -1 and leaves
    /// the block undecoded.
    pub fn write_od_decode_block_file(&self, decoder: &mut dyn FileDecoder) -> i32 {
        let Some(od) = self.as_od_decode() else {
            return -1;
        };

        let (status, mut samples) = decoder.decode(od.alias_start, self.len, od.alias_channel);
        if status < 0 {
            warn!(
                path = ?decoder.file_name(),
                status,
                "Decode failure"
            );
            return status;
        }
        samples.resize(self.len);

        let _guard = self.read_lock.lock();
        let summary = self.summarize(&samples);
        if self.write_au(&summary.data, &samples).is_err() {
            return -1;
        }
        *od.format.lock() = Some(samples.format());
        od.data_available.store(true, Ordering::Release);
        debug!(block = %bare_name(&self.file_name()), "Decoded block");
        status
    }

    pub fn change_audio_file(&self, new_file: PathBuf) {
        if let Some(od) = self.as_od_decode() {
            *od.audio_file.lock() = new_file;
        }
    }

    pub(super) fn read_od_decode_data(
        &self,
        od: &OdDecodeData,
        dst: &mut SampleBuffer,
        start: usize,
        len: usize,
        may_throw: bool,
    ) -> Result<usize> {
        if !od.is_data_available() {
            if may_throw {
                return Err(StorageError::NotYetAvailable);
            }
            clear_samples(dst, 0, len);
            return Ok(0);
        }
        let _guard = self.read_lock.lock();
        self.read_au_data(dst, start, len, may_throw)
    }

    pub(super) fn copy_od_decode(&self, od: &OdDecodeData, new_file: PathBuf) -> BlockFilePtr {
        let stats = *self.stats.read();
        if od.is_data_available() {
            return BlockFile::from_existing_simple(self.ctx.clone(), new_file, self.len, stats);
        }
        BlockFile::from_existing_od_decode(
            self.ctx.clone(),
            new_file,
            od.audio_file_name(),
            od.alias_start,
            self.len,
            od.alias_channel,
            od.decode_type,
            stats,
            false,
        )
    }

    pub(super) fn save_od_decode_xml(&self, od: &OdDecodeData, w: &mut XmlWriter) {
        let _guard = self.read_lock.lock();
        if od.is_data_available() {
            self.save_simple_xml(w);
            return;
        }

        w.start_tag("oddecodeblockfile");
        w.write_attr("summaryfile", bare_name(&self.file_name()));
        w.write_attr("audiofile", od.audio_file_name().as_path());
        w.write_attr("aliasstart", od.alias_start);
        w.write_attr("aliaslen", self.len);
        w.write_attr("aliaschannel", od.alias_channel);
        w.write_attr("decodetype", od.decode_type);
        w.end_tag("oddecodeblockfile");
    }

    pub(super) fn od_decode_from_xml(
        loader: &dyn LoadContext,
        attrs: &Attributes,
    ) -> Option<BlockFilePtr> {
        let parsed = AliasAttrs::parse(loader, attrs, "audiofile");
        let decode_type = attr(attrs, "decodetype")
            .and_then(parse_int)
            .filter(|n| *n >= 0)
            .unwrap_or(0);
        Some(BlockFile::from_existing_od_decode(
            loader.context().clone(),
            parsed.summary_file?,
            parsed.aliased,
            parsed.start,
            parsed.len,
            parsed.channel,
            decode_type as u32,
            MinMaxRms::default(),
            false,
        ))
    }
}
