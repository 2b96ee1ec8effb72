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
//! Blocks: the immutable unit of audio storage.
//!
//! Every block owns at most one file in the project's data directory. Simple
//! blocks keep samples and summary together in an `.au` container; alias
//! blocks keep only a summary (`.auf`) and read their audio from an external
//! file; silent blocks own nothing. The on-demand variants start without
//! their summary or samples and are completed by background tasks.
//!
//! Blocks are shared as [`BlockFilePtr`]. Dropping the last reference deletes
//! the block's file unless the block is locked.
use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard, RwLock};
use tracing::{debug, warn};

use crate::context::StorageContext;
use crate::error::{FileCause, Result, StorageError};
use crate::format::{clear_samples, DitherType, SampleBuffer, SampleFormat};
use crate::summary::{read_frame, read_window, MinMaxRms, SummaryInfo, HEADER_TAG};
use crate::xml::{Attributes, XmlWriter};

mod alias;
mod au;
mod od_alias;
mod od_decode;
mod silent;
mod simple;


pub use self::alias::AliasData;
pub use self::od_alias::{OdAliasData, SummaryState};
pub use self::od_decode::OdDecodeData;
use self::simple::SimpleData;

pub type BlockFilePtr = Arc<BlockFile>;

/// What a block needs from whoever is loading it from a document.
pub trait LoadContext {
    fn project_data_dir(&self) -> PathBuf;

    /// Resolves a bare file name to its place on disk. With `check`, fails
    /// when a file with that base name is already on disk.
    fn assign_file(&self, value: &str, check: bool) -> Option<PathBuf>;

    fn context(&self) -> &Arc<StorageContext>;
}

pub(crate) enum BlockKind {
    Simple(SimpleData),
    PcmAlias(AliasData),
    Silent,
    OdPcmAlias(OdAliasData),
    OdDecode(OdDecodeData),
}

pub struct BlockFile {
    ctx: Arc<StorageContext>,
    file_name: Mutex<PathBuf>,
    len: usize,
    info: SummaryInfo,
    stats: RwLock<MinMaxRms>,
    lock_count: AtomicUsize,
    silent_log: AtomicBool,
    read_lock: Mutex<()>,
    kind: BlockKind,
}

impl BlockFile {
    fn with_kind(
        ctx: Arc<StorageContext>,
        file_name: PathBuf,
        len: usize,
        stats: MinMaxRms,
        kind: BlockKind,
    ) -> Self {
        BlockFile {
            ctx,
            file_name: Mutex::new(file_name),
            len,
            info: SummaryInfo::new(len),
            stats: RwLock::new(stats),
            lock_count: AtomicUsize::new(0),
            silent_log: AtomicBool::new(false),
            read_lock: Mutex::new(()),
            kind,
        }
    }

    pub fn context(&self) -> &Arc<StorageContext> {
        &self.ctx
    }

    pub fn file_name(&self) -> PathBuf {
        self.file_name.lock().clone()
    }

    pub fn set_file_name(&self, name: PathBuf) {
        *self.file_name.lock() = name;
    }

    /// The file name without directory or extension, as used by the
    /// directory manager to identify blocks.
    pub fn base_name(&self) -> Option<String> {
        self.file_name
            .lock()
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn summary_info(&self) -> &SummaryInfo {
        &self.info
    }

    /// Short name of the block's variant, matching its document tag.
    pub fn kind_name(&self) -> &'static str {
        match self.kind {
            BlockKind::Simple(_) => "simpleblockfile",
            BlockKind::PcmAlias(_) => "pcmaliasblockfile",
            BlockKind::Silent => "silentblockfile",
            BlockKind::OdPcmAlias(_) => "odpcmaliasblockfile",
            BlockKind::OdDecode(_) => "oddecodeblockfile",
        }
    }

    pub fn is_alias(&self) -> bool {
        matches!(self.kind, BlockKind::PcmAlias(_) | BlockKind::OdPcmAlias(_))
    }

    pub fn is_silent(&self) -> bool {
        matches!(self.kind, BlockKind::Silent)
    }

    pub fn is_summary_available(&self) -> bool {
        match &self.kind {
            BlockKind::OdPcmAlias(od) => od.state() == SummaryState::Available,
            BlockKind::OdDecode(od) => od.is_data_available(),
            _ => true,
        }
    }

    pub fn is_data_available(&self) -> bool {
        match &self.kind {
            BlockKind::OdDecode(od) => od.is_data_available(),
            _ => true,
        }
    }

    pub fn is_summary_being_computed(&self) -> bool {
        match &self.kind {
            BlockKind::OdPcmAlias(od) => od.state() == SummaryState::Computing,
            _ => false,
        }
    }

    pub fn as_alias(&self) -> Option<&AliasData> {
        match &self.kind {
            BlockKind::PcmAlias(alias) => Some(alias),
            BlockKind::OdPcmAlias(od) => Some(&od.alias),
            _ => None,
        }
    }

    pub fn as_od_alias(&self) -> Option<&OdAliasData> {
        match &self.kind {
            BlockKind::OdPcmAlias(od) => Some(od),
            _ => None,
        }
    }

    pub fn as_od_decode(&self) -> Option<&OdDecodeData> {
        match &self.kind {
            BlockKind::OdDecode(od) => Some(od),
            _ => None,
        }
    }

    /// Position of an on-demand block within its track, in samples.
    pub fn global_start(&self) -> Option<u64> {
        match &self.kind {
            BlockKind::OdPcmAlias(od) => Some(od.clip_offset() + od.start()),
            BlockKind::OdDecode(od) => Some(od.clip_offset() + od.start()),
            _ => None,
        }
    }

    pub fn global_end(&self) -> Option<u64> {
        self.global_start().map(|start| start + self.len as u64)
    }

    /// Pins the block's file so dropping the block leaves it on disk.
    ///
    /// An on-demand alias block only pins once its summary exists and it has
    /// been saved, since before that there is nothing on disk worth keeping.
    pub fn lock(&self) {
        if let BlockKind::OdPcmAlias(od) = &self.kind {
            if !(self.is_summary_available() && od.has_been_saved()) {
                return;
            }
        }
        self.lock_count.fetch_add(1, Ordering::AcqRel);
    }

    /// The unbalanced lock taken when a project closes.
    pub fn close_lock(&self) {
        match &self.kind {
            BlockKind::OdPcmAlias(od) => {
                if od.has_been_saved() {
                    self.lock_count.fetch_add(1, Ordering::AcqRel);
                }
            }
            _ => self.lock(),
        }
    }

    pub fn unlock(&self) {
        if let BlockKind::OdPcmAlias(_) = &self.kind {
            if !(self.is_summary_available() && self.is_locked()) {
                return;
            }
        }
        let _ = self
            .lock_count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                Some(n.saturating_sub(1))
            });
    }

    pub fn is_locked(&self) -> bool {
        self.lock_count.load(Ordering::Acquire) > 0
    }

    /// Stops repeated warnings about this block's own file.
    pub fn silence_log(&self) {
        self.silent_log.store(true, Ordering::Release);
    }

    pub(crate) fn log_is_silenced(&self) -> bool {
        self.silent_log.load(Ordering::Acquire)
    }

    /// Holds off renames of the block or its source while the guard lives.
    pub fn lock_read(&self) -> MutexGuard<'_, ()> {
        self.read_lock.lock()
    }

    /// Reads `len` samples starting at `start` into the front of `dst`,
    /// converting to the buffer's format.
    ///
    /// A short read is an error when `may_throw` is set, leaving the samples
    /// that were read in place. Otherwise the rest of the range is zeroed and
    /// the number of samples actually read is returned.
    pub fn read_data(
        &self,
        dst: &mut SampleBuffer,
        start: usize,
        len: usize,
        may_throw: bool,
    ) -> Result<usize> {
        let len = len.min(dst.len());
        match &self.kind {
            BlockKind::Simple(simple) => self.read_simple_data(simple, dst, start, len, may_throw),
            BlockKind::PcmAlias(alias) => self.read_alias_data(alias, dst, start, len, may_throw),
            BlockKind::Silent => {
                clear_samples(dst, 0, len);
                Ok(len)
            }
            BlockKind::OdPcmAlias(od) => {
                let _guard = self.read_lock.lock();
                self.read_alias_data(&od.alias, dst, start, len, may_throw)
            }
            BlockKind::OdDecode(od) => self.read_od_decode_data(od, dst, start, len, may_throw),
        }
    }

    /// Whole-block statistics, computed when the summary was.
    pub fn min_max_rms(&self, may_throw: bool) -> Result<MinMaxRms> {
        if !self.is_summary_available() {
            return self.not_yet_available(may_throw);
        }
        Ok(*self.stats.read())
    }

    /// Statistics of a region, computed by rescanning its samples.
    pub fn min_max_rms_region(
        &self,
        start: usize,
        len: usize,
        may_throw: bool,
    ) -> Result<MinMaxRms> {
        if !self.is_summary_available() {
            return self.not_yet_available(may_throw);
        }
        let mut samples = SampleBuffer::new(SampleFormat::Float, len);
        self.read_data(&mut samples, start, len, may_throw)?;
        Ok(MinMaxRms::of_samples(&samples.into_f32()))
    }

    fn not_yet_available(&self, may_throw: bool) -> Result<MinMaxRms> {
        if may_throw {
            Err(StorageError::NotYetAvailable)
        } else {
            Ok(MinMaxRms::placeholder())
        }
    }

    pub(crate) fn set_stats(&self, stats: MinMaxRms) {
        *self.stats.write() = stats;
    }

    /// Copies frames of the 256-sample summary level into `out`. Returns
    /// false, with zeroes in `out`, if the summary could not be read.
    pub fn read_256(&self, out: &mut [MinMaxRms], start: usize, len: usize) -> bool {
        let (offset, frames) = (self.info.offset256, self.info.frames256);
        self.read_level(out, offset, frames, start, len)
    }

    /// Copies frames of the 64K-sample summary level into `out`.
    pub fn read_64k(&self, out: &mut [MinMaxRms], start: usize, len: usize) -> bool {
        let (offset, frames) = (self.info.offset64k, self.info.frames64k);
        self.read_level(out, offset, frames, start, len)
    }

    fn read_level(
        &self,
        out: &mut [MinMaxRms],
        offset: usize,
        frames: usize,
        start: usize,
        len: usize,
    ) -> bool {
        if !self.is_summary_available() {
            out.iter_mut()
                .take(len)
                .for_each(|frame| *frame = MinMaxRms::default());
            return false;
        }
        let (summary, ok) = self.read_summary();
        read_window(&summary, &self.info, offset, frames, start, len, out);
        ok
    }

    /// The whole summary buffer, or zeroes and false if it is unavailable.
    pub fn read_summary(&self) -> (Vec<u8>, bool) {
        match &self.kind {
            BlockKind::Simple(simple) => self.read_simple_summary(Some(simple)),
            BlockKind::PcmAlias(_) => self.read_alias_summary(),
            BlockKind::Silent => (vec![0; self.info.total_summary_bytes], true),
            BlockKind::OdPcmAlias(_) => {
                if self.is_summary_available() {
                    self.read_alias_summary()
                } else {
                    (vec![0; self.info.total_summary_bytes], false)
                }
            }
            BlockKind::OdDecode(od) => {
                if od.is_data_available() {
                    self.read_simple_summary(None)
                } else {
                    (vec![0; self.info.total_summary_bytes], false)
                }
            }
        }
    }

    /// A new block with the same content, owning `new_file`. Performs no
    /// I/O; callers copy the file itself when one exists.
    pub fn copy(&self, new_file: PathBuf) -> BlockFilePtr {
        match &self.kind {
            BlockKind::Simple(_) => self.copy_simple(new_file),
            BlockKind::PcmAlias(alias) => self.copy_alias(alias, new_file),
            BlockKind::Silent => self.copy_silent(),
            BlockKind::OdPcmAlias(od) => self.copy_od_alias(od, new_file),
            BlockKind::OdDecode(od) => self.copy_od_decode(od, new_file),
        }
    }

    pub fn save_xml(&self, w: &mut XmlWriter) {
        match &self.kind {
            BlockKind::Simple(_) => self.save_simple_xml(w),
            BlockKind::PcmAlias(alias) => self.save_alias_xml(alias, w),
            BlockKind::Silent => self.save_silent_xml(w),
            BlockKind::OdPcmAlias(od) => self.save_od_alias_xml(od, w),
            BlockKind::OdDecode(od) => self.save_od_decode_xml(od, w),
        }
    }

    /// Rebuilds a missing file with whatever content can still be produced.
    pub fn recover(&self) -> Result<()> {
        match &self.kind {
            BlockKind::Simple(_) => self.recover_simple(),
            BlockKind::PcmAlias(_) => self.write_alias_summary(false),
            BlockKind::Silent => Ok(()),
            BlockKind::OdPcmAlias(_) => {
                if self.is_summary_available() {
                    self.write_alias_summary(false)
                } else {
                    Ok(())
                }
            }
            BlockKind::OdDecode(od) => {
                if od.is_data_available() {
                    self.recover_simple()
                } else {
                    Ok(())
                }
            }
        }
    }

    /// Bytes this block occupies on disk.
    pub fn space_usage(&self) -> u64 {
        match &self.kind {
            BlockKind::Simple(simple) => self.simple_space_usage(simple),
            BlockKind::PcmAlias(_) => file_size(&self.file_name()),
            BlockKind::Silent => 0,
            BlockKind::OdPcmAlias(_) => {
                if self.is_summary_available() {
                    file_size(&self.file_name())
                } else {
                    0
                }
            }
            BlockKind::OdDecode(od) => {
                if od.is_data_available() {
                    self.au_space_usage(&od.format)
                } else {
                    0
                }
            }
        }
    }

    /// Whether this block is holding samples that are not on disk yet.
    pub fn needs_write_cache_to_disk(&self) -> bool {
        match &self.kind {
            BlockKind::Simple(simple) => simple.needs_write(),
            _ => false,
        }
    }

    pub fn write_cache_to_disk(&self) -> Result<()> {
        match &self.kind {
            BlockKind::Simple(simple) => self.flush_simple_cache(simple),
            _ => Ok(()),
        }
    }

    pub fn fill_cache(&self) {
        if let BlockKind::Simple(simple) = &self.kind {
            self.fill_simple_cache(simple);
        }
    }

    /// Zeroes the tail of a short read, or fails it.
    fn finish_read(
        &self,
        dst: &mut SampleBuffer,
        read: usize,
        len: usize,
        may_throw: bool,
        path: &Path,
    ) -> Result<usize> {
        if read < len {
            if may_throw {
                return Err(StorageError::file(FileCause::Read, path));
            }
            clear_samples(dst, read, len - read);
        }
        Ok(read)
    }
}

/// Builds a block from its document element. Returns `None` for unknown
/// tags and for elements missing what the block cannot exist without.
pub fn build_from_xml(
    loader: &dyn LoadContext,
    tag: &str,
    attrs: &Attributes,
) -> Option<BlockFilePtr> {
    match tag {
        "simpleblockfile" => BlockFile::simple_from_xml(loader, attrs),
        "pcmaliasblockfile" => BlockFile::alias_from_xml(loader, attrs),
        "silentblockfile" => BlockFile::silent_from_xml(loader, attrs),
        "odpcmaliasblockfile" => BlockFile::od_alias_from_xml(loader, attrs),
        "oddecodeblockfile" => BlockFile::od_decode_from_xml(loader, attrs),
        _ => None,
    }
}

/// What can be learned about a block's file without its document record.
#[derive(Debug, Clone, PartialEq)]
pub struct FileReport {
    pub path: PathBuf,
    /// Samples stored, for data files.
    pub len: Option<usize>,
    pub format: Option<SampleFormat>,
    /// Whole-file statistics; for summary files these are rolled up from
    /// the coarse summary level.
    pub stats: MinMaxRms,
}

/// Reads an `.au` data file or an `.auf` summary file on its own.
pub fn inspect_file(path: &Path) -> Result<FileReport> {
    let is_summary = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("auf"));
    if is_summary {
        return inspect_summary(path);
    }

    let (format, len) =
        au::describe(path).map_err(|_| StorageError::file(FileCause::Read, path))?;
    let mut samples = SampleBuffer::new(SampleFormat::Float, len);
    let read = au::read_samples(path, 0, len, &mut samples, DitherType::None)
        .map_err(|_| StorageError::file(FileCause::Read, path))?;
    Ok(FileReport {
        path: path.to_path_buf(),
        len: Some(read),
        format: Some(format),
        stats: MinMaxRms::of_samples(&samples.to_f32(0, read)),
    })
}

fn inspect_summary(path: &Path) -> Result<FileReport> {
    let data = std::fs::read(path).map_err(|_| StorageError::file(FileCause::Read, path))?;
    let tag_len = HEADER_TAG.len();
    if data.len() < tag_len || &data[..tag_len] != HEADER_TAG {
        return Err(StorageError::file(FileCause::Read, path));
    }

    // The 64K level is followed by up to 256 frames per 64K frame.
    let info = SummaryInfo::new(0);
    let frames = ((data.len() - tag_len) / info.bytes_per_frame).div_ceil(257);
    let mut stats = MinMaxRms::new(f32::MAX, -f32::MAX, 0.0);
    let mut sumsq = 0.0f64;
    for index in 0..frames {
        let frame = read_frame(&data, tag_len, index);
        stats.min = stats.min.min(frame.min);
        stats.max = stats.max.max(frame.max);
        sumsq += f64::from(frame.rms) * f64::from(frame.rms);
    }
    if frames == 0 {
        stats = MinMaxRms::default();
    } else {
        stats.rms = (sumsq / frames as f64).sqrt() as f32;
    }
    Ok(FileReport {
        path: path.to_path_buf(),
        len: None,
        format: None,
        stats,
    })
}

impl fmt::Debug for BlockFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockFile")
            .field("kind", &self.kind_name())
            .field("file_name", &self.file_name())
            .field("len", &self.len)
            .field("locked", &self.is_locked())
            .finish()
    }
}

impl Drop for BlockFile {
    fn drop(&mut self) {
        if !self.is_locked() {
            let name = self.file_name.get_mut();
            if !name.as_os_str().is_empty() {
                match std::fs::remove_file(&*name) {
                    Ok(()) => debug!(path = ?name, "Removed block file"),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => warn!(path = ?name, err = %e, "Unable to remove block file"),
                }
            }
        }
        self.ctx.note_destruction();
    }
}

/// `base` with `extension` appended, keeping any dots already in the name.
pub(crate) fn with_extension(base: &Path, extension: &str) -> PathBuf {
    let mut name = OsString::from(base.as_os_str());
    name.push(".");
    name.push(extension);
    PathBuf::from(name)
}

/// The bare file name of `path`, as written into documents.
pub(crate) fn bare_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn file_size(path: &Path) -> u64 {
    std::fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}

/// Parses a float attribute the way documents store them.
pub(crate) fn parse_float(value: &str) -> Option<f32> {
    if !crate::xml::checker::is_good_string(value) {
        return None;
    }
    value.trim().parse::<f64>().ok().map(|v| v as f32)
}

/// Resolves a block's own file name from a document, rejecting names that
/// could not live in the data directory.
pub(crate) fn assign_from_xml(loader: &dyn LoadContext, value: &str) -> Option<PathBuf> {
    use crate::xml::checker::{is_good_file_string, PLATFORM_MAX_PATH};

    let dir_len = loader.project_data_dir().as_os_str().len();
    if !is_good_file_string(value) || value.len() + 1 + dir_len > PLATFORM_MAX_PATH {
        return None;
    }
    loader.assign_file(value, false)
}

/// An `int` attribute: a good string that fits in 32 bits.
pub(crate) fn parse_int(value: &str) -> Option<i64> {
    if !crate::xml::checker::is_good_int(value) {
        return None;
    }
    value.parse::<i32>().ok().map(i64::from)
}

pub(crate) fn parse_int64(value: &str) -> Option<i64> {
    if !crate::xml::checker::is_good_int64(value) {
        return None;
    }
    value.parse::<i64>().ok()
}
