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
//! The repository of live blocks for one project.
//!
//! A [`DirManager`] hands out unique file names for new blocks, remembers
//! every block it made or loaded (weakly, so dropping the last reference
//! still deletes the file), moves the whole set when the project is saved
//! somewhere new, and checks the project directory for damage.
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, info, warn};

use crate::blockfile::{build_from_xml, with_extension, BlockFile, BlockFilePtr, LoadContext};
use crate::context::StorageContext;
use crate::error::{FileCause, Result, StorageError};
use crate::format::{SampleBuffer, SampleFormat};
use crate::sequence::SharedBlockArray;
use crate::xml::checker::is_good_file_string;
use crate::xml::{Attributes, XmlTagHandler};

use self::balance::{block_subdir, BalanceInfo};

mod balance;
mod fsck;
mod project;


pub use self::fsck::{FsckStatus, RepairPrompt, ScriptedPrompt};
pub use self::project::ProjectFile;

/// Remove the directory passed to [`DirManager::clean_dir`] as well.
pub const CLEAN_TOP_DIR_TOO: u32 = 1;
/// Only remove directories that are already empty.
pub const CLEAN_DIRS_ONLY_IF_EMPTY: u32 = 2;
pub const CLEAN_FILES: u32 = 4;
pub const CLEAN_DIRS: u32 = 8;

pub struct DirManager {
    ctx: Arc<StorageContext>,
    temp_root: PathBuf,
    local_temp: PathBuf,

    project_path: PathBuf,
    project_name: String,
    project_full: PathBuf,

    blocks: BTreeMap<String, Weak<BlockFile>>,
    balance: BalanceInfo,
    last_destruction_count: u64,
    aliased_files: BTreeSet<PathBuf>,
    rng: StdRng,

    loading_target: Option<(SharedBlockArray, usize)>,
    loading_format: SampleFormat,
    loading_block_length: usize,
    max_samples: usize,

    dont_delete_temp_files: bool,
}

impl DirManager {
    /// Creates a manager whose blocks live in a fresh temporary project
    /// directory until [`DirManager::set_project`] is called.
    pub fn new(ctx: Arc<StorageContext>) -> Result<Self> {
        let temp_root = ctx.config().temp_dir();
        fs::create_dir_all(&temp_root)
            .map_err(|_| StorageError::file(FileCause::Write, &temp_root))?;

        let number = ctx.register_dir_manager();
        let local_temp = temp_root.join(format!("project{}", number));
        debug!(dir = ?local_temp, "Created directory manager");

        let config = ctx.config();
        let balance = BalanceInfo::new(config.files_per_dir());
        let max_samples = config.max_block_samples();
        let last_destruction_count = ctx.destruction_count();

        Ok(DirManager {
            temp_root,
            local_temp,
            project_path: PathBuf::new(),
            project_name: String::new(),
            project_full: PathBuf::new(),
            blocks: BTreeMap::new(),
            balance,
            last_destruction_count,
            aliased_files: BTreeSet::new(),
            rng: StdRng::from_entropy(),
            loading_target: None,
            loading_format: SampleFormat::Float,
            loading_block_length: 0,
            max_samples,
            dont_delete_temp_files: false,
            ctx,
        })
    }

    pub fn context(&self) -> &Arc<StorageContext> {
        &self.ctx
    }

    /// Where blocks are stored right now: the project directory once one is
    /// set, the temporary directory before that.
    pub fn data_files_dir(&self) -> PathBuf {
        if self.project_full.as_os_str().is_empty() {
            self.local_temp.clone()
        } else {
            self.project_full.clone()
        }
    }

    /// The project's data directory, empty until a project is set.
    pub fn project_data_dir(&self) -> &Path {
        &self.project_full
    }

    pub fn project_path(&self) -> &Path {
        &self.project_path
    }

    pub fn project_name(&self) -> &str {
        &self.project_name
    }

    pub fn temp_root(&self) -> &Path {
        &self.temp_root
    }

    /// Makes `<path>/<name>` the project directory, moving every live block
    /// into it.
    ///
    /// Locked blocks belong to a saved version of the project somewhere else
    /// and are copied rather than moved. Nothing changes if any block fails
    /// to move.
    pub fn set_project(&mut self, path: &Path, name: &str, create: bool) -> bool {
        if path.as_os_str().is_empty() || !is_good_file_string(name) || !path.is_dir() {
            return false;
        }
        let full = path.join(name);

        let mut created = false;
        if create {
            if !full.is_dir() {
                if let Err(e) = fs::create_dir(&full) {
                    warn!(dir = ?full, err = %e, "Unable to create project directory");
                    return false;
                }
                created = true;
            }
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                let _ = fs::set_permissions(&full, fs::Permissions::from_mode(0o775));
            }
        } else if !full.is_dir() {
            return false;
        }

        self.reconcile();
        let old_location = self.data_files_dir();
        let saved = (
            std::mem::replace(&mut self.project_path, path.to_path_buf()),
            std::mem::replace(&mut self.project_name, name.to_string()),
            std::mem::replace(&mut self.project_full, full.clone()),
        );

        let live = self.live_blocks();
        // Readers and background writers stay out until every block has
        // its new name and the old files are gone.
        let _readers: Vec<_> = live.iter().map(|block| block.lock_read()).collect();
        let mut moves = Vec::with_capacity(live.len());
        for block in &live {
            match self.copy_to_new_project_directory(block) {
                Ok(new_path) => moves.push(new_path),
                Err(e) => {
                    warn!(err = %e, "Unable to move block into project; rolling back");
                    for (block, new_path) in live.iter().zip(&moves) {
                        if let Some(new_path) = new_path {
                            if *new_path != block.file_name() {
                                let _ = fs::remove_file(new_path);
                            }
                        }
                    }
                    (self.project_path, self.project_name, self.project_full) = saved;
                    if created {
                        self.clean_dir(&full, "", "", CLEAN_TOP_DIR_TOO | CLEAN_FILES | CLEAN_DIRS);
                    }
                    return false;
                }
            }
        }

        let mut moving = true;
        for (block, new_path) in live.iter().zip(moves) {
            let Some(new_path) = new_path else {
                continue;
            };
            let old_path = block.file_name();
            if old_path == new_path {
                continue;
            }
            block.set_file_name(new_path);
            if block.is_locked() {
                moving = false;
            } else if old_path.exists() {
                if let Err(e) = fs::remove_file(&old_path) {
                    warn!(path = ?old_path, err = %e, "Unable to remove moved block file");
                }
            }
        }

        if moving && !live.is_empty() && old_location == self.local_temp {
            let temp = self.local_temp.clone();
            self.clean_dir(&temp, "", "", CLEAN_TOP_DIR_TOO | CLEAN_FILES | CLEAN_DIRS);
        }
        info!(dir = ?full, blocks = live.len(), "Set project directory");
        true
    }

    /// Copies a block's file into the current data directory, returning the
    /// path it will have there. Blocks without a file return `None`; blocks
    /// whose file does not exist yet only get the new name.
    pub fn copy_to_new_project_directory(&self, block: &BlockFile) -> Result<Option<PathBuf>> {
        let old_path = block.file_name();
        let Some(file_name) = old_path.file_name().and_then(|name| name.to_str()) else {
            return Ok(None);
        };
        let new_path = self
            .assign_file(file_name, false)
            .ok_or_else(|| StorageError::file(FileCause::Write, &old_path))?;

        if new_path != old_path && block.is_summary_available() && old_path.exists() {
            fs::copy(&old_path, &new_path).map_err(|e| {
                warn!(from = ?old_path, to = ?new_path, err = %e, "Unable to copy block file");
                StorageError::file(FileCause::Write, &new_path)
            })?;
        }
        Ok(Some(new_path))
    }

    pub fn new_simple_block_file(
        &mut self,
        samples: &SampleBuffer,
        allow_deferred_write: bool,
    ) -> Result<BlockFilePtr> {
        let (name, base) = self.make_block_file_name()?;
        match BlockFile::new_simple(self.ctx.clone(), &base, samples, allow_deferred_write) {
            Ok(block) => {
                self.register(name, &block);
                Ok(block)
            }
            Err(e) => {
                self.release_name(&name);
                Err(e)
            }
        }
    }

    /// Fails only if the aliased audio cannot be read.
    pub fn new_alias_block_file(
        &mut self,
        aliased_file: &Path,
        alias_start: u64,
        alias_len: usize,
        alias_channel: usize,
    ) -> Result<BlockFilePtr> {
        let (name, base) = self.make_block_file_name()?;
        match BlockFile::new_alias(
            self.ctx.clone(),
            &base,
            aliased_file,
            alias_start,
            alias_len,
            alias_channel,
        ) {
            Ok(block) => {
                self.register(name, &block);
                self.aliased_files.insert(aliased_file.to_path_buf());
                Ok(block)
            }
            Err(e) => {
                self.release_name(&name);
                Err(e)
            }
        }
    }

    pub fn new_od_alias_block_file(
        &mut self,
        aliased_file: &Path,
        alias_start: u64,
        alias_len: usize,
        alias_channel: usize,
    ) -> Result<BlockFilePtr> {
        let (name, base) = self.make_block_file_name()?;
        let block = BlockFile::new_od_alias(
            self.ctx.clone(),
            &base,
            aliased_file,
            alias_start,
            alias_len,
            alias_channel,
        );
        self.register(name, &block);
        self.aliased_files.insert(aliased_file.to_path_buf());
        Ok(block)
    }

    pub fn new_od_decode_block_file(
        &mut self,
        audio_file: &Path,
        alias_start: u64,
        alias_len: usize,
        alias_channel: usize,
        decode_type: u32,
    ) -> Result<BlockFilePtr> {
        let (name, base) = self.make_block_file_name()?;
        let block = BlockFile::new_od_decode(
            self.ctx.clone(),
            &base,
            audio_file,
            alias_start,
            alias_len,
            alias_channel,
            decode_type,
        );
        self.register(name, &block);
        self.aliased_files.insert(audio_file.to_path_buf());
        Ok(block)
    }

    /// Whether this exact block is the one registered under its name.
    pub fn contains_block_file(&self, block: &BlockFilePtr) -> bool {
        block
            .base_name()
            .and_then(|name| self.blocks.get(&name))
            .and_then(Weak::upgrade)
            .is_some_and(|live| Arc::ptr_eq(&live, block))
    }

    pub fn contains_block_name(&self, name: &str) -> bool {
        self.blocks
            .get(name)
            .and_then(Weak::upgrade)
            .is_some()
    }

    /// Returns a block for a new owner. An unlocked block is shared as is; a
    /// locked one belongs to a saved project and gets its own copy.
    pub fn copy_block_file(&mut self, block: &BlockFilePtr) -> Result<BlockFilePtr> {
        if !block.is_locked() {
            return Ok(block.clone());
        }

        let old_path = block.file_name();
        let Some(extension) = old_path.extension().and_then(|ext| ext.to_str()) else {
            return Ok(block.copy(PathBuf::new()));
        };
        let extension = extension.to_string();

        let (name, base) = self.make_block_file_name()?;
        let new_path = with_extension(&base, &extension);
        if block.is_summary_available() && old_path.exists() {
            if let Err(e) = fs::copy(&old_path, &new_path) {
                warn!(from = ?old_path, to = ?new_path, err = %e, "Unable to copy block file");
                self.release_name(&name);
                return Err(StorageError::file(FileCause::Write, &new_path));
            }
        }

        let copied = block.copy(new_path);
        self.register(name, &copied);
        if let Some(alias) = copied.as_alias() {
            self.aliased_files.insert(alias.aliased_file_name());
        }
        Ok(copied)
    }

    /// Every block still alive, in name order.
    pub fn live_blocks(&self) -> Vec<BlockFilePtr> {
        self.blocks.values().filter_map(Weak::upgrade).collect()
    }

    pub fn num_block_files(&self) -> usize {
        self.blocks.values().filter(|block| block.strong_count() > 0).count()
    }

    /// Directs the next block element handled to `index` of `target`.
    pub fn set_loading_target(&mut self, target: SharedBlockArray, index: usize) {
        self.loading_target = Some((target, index));
    }

    pub fn clear_loading_target(&mut self) {
        self.loading_target = None;
    }

    pub fn set_loading_format(&mut self, format: SampleFormat) {
        self.loading_format = format;
    }

    pub fn loading_format(&self) -> SampleFormat {
        self.loading_format
    }

    pub fn set_loading_block_length(&mut self, len: usize) {
        self.loading_block_length = len;
    }

    pub fn loading_block_length(&self) -> usize {
        self.loading_block_length
    }

    /// Blocks longer than this are refused while loading.
    pub fn set_loading_max_samples(&mut self, max: usize) {
        self.max_samples = max;
    }

    /// Moves a file that blocks alias out of the way, so something else can
    /// be written under its name.
    ///
    /// The file is renamed to `<stem>-old<N>.<ext>` and every block reading
    /// from it is pointed at the new name. Returns false if the rename
    /// failed, in which case nothing changed.
    pub fn ensure_safe_filename(&mut self, path: &Path) -> Result<bool> {
        if !self.aliased_files.contains(path) {
            return Ok(true);
        }

        let renamed = old_file_name(path);
        fs::File::create(&renamed).map_err(|_| StorageError::file(FileCause::Write, &renamed))?;
        fs::remove_file(&renamed).map_err(|_| StorageError::file(FileCause::Write, &renamed))?;

        self.reconcile();
        let users: Vec<BlockFilePtr> = self
            .live_blocks()
            .into_iter()
            .filter(|block| reads_from(block, path))
            .collect();

        if !users.is_empty() {
            let _guards: Vec<_> = users.iter().map(|block| block.lock_read()).collect();
            if let Err(e) = fs::rename(path, &renamed) {
                warn!(from = ?path, to = ?renamed, err = %e, "Unable to rename aliased file");
                return Ok(false);
            }
            for block in &users {
                if block.is_alias() {
                    block.change_aliased_file_name(renamed.clone());
                } else {
                    block.change_audio_file(renamed.clone());
                }
            }
            info!(from = ?path, to = ?renamed, blocks = users.len(), "Renamed aliased file");
        }

        self.aliased_files.remove(path);
        self.aliased_files.insert(renamed);
        Ok(true)
    }

    /// Alias blocks whose source file has gone missing.
    pub fn find_missing_aliased_files(&mut self) -> Vec<BlockFilePtr> {
        self.reconcile();
        self.live_blocks()
            .into_iter()
            .filter(|block| {
                block.as_alias().is_some_and(|alias| {
                    let source = alias.aliased_file_name();
                    !source.as_os_str().is_empty() && !source.exists()
                })
            })
            .collect()
    }

    /// Alias blocks whose summary file should exist but does not.
    pub fn find_missing_aufs(&mut self) -> Vec<BlockFilePtr> {
        self.reconcile();
        self.live_blocks()
            .into_iter()
            .filter(|block| {
                block.is_alias() && block.is_summary_available() && !block.file_name().exists()
            })
            .collect()
    }

    /// Blocks owning samples whose data file should exist but does not.
    pub fn find_missing_aus(&mut self) -> Vec<BlockFilePtr> {
        self.reconcile();
        self.live_blocks()
            .into_iter()
            .filter(|block| {
                !block.is_alias()
                    && !block.is_silent()
                    && block.is_data_available()
                    && !block.needs_write_cache_to_disk()
                    && !block.file_name().exists()
            })
            .collect()
    }

    /// The block files among `all_files` that no live block owns.
    pub fn find_orphan_block_files(&self, all_files: &[PathBuf]) -> Vec<PathBuf> {
        all_files
            .iter()
            .filter(|path| {
                let is_block = path
                    .extension()
                    .and_then(|ext| ext.to_str())
                    .is_some_and(|ext| {
                        ext.eq_ignore_ascii_case("au") || ext.eq_ignore_ascii_case("auf")
                    });
                let owned = path
                    .file_stem()
                    .and_then(|stem| stem.to_str())
                    .is_some_and(|stem| self.contains_block_name(stem));
                is_block && !owned
            })
            .cloned()
            .collect()
    }

    /// Block files in the data directory that no live block owns.
    pub fn orphan_block_files(&mut self) -> Vec<PathBuf> {
        self.reconcile();
        self.find_orphan_block_files(&enumerate_files(&self.data_files_dir()))
    }

    /// Deletes block files in the data directory that no live block owns,
    /// returning how many were removed.
    pub fn remove_orphan_blockfiles(&mut self) -> usize {
        let orphans = self.orphan_block_files();
        let mut removed = 0;
        for orphan in orphans {
            match fs::remove_file(&orphan) {
                Ok(()) => removed += 1,
                Err(e) => warn!(path = ?orphan, err = %e, "Unable to remove orphan block file"),
            }
        }
        removed
    }

    /// Removes the files and directories under `path`.
    ///
    /// Only top-level subdirectories whose names match `dir_spec` and files
    /// matching `file_spec` are considered; an empty spec matches anything.
    /// Does nothing once [`DirManager::set_dont_delete_temp_files`] is set.
    pub fn clean_dir(&self, path: &Path, dir_spec: &str, file_spec: &str, flags: u32) {
        if self.dont_delete_temp_files {
            return;
        }

        let mut files = Vec::new();
        let mut dirs = Vec::new();
        collect_tree(path, dir_spec, file_spec, true, &mut files, &mut dirs);
        if flags & CLEAN_TOP_DIR_TOO != 0 && path.is_dir() {
            dirs.push(path.to_path_buf());
        }
        if files.is_empty() && dirs.is_empty() {
            return;
        }
        debug!(dir = ?path, files = files.len(), dirs = dirs.len(), "Cleaning directory");

        if flags & CLEAN_FILES != 0 {
            for file in &files {
                if let Err(e) = fs::remove_file(file) {
                    warn!(path = ?file, err = %e, "Unable to remove file");
                }
            }
        }
        if flags & CLEAN_DIRS != 0 {
            for dir in &dirs {
                let removed = if flags & CLEAN_DIRS_ONLY_IF_EMPTY != 0 {
                    fs::remove_dir(dir)
                } else {
                    fs::remove_dir_all(dir)
                };
                if let Err(e) = removed {
                    if flags & CLEAN_DIRS_ONLY_IF_EMPTY == 0
                        && e.kind() != io::ErrorKind::NotFound
                    {
                        warn!(path = ?dir, err = %e, "Unable to remove directory");
                    }
                }
            }
        }
    }

    /// Removes every temporary project directory under the temp root.
    pub fn clean_temp_dir(&self) {
        let root = self.temp_root.clone();
        self.clean_dir(&root, "project*", "", CLEAN_FILES | CLEAN_DIRS);
    }

    pub fn set_local_temp_dir(&mut self, path: impl Into<PathBuf>) {
        self.local_temp = path.into();
    }

    /// Leaves temporary files behind on drop, e.g. so a crashed session can
    /// be recovered.
    pub fn set_dont_delete_temp_files(&mut self) {
        self.dont_delete_temp_files = true;
    }

    /// Flushes blocks still holding unwritten samples.
    pub fn write_cache_to_disk(&mut self) -> Result<()> {
        self.reconcile();
        for block in self.live_blocks() {
            if block.needs_write_cache_to_disk() {
                block.write_cache_to_disk()?;
            }
        }
        Ok(())
    }

    /// Reads every block's file into memory when block caching is enabled.
    pub fn fill_blockfiles_cache(&mut self) {
        if !self.ctx.config().cache_block_files() {
            return;
        }
        self.reconcile();
        for block in self.live_blocks() {
            block.fill_cache();
        }
    }

    /// Free bytes on the volume holding the data directory.
    pub fn free_disk_space(&self) -> Option<u64> {
        let data_dir = self.data_files_dir();
        let existing = data_dir.ancestors().find(|dir| dir.is_dir())?;
        fs4::available_space(existing).ok()
    }

    /// Picks an unused name for a new block and returns it with the path,
    /// without extension, the block's file should use.
    fn make_block_file_name(&mut self) -> Result<(String, PathBuf)> {
        self.reconcile();
        loop {
            let (midkey, name) = self.balance.candidate(&mut self.rng);
            if self.blocks.contains_key(&name) {
                continue;
            }
            match self.probe_block_file(&name)? {
                Some(path) => {
                    self.balance.file_add(midkey);
                    return Ok((name, path));
                }
                // An orphan holds the name; count it so a directory full of
                // orphans still fills up.
                None => self.balance.file_add(midkey),
            }
        }
    }

    /// Creates the directory `name` lives in and checks no file on disk
    /// already uses the name. Fails if the directory is unusable.
    fn probe_block_file(&self, name: &str) -> Result<Option<PathBuf>> {
        let dir = self.block_file_dir(name);
        let entries = fs::read_dir(&dir).map_err(|_| StorageError::file(FileCause::Write, &dir))?;
        let prefix = format!("{}.", name);
        for entry in entries.flatten() {
            if entry.file_name().to_string_lossy().starts_with(&prefix) {
                warn!(path = ?entry.path(), "Found an orphan block file");
                return Ok(None);
            }
        }
        Ok(Some(dir.join(name)))
    }

    fn block_file_dir(&self, value: &str) -> PathBuf {
        let mut dir = self.data_files_dir();
        if let Some(subdir) = block_subdir(value) {
            dir.push(subdir);
        }
        if let Err(e) = fs::create_dir_all(&dir) {
            warn!(dir = ?dir, err = %e, "Unable to create block directory");
        }
        dir
    }

    fn register(&mut self, name: String, block: &BlockFilePtr) {
        self.blocks.insert(name, Arc::downgrade(block));
    }

    fn release_name(&mut self, name: &str) {
        let data_dir = self.data_files_dir();
        self.balance.info_del(name, &data_dir);
    }

    /// Forgets blocks that have been dropped and returns their slots, if any
    /// block anywhere has been dropped since the last call.
    fn reconcile(&mut self) {
        let count = self.ctx.destruction_count();
        if count == self.last_destruction_count {
            return;
        }
        self.last_destruction_count = count;

        let expired: Vec<String> = self
            .blocks
            .iter()
            .filter(|(_, block)| block.strong_count() == 0)
            .map(|(name, _)| name.clone())
            .collect();
        let data_dir = self.data_files_dir();
        for name in expired {
            self.blocks.remove(&name);
            self.balance.info_del(&name, &data_dir);
        }
    }
}

impl LoadContext for DirManager {
    fn project_data_dir(&self) -> PathBuf {
        self.project_full.clone()
    }

    fn assign_file(&self, value: &str, check: bool) -> Option<PathBuf> {
        if check {
            return self.probe_block_file(value).ok().flatten();
        }
        Some(self.block_file_dir(value).join(value))
    }

    fn context(&self) -> &Arc<StorageContext> {
        &self.ctx
    }
}

impl XmlTagHandler for DirManager {
    /// Builds the block described by a block-file element and stores it in
    /// the loading target. A block already live under the same name is
    /// reused instead.
    fn handle_xml_tag(&mut self, tag: &str, attrs: &Attributes) -> bool {
        let Some((target, index)) = self.loading_target.clone() else {
            return false;
        };

        let Some(block) = build_from_xml(&*self, tag, attrs) else {
            return false;
        };
        if block.is_silent() {
            return target.lock().store(index, block);
        }

        if block.len() > self.max_samples {
            warn!(
                block = ?block.file_name(),
                len = block.len(),
                max = self.max_samples,
                "Block is longer than allowed"
            );
            block.lock();
            return false;
        }

        let Some(name) = block.base_name() else {
            block.lock();
            return false;
        };

        self.reconcile();
        if let Some(live) = self.blocks.get(&name).and_then(Weak::upgrade) {
            // Locked so dropping the duplicate leaves the shared file alone.
            block.lock();
            return target.lock().store(index, live);
        }

        if let Some(alias) = block.as_alias() {
            self.aliased_files.insert(alias.aliased_file_name());
        } else if let Some(od) = block.as_od_decode() {
            self.aliased_files.insert(od.audio_file_name());
        }
        self.register(name.clone(), &block);
        self.balance.info_add(&name);
        let result = target.lock().store(index, block);
        result
    }
}

impl Drop for DirManager {
    fn drop(&mut self) {
        let remaining = self.ctx.unregister_dir_manager();
        if remaining == 0 {
            self.clean_temp_dir();
        } else if self.project_full.as_os_str().is_empty() {
            let temp = self.local_temp.clone();
            self.clean_dir(&temp, "", "", CLEAN_TOP_DIR_TOO | CLEAN_FILES | CLEAN_DIRS);
        }
    }
}

/// Whether `block` still needs to read audio from `path`.
fn reads_from(block: &BlockFile, path: &Path) -> bool {
    if let Some(alias) = block.as_alias() {
        return alias.aliased_file_name() == path;
    }
    block
        .as_od_decode()
        .is_some_and(|od| !od.is_data_available() && od.audio_file_name() == path)
}

/// `<stem>-old<N>.<ext>` beside `path`, with the first free `N`.
fn old_file_name(path: &Path) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();
    let extension = path
        .extension()
        .map(|ext| format!(".{}", ext.to_string_lossy()))
        .unwrap_or_default();

    let mut n = 1;
    loop {
        let candidate = path.with_file_name(format!("{}-old{}{}", stem, n, extension));
        if !candidate.exists() {
            return candidate;
        }
        n += 1;
    }
}

/// Every file below `dir`, recursively.
pub(crate) fn enumerate_files(dir: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();
    let mut dirs = Vec::new();
    collect_tree(dir, "", "", true, &mut files, &mut dirs);
    files
}

/// Collects files and directories below `dir`, children before parents.
fn collect_tree(
    dir: &Path,
    dir_spec: &str,
    file_spec: &str,
    top: bool,
    files: &mut Vec<PathBuf>,
    dirs: &mut Vec<PathBuf>,
) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let Ok(file_type) = entry.file_type() else {
            continue;
        };
        let name = entry.file_name().to_string_lossy().into_owned();
        let path = entry.path();
        if file_type.is_dir() {
            if top && !matches_spec(&name, dir_spec) {
                continue;
            }
            collect_tree(&path, dir_spec, file_spec, false, files, dirs);
            dirs.push(path);
        } else if matches_spec(&name, file_spec) {
            files.push(path);
        }
    }
}

/// Shell-style matching with `*` and `?`. An empty pattern matches anything.
fn matches_spec(name: &str, spec: &str) -> bool {
    if spec.is_empty() {
        return true;
    }
    let name: Vec<char> = name.chars().collect();
    let spec: Vec<char> = spec.chars().collect();

    let (mut n, mut s) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;
    while n < name.len() {
        if s < spec.len() && (spec[s] == '?' || spec[s] == name[n]) {
            n += 1;
            s += 1;
        } else if s < spec.len() && spec[s] == '*' {
            backtrack = Some((s, n));
            s += 1;
        } else if let Some((star, matched)) = backtrack {
            s = star + 1;
            n = matched + 1;
            backtrack = Some((star, matched + 1));
        } else {
            return false;
        }
    }
    spec[s..].iter().all(|&c| c == '*')
}
