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
//! Spreading block files over a two-level directory tree.
//!
//! Names look like `e<TT><MM><FFF>` (hex) and live in `e<TT>/d<MM>/`. Each
//! mid-level directory takes a bounded number of files and each top-level
//! directory 256 mid-level directories; buckets move from the pool to the
//! full map as they fill and back again as blocks are deleted.
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use rand::Rng;

/// Mid-level directories per top-level directory.
const MIDS_PER_TOP: usize = 256;

/// Distinct file numbers in one mid-level directory.
const FILE_NUMBERS: u16 = 4096;

/// Mid-level directories opened at once when the pool runs dry.
const MIDS_PER_BATCH: usize = 32;

#[derive(Debug)]
pub(super) struct BalanceInfo {
    files_per_dir: usize,
    mid_pool: BTreeMap<u16, usize>,
    mid_full: BTreeMap<u16, usize>,
    top_pool: BTreeMap<u8, usize>,
    top_full: BTreeMap<u8, usize>,
}

impl BalanceInfo {
    pub(super) fn new(files_per_dir: usize) -> Self {
        BalanceInfo {
            files_per_dir: files_per_dir.max(1),
            mid_pool: BTreeMap::new(),
            mid_full: BTreeMap::new(),
            top_pool: (0..=u8::MAX).map(|top| (top, 0)).collect(),
            top_full: BTreeMap::new(),
        }
    }

    /// Picks a name for a new block, opening mid-level directories as
    /// needed. The caller checks the name is free and then records it with
    /// [`BalanceInfo::file_add`].
    pub(super) fn candidate<R: Rng>(&mut self, rng: &mut R) -> (u16, String) {
        loop {
            if let Some(&midkey) = self.mid_pool.keys().next() {
                let file = rng.gen_range(0..FILE_NUMBERS);
                return (midkey, block_name(midkey, file));
            }

            let Some(&top) = self.top_pool.keys().next() else {
                // Every directory is full; keep going with random placement.
                let midkey = u16::from_be_bytes([rng.gen(), rng.gen()]);
                let file = rng.gen_range(0..FILE_NUMBERS);
                return (midkey, block_name(midkey, file));
            };

            let mut opened = 0;
            for mid in 0..=u8::MAX {
                if self.mid_add(top, u16::from_be_bytes([top, mid])) {
                    opened += 1;
                    if opened >= MIDS_PER_BATCH {
                        break;
                    }
                }
            }
            if self.mid_pool.is_empty() {
                // The top level claimed room it did not have.
                self.top_pool.remove(&top);
                self.top_full.insert(top, MIDS_PER_TOP);
            }
        }
    }

    /// Opens a mid-level directory if it is not known yet.
    fn mid_add(&mut self, top: u8, midkey: u16) -> bool {
        if self.mid_pool.contains_key(&midkey) || self.mid_full.contains_key(&midkey) {
            return false;
        }
        self.mid_pool.insert(midkey, 0);

        if let Some(count) = self.top_full.get_mut(&top) {
            *count += 1;
            return true;
        }
        let count = self.top_pool.entry(top).or_insert(0);
        *count += 1;
        if *count >= MIDS_PER_TOP {
            let count = *count;
            self.top_pool.remove(&top);
            self.top_full.insert(top, count);
        }
        true
    }

    pub(super) fn file_add(&mut self, midkey: u16) {
        if let Some(count) = self.mid_full.get_mut(&midkey) {
            *count += 1;
            return;
        }
        let count = self.mid_pool.entry(midkey).or_insert(0);
        *count += 1;
        if *count >= self.files_per_dir {
            let count = *count;
            self.mid_pool.remove(&midkey);
            self.mid_full.insert(midkey, count);
        }
    }

    /// Counts a block whose name was chosen elsewhere, e.g. on load.
    pub(super) fn info_add(&mut self, name: &str) {
        if let Some((top, midkey)) = name_keys(name) {
            self.mid_add(top, midkey);
            self.file_add(midkey);
        }
    }

    /// Returns a deleted block's slot, removing directories that empty out.
    pub(super) fn info_del(&mut self, name: &str, data_dir: &Path) {
        let Some((top, midkey)) = name_keys(name) else {
            return;
        };

        if let Some(count) = self.mid_full.get_mut(&midkey) {
            *count = count.saturating_sub(1);
            if *count < self.files_per_dir {
                let count = *count;
                self.mid_full.remove(&midkey);
                self.mid_pool.insert(midkey, count);
            }
            return;
        }

        let Some(count) = self.mid_pool.get_mut(&midkey) else {
            return;
        };
        *count = count.saturating_sub(1);
        if *count > 0 {
            return;
        }
        self.mid_pool.remove(&midkey);
        let _ = fs::remove_dir(mid_dir(data_dir, midkey));

        if let Some(count) = self.top_full.get_mut(&top) {
            *count = count.saturating_sub(1);
            if *count < MIDS_PER_TOP {
                let count = *count;
                self.top_full.remove(&top);
                self.top_pool.insert(top, count);
            }
        } else if let Some(count) = self.top_pool.get_mut(&top) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                let _ = fs::remove_dir(top_dir(data_dir, top));
            }
        }
    }

    #[cfg(test)]
    fn mid_count(&self, midkey: u16) -> Option<(usize, bool)> {
        self.mid_pool
            .get(&midkey)
            .map(|&count| (count, false))
            .or_else(|| self.mid_full.get(&midkey).map(|&count| (count, true)))
    }
}

fn block_name(midkey: u16, file: u16) -> String {
    let [top, mid] = midkey.to_be_bytes();
    format!("e{:02x}{:02x}{:03x}", top, mid, file)
}

/// The top-level number and mid-level key encoded in a block name.
fn name_keys(name: &str) -> Option<(u8, u16)> {
    if !name.starts_with('e') {
        return None;
    }
    let top = u8::from_str_radix(name.get(1..3)?, 16).ok()?;
    let mid = u8::from_str_radix(name.get(3..5)?, 16).ok()?;
    Some((top, u16::from_be_bytes([top, mid])))
}

fn top_dir(data_dir: &Path, top: u8) -> PathBuf {
    data_dir.join(format!("e{:02x}", top))
}

fn mid_dir(data_dir: &Path, midkey: u16) -> PathBuf {
    let [top, mid] = midkey.to_be_bytes();
    top_dir(data_dir, top).join(format!("d{:02x}", mid))
}

/// The directory a block named `value` lives in, relative to the data
/// directory. Names outside the balanced scheme live at the top.
pub(super) fn block_subdir(value: &str) -> Option<PathBuf> {
    if !value.starts_with('e') {
        return None;
    }
    let top = value.get(0..3)?;
    let mid = value.get(3..5)?;
    Some(Path::new(top).join(format!("d{}", mid)))
}
