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
//! Checking a project directory against the blocks that reference it.
use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::ops::{BitOr, BitOrAssign};
use std::path::PathBuf;

use parking_lot::Mutex;
use tracing::{info, warn};

use super::{enumerate_files, DirManager, CLEAN_DIRS, CLEAN_DIRS_ONLY_IF_EMPTY};
use crate::error::{FileCause, StorageError};

/// The outcome of [`DirManager::project_fsck`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FsckStatus(u32);

impl FsckStatus {
    pub const OK: FsckStatus = FsckStatus(0);
    /// The user asked to close the project without changes.
    pub const CLOSE_REQ: FsckStatus = FsckStatus(1);
    /// Repairs were applied to blocks.
    pub const CHANGED: FsckStatus = FsckStatus(2);
    /// The project document must be saved again.
    pub const SAVE_AUP: FsckStatus = FsckStatus(4);

    pub fn bits(&self) -> u32 {
        self.0
    }

    pub fn contains(&self, other: FsckStatus) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_ok(&self) -> bool {
        self.0 == 0
    }
}

impl BitOr for FsckStatus {
    type Output = FsckStatus;

    fn bitor(self, rhs: FsckStatus) -> FsckStatus {
        FsckStatus(self.0 | rhs.0)
    }
}

impl BitOrAssign for FsckStatus {
    fn bitor_assign(&mut self, rhs: FsckStatus) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for FsckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_ok() {
            return f.write_str("ok");
        }
        let names: Vec<&str> = [
            (FsckStatus::CLOSE_REQ, "close requested"),
            (FsckStatus::CHANGED, "changed"),
            (FsckStatus::SAVE_AUP, "save project"),
        ]
        .into_iter()
        .filter(|(flag, _)| self.contains(*flag))
        .map(|(_, name)| name)
        .collect();
        f.write_str(&names.join(", "))
    }
}

/// Asks the user how to handle a problem found while checking a project.
pub trait RepairPrompt {
    /// Returns the index of the chosen button.
    fn choose(&self, title: &str, message: &str, buttons: &[&str]) -> usize;
}

/// Answers prompts from a stack of scripted clicks, most recently pushed
/// first. With nothing pushed, or a click out of range, the first button is
/// chosen.
#[derive(Debug, Default)]
pub struct ScriptedPrompt {
    clicks: Mutex<Vec<usize>>,
}

impl ScriptedPrompt {
    pub fn new() -> Self {
        ScriptedPrompt::default()
    }

    pub fn push(&self, click: usize) {
        self.clicks.lock().push(click);
    }

    pub fn remaining(&self) -> usize {
        self.clicks.lock().len()
    }
}

impl RepairPrompt for ScriptedPrompt {
    fn choose(&self, title: &str, _message: &str, buttons: &[&str]) -> usize {
        let click = self.clicks.lock().pop().unwrap_or(0);
        let click = if click < buttons.len() { click } else { 0 };
        info!(title, choice = buttons.get(click).copied().unwrap_or(""), "Repair prompt");
        click
    }
}

impl DirManager {
    /// Looks for missing and orphaned files and repairs what the user (or
    /// `auto_recover`) agrees to.
    ///
    /// `force_error` reports that the caller already hit problems reading the
    /// project, which is offered as its own prompt first.
    pub fn project_fsck(
        &mut self,
        force_error: bool,
        auto_recover: bool,
        prompt: &dyn RepairPrompt,
    ) -> FsckStatus {
        let mut status = FsckStatus::OK;
        let mut problems = 0;
        let ctx = self.ctx.clone();
        let repairs = ctx.messages().batch();

        if force_error && !auto_recover {
            problems += 1;
            let action = prompt.choose(
                "Warning - Problems Reading Sequence Tags",
                "Problems were found reading the project's block records. \
                 Close now, or continue and check for more errors.",
                &[
                    "Close project immediately with no changes",
                    "Continue with repairs noted in log, and check for more errors",
                ],
            );
            status = if action == 0 {
                FsckStatus::CLOSE_REQ
            } else {
                FsckStatus::CHANGED | FsckStatus::SAVE_AUP
            };
        }

        let missing_aliased = self.find_missing_aliased_files();
        if status != FsckStatus::CLOSE_REQ && !missing_aliased.is_empty() {
            problems += missing_aliased.len();
            let sources: BTreeSet<PathBuf> = missing_aliased
                .iter()
                .filter_map(|block| block.as_alias().map(|alias| alias.aliased_file_name()))
                .collect();
            warn!(
                blocks = missing_aliased.len(),
                files = ?sources,
                "Project references missing external audio files"
            );

            let action = if auto_recover {
                2
            } else {
                prompt.choose(
                    "Warning - Missing Aliased File(s)",
                    "The project depends on external audio files that are missing.",
                    &[
                        "Close project immediately with no changes",
                        "Treat missing audio as silence (this session only)",
                        "Replace missing audio with silence (permanent immediately)",
                    ],
                )
            };
            if action == 0 {
                status = FsckStatus::CLOSE_REQ;
            } else {
                for block in &missing_aliased {
                    if action == 2 {
                        block.change_aliased_file_name(PathBuf::new());
                        if let Err(e) = block.recover() {
                            ctx.messages().notify(e);
                        }
                        status |= FsckStatus::CHANGED | FsckStatus::SAVE_AUP;
                    } else {
                        block.silence_alias_log();
                    }
                }
            }
        }

        let missing_aufs = self.find_missing_aufs();
        if status != FsckStatus::CLOSE_REQ && !missing_aufs.is_empty() {
            problems += missing_aufs.len();
            warn!(blocks = missing_aufs.len(), "Project is missing summary files");

            let action = if auto_recover {
                0
            } else {
                prompt.choose(
                    "Warning - Missing Alias Summary File(s)",
                    "Summary files for alias blocks are missing.",
                    &[
                        "Regenerate the summary files (safest)",
                        "Fill in silence for missing display data (this session only)",
                        "Close project immediately with no further changes",
                    ],
                )
            };
            if action == 2 {
                status = FsckStatus::CLOSE_REQ;
            } else {
                for block in &missing_aufs {
                    if action == 0 {
                        if let Err(e) = block.recover() {
                            ctx.messages().notify(e);
                        }
                        status |= FsckStatus::CHANGED;
                    } else {
                        block.silence_log();
                    }
                }
            }
        }

        let missing_aus = self.find_missing_aus();
        if status != FsckStatus::CLOSE_REQ && !missing_aus.is_empty() {
            problems += missing_aus.len();
            warn!(blocks = missing_aus.len(), "Project is missing audio data files");

            let action = if auto_recover {
                2
            } else {
                prompt.choose(
                    "Warning - Missing Audio Data Block File(s)",
                    "Audio data files of the project are missing.",
                    &[
                        "Close project immediately with no further changes",
                        "Treat missing audio as silence (this session only)",
                        "Replace missing audio with silence (permanent immediately)",
                    ],
                )
            };
            if action == 0 {
                status = FsckStatus::CLOSE_REQ;
            } else {
                for block in &missing_aus {
                    if action == 2 {
                        if let Err(e) = block.recover() {
                            ctx.messages().notify(e);
                        }
                        status |= FsckStatus::CHANGED;
                    } else {
                        block.silence_log();
                    }
                }
            }
        }

        let orphans = self.find_orphan_block_files(&enumerate_files(&self.data_files_dir()));
        if status != FsckStatus::CLOSE_REQ && !orphans.is_empty() {
            problems += orphans.len();
            warn!(files = orphans.len(), "Project directory holds orphan block files");

            if !auto_recover {
                let action = prompt.choose(
                    "Warning - Orphan Block File(s)",
                    "The project directory holds block files no block uses.",
                    &[
                        "Continue without deleting; ignore the extra files this session",
                        "Close project immediately with no further changes",
                        "Delete orphan files (permanent immediately)",
                    ],
                );
                if action == 1 {
                    status = FsckStatus::CLOSE_REQ;
                } else if action == 2 {
                    for orphan in &orphans {
                        if fs::remove_file(orphan).is_err() {
                            ctx.messages()
                                .notify(StorageError::file(FileCause::Write, orphan));
                        }
                    }
                    status |= FsckStatus::CHANGED;
                }
            }
        }

        let failed_repairs = repairs.finish();
        if problems > 0 {
            warn!(problems, failed_repairs, status = %status, "Project check found problems");
        }

        // Blocks still waiting on background work or a cache flush write
        // into directories that may be empty for now.
        let pending = self
            .live_blocks()
            .iter()
            .any(|block| !block.is_summary_available() || block.needs_write_cache_to_disk());
        if status != FsckStatus::CLOSE_REQ && !pending {
            let data_dir = self.data_files_dir();
            self.clean_dir(&data_dir, "", "", CLEAN_DIRS | CLEAN_DIRS_ONLY_IF_EMPTY);
        }
        status
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scripted_prompt_is_lifo() {
        let prompt = ScriptedPrompt::new();
        prompt.push(2);
        prompt.push(1);
        let buttons = ["a", "b", "c"];
        assert_eq!(prompt.choose("t", "m", &buttons), 1);
        assert_eq!(prompt.choose("t", "m", &buttons), 2);
        assert_eq!(prompt.choose("t", "m", &buttons), 0);
        assert_eq!(prompt.remaining(), 0);
    }

    #[test]
    fn test_out_of_range_click_picks_first() {
        let prompt = ScriptedPrompt::new();
        prompt.push(5);
        assert_eq!(prompt.choose("t", "m", &["a", "b"]), 0);
    }

    #[test]
    fn test_status_bits() {
        let mut status = FsckStatus::OK;
        assert!(status.is_ok());
        status |= FsckStatus::CHANGED;
        status |= FsckStatus::SAVE_AUP;
        assert_eq!(status.bits(), 6);
        assert!(status.contains(FsckStatus::CHANGED));
        assert!(!status.contains(FsckStatus::CLOSE_REQ));
        assert_eq!(status.to_string(), "changed, save project");
    }
}
