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
use std::fmt;
use std::path::{Component, Path, PathBuf};

use crate::config::ConfigError;
use crate::xml::XmlError;

/// Paths longer than this many components are abbreviated in messages.
const MAX_DISPLAY_COMPONENTS: usize = 5;

/// The file operation that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileCause {
    Open,
    Read,
    Write,
    Rename,
}

impl fmt::Display for FileCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FileCause::Open => "open",
            FileCause::Read => "read",
            FileCause::Write => "write",
            FileCause::Rename => "rename",
        };
        f.write_str(name)
    }
}

/// Errors raised by the storage layer.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("{}", file_message(.cause, .path, .renamed_to))]
    File {
        cause: FileCause,
        path: PathBuf,
        renamed_to: Option<PathBuf>,
    },

    /// An on-demand block was asked for data its background work has not produced yet.
    #[error("Block data is not yet available")]
    NotYetAvailable,

    #[error("Internal inconsistency at {file}:{line}")]
    Inconsistency { file: &'static str, line: u32 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Audio file error: {0}")]
    Audio(#[from] symphonia::core::errors::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Xml(#[from] XmlError),

    #[error("Unable to start on-demand workers: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
}

pub type Result<T> = std::result::Result<T, StorageError>;

impl StorageError {
    pub fn file(cause: FileCause, path: impl Into<PathBuf>) -> Self {
        StorageError::File {
            cause,
            path: path.into(),
            renamed_to: None,
        }
    }

    pub fn rename(from: impl Into<PathBuf>, to: impl Into<PathBuf>) -> Self {
        StorageError::File {
            cause: FileCause::Rename,
            path: from.into(),
            renamed_to: Some(to.into()),
        }
    }

    /// True for the error kind callers may wait on and retry.
    pub fn is_not_yet_available(&self) -> bool {
        matches!(self, StorageError::NotYetAvailable)
    }
}

/// Builds an [`StorageError::Inconsistency`] carrying the caller's location.
#[macro_export]
macro_rules! inconsistency {
    () => {
        $crate::error::StorageError::Inconsistency {
            file: file!(),
            line: line!(),
        }
    };
}

fn file_message(cause: &FileCause, path: &Path, renamed_to: &Option<PathBuf>) -> String {
    let shown = abbreviate_path(path);
    match cause {
        FileCause::Open | FileCause::Read => {
            format!("Failed to read from a file in {}", shown)
        }
        FileCause::Write => format!(
            "Failed to write to a file; perhaps {} is not writable or the disk is full",
            shown
        ),
        FileCause::Rename => match renamed_to {
            Some(to) => format!(
                "Wrote {} but failed to rename it as {}",
                shown,
                abbreviate_path(to)
            ),
            None => format!("Failed to rename {}", shown),
        },
    }
}

/// Shortens deep paths to their first few directories, an ellipsis and the
/// file name.
pub fn abbreviate_path(path: &Path) -> String {
    let components: Vec<Component> = path.components().collect();
    if components.len() <= MAX_DISPLAY_COMPONENTS {
        return path.display().to_string();
    }

    let mut head = PathBuf::new();
    for component in &components[..MAX_DISPLAY_COMPONENTS - 1] {
        head.push(component);
    }
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    format!(
        "{}{}...{}{}",
        head.display(),
        std::path::MAIN_SEPARATOR,
        std::path::MAIN_SEPARATOR,
        name
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_paths_are_untouched() {
        assert_eq!(abbreviate_path(Path::new("/a/b/c.au")), "/a/b/c.au");
    }

    #[test]
    fn test_long_paths_are_abbreviated() {
        let shown = abbreviate_path(Path::new("/one/two/three/four/five/six/block.au"));
        let sep = std::path::MAIN_SEPARATOR;
        assert_eq!(shown, format!("/one/two/three{sep}...{sep}block.au"));
    }

    #[test]
    fn test_file_error_mentions_path() {
        let err = StorageError::file(FileCause::Write, "/tmp/x.au");
        assert!(err.to_string().contains("/tmp/x.au"));
        assert!(!err.is_not_yet_available());
        assert!(StorageError::NotYetAvailable.is_not_yet_available());
    }

    #[test]
    fn test_inconsistency_records_location() {
        match inconsistency!() {
            StorageError::Inconsistency { file, line } => {
                assert!(file.ends_with("error.rs"));
                assert!(line > 0);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }
}
