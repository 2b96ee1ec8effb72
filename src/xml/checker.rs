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
//! Predicates for values read back from untrusted documents.
//!
//! Paths are limited to the most restrictive platform path length so a
//! project saved on one system loads on another.
use std::path::{Path, MAIN_SEPARATOR};

pub const PLATFORM_MAX_PATH: usize = 260;

/// Within the path length limit and free of NUL characters.
pub fn is_good_string(value: &str) -> bool {
    value.len() <= PLATFORM_MAX_PATH && !value.contains('\0')
}

/// A bare file name: non-empty and without path separators.
pub fn is_good_file_string(value: &str) -> bool {
    is_good_string(value)
        && !value.is_empty()
        && !value.contains(MAIN_SEPARATOR)
        && !value.contains('/')
}

/// A bare file name that exists inside `dir`.
pub fn is_good_file_name(value: &str, dir: &Path) -> bool {
    if !is_good_file_string(value) {
        return false;
    }
    let dir_len = dir.as_os_str().len();
    if dir_len + 1 + value.len() > PLATFORM_MAX_PATH {
        return false;
    }
    dir.join(value).is_file()
}

/// A subdirectory name other than `.` or `..` that exists inside `dir`.
pub fn is_good_subdir_name(value: &str, dir: &Path) -> bool {
    if value == "." || value == ".." || !is_good_file_string(value) {
        return false;
    }
    let dir_len = dir.as_os_str().len();
    if dir_len + 1 + value.len() > PLATFORM_MAX_PATH {
        return false;
    }
    dir.join(value).is_dir()
}

/// A full path naming an existing file.
pub fn is_good_path_name(value: &str) -> bool {
    let path = Path::new(value);
    match (path.file_name().and_then(|n| n.to_str()), path.parent()) {
        (Some(name), Some(parent)) => is_good_file_name(name, parent),
        _ => false,
    }
}

/// A plausible path, whether or not it exists.
pub fn is_good_path_string(value: &str) -> bool {
    is_good_string(value) && !value.is_empty()
}

pub fn is_good_int(value: &str) -> bool {
    is_good_string(value) && value.parse::<i32>().is_ok()
}

pub fn is_good_int64(value: &str) -> bool {
    is_good_string(value) && value.parse::<i64>().is_ok()
}

/// Channel indices as stored in block records.
pub fn is_valid_channel(channel: i64) -> bool {
    (0..=2).contains(&channel)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strings() {
        assert!(is_good_string(""));
        assert!(!is_good_string("a\0b"));
        assert!(!is_good_string(&"x".repeat(PLATFORM_MAX_PATH + 1)));
        assert!(is_good_file_string("e0000001.au"));
        assert!(!is_good_file_string(""));
        assert!(!is_good_file_string("d00/e0000001.au"));
        assert!(is_good_path_string("/tmp/a.wav"));
        assert!(!is_good_path_string(""));
    }

    #[test]
    fn test_names_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("block.au"), b"x").unwrap();
        std::fs::create_dir(dir.path().join("d00")).unwrap();

        assert!(is_good_file_name("block.au", dir.path()));
        assert!(!is_good_file_name("other.au", dir.path()));
        assert!(!is_good_file_name("d00", dir.path()));
        assert!(is_good_subdir_name("d00", dir.path()));
        assert!(!is_good_subdir_name("..", dir.path()));
        assert!(!is_good_subdir_name("block.au", dir.path()));

        let full = dir.path().join("block.au");
        assert!(is_good_path_name(full.to_str().unwrap()));
        assert!(!is_good_path_name("/nonexistent/block.au"));
    }

    #[test]
    fn test_numbers() {
        assert!(is_good_int("-12"));
        assert!(!is_good_int("12a"));
        assert!(!is_good_int("4294967296"));
        assert!(is_good_int64("4294967296"));
        assert!(!is_good_int64(""));
        assert!(is_valid_channel(2));
        assert!(!is_valid_channel(3));
        assert!(!is_valid_channel(-1));
    }
}
