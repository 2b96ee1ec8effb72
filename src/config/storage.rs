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
use std::path::PathBuf;

use serde::Deserialize;

use super::ConfigError;
use crate::format::DitherType;

/// Default number of block files stored in one leaf directory.
pub const DEFAULT_FILES_PER_DIR: usize = 256;

/// Default largest block accepted when loading a project.
pub const DEFAULT_MAX_BLOCK_SAMPLES: usize = 1 << 20;

/// Settings for the block-file store.
#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct StorageConfig {
    /// Root for unsaved projects. Defaults to `<os temp>/blockstore`.
    temp_dir: Option<PathBuf>,

    /// Keep newly recorded simple blocks in memory until flushed.
    cache_block_files: bool,

    /// Leaf directory capacity used by the directory balancer.
    files_per_dir: usize,

    /// Blocks longer than this are rejected while loading a project.
    max_block_samples: usize,

    low_quality_dither: DitherType,
    high_quality_dither: DitherType,

    /// Worker threads for on-demand tasks.
    od_threads: Option<usize>,

    /// Fraction of a task completed per scheduling slice.
    od_slice: f32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig {
            temp_dir: None,
            cache_block_files: false,
            files_per_dir: DEFAULT_FILES_PER_DIR,
            max_block_samples: DEFAULT_MAX_BLOCK_SAMPLES,
            low_quality_dither: DitherType::None,
            high_quality_dither: DitherType::Shaped,
            od_threads: None,
            od_slice: 0.1,
        }
    }
}

impl StorageConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.files_per_dir == 0 || self.files_per_dir > 4096 {
            return Err(ConfigError::Invalid {
                name: "files_per_dir",
                reason: format!("{} is outside 1..=4096", self.files_per_dir),
            });
        }
        if !(self.od_slice > 0.0 && self.od_slice <= 1.0) {
            return Err(ConfigError::Invalid {
                name: "od_slice",
                reason: format!("{} is outside (0, 1]", self.od_slice),
            });
        }
        Ok(())
    }

    pub fn temp_dir(&self) -> PathBuf {
        self.temp_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("blockstore"))
    }

    pub fn with_temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = Some(dir.into());
        self
    }

    pub fn cache_block_files(&self) -> bool {
        self.cache_block_files
    }

    pub fn with_cache_block_files(mut self, enabled: bool) -> Self {
        self.cache_block_files = enabled;
        self
    }

    pub fn files_per_dir(&self) -> usize {
        self.files_per_dir
    }

    pub fn with_files_per_dir(mut self, files: usize) -> Self {
        self.files_per_dir = files;
        self
    }

    pub fn max_block_samples(&self) -> usize {
        self.max_block_samples
    }

    /// The ditherer used by `copy_samples` for the given quality.
    pub fn dither(&self, high_quality: bool) -> DitherType {
        if high_quality {
            self.high_quality_dither
        } else {
            self.low_quality_dither
        }
    }

    pub fn od_threads(&self) -> usize {
        self.od_threads.unwrap_or_else(num_cpus::get).max(1)
    }

    pub fn od_slice(&self) -> f32 {
        self.od_slice
    }
}

#[cfg(test)]
mod tests {
    use config::{Config, File, FileFormat};

    use super::*;

    #[test]
    fn test_storage_config_deserialize() {
        let yaml = r#"
            temp_dir: /var/tmp/blocks
            cache_block_files: true
            files_per_dir: 64
            high_quality_dither: triangle
            od_threads: 2
        "#;

        let config: StorageConfig = Config::builder()
            .add_source(File::from_str(yaml, FileFormat::Yaml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(config.temp_dir(), PathBuf::from("/var/tmp/blocks"));
        assert!(config.cache_block_files());
        assert_eq!(config.files_per_dir(), 64);
        assert_eq!(config.dither(true), DitherType::Triangle);
        assert_eq!(config.dither(false), DitherType::None);
        assert_eq!(config.od_threads(), 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_storage_config_defaults() {
        let config: StorageConfig = Config::builder()
            .add_source(File::from_str("{}", FileFormat::Yaml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert!(!config.cache_block_files());
        assert_eq!(config.files_per_dir(), DEFAULT_FILES_PER_DIR);
        assert_eq!(config.dither(true), DitherType::Shaped);
        assert!(config.od_threads() >= 1);
    }

    #[test]
    fn test_storage_config_rejects_zero_capacity() {
        let err = crate::config::parse_storage_config("files_per_dir: 0").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                name: "files_per_dir",
                ..
            }
        ));
    }
}
