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
use std::path::Path;

use config::{Config, File, FileFormat};
use tracing::info;

mod error;
mod storage;

pub use self::error::ConfigError;
pub use self::storage::StorageConfig;

/// Loads storage settings from a YAML file.
pub fn load_storage_config(path: &Path) -> Result<StorageConfig, ConfigError> {
    info!(path = ?path, "Loading storage config");
    let config: StorageConfig = Config::builder()
        .add_source(File::from(path).format(FileFormat::Yaml))
        .build()?
        .try_deserialize()?;
    config.validate()?;
    Ok(config)
}

/// Parses storage settings from a YAML string.
pub fn parse_storage_config(yaml: &str) -> Result<StorageConfig, ConfigError> {
    let config: StorageConfig = Config::builder()
        .add_source(File::from_str(yaml, FileFormat::Yaml))
        .build()?
        .try_deserialize()?;
    config.validate()?;
    Ok(config)
}
