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
//! Reading and writing a track's block list as a `<blockfiles>` document.
use std::path::Path;

use tracing::{info, warn};

use super::DirManager;
use crate::blockfile::{parse_int, parse_int64};
use crate::error::Result;
use crate::format::SampleFormat;
use crate::sequence::{BlockArray, SharedBlockArray};
use crate::xml::{attr, Attributes, XmlFileReader, XmlFileWriter, XmlTagHandler};

/// One track's blocks together with the format they were recorded in.
pub struct ProjectFile {
    format: SampleFormat,
    block_len: usize,
    blocks: SharedBlockArray,
    failed_blocks: usize,
}

impl ProjectFile {
    pub fn new(format: SampleFormat, block_len: usize) -> Self {
        ProjectFile {
            format,
            block_len,
            blocks: BlockArray::new().shared(),
            failed_blocks: 0,
        }
    }

    /// Loads a document, registering its blocks with `dm`.
    ///
    /// Block records that fail validation are skipped and counted; the
    /// caller should treat a non-zero [`ProjectFile::failed_blocks`] as a
    /// reason to check the project.
    pub fn load(dm: &mut DirManager, path: &Path) -> Result<Self> {
        let blocks = BlockArray::new().shared();
        let mut loader = Loader {
            dm,
            blocks: blocks.clone(),
            pending: None,
            failed: 0,
        };
        let parsed = XmlFileReader::parse(&mut loader, path);
        let failed = loader.failed;
        let dm = loader.dm;
        dm.clear_loading_target();
        parsed?;

        let project = ProjectFile {
            format: dm.loading_format(),
            block_len: dm.loading_block_length(),
            blocks,
            failed_blocks: failed,
        };
        info!(
            path = ?path,
            blocks = project.blocks.lock().len(),
            failed,
            "Loaded project"
        );
        Ok(project)
    }

    /// Writes the document, staging it beside `path` until complete.
    pub fn save(&self, path: &Path) -> Result<()> {
        let mut w = XmlFileWriter::new(path)?;
        w.start_tag("blockfiles");
        w.write_attr("format", format_name(self.format));
        w.write_attr("blocklen", self.block_len);
        for seq in self.blocks.lock().iter() {
            w.start_tag("waveblock");
            w.write_attr("start", seq.start);
            seq.block.save_xml(&mut w);
            w.end_tag("waveblock");
        }
        w.end_tag("blockfiles");
        w.commit()
    }

    /// Pins every block's file so it outlives this session.
    pub fn close(&self) {
        for seq in self.blocks.lock().iter() {
            seq.block.close_lock();
        }
    }

    pub fn format(&self) -> SampleFormat {
        self.format
    }

    pub fn block_len(&self) -> usize {
        self.block_len
    }

    pub fn blocks(&self) -> &SharedBlockArray {
        &self.blocks
    }

    pub fn failed_blocks(&self) -> usize {
        self.failed_blocks
    }

    pub fn num_samples(&self) -> u64 {
        self.blocks.lock().num_samples()
    }
}

struct Loader<'a> {
    dm: &'a mut DirManager,
    blocks: SharedBlockArray,
    /// Start and slot of the block record expected next.
    pending: Option<(u64, usize)>,
    failed: usize,
}

impl XmlTagHandler for Loader<'_> {
    fn handle_xml_tag(&mut self, tag: &str, attrs: &Attributes) -> bool {
        match tag {
            "blockfiles" => {
                if let Some(format) = attr(attrs, "format").and_then(|v| v.parse().ok()) {
                    self.dm.set_loading_format(format);
                }
                if let Some(len) = attr(attrs, "blocklen")
                    .and_then(parse_int)
                    .and_then(|len| usize::try_from(len).ok())
                {
                    self.dm.set_loading_block_length(len);
                }
                true
            }
            "waveblock" => {
                let start = attr(attrs, "start")
                    .and_then(parse_int64)
                    .and_then(|start| u64::try_from(start).ok());
                let Some(start) = start else {
                    warn!("Skipping block record without a valid start");
                    self.failed += 1;
                    return false;
                };
                let index = self.blocks.lock().len();
                self.dm.set_loading_target(self.blocks.clone(), index);
                self.pending = Some((start, index));
                true
            }
            _ => {
                let Some((start, index)) = self.pending.take() else {
                    return false;
                };
                if self.dm.handle_xml_tag(tag, attrs) {
                    self.blocks.lock().set_start(index, start);
                    true
                } else {
                    warn!(tag, "Skipping unreadable block record");
                    self.failed += 1;
                    false
                }
            }
        }
    }
}

fn format_name(format: SampleFormat) -> &'static str {
    match format {
        SampleFormat::Int16 => "int16",
        SampleFormat::Int24 => "int24",
        SampleFormat::Float => "float",
    }
}
