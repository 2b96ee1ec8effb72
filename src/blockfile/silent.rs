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
use std::sync::Arc;

use super::{parse_int, BlockFile, BlockFilePtr, BlockKind, LoadContext};
use crate::context::StorageContext;
use crate::summary::MinMaxRms;
use crate::xml::{attr, Attributes, XmlWriter};

impl BlockFile {
    /// A block of `len` zero samples with no file behind it.
    pub fn new_silent(ctx: Arc<StorageContext>, len: usize) -> BlockFilePtr {
        Arc::new(BlockFile::with_kind(
            ctx,
            PathBuf::new(),
            len,
            MinMaxRms::default(),
            BlockKind::Silent,
        ))
    }

    pub(super) fn copy_silent(&self) -> BlockFilePtr {
        BlockFile::new_silent(self.ctx.clone(), self.len)
    }

    pub(super) fn save_silent_xml(&self, w: &mut XmlWriter) {
        w.start_tag("silentblockfile");
        w.write_attr("len", self.len);
        w.end_tag("silentblockfile");
    }

    pub(super) fn silent_from_xml(
        loader: &dyn LoadContext,
        attrs: &Attributes,
    ) -> Option<BlockFilePtr> {
        let len = attr(attrs, "len")
            .and_then(parse_int)
            .filter(|len| *len > 0)?;
        Some(BlockFile::new_silent(loader.context().clone(), len as usize))
    }
}
