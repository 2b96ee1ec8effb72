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
//! The ordered block list a track addresses its audio through.
use std::sync::Arc;

use parking_lot::Mutex;

use crate::blockfile::BlockFilePtr;

/// One block and the track sample it starts at.
#[derive(Debug, Clone)]
pub struct SeqBlock {
    pub start: u64,
    pub block: BlockFilePtr,
}

impl SeqBlock {
    pub fn new(start: u64, block: BlockFilePtr) -> Self {
        SeqBlock { start, block }
    }

    /// One past the last sample covered by this block.
    pub fn end(&self) -> u64 {
        self.start + self.block.len() as u64
    }
}

#[derive(Debug, Default, Clone)]
pub struct BlockArray {
    blocks: Vec<SeqBlock>,
}

/// A block array shared between its track, a loader and background tasks.
pub type SharedBlockArray = Arc<Mutex<BlockArray>>;

impl BlockArray {
    pub fn new() -> Self {
        BlockArray::default()
    }

    pub fn shared(self) -> SharedBlockArray {
        Arc::new(Mutex::new(self))
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&SeqBlock> {
        self.blocks.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &SeqBlock> {
        self.blocks.iter()
    }

    /// Total samples covered, measured from the start of the first block.
    pub fn num_samples(&self) -> u64 {
        self.blocks.last().map(SeqBlock::end).unwrap_or(0)
    }

    /// Appends `block` directly after the current last block.
    pub fn append(&mut self, block: BlockFilePtr) {
        let start = self.num_samples();
        self.blocks.push(SeqBlock::new(start, block));
    }

    pub fn push(&mut self, seq: SeqBlock) {
        self.blocks.push(seq);
    }

    /// Stores `block` at `index`, replacing what is there or appending when
    /// `index` is the current length. Any other index is ignored and false
    /// is returned.
    pub fn store(&mut self, index: usize, block: BlockFilePtr) -> bool {
        if index < self.blocks.len() {
            self.blocks[index].block = block;
            true
        } else if index == self.blocks.len() {
            self.append(block);
            true
        } else {
            false
        }
    }

    pub fn set_start(&mut self, index: usize, start: u64) {
        if let Some(seq) = self.blocks.get_mut(index) {
            seq.start = start;
        }
    }

    /// Index of the block holding `sample`.
    pub fn find_block(&self, sample: u64) -> Option<usize> {
        let index = self.blocks.partition_point(|seq| seq.end() <= sample);
        self.blocks
            .get(index)
            .filter(|seq| seq.start <= sample)
            .map(|_| index)
    }

    /// Every block, in order.
    pub fn blocks(&self) -> Vec<BlockFilePtr> {
        self.blocks.iter().map(|seq| seq.block.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockfile::BlockFile;
    use crate::config::StorageConfig;
    use crate::context::StorageContext;

    #[test]
    fn test_find_block() {
        let ctx = StorageContext::new(StorageConfig::default());
        let mut array = BlockArray::new();
        array.append(BlockFile::new_silent(ctx.clone(), 100));
        array.append(BlockFile::new_silent(ctx.clone(), 50));

        assert_eq!(array.num_samples(), 150);
        assert_eq!(array.get(1).map(|seq| seq.start), Some(100));
        assert_eq!(array.find_block(0), Some(0));
        assert_eq!(array.find_block(99), Some(0));
        assert_eq!(array.find_block(100), Some(1));
        assert_eq!(array.find_block(150), None);
    }

    #[test]
    fn test_store() {
        let ctx = StorageContext::new(StorageConfig::default());
        let mut array = BlockArray::new();
        assert!(array.store(0, BlockFile::new_silent(ctx.clone(), 10)));
        assert!(array.store(0, BlockFile::new_silent(ctx.clone(), 20)));
        assert!(!array.store(5, BlockFile::new_silent(ctx.clone(), 30)));
        assert_eq!(array.len(), 1);
        assert_eq!(array.num_samples(), 20);
    }
}
