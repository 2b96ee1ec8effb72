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

use tracing::{debug, warn};

use super::decoder::{create_decoder, FileDecoder};
use super::task::{TaskWork, WorkQueue};
use crate::error::{FileCause, Result, StorageError};
use crate::sequence::SharedBlockArray;

/// Builds the decoder for a decode type and source file.
pub type DecoderFactory = Box<dyn Fn(u32, &Path) -> Option<Box<dyn FileDecoder>> + Send>;

/// Decodes the samples of on-demand decode blocks of one decode type.
///
/// Decoders are created once per source file and kept for the life of the
/// task.
pub struct DecodeTask {
    decode_type: u32,
    factory: DecoderFactory,
    decoders: Vec<Box<dyn FileDecoder>>,
    queue: WorkQueue,
}

impl DecodeTask {
    pub fn new(decode_type: u32) -> Self {
        DecodeTask::with_factory(decode_type, Box::new(create_decoder))
    }

    pub fn with_factory(decode_type: u32, factory: DecoderFactory) -> Self {
        DecodeTask {
            decode_type,
            factory,
            decoders: Vec::new(),
            queue: WorkQueue::default(),
        }
    }

    pub fn decode_type(&self) -> u32 {
        self.decode_type
    }

    /// The initialized decoder for `path`, creating one if needed.
    fn decoder_for(&mut self, path: &Path) -> Option<&mut Box<dyn FileDecoder>> {
        let index = match self.decoders.iter().position(|d| d.file_name() == path) {
            Some(index) => index,
            None => {
                let mut decoder = (self.factory)(self.decode_type, path)?;
                if !decoder.read_header() {
                    warn!(path = ?path, "Unable to read header for decoding");
                    return None;
                }
                self.decoders.push(decoder);
                self.decoders.len() - 1
            }
        };
        self.decoders.get_mut(index)
    }
}

impl TaskWork for DecodeTask {
    fn name(&self) -> &'static str {
        "decode"
    }

    fn update(&mut self, tracks: &[SharedBlockArray]) {
        let decode_type = self.decode_type;
        self.queue.rebuild(tracks, |block| {
            block
                .as_od_decode()
                .filter(|od| od.decode_type() == decode_type)
                .map(|od| od.is_data_available())
        });
    }

    fn do_some_internal(&mut self, _demand_sample: u64) -> Result<()> {
        let Some(block) = self.queue.next() else {
            return Ok(());
        };
        let Some(audio_file) = block.as_od_decode().map(|od| od.audio_file_name()) else {
            self.queue.finished();
            return Ok(());
        };

        let status = match self.decoder_for(&audio_file) {
            Some(decoder) => block.write_od_decode_block_file(decoder.as_mut()),
            None => -2,
        };
        if status < 0 {
            self.queue.failed(&block);
            return Err(StorageError::file(FileCause::Read, &audio_file));
        }
        debug!(block = ?block.file_name(), "Decoded block");
        self.queue.finished();
        Ok(())
    }

    fn percent_complete(&self) -> f32 {
        self.queue.percent_complete()
    }

    fn order(&mut self, demand_sample: u64) {
        self.queue.order(demand_sample);
    }

    fn has_work(&self) -> bool {
        self.queue.has_work()
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;
    use crate::blockfile::BlockFile;
    use crate::config::StorageConfig;
    use crate::context::StorageContext;
    use crate::format::{SampleBuffer, SampleFormat};
    use crate::ondemand::OdTask;
    use crate::sequence::BlockArray;

    /// Produces sample `n` as the value `n` in 16 bits.
    struct CountingDecoder {
        path: PathBuf,
    }

    impl FileDecoder for CountingDecoder {
        fn read_header(&mut self) -> bool {
            true
        }

        fn decode(&mut self, start: u64, len: usize, _channel: usize) -> (i32, SampleBuffer) {
            let samples = (0..len).map(|i| (start as usize + i) as i16).collect();
            (1, SampleBuffer::Int16(samples))
        }

        fn format(&self) -> SampleFormat {
            SampleFormat::Int16
        }

        fn channels(&self) -> usize {
            1
        }

        fn file_name(&self) -> &Path {
            &self.path
        }

        fn is_initialized(&self) -> bool {
            true
        }
    }

    fn counting_factory(created: Arc<AtomicUsize>) -> DecoderFactory {
        Box::new(move |_: u32, path: &Path| -> Option<Box<dyn FileDecoder>> {
            created.fetch_add(1, Ordering::AcqRel);
            Some(Box::new(CountingDecoder {
                path: path.to_path_buf(),
            }))
        })
    }

    #[test]
    fn test_decodes_every_block() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = StorageContext::new(StorageConfig::default());
        let source = dir.path().join("source.flac");

        let mut array = BlockArray::new();
        for i in 0..3u64 {
            let base = dir.path().join(format!("dec{i}"));
            array.append(BlockFile::new_od_decode(
                ctx.clone(),
                &base,
                &source,
                i * 500,
                500,
                0,
                0,
            ));
        }
        let blocks = array.blocks();

        let created = Arc::new(AtomicUsize::new(0));
        let work = DecodeTask::with_factory(0, counting_factory(created.clone()));
        let task = OdTask::new(&ctx, Box::new(work));
        task.add_track(array.shared());
        task.do_some(1.0);

        assert!(task.is_complete());
        assert_eq!(created.load(Ordering::Acquire), 1);
        for (i, block) in blocks.iter().enumerate() {
            assert!(block.is_data_available());
            let mut buf = SampleBuffer::new(SampleFormat::Int16, 500);
            block.read_data(&mut buf, 0, 500, true).unwrap();
            let expected: Vec<i16> = (0..500).map(|n| (i * 500 + n) as i16).collect();
            assert_eq!(buf, SampleBuffer::Int16(expected));
        }
    }

    #[test]
    fn test_other_decode_types_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = StorageContext::new(StorageConfig::default());
        let source = dir.path().join("source.ogg");
        let block = BlockFile::new_od_decode(ctx.clone(), &dir.path().join("d"), &source, 0, 100, 0, 3);
        let mut array = BlockArray::new();
        array.append(block.clone());

        let created = Arc::new(AtomicUsize::new(0));
        let task = OdTask::new(
            &ctx,
            Box::new(DecodeTask::with_factory(0, counting_factory(created.clone()))),
        );
        task.add_track(array.shared());
        task.do_some(1.0);

        assert!(task.is_complete());
        assert!(!block.is_data_available());
        assert_eq!(created.load(Ordering::Acquire), 0);
    }

    #[test]
    fn test_unreadable_source_fails_block() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = StorageContext::new(StorageConfig::default());
        let source = dir.path().join("missing.flac");
        let block = BlockFile::new_od_decode(ctx.clone(), &dir.path().join("d"), &source, 0, 100, 0, 0);
        let mut array = BlockArray::new();
        array.append(block.clone());

        let task = OdTask::new(&ctx, Box::new(DecodeTask::new(0)));
        task.add_track(array.shared());
        task.do_some(1.0);

        assert!(task.is_complete());
        assert!(!block.is_data_available());
    }
}
