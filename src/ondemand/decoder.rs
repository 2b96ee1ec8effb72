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
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::audiofile::AudioFile;
use crate::format::{DitherType, SampleBuffer, SampleFormat};

/// Decode type of FLAC sources, as stored in `oddecodeblockfile` elements.
pub const DECODE_TYPE_FLAC: u32 = 0;

const FLAC_MAGIC: &[u8; 4] = b"fLaC";

/// Decodes exact sample ranges of one channel of an encoded file.
///
/// `decode` returns a status alongside the samples: positive on success,
/// negative on failure. The buffer is always `len` samples long and starts
/// out silent, so a failed decode yields silence rather than garbage.
pub trait FileDecoder: Send {
    /// Validates the file and reads its channel count and bit depth.
    fn read_header(&mut self) -> bool;

    fn decode(&mut self, start: u64, len: usize, channel: usize) -> (i32, SampleBuffer);

    fn format(&self) -> SampleFormat;

    fn channels(&self) -> usize;

    fn file_name(&self) -> &Path;

    fn is_initialized(&self) -> bool;
}

/// Creates the decoder for `decode_type`, or `None` if the type is unknown.
pub fn create_decoder(decode_type: u32, path: &Path) -> Option<Box<dyn FileDecoder>> {
    match decode_type {
        DECODE_TYPE_FLAC => Some(Box::new(FlacDecoder::new(path))),
        _ => None,
    }
}

pub struct FlacDecoder {
    path: PathBuf,
    format: SampleFormat,
    channels: usize,
    initialized: bool,
}

impl FlacDecoder {
    pub fn new(path: &Path) -> Self {
        FlacDecoder {
            path: path.to_path_buf(),
            format: SampleFormat::Int16,
            channels: 0,
            initialized: false,
        }
    }

    fn has_flac_magic(&self) -> bool {
        let mut magic = [0u8; 4];
        File::open(&self.path)
            .and_then(|mut file| file.read_exact(&mut magic))
            .map(|_| &magic == FLAC_MAGIC)
            .unwrap_or(false)
    }
}

impl FileDecoder for FlacDecoder {
    fn read_header(&mut self) -> bool {
        if !self.has_flac_magic() {
            debug!(path = ?self.path, "Not a FLAC file");
            return false;
        }
        let file = match AudioFile::open(&self.path) {
            Ok(file) => file,
            Err(e) => {
                warn!(path = ?self.path, err = %e, "Unable to read FLAC header");
                return false;
            }
        };

        let bits = file.bits_per_sample();
        self.format = if bits <= 16 {
            SampleFormat::Int16
        } else if bits <= 24 {
            SampleFormat::Int24
        } else {
            SampleFormat::Float
        };
        self.channels = file.channels();
        self.initialized = true;
        true
    }

    fn decode(&mut self, start: u64, len: usize, channel: usize) -> (i32, SampleBuffer) {
        let mut samples = SampleBuffer::new(self.format, len);
        if self.format == SampleFormat::Float || channel >= self.channels {
            warn!(path = ?self.path, channel, "Unsupported FLAC format or channel");
            return (-1, samples);
        }

        let mut file = match AudioFile::open(&self.path) {
            Ok(file) => file,
            Err(e) => {
                warn!(path = ?self.path, err = %e, "FLAC decoder failed to open");
                return (-2, samples);
            }
        };
        match file.read(&mut samples, 0, start, len, channel, DitherType::None) {
            Ok(read) if read == len => (1, samples),
            Ok(read) => {
                warn!(path = ?self.path, start, len, read, "FLAC source ended early");
                (-4, SampleBuffer::new(self.format, len))
            }
            Err(e) => {
                warn!(path = ?self.path, start, err = %e, "FLAC seek failed");
                (-3, SampleBuffer::new(self.format, len))
            }
        }
    }

    fn format(&self) -> SampleFormat {
        self.format
    }

    fn channels(&self) -> usize {
        self.channels
    }

    fn file_name(&self) -> &Path {
        &self.path
    }

    fn is_initialized(&self) -> bool {
        self.initialized
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::testutil::{flac_frame_bytes, write_flac, write_wav};

    fn fixture_samples(len: usize) -> Vec<i16> {
        (0..len).map(|i| (i * 41 % 5000 + 100) as i16).collect()
    }

    #[test]
    fn test_rejects_non_flac() {
        let dir = tempfile::tempdir().unwrap();
        let wav = dir.path().join("audio.wav");
        write_wav(&wav, &[vec![0i16; 10]], 44100).unwrap();

        let mut decoder = FlacDecoder::new(&wav);
        assert!(!decoder.read_header());
        assert!(!decoder.is_initialized());

        let mut missing = FlacDecoder::new(&dir.path().join("missing.flac"));
        assert!(!missing.read_header());
    }

    #[test]
    fn test_decode_before_header_is_silent_failure() {
        let mut decoder = FlacDecoder::new(Path::new("/nonexistent/audio.flac"));
        let (status, samples) = decoder.decode(0, 64, 0);
        assert_eq!(status, -1);
        assert_eq!(samples.len(), 64);
        assert!(samples.is_silent(0, 64));
    }

    #[test]
    fn test_decode_open_failure() {
        let mut decoder = FlacDecoder::new(Path::new("/nonexistent/audio.flac"));
        decoder.channels = 2;
        let (status, samples) = decoder.decode(100, 32, 1);
        assert_eq!(status, -2);
        assert_eq!(samples, SampleBuffer::Int16(vec![0; 32]));
    }

    #[test]
    fn test_decode_flac_range() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fixture.flac");
        let source = fixture_samples(600);
        write_flac(&path, &source, 200).unwrap();

        let mut decoder = FlacDecoder::new(&path);
        assert!(decoder.read_header());
        assert!(decoder.is_initialized());
        assert_eq!(decoder.format(), SampleFormat::Int16);
        assert_eq!(decoder.channels(), 1);

        let (status, samples) = decoder.decode(150, 300, 0);
        assert_eq!(status, 1);
        assert_eq!(samples, SampleBuffer::Int16(source[150..450].to_vec()));

        let (status, samples) = decoder.decode(0, 600, 0);
        assert_eq!(status, 1);
        assert_eq!(samples, SampleBuffer::Int16(source));
    }

    #[test]
    fn test_decode_truncated_flac_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("truncated.flac");
        write_flac(&path, &fixture_samples(600), 200).unwrap();
        let full = fs::metadata(&path).unwrap().len();
        let file = fs::OpenOptions::new().write(true).open(&path).unwrap();
        file.set_len(full - flac_frame_bytes(200) as u64).unwrap();

        let mut decoder = FlacDecoder::new(&path);
        assert!(decoder.read_header());
        let (status, samples) = decoder.decode(0, 600, 0);
        assert!(status < 0);
        assert_eq!(samples.len(), 600);
        assert!(samples.is_silent(0, 600));
    }

    #[test]
    fn test_factory() {
        let path = Path::new("/music/song.flac");
        let decoder = create_decoder(DECODE_TYPE_FLAC, path).unwrap();
        assert_eq!(decoder.file_name(), path);
        assert!(create_decoder(7, path).is_none());
    }
}
