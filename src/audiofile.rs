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
use std::path::{Path, PathBuf};

use symphonia::core::audio::{AudioBuffer, AudioBufferRef, Signal};
use symphonia::core::codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::{Error as SymphoniaError, SeekErrorKind};
use symphonia::core::formats::{FormatOptions, FormatReader, Packet, SeekMode, SeekTo};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::sample::Sample;
use symphonia::default::{get_codecs, get_probe};
use tracing::debug;

use crate::error::{FileCause, Result, StorageError};
use crate::format::{copy_samples, DitherType, SampleBuffer, SampleFormat};

/// Random access to one channel of an external audio file.
///
/// Alias blocks and on-demand decoders read their audio through this. Any
/// container and codec symphonia can probe is accepted.
pub struct AudioFile {
    path: PathBuf,
    format_reader: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    channels: usize,
    sample_rate: u32,
    bits_per_sample: u32,
    frames: Option<u64>,
    native_format: SampleFormat,
}

impl AudioFile {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|_| StorageError::file(FileCause::Open, path))?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(extension) = path.extension().and_then(|ext| ext.to_str()) {
            hint.with_extension(extension);
        }

        let meta_opts: MetadataOptions = Default::default();
        let fmt_opts: FormatOptions = Default::default();
        let probed = get_probe().format(&hint, mss, &fmt_opts, &meta_opts)?;
        let format_reader = probed.format;

        let track = format_reader
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| StorageError::file(FileCause::Read, path))?;
        let track_id = track.id;
        let params = track.codec_params.clone();

        let decoder = get_codecs().make(&params, &DecoderOptions::default())?;
        let channels = params.channels.map(|c| c.count()).unwrap_or(1);
        let bits_per_sample = params.bits_per_sample.unwrap_or(16);
        let native_format = if params.codec == symphonia::core::codecs::CODEC_TYPE_PCM_F32LE
            || params.codec == symphonia::core::codecs::CODEC_TYPE_PCM_F32BE
            || params.codec == symphonia::core::codecs::CODEC_TYPE_PCM_F64LE
            || params.codec == symphonia::core::codecs::CODEC_TYPE_PCM_F64BE
        {
            SampleFormat::Float
        } else {
            SampleFormat::for_bits(bits_per_sample)
        };

        Ok(AudioFile {
            path: path.to_path_buf(),
            format_reader,
            decoder,
            track_id,
            channels,
            sample_rate: params.sample_rate.unwrap_or(44100),
            bits_per_sample,
            frames: params.n_frames,
            native_format,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn bits_per_sample(&self) -> u32 {
        self.bits_per_sample
    }

    /// Length in frames, when the container reports one.
    pub fn frames(&self) -> Option<u64> {
        self.frames
    }

    /// The narrowest block format that holds this file's samples losslessly.
    pub fn native_format(&self) -> SampleFormat {
        self.native_format
    }

    /// Reads up to `len` frames of `channel` beginning at frame `start` into
    /// `dst[dst_start..]`, converting to the buffer's format. Returns the
    /// number of frames read, which is short at the end of the file.
    pub fn read(
        &mut self,
        dst: &mut SampleBuffer,
        dst_start: usize,
        start: u64,
        len: usize,
        channel: usize,
        dither: DitherType,
    ) -> Result<usize> {
        if channel >= self.channels || len == 0 {
            return Ok(0);
        }
        let len = len.min(dst.len().saturating_sub(dst_start));

        match self.format_reader.seek(
            SeekMode::Accurate,
            SeekTo::TimeStamp {
                ts: start,
                track_id: self.track_id,
            },
        ) {
            Ok(_) => self.decoder.reset(),
            Err(SymphoniaError::SeekError(SeekErrorKind::OutOfRange)) => return Ok(0),
            Err(e) => return Err(e.into()),
        }

        let mut read = 0;
        while read < len {
            let Some(packet) = self.next_packet()? else {
                break;
            };
            let packet_ts = packet.ts();
            let decoded = match self.decoder.decode(&packet) {
                Ok(decoded) => decoded,
                Err(SymphoniaError::DecodeError(e)) => {
                    debug!(path = ?self.path, err = e, "Skipping undecodable packet");
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            let chunk = channel_samples(decoded, channel);
            let skip = start.saturating_sub(packet_ts) as usize;
            if skip >= chunk.len() {
                continue;
            }
            let take = (chunk.len() - skip).min(len - read);
            copy_samples(&chunk, skip, dst, dst_start + read, take, dither);
            read += take;
        }
        Ok(read)
    }

    /// Reads the next packet of our track, resetting the decoder when the
    /// stream asks for it. `None` marks the end of the stream.
    fn next_packet(&mut self) -> Result<Option<Packet>> {
        loop {
            match self.format_reader.next_packet() {
                Ok(packet) if packet.track_id() == self.track_id => return Ok(Some(packet)),
                Ok(_) => continue,
                Err(SymphoniaError::ResetRequired) => {
                    self.decoder.reset();
                    continue;
                }
                Err(SymphoniaError::IoError(e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    return Ok(None)
                }
                Err(SymphoniaError::DecodeError(_)) => return Ok(None),
                Err(e) => return Err(e.into()),
            }
        }
    }
}

/// Pulls one channel out of a decoded buffer, keeping 16 and 24-bit integer
/// samples exact.
fn channel_samples(decoded: AudioBufferRef, channel: usize) -> SampleBuffer {
    match decoded {
        AudioBufferRef::S16(buf) => SampleBuffer::Int16(plane(&buf, channel, |s| s)),
        AudioBufferRef::S24(buf) => SampleBuffer::Int24(plane(&buf, channel, |s| s.inner())),
        AudioBufferRef::F32(buf) => SampleBuffer::Float(plane(&buf, channel, |s| s)),
        AudioBufferRef::F64(buf) => SampleBuffer::Float(plane(&buf, channel, |s| s as f32)),
        AudioBufferRef::S8(buf) => SampleBuffer::Float(plane(&buf, channel, scale_s8)),
        AudioBufferRef::S32(buf) => SampleBuffer::Float(plane(&buf, channel, scale_s32)),
        AudioBufferRef::U8(buf) => SampleBuffer::Float(plane(&buf, channel, scale_u8)),
        AudioBufferRef::U16(buf) => SampleBuffer::Float(plane(&buf, channel, scale_u16)),
        AudioBufferRef::U24(buf) => {
            SampleBuffer::Float(plane(&buf, channel, |s| scale_u24(s.inner())))
        }
        AudioBufferRef::U32(buf) => SampleBuffer::Float(plane(&buf, channel, scale_u32)),
    }
}

fn plane<T, U, F>(buf: &AudioBuffer<T>, channel: usize, convert: F) -> Vec<U>
where
    T: Sample,
    F: Fn(T) -> U,
{
    if channel >= buf.spec().channels.count() {
        return Vec::new();
    }
    buf.chan(channel).iter().map(|&s| convert(s)).collect()
}

#[inline]
fn scale_s8(sample: i8) -> f32 {
    sample as f32 / (1i64 << 7) as f32
}

#[inline]
fn scale_s32(sample: i32) -> f32 {
    sample as f32 / (1i64 << 31) as f32
}

#[inline]
fn scale_u8(sample: u8) -> f32 {
    (sample as f32 / u8::MAX as f32) * 2.0 - 1.0
}

#[inline]
fn scale_u16(sample: u16) -> f32 {
    (sample as f32 / u16::MAX as f32) * 2.0 - 1.0
}

#[inline]
fn scale_u24(sample: u32) -> f32 {
    let max = (1u32 << 24) - 1;
    (sample as f32 / max as f32) * 2.0 - 1.0
}

#[inline]
fn scale_u32(sample: u32) -> f32 {
    (sample as f32 / u32::MAX as f32) * 2.0 - 1.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{write_wav, write_wav_with_bits};

    #[test]
    fn test_reads_one_channel_from_offset() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stereo.wav");
        let left: Vec<i16> = (0..1000).map(|i| i as i16).collect();
        let right: Vec<i16> = (0..1000).map(|i| -(i as i16)).collect();
        write_wav(&path, &[left, right], 44100).unwrap();

        let mut file = AudioFile::open(&path).unwrap();
        assert_eq!(file.channels(), 2);
        assert_eq!(file.frames(), Some(1000));
        assert_eq!(file.native_format(), SampleFormat::Int16);

        let mut buf = SampleBuffer::new(SampleFormat::Int16, 100);
        let read = file.read(&mut buf, 0, 500, 100, 1, DitherType::None).unwrap();
        assert_eq!(read, 100);
        match buf {
            SampleBuffer::Int16(samples) => {
                assert_eq!(samples[0], -500);
                assert_eq!(samples[99], -599);
            }
            other => panic!("unexpected buffer {other:?}"),
        }
    }

    #[test]
    fn test_short_read_at_end() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mono.wav");
        write_wav(&path, &[vec![1000i16; 300]], 44100).unwrap();

        let mut file = AudioFile::open(&path).unwrap();
        let mut buf = SampleBuffer::new(SampleFormat::Float, 200);
        let read = file.read(&mut buf, 0, 200, 200, 0, DitherType::None).unwrap();
        assert_eq!(read, 100);
        assert!((buf.get_f32(0) - 1000.0 / 32768.0).abs() < 1e-6);
        assert_eq!(buf.get_f32(150), 0.0);
    }

    #[test]
    fn test_missing_file_is_open_failure() {
        let err = AudioFile::open(Path::new("/nonexistent/audio.wav"))
            .err()
            .unwrap();
        assert!(matches!(
            err,
            StorageError::File {
                cause: FileCause::Open,
                ..
            }
        ));
    }

    #[test]
    fn test_unsigned_scaling() {
        assert_eq!(scale_u8(0), -1.0);
        assert_eq!(scale_u8(u8::MAX), 1.0);
        assert_eq!(scale_s8(-128), -1.0);
    }

    #[test]
    fn test_24_bit_samples_are_exact() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("deep.wav");
        let samples: Vec<i32> = vec![-8388608, -1, 0, 1, 8388607];
        write_wav_with_bits(&path, &[samples.clone()], 48000, 24).unwrap();

        let mut file = AudioFile::open(&path).unwrap();
        assert_eq!(file.native_format(), SampleFormat::Int24);
        assert_eq!(file.sample_rate(), 48000);
        assert_eq!(file.bits_per_sample(), 24);

        let mut buf = SampleBuffer::new(SampleFormat::Int24, 5);
        assert_eq!(file.read(&mut buf, 0, 0, 5, 0, DitherType::None).unwrap(), 5);
        assert_eq!(buf, SampleBuffer::Int24(samples));
    }
}
