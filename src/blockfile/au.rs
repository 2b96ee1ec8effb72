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
//! The `.au` container simple blocks are stored in.
//!
//! Six native-endian `u32` header fields, then the summary, then the samples.
//! A reader on a machine of the other byte order sees a swapped magic and
//! swaps everything after it.
use std::fs::File;
use std::io::{self, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::format::{copy_samples, DitherType, SampleBuffer, SampleFormat};
use crate::summary::SummaryInfo;

pub(crate) const AU_MAGIC: u32 = 0x2e736e64;
pub(crate) const AU_HEADER_LEN: usize = 24;

const AU_SAMPLE_FORMAT_16: u32 = 3;
const AU_SAMPLE_FORMAT_24: u32 = 4;
const AU_SAMPLE_FORMAT_FLOAT: u32 = 6;

const DATA_SIZE_UNSPECIFIED: u32 = 0xffff_ffff;
const SAMPLE_RATE: u32 = 44100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct AuHeader {
    pub data_offset: u32,
    pub encoding: u32,
    pub swapped: bool,
}

impl AuHeader {
    /// Unknown encodings are read as float, which loses nothing.
    pub fn format(&self) -> SampleFormat {
        match self.encoding {
            AU_SAMPLE_FORMAT_16 => SampleFormat::Int16,
            AU_SAMPLE_FORMAT_24 => SampleFormat::Int24,
            _ => SampleFormat::Float,
        }
    }
}

fn encoding_for(format: SampleFormat) -> u32 {
    match format {
        SampleFormat::Int16 => AU_SAMPLE_FORMAT_16,
        SampleFormat::Int24 => AU_SAMPLE_FORMAT_24,
        SampleFormat::Float => AU_SAMPLE_FORMAT_FLOAT,
    }
}

fn header_bytes(info: &SummaryInfo, format: SampleFormat) -> Vec<u8> {
    let fields = [
        AU_MAGIC,
        (AU_HEADER_LEN + info.total_summary_bytes) as u32,
        DATA_SIZE_UNSPECIFIED,
        encoding_for(format),
        SAMPLE_RATE,
        1,
    ];
    fields.iter().flat_map(|f| f.to_ne_bytes()).collect()
}

/// Writes a complete container.
pub(crate) fn write(
    path: &Path,
    info: &SummaryInfo,
    summary: &[u8],
    samples: &SampleBuffer,
) -> io::Result<()> {
    let mut out = BufWriter::new(File::create(path)?);
    out.write_all(&header_bytes(info, samples.format()))?;
    out.write_all(&summary[..info.total_summary_bytes])?;
    out.write_all(&encode_samples(samples))?;
    out.flush()
}

/// Writes a 16-bit container of `len` zero samples with a zeroed summary.
pub(crate) fn write_silence(path: &Path, info: &SummaryInfo, len: usize) -> io::Result<()> {
    let mut out = BufWriter::new(File::create(path)?);
    out.write_all(&header_bytes(info, SampleFormat::Int16))?;
    out.write_all(&vec![0u8; info.total_summary_bytes])?;
    out.write_all(&vec![0u8; len * SampleFormat::Int16.disk_sample_size()])?;
    out.flush()
}

pub(crate) fn read_header(file: &mut File) -> io::Result<AuHeader> {
    let mut bytes = [0u8; AU_HEADER_LEN];
    file.read_exact(&mut bytes)?;
    let field = |i: usize| {
        let mut word = [0u8; 4];
        word.copy_from_slice(&bytes[i * 4..i * 4 + 4]);
        u32::from_ne_bytes(word)
    };
    let swapped = field(0) != AU_MAGIC;
    let fix = |v: u32| if swapped { v.swap_bytes() } else { v };
    Ok(AuHeader {
        data_offset: fix(field(1)),
        encoding: fix(field(3)),
        swapped,
    })
}

/// Reads the summary stored after the header.
pub(crate) fn read_summary(path: &Path, info: &SummaryInfo) -> io::Result<Vec<u8>> {
    let mut file = File::open(path)?;
    file.seek(SeekFrom::Start(AU_HEADER_LEN as u64))?;
    let mut data = vec![0u8; info.total_summary_bytes];
    file.read_exact(&mut data)?;
    Ok(data)
}

/// Reads up to `len` samples from `start` into the front of `dst`. Returns
/// the number read, which is short if the file is.
pub(crate) fn read_samples(
    path: &Path,
    start: usize,
    len: usize,
    dst: &mut SampleBuffer,
    dither: DitherType,
) -> io::Result<usize> {
    let mut file = File::open(path)?;
    let header = read_header(&mut file)?;
    let format = header.format();
    let size = format.disk_sample_size();

    file.seek(SeekFrom::Start(
        header.data_offset as u64 + (start * size) as u64,
    ))?;
    let mut bytes = Vec::with_capacity(len * size);
    file.take((len * size) as u64).read_to_end(&mut bytes)?;

    let samples = decode_samples(&bytes, format, header.swapped);
    let read = samples.len().min(len);
    copy_samples(&samples, 0, dst, 0, read, dither);
    Ok(read)
}

/// The sample format and length of a container, read from its header and
/// size.
pub(crate) fn describe(path: &Path) -> io::Result<(SampleFormat, usize)> {
    let mut file = File::open(path)?;
    let header = read_header(&mut file)?;
    let format = header.format();
    let file_len = file.metadata()?.len();
    let data_len = file_len.saturating_sub(header.data_offset as u64) as usize;
    Ok((format, data_len / format.disk_sample_size()))
}

fn encode_samples(samples: &SampleBuffer) -> Vec<u8> {
    match samples {
        SampleBuffer::Int16(v) => v.iter().flat_map(|s| s.to_ne_bytes()).collect(),
        SampleBuffer::Int24(v) => v.iter().flat_map(|&s| pack24(s)).collect(),
        SampleBuffer::Float(v) => v.iter().flat_map(|s| s.to_ne_bytes()).collect(),
    }
}

fn decode_samples(bytes: &[u8], format: SampleFormat, swapped: bool) -> SampleBuffer {
    match format {
        SampleFormat::Int16 => SampleBuffer::Int16(
            bytes
                .chunks_exact(2)
                .map(|b| {
                    let s = i16::from_ne_bytes([b[0], b[1]]);
                    if swapped {
                        s.swap_bytes()
                    } else {
                        s
                    }
                })
                .collect(),
        ),
        SampleFormat::Int24 => SampleBuffer::Int24(
            bytes
                .chunks_exact(3)
                .map(|b| {
                    if swapped {
                        unpack24([b[2], b[1], b[0]])
                    } else {
                        unpack24([b[0], b[1], b[2]])
                    }
                })
                .collect(),
        ),
        SampleFormat::Float => SampleBuffer::Float(
            bytes
                .chunks_exact(4)
                .map(|b| {
                    let bits = u32::from_ne_bytes([b[0], b[1], b[2], b[3]]);
                    f32::from_bits(if swapped { bits.swap_bytes() } else { bits })
                })
                .collect(),
        ),
    }
}

/// The low three bytes of a 24-bit sample in native order.
fn pack24(sample: i32) -> [u8; 3] {
    if cfg!(target_endian = "little") {
        let b = sample.to_le_bytes();
        [b[0], b[1], b[2]]
    } else {
        let b = sample.to_be_bytes();
        [b[1], b[2], b[3]]
    }
}

fn unpack24(b: [u8; 3]) -> i32 {
    let (lo, mid, hi) = if cfg!(target_endian = "little") {
        (b[0], b[1], b[2])
    } else {
        (b[2], b[1], b[0])
    };
    // Sign-extend from bit 23.
    (i32::from_le_bytes([lo, mid, hi, 0]) << 8) >> 8
}
