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
//! Sample formats and the conversion routines every block reads through.
//!
//! Floating point samples use the range -1.0..=1.0. Integer formats use the
//! full signed range of their width, so -32768 maps to -1.0 and 32767 maps to
//! just below 1.0. Converting +1.0 to an integer therefore clips by one LSB.
use std::fmt;
use std::str::FromStr;

use serde::Deserialize;

mod dither;

pub use self::dither::DitherType;
use self::dither::Ditherer;

const INT16_SCALE: f32 = 32768.0;
const INT24_SCALE: f32 = 8388608.0;
const INT24_MAX: i32 = (1 << 23) - 1;
const INT24_MIN: i32 = -(1 << 23);

/// In-memory sample representations, ordered from narrowest to widest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleFormat {
    Int16,
    /// 24-bit samples held in the low bits of an `i32`.
    Int24,
    Float,
}

impl SampleFormat {
    /// Bytes per sample in memory.
    pub fn sample_size(&self) -> usize {
        match self {
            SampleFormat::Int16 => 2,
            SampleFormat::Int24 | SampleFormat::Float => 4,
        }
    }

    /// Bytes per sample in a block container, where 24-bit samples are packed.
    pub fn disk_sample_size(&self) -> usize {
        match self {
            SampleFormat::Int16 => 2,
            SampleFormat::Int24 => 3,
            SampleFormat::Float => 4,
        }
    }

    /// The narrowest format able to hold `bits` of integer precision.
    pub fn for_bits(bits: u32) -> SampleFormat {
        if bits <= 16 {
            SampleFormat::Int16
        } else if bits <= 24 {
            SampleFormat::Int24
        } else {
            SampleFormat::Float
        }
    }
}

impl fmt::Display for SampleFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SampleFormat::Int16 => "16-bit PCM",
            SampleFormat::Int24 => "24-bit PCM",
            SampleFormat::Float => "32-bit float",
        };
        f.write_str(name)
    }
}

impl FromStr for SampleFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "int16" | "16" => Ok(SampleFormat::Int16),
            "int24" | "24" => Ok(SampleFormat::Int24),
            "float" | "float32" | "32" => Ok(SampleFormat::Float),
            _ => Err(format!("Unknown sample format: {}", s)),
        }
    }
}

/// An owned, typed run of mono samples.
#[derive(Debug, Clone, PartialEq)]
pub enum SampleBuffer {
    Int16(Vec<i16>),
    Int24(Vec<i32>),
    Float(Vec<f32>),
}

impl SampleBuffer {
    /// A zeroed buffer of `len` samples.
    pub fn new(format: SampleFormat, len: usize) -> Self {
        match format {
            SampleFormat::Int16 => SampleBuffer::Int16(vec![0; len]),
            SampleFormat::Int24 => SampleBuffer::Int24(vec![0; len]),
            SampleFormat::Float => SampleBuffer::Float(vec![0.0; len]),
        }
    }

    pub fn format(&self) -> SampleFormat {
        match self {
            SampleBuffer::Int16(_) => SampleFormat::Int16,
            SampleBuffer::Int24(_) => SampleFormat::Int24,
            SampleBuffer::Float(_) => SampleFormat::Float,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            SampleBuffer::Int16(v) => v.len(),
            SampleBuffer::Int24(v) => v.len(),
            SampleBuffer::Float(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Grows or shrinks the buffer, zero-filling new samples.
    pub fn resize(&mut self, len: usize) {
        match self {
            SampleBuffer::Int16(v) => v.resize(len, 0),
            SampleBuffer::Int24(v) => v.resize(len, 0),
            SampleBuffer::Float(v) => v.resize(len, 0.0),
        }
    }

    /// Sample `index` scaled to -1.0..=1.0.
    pub fn get_f32(&self, index: usize) -> f32 {
        match self {
            SampleBuffer::Int16(v) => v[index] as f32 / INT16_SCALE,
            SampleBuffer::Int24(v) => v[index] as f32 / INT24_SCALE,
            SampleBuffer::Float(v) => v[index],
        }
    }

    /// The samples of `start..start + len` converted to float.
    pub fn to_f32(&self, start: usize, len: usize) -> Vec<f32> {
        (start..start + len).map(|i| self.get_f32(i)).collect()
    }

    pub fn as_f32(&self) -> Option<&[f32]> {
        match self {
            SampleBuffer::Float(v) => Some(v),
            _ => None,
        }
    }

    /// Takes ownership of float samples, converting any other format.
    pub fn into_f32(self) -> Vec<f32> {
        match self {
            SampleBuffer::Float(v) => v,
            other => other.to_f32(0, other.len()),
        }
    }

    /// True if every sample in `start..start + len` is zero.
    pub fn is_silent(&self, start: usize, len: usize) -> bool {
        match self {
            SampleBuffer::Int16(v) => v[start..start + len].iter().all(|s| *s == 0),
            SampleBuffer::Int24(v) => v[start..start + len].iter().all(|s| *s == 0),
            SampleBuffer::Float(v) => v[start..start + len].iter().all(|s| *s == 0.0),
        }
    }
}

/// Zeroes `len` samples starting at `start`, clamped to the buffer.
pub fn clear_samples(dst: &mut SampleBuffer, start: usize, len: usize) {
    let end = (start + len).min(dst.len());
    let start = start.min(end);
    match dst {
        SampleBuffer::Int16(v) => v[start..end].fill(0),
        SampleBuffer::Int24(v) => v[start..end].fill(0),
        SampleBuffer::Float(v) => v[start..end].fill(0.0),
    }
}

/// Copies `len` samples from `src[src_start..]` into `dst[dst_start..]`,
/// converting between formats and dithering narrowing conversions.
pub fn copy_samples(
    src: &SampleBuffer,
    src_start: usize,
    dst: &mut SampleBuffer,
    dst_start: usize,
    len: usize,
    dither: DitherType,
) {
    copy_samples_strided(src, src_start, 1, dst, dst_start, 1, len, dither);
}

/// [`copy_samples`] without dithering.
pub fn copy_samples_no_dither(
    src: &SampleBuffer,
    src_start: usize,
    dst: &mut SampleBuffer,
    dst_start: usize,
    len: usize,
) {
    copy_samples(src, src_start, dst, dst_start, len, DitherType::None);
}

/// Copies `len` samples, stepping `src_stride` and `dst_stride` samples
/// between frames so interleaved channels can be read or written.
#[allow(clippy::too_many_arguments)]
pub fn copy_samples_strided(
    src: &SampleBuffer,
    src_start: usize,
    src_stride: usize,
    dst: &mut SampleBuffer,
    dst_start: usize,
    dst_stride: usize,
    len: usize,
    dither: DitherType,
) {
    let mut ditherer = Ditherer::new(dither);
    for i in 0..len {
        let s = src_start + i * src_stride;
        let d = dst_start + i * dst_stride;
        match (src, &mut *dst) {
            (SampleBuffer::Int16(src), SampleBuffer::Int16(dst)) => dst[d] = src[s],
            (SampleBuffer::Int24(src), SampleBuffer::Int24(dst)) => dst[d] = src[s],
            (SampleBuffer::Float(src), SampleBuffer::Float(dst)) => dst[d] = src[s],
            (SampleBuffer::Int16(src), SampleBuffer::Int24(dst)) => dst[d] = (src[s] as i32) << 8,
            (SampleBuffer::Int16(src), SampleBuffer::Float(dst)) => {
                dst[d] = src[s] as f32 / INT16_SCALE
            }
            (SampleBuffer::Int24(src), SampleBuffer::Float(dst)) => {
                dst[d] = src[s] as f32 / INT24_SCALE
            }
            (SampleBuffer::Int24(src), SampleBuffer::Int16(dst)) => {
                dst[d] = if dither == DitherType::None {
                    (src[s] >> 8) as i16
                } else {
                    ditherer.to_int(src[s] as f32 / INT24_SCALE, INT16_SCALE) as i16
                }
            }
            (SampleBuffer::Float(src), SampleBuffer::Int16(dst)) => {
                dst[d] = ditherer.to_int(src[s], INT16_SCALE) as i16
            }
            (SampleBuffer::Float(src), SampleBuffer::Int24(dst)) => {
                dst[d] = ditherer.to_int(src[s], INT24_SCALE)
            }
        }
    }
}

/// Clamps a scaled value into the integer range implied by `scale`.
fn clamp_to_int(value: f32, scale: f32) -> i32 {
    let (min, max) = if scale == INT16_SCALE {
        (i16::MIN as i32, i16::MAX as i32)
    } else {
        (INT24_MIN, INT24_MAX)
    };
    (value.round() as i64).clamp(min as i64, max as i64) as i32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_strings() {
        assert_eq!(SampleFormat::Int16.to_string(), "16-bit PCM");
        assert_eq!(SampleFormat::Int24.to_string(), "24-bit PCM");
        assert_eq!(SampleFormat::Float.to_string(), "32-bit float");
        assert_eq!("int24".parse::<SampleFormat>(), Ok(SampleFormat::Int24));
        assert!("int8".parse::<SampleFormat>().is_err());
        assert!(SampleFormat::Int16 < SampleFormat::Float);
    }

    #[test]
    fn test_sizes() {
        assert_eq!(SampleFormat::Int24.sample_size(), 4);
        assert_eq!(SampleFormat::Int24.disk_sample_size(), 3);
        assert_eq!(SampleFormat::for_bits(16), SampleFormat::Int16);
        assert_eq!(SampleFormat::for_bits(20), SampleFormat::Int24);
        assert_eq!(SampleFormat::for_bits(32), SampleFormat::Float);
    }

    #[test]
    fn test_copy_same_format_is_exact() {
        let src = SampleBuffer::Int16((0..100).collect());
        let mut dst = SampleBuffer::new(SampleFormat::Int16, 100);
        copy_samples(&src, 0, &mut dst, 0, 100, DitherType::Shaped);
        assert_eq!(src, dst);
    }

    #[test]
    fn test_widening_conversions() {
        let src = SampleBuffer::Int16(vec![-32768, 0, 16384]);
        let mut float = SampleBuffer::new(SampleFormat::Float, 3);
        copy_samples_no_dither(&src, 0, &mut float, 0, 3);
        assert_eq!(float, SampleBuffer::Float(vec![-1.0, 0.0, 0.5]));

        let mut int24 = SampleBuffer::new(SampleFormat::Int24, 3);
        copy_samples_no_dither(&src, 0, &mut int24, 0, 3);
        assert_eq!(int24, SampleBuffer::Int24(vec![-8388608, 0, 4194304]));
    }

    #[test]
    fn test_float_to_int16_clips() {
        let src = SampleBuffer::Float(vec![-1.0, 1.0, 0.5, 2.0]);
        let mut dst = SampleBuffer::new(SampleFormat::Int16, 4);
        copy_samples_no_dither(&src, 0, &mut dst, 0, 4);
        assert_eq!(dst, SampleBuffer::Int16(vec![-32768, 32767, 16384, 32767]));
    }

    #[test]
    fn test_int24_to_int16_truncates() {
        let src = SampleBuffer::Int24(vec![INT24_MAX, INT24_MIN, 255]);
        let mut dst = SampleBuffer::new(SampleFormat::Int16, 3);
        copy_samples_no_dither(&src, 0, &mut dst, 0, 3);
        assert_eq!(dst, SampleBuffer::Int16(vec![32767, -32768, 0]));
    }

    #[test]
    fn test_dithered_copy_stays_close() {
        let src = SampleBuffer::Float((0..1000).map(|i| (i as f32 / 1000.0) - 0.5).collect());
        for dither in [DitherType::Rectangle, DitherType::Triangle, DitherType::Shaped] {
            let mut dst = SampleBuffer::new(SampleFormat::Int16, 1000);
            copy_samples(&src, 0, &mut dst, 0, 1000, dither);
            for i in 0..1000 {
                let diff = (dst.get_f32(i) - src.get_f32(i)).abs();
                assert!(diff < 16.0 / INT16_SCALE, "{dither:?} drifted by {diff}");
            }
        }
    }

    #[test]
    fn test_strided_copy_extracts_channel() {
        let interleaved = SampleBuffer::Float(vec![0.1, 0.9, 0.2, 0.8, 0.3, 0.7]);
        let mut right = SampleBuffer::new(SampleFormat::Float, 3);
        copy_samples_strided(&interleaved, 1, 2, &mut right, 0, 1, 3, DitherType::None);
        assert_eq!(right, SampleBuffer::Float(vec![0.9, 0.8, 0.7]));
    }

    #[test]
    fn test_clear_is_clamped() {
        let mut buf = SampleBuffer::Int24(vec![1, 4, 3, 2, 5]);
        clear_samples(&mut buf, 3, 10);
        assert_eq!(buf, SampleBuffer::Int24(vec![1, 4, 3, 0, 0]));
        assert!(buf.is_silent(3, 2));
        assert!(!buf.is_silent(0, 2));
    }
}
