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
//! Two-tier min/max/RMS summaries.
//!
//! A summary buffer starts with a 20 byte tag, followed by one float triple
//! per 65536 samples and then one triple per 256 samples. The 256 level is
//! always allocated in whole groups of 256 triples so every 64K triple has a
//! complete set of children; unused children hold values that cannot affect a
//! min/max rollup.

/// Tag written at the start of every summary.
pub const HEADER_TAG: &[u8; 20] = b"AudacityBlockFile112";

/// Placeholder peak reported while a summary is still being computed.
pub const JUST_BELOW_MAX_AUDIO: f32 = 1.0 - 1.0 / (1 << 15) as f32;

/// Placeholder RMS reported while a summary is still being computed.
pub const PLACEHOLDER_RMS: f32 = 0.707;

const FLOAT_SIZE: usize = 4;

/// Min, max and RMS of a run of samples.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MinMaxRms {
    pub min: f32,
    pub max: f32,
    pub rms: f32,
}

impl MinMaxRms {
    pub fn new(min: f32, max: f32, rms: f32) -> Self {
        MinMaxRms { min, max, rms }
    }

    /// The statistics reported for blocks whose summary is not ready yet.
    pub fn placeholder() -> Self {
        MinMaxRms::new(-JUST_BELOW_MAX_AUDIO, JUST_BELOW_MAX_AUDIO, PLACEHOLDER_RMS)
    }

    /// Scans `samples` directly.
    pub fn of_samples(samples: &[f32]) -> Self {
        let mut min = f32::MAX;
        let mut max = -f32::MAX;
        let mut sumsq = 0.0f64;
        for &sample in samples {
            min = min.min(sample);
            max = max.max(sample);
            sumsq += (sample as f64) * (sample as f64);
        }
        let rms = if samples.is_empty() {
            0.0
        } else {
            (sumsq / samples.len() as f64).sqrt() as f32
        };
        MinMaxRms::new(min, max, rms)
    }
}

/// Byte layout of the summary for a block of a given length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SummaryInfo {
    pub fields: usize,
    pub bytes_per_frame: usize,
    pub frames64k: usize,
    pub offset64k: usize,
    pub frames256: usize,
    pub offset256: usize,
    pub total_summary_bytes: usize,
}

impl SummaryInfo {
    pub fn new(samples: usize) -> Self {
        let fields = 3;
        let bytes_per_frame = FLOAT_SIZE * fields;
        let frames64k = samples.div_ceil(65536);
        let frames256 = frames64k * 256;
        let offset64k = HEADER_TAG.len();
        let offset256 = offset64k + frames64k * bytes_per_frame;
        let total_summary_bytes = offset256 + frames256 * bytes_per_frame;
        SummaryInfo {
            fields,
            bytes_per_frame,
            frames64k,
            offset64k,
            frames256,
            offset256,
            total_summary_bytes,
        }
    }

    /// A summary buffer holding only the tag and zeroes.
    pub fn empty_summary(&self) -> Vec<u8> {
        let mut data = vec![0u8; self.total_summary_bytes];
        data[..HEADER_TAG.len()].copy_from_slice(HEADER_TAG);
        data
    }
}

/// A computed summary and the whole-block statistics derived with it.
#[derive(Debug, Clone)]
pub struct Summary {
    pub data: Vec<u8>,
    pub stats: MinMaxRms,
}

/// Computes both summary levels and the block statistics from float samples.
///
/// The last 256 group may be partial; its shortfall is subtracted from the
/// divisor of the last 64K group, which otherwise counts only the children
/// that hold samples. The block RMS is taken straight from the accumulated
/// squares rather than from the rolled-up levels.
pub fn calc_summary(samples: &[f32], info: &SummaryInfo) -> Summary {
    let len = samples.len();
    let mut summary256 = vec![0.0f32; info.frames256 * 3];
    let mut summary64k = vec![0.0f32; info.frames64k * 3];

    let mut total_squares = 0.0f64;
    let mut fraction = 0.0f64;
    let mut summaries: i64 = 256;

    let groups256 = len.div_ceil(256);
    for i in 0..groups256 {
        let base = i * 256;
        let mut min = samples[base];
        let mut max = samples[base];
        let mut sumsq = min * min;
        let mut jcount = 256;
        if jcount > len - base {
            jcount = len - base;
            fraction = 1.0 - (jcount as f64 / 256.0);
        }
        for &sample in &samples[base + 1..base + jcount] {
            sumsq += sample * sample;
            if sample < min {
                min = sample;
            } else if sample > max {
                max = sample;
            }
        }
        total_squares += sumsq as f64;
        summary256[i * 3] = min;
        summary256[i * 3 + 1] = max;
        summary256[i * 3 + 2] = (sumsq / jcount as f32).sqrt();
    }
    for i in groups256..info.frames256 {
        summaries -= 1;
        summary256[i * 3] = f32::MAX;
        summary256[i * 3 + 1] = -f32::MAX;
        summary256[i * 3 + 2] = 0.0;
    }

    let rms = if len == 0 {
        0.0
    } else {
        (total_squares / len as f64).sqrt() as f32
    };

    let groups64k = len.div_ceil(65536);
    for i in 0..groups64k {
        let first = i * 256 * 3;
        let mut min = summary256[first];
        let mut max = summary256[first + 1];
        let mut sumsq = summary256[first + 2] * summary256[first + 2];
        for j in 1..256 {
            let at = (i * 256 + j) * 3;
            if summary256[at] < min {
                min = summary256[at];
            }
            if summary256[at + 1] > max {
                max = summary256[at + 1];
            }
            sumsq += summary256[at + 2] * summary256[at + 2];
        }
        let denom = if i + 1 < groups64k {
            256.0
        } else {
            summaries as f64 - fraction
        };
        summary64k[i * 3] = min;
        summary64k[i * 3 + 1] = max;
        summary64k[i * 3 + 2] = (sumsq as f64 / denom).sqrt() as f32;
    }

    let (mut min, mut max) = if groups64k > 0 {
        (summary64k[0], summary64k[1])
    } else {
        (0.0, 0.0)
    };
    for i in 1..groups64k {
        min = min.min(summary64k[i * 3]);
        max = max.max(summary64k[i * 3 + 1]);
    }

    let mut data = info.empty_summary();
    write_floats(&mut data[info.offset64k..], &summary64k);
    write_floats(&mut data[info.offset256..], &summary256);

    Summary {
        data,
        stats: MinMaxRms::new(min, max, rms),
    }
}

/// Repairs a summary written with the other byte order.
///
/// The first 64K triple must agree with the min/max of its first 256
/// children and every child must be plausible. If not, the buffer is swapped
/// as 32-bit words and checked again; if that does not help either, the
/// original bytes are restored and accepted as they are.
pub fn fix_summary(data: &mut [u8], info: &SummaryInfo) {
    if info.fields != 3 || data.len() < info.total_summary_bytes || info.frames64k == 0 {
        return;
    }

    if summary_is_consistent(data, info) {
        return;
    }

    swap_words(&mut data[..info.total_summary_bytes]);
    if !summary_is_consistent(data, info) {
        swap_words(&mut data[..info.total_summary_bytes]);
    }
}

fn summary_is_consistent(data: &[u8], info: &SummaryInfo) -> bool {
    let (min, max, bad) = min_max_256(&data[info.offset256..]);
    let first = read_frame(data, info.offset64k, 0);
    bad == 0 && min == first.min && max == first.max
}

fn min_max_256(summary256: &[u8]) -> (f32, f32, usize) {
    let mut min = 1.0f32;
    let mut max = -1.0f32;
    let mut bad = 0;
    for i in 0..256 {
        let frame = read_frame(summary256, 0, i);
        if frame.min < min {
            min = frame.min;
        } else if !(frame.min >= min) {
            bad += 1;
        }
        if frame.max > max {
            max = frame.max;
        } else if !(frame.max <= max) {
            bad += 1;
        }
        if frame.rms.is_nan() {
            bad += 1;
        }
        if frame.rms < -1.0 || frame.rms > 1.0 {
            bad += 1;
        }
    }
    (min, max, bad)
}

fn swap_words(data: &mut [u8]) {
    for word in data.chunks_exact_mut(4) {
        word.reverse();
    }
}

fn write_floats(dst: &mut [u8], values: &[f32]) {
    for (chunk, value) in dst.chunks_exact_mut(FLOAT_SIZE).zip(values) {
        chunk.copy_from_slice(&value.to_ne_bytes());
    }
}

fn read_float(data: &[u8], at: usize) -> f32 {
    let mut bytes = [0u8; FLOAT_SIZE];
    bytes.copy_from_slice(&data[at..at + FLOAT_SIZE]);
    f32::from_ne_bytes(bytes)
}

/// Reads triple `index` of the level starting at `offset`.
pub fn read_frame(data: &[u8], offset: usize, index: usize) -> MinMaxRms {
    let at = offset + index * 3 * FLOAT_SIZE;
    MinMaxRms::new(
        read_float(data, at),
        read_float(data, at + FLOAT_SIZE),
        read_float(data, at + 2 * FLOAT_SIZE),
    )
}

/// Copies a window of one summary level into `out`.
///
/// `start` and `len` are clamped to the level's `frames`; the number of
/// frames copied is returned. Two-field summaries (no stored RMS) get an
/// approximate RMS of `(|min| + |max|) / 4`.
pub fn read_window(
    data: &[u8],
    info: &SummaryInfo,
    offset: usize,
    frames: usize,
    start: usize,
    len: usize,
    out: &mut [MinMaxRms],
) -> usize {
    let start = start.min(frames);
    let len = len.min(frames - start).min(out.len());
    let field_bytes = info.fields * FLOAT_SIZE;
    for (i, slot) in out.iter_mut().take(len).enumerate() {
        let at = offset + (start + i) * field_bytes;
        let min = read_float(data, at);
        let max = read_float(data, at + FLOAT_SIZE);
        let rms = if info.fields == 2 {
            (min.abs() + max.abs()) / 4.0
        } else {
            read_float(data, at + 2 * FLOAT_SIZE)
        };
        *slot = MinMaxRms::new(min, max, rms);
    }
    len
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| -1.0 + 2.0 * i as f32 / (len - 1) as f32)
            .collect()
    }

    #[test]
    fn test_summary_info_layout() {
        let info = SummaryInfo::new(65536 + 1);
        assert_eq!(info.frames64k, 2);
        assert_eq!(info.frames256, 512);
        assert_eq!(info.offset64k, 20);
        assert_eq!(info.offset256, 20 + 2 * 12);
        assert_eq!(info.total_summary_bytes, 20 + 2 * 12 + 512 * 12);

        let empty = SummaryInfo::new(0);
        assert_eq!(empty.frames64k, 0);
        assert_eq!(empty.total_summary_bytes, 20);
    }

    #[test]
    fn test_ramp_statistics() {
        let samples = ramp(40001);
        let info = SummaryInfo::new(samples.len());
        let summary = calc_summary(&samples, &info);
        assert_eq!(summary.stats.min, -1.0);
        assert_eq!(summary.stats.max, 1.0);
        assert!((summary.stats.rms - 0.577365).abs() < 1e-5);
        assert_eq!(&summary.data[..20], HEADER_TAG);
    }

    #[test]
    fn test_partial_group_boundaries() {
        let samples = ramp(40001);
        let info = SummaryInfo::new(samples.len());
        let summary = calc_summary(&samples, &info);

        let first = read_frame(&summary.data, info.offset256, 0);
        assert_eq!(first.min, -1.0);

        let last_group = samples.len().div_ceil(256) - 1;
        let last = read_frame(&summary.data, info.offset256, last_group);
        assert_eq!(last.max, 1.0);

        let padding = read_frame(&summary.data, info.offset256, last_group + 1);
        assert_eq!(padding, MinMaxRms::new(f32::MAX, -f32::MAX, 0.0));

        let top = read_frame(&summary.data, info.offset64k, 0);
        assert_eq!(top.min, -1.0);
        assert_eq!(top.max, 1.0);
    }

    #[test]
    fn test_rollup_matches_direct_rms() {
        // 300 samples: one full 256 group plus a 44 sample tail.
        let samples: Vec<f32> = (0..300).map(|i| if i < 256 { 0.5 } else { 0.25 }).collect();
        let info = SummaryInfo::new(samples.len());
        let summary = calc_summary(&samples, &info);
        let top = read_frame(&summary.data, info.offset64k, 0);
        let direct = MinMaxRms::of_samples(&samples);
        assert!((summary.stats.rms - direct.rms).abs() < 1e-6);
        // Two present children; the 44 sample tail counts as 44/256 of one.
        let expected = ((0.25f64 + 0.0625) / (2.0 - (1.0 - 44.0 / 256.0))).sqrt() as f32;
        assert!((top.rms - expected).abs() < 1e-6);
    }

    #[test]
    fn test_empty_block() {
        let info = SummaryInfo::new(0);
        let summary = calc_summary(&[], &info);
        assert_eq!(summary.stats, MinMaxRms::default());
        assert_eq!(summary.data.len(), 20);
    }

    #[test]
    fn test_fix_summary_swaps_foreign_order() {
        let samples = ramp(1000);
        let info = SummaryInfo::new(samples.len());
        let good = calc_summary(&samples, &info).data;

        let mut foreign = good.clone();
        swap_words(&mut foreign);
        assert_ne!(foreign, good);
        fix_summary(&mut foreign, &info);
        assert_eq!(foreign, good);

        let mut untouched = good.clone();
        fix_summary(&mut untouched, &info);
        assert_eq!(untouched, good);
    }

    #[test]
    fn test_fix_summary_keeps_garbage() {
        let info = SummaryInfo::new(1000);
        let mut garbage = info.empty_summary();
        for (i, byte) in garbage.iter_mut().enumerate().skip(20) {
            *byte = (i * 37 % 251) as u8;
        }
        let before = garbage.clone();
        fix_summary(&mut garbage, &info);
        assert_eq!(garbage, before);
    }

    #[test]
    fn test_read_window_clamps() {
        let samples = ramp(1000);
        let info = SummaryInfo::new(samples.len());
        let summary = calc_summary(&samples, &info);
        let mut out = vec![MinMaxRms::default(); 10];
        let read = read_window(
            &summary.data,
            &info,
            info.offset256,
            info.frames256,
            info.frames256 - 2,
            10,
            &mut out,
        );
        assert_eq!(read, 2);
        assert_eq!(out[0].min, f32::MAX);
    }

    #[test]
    fn test_read_window_two_fields() {
        let info = SummaryInfo {
            fields: 2,
            bytes_per_frame: 8,
            ..SummaryInfo::new(256)
        };
        let mut data = vec![0u8; 20 + 8];
        write_floats(&mut data[20..], &[-0.5, 0.25]);
        let mut out = [MinMaxRms::default()];
        read_window(&data, &info, 20, 1, 0, 1, &mut out);
        assert_eq!(out[0], MinMaxRms::new(-0.5, 0.25, 0.1875));
    }
}
