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

use std::{any::TypeId, error::Error, fs::File, path::Path};

use hound::{SampleFormat, WavSpec, WavWriter};

/// Writes one vector per channel as an interleaved WAV file. `i16` samples
/// are written as 16-bit, `i32` as 24-bit and `f32` as 32-bit float.
pub fn write_wav<S: hound::Sample + Copy + Default + 'static>(
    path: &Path,
    channels: &[Vec<S>],
    sample_rate: u32,
) -> Result<(), Box<dyn Error>> {
    let bits = if TypeId::of::<S>() == TypeId::of::<i16>() {
        16
    } else if TypeId::of::<S>() == TypeId::of::<i32>() {
        24
    } else {
        32
    };
    write_wav_with_bits(path, channels, sample_rate, bits)
}

pub fn write_wav_with_bits<S: hound::Sample + Copy + Default + 'static>(
    path: &Path,
    channels: &[Vec<S>],
    sample_rate: u32,
    bits_per_sample: u16,
) -> Result<(), Box<dyn Error>> {
    let sample_format = if TypeId::of::<S>() == TypeId::of::<f32>() {
        SampleFormat::Float
    } else if TypeId::of::<S>() == TypeId::of::<i32>() || TypeId::of::<S>() == TypeId::of::<i16>()
    {
        SampleFormat::Int
    } else {
        return Err("Unsupported sample format".into());
    };

    let num_channels = channels.len();
    assert!(num_channels <= u16::MAX.into(), "Too many channels!");
    let mut writer = WavWriter::new(
        File::create(path)?,
        WavSpec {
            channels: num_channels as u16,
            sample_rate,
            bits_per_sample,
            sample_format,
        },
    )?;

    let frames = channels.iter().map(Vec::len).max().unwrap_or(0);
    for frame in 0..frames {
        for channel in channels {
            writer.write_sample(channel.get(frame).copied().unwrap_or_default())?;
        }
    }
    writer.finalize()?;

    Ok(())
}

/// `len` float samples rising linearly from `from` to `to` inclusive.
pub fn ramp(len: usize, from: f32, to: f32) -> Vec<f32> {
    if len < 2 {
        return vec![from; len];
    }
    let step = (to as f64 - from as f64) / (len - 1) as f64;
    (0..len)
        .map(|i| {
            if i == len - 1 {
                to
            } else {
                (from as f64 + step * i as f64) as f32
            }
        })
        .collect()
}
