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
use std::{error::Error, fs, path::Path};

const SAMPLE_RATE_44100: u8 = 0b1001;
const BLOCK_SIZE_8_BIT: u8 = 0b0110;
const MONO_16_BIT: u8 = 0b0000_1000;
const VERBATIM_SUBFRAME: u8 = 0b0000_0010;

/// Writes mono 16-bit samples at 44.1kHz as a FLAC file of uncompressed
/// (verbatim) frames holding `block_size` samples each.
pub fn write_flac(path: &Path, samples: &[i16], block_size: usize) -> Result<(), Box<dyn Error>> {
    if !(16..=256).contains(&block_size) {
        return Err("FLAC block size must be between 16 and 256".into());
    }
    if samples.len().div_ceil(block_size) > 128 {
        return Err("Too many FLAC frames".into());
    }

    let mut out = Vec::new();
    out.extend_from_slice(b"fLaC");
    // The only (and so last) metadata block: STREAMINFO, 34 bytes.
    out.extend_from_slice(&[0x80, 0, 0, 34]);
    out.extend_from_slice(&(block_size as u16).to_be_bytes());
    out.extend_from_slice(&(block_size as u16).to_be_bytes());
    out.extend_from_slice(&[0; 6]);
    let packed = (44100u64 << 44) | (15u64 << 36) | samples.len() as u64;
    out.extend_from_slice(&packed.to_be_bytes());
    out.extend_from_slice(&[0; 16]);

    for (number, block) in samples.chunks(block_size).enumerate() {
        let start = out.len();
        out.extend_from_slice(&[
            0xFF,
            0xF8,
            (BLOCK_SIZE_8_BIT << 4) | SAMPLE_RATE_44100,
            MONO_16_BIT,
            number as u8,
            (block.len() - 1) as u8,
        ]);
        out.push(crc8(&out[start..]));
        out.push(VERBATIM_SUBFRAME);
        for sample in block {
            out.extend_from_slice(&sample.to_be_bytes());
        }
        let crc = crc16(&out[start..]);
        out.extend_from_slice(&crc.to_be_bytes());
    }

    fs::write(path, out)?;
    Ok(())
}

/// Bytes taken by one full frame written by [`write_flac`].
pub fn flac_frame_bytes(block_size: usize) -> usize {
    8 + block_size * 2 + 2
}

fn crc8(data: &[u8]) -> u8 {
    data.iter().fold(0, |crc, byte| {
        (0..8).fold(crc ^ byte, |crc, _| {
            if crc & 0x80 != 0 {
                (crc << 1) ^ 0x07
            } else {
                crc << 1
            }
        })
    })
}

fn crc16(data: &[u8]) -> u16 {
    data.iter().fold(0, |crc, byte| {
        (0..8).fold(crc ^ ((*byte as u16) << 8), |crc, _| {
            if crc & 0x8000 != 0 {
                (crc << 1) ^ 0x8005
            } else {
                crc << 1
            }
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crc_check_values() {
        assert_eq!(crc8(b"123456789"), 0xF4);
        assert_eq!(crc16(b"123456789"), 0xFEE8);
    }

    #[test]
    fn test_layout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("layout.flac");
        write_flac(&path, &[7; 300], 200).unwrap();

        let bytes = fs::read(&path).unwrap();
        assert_eq!(&bytes[..4], b"fLaC");
        assert_eq!(bytes.len(), 42 + flac_frame_bytes(200) + flac_frame_bytes(100));
        assert_eq!(&bytes[42..44], &[0xFF, 0xF8]);
        assert!(write_flac(&path, &[0; 10], 8).is_err());
    }
}
