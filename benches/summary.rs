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
use blockstore::blockfile::BlockFile;
use blockstore::config::StorageConfig;
use blockstore::context::StorageContext;
use blockstore::format::{SampleBuffer, SampleFormat};
use blockstore::summary::{calc_summary, SummaryInfo};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

fn generate_test_audio(len: usize, sample_rate: u32) -> Vec<f32> {
    (0..len)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            0.3 * (2.0 * std::f32::consts::PI * 440.0 * t).sin()
                + 0.2 * (2.0 * std::f32::consts::PI * 880.0 * t).sin()
        })
        .collect()
}

fn benchmark_calc_summary(c: &mut Criterion) {
    let mut group = c.benchmark_group("calc_summary");

    for len in [4096usize, 65536, 1 << 20] {
        let samples = generate_test_audio(len, 44100);
        let info = SummaryInfo::new(len);
        group.bench_function(BenchmarkId::new("samples", len), |b| {
            b.iter(|| black_box(calc_summary(black_box(&samples), &info)))
        });
    }

    group.finish();
}

fn benchmark_block_read(c: &mut Criterion) {
    let mut group = c.benchmark_group("block_read");
    let dir = tempfile::tempdir().expect("temp dir");
    let ctx = StorageContext::new(StorageConfig::default().with_temp_dir(dir.path()));

    let len = 1 << 18;
    let samples = generate_test_audio(len, 44100);
    for format in [SampleFormat::Int16, SampleFormat::Float] {
        let mut buf = SampleBuffer::new(format, len);
        for (i, sample) in samples.iter().enumerate() {
            match &mut buf {
                SampleBuffer::Int16(data) => data[i] = (sample * 32767.0) as i16,
                SampleBuffer::Int24(data) => data[i] = (sample * 8388607.0) as i32,
                SampleBuffer::Float(data) => data[i] = *sample,
            }
        }
        let base = dir.path().join(format!("bench-{:?}", format));
        let block = BlockFile::new_simple(ctx.clone(), &base, &buf, false).expect("block");

        group.bench_function(BenchmarkId::new("read_data", format), |b| {
            let mut dst = SampleBuffer::new(SampleFormat::Float, len);
            b.iter(|| black_box(block.read_data(&mut dst, 0, len, true)))
        });
        group.bench_function(BenchmarkId::new("min_max_rms_region", format), |b| {
            b.iter(|| black_box(block.min_max_rms_region(1000, len / 2, true)))
        });
    }

    group.finish();
}

criterion_group!(benches, benchmark_calc_summary, benchmark_block_read);
criterion_main!(benches);
