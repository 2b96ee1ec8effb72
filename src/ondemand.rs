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
//! Background work that completes on-demand blocks.
//!
//! An [`OdTask`] wraps a [`TaskWork`] (what to do) with the shared state
//! needed to run it in slices from worker threads: progress, cancellation
//! and the demand sample that reorders pending work toward what the user is
//! looking at. [`OdManager`] owns the worker pool.
mod compute_summary;
mod decode;
mod decoder;
mod manager;
mod task;

pub use self::compute_summary::ComputeSummaryTask;
pub use self::decode::{DecodeTask, DecoderFactory};
pub use self::decoder::{create_decoder, FileDecoder, FlacDecoder, DECODE_TYPE_FLAC};
pub use self::manager::OdManager;
pub use self::task::{OdTask, TaskWork};
