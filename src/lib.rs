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
//! Block-file storage for long audio tracks.
//!
//! A track is an ordered array of blocks. Each block is one file on disk
//! holding samples and a two-level summary, or a reference into an external
//! audio file, or nothing at all for silence. A [`dirmanager::DirManager`]
//! names and places those files, reloads them from project documents and
//! checks a project's files against its blocks. Work that would stall an
//! import, such as summarising aliased audio or decoding compressed audio,
//! runs in the background through [`ondemand::OdManager`].
pub mod audiofile;
pub mod blockfile;
pub mod config;
pub mod context;
pub mod dirmanager;
pub mod error;
pub mod format;
pub mod ondemand;
pub mod sequence;
pub mod summary;
pub mod xml;

#[cfg(test)]
mod testutil;
