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

//! A disk-streaming sample playback engine.
//!
//! Long recordings are played without keeping them resident in memory: each
//! [`SampleAsset`] memory-maps its file and preloads a short head segment,
//! a [`StreamLoader`] keeps two buffers pipelined ahead of playback with
//! background refills, and a [`StreamVoice`] consumes the stream with
//! pitch-shifted linear interpolation into the host's output block.
//!
//! The render path never blocks, allocates, or takes a contended lock.
//! Blocking file I/O happens on a [`TaskExecutor`]; hosts typically share
//! one [`WorkerPool`] across all voices.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use mstream::{NoteRange, SampleAsset, StreamConfig, StreamVoice, WorkerPool};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let executor = Arc::new(WorkerPool::new(2)?);
//! let config = StreamConfig::default();
//!
//! let asset = Arc::new(SampleAsset::open("piano-c4.wav", NoteRange::all(), 60)?);
//!
//! let mut voice = StreamVoice::new(&config, executor);
//! voice.prepare(512);
//! voice.start_note(&asset, 64);
//!
//! let mut block = mstream::StereoBuffer::new(512);
//! voice.render(&mut block, 0, 512, None);
//! # Ok(())
//! # }
//! ```

pub mod asset;
pub mod buffer;
pub mod config;
pub mod error;
pub mod executor;
pub mod loader;
pub mod voice;

#[cfg(test)]
mod testutil;

pub use asset::{NoteRange, SampleAsset};
pub use buffer::StereoBuffer;
pub use config::{MixPolicy, PreloadSize, StreamConfig};
pub use error::LoadError;
pub use executor::{InlineExecutor, TaskExecutor, WorkerPool};
pub use loader::StreamLoader;
pub use voice::StreamVoice;
