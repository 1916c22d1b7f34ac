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

//! Streaming engine configuration.
//!
//! All tuning values are passed at construction time so that every voice can
//! be configured independently (and tests can use tiny buffers).

use serde::{Deserialize, Serialize};

/// Default preload length in frames.
pub const DEFAULT_PRELOAD_FRAMES: usize = 11000;

/// Default streaming buffer length in frames. Should track the host block
/// size times a safety multiplier so refills complete well before the buffer
/// is exhausted.
pub const DEFAULT_BUFFER_FRAMES: usize = 11000;

/// Default maximum pitch transposition ratio (three octaves up). Bounds how
/// many streamed frames a single output block may consume.
pub const DEFAULT_MAX_PITCH_RATIO: f64 = 8.0;

/// How many frames to preload when an asset is opened or a note is armed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PreloadSize {
    /// Preload this many frames (clamped to the file length).
    Frames(usize),
    /// Load the whole file into memory; streaming then never touches disk.
    EntireSample,
}

/// How a voice writes into the destination block.
#[derive(Deserialize, Clone, Copy, Serialize, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MixPolicy {
    /// Add the voice output to the destination (mixing synthesizers).
    #[default]
    Accumulate,
    /// Replace the destination contents (simple hosts).
    Overwrite,
}

/// Configuration for a streaming voice and its loader.
#[derive(Deserialize, Clone, Serialize, Debug)]
pub struct StreamConfig {
    /// Preload length in frames.
    #[serde(default = "default_preload_frames")]
    preload_frames: usize,

    /// When true, assets load their entire sample data into the preload
    /// buffer and disk streaming becomes a memory copy.
    #[serde(default)]
    load_entire_sample: bool,

    /// Streaming buffer length in frames. The preload length must be at
    /// least this large, or the first refill will not be ready in time.
    #[serde(default = "default_buffer_frames")]
    buffer_frames: usize,

    /// Maximum pitch transposition ratio.
    #[serde(default = "default_max_pitch_ratio")]
    max_pitch_ratio: f64,

    /// Whether voices accumulate into or overwrite the output block.
    #[serde(default)]
    mix_policy: MixPolicy,

    /// Whether refills run on the background executor. Disabling forces
    /// synchronous in-line refills; useful for correctness testing, never
    /// for production real-time use.
    #[serde(default = "default_background")]
    background: bool,
}

fn default_preload_frames() -> usize {
    DEFAULT_PRELOAD_FRAMES
}

fn default_buffer_frames() -> usize {
    DEFAULT_BUFFER_FRAMES
}

fn default_max_pitch_ratio() -> f64 {
    DEFAULT_MAX_PITCH_RATIO
}

fn default_background() -> bool {
    true
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            preload_frames: DEFAULT_PRELOAD_FRAMES,
            load_entire_sample: false,
            buffer_frames: DEFAULT_BUFFER_FRAMES,
            max_pitch_ratio: DEFAULT_MAX_PITCH_RATIO,
            mix_policy: MixPolicy::default(),
            background: true,
        }
    }
}

impl StreamConfig {
    /// Gets the preload size.
    pub fn preload(&self) -> PreloadSize {
        if self.load_entire_sample {
            PreloadSize::EntireSample
        } else {
            PreloadSize::Frames(self.preload_frames)
        }
    }

    /// Gets the streaming buffer length in frames.
    pub fn buffer_frames(&self) -> usize {
        self.buffer_frames
    }

    /// Gets the maximum pitch transposition ratio.
    pub fn max_pitch_ratio(&self) -> f64 {
        self.max_pitch_ratio
    }

    /// Gets the output mixing policy.
    pub fn mix_policy(&self) -> MixPolicy {
        self.mix_policy
    }

    /// Returns true if refills run on the background executor.
    pub fn background(&self) -> bool {
        self.background
    }

    /// Sets the preload size.
    pub fn set_preload(&mut self, preload: PreloadSize) {
        match preload {
            PreloadSize::Frames(frames) => {
                self.preload_frames = frames;
                self.load_entire_sample = false;
            }
            PreloadSize::EntireSample => self.load_entire_sample = true,
        }
    }

    /// Sets the streaming buffer length in frames. Clamped to at least one
    /// frame.
    pub fn set_buffer_frames(&mut self, frames: usize) {
        self.buffer_frames = frames.max(1);
    }

    /// Sets the maximum pitch transposition ratio. Clamped to at least 1.0.
    pub fn set_max_pitch_ratio(&mut self, ratio: f64) {
        self.max_pitch_ratio = ratio.max(1.0);
    }

    /// Sets the output mixing policy.
    pub fn set_mix_policy(&mut self, policy: MixPolicy) {
        self.mix_policy = policy;
    }

    /// Enables or disables background refill execution.
    pub fn set_background(&mut self, background: bool) {
        self.background = background;
    }
}
