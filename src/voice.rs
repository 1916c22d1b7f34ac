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

//! Streaming playback voices.
//!
//! A voice owns one [`StreamLoader`], pulls a contiguous source window from
//! it on every render call, and resamples it by fractional-index linear
//! interpolation into the caller's output block.

use std::sync::Arc;

use tracing::debug;

use crate::asset::SampleAsset;
use crate::buffer::StereoBuffer;
use crate::config::{MixPolicy, StreamConfig};
use crate::executor::{InlineExecutor, TaskExecutor};
use crate::loader::StreamLoader;

/// Extra source frames fetched past the block's last integer position, so
/// linear interpolation always has a right-hand neighbor.
const INTERP_LOOKAHEAD: usize = 2;

/// A playback voice that streams a [`SampleAsset`] through a loader.
///
/// Voices are created once per concurrent-note slot and rebound to an asset
/// on every note start. [`prepare`](StreamVoice::prepare) must be called with
/// the host's maximum block size before the first render.
pub struct StreamVoice {
    /// Fractional source-frame cursor since note start.
    uptime: f64,
    /// Source frames advanced per output frame; pitch ratio clamped to the
    /// configured maximum.
    uptime_delta: f64,
    max_pitch_ratio: f64,
    mix_policy: MixPolicy,
    scratch: StereoBuffer,
    loader: StreamLoader,
}

impl StreamVoice {
    /// Creates a voice with its loader. When background execution is
    /// disabled in the config, refills run synchronously in line regardless
    /// of the executor passed here.
    pub fn new(config: &StreamConfig, executor: Arc<dyn TaskExecutor>) -> Self {
        let executor: Arc<dyn TaskExecutor> = if config.background() {
            executor
        } else {
            Arc::new(InlineExecutor)
        };

        Self {
            uptime: 0.0,
            uptime_delta: 0.0,
            max_pitch_ratio: config.max_pitch_ratio(),
            mix_policy: config.mix_policy(),
            scratch: StereoBuffer::default(),
            loader: StreamLoader::new(executor, config.buffer_frames()),
        }
    }

    /// Sizes the scratch buffer for the host's maximum block size. The
    /// scratch must hold `max_block_frames` times the maximum pitch ratio
    /// plus interpolation lookahead; rendering larger blocks than prepared
    /// for stops the note instead of allocating on the real-time thread.
    pub fn prepare(&mut self, max_block_frames: usize) {
        let frames =
            (max_block_frames as f64 * self.max_pitch_ratio).ceil() as usize + INTERP_LOOKAHEAD;
        self.scratch = StereoBuffer::new(frames);
        debug!(max_block_frames, scratch_frames = frames, "Voice prepared");
    }

    /// Starts a note at the pitch the asset maps to `note`.
    pub fn start_note(&mut self, asset: &Arc<SampleAsset>, note: u8) {
        self.start_note_with_ratio(asset, asset.pitch_factor(note));
    }

    /// Starts a note at an explicit pitch ratio, bypassing the asset's note
    /// mapping. The ratio is clamped to the configured maximum.
    pub fn start_note_with_ratio(&mut self, asset: &Arc<SampleAsset>, ratio: f64) {
        self.loader.start_note(asset);
        asset.touch();
        self.uptime = 0.0;
        self.uptime_delta = ratio.min(self.max_pitch_ratio);
    }

    /// Stops the note and unbinds the asset, leaving the voice idle and
    /// immediately reusable. Safe to call on an idle voice.
    pub fn stop_note(&mut self) {
        self.uptime = 0.0;
        self.uptime_delta = 0.0;
        self.loader.reset();
    }

    /// Renders `frame_count` frames into `output` starting at `start_frame`.
    ///
    /// `pitch_curve`, when given, must hold exactly `frame_count` per-frame
    /// multipliers for the voice's pitch ratio; each scaled increment is
    /// clamped to the configured maximum.
    ///
    /// If the asset cannot supply the source frames this block needs, the
    /// note stops and the remainder of the call is silence. No failure
    /// escapes this method.
    pub fn render(
        &mut self,
        output: &mut StereoBuffer,
        start_frame: usize,
        frame_count: usize,
        pitch_curve: Option<&[f32]>,
    ) {
        let Some(asset) = self.loader.loaded_asset().cloned() else {
            self.silence(output, start_frame, frame_count);
            return;
        };

        if frame_count == 0 {
            return;
        }
        debug_assert!(
            pitch_curve.map_or(true, |curve| curve.len() == frame_count),
            "pitch curve length must equal the block frame count"
        );

        // How many source frames this block will consume, starting from the
        // fractional remainder of the cursor.
        let position = self.uptime as u64;
        let mut source_frames_used = self.uptime - position as f64;
        match pitch_curve {
            Some(curve) => {
                for scale in &curve[..frame_count] {
                    source_frames_used +=
                        (self.uptime_delta * *scale as f64).min(self.max_pitch_ratio);
                }
            }
            None => source_frames_used += self.uptime_delta * frame_count as f64,
        }

        let frames_to_copy = source_frames_used as usize + INTERP_LOOKAHEAD;
        let frames_to_consume = source_frames_used as usize;

        if !asset.has_enough_frames(position + frames_to_copy as u64) {
            // End of stream: not an error, the note just ends here.
            self.stop_note();
            self.silence(output, start_frame, frame_count);
            return;
        }

        if frames_to_copy > self.scratch.frames() {
            debug_assert!(false, "render block larger than prepared for");
            self.stop_note();
            self.silence(output, start_frame, frame_count);
            return;
        }

        self.loader
            .fill_window(&mut self.scratch, frames_to_copy, frames_to_consume, position);

        let in_left = self.scratch.left();
        let in_right = self.scratch.right();
        let (out_left, out_right) = output.channels_mut();

        let mut uptime = self.uptime;
        for i in 0..frame_count {
            let index_float = uptime - position as f64;
            let index = index_float as usize;
            let alpha = (index_float - index as f64) as f32;
            let inv_alpha = 1.0 - alpha;

            let left = in_left[index] * inv_alpha + in_left[index + 1] * alpha;
            let right = in_right[index] * inv_alpha + in_right[index + 1] * alpha;

            let out = start_frame + i;
            match self.mix_policy {
                MixPolicy::Accumulate => {
                    out_left[out] += left;
                    out_right[out] += right;
                }
                MixPolicy::Overwrite => {
                    out_left[out] = left;
                    out_right[out] = right;
                }
            }

            let step = match pitch_curve {
                Some(curve) => (self.uptime_delta * curve[i] as f64).min(self.max_pitch_ratio),
                None => self.uptime_delta,
            };
            uptime += step;
        }
        self.uptime = uptime;
    }

    /// True while a note is sounding.
    pub fn is_active(&self) -> bool {
        self.loader.loaded_asset().is_some()
    }

    /// The asset the voice is currently playing, if any.
    pub fn loaded_asset(&self) -> Option<&Arc<SampleAsset>> {
        self.loader.loaded_asset()
    }

    /// Worst disk usage ratio since the last poll; forwarded from the
    /// loader, resets when read.
    pub fn disk_usage(&self) -> f64 {
        self.loader.take_disk_usage()
    }

    /// Total streaming starvation faults observed by this voice's loader.
    pub fn starvation_count(&self) -> u32 {
        self.loader.starvation_count()
    }

    /// Resizes the loader's streaming buffers. Resets the loader, so only
    /// call this between notes.
    pub fn set_stream_buffer_frames(&mut self, buffer_frames: usize) {
        self.loader.set_buffer_frames(buffer_frames);
    }

    /// Writes silence under the current mix policy: overwrite zeroes the
    /// block, accumulate adds nothing.
    fn silence(&self, output: &mut StereoBuffer, start_frame: usize, frame_count: usize) {
        if self.mix_policy == MixPolicy::Overwrite {
            output.clear_range(start_frame, frame_count);
        }
    }
}

impl std::fmt::Debug for StreamVoice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamVoice")
            .field("active", &self.is_active())
            .field("uptime", &self.uptime)
            .field("uptime_delta", &self.uptime_delta)
            .field("loader", &self.loader)
            .finish()
    }
}
