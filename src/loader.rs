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

//! Double-buffered background streaming.
//!
//! A loader pipelines disk reads one streaming buffer ahead of real-time
//! consumption. When a note starts, the read role points at the asset's
//! preload buffer while the first streaming buffer fills in the background;
//! every time the consumer exhausts the read buffer the roles swap and the
//! retired buffer is refilled.
//!
//! The hot path takes no contended lock. The background job only ever owns
//! the write slot, and it owns it exactly while the in-flight flag is true;
//! the real-time side never touches that slot without first observing the
//! flag false (Acquire). Everything else in the loader belongs to the owning
//! voice and is plain `&mut self` state.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::asset::SampleAsset;
use crate::buffer::StereoBuffer;
use crate::executor::TaskExecutor;

/// One of the two alternating streaming buffers.
struct BufferSlot {
    samples: Mutex<StereoBuffer>,
}

impl BufferSlot {
    fn new(frames: usize) -> Arc<Self> {
        Arc::new(Self {
            samples: Mutex::new(StereoBuffer::new(frames)),
        })
    }
}

/// Disk usage measurement, worst ratio since the last poll.
struct DiskMetrics {
    usage: f64,
    /// Start time of the previous refill read, the denominator reference for
    /// the next measurement.
    last_request: Option<Instant>,
}

/// Which buffer the read role is bound to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ReadSource {
    /// The asset's preload buffer; only before the first swap of a note.
    Preload,
    Slot(usize),
}

/// Streams sample data from a [`SampleAsset`] through two alternating
/// buffers refilled on a background executor.
///
/// A loader is owned by exactly one voice and rearmed on every note start.
/// The bound asset is referenced, not owned; the instrument managing the
/// asset keeps it alive for at least as long as any loader is bound to it.
pub struct StreamLoader {
    asset: Option<Arc<SampleAsset>>,
    /// Snapshot of the bound asset's preload buffer, taken at note start.
    preload: Option<Arc<StereoBuffer>>,
    read_source: ReadSource,
    write_index: usize,
    buffer_frames: usize,
    /// File offset the write buffer is (or will be) filled from.
    position_in_file: u64,
    slots: [Arc<BufferSlot>; 2],
    refill_in_flight: Arc<AtomicBool>,
    starvation_faults: Arc<AtomicU32>,
    metrics: Arc<Mutex<DiskMetrics>>,
    executor: Arc<dyn TaskExecutor>,
}

impl StreamLoader {
    /// Creates a loader with the given streaming buffer length.
    pub fn new(executor: Arc<dyn TaskExecutor>, buffer_frames: usize) -> Self {
        Self {
            asset: None,
            preload: None,
            read_source: ReadSource::Preload,
            write_index: 0,
            buffer_frames,
            position_in_file: 0,
            slots: [BufferSlot::new(buffer_frames), BufferSlot::new(buffer_frames)],
            refill_in_flight: Arc::new(AtomicBool::new(false)),
            starvation_faults: Arc::new(AtomicU32::new(0)),
            metrics: Arc::new(Mutex::new(DiskMetrics {
                usage: 0.0,
                last_request: None,
            })),
            executor,
        }
    }

    /// Arms the loader for a new note.
    ///
    /// The read role points at the asset's preload buffer and the first
    /// streaming buffer is scheduled to fill from one buffer length into the
    /// file (the preload segment covers position zero). The preload buffer
    /// must be at least one streaming buffer long, or the stream under-reads
    /// before the first refill lands.
    pub fn start_note(&mut self, asset: &Arc<SampleAsset>) {
        self.metrics.lock().usage = 0.0;

        let preload = asset.preload_buffer();
        debug_assert!(
            preload.frames() >= self.buffer_frames,
            "preload buffer shorter than the streaming buffer"
        );

        self.asset = Some(asset.clone());
        self.preload = Some(preload);
        self.read_source = ReadSource::Preload;
        self.write_index = 0;
        self.position_in_file = self.buffer_frames as u64;

        debug!(
            path = %asset.path().display(),
            buffer_frames = self.buffer_frames,
            "Loader armed"
        );

        // A refill from a previous note may still be running; the pipeline
        // has a single slot, so let it finish and overwrite on the next
        // cycle.
        if !self.refill_in_flight.load(Ordering::Acquire) {
            self.request_refill();
        }
    }

    /// Copies `frames_to_copy` frames anchored at `file_offset_hint` into
    /// the head of `dest`, and accounts for `frames_to_consume` frames being
    /// consumed by the caller.
    ///
    /// The offset hint is the authoritative clock: the local read index is
    /// `hint % buffer_frames`. `frames_to_copy` may exceed the consumed
    /// count (lookahead for interpolation) but never a full buffer length.
    /// Consuming past the end of the read buffer swaps the buffer roles and
    /// schedules the next refill.
    ///
    /// Real-time safe: straddling windows peek into the write buffer only
    /// after observing that no refill is in flight. If the background read
    /// has not completed in time, the window's unavailable remainder is
    /// zeroed and a starvation fault is recorded instead of touching the
    /// buffer mid-write.
    pub fn fill_window(
        &mut self,
        dest: &mut StereoBuffer,
        frames_to_copy: usize,
        frames_to_consume: usize,
        file_offset_hint: u64,
    ) {
        if self.asset.is_none() {
            debug_assert!(false, "fill_window called with no asset bound");
            return;
        }
        debug_assert!(frames_to_copy <= self.buffer_frames);

        let buffer_frames = self.buffer_frames;
        let read_index = (file_offset_hint % buffer_frames as u64) as usize;

        if read_index + frames_to_copy < buffer_frames {
            // The whole window fits in the remaining tail of the read
            // buffer.
            self.copy_from_read(dest, 0, read_index, frames_to_copy);
            return;
        }

        // Copy as much as the read buffer still holds, then peek into the
        // write buffer for the rest.
        let tail = buffer_frames - read_index;
        self.copy_from_read(dest, 0, read_index, tail);

        let remainder = frames_to_copy - tail;
        if remainder > 0 {
            if self.refill_in_flight.load(Ordering::Acquire) {
                self.record_starvation("refill still in flight while peeking ahead");
                dest.clear_range(tail, remainder);
            } else {
                let write = self.slots[self.write_index].samples.lock();
                dest.copy_from(&write, 0, tail, remainder);
            }
        }

        // Swap only once the read buffer is fully consumed; the copy alone
        // may just be lookahead.
        if read_index + frames_to_consume >= buffer_frames {
            if self.refill_in_flight.load(Ordering::Acquire) {
                // The background read lost the race. Keep the current roles
                // and replay stale data; the swap is retried on the next
                // straddle once the refill has landed.
                self.record_starvation("refill not complete at buffer swap");
            } else {
                self.swap_roles();
                self.position_in_file += buffer_frames as u64;
                self.request_refill();
            }
        }
    }

    /// Resets the loader, unbinding the asset. Safe to call repeatedly.
    pub fn reset(&mut self) {
        self.asset = None;
        self.preload = None;
        self.read_source = ReadSource::Preload;
        self.write_index = 0;
        self.position_in_file = 0;
        self.metrics.lock().usage = 0.0;
    }

    /// Resizes both streaming buffers and resets the loader. Fresh slots are
    /// allocated so a stale in-flight refill writes into a detached buffer.
    ///
    /// Not meant to be called while a note is sounding.
    pub fn set_buffer_frames(&mut self, buffer_frames: usize) {
        self.buffer_frames = buffer_frames;
        self.slots = [
            BufferSlot::new(buffer_frames),
            BufferSlot::new(buffer_frames),
        ];
        debug!(buffer_frames, "Streaming buffers resized");
        self.reset();
    }

    /// The configured streaming buffer length in frames.
    pub fn buffer_frames(&self) -> usize {
        self.buffer_frames
    }

    /// The currently bound asset, if any.
    pub fn loaded_asset(&self) -> Option<&Arc<SampleAsset>> {
        self.asset.as_ref()
    }

    /// Returns the worst read-duration / wall-time ratio observed since the
    /// previous call, then resets it.
    pub fn take_disk_usage(&self) -> f64 {
        let mut metrics = self.metrics.lock();
        let usage = metrics.usage;
        metrics.usage = 0.0;
        usage
    }

    /// Total starvation faults recorded since the loader was created.
    pub fn starvation_count(&self) -> u32 {
        self.starvation_faults.load(Ordering::Relaxed)
    }

    /// Marks a refill in flight and submits it to the executor. Must not be
    /// called while another refill for this loader is running.
    fn request_refill(&mut self) {
        debug_assert!(
            !self.refill_in_flight.load(Ordering::Acquire),
            "refill requested while one is already in flight"
        );

        let Some(asset) = self.asset.clone() else {
            return;
        };

        self.refill_in_flight.store(true, Ordering::Release);

        let slot = self.slots[self.write_index].clone();
        let frames = self.buffer_frames;
        let position = self.position_in_file;
        let in_flight = self.refill_in_flight.clone();
        let metrics = self.metrics.clone();

        self.executor.execute(Box::new(move || {
            run_refill(asset, slot, frames, position, in_flight, metrics);
        }));
    }

    fn swap_roles(&mut self) {
        let next_read = match self.read_source {
            ReadSource::Slot(0) => 1,
            // Also the first swap away from the preload buffer.
            _ => 0,
        };
        self.read_source = ReadSource::Slot(next_read);
        self.write_index = 1 - next_read;
    }

    fn copy_from_read(
        &self,
        dest: &mut StereoBuffer,
        dst_offset: usize,
        src_offset: usize,
        frames: usize,
    ) {
        match self.read_source {
            ReadSource::Preload => {
                if let Some(preload) = &self.preload {
                    dest.copy_from(preload, src_offset, dst_offset, frames);
                }
            }
            ReadSource::Slot(index) => {
                let slot = self.slots[index].samples.lock();
                dest.copy_from(&slot, src_offset, dst_offset, frames);
            }
        }
    }

    fn record_starvation(&self, reason: &str) {
        self.starvation_faults.fetch_add(1, Ordering::Relaxed);
        warn!(
            faults = self.starvation_faults.load(Ordering::Relaxed),
            "Streaming starvation: {reason}"
        );
    }
}

impl std::fmt::Debug for StreamLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamLoader")
            .field("asset", &self.asset.as_ref().map(|a| a.path()))
            .field("read_source", &self.read_source)
            .field("buffer_frames", &self.buffer_frames)
            .field("position_in_file", &self.position_in_file)
            .field("starvation_faults", &self.starvation_count())
            .finish()
    }
}

/// The refill operation: fills the write slot from the asset, clears the
/// in-flight flag, and folds the read duration into the disk usage metric.
/// Runs on the executor, never on the real-time thread.
fn run_refill(
    asset: Arc<SampleAsset>,
    slot: Arc<BufferSlot>,
    frames: usize,
    position: u64,
    in_flight: Arc<AtomicBool>,
    metrics: Arc<Mutex<DiskMetrics>>,
) {
    let read_start = Instant::now();

    if asset.has_enough_frames(position + frames as u64) {
        let mut buffer = slot.samples.lock();
        asset.fill_frames(&mut buffer, frames, position);
    }

    in_flight.store(false, Ordering::Release);

    let read_stop = Instant::now();
    let read_time = (read_stop - read_start).as_secs_f64();
    let mut metrics = metrics.lock();
    if let Some(last_request) = metrics.last_request {
        let wall_time = (read_stop - last_request).as_secs_f64();
        if wall_time > 0.0 {
            let usage = read_time / wall_time;
            if usage > metrics.usage {
                metrics.usage = usage;
            }
        }
    }
    metrics.last_request = Some(read_start);
}
