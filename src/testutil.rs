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

//! Test fixtures: WAV files with analytically known contents and a manually
//! stepped executor that makes the refill pipeline deterministic.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, SystemTime};

use parking_lot::Mutex;

use crate::executor::{Task, TaskExecutor};

/// Period of the integer ramp used by [`write_ramp_wav`]. Stays below
/// i16::MAX so every frame value is exact.
pub const RAMP_PERIOD: u64 = 30000;

/// The expected f32 frame value at ramp position `i`, after 16-bit scaling.
pub fn ramp_frame(i: usize) -> (f32, f32) {
    let value = (i as u64 % RAMP_PERIOD) as i16;
    let scale = 1.0 / 32768.0;
    (value as f32 * scale, -(value as f32) * scale)
}

/// Writes a stereo 16-bit 44.1kHz WAV whose frames follow [`ramp_frame`],
/// so any window of the stream can be checked bit-for-bit.
pub fn write_ramp_wav(dir: &Path, name: &str, frames: usize) -> PathBuf {
    let path = dir.join(name);
    let spec = hound::WavSpec {
        channels: 2,
        sample_rate: 44100,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(&path, spec).expect("create wav writer");
    for i in 0..frames {
        let value = (i as u64 % RAMP_PERIOD) as i16;
        writer.write_sample(value).expect("write left");
        writer.write_sample(-value).expect("write right");
    }
    writer.finalize().expect("finalize wav");
    path
}

/// Writes a stereo 32-bit float WAV from explicit frames.
pub fn write_f32_wav(dir: &Path, name: &str, frames: &[(f32, f32)]) -> PathBuf {
    let path = dir.join(name);
    let spec = hound::WavSpec {
        channels: 2,
        sample_rate: 48000,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };
    let mut writer = hound::WavWriter::create(&path, spec).expect("create wav writer");
    for (l, r) in frames {
        writer.write_sample(*l).expect("write left");
        writer.write_sample(*r).expect("write right");
    }
    writer.finalize().expect("finalize wav");
    path
}

/// Writes a stereo 24-bit WAV from explicit frames (values must fit 24 bits).
pub fn write_i24_wav(dir: &Path, name: &str, frames: &[(i32, i32)]) -> PathBuf {
    let path = dir.join(name);
    let spec = hound::WavSpec {
        channels: 2,
        sample_rate: 44100,
        bits_per_sample: 24,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(&path, spec).expect("create wav writer");
    for (l, r) in frames {
        writer.write_sample(*l).expect("write left");
        writer.write_sample(*r).expect("write right");
    }
    writer.finalize().expect("finalize wav");
    path
}

/// An executor that queues jobs until the test runs them explicitly. This
/// gives tests full control over when "background" refills complete, which
/// makes both the happy pipeline and the starvation path deterministic.
#[derive(Default)]
pub struct ManualExecutor {
    queue: Mutex<VecDeque<Task>>,
}

impl ManualExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of queued jobs.
    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }

    /// Runs the oldest queued job. Returns false if the queue was empty.
    pub fn run_next(&self) -> bool {
        let task = self.queue.lock().pop_front();
        match task {
            Some(task) => {
                task();
                true
            }
            None => false,
        }
    }

    /// Runs every queued job, including jobs queued by the jobs themselves.
    /// Returns the number of jobs run.
    pub fn run_all(&self) -> usize {
        let mut ran = 0;
        while self.run_next() {
            ran += 1;
        }
        ran
    }
}

impl TaskExecutor for ManualExecutor {
    fn execute(&self, task: Task) {
        self.queue.lock().push_back(task);
    }
}

/// Wait for the given predicate to return true or fail.
pub fn eventually<F>(predicate: F, error_msg: &str)
where
    F: Fn() -> bool,
{
    let start = SystemTime::now();
    let tick = Duration::from_millis(10);
    let timeout = Duration::from_secs(3);

    loop {
        let elapsed = start.elapsed().expect("System time error");
        if elapsed > timeout {
            panic!("{}", error_msg);
        }
        if predicate() {
            return;
        }
        thread::sleep(tick);
    }
}
