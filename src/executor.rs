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

//! Background task execution for streaming refills.
//!
//! Loaders submit one-shot refill jobs through the [`TaskExecutor`] trait.
//! Production code uses a [`WorkerPool`]; [`InlineExecutor`] runs jobs
//! synchronously on the caller's thread for debugging and deterministic
//! tests.

use rayon::ThreadPoolBuilder;

/// A one-shot unit of background work submitted by a stream loader.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Executes refill jobs off the real-time thread.
///
/// Implementations guarantee that a submitted job eventually runs to
/// completion on some thread. No ordering is guaranteed across jobs from
/// different loaders; a single loader never has more than one job in flight.
pub trait TaskExecutor: Send + Sync {
    /// Runs the given job to completion.
    fn execute(&self, task: Task);
}

/// Dedicated worker pool for background refills.
pub struct WorkerPool {
    pool: rayon::ThreadPool,
}

impl WorkerPool {
    /// Creates a new pool with the given number of worker threads.
    pub fn new(num_threads: usize) -> Result<Self, String> {
        let threads = num_threads.max(1);
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("mstream-refill-{i}"))
            .build()
            .map_err(|e| e.to_string())?;
        Ok(Self { pool })
    }
}

impl TaskExecutor for WorkerPool {
    fn execute(&self, task: Task) {
        self.pool.spawn(task);
    }
}

/// Runs jobs synchronously on the calling thread.
///
/// This turns every refill into blocking file I/O on the thread that
/// requested it. Useful for correctness testing and debugging, never for
/// production real-time use.
pub struct InlineExecutor;

impl TaskExecutor for InlineExecutor {
    fn execute(&self, task: Task) {
        task();
    }
}
