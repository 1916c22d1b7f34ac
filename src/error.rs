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

//! Load-time error taxonomy.
//!
//! Only asset loading and preload resizing can fail with an error. Streaming
//! starvation is a counted diagnostic and running out of source frames stops
//! the note; neither is allowed to surface out of the render path.

use std::path::PathBuf;

/// Errors raised while opening a sample file or resizing its preload buffer.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("{}: file does not exist", .path.display())]
    NotFound {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{}: memory mapping failed: {reason}", .path.display())]
    MapFailed { path: PathBuf, reason: String },

    #[error("{}: unsupported sample format: {reason}", .path.display())]
    UnsupportedFormat { path: PathBuf, reason: String },

    #[error("{}: failed to allocate a preload buffer of {frames} frames", .path.display())]
    OutOfMemory { path: PathBuf, frames: usize },
}
