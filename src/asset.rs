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

//! Memory-mapped sample assets.
//!
//! An asset wraps a mapped stereo WAV file and a preloaded head buffer so a
//! voice can start playing immediately while background refills catch up.
//! Reading outside the preload window goes through the map and may fault in
//! pages from disk, so those reads belong on a background thread.

use std::fs::File;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use memmap2::Mmap;
use parking_lot::RwLock;
use tracing::{debug, info};

use crate::buffer::StereoBuffer;
use crate::config::{PreloadSize, DEFAULT_PRELOAD_FRAMES};
use crate::error::LoadError;

/// A set of MIDI notes a sample responds to, one bit per note number.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NoteRange(u128);

impl NoteRange {
    /// A range containing every MIDI note.
    pub fn all() -> Self {
        Self(u128::MAX)
    }

    /// A range containing a single note.
    pub fn single(note: u8) -> Self {
        let mut range = Self(0);
        range.insert(note);
        range
    }

    /// A range containing the inclusive span `[low, high]`.
    pub fn span(low: u8, high: u8) -> Self {
        let mut range = Self(0);
        for note in low..=high {
            range.insert(note);
        }
        range
    }

    /// Adds a note to the range. Notes above 127 are ignored.
    pub fn insert(&mut self, note: u8) {
        if note < 128 {
            self.0 |= 1 << note;
        }
    }

    /// Returns true if the range contains the note.
    pub fn contains(&self, note: u8) -> bool {
        note < 128 && (self.0 >> note) & 1 == 1
    }
}

/// Sample encoding of the mapped data chunk.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SampleLayout {
    Int16,
    Int24,
    Int32,
    Float32,
}

/// Parsed WAV container geometry.
#[derive(Clone, Copy, Debug)]
struct WavInfo {
    sample_rate: u32,
    layout: SampleLayout,
    /// Byte offset of the data chunk within the mapped region.
    data_start: usize,
    /// Bytes per interleaved stereo frame.
    bytes_per_frame: usize,
    /// Total frames in the data chunk.
    total_frames: u64,
}

const WAVE_FORMAT_PCM: u16 = 0x0001;
const WAVE_FORMAT_IEEE_FLOAT: u16 = 0x0003;
const WAVE_FORMAT_EXTENSIBLE: u16 = 0xFFFE;

/// A sample asset backed by a memory-mapped stereo WAV file.
///
/// Identity (path, note range, root note) is immutable after construction.
/// The preload buffer can be resized at any time; loaders snapshot it when a
/// note starts, so a resize affects the next note rather than a running one.
///
/// Assets are shared by reference: the instrument owns them and any loader
/// bound to one holds a non-owning clone of the `Arc` that must not outlive
/// the instrument's bookkeeping.
pub struct SampleAsset {
    path: PathBuf,
    note_range: NoteRange,
    root_note: u8,
    map: Mmap,
    info: WavInfo,
    preload: RwLock<Arc<StereoBuffer>>,
}

impl SampleAsset {
    /// Opens and memory-maps a stereo WAV file, then synchronously reads the
    /// default preload length into memory.
    pub fn open(
        path: impl AsRef<Path>,
        note_range: NoteRange,
        root_note: u8,
    ) -> Result<Self, LoadError> {
        let path = path.as_ref().to_path_buf();

        let file = File::open(&path).map_err(|e| {
            if e.kind() == ErrorKind::NotFound {
                LoadError::NotFound {
                    path: path.clone(),
                    source: e,
                }
            } else {
                LoadError::MapFailed {
                    path: path.clone(),
                    reason: e.to_string(),
                }
            }
        })?;

        // Safety: the map is read-only and the file is externally managed;
        // callers must not truncate it while the asset is alive.
        let map = unsafe { Mmap::map(&file) }.map_err(|e| LoadError::MapFailed {
            path: path.clone(),
            reason: e.to_string(),
        })?;

        if map.is_empty() {
            return Err(LoadError::MapFailed {
                path,
                reason: "mapped region is empty".to_string(),
            });
        }

        let info = parse_wav(&map, &path)?;

        let asset = Self {
            path,
            note_range,
            root_note,
            map,
            info,
            preload: RwLock::new(Arc::new(StereoBuffer::default())),
        };
        asset.set_preload_size(PreloadSize::Frames(DEFAULT_PRELOAD_FRAMES))?;

        info!(
            path = %asset.path.display(),
            sample_rate = asset.info.sample_rate,
            frames = asset.info.total_frames,
            preload_frames = asset.preload_frames(),
            "Sample asset mapped"
        );

        Ok(asset)
    }

    /// Resizes the preload buffer and re-reads it from the start of the
    /// sample. The requested length is clamped to the file length. On
    /// allocation failure the previous preload buffer stays in place.
    pub fn set_preload_size(&self, size: PreloadSize) -> Result<(), LoadError> {
        let frames = match size {
            PreloadSize::EntireSample => self.info.total_frames as usize,
            PreloadSize::Frames(frames) => frames.min(self.info.total_frames as usize),
        };

        let mut buffer = StereoBuffer::try_new(frames).map_err(|_| LoadError::OutOfMemory {
            path: self.path.clone(),
            frames,
        })?;
        self.decode_into(&mut buffer, frames, 0);
        *self.preload.write() = Arc::new(buffer);

        debug!(path = %self.path.display(), frames, "Preload buffer reloaded");
        Ok(())
    }

    /// Loads the whole file into the preload buffer; streaming then never
    /// touches disk for this asset.
    pub fn load_entire_sample(&self) -> Result<(), LoadError> {
        self.set_preload_size(PreloadSize::EntireSample)
    }

    /// Returns true if the file contains at least one frame past
    /// `max_index`. Call this before reading a block to guard the end of the
    /// stream.
    pub fn has_enough_frames(&self, max_index: u64) -> bool {
        max_index < self.info.total_frames
    }

    /// Copies `frames` frames starting at `file_offset` into the head of
    /// `dest`.
    ///
    /// When the requested range is resident in the preload buffer this is a
    /// plain memory copy; otherwise it decodes straight from the map, which
    /// may block on a page fault. Only the preload-resident case is safe on
    /// a real-time thread.
    pub fn fill_frames(&self, dest: &mut StereoBuffer, frames: usize, file_offset: u64) {
        let preload = self.preload.read();
        if file_offset + frames as u64 <= preload.frames() as u64 {
            dest.copy_from(&preload, file_offset as usize, 0, frames);
        } else {
            drop(preload);
            self.decode_into(dest, frames, file_offset);
        }
    }

    /// Returns the pitch ratio that plays this sample at the given note:
    /// `2^((note - root) / 12)`.
    pub fn pitch_factor(&self, note: u8) -> f64 {
        2.0_f64.powf((note as f64 - self.root_note as f64) / 12.0)
    }

    /// Advisory pre-fault of the first mapped data page, so the first
    /// streamed read after a note start is less likely to block.
    pub fn touch(&self) {
        if let Some(byte) = self.map.get(self.info.data_start) {
            std::hint::black_box(*byte);
        }
    }

    /// Returns true if this asset responds to the note.
    pub fn applies_to_note(&self, note: u8) -> bool {
        self.note_range.contains(note)
    }

    /// A snapshot of the current preload buffer.
    pub fn preload_buffer(&self) -> Arc<StereoBuffer> {
        self.preload.read().clone()
    }

    /// The current preload length in frames.
    pub fn preload_frames(&self) -> usize {
        self.preload.read().frames()
    }

    /// The memory held by the preload buffer, in bytes.
    pub fn preload_memory_bytes(&self) -> usize {
        self.preload_frames() * 2 * std::mem::size_of::<f32>()
    }

    /// The file this asset was mapped from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The note at which the sample plays at its recorded pitch.
    pub fn root_note(&self) -> u8 {
        self.root_note
    }

    /// The sample rate of the mapped file.
    pub fn sample_rate(&self) -> u32 {
        self.info.sample_rate
    }

    /// Total frames in the mapped file.
    pub fn total_frames(&self) -> u64 {
        self.info.total_frames
    }

    /// Decodes `frames` frames at `file_offset` from the mapped data chunk
    /// into the head of `dest`, zeroing whatever lies past the end of the
    /// file.
    fn decode_into(&self, dest: &mut StereoBuffer, frames: usize, file_offset: u64) {
        let available = self.info.total_frames.saturating_sub(file_offset);
        let count = (frames as u64).min(available) as usize;
        if count == 0 {
            dest.clear_range(0, frames);
            return;
        }
        let bpf = self.info.bytes_per_frame;
        let start = self.info.data_start + file_offset as usize * bpf;
        let bytes = &self.map[start..start + count * bpf];

        match self.info.layout {
            SampleLayout::Int16 => {
                let scale = 1.0 / (1i64 << 15) as f32;
                for i in 0..count {
                    let f = &bytes[i * bpf..(i + 1) * bpf];
                    let l = i16::from_le_bytes([f[0], f[1]]) as f32 * scale;
                    let r = i16::from_le_bytes([f[2], f[3]]) as f32 * scale;
                    dest.set_frame(i, l, r);
                }
            }
            SampleLayout::Int24 => {
                let scale = 1.0 / (1i64 << 23) as f32;
                for i in 0..count {
                    let f = &bytes[i * bpf..(i + 1) * bpf];
                    // Load into the top three bytes, then shift down to
                    // sign-extend.
                    let l = i32::from_le_bytes([0, f[0], f[1], f[2]]) >> 8;
                    let r = i32::from_le_bytes([0, f[3], f[4], f[5]]) >> 8;
                    dest.set_frame(i, l as f32 * scale, r as f32 * scale);
                }
            }
            SampleLayout::Int32 => {
                let scale = 1.0 / (1i64 << 31) as f32;
                for i in 0..count {
                    let f = &bytes[i * bpf..(i + 1) * bpf];
                    let l = i32::from_le_bytes([f[0], f[1], f[2], f[3]]) as f32 * scale;
                    let r = i32::from_le_bytes([f[4], f[5], f[6], f[7]]) as f32 * scale;
                    dest.set_frame(i, l, r);
                }
            }
            SampleLayout::Float32 => {
                for i in 0..count {
                    let f = &bytes[i * bpf..(i + 1) * bpf];
                    let l = f32::from_le_bytes([f[0], f[1], f[2], f[3]]);
                    let r = f32::from_le_bytes([f[4], f[5], f[6], f[7]]);
                    dest.set_frame(i, l, r);
                }
            }
        }

        if count < frames {
            dest.clear_range(count, frames - count);
        }
    }
}

impl std::fmt::Debug for SampleAsset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SampleAsset")
            .field("path", &self.path)
            .field("root_note", &self.root_note)
            .field("sample_rate", &self.info.sample_rate)
            .field("total_frames", &self.info.total_frames)
            .field("preload_frames", &self.preload_frames())
            .finish()
    }
}

/// Scans the RIFF chunk list for the fmt and data chunks.
///
/// Random access through the map needs the data chunk's byte range, which
/// streaming WAV readers do not expose, so the container geometry is parsed
/// here directly. Anything beyond raw interleaved PCM extraction (compressed
/// codecs, non-stereo layouts) is rejected.
fn parse_wav(map: &[u8], path: &Path) -> Result<WavInfo, LoadError> {
    let unsupported = |reason: &str| LoadError::UnsupportedFormat {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    };

    if map.len() < 12 || &map[0..4] != b"RIFF" || &map[8..12] != b"WAVE" {
        return Err(unsupported("not a RIFF/WAVE file"));
    }

    let mut fmt: Option<(u16, u16, u32, u16, u16)> = None;
    let mut data: Option<(usize, usize)> = None;

    let mut offset = 12;
    while offset + 8 <= map.len() {
        let id = &map[offset..offset + 4];
        let size = u32::from_le_bytes([
            map[offset + 4],
            map[offset + 5],
            map[offset + 6],
            map[offset + 7],
        ]) as usize;
        let body = offset + 8;
        let body_len = size.min(map.len() - body);

        match id {
            b"fmt " => {
                if body_len < 16 {
                    return Err(unsupported("fmt chunk too short"));
                }
                let read_u16 =
                    |at: usize| u16::from_le_bytes([map[body + at], map[body + at + 1]]);
                let mut format_tag = read_u16(0);
                let channels = read_u16(2);
                let sample_rate = u32::from_le_bytes([
                    map[body + 4],
                    map[body + 5],
                    map[body + 6],
                    map[body + 7],
                ]);
                let block_align = read_u16(12);
                let bits_per_sample = read_u16(14);

                // WAVE_FORMAT_EXTENSIBLE stores the real format tag at the
                // head of the sub-format GUID.
                if format_tag == WAVE_FORMAT_EXTENSIBLE {
                    if body_len < 26 {
                        return Err(unsupported("extensible fmt chunk too short"));
                    }
                    format_tag = read_u16(24);
                }

                fmt = Some((format_tag, channels, sample_rate, block_align, bits_per_sample));
            }
            b"data" => {
                data = Some((body, body_len));
            }
            _ => {}
        }

        // Chunks are word aligned.
        offset = body + size + (size & 1);
    }

    let (format_tag, channels, sample_rate, block_align, bits_per_sample) =
        fmt.ok_or_else(|| unsupported("missing fmt chunk"))?;
    let (data_start, data_len) = data.ok_or_else(|| unsupported("missing data chunk"))?;

    if channels != 2 {
        return Err(unsupported(&format!(
            "expected 2 channels, found {channels}"
        )));
    }

    let layout = match (format_tag, bits_per_sample) {
        (WAVE_FORMAT_PCM, 16) => SampleLayout::Int16,
        (WAVE_FORMAT_PCM, 24) => SampleLayout::Int24,
        (WAVE_FORMAT_PCM, 32) => SampleLayout::Int32,
        (WAVE_FORMAT_IEEE_FLOAT, 32) => SampleLayout::Float32,
        _ => {
            return Err(unsupported(&format!(
                "format tag {format_tag} with {bits_per_sample} bits per sample"
            )))
        }
    };

    let bytes_per_frame = 2 * (bits_per_sample as usize / 8);
    if block_align as usize != bytes_per_frame {
        return Err(unsupported(&format!(
            "block align {block_align} does not match {bytes_per_frame} bytes per frame"
        )));
    }

    Ok(WavInfo {
        sample_rate,
        layout,
        data_start,
        bytes_per_frame,
        total_frames: (data_len / bytes_per_frame) as u64,
    })
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::testutil::{ramp_frame, write_f32_wav, write_i24_wav, write_ramp_wav};

    #[test]
    fn test_open_missing_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let result = SampleAsset::open(dir.path().join("nope.wav"), NoteRange::all(), 60);
        assert!(matches!(result, Err(LoadError::NotFound { .. })));
    }

    #[test]
    fn test_open_empty_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("empty.wav");
        File::create(&path).expect("create");

        let result = SampleAsset::open(&path, NoteRange::all(), 60);
        assert!(matches!(result, Err(LoadError::MapFailed { .. })));
    }

    #[test]
    fn test_open_rejects_mono() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("mono.wav");
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 44100,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).expect("writer");
        for i in 0..64 {
            writer.write_sample(i as i16).expect("write");
        }
        writer.finalize().expect("finalize");

        let result = SampleAsset::open(&path, NoteRange::all(), 60);
        assert!(matches!(result, Err(LoadError::UnsupportedFormat { .. })));
    }

    #[test]
    fn test_open_rejects_garbage() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("garbage.wav");
        let mut file = File::create(&path).expect("create");
        file.write_all(b"this is not a wave file at all")
            .expect("write");

        let result = SampleAsset::open(&path, NoteRange::all(), 60);
        assert!(matches!(result, Err(LoadError::UnsupportedFormat { .. })));
    }

    #[test]
    fn test_open_reads_preload() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write_ramp_wav(dir.path(), "ramp.wav", 500);

        let asset = SampleAsset::open(&path, NoteRange::all(), 60).expect("open");
        assert_eq!(asset.sample_rate(), 44100);
        assert_eq!(asset.total_frames(), 500);
        // The default preload is larger than the file, so it clamps.
        assert_eq!(asset.preload_frames(), 500);

        let preload = asset.preload_buffer();
        for i in 0..500 {
            let (l, r) = ramp_frame(i);
            assert_eq!(preload.left()[i], l, "left frame {i}");
            assert_eq!(preload.right()[i], r, "right frame {i}");
        }
    }

    #[test]
    fn test_set_preload_size() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write_ramp_wav(dir.path(), "ramp.wav", 1000);
        let asset = SampleAsset::open(&path, NoteRange::all(), 60).expect("open");

        asset
            .set_preload_size(PreloadSize::Frames(100))
            .expect("resize");
        assert_eq!(asset.preload_frames(), 100);
        assert_eq!(asset.preload_memory_bytes(), 100 * 2 * 4);

        asset.load_entire_sample().expect("load entire");
        assert_eq!(asset.preload_frames(), 1000);

        // Requests past the file length clamp.
        asset
            .set_preload_size(PreloadSize::Frames(5000))
            .expect("resize");
        assert_eq!(asset.preload_frames(), 1000);
    }

    #[test]
    fn test_fill_frames_inside_and_outside_preload() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write_ramp_wav(dir.path(), "ramp.wav", 2000);
        let asset = SampleAsset::open(&path, NoteRange::all(), 60).expect("open");
        asset
            .set_preload_size(PreloadSize::Frames(256))
            .expect("resize");

        // Entirely inside the preload window: memory copy.
        let mut dest = StereoBuffer::new(64);
        asset.fill_frames(&mut dest, 64, 100);
        for i in 0..64 {
            let (l, r) = ramp_frame(100 + i);
            assert_eq!(dest.left()[i], l);
            assert_eq!(dest.right()[i], r);
        }

        // Past the preload window: decoded from the map.
        asset.fill_frames(&mut dest, 64, 1500);
        for i in 0..64 {
            let (l, r) = ramp_frame(1500 + i);
            assert_eq!(dest.left()[i], l);
            assert_eq!(dest.right()[i], r);
        }
    }

    #[test]
    fn test_fill_frames_zeroes_past_end() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write_ramp_wav(dir.path(), "ramp.wav", 100);
        let asset = SampleAsset::open(&path, NoteRange::all(), 60).expect("open");
        asset
            .set_preload_size(PreloadSize::Frames(10))
            .expect("resize");

        let mut dest = StereoBuffer::new(32);
        dest.fill(9.0);
        asset.fill_frames(&mut dest, 32, 90);

        for i in 0..10 {
            let (l, _) = ramp_frame(90 + i);
            assert_eq!(dest.left()[i], l);
        }
        assert!(dest.left()[10..].iter().all(|s| *s == 0.0));
        assert!(dest.right()[10..].iter().all(|s| *s == 0.0));
    }

    #[test]
    fn test_float_layout() {
        let dir = tempfile::tempdir().expect("tempdir");
        let frames: Vec<(f32, f32)> = (0..300).map(|i| (i as f32 * 0.001, -0.5)).collect();
        let path = write_f32_wav(dir.path(), "float.wav", &frames);

        let asset = SampleAsset::open(&path, NoteRange::all(), 60).expect("open");
        assert_eq!(asset.total_frames(), 300);

        let mut dest = StereoBuffer::new(300);
        asset.fill_frames(&mut dest, 300, 0);
        for (i, (l, r)) in frames.iter().enumerate() {
            assert_eq!(dest.left()[i], *l);
            assert_eq!(dest.right()[i], *r);
        }
    }

    #[test]
    fn test_i24_layout() {
        let dir = tempfile::tempdir().expect("tempdir");
        let frames: Vec<(i32, i32)> = vec![(0, 0), (1 << 22, -(1 << 22)), (8388607, -8388608)];
        let path = write_i24_wav(dir.path(), "deep.wav", &frames);

        let asset = SampleAsset::open(&path, NoteRange::all(), 60).expect("open");
        assert_eq!(asset.total_frames(), 3);

        let mut dest = StereoBuffer::new(3);
        asset.fill_frames(&mut dest, 3, 0);
        let scale = 1.0 / (1i64 << 23) as f32;
        for (i, (l, r)) in frames.iter().enumerate() {
            assert_eq!(dest.left()[i], *l as f32 * scale);
            assert_eq!(dest.right()[i], *r as f32 * scale);
        }
    }

    #[test]
    fn test_has_enough_frames() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write_ramp_wav(dir.path(), "ramp.wav", 100);
        let asset = SampleAsset::open(&path, NoteRange::all(), 60).expect("open");

        assert!(asset.has_enough_frames(0));
        assert!(asset.has_enough_frames(99));
        assert!(!asset.has_enough_frames(100));
        assert!(!asset.has_enough_frames(101));
    }

    #[test]
    fn test_pitch_factor() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write_ramp_wav(dir.path(), "ramp.wav", 100);
        let asset = SampleAsset::open(&path, NoteRange::all(), 60).expect("open");

        assert_eq!(asset.pitch_factor(60), 1.0);
        assert!((asset.pitch_factor(72) - 2.0).abs() < 1e-12);
        assert!((asset.pitch_factor(48) - 0.5).abs() < 1e-12);

        // Monotonic in note number.
        for note in 0..127 {
            assert!(asset.pitch_factor(note) < asset.pitch_factor(note + 1));
        }
    }

    #[test]
    fn test_note_range() {
        let range = NoteRange::span(60, 72);
        assert!(!range.contains(59));
        assert!(range.contains(60));
        assert!(range.contains(72));
        assert!(!range.contains(73));

        assert!(NoteRange::all().contains(0));
        assert!(NoteRange::all().contains(127));
        assert!(NoteRange::single(42).contains(42));
        assert!(!NoteRange::single(42).contains(43));

        let dir = tempfile::tempdir().expect("tempdir");
        let path = write_ramp_wav(dir.path(), "ramp.wav", 100);
        let asset = SampleAsset::open(&path, NoteRange::span(36, 48), 36).expect("open");
        assert!(asset.applies_to_note(40));
        assert!(!asset.applies_to_note(49));
    }
}
