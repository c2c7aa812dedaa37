//! Raw planar frame dumps.
//!
//! # Layout
//!
//! No header and no frame boundaries: each frame is `height` rows of plane 0,
//! `width × channels` bytes each, followed for NV12 by `height / 2` rows of
//! plane 1. Readers must know geometry and format out of band.
//!
//! ```bash
//! ffplay -f rawvideo -pixel_format gray -video_size 640x360 Processed_0.yuv
//! ```

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use tracing::{debug, info};

use vpp_core::error::{Result, VppError};
use vpp_core::{HardwareFrame, PixelFormat};

/// Serializes host-resident frames to a byte sink.
pub struct FrameDumpWriter;

impl FrameDumpWriter {
    /// Write `frame` to `sink` and flush it. Returns the bytes written.
    ///
    /// Rows advance by `channels × stride`, or `channels × width` when the
    /// plane declares no stride.
    pub fn write<M, W: Write>(frame: &HardwareFrame<M>, sink: &mut W) -> Result<usize> {
        let bytes = frame.buffer.host_bytes()?;
        let planes: &[usize] = match frame.format {
            PixelFormat::Nv12 => &[0, 1],
            _ => &[0],
        };
        // A short buffer must not leave a partial frame in the sink.
        for &plane in planes {
            let end = plane_end(frame, plane);
            if end > bytes.len() {
                return Err(VppError::BufferTooSmall {
                    need: end,
                    have: bytes.len(),
                });
            }
        }

        let mut written = 0;
        for &plane in planes {
            written += write_plane(frame, bytes, plane, sink)?;
        }
        sink.flush()?;
        Ok(written)
    }

    /// Bytes [`write`](Self::write) emits for a frame of this geometry.
    pub fn frame_size<M>(frame: &HardwareFrame<M>) -> usize {
        let row = frame.width as usize * frame.channels as usize;
        let rows = match frame.format {
            PixelFormat::Nv12 => frame.plane_rows(0) + frame.plane_rows(1),
            _ => frame.plane_rows(0),
        };
        row * rows
    }
}

/// One past the last byte of `plane`'s final row.
fn plane_end<M>(frame: &HardwareFrame<M>, plane: usize) -> usize {
    let rows = frame.plane_rows(plane);
    if rows == 0 {
        return 0;
    }
    let row_len = frame.width as usize * frame.channels as usize;
    frame.planes[plane].offset + (rows - 1) * frame.row_advance(plane) + row_len
}

fn write_plane<M, W: Write>(
    frame: &HardwareFrame<M>,
    bytes: &[u8],
    plane: usize,
    sink: &mut W,
) -> Result<usize> {
    let row_len = frame.width as usize * frame.channels as usize;
    let advance = frame.row_advance(plane);
    let start = frame.planes[plane].offset;
    let rows = frame.plane_rows(plane);

    for r in 0..rows {
        let begin = start + r * advance;
        let end = begin + row_len;
        let row = bytes.get(begin..end).ok_or(VppError::BufferTooSmall {
            need: end,
            have: bytes.len(),
        })?;
        sink.write_all(row)?;
    }
    Ok(rows * row_len)
}

struct DumpState {
    writer: BufWriter<File>,
    frames: u64,
    bytes: u64,
}

/// One pooled dump file, `Processed_<slot>.yuv`.
pub struct DumpFile {
    path: PathBuf,
    slot: usize,
    state: Mutex<DumpState>,
}

impl DumpFile {
    pub fn file_name(slot: usize) -> String {
        format!("Processed_{slot}.yuv")
    }

    /// Create (or truncate) the dump file for `slot` inside `dir`.
    pub fn open(dir: &Path, slot: usize) -> Result<Self> {
        let path = dir.join(Self::file_name(slot));
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .map_err(|e| {
                VppError::Io(std::io::Error::new(
                    e.kind(),
                    format!("failed to open dump file {}: {e}", path.display()),
                ))
            })?;
        debug!(path = %path.display(), slot, "dump file opened");

        Ok(Self {
            path,
            slot,
            state: Mutex::new(DumpState {
                writer: BufWriter::with_capacity(1024 * 1024, file),
                frames: 0,
                bytes: 0,
            }),
        })
    }

    /// Append one host-resident frame. Returns the bytes written.
    pub fn append<M>(&self, frame: &HardwareFrame<M>) -> Result<usize> {
        let mut state = self.lock();
        let written = FrameDumpWriter::write(frame, &mut state.writer)?;
        state.frames += 1;
        state.bytes += written as u64;

        if state.frames.is_multiple_of(100) {
            debug!(
                slot = self.slot,
                frames = state.frames,
                bytes_mb = state.bytes / (1024 * 1024),
                "Dump progress"
            );
        }
        Ok(written)
    }

    pub fn flush(&self) -> Result<()> {
        self.lock().writer.flush()?;
        Ok(())
    }

    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[inline]
    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn frames_written(&self) -> u64 {
        self.lock().frames
    }

    pub fn bytes_written(&self) -> u64 {
        self.lock().bytes
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, DumpState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for DumpFile {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        let _ = state.writer.flush();
        info!(
            path = %self.path.display(),
            frames = state.frames,
            bytes = state.bytes,
            "Dump file closed"
        );
    }
}
