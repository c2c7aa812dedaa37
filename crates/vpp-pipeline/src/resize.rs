//! Bilinear resize on host-resident planes.
//!
//! Source coordinates use `ratio = (in - 1) / out`, which keeps the 2×2
//! neighbourhood inside the source for every destination pixel. Neighbour
//! indices are additionally clamped to the last row/column so 1-pixel sources
//! and upscales stay in bounds.

use vpp_core::error::{Result, VppError};
use vpp_core::{HardwareFrame, PixelFormat};

/// Borrowed view of one plane.
#[derive(Clone, Copy, Debug)]
pub struct PlaneView<'a> {
    pub data: &'a [u8],
    /// Width in samples (pixels for luma, chroma pairs for NV12 UV).
    pub width: usize,
    pub height: usize,
    /// Row stride in bytes.
    pub stride: usize,
    /// Interleaved components per sample (1 for luma, 2 for NV12 UV).
    pub components: usize,
}

impl<'a> PlaneView<'a> {
    pub fn luma(data: &'a [u8], width: usize, height: usize, stride: usize) -> Self {
        Self {
            data,
            width,
            height,
            stride,
            components: 1,
        }
    }

    /// View plane `index` of a host-resident frame.
    ///
    /// An odd-width NV12 frame carries a final chroma pair for its last luma
    /// column, so its pitch must cover `width + 1` bytes.
    pub fn from_frame<M>(frame: &'a HardwareFrame<M>, index: usize) -> Result<Self> {
        let bytes = frame.buffer.host_bytes()?;
        let plane = frame.planes[index];
        let data = bytes.get(plane.offset..).ok_or(VppError::BufferTooSmall {
            need: plane.offset,
            have: bytes.len(),
        })?;
        let (width, components) = match (frame.format, index) {
            (PixelFormat::Nv12, 1) => (frame.width.div_ceil(2) as usize, 2),
            _ => (frame.width as usize, frame.channels as usize),
        };
        Ok(Self {
            data,
            width,
            height: frame.plane_rows(index),
            stride: frame.row_advance(index),
            components,
        })
    }

    fn required_len(&self) -> usize {
        match self.height {
            0 => 0,
            h => self.stride * (h - 1) + self.width * self.components,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 || self.components == 0 {
            return Err(VppError::DimensionMismatch(format!(
                "empty source plane {}x{}x{}",
                self.width, self.height, self.components
            )));
        }
        if self.stride < self.width * self.components {
            return Err(VppError::DimensionMismatch(format!(
                "stride {} narrower than row of {} bytes",
                self.stride,
                self.width * self.components
            )));
        }
        let need = self.required_len();
        if self.data.len() < need {
            return Err(VppError::BufferTooSmall {
                need,
                have: self.data.len(),
            });
        }
        Ok(())
    }
}

/// Resize one plane to `out_width × out_height` samples.
///
/// Output rows are tightly packed (`out_width × components` bytes).
pub fn resize_plane(src: &PlaneView<'_>, out_width: usize, out_height: usize) -> Result<Vec<u8>> {
    src.validate()?;
    if out_width == 0 || out_height == 0 {
        return Err(VppError::DimensionMismatch(format!(
            "target {out_width}x{out_height} has no pixels"
        )));
    }

    let comps = src.components;
    let x_ratio = (src.width - 1) as f32 / out_width as f32;
    let y_ratio = (src.height - 1) as f32 / out_height as f32;
    let last_x = src.width - 1;
    let last_y = src.height - 1;
    let data = src.data;

    let mut out = Vec::with_capacity(out_width * out_height * comps);
    for i in 0..out_height {
        let fy = y_ratio * i as f32;
        let y = fy as usize;
        let y_h = fy - y as f32;
        let row0 = y * src.stride;
        let row1 = (y + 1).min(last_y) * src.stride;

        for j in 0..out_width {
            let fx = x_ratio * j as f32;
            let x = fx as usize;
            let x_w = fx - x as f32;
            let col0 = x * comps;
            let col1 = (x + 1).min(last_x) * comps;

            for c in 0..comps {
                let a = data[row0 + col0 + c] as f32;
                let b = data[row0 + col1 + c] as f32;
                let cc = data[row1 + col0 + c] as f32;
                let d = data[row1 + col1 + c] as f32;

                // Y = A(1-w)(1-h) + B(w)(1-h) + C(h)(1-w) + D(wh)
                let value = a * (1.0 - x_w) * (1.0 - y_h)
                    + b * x_w * (1.0 - y_h)
                    + cc * y_h * (1.0 - x_w)
                    + d * (x_w * y_h);
                out.push(value as u8);
            }
        }
    }
    Ok(out)
}

/// Resize a host-resident NV12 frame, luma and chroma independently.
///
/// Target dimensions must be even so the chroma plane stays 2×2 subsampled.
/// The output is tightly packed with `pitch = out_width`.
pub fn resize_nv12<M>(
    frame: &HardwareFrame<M>,
    out_width: u32,
    out_height: u32,
) -> Result<HardwareFrame<M>> {
    if frame.format != PixelFormat::Nv12 {
        return Err(VppError::FormatMismatch {
            expected: PixelFormat::Nv12,
            actual: frame.format,
        });
    }
    if out_width % 2 != 0 || out_height % 2 != 0 {
        return Err(VppError::DimensionMismatch(format!(
            "NV12 target {out_width}x{out_height} must have even dimensions"
        )));
    }

    let luma = resize_plane(
        &PlaneView::from_frame(frame, 0)?,
        out_width as usize,
        out_height as usize,
    )?;
    let chroma = resize_plane(
        &PlaneView::from_frame(frame, 1)?,
        out_width as usize / 2,
        out_height as usize / 2,
    )?;

    let mut bytes = luma;
    bytes.extend_from_slice(&chroma);
    HardwareFrame::nv12_host(bytes, out_width, out_height, out_width as usize)
}
