//! Frame types and pixel format contracts.
//!
//! # Buffer location
//!
//! A [`HardwareFrame`] owns exactly one payload, tagged by where it lives:
//!
//! - [`FrameBuffer::Device`] wraps runtime-specific device memory
//!   (`CudaSlice<u8>` for the CUDA backend).
//! - [`FrameBuffer::Host`] wraps a plain byte vector.
//!
//! Code that needs one location asks for it through [`FrameBuffer::device`] or
//! [`FrameBuffer::host_bytes`] and gets a [`VppError::FrameLocation`] when the
//! frame lives elsewhere.
//!
//! # Plane strides
//!
//! [`Plane::stride`] counts row elements, where one element is `channels`
//! bytes wide. A stride of `0` means rows are tightly packed (`width`
//! elements). For single-channel layouts such as NV12 and Gray8 the stride is
//! therefore the row pitch in bytes.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Result, VppError};

/// Maximum number of planes a frame can carry.
pub const MAX_PLANES: usize = 2;

// ─── Pixel format ────────────────────────────────────────────────────────────

/// Memory layout of a frame payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    /// **Decoder native output.**
    /// Y plane: `height × pitch` bytes.
    /// UV plane: `(height / 2) × pitch` bytes, interleaved Cb Cr, sub-sampled 2×2.
    Nv12,

    /// Interleaved uint8 `[R G B R G B ...]`, `3 × width × height` bytes.
    Rgb24,

    /// Interleaved uint8 `[B G R B G R ...]`, `3 × width × height` bytes.
    Bgr24,

    /// Single luma plane, `width × height` bytes.
    Gray8,
}

impl PixelFormat {
    /// Minimum buffer size in bytes for the given dimensions.
    ///
    /// `pitch` is the row stride in bytes and only matters for `Nv12`; the
    /// packed formats are dense.
    #[inline]
    pub const fn byte_size(self, width: u32, height: u32, pitch: usize) -> usize {
        let w = width as usize;
        let h = height as usize;
        match self {
            Self::Nv12 => pitch * h + pitch * (h / 2),
            Self::Rgb24 | Self::Bgr24 => 3 * w * h,
            Self::Gray8 => w * h,
        }
    }

    /// Bytes per pixel element within plane 0.
    #[inline]
    pub const fn channels(self) -> u32 {
        match self {
            Self::Nv12 | Self::Gray8 => 1,
            Self::Rgb24 | Self::Bgr24 => 3,
        }
    }

    #[inline]
    pub const fn plane_count(self) -> usize {
        match self {
            Self::Nv12 => 2,
            Self::Rgb24 | Self::Bgr24 | Self::Gray8 => 1,
        }
    }
}

// ─── Destination format ──────────────────────────────────────────────────────

/// Output formats the converter can produce.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DestinationFormat {
    /// Packed RGB, produced on-device.
    Rgb24,
    /// Packed BGR, produced on-device.
    Bgr24,
    /// Downsampled grayscale, resized on the host and uploaded back.
    Y800,
}

impl DestinationFormat {
    pub const ALL: [DestinationFormat; 3] = [Self::Rgb24, Self::Bgr24, Self::Y800];

    /// Pixel layout of the converted frame.
    pub const fn pixel_format(self) -> PixelFormat {
        match self {
            Self::Rgb24 => PixelFormat::Rgb24,
            Self::Bgr24 => PixelFormat::Bgr24,
            Self::Y800 => PixelFormat::Gray8,
        }
    }

    /// Little-endian FourCC code.
    pub const fn fourcc(self) -> u32 {
        let tag = match self {
            Self::Rgb24 => *b"RGB3",
            Self::Bgr24 => *b"BGR3",
            Self::Y800 => *b"Y800",
        };
        u32::from_le_bytes(tag)
    }

    /// Resolve a FourCC code, rejecting anything outside the closed set.
    pub fn from_fourcc(code: u32) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|f| f.fourcc() == code)
            .ok_or_else(|| {
                let bytes = code.to_le_bytes();
                VppError::UnsupportedFormat(format!(
                    "fourcc 0x{code:08x} ({})",
                    String::from_utf8_lossy(&bytes)
                ))
            })
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Rgb24 => "rgb24",
            Self::Bgr24 => "bgr24",
            Self::Y800 => "y800",
        }
    }
}

impl fmt::Display for DestinationFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DestinationFormat {
    type Err = VppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rgb24" | "rgb3" => Ok(Self::Rgb24),
            "bgr24" | "bgr3" => Ok(Self::Bgr24),
            "y800" | "gray8" | "gray" => Ok(Self::Y800),
            other => Err(VppError::UnsupportedFormat(other.to_string())),
        }
    }
}

// ─── Conversion parameters ───────────────────────────────────────────────────

/// Target geometry and format for one conversion call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VppParameters {
    pub width: u32,
    pub height: u32,
    pub format: DestinationFormat,
}

impl VppParameters {
    pub const fn new(width: u32, height: u32, format: DestinationFormat) -> Self {
        Self {
            width,
            height,
            format,
        }
    }
}

// ─── Buffers ─────────────────────────────────────────────────────────────────

/// Where a frame payload is authoritative.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufferLocation {
    Device,
    Host,
}

/// Device memory owned by a frame.
#[derive(Debug)]
pub struct DeviceBuffer<M> {
    pub memory: M,
    pub byte_size: usize,
}

/// Frame payload, tagged by location.
#[derive(Debug)]
pub enum FrameBuffer<M> {
    Device(DeviceBuffer<M>),
    Host(Vec<u8>),
}

impl<M> FrameBuffer<M> {
    #[inline]
    pub fn location(&self) -> BufferLocation {
        match self {
            Self::Device(_) => BufferLocation::Device,
            Self::Host(_) => BufferLocation::Host,
        }
    }

    #[inline]
    pub fn byte_size(&self) -> usize {
        match self {
            Self::Device(buf) => buf.byte_size,
            Self::Host(bytes) => bytes.len(),
        }
    }

    pub fn device(&self) -> Result<&DeviceBuffer<M>> {
        match self {
            Self::Device(buf) => Ok(buf),
            Self::Host(_) => Err(VppError::FrameLocation {
                expected: BufferLocation::Device,
                actual: BufferLocation::Host,
            }),
        }
    }

    pub fn device_mut(&mut self) -> Result<&mut DeviceBuffer<M>> {
        match self {
            Self::Device(buf) => Ok(buf),
            Self::Host(_) => Err(VppError::FrameLocation {
                expected: BufferLocation::Device,
                actual: BufferLocation::Host,
            }),
        }
    }

    pub fn host_bytes(&self) -> Result<&[u8]> {
        match self {
            Self::Host(bytes) => Ok(bytes),
            Self::Device(_) => Err(VppError::FrameLocation {
                expected: BufferLocation::Host,
                actual: BufferLocation::Device,
            }),
        }
    }
}

// ─── Frame ───────────────────────────────────────────────────────────────────

/// One plane within a frame payload.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Plane {
    /// Byte offset of the first row inside the payload.
    pub offset: usize,
    /// Row stride in elements of `channels` bytes. `0` means tightly packed.
    pub stride: usize,
}

/// A decoded or converted video frame.
#[derive(Debug)]
pub struct HardwareFrame<M> {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub channels: u32,
    pub planes: [Plane; MAX_PLANES],
    pub buffer: FrameBuffer<M>,
}

impl<M> HardwareFrame<M> {
    /// Wrap a device-resident NV12 payload whose UV plane follows the Y plane.
    pub fn nv12_device(memory: M, byte_size: usize, width: u32, height: u32, pitch: usize) -> Self {
        Self {
            width,
            height,
            format: PixelFormat::Nv12,
            channels: 1,
            planes: nv12_planes(height, pitch),
            buffer: FrameBuffer::Device(DeviceBuffer { memory, byte_size }),
        }
    }

    /// Wrap a host-resident NV12 payload.
    pub fn nv12_host(bytes: Vec<u8>, width: u32, height: u32, pitch: usize) -> Result<Self> {
        if pitch < width as usize {
            return Err(VppError::DimensionMismatch(format!(
                "NV12 pitch {pitch} is narrower than width {width}"
            )));
        }
        let need = PixelFormat::Nv12.byte_size(width, height, pitch);
        if bytes.len() < need {
            return Err(VppError::BufferTooSmall {
                need,
                have: bytes.len(),
            });
        }
        Ok(Self {
            width,
            height,
            format: PixelFormat::Nv12,
            channels: 1,
            planes: nv12_planes(height, pitch),
            buffer: FrameBuffer::Host(bytes),
        })
    }

    /// Wrap a tightly packed single-plane host payload (RGB24, BGR24, Gray8).
    pub fn packed_host(bytes: Vec<u8>, width: u32, height: u32, format: PixelFormat) -> Result<Self> {
        if format == PixelFormat::Nv12 {
            return Err(VppError::FormatMismatch {
                expected: PixelFormat::Gray8,
                actual: format,
            });
        }
        let need = format.byte_size(width, height, 0);
        if bytes.len() < need {
            return Err(VppError::BufferTooSmall {
                need,
                have: bytes.len(),
            });
        }
        Ok(Self {
            width,
            height,
            format,
            channels: format.channels(),
            planes: [
                Plane {
                    offset: 0,
                    stride: width as usize,
                },
                Plane::default(),
            ],
            buffer: FrameBuffer::Host(bytes),
        })
    }

    /// Byte distance between the starts of consecutive rows of `plane`.
    #[inline]
    pub fn row_advance(&self, plane: usize) -> usize {
        let stride = self.planes[plane].stride;
        let elements = if stride != 0 {
            stride
        } else {
            self.width as usize
        };
        self.channels as usize * elements
    }

    /// Number of rows stored in `plane`.
    #[inline]
    pub fn plane_rows(&self, plane: usize) -> usize {
        match (self.format, plane) {
            (PixelFormat::Nv12, 1) => self.height as usize / 2,
            _ => self.height as usize,
        }
    }
}

fn nv12_planes(height: u32, pitch: usize) -> [Plane; MAX_PLANES] {
    [
        Plane {
            offset: 0,
            stride: pitch,
        },
        Plane {
            offset: pitch * height as usize,
            stride: pitch,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nv12_byte_size_includes_half_height_chroma() {
        assert_eq!(PixelFormat::Nv12.byte_size(4, 4, 8), 8 * 4 + 8 * 2);
        assert_eq!(PixelFormat::Rgb24.byte_size(4, 2, 0), 24);
        assert_eq!(PixelFormat::Gray8.byte_size(4, 2, 0), 8);
    }

    #[test]
    fn destination_parsing_rejects_unknown_names() {
        assert_eq!("RGB24".parse::<DestinationFormat>().unwrap(), DestinationFormat::Rgb24);
        assert_eq!("gray8".parse::<DestinationFormat>().unwrap(), DestinationFormat::Y800);
        let err = "nv21".parse::<DestinationFormat>().unwrap_err();
        assert!(matches!(err, VppError::UnsupportedFormat(ref s) if s == "nv21"));
    }

    #[test]
    fn fourcc_lookup_is_closed() {
        for format in DestinationFormat::ALL {
            assert_eq!(DestinationFormat::from_fourcc(format.fourcc()).unwrap(), format);
        }
        let nv12 = u32::from_le_bytes(*b"NV12");
        assert!(matches!(
            DestinationFormat::from_fourcc(nv12),
            Err(VppError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn wrong_location_access_is_checked() {
        let frame: HardwareFrame<()> =
            HardwareFrame::nv12_host(vec![0; 12], 4, 2, 4).expect("valid frame");
        assert!(frame.buffer.host_bytes().is_ok());
        assert!(matches!(
            frame.buffer.device(),
            Err(VppError::FrameLocation {
                expected: BufferLocation::Device,
                actual: BufferLocation::Host
            })
        ));
        assert_eq!(frame.planes[1].offset, 8);
        assert_eq!(frame.plane_rows(1), 1);
    }

    #[test]
    fn host_constructors_validate_length() {
        let err = HardwareFrame::<()>::nv12_host(vec![0; 11], 4, 2, 4).unwrap_err();
        assert!(matches!(err, VppError::BufferTooSmall { need: 12, have: 11 }));

        let rgb = HardwareFrame::<()>::packed_host(vec![0; 24], 4, 2, PixelFormat::Rgb24)
            .expect("valid rgb frame");
        assert_eq!(rgb.channels, 3);
        assert_eq!(rgb.row_advance(0), 12);
    }

    #[test]
    fn zero_stride_falls_back_to_width() {
        let mut frame =
            HardwareFrame::<()>::packed_host(vec![0; 8], 4, 2, PixelFormat::Gray8).unwrap();
        frame.planes[0].stride = 0;
        assert_eq!(frame.row_advance(0), 4);
    }
}
