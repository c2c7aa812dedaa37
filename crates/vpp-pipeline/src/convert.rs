//! Format conversion dispatch.
//!
//! ```text
//! NV12 (device)
//!   ├── Rgb24 → nv12_to_rgb24 kernel         → packed RGB (device, input size)
//!   ├── Bgr24 → nv12_to_bgr24 kernel         → packed BGR (device, target size)
//!   └── Y800  → download Y + UV (host)
//!               → bilinear resize of Y        → upload      → Gray8 (device)
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tracing::{debug, warn};

use vpp_core::error::{Result, VppError};
use vpp_core::{
    ColorKernels, DestinationFormat, DeviceBuffer, DeviceRuntime, FrameBuffer, HardwareFrame,
    PixelFormat, Plane, VppParameters,
};

use crate::resize::{PlaneView, resize_plane};

/// Converts decoded NV12 frames into the requested destination format.
pub struct FormatConverter<R: DeviceRuntime, K> {
    runtime: Arc<R>,
    kernels: K,
    rgb_size_warned: AtomicBool,
    host_round_trips: AtomicU64,
}

impl<R, K> FormatConverter<R, K>
where
    R: DeviceRuntime,
    K: ColorKernels<R>,
{
    pub fn new(runtime: Arc<R>, kernels: K) -> Self {
        Self {
            runtime,
            kernels,
            rgb_size_warned: AtomicBool::new(false),
            host_round_trips: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn runtime(&self) -> &Arc<R> {
        &self.runtime
    }

    /// Frames staged through host memory so far (one per Y800 conversion).
    pub fn host_round_trips(&self) -> u64 {
        self.host_round_trips.load(Ordering::Relaxed)
    }

    /// Convert `input` on `stream`.
    ///
    /// Device-resident output for every format. Any failed device call aborts
    /// the conversion; no partial frame is returned.
    pub fn convert(
        &self,
        input: &HardwareFrame<R::Memory>,
        params: &VppParameters,
        stream: &R::Stream,
    ) -> Result<HardwareFrame<R::Memory>> {
        if input.format != PixelFormat::Nv12 {
            return Err(VppError::FormatMismatch {
                expected: PixelFormat::Nv12,
                actual: input.format,
            });
        }
        if input.width == 0 || input.height == 0 {
            return Err(VppError::DimensionMismatch(format!(
                "input frame {}x{} has no pixels",
                input.width, input.height
            )));
        }
        // 4:2:0 chroma covers 2×2 luma blocks.
        if input.width % 2 != 0 || input.height % 2 != 0 {
            return Err(VppError::DimensionMismatch(format!(
                "NV12 input {}x{} must have even dimensions",
                input.width, input.height
            )));
        }

        let thread_budget = self.runtime.properties().max_threads_per_block;
        match params.format {
            DestinationFormat::Rgb24 => {
                // Resize is not wired into the RGB path: output keeps the
                // input geometry whatever the target says.
                if (params.width, params.height) != (input.width, input.height)
                    && !self.rgb_size_warned.swap(true, Ordering::Relaxed)
                {
                    warn!(
                        input_width = input.width,
                        input_height = input.height,
                        target_width = params.width,
                        target_height = params.height,
                        "RGB24 output keeps input dimensions; target size ignored"
                    );
                }
                let mut output = self.alloc_output(input.width, input.height, PixelFormat::Rgb24)?;
                self.kernels
                    .nv12_to_rgb24(input, &mut output, thread_budget, stream)?;
                Ok(output)
            }
            DestinationFormat::Bgr24 => {
                check_target(params)?;
                let mut output = self.alloc_output(params.width, params.height, PixelFormat::Bgr24)?;
                self.kernels
                    .nv12_to_bgr24(input, &mut output, thread_budget, stream)?;
                Ok(output)
            }
            DestinationFormat::Y800 => {
                check_target(params)?;
                self.to_gray(input, params)
            }
        }
    }

    fn to_gray(
        &self,
        input: &HardwareFrame<R::Memory>,
        params: &VppParameters,
    ) -> Result<HardwareFrame<R::Memory>> {
        let staged = self.download_nv12(input)?;
        let luma = PlaneView::from_frame(&staged, 0)?;
        // Only luma feeds the grayscale output; the staged chroma is dropped
        // with the host frame.
        let resized = resize_plane(&luma, params.width as usize, params.height as usize)?;

        let mut output = self.alloc_output(params.width, params.height, PixelFormat::Gray8)?;
        self.runtime
            .copy_to_device(&resized, &mut output.buffer.device_mut()?.memory)?;

        debug!(
            from_width = input.width,
            from_height = input.height,
            to_width = params.width,
            to_height = params.height,
            "Y800 downscale complete"
        );
        Ok(output)
    }

    /// Copy both NV12 planes of a device frame into a fresh host frame.
    fn download_nv12(&self, input: &HardwareFrame<R::Memory>) -> Result<HardwareFrame<R::Memory>> {
        let device = input.buffer.device()?;
        let luma_len = input.row_advance(0) * input.plane_rows(0);
        let chroma_len = input.row_advance(1) * input.plane_rows(1);

        let mut bytes = vec![0u8; luma_len + chroma_len];
        let (luma, chroma) = bytes.split_at_mut(luma_len);
        self.runtime
            .copy_to_host(&device.memory, input.planes[0].offset, luma)?;
        self.runtime
            .copy_to_host(&device.memory, input.planes[1].offset, chroma)?;
        self.host_round_trips.fetch_add(1, Ordering::Relaxed);
        debug!(bytes = luma_len + chroma_len, "NV12 staged through host memory");

        Ok(HardwareFrame {
            width: input.width,
            height: input.height,
            format: PixelFormat::Nv12,
            channels: 1,
            planes: [
                Plane {
                    offset: 0,
                    stride: input.planes[0].stride,
                },
                Plane {
                    offset: luma_len,
                    stride: input.planes[1].stride,
                },
            ],
            buffer: FrameBuffer::Host(bytes),
        })
    }

    fn alloc_output(
        &self,
        width: u32,
        height: u32,
        format: PixelFormat,
    ) -> Result<HardwareFrame<R::Memory>> {
        let byte_size = format.byte_size(width, height, 0);
        let memory = self.runtime.alloc(byte_size)?;
        Ok(HardwareFrame {
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
            buffer: FrameBuffer::Device(DeviceBuffer { memory, byte_size }),
        })
    }
}

fn check_target(params: &VppParameters) -> Result<()> {
    if params.width == 0 || params.height == 0 {
        return Err(VppError::DimensionMismatch(format!(
            "target {}x{} has no pixels",
            params.width, params.height
        )));
    }
    Ok(())
}
