//! Host-memory device runtime.
//!
//! Stands in for a GPU on build hosts without one: "device" allocations are
//! plain byte vectors, streams are counters, and the conversion kernels run the
//! same BT.709 math on the CPU. Faults can be injected per operation so error
//! propagation can be exercised without hardware.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use crate::device::{ColorKernels, DeviceProperties, DeviceRuntime};
use crate::error::{Result, VppError};
use crate::types::{HardwareFrame, PixelFormat};

/// Memory owned by the emulated device.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HostMemory {
    bytes: Vec<u8>,
}

impl HostMemory {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Emulated stream handle.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct HostStream {
    pub id: usize,
}

/// Operation that can be made to fail once.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FaultPoint {
    Alloc,
    CopyToHost,
    CopyToDevice,
}

/// Operation counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HostRuntimeStats {
    pub streams_created: usize,
    pub allocations: u64,
    pub host_copies: u64,
    pub device_copies: u64,
}

pub struct HostRuntime {
    properties: DeviceProperties,
    next_stream: AtomicUsize,
    allocations: AtomicU64,
    host_copies: AtomicU64,
    device_copies: AtomicU64,
    fail_alloc: AtomicBool,
    fail_copy_to_host: AtomicBool,
    fail_copy_to_device: AtomicBool,
}

impl HostRuntime {
    pub fn new() -> Self {
        Self {
            properties: DeviceProperties {
                name: "host-emulated".to_string(),
                ordinal: 0,
                max_threads_per_block: 1024,
                total_memory_bytes: 0,
            },
            next_stream: AtomicUsize::new(0),
            allocations: AtomicU64::new(0),
            host_copies: AtomicU64::new(0),
            device_copies: AtomicU64::new(0),
            fail_alloc: AtomicBool::new(false),
            fail_copy_to_host: AtomicBool::new(false),
            fail_copy_to_device: AtomicBool::new(false),
        }
    }

    /// Make the next call at `point` fail with a transfer error.
    pub fn fail_next(&self, point: FaultPoint) {
        self.fault_flag(point).store(true, Ordering::SeqCst);
    }

    pub fn stats(&self) -> HostRuntimeStats {
        HostRuntimeStats {
            streams_created: self.next_stream.load(Ordering::Relaxed),
            allocations: self.allocations.load(Ordering::Relaxed),
            host_copies: self.host_copies.load(Ordering::Relaxed),
            device_copies: self.device_copies.load(Ordering::Relaxed),
        }
    }

    /// Upload a host NV12 payload as a device-resident frame.
    pub fn upload_nv12(
        &self,
        bytes: &[u8],
        width: u32,
        height: u32,
        pitch: usize,
    ) -> Result<HardwareFrame<HostMemory>> {
        let need = PixelFormat::Nv12.byte_size(width, height, pitch);
        if bytes.len() < need {
            return Err(VppError::BufferTooSmall {
                need,
                have: bytes.len(),
            });
        }
        let mut memory = self.alloc(need)?;
        self.copy_to_device(&bytes[..need], &mut memory)?;
        Ok(HardwareFrame::nv12_device(memory, need, width, height, pitch))
    }

    fn fault_flag(&self, point: FaultPoint) -> &AtomicBool {
        match point {
            FaultPoint::Alloc => &self.fail_alloc,
            FaultPoint::CopyToHost => &self.fail_copy_to_host,
            FaultPoint::CopyToDevice => &self.fail_copy_to_device,
        }
    }

    fn take_fault(&self, point: FaultPoint) -> bool {
        self.fault_flag(point).swap(false, Ordering::SeqCst)
    }
}

impl Default for HostRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceRuntime for HostRuntime {
    type Stream = HostStream;
    type Memory = HostMemory;

    fn properties(&self) -> &DeviceProperties {
        &self.properties
    }

    fn create_stream(&self) -> Result<HostStream> {
        let id = self.next_stream.fetch_add(1, Ordering::Relaxed);
        Ok(HostStream { id })
    }

    fn synchronize(&self, _stream: &HostStream) -> Result<()> {
        Ok(())
    }

    fn alloc(&self, bytes: usize) -> Result<HostMemory> {
        if self.take_fault(FaultPoint::Alloc) {
            return Err(VppError::transfer("alloc", "injected allocation failure"));
        }
        self.allocations.fetch_add(1, Ordering::Relaxed);
        Ok(HostMemory {
            bytes: vec![0; bytes],
        })
    }

    fn copy_to_host(&self, src: &HostMemory, offset: usize, dst: &mut [u8]) -> Result<()> {
        if self.take_fault(FaultPoint::CopyToHost) {
            return Err(VppError::transfer("copy_to_host", "injected copy failure"));
        }
        let end = offset + dst.len();
        let region = src.bytes.get(offset..end).ok_or_else(|| {
            VppError::transfer(
                "copy_to_host",
                format!("range {offset}..{end} outside allocation of {} bytes", src.len()),
            )
        })?;
        dst.copy_from_slice(region);
        self.host_copies.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn copy_to_device(&self, src: &[u8], dst: &mut HostMemory) -> Result<()> {
        if self.take_fault(FaultPoint::CopyToDevice) {
            return Err(VppError::transfer("copy_to_device", "injected copy failure"));
        }
        let have = dst.len();
        let region = dst.bytes.get_mut(..src.len()).ok_or_else(|| {
            VppError::transfer(
                "copy_to_device",
                format!("{} bytes do not fit allocation of {have} bytes", src.len()),
            )
        })?;
        region.copy_from_slice(src);
        self.device_copies.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

// ─── CPU reference kernels ───────────────────────────────────────────────────

/// Channel order of a packed output.
#[derive(Clone, Copy)]
enum Order {
    Rgb,
    Bgr,
}

/// CPU implementation of the conversion kernels for [`HostRuntime`].
///
/// BT.709 full range. Output pixels map to source pixels by nearest
/// neighbour, so equal dimensions are a plain colour conversion.
#[derive(Clone, Copy, Debug, Default)]
pub struct HostKernels;

impl HostKernels {
    fn run(
        &self,
        kernel: &'static str,
        order: Order,
        input: &HardwareFrame<HostMemory>,
        output: &mut HardwareFrame<HostMemory>,
    ) -> Result<()> {
        if input.format != PixelFormat::Nv12 {
            return Err(VppError::FormatMismatch {
                expected: PixelFormat::Nv12,
                actual: input.format,
            });
        }
        if input.width % 2 != 0 || input.height % 2 != 0 {
            return Err(VppError::DimensionMismatch(format!(
                "NV12 input {}x{} must have even dimensions",
                input.width, input.height
            )));
        }
        let src = input.buffer.device()?.memory.as_slice();
        let (in_w, in_h) = (input.width as usize, input.height as usize);
        let (out_w, out_h) = (output.width as usize, output.height as usize);
        let y_plane = input.planes[0];
        let uv_plane = input.planes[1];
        let need = uv_plane.offset + uv_plane.stride * (in_h / 2).max(1);
        if src.len() < need {
            return Err(VppError::Kernel {
                kernel,
                detail: format!("input holds {} bytes, NV12 layout needs {need}", src.len()),
            });
        }

        let row_bytes = output.row_advance(0);
        let dst = output.buffer.device_mut()?.memory.as_mut_slice();
        if dst.len() < row_bytes * out_h {
            return Err(VppError::Kernel {
                kernel,
                detail: format!(
                    "output holds {} bytes, needs {}",
                    dst.len(),
                    row_bytes * out_h
                ),
            });
        }

        for oy in 0..out_h {
            let sy = oy * in_h / out_h;
            for ox in 0..out_w {
                let sx = ox * in_w / out_w;
                let y = src[y_plane.offset + sy * y_plane.stride + sx];
                let uv = uv_plane.offset + (sy / 2) * uv_plane.stride + (sx / 2) * 2;
                let [r, g, b] = bt709_to_rgb(y, src[uv], src[uv + 1]);
                let px = oy * row_bytes + ox * 3;
                let rgb = match order {
                    Order::Rgb => [r, g, b],
                    Order::Bgr => [b, g, r],
                };
                dst[px..px + 3].copy_from_slice(&rgb);
            }
        }
        Ok(())
    }
}

impl ColorKernels<HostRuntime> for HostKernels {
    fn nv12_to_rgb24(
        &self,
        input: &HardwareFrame<HostMemory>,
        output: &mut HardwareFrame<HostMemory>,
        _thread_budget: u32,
        _stream: &HostStream,
    ) -> Result<()> {
        self.run("nv12_to_rgb24", Order::Rgb, input, output)
    }

    fn nv12_to_bgr24(
        &self,
        input: &HardwareFrame<HostMemory>,
        output: &mut HardwareFrame<HostMemory>,
        _thread_budget: u32,
        _stream: &HostStream,
    ) -> Result<()> {
        self.run("nv12_to_bgr24", Order::Bgr, input, output)
    }
}

/// BT.709 full-range YUV → RGB for one pixel.
pub fn bt709_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let y = y as f32;
    let u = u as f32 - 128.0;
    let v = v as f32 - 128.0;
    let clamp = |x: f32| (x + 0.5).clamp(0.0, 255.0) as u8;
    [
        clamp(y + 1.5748 * v),
        clamp(y - 0.1873 * u - 0.4681 * v),
        clamp(y + 1.8556 * u),
    ]
}
