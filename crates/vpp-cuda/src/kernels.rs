//! NVRTC kernels: NV12 → packed RGB24 / BGR24.
//!
//! CUDA C source is compiled to PTX once and loaded into the device as a named
//! module; function handles are resolved once and reused for every frame.
//!
//! Colour space is BT.709 full range. Output pixels sample the source by
//! nearest neighbour, so the RGB24 path (same dimensions) is a pure colour
//! conversion and the BGR24 path can change size in the same pass.

use std::sync::Arc;

use cudarc::driver::{CudaDevice, CudaFunction, CudaSlice, DevicePtr, LaunchAsync, LaunchConfig};
use tracing::info;

use vpp_core::error::{Result, VppError};
use vpp_core::{ColorKernels, HardwareFrame, PixelFormat};

use crate::runtime::{CudaRuntime, PooledStream};

const PACKED_RGB_CUDA_SRC: &str = r#"
extern "C" __global__ void nv12_to_packed_rgb(
    const unsigned char* __restrict__ y_plane,
    const unsigned char* __restrict__ uv_plane,
    unsigned char*       __restrict__ output,
    int in_width,
    int in_height,
    int y_pitch,
    int uv_pitch,
    int out_width,
    int out_height,
    int out_pitch,
    int swap_rb)
{
    int x = blockIdx.x * blockDim.x + threadIdx.x;
    int y = blockIdx.y * blockDim.y + threadIdx.y;
    if (x >= out_width || y >= out_height) return;

    int sx = (int)(((long long)x * in_width) / out_width);
    int sy = (int)(((long long)y * in_height) / out_height);

    float Y = (float)y_plane[sy * y_pitch + sx];
    int uv = (sy >> 1) * uv_pitch + (sx >> 1) * 2;
    float U = (float)uv_plane[uv    ] - 128.0f;
    float V = (float)uv_plane[uv + 1] - 128.0f;

    float r = fminf(fmaxf(Y + 1.5748f * V + 0.5f, 0.0f), 255.0f);
    float g = fminf(fmaxf(Y - 0.1873f * U - 0.4681f * V + 0.5f, 0.0f), 255.0f);
    float b = fminf(fmaxf(Y + 1.8556f * U + 0.5f, 0.0f), 255.0f);

    int o = y * out_pitch + x * 3;
    output[o    ] = (unsigned char)(swap_rb ? b : r);
    output[o + 1] = (unsigned char)g;
    output[o + 2] = (unsigned char)(swap_rb ? r : b);
}
"#;

const MODULE_NAME: &str = "vpp_packed_rgb";
const KERNEL_NAME: &str = "nv12_to_packed_rgb";

/// Resolved handle for the packed-RGB kernel.
pub struct PackedRgbKernels {
    device: Arc<CudaDevice>,
    nv12_to_packed: CudaFunction,
}

impl PackedRgbKernels {
    /// Compile the CUDA C source via NVRTC and load the kernel handle.
    ///
    /// Call once at startup.
    pub fn compile(runtime: &CudaRuntime) -> Result<Self> {
        let device = runtime.device();
        let ptx = cudarc::nvrtc::compile_ptx(PACKED_RGB_CUDA_SRC).map_err(|e| {
            VppError::Kernel {
                kernel: KERNEL_NAME,
                detail: format!("NVRTC compile failed: {e}"),
            }
        })?;
        device
            .load_ptx(ptx, MODULE_NAME, &[KERNEL_NAME])
            .map_err(|e| VppError::Kernel {
                kernel: KERNEL_NAME,
                detail: format!("module load failed: {e}"),
            })?;
        let nv12_to_packed =
            device
                .get_func(MODULE_NAME, KERNEL_NAME)
                .ok_or_else(|| VppError::Kernel {
                    kernel: KERNEL_NAME,
                    detail: format!("function not found in module '{MODULE_NAME}'"),
                })?;
        info!("NVRTC: compiled {KERNEL_NAME} into module '{MODULE_NAME}'");
        Ok(Self {
            device: Arc::clone(device),
            nv12_to_packed,
        })
    }

    fn launch(
        &self,
        kernel: &'static str,
        swap_rb: bool,
        input: &HardwareFrame<CudaSlice<u8>>,
        output: &mut HardwareFrame<CudaSlice<u8>>,
        thread_budget: u32,
        stream: &PooledStream,
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
        let in_buf = input.buffer.device()?;
        let base = *in_buf.memory.device_ptr();
        let y_ptr = base + input.planes[0].offset as u64;
        let uv_ptr = base + input.planes[1].offset as u64;

        let out_pitch = output.row_advance(0);
        let (out_w, out_h) = (output.width, output.height);
        let out_buf = output.buffer.device_mut()?;
        let need = out_pitch * out_h as usize;
        if out_buf.byte_size < need {
            return Err(VppError::BufferTooSmall {
                need,
                have: out_buf.byte_size,
            });
        }
        let out_ptr = *out_buf.memory.device_ptr();
        let config = launch_config_2d(out_w, out_h, thread_budget);

        // Allocations, their zero-fill and uploads are queued on the device's
        // default stream; the consumer stream must not start before them.
        stream.0.wait_for_default().map_err(|e| VppError::Kernel {
            kernel,
            detail: format!("stream wait for default failed: {e}"),
        })?;

        // SAFETY:
        // - All pointers are device pointers from the same CudaDevice.
        // - The kernel reads Y rows [0, in_height) and UV rows [0, in_height/2)
        //   at the input pitches, all inside `input`'s allocation.
        // - It writes out_pitch × out_height bytes, checked above.
        unsafe {
            self.nv12_to_packed.clone().launch_on_stream(
                &stream.0,
                config,
                (
                    y_ptr,
                    uv_ptr,
                    out_ptr,
                    input.width as i32,
                    input.height as i32,
                    input.planes[0].stride as i32,
                    input.planes[1].stride as i32,
                    out_w as i32,
                    out_h as i32,
                    out_pitch as i32,
                    swap_rb as i32,
                ),
            )
        }
        .map_err(|e| VppError::Kernel {
            kernel,
            detail: e.to_string(),
        })?;

        // Frees and copies on the default stream (dropping `input`, reading the
        // output back) must see the kernel's writes.
        self.device.wait_for(&stream.0).map_err(|e| VppError::Kernel {
            kernel,
            detail: format!("default stream wait failed: {e}"),
        })
    }
}

impl ColorKernels<CudaRuntime> for PackedRgbKernels {
    fn nv12_to_rgb24(
        &self,
        input: &HardwareFrame<CudaSlice<u8>>,
        output: &mut HardwareFrame<CudaSlice<u8>>,
        thread_budget: u32,
        stream: &PooledStream,
    ) -> Result<()> {
        self.launch("nv12_to_rgb24", false, input, output, thread_budget, stream)
    }

    fn nv12_to_bgr24(
        &self,
        input: &HardwareFrame<CudaSlice<u8>>,
        output: &mut HardwareFrame<CudaSlice<u8>>,
        thread_budget: u32,
        stream: &PooledStream,
    ) -> Result<()> {
        self.launch("nv12_to_bgr24", true, input, output, thread_budget, stream)
    }
}

/// 2D launch covering `width × height`, with blocks sized to the thread budget.
fn launch_config_2d(width: u32, height: u32, thread_budget: u32) -> LaunchConfig {
    let (bx, by) = block_dims(thread_budget);
    LaunchConfig {
        grid_dim: (width.div_ceil(bx), height.div_ceil(by), 1),
        block_dim: (bx, by, 1),
        shared_mem_bytes: 0,
    }
}

fn block_dims(thread_budget: u32) -> (u32, u32) {
    let bx = 32.min(thread_budget.max(1));
    let by = (thread_budget / bx).clamp(1, 32);
    (bx, by)
}
