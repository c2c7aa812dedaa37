//! cudarc-backed [`DeviceRuntime`].

use std::sync::Arc;

use cudarc::driver::sys::CUdevice_attribute;
use cudarc::driver::{CudaDevice, CudaSlice, CudaStream, DeviceSlice};
use tracing::info;

use vpp_core::error::{Result, VppError};
use vpp_core::{DeviceProperties, DeviceRuntime};

/// A forked CUDA stream owned by one pool slot.
pub struct PooledStream(pub CudaStream);

// SAFETY: a CUstream is a driver handle with no thread affinity; the pool
// hands each stream to exactly one consumer at a time.
unsafe impl Send for PooledStream {}
unsafe impl Sync for PooledStream {}

/// Device context for one CUDA ordinal.
pub struct CudaRuntime {
    device: Arc<CudaDevice>,
    properties: DeviceProperties,
}

impl CudaRuntime {
    /// Bind to `ordinal` and read its properties.
    pub fn new(ordinal: usize) -> Result<Self> {
        let device = CudaDevice::new(ordinal).map_err(|e| {
            VppError::DeviceUnavailable(format!("CUDA device {ordinal}: {e}"))
        })?;
        let name = device
            .name()
            .map_err(|e| VppError::DeviceUnavailable(format!("device name: {e}")))?;
        let max_threads = device
            .attribute(CUdevice_attribute::CU_DEVICE_ATTRIBUTE_MAX_THREADS_PER_BLOCK)
            .map_err(|e| VppError::DeviceUnavailable(format!("device attribute: {e}")))?;
        device
            .bind_to_thread()
            .map_err(|e| VppError::DeviceUnavailable(format!("bind context: {e}")))?;
        let (_, total) = cudarc::driver::result::mem_get_info()
            .map_err(|e| VppError::DeviceUnavailable(format!("memory info: {e}")))?;

        let properties = DeviceProperties {
            name,
            ordinal,
            max_threads_per_block: max_threads.max(1) as u32,
            total_memory_bytes: total,
        };
        info!(
            device = %properties.name,
            ordinal,
            max_threads_per_block = properties.max_threads_per_block,
            total_mb = total / (1024 * 1024),
            "CUDA runtime initialized"
        );
        Ok(Self { device, properties })
    }

    #[inline]
    pub fn device(&self) -> &Arc<CudaDevice> {
        &self.device
    }

    /// Upload a host NV12 payload as a device-resident frame.
    pub fn upload_nv12(
        &self,
        bytes: &[u8],
        width: u32,
        height: u32,
        pitch: usize,
    ) -> Result<vpp_core::HardwareFrame<CudaSlice<u8>>> {
        let need = vpp_core::PixelFormat::Nv12.byte_size(width, height, pitch);
        if bytes.len() < need {
            return Err(VppError::BufferTooSmall {
                need,
                have: bytes.len(),
            });
        }
        let mut memory = self.alloc(need)?;
        self.copy_to_device(&bytes[..need], &mut memory)?;
        Ok(vpp_core::HardwareFrame::nv12_device(
            memory, need, width, height, pitch,
        ))
    }
}

impl DeviceRuntime for CudaRuntime {
    type Stream = PooledStream;
    type Memory = CudaSlice<u8>;

    fn properties(&self) -> &DeviceProperties {
        &self.properties
    }

    fn create_stream(&self) -> Result<PooledStream> {
        self.device
            .fork_default_stream()
            .map(PooledStream)
            .map_err(|e| VppError::transfer("create_stream", e))
    }

    fn synchronize(&self, stream: &PooledStream) -> Result<()> {
        self.device
            .bind_to_thread()
            .map_err(|e| VppError::transfer("synchronize", e))?;
        // SAFETY: the stream handle was created by fork_default_stream on this
        // device and outlives the call.
        unsafe { cudarc::driver::result::stream::synchronize(stream.0.stream) }
            .map_err(|e| VppError::transfer("synchronize", e))
    }

    fn alloc(&self, bytes: usize) -> Result<CudaSlice<u8>> {
        self.device
            .alloc_zeros::<u8>(bytes)
            .map_err(|e| VppError::transfer("alloc", e))
    }

    fn copy_to_host(&self, src: &CudaSlice<u8>, offset: usize, dst: &mut [u8]) -> Result<()> {
        let end = offset + dst.len();
        if end > src.len() {
            return Err(VppError::transfer(
                "copy_to_host",
                format!("range {offset}..{end} outside allocation of {} bytes", src.len()),
            ));
        }
        let view = src.slice(offset..end);
        self.device
            .dtoh_sync_copy_into(&view, dst)
            .map_err(|e| VppError::transfer("copy_to_host", e))
    }

    fn copy_to_device(&self, src: &[u8], dst: &mut CudaSlice<u8>) -> Result<()> {
        if src.len() > dst.len() {
            return Err(VppError::transfer(
                "copy_to_device",
                format!("{} bytes do not fit allocation of {} bytes", src.len(), dst.len()),
            ));
        }
        let mut view = dst.slice_mut(0..src.len());
        self.device
            .htod_sync_copy_into(src, &mut view)
            .map_err(|e| VppError::transfer("copy_to_device", e))
    }
}
