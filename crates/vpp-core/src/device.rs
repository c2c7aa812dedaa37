//! Device runtime contract — the explicit, process-scoped device context.
//!
//! Backends (`vpp-cuda`, [`crate::emulated`]) implement [`DeviceRuntime`] for
//! streams, allocation and synchronous copies, and [`ColorKernels`] for the
//! packed-RGB conversion kernels. The pipeline crate only ever talks to these
//! traits, never to a global device handle.

use serde::Serialize;

use crate::error::Result;
use crate::types::HardwareFrame;

/// Static properties of the device a runtime is bound to.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DeviceProperties {
    pub name: String,
    pub ordinal: usize,
    /// Upper bound on threads per kernel block; passed to the conversion
    /// kernels as their thread budget.
    pub max_threads_per_block: u32,
    pub total_memory_bytes: usize,
}

/// Device memory and stream management.
///
/// All copies are synchronous with respect to the calling thread: they return
/// once the transfer has completed or failed.
pub trait DeviceRuntime: Send + Sync + 'static {
    /// Ordered queue of device work.
    type Stream: Send + Sync + 'static;
    /// Device allocation owned by a frame.
    type Memory: Send + Sync + 'static;

    fn properties(&self) -> &DeviceProperties;

    fn create_stream(&self) -> Result<Self::Stream>;

    /// Block until all work submitted on `stream` has finished.
    fn synchronize(&self, stream: &Self::Stream) -> Result<()>;

    /// Allocate `bytes` of zeroed device memory.
    fn alloc(&self, bytes: usize) -> Result<Self::Memory>;

    /// Copy `dst.len()` bytes starting at `offset` of `src` into `dst`.
    fn copy_to_host(&self, src: &Self::Memory, offset: usize, dst: &mut [u8]) -> Result<()>;

    /// Copy `src` into the start of `dst`.
    fn copy_to_device(&self, src: &[u8], dst: &mut Self::Memory) -> Result<()>;
}

/// Externally supplied colour-conversion kernels.
///
/// Contract: read the NV12 `input`, write `output.width × output.height`
/// pixels into the device buffer already attached to `output`, and return an
/// error on any internal failure. `thread_budget` is the device's maximum
/// threads per block.
pub trait ColorKernels<R: DeviceRuntime>: Send + Sync + 'static {
    fn nv12_to_rgb24(
        &self,
        input: &HardwareFrame<R::Memory>,
        output: &mut HardwareFrame<R::Memory>,
        thread_budget: u32,
        stream: &R::Stream,
    ) -> Result<()>;

    fn nv12_to_bgr24(
        &self,
        input: &HardwareFrame<R::Memory>,
        output: &mut HardwareFrame<R::Memory>,
        thread_budget: u32,
        stream: &R::Stream,
    ) -> Result<()>;
}
