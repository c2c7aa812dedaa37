#![allow(missing_docs)]
//! CPU-only stub for builds without the CUDA driver.

use vpp_core::error::{Result, VppError};
use vpp_core::{DeviceProperties, DeviceRuntime};

/// Uninhabited: no CUDA runtime can exist in this build.
pub enum CudaRuntime {}

/// Uninhabited stream placeholder.
pub enum PooledStream {}

impl CudaRuntime {
    pub fn new(ordinal: usize) -> Result<Self> {
        Err(VppError::DeviceUnavailable(format!(
            "vpp-cuda built without `cuda-runtime`: CUDA device {ordinal} is unavailable"
        )))
    }

    pub fn upload_nv12(
        &self,
        _bytes: &[u8],
        _width: u32,
        _height: u32,
        _pitch: usize,
    ) -> Result<vpp_core::HardwareFrame<()>> {
        match *self {}
    }
}

impl DeviceRuntime for CudaRuntime {
    type Stream = PooledStream;
    type Memory = ();

    fn properties(&self) -> &DeviceProperties {
        match *self {}
    }

    fn create_stream(&self) -> Result<PooledStream> {
        match *self {}
    }

    fn synchronize(&self, stream: &PooledStream) -> Result<()> {
        match *stream {}
    }

    fn alloc(&self, _bytes: usize) -> Result<()> {
        match *self {}
    }

    fn copy_to_host(&self, _src: &(), _offset: usize, _dst: &mut [u8]) -> Result<()> {
        match *self {}
    }

    fn copy_to_device(&self, _src: &[u8], _dst: &mut ()) -> Result<()> {
        match *self {}
    }
}
