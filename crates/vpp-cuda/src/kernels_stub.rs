#![allow(missing_docs)]
//! CPU-only stub for builds without NVRTC.

use vpp_core::error::{Result, VppError};
use vpp_core::{ColorKernels, HardwareFrame};

use crate::runtime::{CudaRuntime, PooledStream};

/// Uninhabited: kernels cannot be compiled in this build.
pub enum PackedRgbKernels {}

impl PackedRgbKernels {
    pub fn compile(runtime: &CudaRuntime) -> Result<Self> {
        let _ = runtime;
        Err(VppError::DeviceUnavailable(
            "vpp-cuda built without `cuda-runtime`: NVRTC kernels are unavailable".into(),
        ))
    }
}

impl ColorKernels<CudaRuntime> for PackedRgbKernels {
    fn nv12_to_rgb24(
        &self,
        _input: &HardwareFrame<()>,
        _output: &mut HardwareFrame<()>,
        _thread_budget: u32,
        _stream: &PooledStream,
    ) -> Result<()> {
        match *self {}
    }

    fn nv12_to_bgr24(
        &self,
        _input: &HardwareFrame<()>,
        _output: &mut HardwareFrame<()>,
        _thread_budget: u32,
        _stream: &PooledStream,
    ) -> Result<()> {
        match *self {}
    }
}
