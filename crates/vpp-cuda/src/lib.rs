#![doc = include_str!("../README.md")]

#[cfg(feature = "cuda-runtime")]
pub mod kernels;
#[cfg(not(feature = "cuda-runtime"))]
#[path = "kernels_stub.rs"]
pub mod kernels;

#[cfg(feature = "cuda-runtime")]
pub mod runtime;
#[cfg(not(feature = "cuda-runtime"))]
#[path = "runtime_stub.rs"]
pub mod runtime;

pub use kernels::PackedRgbKernels;
pub use runtime::CudaRuntime;

/// Whether this build links the CUDA driver.
pub const fn cuda_enabled() -> bool {
    cfg!(feature = "cuda-runtime")
}
