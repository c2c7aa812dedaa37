#![doc = include_str!("../README.md")]

pub mod device;
pub mod emulated;
pub mod error;
pub mod resource_pool;
pub mod types;

pub use device::{ColorKernels, DeviceProperties, DeviceRuntime};
pub use error::{Result, VppError};
pub use resource_pool::ResourcePool;
pub use types::{
    BufferLocation, DestinationFormat, DeviceBuffer, FrameBuffer, HardwareFrame, PixelFormat,
    Plane, VppParameters,
};

