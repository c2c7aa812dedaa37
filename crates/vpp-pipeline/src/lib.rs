#![doc = include_str!("../README.md")]

pub mod config;
pub mod convert;
pub mod dump;
pub mod processor;
pub mod resize;

pub use config::{DEFAULT_MAX_CONSUMERS, ProcessorConfig};
pub use convert::FormatConverter;
pub use dump::{DumpFile, FrameDumpWriter};
pub use processor::{ProcessorState, ProcessorStats, VideoProcessor};
pub use resize::{PlaneView, resize_nv12, resize_plane};
