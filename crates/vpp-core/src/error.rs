//! Typed error hierarchy for the post-processing stage.
//!
//! Each variant maps to a stable integer code via [`VppError::error_code`]
//! so callers can report failures without string parsing.

use crate::types::{BufferLocation, PixelFormat};

/// All errors originating from the post-processing stage.
#[derive(Debug, thiserror::Error)]
pub enum VppError {
    // ── Device ───────────────────────────────────────────────────────
    #[error("Device transfer failed during {op}: {detail}")]
    DeviceTransfer { op: &'static str, detail: String },

    #[error("Conversion kernel {kernel} failed: {detail}")]
    Kernel {
        kernel: &'static str,
        detail: String,
    },

    #[error("Device unavailable: {0}")]
    DeviceUnavailable(String),

    // ── Formats and frames ───────────────────────────────────────────
    #[error("Unsupported destination format: {0}")]
    UnsupportedFormat(String),

    #[error("Pixel format mismatch: expected {expected:?}, got {actual:?}")]
    FormatMismatch {
        expected: PixelFormat,
        actual: PixelFormat,
    },

    #[error("Dimension mismatch: {0}")]
    DimensionMismatch(String),

    #[error("Buffer too small: need {need} bytes, have {have}")]
    BufferTooSmall { need: usize, have: usize },

    #[error("Frame payload is {actual:?}-resident, expected {expected:?}")]
    FrameLocation {
        expected: BufferLocation,
        actual: BufferLocation,
    },

    // ── Resources ────────────────────────────────────────────────────
    #[error("{pool} pool exhausted: all {capacity} slots bound, cannot admit consumer '{consumer}'")]
    PoolExhausted {
        pool: &'static str,
        capacity: usize,
        consumer: String,
    },

    // ── Lifecycle / config ───────────────────────────────────────────
    #[error("Cannot {operation} while processor is {state}")]
    InvalidState {
        operation: &'static str,
        state: &'static str,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    // ── I/O ──────────────────────────────────────────────────────────
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl VppError {
    /// Stable integer error code.
    ///
    /// - 1xx: device
    /// - 2xx: formats and frames
    /// - 3xx: resource pools
    /// - 4xx: lifecycle and configuration
    /// - 5xx: I/O
    pub fn error_code(&self) -> u32 {
        match self {
            Self::DeviceTransfer { .. } => 100,
            Self::Kernel { .. } => 101,
            Self::DeviceUnavailable(_) => 102,
            Self::UnsupportedFormat(_) => 200,
            Self::FormatMismatch { .. } => 201,
            Self::DimensionMismatch(_) => 202,
            Self::BufferTooSmall { .. } => 203,
            Self::FrameLocation { .. } => 204,
            Self::PoolExhausted { .. } => 300,
            Self::InvalidState { .. } => 400,
            Self::Config(_) => 401,
            Self::Io(_) => 500,
        }
    }

    /// Convenience constructor for device copy/allocation failures.
    pub fn transfer(op: &'static str, detail: impl std::fmt::Display) -> Self {
        Self::DeviceTransfer {
            op,
            detail: detail.to_string(),
        }
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, VppError>;
