//! `VideoProcessor` — the facade callers drive.
//!
//! # Lifecycle
//!
//! ```text
//! Uninitialized ──init──▶ Initialized ──close──▶ Closed
//! ```
//!
//! `convert` is only accepted while `Initialized` and runs under a shared
//! guard, so any number of consumer threads convert concurrently. `close`
//! takes the exclusive guard: it waits for in-flight frames, synchronizes
//! every pooled stream, flushes the dump files and drops both pools.

use std::fs;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{debug, info, warn};

use vpp_core::error::{Result, VppError};
use vpp_core::{
    ColorKernels, DeviceProperties, DeviceRuntime, HardwareFrame, ResourcePool, VppParameters,
};

use crate::config::ProcessorConfig;
use crate::convert::FormatConverter;
use crate::dump::DumpFile;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProcessorState {
    Uninitialized,
    Initialized,
    Closed,
}

impl ProcessorState {
    pub const fn name(self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::Initialized => "initialized",
            Self::Closed => "closed",
        }
    }
}

/// Counters exposed for reporting.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ProcessorStats {
    pub frames_converted: u64,
    pub frames_dumped: u64,
    pub bytes_dumped: u64,
    /// Frames copied device→host: Y800 staging plus dump read-backs.
    pub host_round_trips: u64,
}

struct Pools<S> {
    streams: ResourcePool<S>,
    dumps: Option<ResourcePool<DumpFile>>,
}

enum Lifecycle<S> {
    Uninitialized,
    Initialized(Pools<S>),
    Closed,
}

impl<S> Lifecycle<S> {
    fn state(&self) -> ProcessorState {
        match self {
            Self::Uninitialized => ProcessorState::Uninitialized,
            Self::Initialized(_) => ProcessorState::Initialized,
            Self::Closed => ProcessorState::Closed,
        }
    }
}

/// Post-processing facade shared by all consumers.
pub struct VideoProcessor<R: DeviceRuntime, K: ColorKernels<R>> {
    converter: FormatConverter<R, K>,
    config: ProcessorConfig,
    lifecycle: RwLock<Lifecycle<R::Stream>>,
    frames_converted: AtomicU64,
    frames_dumped: AtomicU64,
    bytes_dumped: AtomicU64,
    dump_reads: AtomicU64,
}

impl<R, K> VideoProcessor<R, K>
where
    R: DeviceRuntime,
    K: ColorKernels<R>,
{
    /// Bind a processor to an explicit device context. Nothing is allocated
    /// until [`init`](Self::init).
    pub fn new(runtime: Arc<R>, kernels: K, config: ProcessorConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            converter: FormatConverter::new(runtime, kernels),
            config,
            lifecycle: RwLock::new(Lifecycle::Uninitialized),
            frames_converted: AtomicU64::new(0),
            frames_dumped: AtomicU64::new(0),
            bytes_dumped: AtomicU64::new(0),
            dump_reads: AtomicU64::new(0),
        })
    }

    /// Allocate `max_consumers` streams and, with `enable_dumps`, as many dump
    /// files.
    pub fn init(&self, enable_dumps: bool) -> Result<()> {
        let mut lifecycle = self.lifecycle.write().unwrap_or_else(PoisonError::into_inner);
        if !matches!(*lifecycle, Lifecycle::Uninitialized) {
            return Err(VppError::InvalidState {
                operation: "init",
                state: lifecycle.state().name(),
            });
        }

        let capacity = self.config.max_consumers;
        let runtime = self.converter.runtime();
        let streams = ResourcePool::try_with_capacity("stream", capacity, |_| {
            runtime.create_stream()
        })?;

        let dumps = if enable_dumps {
            let dir = &self.config.dump_dir;
            fs::create_dir_all(dir)?;
            Some(ResourcePool::try_with_capacity("dump", capacity, |slot| {
                DumpFile::open(dir, slot)
            })?)
        } else {
            None
        };

        info!(
            device = %runtime.properties().name,
            max_consumers = capacity,
            enable_dumps,
            dump_dir = %self.config.dump_dir.display(),
            "Video processor initialized"
        );
        *lifecycle = Lifecycle::Initialized(Pools { streams, dumps });
        Ok(())
    }

    /// Convert `input` for `consumer` and, when dumping, append the result to
    /// the consumer's dump file.
    ///
    /// `input` is released when the call returns, whether it succeeded or not.
    pub fn convert(
        &self,
        input: HardwareFrame<R::Memory>,
        params: &VppParameters,
        consumer: &str,
    ) -> Result<HardwareFrame<R::Memory>> {
        let lifecycle = self.lifecycle.read().unwrap_or_else(PoisonError::into_inner);
        let Lifecycle::Initialized(pools) = &*lifecycle else {
            return Err(VppError::InvalidState {
                operation: "convert",
                state: lifecycle.state().name(),
            });
        };

        let stream = pools.streams.acquire(consumer)?;
        let output = self.converter.convert(&input, params, &stream)?;

        if let Some(dumps) = &pools.dumps {
            let dump = dumps.acquire(consumer)?;
            self.dump_frame(&output, &stream, &dump)?;
        }

        drop(input);
        self.frames_converted.fetch_add(1, Ordering::Relaxed);
        debug!(
            consumer,
            format = %params.format,
            width = output.width,
            height = output.height,
            "frame converted"
        );
        Ok(output)
    }

    /// Copy a device-resident output frame to host and append it to `dump`.
    fn dump_frame(
        &self,
        output: &HardwareFrame<R::Memory>,
        stream: &R::Stream,
        dump: &DumpFile,
    ) -> Result<()> {
        let runtime = self.converter.runtime();
        // Kernels run asynchronously on the consumer's stream.
        runtime.synchronize(stream)?;

        let device = output.buffer.device()?;
        let size = output.format.byte_size(output.width, output.height, 0);
        let mut host = vec![0u8; size];
        runtime.copy_to_host(&device.memory, 0, &mut host)?;
        self.dump_reads.fetch_add(1, Ordering::Relaxed);

        let frame =
            HardwareFrame::<R::Memory>::packed_host(host, output.width, output.height, output.format)?;
        let written = dump.append(&frame)?;
        self.frames_dumped.fetch_add(1, Ordering::Relaxed);
        self.bytes_dumped.fetch_add(written as u64, Ordering::Relaxed);
        Ok(())
    }

    /// Release pooled resources. Idempotent: only the first call does work.
    ///
    /// The processor ends up `Closed` even when teardown reports an error.
    pub fn close(&self) -> Result<()> {
        let mut lifecycle = self.lifecycle.write().unwrap_or_else(PoisonError::into_inner);
        let previous = std::mem::replace(&mut *lifecycle, Lifecycle::Closed);
        drop(lifecycle);

        match previous {
            Lifecycle::Initialized(pools) => self.teardown(pools),
            Lifecycle::Uninitialized | Lifecycle::Closed => Ok(()),
        }
    }

    fn teardown(&self, pools: Pools<R::Stream>) -> Result<()> {
        let runtime = self.converter.runtime();
        let Pools { streams, dumps } = pools;
        let mut first_error = None;

        let consumers = streams.bound();
        for stream in streams.into_resources() {
            if let Err(e) = runtime.synchronize(&stream) {
                warn!(error = %e, "stream synchronize failed during close");
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }
        for dump in dumps.map(ResourcePool::into_resources).unwrap_or_default() {
            if let Err(e) = dump.flush() {
                warn!(path = %dump.path().display(), error = %e, "dump flush failed during close");
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }

        let stats = self.stats();
        info!(
            consumers,
            frames_converted = stats.frames_converted,
            frames_dumped = stats.frames_dumped,
            bytes_dumped = stats.bytes_dumped,
            host_round_trips = stats.host_round_trips,
            "Video processor closed"
        );
        first_error.map_or(Ok(()), Err)
    }

    pub fn state(&self) -> ProcessorState {
        self.lifecycle
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .state()
    }

    #[inline]
    pub fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    #[inline]
    pub fn device_properties(&self) -> &DeviceProperties {
        self.converter.runtime().properties()
    }

    pub fn stats(&self) -> ProcessorStats {
        ProcessorStats {
            frames_converted: self.frames_converted.load(Ordering::Relaxed),
            frames_dumped: self.frames_dumped.load(Ordering::Relaxed),
            bytes_dumped: self.bytes_dumped.load(Ordering::Relaxed),
            host_round_trips: self.converter.host_round_trips()
                + self.dump_reads.load(Ordering::Relaxed),
        }
    }

    /// Slot bound to `consumer` in the stream pool, if initialized and bound.
    pub fn stream_slot(&self, consumer: &str) -> Option<usize> {
        match &*self.lifecycle.read().unwrap_or_else(PoisonError::into_inner) {
            Lifecycle::Initialized(pools) => pools.streams.slot_of(consumer),
            _ => None,
        }
    }
}

impl<R, K> Drop for VideoProcessor<R, K>
where
    R: DeviceRuntime,
    K: ColorKernels<R>,
{
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(error = %e, "video processor close on drop failed");
        }
    }
}
