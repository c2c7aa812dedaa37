//! VPP CLI entrypoint.
//!
//! ```bash
//! vpp convert --input frames.nv12 --width 1920 --height 1080 --format y800 \
//!     --target-width 640 --target-height 360 --consumers 4 --dump --dump-dir out/
//! vpp convert --input frames.nv12 --width 1280 --height 720 --format bgr24 --json
//! vpp probe --json
//! ```

use std::fs::File;
use std::io::{BufReader, IsTerminal, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use vpp_core::emulated::{HostKernels, HostRuntime};
use vpp_core::error::{Result, VppError};
use vpp_core::{
    ColorKernels, DestinationFormat, DeviceProperties, DeviceRuntime, HardwareFrame, PixelFormat,
    VppParameters,
};
use vpp_cuda::{CudaRuntime, PackedRgbKernels};
use vpp_pipeline::{DumpFile, ProcessorConfig, ProcessorStats, VideoProcessor};

#[derive(Parser, Debug)]
#[command(
    name = "vpp",
    version,
    about = "GPU video post-processing stage",
    arg_required_else_help = true,
    after_help = "Examples:\n  vpp probe --json\n  vpp convert --input in.nv12 --width 1920 --height 1080 --format y800 --target-width 640 --target-height 360\n  vpp convert --input in.nv12 --width 1280 --height 720 --format bgr24 --consumers 4 --dump --dump-dir out"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Convert raw NV12 frames across concurrent consumers.
    Convert(ConvertArgs),
    /// Initialize the selected backend and print device properties.
    Probe(ProbeArgs),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum BackendArg {
    /// CUDA when this build links it, otherwise the host emulation.
    Auto,
    /// CUDA driver through cudarc.
    Cuda,
    /// Host-memory emulation of the device.
    Emulated,
}

#[derive(Args, Debug, Clone)]
struct BackendArgs {
    /// Device backend.
    #[arg(long = "backend", value_enum, default_value_t = BackendArg::Auto)]
    backend: BackendArg,

    /// CUDA device ordinal (overrides the config file).
    #[arg(short = 'd', long = "device")]
    device: Option<usize>,
}

#[derive(Args, Debug)]
struct ConvertArgs {
    /// Raw NV12 input: back-to-back frames, `pitch × height × 3/2` bytes each.
    #[arg(short = 'i', long = "input")]
    input: PathBuf,

    /// Input frame width.
    #[arg(long = "width")]
    width: u32,

    /// Input frame height.
    #[arg(long = "height")]
    height: u32,

    /// Input row pitch in bytes (defaults to width).
    #[arg(long = "pitch")]
    pitch: Option<usize>,

    /// Destination format: rgb24, bgr24 or y800.
    #[arg(short = 'f', long = "format")]
    format: String,

    /// Output width (defaults to input width).
    #[arg(long = "target-width")]
    target_width: Option<u32>,

    /// Output height (defaults to input height).
    #[arg(long = "target-height")]
    target_height: Option<u32>,

    /// Concurrent consumers; frames are dealt round-robin.
    #[arg(short = 'c', long = "consumers", default_value_t = 1)]
    consumers: usize,

    /// Pool capacity (overrides the config file).
    #[arg(long = "max-consumers")]
    max_consumers: Option<usize>,

    /// Write converted frames to `Processed_<slot>.yuv`.
    #[arg(long = "dump", default_value_t = false)]
    dump: bool,

    /// Directory for dump files (overrides the config file).
    #[arg(long = "dump-dir")]
    dump_dir: Option<PathBuf>,

    /// JSON processor config.
    #[arg(long = "config")]
    config: Option<PathBuf>,

    /// Frames buffered per consumer.
    #[arg(long = "queue-depth", default_value_t = 4)]
    queue_depth: usize,

    #[command(flatten)]
    backend: BackendArgs,

    /// Emit a machine-readable JSON summary on stdout.
    #[arg(long = "json", default_value_t = false)]
    json: bool,
}

#[derive(Args, Debug)]
struct ProbeArgs {
    #[command(flatten)]
    backend: BackendArgs,

    /// Emit machine-readable JSON on stdout.
    #[arg(long = "json", default_value_t = false)]
    json: bool,
}

const JSON_SCHEMA_VERSION: u32 = 1;

fn main() {
    init_tracing();

    let cli = Cli::parse();
    let json_error_command = match &cli.command {
        Commands::Convert(args) if args.json => Some("convert"),
        Commands::Probe(args) if args.json => Some("probe"),
        _ => None,
    };

    let result = match cli.command {
        Commands::Convert(args) => run_convert(args),
        Commands::Probe(args) => run_probe(args),
    };

    if let Err(err) = result {
        if let Some(command) = json_error_command {
            println!("{}", command_error_json(command, &err));
        } else {
            error!(error = %err, code = err.error_code(), "Command failed");
        }
        std::process::exit(1);
    }
}

fn init_tracing() {
    let ansi_enabled = std::env::var_os("NO_COLOR").is_none() && std::io::stderr().is_terminal();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_ansi(ansi_enabled)
        .init();
}

fn build_runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(VppError::from)
}

// ─── Backends ────────────────────────────────────────────────────────────────

/// Host → device upload of one NV12 frame, per backend.
trait Nv12Upload: DeviceRuntime {
    fn upload_frame(
        &self,
        bytes: &[u8],
        width: u32,
        height: u32,
        pitch: usize,
    ) -> Result<HardwareFrame<Self::Memory>>;
}

impl Nv12Upload for HostRuntime {
    fn upload_frame(
        &self,
        bytes: &[u8],
        width: u32,
        height: u32,
        pitch: usize,
    ) -> Result<HardwareFrame<Self::Memory>> {
        self.upload_nv12(bytes, width, height, pitch)
    }
}

impl Nv12Upload for CudaRuntime {
    fn upload_frame(
        &self,
        bytes: &[u8],
        width: u32,
        height: u32,
        pitch: usize,
    ) -> Result<HardwareFrame<Self::Memory>> {
        self.upload_nv12(bytes, width, height, pitch)
    }
}

fn resolve_backend(arg: BackendArg) -> BackendArg {
    match arg {
        BackendArg::Auto if vpp_cuda::cuda_enabled() => BackendArg::Cuda,
        BackendArg::Auto => BackendArg::Emulated,
        other => other,
    }
}

fn backend_label(arg: BackendArg) -> &'static str {
    match arg {
        BackendArg::Auto => "auto",
        BackendArg::Cuda => "cuda",
        BackendArg::Emulated => "emulated",
    }
}

// ─── probe ───────────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct ProbeReport<'a> {
    schema_version: u32,
    command: &'static str,
    ok: bool,
    backend: &'static str,
    device: &'a DeviceProperties,
}

fn run_probe(args: ProbeArgs) -> Result<()> {
    let backend = resolve_backend(args.backend.backend);
    let ordinal = args.backend.device.unwrap_or(0);
    let properties = match backend {
        BackendArg::Cuda => CudaRuntime::new(ordinal)?.properties().clone(),
        _ => HostRuntime::new().properties().clone(),
    };

    if args.json {
        let report = ProbeReport {
            schema_version: JSON_SCHEMA_VERSION,
            command: "probe",
            ok: true,
            backend: backend_label(backend),
            device: &properties,
        };
        println!("{}", to_json(&report)?);
    } else {
        println!("backend:               {}", backend_label(backend));
        println!("device:                {} (ordinal {})", properties.name, properties.ordinal);
        println!("max threads per block: {}", properties.max_threads_per_block);
        println!(
            "total memory:          {} MiB",
            properties.total_memory_bytes / (1024 * 1024)
        );
    }
    Ok(())
}

// ─── convert ─────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct DumpReport {
    path: PathBuf,
    bytes: u64,
}

#[derive(Debug, Serialize)]
struct ConvertReport {
    schema_version: u32,
    command: &'static str,
    ok: bool,
    backend: &'static str,
    device: String,
    format: DestinationFormat,
    input_width: u32,
    input_height: u32,
    output_width: u32,
    output_height: u32,
    consumers: usize,
    frames_read: u64,
    frames_converted: u64,
    frames_dumped: u64,
    bytes_dumped: u64,
    host_round_trips: u64,
    elapsed_ms: f64,
    fps: f64,
    dumps: Vec<DumpReport>,
}

/// Validated geometry for one run.
#[derive(Clone, Copy, Debug)]
struct FrameGeometry {
    width: u32,
    height: u32,
    pitch: usize,
    params: VppParameters,
}

impl FrameGeometry {
    fn frame_bytes(&self) -> usize {
        PixelFormat::Nv12.byte_size(self.width, self.height, self.pitch)
    }
}

fn resolve_config(args: &ConvertArgs) -> Result<ProcessorConfig> {
    let mut config = match &args.config {
        Some(path) => ProcessorConfig::load(path)?,
        None => ProcessorConfig::default(),
    };
    if let Some(max) = args.max_consumers {
        config.max_consumers = max;
    }
    if let Some(dir) = &args.dump_dir {
        config.dump_dir = dir.clone();
    }
    if let Some(device) = args.backend.device {
        config.device_ordinal = device;
    }
    config.enable_dumps |= args.dump;
    config.validate()?;
    Ok(config)
}

fn resolve_geometry(args: &ConvertArgs) -> Result<FrameGeometry> {
    let format: DestinationFormat = args.format.parse()?;
    if args.width == 0 || args.height == 0 || args.width % 2 != 0 || args.height % 2 != 0 {
        return Err(VppError::DimensionMismatch(format!(
            "input {}x{} must be non-zero and even",
            args.width, args.height
        )));
    }
    let pitch = args.pitch.unwrap_or(args.width as usize);
    if pitch < args.width as usize {
        return Err(VppError::DimensionMismatch(format!(
            "pitch {pitch} is smaller than width {}",
            args.width
        )));
    }
    let params = VppParameters::new(
        args.target_width.unwrap_or(args.width),
        args.target_height.unwrap_or(args.height),
        format,
    );
    Ok(FrameGeometry {
        width: args.width,
        height: args.height,
        pitch,
        params,
    })
}

fn run_convert(args: ConvertArgs) -> Result<()> {
    if args.consumers == 0 {
        return Err(VppError::Config("--consumers must be at least 1".into()));
    }
    let config = resolve_config(&args)?;
    let geometry = resolve_geometry(&args)?;
    let backend = resolve_backend(args.backend.backend);

    let rt = build_runtime()?;
    let report = match backend {
        BackendArg::Cuda => {
            let runtime = Arc::new(CudaRuntime::new(config.device_ordinal)?);
            let kernels = PackedRgbKernels::compile(&runtime)?;
            rt.block_on(convert_with(runtime, kernels, config, geometry, backend, &args))?
        }
        _ => rt.block_on(convert_with(
            Arc::new(HostRuntime::new()),
            HostKernels,
            config,
            geometry,
            backend,
            &args,
        ))?,
    };

    if args.json {
        println!("{}", to_json(&report)?);
    } else {
        info!(
            frames = report.frames_converted,
            consumers = report.consumers,
            elapsed_ms = report.elapsed_ms,
            fps = report.fps,
            host_round_trips = report.host_round_trips,
            "Conversion complete"
        );
        for dump in &report.dumps {
            println!("{}  {} bytes", dump.path.display(), dump.bytes);
        }
    }
    Ok(())
}

async fn convert_with<R, K>(
    runtime: Arc<R>,
    kernels: K,
    config: ProcessorConfig,
    geometry: FrameGeometry,
    backend: BackendArg,
    args: &ConvertArgs,
) -> Result<ConvertReport>
where
    R: Nv12Upload,
    K: ColorKernels<R>,
{
    let start = Instant::now();
    let enable_dumps = config.enable_dumps;
    let dump_dir = config.dump_dir.clone();
    let vpp = Arc::new(VideoProcessor::new(runtime.clone(), kernels, config)?);
    vpp.init(enable_dumps)?;

    let mut senders = Vec::with_capacity(args.consumers);
    let mut tasks = JoinSet::new();
    for index in 0..args.consumers {
        let (tx, rx) = mpsc::channel::<Vec<u8>>(args.queue_depth.max(1));
        senders.push(tx);
        let vpp = vpp.clone();
        let runtime = runtime.clone();
        let consumer = format!("consumer-{index}");
        tasks.spawn_blocking(move || consume_frames(&*runtime, &*vpp, rx, &consumer, geometry));
    }

    let read_result = read_frames(&args.input, geometry.frame_bytes(), &senders).await;
    drop(senders);

    let (frames_read, mut first_error) = match read_result {
        Ok(frames) => (frames, None),
        Err(e) => (0, Some(e)),
    };
    while let Some(result) = tasks.join_next().await {
        match result {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => {
                error!(%e, "Consumer failed");
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
            Err(join_err) => {
                error!(%join_err, "Consumer task panicked");
                if first_error.is_none() {
                    first_error = Some(VppError::Config(format!("task panic: {join_err}")));
                }
            }
        }
    }

    let close_result = vpp.close();
    if let Some(e) = first_error {
        return Err(e);
    }
    close_result?;

    let stats: ProcessorStats = vpp.stats();
    let dumps = if enable_dumps {
        collect_dumps(&dump_dir, vpp.config().max_consumers)?
    } else {
        Vec::new()
    };
    let output = output_size(&geometry);
    let elapsed = start.elapsed();
    let elapsed_ms = elapsed.as_secs_f64() * 1000.0;
    let fps = if elapsed.as_secs_f64() > 0.0 {
        stats.frames_converted as f64 / elapsed.as_secs_f64()
    } else {
        0.0
    };

    Ok(ConvertReport {
        schema_version: JSON_SCHEMA_VERSION,
        command: "convert",
        ok: true,
        backend: backend_label(backend),
        device: vpp.device_properties().name.clone(),
        format: geometry.params.format,
        input_width: geometry.width,
        input_height: geometry.height,
        output_width: output.0,
        output_height: output.1,
        consumers: args.consumers,
        frames_read,
        frames_converted: stats.frames_converted,
        frames_dumped: stats.frames_dumped,
        bytes_dumped: stats.bytes_dumped,
        host_round_trips: stats.host_round_trips,
        elapsed_ms,
        fps,
        dumps,
    })
}

/// Deal whole frames from `path` round-robin to the consumer queues.
async fn read_frames(
    path: &Path,
    frame_bytes: usize,
    senders: &[mpsc::Sender<Vec<u8>>],
) -> Result<u64> {
    let file = File::open(path).map_err(|e| {
        VppError::Io(std::io::Error::new(
            e.kind(),
            format!("failed to open input {}: {e}", path.display()),
        ))
    })?;
    let mut reader = BufReader::with_capacity(frame_bytes.max(64 * 1024), file);
    let mut frames = 0u64;

    loop {
        let mut frame = vec![0u8; frame_bytes];
        let filled = read_full(&mut reader, &mut frame)?;
        if filled == 0 {
            break;
        }
        if filled < frame_bytes {
            warn!(
                trailing_bytes = filled,
                frame_bytes, "Ignoring trailing partial frame"
            );
            break;
        }

        let target = &senders[(frames as usize) % senders.len()];
        if target.send(frame).await.is_err() {
            // The consumer stopped early; its error is reported on join.
            break;
        }
        frames += 1;
    }
    debug!(frames, "Input exhausted");
    Ok(frames)
}

fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(filled)
}

fn consume_frames<R, K>(
    runtime: &R,
    vpp: &VideoProcessor<R, K>,
    mut rx: mpsc::Receiver<Vec<u8>>,
    consumer: &str,
    geometry: FrameGeometry,
) -> Result<u64>
where
    R: Nv12Upload,
    K: ColorKernels<R>,
{
    let mut converted = 0u64;
    while let Some(bytes) = rx.blocking_recv() {
        let input = runtime.upload_frame(&bytes, geometry.width, geometry.height, geometry.pitch)?;
        let output = vpp.convert(input, &geometry.params, consumer)?;
        drop(output);
        converted += 1;
    }
    debug!(consumer, frames = converted, "Consumer drained");
    Ok(converted)
}

fn output_size(geometry: &FrameGeometry) -> (u32, u32) {
    match geometry.params.format {
        DestinationFormat::Rgb24 => (geometry.width, geometry.height),
        DestinationFormat::Bgr24 | DestinationFormat::Y800 => {
            (geometry.params.width, geometry.params.height)
        }
    }
}

fn collect_dumps(dir: &Path, slots: usize) -> Result<Vec<DumpReport>> {
    (0..slots)
        .map(|slot| {
            let path = dir.join(DumpFile::file_name(slot));
            let bytes = std::fs::metadata(&path)?.len();
            Ok(DumpReport { path, bytes })
        })
        .collect()
}

// ─── JSON ────────────────────────────────────────────────────────────────────

fn to_json<T: Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|e| VppError::Config(format!("json encode failed: {e}")))
}

fn command_error_json(command: &str, err: &VppError) -> String {
    serde_json::json!({
        "schema_version": JSON_SCHEMA_VERSION,
        "command": command,
        "ok": false,
        "code": err.error_code(),
        "error": err.to_string(),
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn auto_backend_follows_build_features() {
        let resolved = resolve_backend(BackendArg::Auto);
        if vpp_cuda::cuda_enabled() {
            assert_eq!(resolved, BackendArg::Cuda);
        } else {
            assert_eq!(resolved, BackendArg::Emulated);
        }
        assert_eq!(resolve_backend(BackendArg::Emulated), BackendArg::Emulated);
    }

    #[test]
    fn rgb_output_keeps_input_geometry() {
        let geometry = FrameGeometry {
            width: 8,
            height: 4,
            pitch: 8,
            params: VppParameters::new(2, 2, DestinationFormat::Rgb24),
        };
        assert_eq!(output_size(&geometry), (8, 4));
        assert_eq!(geometry.frame_bytes(), 48);
    }

    #[test]
    fn error_json_carries_code() {
        let json = command_error_json("convert", &VppError::UnsupportedFormat("nv21".into()));
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["ok"], false);
        assert_eq!(value["code"], 200);
        assert_eq!(value["schema_version"], 1);
    }

    #[test]
    fn read_full_reports_partial_tail() {
        let data = [7u8; 10];
        let mut reader = &data[..];
        let mut buf = [0u8; 6];
        assert_eq!(read_full(&mut reader, &mut buf).unwrap(), 6);
        assert_eq!(read_full(&mut reader, &mut buf).unwrap(), 4);
        assert_eq!(read_full(&mut reader, &mut buf).unwrap(), 0);
    }
}
