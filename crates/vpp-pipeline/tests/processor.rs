use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use vpp_core::emulated::{FaultPoint, HostKernels, HostMemory, HostRuntime};
use vpp_core::{DestinationFormat, HardwareFrame, PixelFormat, VppError, VppParameters};
use vpp_pipeline::{DumpFile, ProcessorConfig, ProcessorState, VideoProcessor};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter("vpp_pipeline=debug")
        .try_init();
}

fn unique_temp_dir(label: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock")
        .as_nanos();
    let dir =
        std::env::temp_dir().join(format!("vpp_pipeline_{label}_{}_{}", std::process::id(), nanos));
    fs::create_dir_all(&dir).expect("create temp dir");
    dir
}

fn processor(
    max_consumers: usize,
    dump_dir: Option<PathBuf>,
) -> (Arc<HostRuntime>, VideoProcessor<HostRuntime, HostKernels>) {
    init_tracing();
    let runtime = Arc::new(HostRuntime::new());
    let config = ProcessorConfig {
        max_consumers,
        enable_dumps: dump_dir.is_some(),
        dump_dir: dump_dir.unwrap_or_else(|| PathBuf::from(".")),
        ..ProcessorConfig::default()
    };
    let enable_dumps = config.enable_dumps;
    let vpp = VideoProcessor::new(runtime.clone(), HostKernels, config).expect("new");
    vpp.init(enable_dumps).expect("init");
    (runtime, vpp)
}

fn frame(runtime: &HostRuntime, width: u32, height: u32) -> HardwareFrame<HostMemory> {
    let pitch = width as usize;
    let size = PixelFormat::Nv12.byte_size(width, height, pitch);
    let bytes: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();
    runtime
        .upload_nv12(&bytes, width, height, pitch)
        .expect("upload")
}

#[test]
fn output_dimensions_follow_format_rules() {
    let (runtime, vpp) = processor(2, None);

    let bgr = vpp
        .convert(
            frame(&runtime, 8, 8),
            &VppParameters::new(4, 2, DestinationFormat::Bgr24),
            "cam-0",
        )
        .unwrap();
    assert_eq!((bgr.width, bgr.height, bgr.format), (4, 2, PixelFormat::Bgr24));

    let gray = vpp
        .convert(
            frame(&runtime, 8, 8),
            &VppParameters::new(4, 4, DestinationFormat::Y800),
            "cam-0",
        )
        .unwrap();
    assert_eq!((gray.width, gray.height, gray.format), (4, 4, PixelFormat::Gray8));
    assert_eq!(gray.buffer.byte_size(), 16);

    let rgb = vpp
        .convert(
            frame(&runtime, 8, 8),
            &VppParameters::new(4, 4, DestinationFormat::Rgb24),
            "cam-0",
        )
        .unwrap();
    assert_eq!((rgb.width, rgb.height, rgb.format), (8, 8, PixelFormat::Rgb24));

    assert_eq!(vpp.stats().frames_converted, 3);
    assert_eq!(vpp.stream_slot("cam-0"), Some(0));
}

#[test]
fn lifecycle_is_enforced() {
    init_tracing();
    let runtime = Arc::new(HostRuntime::new());
    let vpp = VideoProcessor::new(runtime.clone(), HostKernels, ProcessorConfig::default()).unwrap();
    let params = VppParameters::new(4, 4, DestinationFormat::Y800);

    let err = vpp.convert(frame(&runtime, 8, 8), &params, "early").unwrap_err();
    assert!(matches!(
        err,
        VppError::InvalidState {
            operation: "convert",
            state: "uninitialized"
        }
    ));

    vpp.init(false).unwrap();
    assert_eq!(vpp.state(), ProcessorState::Initialized);
    assert_eq!(vpp.init(false).unwrap_err().error_code(), 400);

    vpp.close().unwrap();
    vpp.close().unwrap();
    assert_eq!(vpp.state(), ProcessorState::Closed);

    let err = vpp.convert(frame(&runtime, 8, 8), &params, "late").unwrap_err();
    assert!(matches!(err, VppError::InvalidState { state: "closed", .. }));
    assert_eq!(vpp.init(false).unwrap_err().error_code(), 400);
}

#[test]
fn odd_sized_input_fails_without_touching_the_dump() {
    let dir = unique_temp_dir("odd_input");
    let (runtime, vpp) = processor(1, Some(dir.clone()));

    let narrow = runtime.upload_nv12(&[16u8; 12], 3, 2, 4).unwrap();
    let err = vpp
        .convert(narrow, &VppParameters::new(3, 2, DestinationFormat::Rgb24), "cam")
        .unwrap_err();
    assert!(matches!(err, VppError::DimensionMismatch(_)));

    let short = runtime.upload_nv12(&[16u8; 16], 4, 3, 4).unwrap();
    let err = vpp
        .convert(short, &VppParameters::new(4, 2, DestinationFormat::Bgr24), "cam")
        .unwrap_err();
    assert!(matches!(err, VppError::DimensionMismatch(_)));

    assert_eq!(vpp.stats().frames_converted, 0);
    vpp.close().unwrap();
    assert!(fs::read(dir.join("Processed_0.yuv")).unwrap().is_empty());
    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn close_before_init_is_a_no_op() {
    let runtime = Arc::new(HostRuntime::new());
    let vpp = VideoProcessor::new(runtime.clone(), HostKernels, ProcessorConfig::default()).unwrap();
    vpp.close().unwrap();
    assert_eq!(vpp.state(), ProcessorState::Closed);
    assert_eq!(runtime.stats().streams_created, 0);
}

#[test]
fn zero_consumers_is_rejected_at_construction() {
    let config = ProcessorConfig {
        max_consumers: 0,
        ..ProcessorConfig::default()
    };
    let result = VideoProcessor::new(Arc::new(HostRuntime::new()), HostKernels, config);
    assert!(matches!(result, Err(VppError::Config(_))));
}

#[test]
fn pool_overflow_rejects_extra_consumer() {
    let (runtime, vpp) = processor(2, None);
    let params = VppParameters::new(4, 4, DestinationFormat::Bgr24);

    vpp.convert(frame(&runtime, 8, 8), &params, "a").unwrap();
    vpp.convert(frame(&runtime, 8, 8), &params, "b").unwrap();
    let err = vpp.convert(frame(&runtime, 8, 8), &params, "c").unwrap_err();
    assert!(matches!(
        err,
        VppError::PoolExhausted {
            pool: "stream",
            capacity: 2,
            ..
        }
    ));

    // Bound consumers keep working.
    vpp.convert(frame(&runtime, 8, 8), &params, "a").unwrap();
    assert_eq!(vpp.stream_slot("b"), Some(1));
    assert_eq!(vpp.stream_slot("c"), None);
}

#[test]
fn dumps_append_packed_frames_per_consumer() {
    let dir = unique_temp_dir("dumps");
    let (runtime, vpp) = processor(3, Some(dir.clone()));

    for i in 0..3 {
        assert!(dir.join(DumpFile::file_name(i)).exists(), "pool file {i} not created");
    }

    let gray = VppParameters::new(4, 4, DestinationFormat::Y800);
    let bgr = VppParameters::new(4, 2, DestinationFormat::Bgr24);
    vpp.convert(frame(&runtime, 8, 8), &gray, "first").unwrap();
    vpp.convert(frame(&runtime, 8, 8), &gray, "first").unwrap();
    vpp.convert(frame(&runtime, 8, 8), &bgr, "second").unwrap();

    let stats = vpp.stats();
    assert_eq!(stats.frames_dumped, 3);
    assert_eq!(stats.bytes_dumped, 16 + 16 + 24);
    // Two Y800 stagings plus one read-back per dumped frame.
    assert_eq!(stats.host_round_trips, 2 + 3);
    vpp.close().unwrap();

    assert_eq!(fs::read(dir.join("Processed_0.yuv")).unwrap().len(), 32);
    assert_eq!(fs::read(dir.join("Processed_1.yuv")).unwrap().len(), 24);
    assert!(fs::read(dir.join("Processed_2.yuv")).unwrap().is_empty());

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn dumped_gray_frame_matches_returned_frame() {
    let dir = unique_temp_dir("dump_content");
    let (runtime, vpp) = processor(1, Some(dir.clone()));

    let out = vpp
        .convert(
            frame(&runtime, 8, 8),
            &VppParameters::new(4, 4, DestinationFormat::Y800),
            "only",
        )
        .unwrap();
    let device = out.buffer.device().unwrap();
    let expected = device.memory.as_slice().to_vec();
    vpp.close().unwrap();

    assert_eq!(fs::read(dir.join("Processed_0.yuv")).unwrap(), expected);
    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn failed_readback_writes_nothing() {
    let dir = unique_temp_dir("dump_fault");
    let (runtime, vpp) = processor(1, Some(dir.clone()));
    let params = VppParameters::new(4, 4, DestinationFormat::Bgr24);

    let input = frame(&runtime, 8, 8);
    runtime.fail_next(FaultPoint::CopyToHost);
    let err = vpp.convert(input, &params, "cam").unwrap_err();
    assert!(matches!(err, VppError::DeviceTransfer { op: "copy_to_host", .. }));
    assert_eq!(vpp.stats().frames_converted, 0);
    assert_eq!(vpp.stats().frames_dumped, 0);
    assert_eq!(vpp.stats().host_round_trips, 0);

    vpp.convert(frame(&runtime, 8, 8), &params, "cam").unwrap();
    assert_eq!(vpp.stats().host_round_trips, 1);
    vpp.close().unwrap();

    assert_eq!(fs::read(dir.join("Processed_0.yuv")).unwrap().len(), 48);
    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn unwritable_dump_dir_fails_init() {
    let dir = unique_temp_dir("dump_blocked");
    let blocker = dir.join("not_a_dir");
    fs::write(&blocker, b"x").unwrap();

    let runtime = Arc::new(HostRuntime::new());
    let config = ProcessorConfig {
        enable_dumps: true,
        dump_dir: blocker,
        ..ProcessorConfig::default()
    };
    let vpp = VideoProcessor::new(runtime, HostKernels, config).unwrap();
    let err = vpp.init(true).unwrap_err();
    assert_eq!(err.error_code(), 500);
    assert_eq!(vpp.state(), ProcessorState::Uninitialized);

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn concurrent_consumers_get_distinct_slots() {
    let dir = unique_temp_dir("concurrent");
    let (runtime, vpp) = processor(4, Some(dir.clone()));
    let params = VppParameters::new(4, 4, DestinationFormat::Y800);

    std::thread::scope(|s| {
        for t in 0..4 {
            let vpp = &vpp;
            let runtime = &runtime;
            s.spawn(move || {
                let name = format!("worker-{t}");
                for _ in 0..3 {
                    vpp.convert(frame(runtime, 8, 8), &params, &name).unwrap();
                }
            });
        }
    });

    let mut slots: Vec<usize> = (0..4)
        .map(|t| vpp.stream_slot(&format!("worker-{t}")).unwrap())
        .collect();
    slots.sort_unstable();
    assert_eq!(slots, vec![0, 1, 2, 3]);
    assert_eq!(vpp.stats().frames_converted, 12);
    vpp.close().unwrap();

    for slot in 0..4 {
        let len = fs::read(dir.join(DumpFile::file_name(slot))).unwrap().len();
        assert_eq!(len, 3 * 16, "slot {slot}");
    }
    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn drop_closes_and_flushes_dumps() {
    let dir = unique_temp_dir("drop");
    {
        let (runtime, vpp) = processor(1, Some(dir.clone()));
        vpp.convert(
            frame(&runtime, 8, 8),
            &VppParameters::new(4, 4, DestinationFormat::Y800),
            "cam",
        )
        .unwrap();
    }
    assert_eq!(fs::read(dir.join("Processed_0.yuv")).unwrap().len(), 16);
    let _ = fs::remove_dir_all(&dir);
}
