//! End-to-end runs against a real OpenCL device.
//!
//! Run with `cargo test -- --ignored` on a machine with an OpenCL runtime.

use std::path::PathBuf;

use clbench::buffer::{AccessIntent, DeviceBuffer};
use clbench::compiler::{load_source, KernelProgram};
use clbench::device::{choose_device, OpenClCatalog, SelectionPolicy};
use clbench::dispatch::{KernelArg, ScalarArg};
use clbench::session::{Session, SessionOptions};
use clbench::{bench, BenchConfig, BenchError, BinaryOp};

fn kernel_path() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("src/cl/aplusb.cl")
}

fn small_config(op: BinaryOp) -> BenchConfig {
    BenchConfig {
        kernel_path: kernel_path(),
        op,
        // Not a multiple of the work-group size: exercises the bounds check.
        elements: 1000,
        trials: 5,
        ..BenchConfig::default()
    }
}

fn open_session(profiling: bool) -> Session {
    let selection = choose_device(&OpenClCatalog, &SelectionPolicy::default()).unwrap();
    Session::create(&selection.device, SessionOptions { profiling }).unwrap()
}

#[test]
#[ignore = "requires OpenCL runtime"]
fn test_reference_pipeline_validates() {
    let report = bench::run(&small_config(BinaryOp::Add), &OpenClCatalog).unwrap();
    assert_eq!(report.validation.compared, 1000);
    assert_eq!(report.kernel.geometry.global, 1024);
    assert_eq!(report.kernel.timing.wall.total, 5);
    assert_eq!(report.kernel.timing.wall.kept, 3);
    assert_eq!(report.transfer.bytes, 4000);
    assert_eq!(report.kernel.stats.launches, 5);
}

#[test]
#[ignore = "requires OpenCL runtime"]
fn test_every_operation_validates() {
    for op in [BinaryOp::Sub, BinaryOp::Mul] {
        let report = bench::run(&small_config(op), &OpenClCatalog).unwrap();
        assert_eq!(report.kernel.entry_point, op.entry_point());
    }
}

#[test]
#[ignore = "requires OpenCL runtime"]
fn test_explicit_upload_with_profiling_and_warmup() {
    let config = BenchConfig {
        explicit_upload: true,
        profiling: true,
        warmup: 2,
        ..small_config(BinaryOp::Add)
    };
    let report = bench::run(&config, &OpenClCatalog).unwrap();
    assert!(report.transfer.upload_s.is_some());
    assert!(report.kernel.timing.device.is_some());
    assert_eq!(report.kernel.timing.wall.total, 5);
    // Warm-up launches are not counted.
    assert_eq!(report.kernel.stats.launches, 5);
    assert!(report.kernel.stats.device_time_ms.is_some());
}

#[test]
#[ignore = "requires OpenCL runtime"]
fn test_read_only_buffer_rejected_as_output() {
    let session = open_session(false);
    let source = load_source(&kernel_path()).unwrap();

    let input = vec![1.0f32; 256];
    let a = DeviceBuffer::allocate(&session, 256, AccessIntent::ReadOnly, Some(input.as_slice())).unwrap();
    let mut program = KernelProgram::compile(&session, &source).unwrap();
    program.build(session.device(), "").unwrap();
    let mut kernel = program.entry_point("aplusb").unwrap();

    let err = kernel.bind(2, &KernelArg::buffer(&a)).unwrap_err();
    assert!(matches!(err, BenchError::ArgumentBinding { index: 2, .. }), "{err}");

    let err = kernel
        .bind(3, &KernelArg::Scalar(ScalarArg::U64(256)))
        .unwrap_err();
    assert!(matches!(err, BenchError::ArgumentBinding { index: 3, .. }), "{err}");
}

#[test]
#[ignore = "requires OpenCL runtime"]
fn test_buffer_from_other_session_rejected() {
    let first = open_session(false);
    let second = open_session(false);
    let source = load_source(&kernel_path()).unwrap();

    let foreign = DeviceBuffer::<f32>::allocate(&second, 16, AccessIntent::ReadOnly, None).unwrap();
    let mut program = KernelProgram::compile(&first, &source).unwrap();
    program.build(first.device(), "").unwrap();
    let mut kernel = program.entry_point("aplusb").unwrap();

    let err = kernel.bind(0, &KernelArg::buffer(&foreign)).unwrap_err();
    assert!(matches!(err, BenchError::ArgumentBinding { .. }));
}

#[test]
#[ignore = "requires OpenCL runtime"]
fn test_missing_entry_point_and_build_failure() {
    let session = open_session(false);
    let source = load_source(&kernel_path()).unwrap();

    let mut program = KernelProgram::compile(&session, &source).unwrap();
    program.build(session.device(), "").unwrap();
    assert!(matches!(
        program.entry_point("adivb"),
        Err(BenchError::EntryPointNotFound { .. })
    ));

    let mut broken = KernelProgram::compile(&session, "__kernel void k( { }").unwrap();
    match broken.build(session.device(), "") {
        Err(BenchError::BuildFailure { log }) => assert!(!log.is_empty()),
        other => panic!("expected build failure, got {:?}", other.map(|r| r.log)),
    }
}

#[test]
#[ignore = "requires OpenCL runtime"]
fn test_unbound_kernel_rejected_at_dispatch() {
    let session = open_session(false);
    let source = load_source(&kernel_path()).unwrap();

    let mut program = KernelProgram::compile(&session, &source).unwrap();
    program.build(session.device(), "").unwrap();
    let kernel = program.entry_point("aplusb").unwrap();

    let mut engine = clbench::DispatchEngine::new(&session, 1000, 128).unwrap();
    assert!(matches!(
        engine.launch(&kernel),
        Err(BenchError::ArgumentBinding { index: 0, .. })
    ));
    assert!(matches!(
        engine.run_trials(&kernel, 0),
        Err(BenchError::InvalidLaunch { .. })
    ));
    assert_eq!(engine.get_stats().launches, 0);
}
