//! # Benchmark Pipeline
//!
//! One top-to-bottom run: select a device, open a session, upload inputs,
//! build the kernel, time the launches, read back, validate.
//!
//! ```text
//! device -> session -> buffers -> program -> kernel -> dispatch x trials
//!                                                   -> read-back x trials -> validate
//! ```
//!
//! Every object created inside the session borrows it, and they are declared
//! in acquisition order, so they drop kernel first and buffers last before the
//! session releases its queue and context.

use std::mem;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::buffer::{AccessIntent, DeviceBuffer};
use crate::compiler::{load_source, KernelProgram};
use crate::device::{choose_device, DeviceCatalog, Selection};
use crate::dispatch::{
    check_trials, kernel_throughput, transfer_bandwidth, DispatchEngine, KernelArg, ScalarArg,
};
use crate::error::{BenchError, Result};
use crate::model::{BenchConfig, BenchReport, DeviceReport, KernelReport, TransferReport};
use crate::session::{Session, SessionOptions};
use crate::validate::{read_back_trials, validate_op};
use crate::workload::generate_inputs;

/// Runs the whole benchmark described by `config`.
pub fn run<C: DeviceCatalog + ?Sized>(config: &BenchConfig, catalog: &C) -> Result<BenchReport> {
    check_trials(config.trials)?;
    let selection = choose_device(catalog, &config.selection)?;
    if selection.fell_back {
        warn!(
            "Using processor device '{}' instead of a {} device",
            selection.device.name, config.selection.class
        );
    }
    info!(
        "Selected device: {} ({}), platform: {}",
        selection.device.name, selection.device.vendor, selection.device.platform_name
    );

    let source = load_source(&config.kernel_path)?;

    let session = Session::create(
        &selection.device,
        SessionOptions {
            profiling: config.profiling,
        },
    )?;
    let report = run_in_session(&session, &selection, config, &source)?;
    session.release()?;

    Ok(report)
}

/// Runs the pipeline inside an already open session.
pub fn run_in_session(
    session: &Session,
    selection: &Selection,
    config: &BenchConfig,
    source: &str,
) -> Result<BenchReport> {
    check_trials(config.trials)?;
    let n = config.elements;
    let element_count = u32::try_from(n).map_err(|_| BenchError::InvalidLaunch {
        reason: format!("{n} elements do not fit the kernel's 32-bit count"),
    })?;

    debug!("Generating {} input elements per array", n);
    let (a, b) = generate_inputs(n);

    let mut upload = None;
    let (as_gpu, bs_gpu) = if config.explicit_upload {
        let mut as_gpu = DeviceBuffer::<f32>::allocate(session, n, AccessIntent::ReadOnly, None)?;
        let mut bs_gpu = DeviceBuffer::<f32>::allocate(session, n, AccessIntent::ReadOnly, None)?;
        let elapsed: Duration = as_gpu.write(session, &a)? + bs_gpu.write(session, &b)?;
        upload = Some(elapsed.as_secs_f64());
        (as_gpu, bs_gpu)
    } else {
        (
            DeviceBuffer::allocate(session, n, AccessIntent::ReadOnly, Some(a.as_slice()))?,
            DeviceBuffer::allocate(session, n, AccessIntent::ReadOnly, Some(b.as_slice()))?,
        )
    };
    let cs_gpu = DeviceBuffer::<f32>::allocate(session, n, AccessIntent::WriteOnly, None)?;

    let mut program = KernelProgram::compile(session, source)?;
    let build = program.build(session.device(), &config.build_options)?;
    match &build.log {
        Some(log) => info!("Build log:\n{}", log),
        None => info!("Compiled successfully"),
    }

    let mut kernel = program.entry_point(config.op.entry_point())?;
    kernel.bind_arguments(&[
        KernelArg::buffer(&as_gpu),
        KernelArg::buffer(&bs_gpu),
        KernelArg::buffer(&cs_gpu),
        KernelArg::Scalar(ScalarArg::U32(element_count)),
    ])?;

    let mut engine = DispatchEngine::new(session, n, config.local_size)?;
    if config.warmup > 0 {
        engine.warmup(&kernel, config.warmup)?;
    }
    let timing = engine.run_trials(&kernel, config.trials)?;
    let stats = engine.get_stats();

    let width = mem::size_of::<f32>();
    let throughput = kernel_throughput(n, width, timing.wall.mean_s);
    let device_throughput = timing.device.map(|d| kernel_throughput(n, width, d.mean_s));
    info!(
        "Kernel: {:.6}+-{:.6} s, {:.3} GFlops, {:.3} GB/s",
        timing.wall.mean_s, timing.wall.std_s, throughput.gops, throughput.bandwidth_gib_s
    );

    let mut cs = vec![0.0f32; n];
    let read_back = read_back_trials(session, &cs_gpu, &mut cs, config.trials)?;
    let bytes = cs_gpu.size_bytes() as u64;
    let bandwidth = transfer_bandwidth(bytes, read_back.mean_s);
    info!(
        "Read-back: {:.6}+-{:.6} s, {:.3} GB/s",
        read_back.mean_s, read_back.std_s, bandwidth
    );

    let validation = validate_op(&cs, &a, &b, config.op)?;
    info!("Validated {} elements", validation.compared);

    Ok(BenchReport {
        device: DeviceReport::new(&selection.device, selection.fell_back),
        build_log: build.log,
        kernel: KernelReport {
            entry_point: kernel.name().to_string(),
            geometry: *engine.geometry(),
            timing,
            stats,
            throughput,
            device_throughput,
        },
        transfer: TransferReport {
            bytes,
            upload_s: upload,
            read_back,
            bandwidth_gib_s: bandwidth,
        },
        validation,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{ComputeDevice, DeviceClass, PlatformInfo};

    struct NoPlatforms;

    impl DeviceCatalog for NoPlatforms {
        fn platforms(&self) -> Result<Vec<PlatformInfo>> {
            Ok(Vec::new())
        }

        fn devices(&self, _: &PlatformInfo, _: DeviceClass) -> Result<Vec<ComputeDevice>> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn test_zero_trials_rejected_before_device_selection() {
        let config = BenchConfig {
            trials: 0,
            ..BenchConfig::default()
        };
        let err = run(&config, &NoPlatforms).unwrap_err();
        assert!(matches!(err, BenchError::InvalidLaunch { .. }), "{err}");
    }

    #[test]
    fn test_no_device_reported_with_valid_config() {
        let err = run(&BenchConfig::default(), &NoPlatforms).unwrap_err();
        assert!(matches!(err, BenchError::NoDeviceAvailable { .. }));
    }
}
