//! # Run Configuration and Report
//!
//! - `BenchConfig`: everything that determines a run, fixed before the first driver call.
//! - `BenchReport`: everything a run measured. Serialized as JSON next to the config.

use std::path::PathBuf;

use serde::Serialize;

use crate::device::{ComputeDevice, DeviceClass, SelectionPolicy};
use crate::dispatch::{KernelTiming, LaunchGeometry, LaunchStats, Throughput, DEFAULT_LOCAL_SIZE, DEFAULT_TRIALS};
use crate::timing::LapSummary;
use crate::validate::ValidationOutcome;
use crate::workload::BinaryOp;

/// Element count of the reference workload.
pub const DEFAULT_ELEMENTS: usize = 100_000_000;

/// Kernel source shipped with the crate, relative to the working directory.
pub const DEFAULT_KERNEL_PATH: &str = "src/cl/aplusb.cl";

/// Effective run configuration.
#[derive(Debug, Clone, Serialize)]
pub struct BenchConfig {
    pub kernel_path: PathBuf,
    pub op: BinaryOp,
    /// Elements per input array.
    pub elements: usize,
    /// Timed kernel launches (and timed read-backs).
    pub trials: usize,
    /// Untimed launches before the trials.
    pub warmup: usize,
    pub local_size: usize,
    pub selection: SelectionPolicy,
    /// Extra options appended to the compiler command line.
    pub build_options: String,
    /// Allocate inputs empty and upload with a blocking write.
    pub explicit_upload: bool,
    /// Record device-side event timestamps.
    pub profiling: bool,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            kernel_path: PathBuf::from(DEFAULT_KERNEL_PATH),
            op: BinaryOp::Add,
            elements: DEFAULT_ELEMENTS,
            trials: DEFAULT_TRIALS,
            warmup: 0,
            local_size: DEFAULT_LOCAL_SIZE,
            selection: SelectionPolicy::default(),
            build_options: String::new(),
            explicit_upload: false,
            profiling: false,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DeviceReport {
    pub name: String,
    pub vendor: String,
    pub platform: String,
    pub class: DeviceClass,
    pub max_work_group_size: usize,
    /// Chosen through the processor fallback.
    pub fell_back: bool,
}

impl DeviceReport {
    pub fn new(device: &ComputeDevice, fell_back: bool) -> Self {
        Self {
            name: device.name.clone(),
            vendor: device.vendor.clone(),
            platform: device.platform_name.clone(),
            class: device.class,
            max_work_group_size: device.max_work_group_size,
            fell_back,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct KernelReport {
    pub entry_point: String,
    pub geometry: LaunchGeometry,
    pub timing: KernelTiming,
    /// Totals over the timed launches (warm-up excluded).
    pub stats: LaunchStats,
    /// Derived from the wall-clock mean.
    pub throughput: Throughput,
    /// Derived from the profiled device mean, when profiling was on.
    pub device_throughput: Option<Throughput>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TransferReport {
    pub bytes: u64,
    /// Host-to-device upload time, explicit-upload runs only (seconds).
    pub upload_s: Option<f64>,
    pub read_back: LapSummary,
    /// Read-back bandwidth in GiB/s.
    pub bandwidth_gib_s: f64,
}

/// Everything one run measured.
#[derive(Debug, Clone, Serialize)]
pub struct BenchReport {
    pub device: DeviceReport,
    /// Non-trivial compiler output, if any.
    pub build_log: Option<String>,
    pub kernel: KernelReport,
    pub transfer: TransferReport,
    pub validation: ValidationOutcome,
}

/// What `--out` writes.
#[derive(Debug, Serialize)]
pub struct RunRecord<'a> {
    pub version: &'static str,
    pub config: &'a BenchConfig,
    pub report: &'a BenchReport,
}
