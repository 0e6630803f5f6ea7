#![deny(missing_docs)]
//! # aplusb
//!
//! Runs the element-wise benchmark once, top to bottom: picks a device,
//! builds the kernel, times `--trials` launches over `--n` elements, times the
//! read-back, and checks every element against the host reference.
//!
//! A bare invocation is the reference workload: `c = a + b` over 10^8 floats,
//! 20 trials, work-groups of 128, preferring an NVIDIA accelerator.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use clbench::device::DeviceClass;
use clbench::model::{RunRecord, DEFAULT_KERNEL_PATH};
use clbench::{bench, BenchConfig, BenchReport, BinaryOp, OpenClCatalog, SelectionPolicy};

#[derive(Parser, Debug)]
#[command(author, version, about = "OpenCL element-wise kernel benchmark")]
/// Command-line arguments for a benchmark run.
struct Args {
    /// Kernel source file
    #[arg(long, default_value = DEFAULT_KERNEL_PATH)]
    kernel: PathBuf,

    /// Operation (add, sub or mul)
    #[arg(long, default_value = "add")]
    op: BinaryOp,

    /// Elements per array
    #[arg(long, default_value = "100000000")]
    n: usize,

    /// Timed launches and timed read-backs
    #[arg(long, default_value = "20")]
    trials: usize,

    /// Work-group size
    #[arg(long, default_value = "128")]
    local_size: usize,

    /// Device name substring to prefer
    #[arg(long, default_value = "nvidia")]
    prefer: String,

    /// Device class to look for first (gpu or cpu)
    #[arg(long, default_value = "gpu")]
    device_class: DeviceClass,

    /// Fail instead of falling back to a processor device
    #[arg(long)]
    no_cpu_fallback: bool,

    /// Untimed launches before the trials
    #[arg(long, default_value = "0")]
    warmup: usize,

    /// Extra compiler options
    #[arg(long, default_value = "")]
    build_options: String,

    /// Upload inputs with a blocking write instead of copying at allocation
    #[arg(long)]
    explicit_upload: bool,

    /// Record device-side kernel time through event profiling
    #[arg(long)]
    profiling: bool,

    /// Output file for configuration and results (JSON)
    #[arg(long)]
    out: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn config(&self) -> BenchConfig {
        BenchConfig {
            kernel_path: self.kernel.clone(),
            op: self.op,
            elements: self.n,
            trials: self.trials,
            warmup: self.warmup,
            local_size: self.local_size,
            selection: SelectionPolicy {
                preference: self.prefer.clone(),
                class: self.device_class,
                cpu_fallback: !self.no_cpu_fallback,
            },
            build_options: self.build_options.clone(),
            explicit_upload: self.explicit_upload,
            profiling: self.profiling,
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    let filter = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let config = args.config();
    info!("[APLUSB:INIT] clbench {}", clbench::VERSION);
    info!(
        "[APLUSB:INIT] Op: {} ({}), N: {}, trials: {}, local size: {}",
        config.op,
        config.op.entry_point(),
        config.elements,
        config.trials,
        config.local_size
    );
    info!(
        "[APLUSB:INIT] Device preference: '{}' ({}), processor fallback: {}",
        config.selection.preference, config.selection.class, config.selection.cpu_fallback
    );

    let report = bench::run(&config, &OpenClCatalog)
        .with_context(|| format!("benchmark run with kernel {}", config.kernel_path.display()))?;

    print_report(&report);

    if let Some(path) = &args.out {
        save_report(path, &config, &report)?;
    }

    Ok(())
}

fn print_report(report: &BenchReport) {
    let device = &report.device;
    info!(
        "[APLUSB:DEVICE] {} ({}), platform: {}{}",
        device.name,
        device.vendor,
        device.platform,
        if device.fell_back { " [processor fallback]" } else { "" }
    );

    match &report.build_log {
        Some(log) => info!("[APLUSB:BUILD] Log:\n{}", log),
        None => info!("[APLUSB:BUILD] Compiled successfully"),
    }

    let kernel = &report.kernel;
    info!(
        "[APLUSB:KERNEL] Kernel average time: {:.6}+-{:.6} s",
        kernel.timing.wall.mean_s, kernel.timing.wall.std_s
    );
    info!(
        "[APLUSB:KERNEL] Launches: {}, total wall time: {:.2} ms",
        kernel.stats.launches, kernel.stats.wall_time_ms
    );
    if let Some(device_ms) = kernel.stats.device_time_ms {
        info!("[APLUSB:KERNEL] Total device time: {:.2} ms", device_ms);
    }
    info!("[APLUSB:KERNEL] GFlops: {:.3}", kernel.throughput.gops);
    info!(
        "[APLUSB:KERNEL] VRAM bandwidth: {:.3} GB/s",
        kernel.throughput.bandwidth_gib_s
    );
    if let (Some(device_timing), Some(device_throughput)) =
        (&kernel.timing.device, &kernel.device_throughput)
    {
        info!(
            "[APLUSB:KERNEL] Profiled device time: {:.6}+-{:.6} s ({:.3} GB/s)",
            device_timing.mean_s, device_timing.std_s, device_throughput.bandwidth_gib_s
        );
    }

    let transfer = &report.transfer;
    if let Some(upload) = transfer.upload_s {
        info!("[APLUSB:TRANSFER] Upload time: {:.6} s", upload);
    }
    info!(
        "[APLUSB:TRANSFER] Result data transfer time: {:.6}+-{:.6} s",
        transfer.read_back.mean_s, transfer.read_back.std_s
    );
    info!(
        "[APLUSB:TRANSFER] VRAM -> RAM bandwidth: {:.3} GB/s",
        transfer.bandwidth_gib_s
    );

    info!(
        "[APLUSB:DONE] All {} results are correct",
        report.validation.compared
    );
}

/// Saves configuration and results to a JSON file.
fn save_report(path: &Path, config: &BenchConfig, report: &BenchReport) -> Result<()> {
    let record = RunRecord {
        version: clbench::VERSION,
        config,
        report,
    };

    let mut file =
        File::create(path).with_context(|| format!("creating {}", path.display()))?;
    writeln!(file, "{}", serde_json::to_string_pretty(&record)?)?;
    info!("[APLUSB:DONE] Report saved to {}", path.display());

    Ok(())
}
