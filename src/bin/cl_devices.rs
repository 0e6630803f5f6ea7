#![deny(missing_docs)]
//! # cl-devices
//!
//! Lists every OpenCL platform and its devices, in the order device
//! selection walks them.

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use clbench::device::{DeviceCatalog, DeviceClass, OpenClCatalog};

#[derive(Parser, Debug)]
#[command(author, version, about = "List OpenCL platforms and devices")]
/// Command-line arguments for the device listing.
struct Args {
    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let filter = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let catalog = OpenClCatalog;
    let platforms = catalog.platforms().context("enumerating OpenCL platforms")?;
    info!("[DEVICES] {} platform(s)", platforms.len());

    for (p, platform) in platforms.iter().enumerate() {
        info!("[DEVICES] Platform #{}: {}", p, platform.name);

        for class in [DeviceClass::Gpu, DeviceClass::Cpu] {
            let devices = catalog
                .devices(platform, class)
                .with_context(|| format!("enumerating {} devices on {}", class, platform.name))?;

            for device in devices {
                info!(
                    "[DEVICES]   [{}] {} (vendor: {}, max work-group: {})",
                    class, device.name, device.vendor, device.max_work_group_size
                );
            }
        }
    }

    Ok(())
}
