#![allow(missing_docs)]
//! # OpenCL Element-wise Benchmark
//!
//! This crate discovers OpenCL devices, opens a session on one of them,
//! compiles an element-wise kernel from source, times repeated launches over a
//! large array, and validates the device result against a host reference.
//!
//! ## Core Modules
//!
//! - `device`: platform and device enumeration, and the total selection policy.
//! - `session`: one context plus one in-order queue, with the driver fault channel.
//! - `buffer`: fixed-size device allocations with a declared access intent.
//! - `compiler`: source loading, program build, entry-point lookup.
//! - `dispatch`: argument binding, launch geometry, timed launches, derived metrics.
//! - `timing`: lap timer and trimmed statistics.
//! - `validate`: blocking read-back and exact comparison.
//! - `workload`: host input generation and the reference operation.
//! - `model`: run configuration and report.
//! - `bench`: the pipeline tying it all together.

pub mod bench;
pub mod buffer;
pub mod compiler;
pub mod device;
pub mod dispatch;
pub mod error;
pub mod model;
pub mod session;
pub mod timing;
pub mod validate;
pub mod workload;

pub use buffer::{AccessIntent, DeviceBuffer};
pub use compiler::KernelProgram;
pub use device::{choose_device, ComputeDevice, DeviceCatalog, DeviceClass, OpenClCatalog, SelectionPolicy};
pub use dispatch::{DispatchEngine, KernelArg, KernelInvocation, LaunchGeometry, ScalarArg};
pub use error::{BenchError, Result};
pub use model::{BenchConfig, BenchReport};
pub use session::{Session, SessionOptions};
pub use workload::BinaryOp;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
