//! # Kernel Compiler
//!
//! Turns OpenCL C source text into a built program and resolves kernel entry
//! points in it. The build log is always fetched, since successful builds can
//! still carry useful diagnostics (an Intel CPU backend reports the
//! vectorization width it chose, for instance).

use std::fs;
use std::marker::PhantomData;
use std::path::Path;

use opencl3::kernel::Kernel;
use opencl3::program::Program;
use opencl3::types::cl_device_id;
use serde::Serialize;
use tracing::{debug, info};

use crate::device::ComputeDevice;
use crate::dispatch::{KernelInvocation, KernelSignature};
use crate::error::{BenchError, ClResultExt, Result};
use crate::session::Session;

/// Logs this short or shorter carry no diagnostics.
pub const TRIVIAL_LOG_LEN: usize = 2;

/// Asks the compiler to keep argument metadata so bindings can be checked.
pub const KERNEL_ARG_INFO_OPTION: &str = "-cl-kernel-arg-info";

const CL_BUILD_PROGRAM_FAILURE: i32 = -11;
const CL_INVALID_KERNEL_NAME: i32 = -46;

/// Reads kernel source from `path` (relative paths resolve against the
/// working directory). An empty file is a deployment problem, not a compile error.
pub fn load_source(path: &Path) -> Result<String> {
    let text = fs::read_to_string(path).map_err(|source| BenchError::KernelSourceIo {
        path: path.to_path_buf(),
        source,
    })?;

    if text.is_empty() {
        return Err(BenchError::EmptySource {
            path: Some(path.to_path_buf()),
        });
    }

    debug!("Loaded kernel source {} ({} bytes)", path.display(), text.len());
    Ok(text)
}

/// Rejects empty source before anything reaches the driver.
pub fn check_source(text: &str) -> Result<()> {
    if text.is_empty() {
        return Err(BenchError::EmptySource { path: None });
    }
    Ok(())
}

/// Full option string passed to `clBuildProgram`.
pub fn build_options(extra: &str) -> String {
    let extra = extra.trim();
    if extra.is_empty() {
        KERNEL_ARG_INFO_OPTION.to_string()
    } else {
        format!("{KERNEL_ARG_INFO_OPTION} {extra}")
    }
}

/// Outcome of a successful build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildReport {
    /// Compiler diagnostics, or `None` when the log was trivial.
    pub log: Option<String>,
}

impl BuildReport {
    pub fn from_log(raw: String) -> Self {
        if raw.len() <= TRIVIAL_LOG_LEN {
            Self { log: None }
        } else {
            Self { log: Some(raw) }
        }
    }
}

/// A program compiled from source within one session, for one device.
pub struct KernelProgram<'s> {
    program: Program,
    device_id: cl_device_id,
    session_id: u64,
    built: bool,
    _session: PhantomData<&'s Session>,
}

impl<'s> KernelProgram<'s> {
    /// Creates the program object from source. Empty source fails with
    /// [`BenchError::EmptySource`] before any device-API call.
    pub fn compile(session: &'s Session, source: &str) -> Result<Self> {
        check_source(source)?;

        let program = Program::create_from_source(session.context(), source)
            .or_driver("clCreateProgramWithSource")?;

        Ok(Self {
            program,
            device_id: session.device().id,
            session_id: session.id(),
            built: false,
            _session: PhantomData,
        })
    }

    /// Builds for `device` and returns the build log.
    ///
    /// A failing build returns [`BenchError::BuildFailure`] carrying the log.
    pub fn build(&mut self, device: &ComputeDevice, extra_options: &str) -> Result<BuildReport> {
        if device.id != self.device_id {
            return Err(BenchError::InvalidLaunch {
                reason: format!("program was created for another device than '{}'", device.name),
            });
        }

        let options = build_options(extra_options);
        debug!("Building program with options '{}'", options);
        let built = self.program.build(&[self.device_id], &options);

        let log = self
            .program
            .get_build_log(self.device_id)
            .or_driver("clGetProgramBuildInfo(CL_PROGRAM_BUILD_LOG)")?;

        match built {
            Ok(()) => {
                self.built = true;
                let report = BuildReport::from_log(log);
                info!(
                    "Program built for {} ({})",
                    device.name,
                    if report.log.is_some() {
                        "with diagnostics"
                    } else {
                        "clean"
                    }
                );
                Ok(report)
            }
            Err(err) if err.0 == CL_BUILD_PROGRAM_FAILURE => Err(BenchError::BuildFailure { log }),
            Err(err) => Err(BenchError::driver("clBuildProgram", err)),
        }
    }

    pub fn is_built(&self) -> bool {
        self.built
    }

    /// Creates the kernel object for entry point `name`.
    pub fn entry_point(&self, name: &str) -> Result<KernelInvocation<'s>> {
        if !self.built {
            return Err(BenchError::InvalidLaunch {
                reason: format!("entry point '{name}' requested before the program was built"),
            });
        }

        let kernel = match Kernel::create(&self.program, name) {
            Ok(kernel) => kernel,
            Err(err) if err.0 == CL_INVALID_KERNEL_NAME => {
                return Err(BenchError::EntryPointNotFound {
                    name: name.to_string(),
                })
            }
            Err(err) => return Err(BenchError::driver("clCreateKernel", err)),
        };

        let arity = kernel.num_args().or_driver("clGetKernelInfo(CL_KERNEL_NUM_ARGS)")?;
        let signature = KernelSignature::reflect(&kernel, arity)?;
        match &signature {
            Some(sig) => debug!("Kernel '{}' signature: {}", name, sig),
            None => debug!("Kernel '{}': argument info not available", name),
        }

        Ok(KernelInvocation::new(
            kernel,
            name.to_string(),
            arity,
            signature,
            self.session_id,
        ))
    }
}
