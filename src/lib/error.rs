//! # Error Taxonomy
//!
//! Every stage of the benchmark pipeline fails with a [`BenchError`]. None of
//! them are recovered locally: the run aborts and the message is printed for a
//! human to cross-reference against the OpenCL error-code table.

use std::panic::Location;
use std::path::PathBuf;

use opencl3::error_codes::ClError;
use thiserror::Error;

/// Library result type.
pub type Result<T> = std::result::Result<T, BenchError>;

/// Errors that can occur while running the benchmark pipeline.
#[derive(Error, Debug)]
pub enum BenchError {
    /// A device-API call returned a non-success code.
    #[error("{operation} failed with OpenCL error {code} ({name}) at {location}", name = code_name(.code))]
    Driver {
        operation: &'static str,
        code: i32,
        location: &'static Location<'static>,
    },

    #[error("no compute device available (preferred '{preference}', cpu fallback {fallback})")]
    NoDeviceAvailable { preference: String, fallback: bool },

    #[error("context creation failed: {reason}{}", code_suffix(.code))]
    ContextCreation { reason: String, code: Option<i32> },

    #[error("buffer allocation of {bytes} bytes failed (OpenCL error {code}, {name})", name = code_name(.code))]
    Allocation { bytes: usize, code: i32 },

    #[error("empty kernel source{}; is the working directory configured properly?", path_suffix(.path))]
    EmptySource { path: Option<PathBuf> },

    #[error("cannot read kernel source {}: {source}", .path.display())]
    KernelSourceIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("kernel build failed:\n{log}")]
    BuildFailure { log: String },

    #[error("kernel entry point '{name}' not found in program")]
    EntryPointNotFound { name: String },

    #[error("cannot bind kernel argument {index}: {reason}{}", code_suffix(.code))]
    ArgumentBinding {
        index: u32,
        reason: String,
        code: Option<i32>,
    },

    #[error("invalid launch: {reason}")]
    InvalidLaunch { reason: String },

    /// Reported asynchronously by the driver through the context callback.
    #[error("device context fault: {message}")]
    ContextFault { message: String },

    #[error("CPU and GPU results differ at index {index}: expected {expected}, got {actual}")]
    ResultMismatch {
        index: usize,
        expected: f32,
        actual: f32,
    },

    #[error("host and device arrays differ in length: expected {expected}, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },
}

impl BenchError {
    /// Wraps a raw OpenCL error for the named API call.
    #[track_caller]
    pub fn driver(operation: &'static str, err: ClError) -> Self {
        BenchError::Driver {
            operation,
            code: err.0,
            location: Location::caller(),
        }
    }

    /// The vendor error code, when this error came from the driver.
    pub fn code(&self) -> Option<i32> {
        match self {
            BenchError::Driver { code, .. } | BenchError::Allocation { code, .. } => Some(*code),
            BenchError::ContextCreation { code, .. } | BenchError::ArgumentBinding { code, .. } => {
                *code
            }
            _ => None,
        }
    }
}

/// Attaches the failing operation to a raw OpenCL result.
pub trait ClResultExt<T> {
    /// Converts the driver error into [`BenchError::Driver`], recording the caller's location.
    fn or_driver(self, operation: &'static str) -> Result<T>;
}

impl<T> ClResultExt<T> for std::result::Result<T, ClError> {
    #[track_caller]
    fn or_driver(self, operation: &'static str) -> Result<T> {
        match self {
            Ok(value) => Ok(value),
            Err(err) => Err(BenchError::driver(operation, err)),
        }
    }
}

fn code_name(code: &i32) -> &'static str {
    cl_error_name(*code)
}

fn code_suffix(code: &Option<i32>) -> String {
    match *code {
        Some(code) => format!(" (OpenCL error {code}, {})", cl_error_name(code)),
        None => String::new(),
    }
}

fn path_suffix(path: &Option<PathBuf>) -> String {
    match path {
        Some(path) => format!(" in {}", path.display()),
        None => String::new(),
    }
}

/// Symbolic name for the OpenCL error codes this tool can run into.
pub fn cl_error_name(code: i32) -> &'static str {
    match code {
        0 => "CL_SUCCESS",
        -1 => "CL_DEVICE_NOT_FOUND",
        -2 => "CL_DEVICE_NOT_AVAILABLE",
        -3 => "CL_COMPILER_NOT_AVAILABLE",
        -4 => "CL_MEM_OBJECT_ALLOCATION_FAILURE",
        -5 => "CL_OUT_OF_RESOURCES",
        -6 => "CL_OUT_OF_HOST_MEMORY",
        -7 => "CL_PROFILING_INFO_NOT_AVAILABLE",
        -11 => "CL_BUILD_PROGRAM_FAILURE",
        -14 => "CL_EXEC_STATUS_ERROR_FOR_EVENTS_IN_WAIT_LIST",
        -19 => "CL_KERNEL_ARG_INFO_NOT_AVAILABLE",
        -30 => "CL_INVALID_VALUE",
        -32 => "CL_INVALID_PLATFORM",
        -33 => "CL_INVALID_DEVICE",
        -34 => "CL_INVALID_CONTEXT",
        -35 => "CL_INVALID_QUEUE_PROPERTIES",
        -36 => "CL_INVALID_COMMAND_QUEUE",
        -37 => "CL_INVALID_HOST_PTR",
        -38 => "CL_INVALID_MEM_OBJECT",
        -44 => "CL_INVALID_PROGRAM",
        -45 => "CL_INVALID_PROGRAM_EXECUTABLE",
        -46 => "CL_INVALID_KERNEL_NAME",
        -48 => "CL_INVALID_KERNEL",
        -49 => "CL_INVALID_ARG_INDEX",
        -50 => "CL_INVALID_ARG_VALUE",
        -51 => "CL_INVALID_ARG_SIZE",
        -52 => "CL_INVALID_KERNEL_ARGS",
        -53 => "CL_INVALID_WORK_DIMENSION",
        -54 => "CL_INVALID_WORK_GROUP_SIZE",
        -55 => "CL_INVALID_WORK_ITEM_SIZE",
        -58 => "CL_INVALID_EVENT",
        -61 => "CL_INVALID_BUFFER_SIZE",
        -63 => "CL_INVALID_GLOBAL_WORK_SIZE",
        -1001 => "CL_PLATFORM_NOT_FOUND_KHR",
        _ => "unknown OpenCL error",
    }
}
