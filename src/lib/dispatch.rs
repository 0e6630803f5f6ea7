//! # Dispatch and Timing Engine
//!
//! Binds kernel arguments by position, launches the kernel over a padded 1-D
//! index space, and times repeated launches.
//!
//! Every launch is synchronous: the control thread enqueues exactly one
//! kernel, waits on its completion event, and only then records the lap. No
//! two launches overlap, so each lap measures one kernel execution.
//!
//! The global size is padded up to a multiple of the work-group size. The
//! kernel receives the logical element count and must ignore indices past it;
//! the engine does not clip the index space.

use std::fmt;
use std::marker::PhantomData;
use std::mem;
use std::ptr;
use std::time::Duration;

use opencl3::event::Event;
use opencl3::kernel::Kernel;
use opencl3::memory::ClMem;
use opencl3::types::{cl_mem, cl_uint, cl_ulong};
use serde::Serialize;
use tracing::{debug, info};

use crate::buffer::{AccessIntent, BufferDesc, DeviceBuffer};
use crate::error::{BenchError, ClResultExt, Result};
use crate::session::Session;
use crate::timing::{LapSample, LapSummary, LapTimer};

/// Work-group size of the reference workload.
pub const DEFAULT_LOCAL_SIZE: usize = 128;

/// Timed launches in the reference workload.
pub const DEFAULT_TRIALS: usize = 20;

/// Bytes per GiB, the unit bandwidth is reported in.
pub const GIB: f64 = (1u64 << 30) as f64;

const CL_KERNEL_ARG_INFO_NOT_AVAILABLE: i32 = -19;
const CL_INVALID_MEM_OBJECT: i32 = -38;
const CL_INVALID_ARG_INDEX: i32 = -49;
const CL_INVALID_ARG_VALUE: i32 = -50;
const CL_INVALID_ARG_SIZE: i32 = -51;

const CL_KERNEL_ARG_ADDRESS_GLOBAL: cl_uint = 0x119B;
const CL_KERNEL_ARG_TYPE_CONST: cl_ulong = 1 << 0;

// ---------------------------------------------------------------------------
// Kernel signatures
// ---------------------------------------------------------------------------

/// What a kernel parameter expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    /// `__global T*`; `writable` is false for `const`-qualified pointees.
    GlobalPointer { writable: bool },
    /// By-value scalar; `size` is `None` for device-dependent types like `size_t`.
    Scalar { size: Option<usize> },
    /// Local, constant or image parameters: left to the driver.
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamSpec {
    pub name: String,
    pub type_name: String,
    pub kind: ParamKind,
}

/// Parameter list of one kernel entry point, as reported by the driver.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct KernelSignature {
    pub params: Vec<ParamSpec>,
}

impl KernelSignature {
    /// Queries argument metadata. `Ok(None)` when the program was built
    /// without argument info.
    pub fn reflect(kernel: &Kernel, arity: cl_uint) -> Result<Option<Self>> {
        let mut params = Vec::with_capacity(arity as usize);

        for index in 0..arity {
            let address = match kernel.get_arg_address_qualifier(index) {
                Ok(address) => address,
                Err(err) if err.0 == CL_KERNEL_ARG_INFO_NOT_AVAILABLE => return Ok(None),
                Err(err) => return Err(BenchError::driver("clGetKernelArgInfo", err)),
            };
            let qualifiers = kernel
                .get_arg_type_qualifier(index)
                .or_driver("clGetKernelArgInfo(CL_KERNEL_ARG_TYPE_QUALIFIER)")?;
            let type_name = kernel
                .get_arg_type_name(index)
                .or_driver("clGetKernelArgInfo(CL_KERNEL_ARG_TYPE_NAME)")?;
            let name = kernel
                .get_arg_name(index)
                .or_driver("clGetKernelArgInfo(CL_KERNEL_ARG_NAME)")?;

            let type_name = type_name.trim_end_matches('\0').to_string();
            params.push(ParamSpec {
                name: name.trim_end_matches('\0').to_string(),
                kind: classify_param(address, qualifiers, &type_name),
                type_name,
            });
        }

        Ok(Some(Self { params }))
    }

    pub fn param(&self, index: u32) -> Option<&ParamSpec> {
        self.params.get(index as usize)
    }
}

impl fmt::Display for KernelSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, param) in self.params.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{} {}", param.type_name, param.name)?;
        }
        write!(f, ")")
    }
}

/// Maps driver argument metadata to a [`ParamKind`].
pub fn classify_param(address_qualifier: cl_uint, type_qualifier: cl_ulong, type_name: &str) -> ParamKind {
    if type_name.ends_with('*') {
        if address_qualifier == CL_KERNEL_ARG_ADDRESS_GLOBAL {
            ParamKind::GlobalPointer {
                writable: type_qualifier & CL_KERNEL_ARG_TYPE_CONST == 0,
            }
        } else {
            ParamKind::Other
        }
    } else {
        match scalar_size(type_name) {
            Some(size) => ParamKind::Scalar { size: Some(size) },
            None if type_name == "size_t" || type_name == "ptrdiff_t" => {
                ParamKind::Scalar { size: None }
            }
            None => ParamKind::Other,
        }
    }
}

/// Byte size of an OpenCL C scalar type name.
pub fn scalar_size(type_name: &str) -> Option<usize> {
    match type_name {
        "char" | "uchar" | "bool" => Some(1),
        "short" | "ushort" | "half" => Some(2),
        "int" | "uint" | "float" => Some(4),
        "long" | "ulong" | "double" => Some(8),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Arguments and binding
// ---------------------------------------------------------------------------

/// A by-value kernel argument.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScalarArg {
    U32(u32),
    I32(i32),
    F32(f32),
    U64(u64),
}

impl ScalarArg {
    pub fn size(&self) -> usize {
        match self {
            ScalarArg::U32(_) | ScalarArg::I32(_) | ScalarArg::F32(_) => 4,
            ScalarArg::U64(_) => 8,
        }
    }
}

/// One positional kernel argument.
#[derive(Debug, Clone, Copy)]
pub enum KernelArg {
    Buffer { mem: cl_mem, desc: BufferDesc },
    Scalar(ScalarArg),
}

impl KernelArg {
    pub fn buffer<T>(buffer: &DeviceBuffer<'_, T>) -> Self {
        KernelArg::Buffer {
            mem: buffer.raw().get(),
            desc: buffer.desc(),
        }
    }

    pub fn size(&self) -> usize {
        match self {
            KernelArg::Buffer { .. } => mem::size_of::<cl_mem>(),
            KernelArg::Scalar(scalar) => scalar.size(),
        }
    }
}

impl From<ScalarArg> for KernelArg {
    fn from(scalar: ScalarArg) -> Self {
        KernelArg::Scalar(scalar)
    }
}

fn binding_error(index: u32, reason: String) -> BenchError {
    BenchError::ArgumentBinding {
        index,
        reason,
        code: None,
    }
}

/// Checks one binding against the kernel's parameter list before it reaches the driver.
pub fn check_binding(
    index: u32,
    arity: u32,
    signature: Option<&KernelSignature>,
    session_id: u64,
    arg: &KernelArg,
) -> Result<()> {
    if index >= arity {
        return Err(binding_error(
            index,
            format!("kernel takes {arity} argument(s)"),
        ));
    }

    if let KernelArg::Buffer { desc, .. } = arg {
        if desc.session_id != session_id {
            return Err(binding_error(
                index,
                format!(
                    "buffer from session {} bound to a kernel of session {}",
                    desc.session_id, session_id
                ),
            ));
        }
    }

    let Some(param) = signature.and_then(|sig| sig.param(index)) else {
        return Ok(());
    };

    match (param.kind, arg) {
        (ParamKind::GlobalPointer { writable }, KernelArg::Buffer { desc, .. }) => {
            match (writable, desc.intent) {
                (true, AccessIntent::ReadOnly) => Err(binding_error(
                    index,
                    format!(
                        "read-only buffer bound to writable parameter '{} {}'",
                        param.type_name, param.name
                    ),
                )),
                (false, AccessIntent::WriteOnly) => Err(binding_error(
                    index,
                    format!(
                        "write-only buffer bound to read-only parameter '{} {}'",
                        param.type_name, param.name
                    ),
                )),
                _ => Ok(()),
            }
        }
        (ParamKind::GlobalPointer { .. }, KernelArg::Scalar(scalar)) => Err(binding_error(
            index,
            format!(
                "parameter '{}' expects a buffer, got a {}-byte scalar",
                param.name,
                scalar.size()
            ),
        )),
        (ParamKind::Scalar { .. }, KernelArg::Buffer { .. }) => Err(binding_error(
            index,
            format!(
                "parameter '{} {}' expects a scalar, got a buffer",
                param.type_name, param.name
            ),
        )),
        (ParamKind::Scalar { size: Some(expected) }, KernelArg::Scalar(scalar))
            if scalar.size() != expected =>
        {
            Err(binding_error(
                index,
                format!(
                    "parameter '{} {}' is {} bytes, argument is {} bytes",
                    param.type_name,
                    param.name,
                    expected,
                    scalar.size()
                ),
            ))
        }
        _ => Ok(()),
    }
}

/// A kernel entry point with its positional argument bindings.
///
/// Bindings persist across launches until rebound.
pub struct KernelInvocation<'s> {
    kernel: Kernel,
    name: String,
    arity: cl_uint,
    signature: Option<KernelSignature>,
    bound: Vec<bool>,
    session_id: u64,
    _session: PhantomData<&'s Session>,
}

impl<'s> KernelInvocation<'s> {
    pub(crate) fn new(
        kernel: Kernel,
        name: String,
        arity: cl_uint,
        signature: Option<KernelSignature>,
        session_id: u64,
    ) -> Self {
        Self {
            kernel,
            name,
            arity,
            signature,
            bound: vec![false; arity as usize],
            session_id,
            _session: PhantomData,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn arity(&self) -> u32 {
        self.arity
    }

    pub fn signature(&self) -> Option<&KernelSignature> {
        self.signature.as_ref()
    }

    /// Binds `arg` at position `index`.
    pub fn bind(&mut self, index: u32, arg: &KernelArg) -> Result<()> {
        check_binding(
            index,
            self.arity,
            self.signature.as_ref(),
            self.session_id,
            arg,
        )?;

        // SAFETY: the value's size matches what the driver reads for it: a
        // `cl_mem` handle for buffers, the scalar's own width otherwise.
        let result = unsafe {
            match arg {
                KernelArg::Buffer { mem, .. } => self.kernel.set_arg(index, mem),
                KernelArg::Scalar(ScalarArg::U32(v)) => self.kernel.set_arg(index, v),
                KernelArg::Scalar(ScalarArg::I32(v)) => self.kernel.set_arg(index, v),
                KernelArg::Scalar(ScalarArg::F32(v)) => self.kernel.set_arg(index, v),
                KernelArg::Scalar(ScalarArg::U64(v)) => self.kernel.set_arg(index, v),
            }
        };

        match result {
            Ok(()) => {
                self.bound[index as usize] = true;
                Ok(())
            }
            Err(err)
                if matches!(
                    err.0,
                    CL_INVALID_ARG_SIZE
                        | CL_INVALID_ARG_VALUE
                        | CL_INVALID_ARG_INDEX
                        | CL_INVALID_MEM_OBJECT
                ) =>
            {
                Err(BenchError::ArgumentBinding {
                    index,
                    reason: format!("driver rejected {}-byte argument", arg.size()),
                    code: Some(err.0),
                })
            }
            Err(err) => Err(BenchError::driver("clSetKernelArg", err)),
        }
    }

    /// Binds `args` to positions `0..args.len()`.
    pub fn bind_arguments(&mut self, args: &[KernelArg]) -> Result<()> {
        for (index, arg) in args.iter().enumerate() {
            self.bind(index as u32, arg)?;
        }
        Ok(())
    }

    /// Fails if any parameter has never been bound.
    pub fn ensure_bound(&self) -> Result<()> {
        match self.bound.iter().position(|bound| !bound) {
            Some(index) => Err(binding_error(
                index as u32,
                format!("argument of '{}' was never bound", self.name),
            )),
            None => Ok(()),
        }
    }
}

// ---------------------------------------------------------------------------
// Launch geometry and dispatch
// ---------------------------------------------------------------------------

/// Smallest multiple of `local` that is `>= elements`.
pub fn round_up_global(elements: usize, local: usize) -> usize {
    elements.div_ceil(local) * local
}

/// 1-D launch shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LaunchGeometry {
    /// Logical element count handed to the kernel.
    pub elements: usize,
    pub global: usize,
    pub local: usize,
}

impl LaunchGeometry {
    /// `max_work_group_size` of 0 means the device limit is unknown.
    pub fn for_elements(elements: usize, local: usize, max_work_group_size: usize) -> Result<Self> {
        if elements == 0 {
            return Err(BenchError::InvalidLaunch {
                reason: "element count must be positive".to_string(),
            });
        }
        if local == 0 {
            return Err(BenchError::InvalidLaunch {
                reason: "work-group size must be positive".to_string(),
            });
        }
        if max_work_group_size > 0 && local > max_work_group_size {
            return Err(BenchError::InvalidLaunch {
                reason: format!(
                    "work-group size {local} exceeds device limit {max_work_group_size}"
                ),
            });
        }

        Ok(Self {
            elements,
            global: round_up_global(elements, local),
            local,
        })
    }
}

fn profiled_duration(event: &Event) -> Result<Duration> {
    let start = event
        .profiling_command_start()
        .or_driver("clGetEventProfilingInfo(CL_PROFILING_COMMAND_START)")?;
    let end = event
        .profiling_command_end()
        .or_driver("clGetEventProfilingInfo(CL_PROFILING_COMMAND_END)")?;
    Ok(Duration::from_nanos(end.saturating_sub(start)))
}

/// Enqueues exactly one launch and blocks until its completion event fires.
pub fn dispatch(
    session: &Session,
    kernel: &KernelInvocation<'_>,
    geometry: &LaunchGeometry,
) -> Result<LapSample> {
    if kernel.session_id != session.id() {
        return Err(BenchError::InvalidLaunch {
            reason: format!(
                "kernel '{}' belongs to session {}, dispatched on session {}",
                kernel.name,
                kernel.session_id,
                session.id()
            ),
        });
    }
    kernel.ensure_bound()?;

    let global = geometry.global;
    let local = geometry.local;
    let start = std::time::Instant::now();

    // SAFETY: every argument is bound and the size pointers outlive the call.
    let event = unsafe {
        session.queue().enqueue_nd_range_kernel(
            kernel.kernel.get(),
            1,
            ptr::null(),
            &global,
            &local,
            &[],
        )
    }
    .or_driver("clEnqueueNDRangeKernel")?;

    event.wait().or_driver("clWaitForEvents")?;
    let wall = start.elapsed();
    session.check_faults()?;

    let device = if session.profiling() {
        Some(profiled_duration(&event)?)
    } else {
        None
    };

    Ok(LapSample { wall, device })
}

/// Summary of a run of timed launches.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct KernelTiming {
    pub wall: LapSummary,
    pub device: Option<LapSummary>,
}

/// Fails unless at least one timed repetition is requested.
pub fn check_trials(trials: usize) -> Result<()> {
    if trials == 0 {
        return Err(BenchError::InvalidLaunch {
            reason: "at least one trial is required".to_string(),
        });
    }
    Ok(())
}

/// Running totals over launches since the last reset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct LaunchStats {
    pub launches: u64,
    /// Summed host wall time (milliseconds)
    pub wall_time_ms: f64,
    /// Summed device time from event profiling (milliseconds)
    pub device_time_ms: Option<f64>,
}

impl LaunchStats {
    pub fn record(&mut self, lap: &LapSample) {
        self.launches += 1;
        self.wall_time_ms += lap.wall.as_secs_f64() * 1000.0;
        if let Some(device) = lap.device {
            *self.device_time_ms.get_or_insert(0.0) += device.as_secs_f64() * 1000.0;
        }
    }
}

/// Drives repeated launches of one kernel and keeps launch statistics.
pub struct DispatchEngine<'a> {
    session: &'a Session,
    geometry: LaunchGeometry,
    stats: LaunchStats,
}

impl<'a> DispatchEngine<'a> {
    pub fn new(session: &'a Session, elements: usize, local_size: usize) -> Result<Self> {
        let geometry = LaunchGeometry::for_elements(
            elements,
            local_size,
            session.device().max_work_group_size,
        )?;
        debug!(
            "Launch geometry: {} elements, global {}, local {}",
            geometry.elements, geometry.global, geometry.local
        );

        Ok(Self {
            session,
            geometry,
            stats: LaunchStats::default(),
        })
    }

    pub fn geometry(&self) -> &LaunchGeometry {
        &self.geometry
    }

    /// One synchronous launch.
    pub fn launch(&mut self, kernel: &KernelInvocation<'_>) -> Result<LapSample> {
        let lap = dispatch(self.session, kernel, &self.geometry)?;
        self.stats.record(&lap);
        Ok(lap)
    }

    /// Untimed launches; statistics are reset afterwards.
    pub fn warmup(&mut self, kernel: &KernelInvocation<'_>, launches: usize) -> Result<()> {
        for _ in 0..launches {
            self.launch(kernel)?;
        }
        self.reset_stats();
        Ok(())
    }

    /// `trials` timed launches, one lap each. Zero trials is an [`BenchError::InvalidLaunch`].
    pub fn run_trials(&mut self, kernel: &KernelInvocation<'_>, trials: usize) -> Result<KernelTiming> {
        check_trials(trials)?;
        let mut timer = LapTimer::start();
        let mut device_timer = LapTimer::start();

        for _ in 0..trials {
            let lap = self.launch(kernel)?;
            timer.next_lap();
            if let Some(device) = lap.device {
                device_timer.record(device);
            }
        }

        let timing = KernelTiming {
            wall: timer.summary(),
            device: (!device_timer.is_empty()).then(|| device_timer.summary()),
        };
        info!(
            "Kernel '{}': {} launches, average {:.6}+-{:.6} s",
            kernel.name(),
            trials,
            timing.wall.mean_s,
            timing.wall.std_s
        );
        Ok(timing)
    }

    /// Totals since construction or the last reset.
    pub fn get_stats(&self) -> LaunchStats {
        self.stats
    }

    pub fn reset_stats(&mut self) {
        self.stats = LaunchStats::default();
    }
}

// ---------------------------------------------------------------------------
// Derived metrics
// ---------------------------------------------------------------------------

/// Bytes an element-wise binary op moves per launch: two reads and one write.
pub fn bytes_per_launch(elements: usize, element_size: usize) -> u64 {
    3 * elements as u64 * element_size as u64
}

/// Throughput figures derived from a mean lap time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Throughput {
    /// Billions of operations per second.
    pub gops: f64,
    /// Device-memory bandwidth in GiB/s.
    pub bandwidth_gib_s: f64,
}

pub fn kernel_throughput(elements: usize, element_size: usize, mean_s: f64) -> Throughput {
    if mean_s <= 0.0 {
        return Throughput {
            gops: 0.0,
            bandwidth_gib_s: 0.0,
        };
    }
    Throughput {
        gops: elements as f64 / mean_s / 1e9,
        bandwidth_gib_s: bytes_per_launch(elements, element_size) as f64 / mean_s / GIB,
    }
}

/// Transfer bandwidth in GiB/s.
pub fn transfer_bandwidth(bytes: u64, mean_s: f64) -> f64 {
    if mean_s <= 0.0 {
        return 0.0;
    }
    bytes as f64 / mean_s / GIB
}
