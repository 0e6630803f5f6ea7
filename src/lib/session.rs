//! # Execution Session
//!
//! A [`Session`] owns exactly one OpenCL context and one in-order command
//! queue bound to the selected device. Buffers, programs and kernels created
//! against a session borrow it, so the compiler guarantees they are released
//! before it; the session itself releases the queue and then the context.
//!
//! ## Fault notification
//!
//! The driver may report context-level faults (for example running out of
//! resources mid-kernel) from one of its own threads. The callback never
//! unwinds into the driver: it logs the fault and posts it on a channel. The
//! control thread drains that channel at every synchronization point
//! ([`Session::check_faults`]) and turns a posted fault into
//! [`BenchError::ContextFault`].
//!
//! ```text
//!   driver thread                          control thread
//! +----------------+    mpsc channel    +-------------------+
//! | notify callback| --ContextFault-->  | check_faults()    |
//! +----------------+                    | after every wait  |
//!                                       +-------------------+
//! ```

use std::ffi::{c_char, c_void, CStr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::sync::Mutex;

use opencl3::command_queue::{CommandQueue, CL_QUEUE_PROFILING_ENABLE};
use opencl3::context::Context;
use opencl3::types::cl_command_queue_properties;
use tracing::{debug, error, info};

use crate::device::ComputeDevice;
use crate::error::{BenchError, ClResultExt, Result};

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// A fault the driver reported against the context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextFault {
    pub message: String,
    /// Size of the vendor-specific binary blob that came with the report.
    pub private_info_len: usize,
}

/// Driver-side end of the fault channel. Its address is the callback's user data.
pub struct FaultSink {
    tx: Mutex<Sender<ContextFault>>,
}

impl FaultSink {
    fn post(&self, fault: ContextFault) {
        if let Ok(tx) = self.tx.lock() {
            // The receiver only disappears while the session is being torn down.
            let _ = tx.send(fault);
        }
    }
}

/// Control-thread end of the fault channel.
pub struct FaultMonitor {
    rx: Receiver<ContextFault>,
}

impl FaultMonitor {
    /// Returns the first pending fault as an error, if any.
    pub fn check(&self) -> Result<()> {
        match self.rx.try_recv() {
            Ok(fault) => Err(BenchError::ContextFault {
                message: fault.message,
            }),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => Ok(()),
        }
    }
}

/// Creates a connected sink/monitor pair. The sink is boxed so its address is stable.
pub fn fault_channel() -> (Box<FaultSink>, FaultMonitor) {
    let (tx, rx) = mpsc::channel();
    (
        Box::new(FaultSink { tx: Mutex::new(tx) }),
        FaultMonitor { rx },
    )
}

/// Context error callback handed to `clCreateContext`.
///
/// `user_data` is either null or points at the session's [`FaultSink`].
pub extern "C" fn notify_context_fault(
    errinfo: *const c_char,
    _private_info: *const c_void,
    cb: usize,
    user_data: *mut c_void,
) {
    let message = if errinfo.is_null() {
        "unspecified context error".to_string()
    } else {
        // SAFETY: the driver passes a NUL-terminated string valid for this call.
        unsafe { CStr::from_ptr(errinfo) }
            .to_string_lossy()
            .into_owned()
    };

    error!("[SESSION:FAULT] {} (private info: {} bytes)", message, cb);

    if user_data.is_null() {
        return;
    }

    // SAFETY: the sink is owned by the session and outlives its context.
    let sink = unsafe { &*(user_data as *const FaultSink) };
    sink.post(ContextFault {
        message,
        private_info_len: cb,
    });
}

/// Options fixed at session creation.
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionOptions {
    /// Record device-side start/end timestamps on every event.
    pub profiling: bool,
}

/// Queue properties for a session. Out-of-order execution is never requested,
/// so commands complete in submission order.
pub fn queue_properties(options: SessionOptions) -> cl_command_queue_properties {
    if options.profiling {
        CL_QUEUE_PROFILING_ENABLE
    } else {
        0
    }
}

/// One context plus one in-order queue on one device.
pub struct Session {
    // Field order is release order: queue, then context, then the fault sink
    // the context's callback points at.
    queue: CommandQueue,
    context: Context,
    faults: FaultMonitor,
    _sink: Box<FaultSink>,
    device: ComputeDevice,
    options: SessionOptions,
    id: u64,
}

impl Session {
    /// Creates the context (with fault callback) and the in-order queue.
    pub fn create(device: &ComputeDevice, options: SessionOptions) -> Result<Self> {
        if device.is_null() {
            return Err(BenchError::ContextCreation {
                reason: "no device selected".to_string(),
                code: None,
            });
        }

        let (sink, faults) = fault_channel();
        let user_data = &*sink as *const FaultSink as *mut c_void;

        let context = Context::from_devices(&[device.id], &[], Some(notify_context_fault), user_data)
            .map_err(|e| BenchError::ContextCreation {
                reason: format!("clCreateContext on '{}'", device.name),
                code: Some(e.0),
            })?;

        // OpenCL 1.2 entry point: some platforms never shipped 2.0.
        #[allow(deprecated)]
        let queue = CommandQueue::create_default(&context, queue_properties(options))
            .map_err(|e| BenchError::ContextCreation {
                reason: "clCreateCommandQueue".to_string(),
                code: Some(e.0),
            })?;

        let id = NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed);
        info!(
            "Created session {} on {} (profiling: {})",
            id, device.name, options.profiling
        );

        Ok(Self {
            queue,
            context,
            faults,
            _sink: sink,
            device: device.clone(),
            options,
            id,
        })
    }

    /// Process-unique identity; objects created in this session carry it.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn device(&self) -> &ComputeDevice {
        &self.device
    }

    pub fn profiling(&self) -> bool {
        self.options.profiling
    }

    pub(crate) fn context(&self) -> &Context {
        &self.context
    }

    pub(crate) fn queue(&self) -> &CommandQueue {
        &self.queue
    }

    /// Surfaces any fault the driver reported since the last check.
    pub fn check_faults(&self) -> Result<()> {
        self.faults.check()
    }

    /// Blocks until every submitted command has completed.
    pub fn finish(&self) -> Result<()> {
        self.queue.finish().or_driver("clFinish")?;
        self.check_faults()
    }

    /// Drains the queue and releases the session.
    ///
    /// Consumes the session, so it can only happen once. Sessions dropped on
    /// an error path release the same way, without the final drain.
    pub fn release(self) -> Result<()> {
        self.finish()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        debug!("Releasing session {} (queue, then context)", self.id);
    }
}
