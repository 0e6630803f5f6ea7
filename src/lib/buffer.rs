//! # Device Buffers
//!
//! Fixed-size device allocations with the kernel's access intent declared at
//! creation. A buffer borrows the [`Session`] it was created in and is always
//! released before it.

use std::ffi::c_void;
use std::marker::PhantomData;
use std::mem;
use std::ptr;
use std::time::{Duration, Instant};

use opencl3::memory::{Buffer, CL_MEM_COPY_HOST_PTR, CL_MEM_READ_ONLY, CL_MEM_WRITE_ONLY};
use opencl3::types::{cl_mem_flags, CL_BLOCKING};
use serde::Serialize;
use tracing::debug;

use crate::error::{BenchError, ClResultExt, Result};
use crate::session::Session;

const CL_INVALID_BUFFER_SIZE: i32 = -61;

/// How kernels may access a buffer. Fixed for the buffer's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum AccessIntent {
    ReadOnly,
    WriteOnly,
}

impl AccessIntent {
    pub fn mem_flags(self) -> cl_mem_flags {
        match self {
            AccessIntent::ReadOnly => CL_MEM_READ_ONLY,
            AccessIntent::WriteOnly => CL_MEM_WRITE_ONLY,
        }
    }
}

/// What binding checks need to know about a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferDesc {
    pub intent: AccessIntent,
    pub session_id: u64,
    pub bytes: usize,
}

/// Size in bytes of `len` elements of `T`.
///
/// Zero-length and overflowing sizes are rejected the way the driver would
/// (`CL_INVALID_BUFFER_SIZE`), without calling it.
pub fn byte_size<T>(len: usize) -> Result<usize> {
    match len.checked_mul(mem::size_of::<T>()) {
        Some(0) => Err(BenchError::Allocation {
            bytes: 0,
            code: CL_INVALID_BUFFER_SIZE,
        }),
        Some(bytes) => Ok(bytes),
        None => Err(BenchError::Allocation {
            bytes: usize::MAX,
            code: CL_INVALID_BUFFER_SIZE,
        }),
    }
}

/// A device-resident array of `len` elements of `T`.
pub struct DeviceBuffer<'s, T> {
    buffer: Buffer<T>,
    len: usize,
    intent: AccessIntent,
    session_id: u64,
    _session: PhantomData<&'s Session>,
}

impl<'s, T: Copy> DeviceBuffer<'s, T> {
    /// Allocates `len` elements. With `init`, the host data is copied as part
    /// of the allocation call itself (`CL_MEM_COPY_HOST_PTR`), no separate enqueue.
    pub fn allocate(
        session: &'s Session,
        len: usize,
        intent: AccessIntent,
        init: Option<&[T]>,
    ) -> Result<Self> {
        let bytes = byte_size::<T>(len)?;

        let (flags, host_ptr) = match init {
            Some(data) => {
                if data.len() != len {
                    return Err(BenchError::LengthMismatch {
                        expected: len,
                        actual: data.len(),
                    });
                }
                (
                    intent.mem_flags() | CL_MEM_COPY_HOST_PTR,
                    data.as_ptr() as *mut c_void,
                )
            }
            None => (intent.mem_flags(), ptr::null_mut()),
        };

        // SAFETY: with COPY_HOST_PTR the driver only reads `len` elements from
        // `host_ptr`, which `data` covers; otherwise `host_ptr` is null.
        let buffer = unsafe { Buffer::<T>::create(session.context(), flags, len, host_ptr) }
            .map_err(|e| BenchError::Allocation { bytes, code: e.0 })?;

        debug!(
            "Allocated {:?} buffer: {} bytes (initialized: {})",
            intent,
            bytes,
            init.is_some()
        );

        Ok(Self {
            buffer,
            len,
            intent,
            session_id: session.id(),
            _session: PhantomData,
        })
    }

    /// Blocking host-to-device copy of the whole buffer. Returns the wall time taken.
    pub fn write(&mut self, session: &Session, data: &[T]) -> Result<Duration> {
        self.ensure_session(session)?;
        if data.len() != self.len {
            return Err(BenchError::LengthMismatch {
                expected: self.len,
                actual: data.len(),
            });
        }

        let start = Instant::now();
        // SAFETY: blocking write; `data` stays borrowed until the call returns.
        unsafe {
            session
                .queue()
                .enqueue_write_buffer(&mut self.buffer, CL_BLOCKING, 0, data, &[])
                .or_driver("clEnqueueWriteBuffer")?;
        }
        let elapsed = start.elapsed();
        session.check_faults()?;
        Ok(elapsed)
    }

    pub(crate) fn ensure_session(&self, session: &Session) -> Result<()> {
        if self.session_id != session.id() {
            return Err(BenchError::InvalidLaunch {
                reason: format!(
                    "buffer belongs to session {}, used with session {}",
                    self.session_id,
                    session.id()
                ),
            });
        }
        Ok(())
    }
}

impl<'s, T> DeviceBuffer<'s, T> {
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn intent(&self) -> AccessIntent {
        self.intent
    }

    pub fn size_bytes(&self) -> usize {
        self.len * mem::size_of::<T>()
    }

    pub fn desc(&self) -> BufferDesc {
        BufferDesc {
            intent: self.intent,
            session_id: self.session_id,
            bytes: self.size_bytes(),
        }
    }

    pub(crate) fn raw(&self) -> &Buffer<T> {
        &self.buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_byte_size_is_count_times_width() {
        assert_eq!(byte_size::<f32>(1_000_000).unwrap(), 4_000_000);
        assert_eq!(byte_size::<u8>(3).unwrap(), 3);
        assert_eq!(byte_size::<f64>(2).unwrap(), 16);
    }

    #[test]
    fn test_zero_size_rejected() {
        let err = byte_size::<f32>(0).unwrap_err();
        assert!(matches!(err, BenchError::Allocation { bytes: 0, code: -61 }));
        assert_eq!(err.code(), Some(-61));
    }

    #[test]
    fn test_overflowing_size_rejected() {
        let err = byte_size::<f32>(usize::MAX).unwrap_err();
        assert!(matches!(err, BenchError::Allocation { code: -61, .. }));
    }

    #[test]
    fn test_intent_flags_are_exclusive() {
        assert_eq!(AccessIntent::ReadOnly.mem_flags(), CL_MEM_READ_ONLY);
        assert_eq!(AccessIntent::WriteOnly.mem_flags(), CL_MEM_WRITE_ONLY);
        assert_eq!(
            AccessIntent::ReadOnly.mem_flags() & AccessIntent::WriteOnly.mem_flags(),
            0
        );
    }
}
