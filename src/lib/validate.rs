//! # Result Transfer and Validation
//!
//! Blocking device-to-host read-back, timed with the same trimmed statistics
//! as kernel launches, and exact element-wise comparison against the host
//! reference.
//!
//! The comparison uses `!=` on `f32` on purpose: the host reference performs
//! the identical single-precision operation under the same rounding mode, so
//! any difference is a kernel or transfer defect.

use std::time::Instant;

use opencl3::types::CL_BLOCKING;
use serde::Serialize;
use tracing::debug;

use crate::buffer::DeviceBuffer;
use crate::dispatch::check_trials;
use crate::error::{BenchError, ClResultExt, Result};
use crate::session::Session;
use crate::timing::{LapSample, LapSummary, LapTimer};
use crate::workload::BinaryOp;

/// Copies the whole of `buffer` into `dest`, blocking until the copy is done.
pub fn read_back<T: Copy>(
    session: &Session,
    buffer: &DeviceBuffer<'_, T>,
    dest: &mut [T],
) -> Result<LapSample> {
    buffer.ensure_session(session)?;
    if dest.len() != buffer.len() {
        return Err(BenchError::LengthMismatch {
            expected: buffer.len(),
            actual: dest.len(),
        });
    }

    let start = Instant::now();
    // SAFETY: blocking read into a slice of exactly the buffer's length.
    unsafe {
        session
            .queue()
            .enqueue_read_buffer(buffer.raw(), CL_BLOCKING, 0, dest, &[])
            .or_driver("clEnqueueReadBuffer")?;
    }
    let wall = start.elapsed();
    session.check_faults()?;

    Ok(LapSample { wall, device: None })
}

/// Repeats [`read_back`] `trials` times, one lap per copy. At least one trial is required.
pub fn read_back_trials<T: Copy>(
    session: &Session,
    buffer: &DeviceBuffer<'_, T>,
    dest: &mut [T],
    trials: usize,
) -> Result<LapSummary> {
    check_trials(trials)?;
    let mut timer = LapTimer::start();
    for _ in 0..trials {
        read_back(session, buffer, dest)?;
        timer.next_lap();
    }

    let summary = timer.summary();
    debug!(
        "Read-back of {} bytes: {} trials, mean {:.6} s",
        buffer.size_bytes(),
        trials,
        summary.mean_s
    );
    Ok(summary)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ValidationOutcome {
    /// Elements compared, all equal.
    pub compared: usize,
}

fn compare<I>(expected_len: usize, actual_len: usize, pairs: I) -> Result<ValidationOutcome>
where
    I: Iterator<Item = (f32, f32)>,
{
    if expected_len != actual_len {
        return Err(BenchError::LengthMismatch {
            expected: expected_len,
            actual: actual_len,
        });
    }

    for (index, (expected, actual)) in pairs.enumerate() {
        if actual != expected {
            return Err(BenchError::ResultMismatch {
                index,
                expected,
                actual,
            });
        }
    }

    Ok(ValidationOutcome {
        compared: actual_len,
    })
}

/// Exact comparison of `result` against a precomputed `reference`.
pub fn validate(result: &[f32], reference: &[f32]) -> Result<ValidationOutcome> {
    compare(
        reference.len(),
        result.len(),
        reference.iter().copied().zip(result.iter().copied()),
    )
}

/// Like [`validate`], computing the reference on the fly instead of materializing it.
pub fn validate_op(result: &[f32], a: &[f32], b: &[f32], op: BinaryOp) -> Result<ValidationOutcome> {
    if a.len() != b.len() {
        return Err(BenchError::LengthMismatch {
            expected: a.len(),
            actual: b.len(),
        });
    }
    compare(
        a.len(),
        result.len(),
        a.iter()
            .zip(b)
            .map(|(&x, &y)| op.apply(x, y))
            .zip(result.iter().copied()),
    )
}
