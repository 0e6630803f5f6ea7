//! # Host Workload
//!
//! Input generation and the host reference operation for the element-wise
//! benchmark.
//!
//! Inputs are uniform floats in `[0, 1)` from a generator seeded with the
//! element count, so a given `n` always yields the same arrays and a
//! mismatch can be reproduced.

use std::fmt;
use std::str::FromStr;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;

use crate::error::{BenchError, Result};

/// Element-wise operation computed by the kernel and by the host reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BinaryOp {
    #[default]
    Add,
    Sub,
    Mul,
}

impl BinaryOp {
    /// Kernel entry point in the shipped source.
    pub fn entry_point(self) -> &'static str {
        match self {
            BinaryOp::Add => "aplusb",
            BinaryOp::Sub => "aminusb",
            BinaryOp::Mul => "amulb",
        }
    }

    /// Single-precision result for one element pair.
    #[inline]
    pub fn apply(self, a: f32, b: f32) -> f32 {
        match self {
            BinaryOp::Add => a + b,
            BinaryOp::Sub => a - b,
            BinaryOp::Mul => a * b,
        }
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BinaryOp::Add => "add",
            BinaryOp::Sub => "sub",
            BinaryOp::Mul => "mul",
        };
        f.write_str(name)
    }
}

impl FromStr for BinaryOp {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "add" | "aplusb" => Ok(BinaryOp::Add),
            "sub" | "aminusb" => Ok(BinaryOp::Sub),
            "mul" | "amulb" => Ok(BinaryOp::Mul),
            other => Err(format!("unknown operation '{other}' (expected add, sub or mul)")),
        }
    }
}

/// Two input arrays of `n` floats each.
pub fn generate_inputs(n: usize) -> (Vec<f32>, Vec<f32>) {
    let mut rng = StdRng::seed_from_u64(n as u64);
    let a = (0..n).map(|_| rng.gen::<f32>()).collect();
    let b = (0..n).map(|_| rng.gen::<f32>()).collect();
    (a, b)
}

/// Host reference: `op` applied element-wise.
pub fn reference(a: &[f32], b: &[f32], op: BinaryOp) -> Result<Vec<f32>> {
    if a.len() != b.len() {
        return Err(BenchError::LengthMismatch {
            expected: a.len(),
            actual: b.len(),
        });
    }
    Ok(a.iter().zip(b).map(|(&x, &y)| op.apply(x, y)).collect())
}
