//! Numeric precision of a compiled kernel.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::FormulaError;

/// Floating-point precision a kernel is compiled for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Precision {
    /// IEEE-754 single precision.
    Float32,
    /// IEEE-754 double precision.
    Float64,
}

impl Precision {
    /// Canonical name, used in fingerprints and on the command line.
    pub fn name(self) -> &'static str {
        match self {
            Precision::Float32 => "float32",
            Precision::Float64 => "float64",
        }
    }

    /// Size of one scalar in bytes.
    pub fn size_of(self) -> usize {
        match self {
            Precision::Float32 => 4,
            Precision::Float64 => 8,
        }
    }

    /// Numeric code shared with the kernel ABI.
    pub fn code(self) -> u32 {
        match self {
            Precision::Float32 => 0,
            Precision::Float64 => 1,
        }
    }

    /// Inverse of [`Precision::code`].
    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            0 => Some(Precision::Float32),
            1 => Some(Precision::Float64),
            _ => None,
        }
    }
}

impl FromStr for Precision {
    type Err = FormulaError;

    /// Accepts the spellings callers commonly use for the same type.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "float32" | "float" | "f32" | "single" => Ok(Precision::Float32),
            "float64" | "double" | "f64" => Ok(Precision::Float64),
            _ => Err(FormulaError::UnknownPrecision(s.to_string())),
        }
    }
}

impl fmt::Display for Precision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
