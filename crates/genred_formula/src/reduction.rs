//! Reduction operators and the axis they reduce along.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::alias::Category;
use crate::error::FormulaError;

/// A reduction operator applied over one axis of the formula.
///
/// `K`-parameterized operators carry their parameter inline so that a spec
/// can never hold a `KMin` without its `K`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReductionOp {
    /// Sum of the formula values.
    Sum,
    /// Maximum value.
    Max,
    /// Minimum value.
    Min,
    /// Index of the maximum.
    ArgMax,
    /// Index of the minimum.
    ArgMin,
    /// Maximum value and its index.
    MaxArgMax,
    /// Minimum value and its index.
    MinArgMin,
    /// The `K` smallest values.
    KMin(u32),
    /// Indices of the `K` smallest values.
    ArgKMin(u32),
    /// The `K` smallest values and their indices.
    KMinArgKMin(u32),
    /// `log(sum(exp(f)))`, computed by the kernel as a `(max, residual sum)`
    /// pair per row.
    LogSumExp,
}

impl ReductionOp {
    /// Resolves an operator by name. Parameterized operators require
    /// `parameter`; the others reject it.
    pub fn from_name(name: &str, parameter: Option<u32>) -> Result<Self, FormulaError> {
        let parameterized: Option<fn(u32) -> ReductionOp> = match name {
            "KMin" => Some(ReductionOp::KMin),
            "ArgKMin" => Some(ReductionOp::ArgKMin),
            "KMinArgKMin" => Some(ReductionOp::KMinArgKMin),
            _ => None,
        };
        if let Some(make) = parameterized {
            return match parameter {
                Some(k) => Ok(make(k)),
                None => Err(FormulaError::MissingParameter(name.to_string())),
            };
        }

        let op = match name {
            "Sum" => ReductionOp::Sum,
            "Max" => ReductionOp::Max,
            "Min" => ReductionOp::Min,
            "ArgMax" => ReductionOp::ArgMax,
            "ArgMin" => ReductionOp::ArgMin,
            "MaxArgMax" => ReductionOp::MaxArgMax,
            "MinArgMin" => ReductionOp::MinArgMin,
            "LogSumExp" => ReductionOp::LogSumExp,
            _ => return Err(FormulaError::UnknownReduction(name.to_string())),
        };
        if parameter.is_some() {
            return Err(FormulaError::UnexpectedParameter(name.to_string()));
        }
        Ok(op)
    }

    /// The operator's name as written by callers.
    pub fn name(self) -> &'static str {
        match self {
            ReductionOp::Sum => "Sum",
            ReductionOp::Max => "Max",
            ReductionOp::Min => "Min",
            ReductionOp::ArgMax => "ArgMax",
            ReductionOp::ArgMin => "ArgMin",
            ReductionOp::MaxArgMax => "MaxArgMax",
            ReductionOp::MinArgMin => "MinArgMin",
            ReductionOp::KMin(_) => "KMin",
            ReductionOp::ArgKMin(_) => "ArgKMin",
            ReductionOp::KMinArgKMin(_) => "KMinArgKMin",
            ReductionOp::LogSumExp => "LogSumExp",
        }
    }

    /// The operator's parameter, if it takes one.
    pub fn parameter(self) -> Option<u32> {
        match self {
            ReductionOp::KMin(k) | ReductionOp::ArgKMin(k) | ReductionOp::KMinArgKMin(k) => {
                Some(k)
            }
            _ => None,
        }
    }

    /// Whether the raw kernel output must be recombined from
    /// `(reference, residual)` pairs.
    pub fn is_log_sum_exp(self) -> bool {
        self == ReductionOp::LogSumExp
    }
}

impl fmt::Display for ReductionOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.parameter() {
            Some(k) => write!(f, "{}({k})", self.name()),
            None => f.write_str(self.name()),
        }
    }
}

/// Which index the reduction output is indexed by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Axis {
    /// Reduce over `j`; one output row per `i` (axis 0).
    #[default]
    I,
    /// Reduce over `i`; one output row per `j` (axis 1).
    J,
}

impl Axis {
    /// Converts a numeric axis (0 or 1).
    pub fn from_index(axis: usize) -> Result<Self, FormulaError> {
        match axis {
            0 => Ok(Axis::I),
            1 => Ok(Axis::J),
            other => Err(FormulaError::InvalidAxis(other)),
        }
    }

    /// The alias category whose extent gives the number of output rows.
    pub fn output_category(self) -> Category {
        match self {
            Axis::I => Category::I,
            Axis::J => Category::J,
        }
    }

    /// The category tag used inside the wrapped reduction formula.
    pub fn category_tag(self) -> u8 {
        match self {
            Axis::I => 0,
            Axis::J => 1,
        }
    }
}
