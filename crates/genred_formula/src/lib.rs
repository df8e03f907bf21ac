//! Symbolic reduction formulas: the unit of compilation.
//!
//! A [`FormulaSpec`] bundles the formula text, its reduction operator and
//! output axis, the alias bindings that name its input arrays, the numeric
//! precision, and optional build flags. Construction validates and
//! canonicalizes every part so that two semantically identical specs compare
//! equal and serialize identically.

#![warn(missing_docs)]

pub mod alias;
pub mod error;
pub mod precision;
pub mod reduction;
pub mod spec;

pub use alias::{parse_aliases, Alias, Category};
pub use error::FormulaError;
pub use precision::Precision;
pub use reduction::{Axis, ReductionOp};
pub use spec::FormulaSpec;
