//! Shared foundational types used across the genred workspace.
//!
//! Currently this is the content hash that backs kernel fingerprints and
//! artifact integrity checks.

#![warn(missing_docs)]

pub mod hash;

pub use hash::ContentHash;
