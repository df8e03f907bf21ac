//! Error types for cache and build operations.

use std::path::PathBuf;
use std::time::Duration;

use genred_formula::FormulaSpec;

use crate::fingerprint::Fingerprint;

/// Errors that can occur while reading or writing the artifact cache.
///
/// Lookups are fail-safe: a missing or unreadable manifest is a cache miss,
/// not an error. This enum covers writes and directory management.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// An I/O error occurred while reading or writing cache files.
    #[error("cache I/O error at {path}: {source}")]
    Io {
        /// The path that caused the error.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// A serialization or deserialization error occurred.
    #[error("serialization error: {reason}")]
    Serialization {
        /// Description of the serialization failure.
        reason: String,
    },

    /// A backend identifier contains characters that are not allowed in a
    /// fingerprint.
    #[error("invalid backend id '{0}': expected lowercase letters, digits or '_'")]
    InvalidBackend(String),
}

impl CacheError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Errors surfaced by [`BuildCoordinator::ensure_built`](crate::BuildCoordinator::ensure_built).
///
/// None of these are retried automatically. A failed compile leaves the
/// location unpublished; its generated sources stay on disk for inspection.
#[derive(Debug, thiserror::Error)]
pub enum CompileError {
    /// The external generator or toolchain rejected the formula.
    #[error("failed to compile {spec} ({fingerprint}) in {}: {diagnostics}", location.display())]
    Failed {
        /// The formula that failed to build.
        spec: Box<FormulaSpec>,
        /// Its fingerprint.
        fingerprint: Fingerprint,
        /// Build location holding the generator's output.
        location: PathBuf,
        /// Exit status of the toolchain, when it ran to completion.
        status: Option<i32>,
        /// Captured toolchain output.
        diagnostics: String,
    },

    /// The build lock could not be acquired because of an I/O failure.
    #[error("failed to lock build location {}: {source}", location.display())]
    Lock {
        /// The build location.
        location: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// A peer held the build lock for longer than the configured timeout.
    #[error("timed out after {waited:?} waiting for the build lock on {}", location.display())]
    LockTimeout {
        /// The build location.
        location: PathBuf,
        /// How long this process waited.
        waited: Duration,
    },

    /// Preparing or publishing the build location failed.
    #[error(transparent)]
    Cache(#[from] CacheError),
}
