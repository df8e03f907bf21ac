//! Persistent, process-safe cache of compiled reduction kernels.
//!
//! Each kernel is identified by a [`Fingerprint`] of its [`FormulaSpec`] and
//! target backend and lives in its own build location
//! `<artifact_root>/<fingerprint>/`. The [`BuildCoordinator`] serializes
//! builds of one fingerprint across threads and processes with an advisory
//! file lock and publishes a location only once its build has succeeded.
//!
//! [`FormulaSpec`]: genred_formula::FormulaSpec

#![warn(missing_docs)]

pub mod compiler;
pub mod coordinator;
pub mod error;
pub mod fingerprint;
pub mod location;
pub mod manifest;

pub use compiler::{
    library_file_name, published_library_name, CommandCompiler, CompileFailure, CompileRequest, Compiler};
pub use coordinator::BuildCoordinator;
pub use error::{CacheError, CompileError};
pub use fingerprint::{fingerprint, BackendId, Fingerprint};
pub use location::{BuildLocation, BuildLock};
pub use manifest::{ArtifactManifest, PublishedArtifact, MANIFEST_FORMAT_VERSION};
