//! Loading and dispatching compiled reduction kernels.
//!
//! [`Runtime`] ties the pieces together: it fingerprints a
//! [`FormulaSpec`](genred_formula::FormulaSpec), resolves the fingerprint
//! through the [`ArtifactRegistry`], falls back to the
//! [`BuildCoordinator`](genred_cache::BuildCoordinator) when nothing is
//! loadable, and hands out [`Genred`] reductions whose calls go through the
//! [`ReductionDispatcher`].

#![warn(missing_docs)]

pub mod backend;
pub mod dispatch;
pub mod error;
pub mod genred;
pub mod kernel;
pub mod loader;
pub mod ranges;
pub mod registry;

pub use backend::{BackendPreference, BackendTag, ComputeTarget, GpuGrid, MemoryLocation, Storage};
pub use dispatch::{Array, CallOptions, ReductionDispatcher, ReductionOutput, Scalar};
pub use error::{DispatchError, GenredError, LoadError};
pub use genred::{Genred, Runtime};
pub use kernel::{ArgPointer, Kernel, KernelInfo, LaunchParams, OutPointer, ABI_VERSION};
pub use loader::{ArtifactHandle, LoadedArtifact, Loader, NativeLoader};
pub use ranges::{Ranges, RangesArg};
pub use registry::ArtifactRegistry;
