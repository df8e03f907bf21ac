//! Binding published artifacts into the process.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use genred_cache::{ArtifactManifest, Fingerprint, PublishedArtifact};
use genred_common::ContentHash;

use crate::error::LoadError;
use crate::kernel::{Kernel, KernelInfo, NativeKernel, ABI_VERSION};

/// Shared handle to a loaded kernel.
pub type ArtifactHandle = Arc<LoadedArtifact>;

/// A kernel bound into the process, with the artifact it came from.
pub struct LoadedArtifact {
    fingerprint: Fingerprint,
    location: PathBuf,
    kernel: Box<dyn Kernel>,
}

impl LoadedArtifact {
    /// Wraps a bound kernel.
    pub fn new(fingerprint: Fingerprint, location: PathBuf, kernel: Box<dyn Kernel>) -> Self {
        Self {
            fingerprint,
            location,
            kernel,
        }
    }

    /// Fingerprint of the artifact.
    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    /// Build location the artifact was loaded from.
    pub fn location(&self) -> &Path {
        &self.location
    }

    /// The kernel's metadata.
    pub fn info(&self) -> &KernelInfo {
        self.kernel.info()
    }

    /// The kernel.
    pub fn kernel(&self) -> &dyn Kernel {
        self.kernel.as_ref()
    }
}

impl std::fmt::Debug for LoadedArtifact {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedArtifact")
            .field("fingerprint", &self.fingerprint)
            .field("location", &self.location)
            .field("info", self.kernel.info())
            .finish()
    }
}

/// Binds a published artifact into a callable handle.
///
/// Loaders do not cache; idempotence per fingerprint is the
/// [`ArtifactRegistry`](crate::ArtifactRegistry)'s job.
pub trait Loader: Send + Sync {
    /// Loads the artifact.
    fn load(&self, artifact: &PublishedArtifact) -> Result<ArtifactHandle, LoadError>;
}

/// Loads native kernel libraries with [`libloading`].
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeLoader;

impl Loader for NativeLoader {
    fn load(&self, artifact: &PublishedArtifact) -> Result<ArtifactHandle, LoadError> {
        let path = artifact.library_path();
        verify_checksum(&artifact.manifest, &path)?;

        // SAFETY: the library was produced by the kernel generator for this
        // fingerprint and its checksum matches the one recorded at publish time.
        let kernel = unsafe { NativeKernel::open(&path)? };
        check_metadata(&artifact.manifest, kernel.info())?;

        tracing::debug!(fingerprint = %artifact.fingerprint(), path = %path.display(), "kernel loaded");
        Ok(Arc::new(LoadedArtifact::new(
            artifact.fingerprint().clone(),
            artifact.location.clone(),
            Box::new(kernel),
        )))
    }
}

/// Checks that the library at `path` is the one the manifest describes.
pub fn verify_checksum(manifest: &ArtifactManifest, path: &Path) -> Result<(), LoadError> {
    let io = |source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    };
    let file = File::open(path).map_err(io)?;
    let found = ContentHash::from_reader(file).map_err(io)?;
    if found != manifest.checksum {
        return Err(LoadError::Corrupt {
            fingerprint: manifest.fingerprint.clone(),
            path: path.to_path_buf(),
            expected: manifest.checksum,
            found,
        });
    }
    Ok(())
}

/// Checks a kernel's self-reported metadata against its manifest.
pub fn check_metadata(manifest: &ArtifactManifest, info: &KernelInfo) -> Result<(), LoadError> {
    let mismatch = |reason: String| {
        Err(LoadError::AbiMismatch {
            fingerprint: manifest.fingerprint.clone(),
            reason,
        })
    };
    if info.abi_version != ABI_VERSION {
        return mismatch(format!(
            "ABI version {}, expected {ABI_VERSION}",
            info.abi_version
        ));
    }
    if info.precision != manifest.precision {
        return mismatch(format!(
            "compiled for {}, expected {}",
            info.precision, manifest.precision
        ));
    }
    if let Some(formula) = &info.formula {
        if formula != &manifest.formula {
            return mismatch(format!(
                "computes '{formula}', expected '{}'",
                manifest.formula
            ));
        }
    }
    Ok(())
}
