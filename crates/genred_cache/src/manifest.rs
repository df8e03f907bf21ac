//! The publish manifest that makes a build location resolvable.
//!
//! After a successful compile the coordinator writes `artifact.json` into
//! the build location, atomically (temporary file, then rename). A location
//! without a readable, compatible manifest is treated as not built, whatever
//! else it contains.

use std::path::{Path, PathBuf};

use genred_common::ContentHash;
use genred_formula::Precision;
use serde::{Deserialize, Serialize};

use crate::error::CacheError;
use crate::fingerprint::{BackendId, Fingerprint};

/// Name of the manifest file within a build location.
pub const MANIFEST_FILE: &str = "artifact.json";

const MANIFEST_TMP: &str = "artifact.json.tmp";

/// Current manifest format version. Increment on breaking changes.
pub const MANIFEST_FORMAT_VERSION: u32 = 1;

/// Record of one successful build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactManifest {
    /// Manifest format version.
    pub format_version: u32,

    /// genred version that produced the artifact.
    pub genred_version: String,

    /// Fingerprint of the built kernel; must match the directory name.
    pub fingerprint: Fingerprint,

    /// Target backend.
    pub backend: BackendId,

    /// Kernel library, relative to the build location when it lies inside it.
    pub library: PathBuf,

    /// Content hash of the library file at publish time.
    pub checksum: ContentHash,

    /// The wrapped reduction formula, for operators inspecting the cache.
    pub formula: String,

    /// Canonical alias list.
    pub aliases: String,

    /// Precision the kernel was built for.
    pub precision: Precision,
}

impl ArtifactManifest {
    /// Loads the manifest from a build location, returning `None` if it is
    /// missing or unparseable.
    pub fn load(dir: &Path) -> Option<Self> {
        let content = std::fs::read_to_string(dir.join(MANIFEST_FILE)).ok()?;
        serde_json::from_str(&content).ok()
    }

    /// Writes the manifest atomically into `dir`.
    pub fn save(&self, dir: &Path) -> Result<(), CacheError> {
        let json = serde_json::to_string_pretty(self).map_err(|e| CacheError::Serialization {
            reason: e.to_string(),
        })?;
        let tmp = dir.join(MANIFEST_TMP);
        std::fs::write(&tmp, json).map_err(|e| CacheError::io(&tmp, e))?;
        let path = dir.join(MANIFEST_FILE);
        std::fs::rename(&tmp, &path).map_err(|e| CacheError::io(&path, e))
    }

    /// Deletes the manifest from `dir`, unpublishing the location.
    pub fn remove(dir: &Path) -> Result<(), CacheError> {
        let path = dir.join(MANIFEST_FILE);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CacheError::io(path, e)),
        }
    }

    /// Returns `true` if this manifest was written by a compatible version
    /// for the given fingerprint.
    pub fn is_compatible(&self, fingerprint: &Fingerprint) -> bool {
        self.format_version == MANIFEST_FORMAT_VERSION && &self.fingerprint == fingerprint
    }

    /// Absolute path of the kernel library.
    pub fn library_path(&self, dir: &Path) -> PathBuf {
        if self.library.is_absolute() {
            self.library.clone()
        } else {
            dir.join(&self.library)
        }
    }
}

/// A build location whose manifest has been published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedArtifact {
    /// The build location directory.
    pub location: PathBuf,
    /// Its manifest.
    pub manifest: ArtifactManifest,
}

impl PublishedArtifact {
    /// Reads the published artifact at `dir`, if any.
    ///
    /// Requires a compatible manifest for `fingerprint` and an existing
    /// library file. Integrity of the library is checked at load time.
    pub fn read(dir: &Path, fingerprint: &Fingerprint) -> Option<Self> {
        let manifest = ArtifactManifest::load(dir)?;
        if !manifest.is_compatible(fingerprint) || !manifest.library_path(dir).is_file() {
            return None;
        }
        Some(Self {
            location: dir.to_path_buf(),
            manifest,
        })
    }

    /// The fingerprint of the artifact.
    pub fn fingerprint(&self) -> &Fingerprint {
        &self.manifest.fingerprint
    }

    /// Absolute path of the kernel library.
    pub fn library_path(&self) -> PathBuf {
        self.manifest.library_path(&self.location)
    }
}
