//! Locked, publish-on-success kernel builds.
//!
//! [`BuildCoordinator::ensure_built`] guarantees at most one live
//! compilation per fingerprint across every thread and process sharing an
//! artifact root:
//!
//! 1. derive the build location from the fingerprint and create it;
//! 2. take the location's exclusive lock before any build side effect;
//! 3. re-check for a published artifact, since a peer may have finished the
//!    build while this caller waited;
//! 4. clear leftovers of any failed or crashed build and compile;
//! 5. checksum the library, give it a content-specific name and publish
//!    the manifest.
//!
//! The lock guard is dropped on every exit path. Nothing is published
//! unless the compile succeeded, so a failed build can never be resolved.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use genred_common::ContentHash;
use genred_config::ProcessConfig;
use genred_formula::FormulaSpec;

use crate::compiler::{published_library_name, CompileRequest, Compiler};
use crate::error::{CacheError, CompileError};
use crate::fingerprint::{BackendId, Fingerprint};
use crate::location::BuildLocation;
use crate::manifest::{ArtifactManifest, PublishedArtifact, MANIFEST_FORMAT_VERSION};

/// Serializes and publishes kernel builds under one artifact root.
pub struct BuildCoordinator {
    config: Arc<ProcessConfig>,
    compiler: Arc<dyn Compiler>,
}

impl BuildCoordinator {
    /// Creates a coordinator building with `compiler` under
    /// `config.artifact_root`.
    pub fn new(config: Arc<ProcessConfig>, compiler: Arc<dyn Compiler>) -> Self {
        Self { config, compiler }
    }

    /// The configuration this coordinator was created with.
    pub fn config(&self) -> &ProcessConfig {
        &self.config
    }

    /// The build location of `fingerprint`.
    pub fn location(&self, fingerprint: &Fingerprint) -> BuildLocation {
        BuildLocation::new(&self.config.artifact_root, fingerprint)
    }

    /// Returns the published artifact for `fingerprint`, if one exists.
    ///
    /// A direct path check: no lock, no index, no compilation.
    pub fn published(&self, fingerprint: &Fingerprint) -> Option<PublishedArtifact> {
        PublishedArtifact::read(self.location(fingerprint).dir(), fingerprint)
    }

    /// Ensures a published artifact exists for `fingerprint`, building it
    /// if necessary.
    ///
    /// In Debug build mode the artifact is rebuilt even if one is already
    /// published.
    pub fn ensure_built(
        &self,
        spec: &FormulaSpec,
        backend: &BackendId,
        fingerprint: &Fingerprint,
    ) -> Result<PublishedArtifact, CompileError> {
        let force = self.config.build_mode.always_rebuild();
        self.build(spec, backend, fingerprint, force)
    }

    /// Rebuilds the artifact for `fingerprint` unconditionally.
    pub fn ensure_built_forced(
        &self,
        spec: &FormulaSpec,
        backend: &BackendId,
        fingerprint: &Fingerprint,
    ) -> Result<PublishedArtifact, CompileError> {
        self.build(spec, backend, fingerprint, true)
    }

    fn build(
        &self,
        spec: &FormulaSpec,
        backend: &BackendId,
        fingerprint: &Fingerprint,
        force: bool,
    ) -> Result<PublishedArtifact, CompileError> {
        let location = self.location(fingerprint);
        location.create()?;

        tracing::debug!(%fingerprint, "acquiring build lock");
        let _lock = location.lock(self.config.lock_timeout)?;

        if !force {
            if let Some(published) = PublishedArtifact::read(location.dir(), fingerprint) {
                tracing::debug!(%fingerprint, "artifact already published");
                return Ok(published);
            }
        }

        ArtifactManifest::remove(location.dir())?;
        let cleared = location.clear_outputs()?;
        if cleared > 0 && !force {
            tracing::warn!(
                %fingerprint,
                entries = cleared,
                "cleared outputs of an unfinished build"
            );
        }

        if self.config.verbose {
            tracing::info!(%fingerprint, formula = %spec, "compiling kernel");
        } else {
            tracing::debug!(%fingerprint, formula = %spec, "compiling kernel");
        }
        let started = Instant::now();

        let request = CompileRequest {
            spec,
            backend,
            fingerprint,
            build_dir: location.dir(),
        };
        let library = self
            .compiler
            .compile(&request)
            .map_err(|failure| CompileError::Failed {
                spec: Box::new(spec.clone()),
                fingerprint: fingerprint.clone(),
                location: location.dir().to_path_buf(),
                status: failure.status,
                diagnostics: failure.diagnostics,
            })?;

        let checksum = checksum_file(&library)?;
        let published_library = location
            .dir()
            .join(published_library_name(fingerprint, &checksum));
        if library != published_library {
            std::fs::rename(&library, &published_library)
                .map_err(|e| CacheError::io(&library, e))?;
        }

        let manifest = ArtifactManifest {
            format_version: MANIFEST_FORMAT_VERSION,
            genred_version: env!("CARGO_PKG_VERSION").to_string(),
            fingerprint: fingerprint.clone(),
            backend: backend.clone(),
            checksum,
            library: relative_to(&published_library, location.dir()),
            formula: spec.reduction_formula(),
            aliases: spec.alias_signature(),
            precision: spec.precision(),
        };
        manifest.save(location.dir())?;

        if self.config.verbose {
            tracing::info!(%fingerprint, elapsed = ?started.elapsed(), "kernel published");
        } else {
            tracing::debug!(%fingerprint, elapsed = ?started.elapsed(), "kernel published");
        }

        Ok(PublishedArtifact {
            location: location.dir().to_path_buf(),
            manifest,
        })
    }

    /// Lists every published artifact under the artifact root.
    pub fn list(&self) -> Result<Vec<PublishedArtifact>, CacheError> {
        let mut published: Vec<PublishedArtifact> = self
            .fingerprints()?
            .iter()
            .filter_map(|fp| self.published(fp))
            .collect();
        published.sort_by(|a, b| a.fingerprint().cmp(b.fingerprint()));
        Ok(published)
    }

    /// Unpublishes `fingerprint` and deletes its build outputs, under the
    /// build lock. Returns `true` if anything was removed.
    pub fn remove(&self, fingerprint: &Fingerprint) -> Result<bool, CompileError> {
        let location = self.location(fingerprint);
        if !location.dir().is_dir() {
            return Ok(false);
        }
        let _lock = location.lock(self.config.lock_timeout)?;
        ArtifactManifest::remove(location.dir())?;
        let removed = location.clear_outputs()?;
        tracing::debug!(%fingerprint, entries = removed, "removed build outputs");
        Ok(removed > 0)
    }

    /// Removes every build location's outputs. Returns how many locations
    /// had something to remove.
    pub fn clean(&self) -> Result<usize, CompileError> {
        let mut cleaned = 0;
        for fp in self.fingerprints()? {
            if self.remove(&fp)? {
                cleaned += 1;
            }
        }
        Ok(cleaned)
    }

    fn fingerprints(&self) -> Result<Vec<Fingerprint>, CacheError> {
        let root = &self.config.artifact_root;
        let entries = match std::fs::read_dir(root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(CacheError::io(root, e)),
        };
        let mut fingerprints = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| CacheError::io(root, e))?;
            if !entry.path().is_dir() {
                continue;
            }
            if let Some(fp) = entry
                .file_name()
                .to_str()
                .and_then(Fingerprint::from_dir_name)
            {
                fingerprints.push(fp);
            }
        }
        Ok(fingerprints)
    }
}

fn checksum_file(path: &Path) -> Result<ContentHash, CacheError> {
    let file = File::open(path).map_err(|e| CacheError::io(path, e))?;
    ContentHash::from_reader(file).map_err(|e| CacheError::io(path, e))
}

fn relative_to(path: &Path, dir: &Path) -> PathBuf {
    path.strip_prefix(dir)
        .map(Path::to_path_buf)
        .unwrap_or_else(|_| path.to_path_buf())
}
