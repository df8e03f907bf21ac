//! Process-wide map from fingerprint to loaded kernel.
//!
//! [`ArtifactRegistry::resolve`] answers "is this kernel already loadable?"
//! with a map lookup, then a direct path check for a published artifact
//! under the artifact root. It never builds. In Debug build mode it always
//! answers "no", routing every request to the build coordinator.

use std::collections::HashMap;
use std::sync::Arc;

use genred_cache::{BuildLocation, Fingerprint, PublishedArtifact};
use genred_config::ProcessConfig;
use parking_lot::Mutex;

use crate::error::LoadError;
use crate::loader::{ArtifactHandle, Loader};

/// Loaded kernels of this process.
pub struct ArtifactRegistry {
    config: Arc<ProcessConfig>,
    loader: Arc<dyn Loader>,
    loaded: Mutex<HashMap<Fingerprint, ArtifactHandle>>,
    // Held while binding a fingerprint, so each is bound at most once.
    binding: Mutex<HashMap<Fingerprint, Arc<Mutex<()>>>>,
}

impl ArtifactRegistry {
    /// Creates an empty registry.
    pub fn new(config: Arc<ProcessConfig>, loader: Arc<dyn Loader>) -> Self {
        Self {
            config,
            loader,
            loaded: Mutex::new(HashMap::new()),
            binding: Mutex::new(HashMap::new()),
        }
    }

    /// Returns a handle for `fingerprint` if one is loaded or loadable
    /// without building.
    ///
    /// Always `Ok(None)` in Debug build mode. A published artifact that
    /// fails to load is an error, not a miss.
    pub fn resolve(&self, fingerprint: &Fingerprint) -> Result<Option<ArtifactHandle>, LoadError> {
        if self.config.build_mode.always_rebuild() {
            return Ok(None);
        }
        if let Some(handle) = self.get(fingerprint) {
            return Ok(Some(handle));
        }
        let location = BuildLocation::new(&self.config.artifact_root, fingerprint);
        match PublishedArtifact::read(location.dir(), fingerprint) {
            Some(published) => {
                tracing::debug!(%fingerprint, "loading published kernel");
                self.install(&published).map(Some)
            }
            None => Ok(None),
        }
    }

    /// Loads a freshly published artifact and registers it.
    ///
    /// Binding is serialized per fingerprint. In Release mode a handle
    /// already registered for the fingerprint wins, so concurrent callers
    /// share one binding and one handle. In Debug mode the new build
    /// replaces it.
    pub fn install(&self, published: &PublishedArtifact) -> Result<ArtifactHandle, LoadError> {
        let fingerprint = published.fingerprint();
        let slot = Arc::clone(self.binding.lock().entry(fingerprint.clone()).or_default());
        let _binding = slot.lock();
        if !self.config.build_mode.always_rebuild() {
            if let Some(handle) = self.get(fingerprint) {
                return Ok(handle);
            }
        }
        let handle = self.loader.load(published)?;
        Ok(self.insert(handle))
    }

    /// Registers `handle`, returning the handle now registered for its
    /// fingerprint.
    pub fn insert(&self, handle: ArtifactHandle) -> ArtifactHandle {
        let mut loaded = self.loaded.lock();
        if self.config.build_mode.always_rebuild() {
            loaded.insert(handle.fingerprint().clone(), Arc::clone(&handle));
            return handle;
        }
        Arc::clone(
            loaded
                .entry(handle.fingerprint().clone())
                .or_insert(handle),
        )
    }

    /// The registered handle for `fingerprint`, ignoring the build mode.
    pub fn get(&self, fingerprint: &Fingerprint) -> Option<ArtifactHandle> {
        self.loaded.lock().get(fingerprint).cloned()
    }

    /// Returns `true` if a handle is registered for `fingerprint`.
    pub fn contains(&self, fingerprint: &Fingerprint) -> bool {
        self.loaded.lock().contains_key(fingerprint)
    }

    /// Unregisters `fingerprint`. Outstanding handles stay valid.
    pub fn remove(&self, fingerprint: &Fingerprint) -> Option<ArtifactHandle> {
        self.loaded.lock().remove(fingerprint)
    }

    /// Number of registered handles.
    pub fn len(&self) -> usize {
        self.loaded.lock().len()
    }

    /// Returns `true` if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.loaded.lock().is_empty()
    }

    /// Unregisters everything.
    pub fn clear(&self) {
        self.loaded.lock().clear();
        self.binding.lock().clear();
    }
}
