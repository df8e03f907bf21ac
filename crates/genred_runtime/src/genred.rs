//! The runtime facade: formula in, callable reduction out.

use std::sync::Arc;

use genred_cache::{fingerprint, BackendId, BuildCoordinator, CommandCompiler, Compiler, Fingerprint};
use genred_config::ProcessConfig;
use genred_formula::FormulaSpec;

use crate::dispatch::{Array, CallOptions, ReductionDispatcher, ReductionOutput, Scalar};
use crate::error::{DispatchError, GenredError};
use crate::loader::{ArtifactHandle, Loader, NativeLoader};
use crate::registry::ArtifactRegistry;

/// Builds, caches, loads and serves reduction kernels for one process.
pub struct Runtime {
    config: Arc<ProcessConfig>,
    backend: BackendId,
    coordinator: BuildCoordinator,
    registry: ArtifactRegistry,
}

impl Runtime {
    /// Creates a runtime targeting the CPU backend.
    pub fn new(
        config: Arc<ProcessConfig>,
        compiler: Arc<dyn Compiler>,
        loader: Arc<dyn Loader>,
    ) -> Self {
        Self {
            coordinator: BuildCoordinator::new(Arc::clone(&config), compiler),
            registry: ArtifactRegistry::new(Arc::clone(&config), loader),
            backend: BackendId::cpu(),
            config,
        }
    }

    /// Creates a runtime that builds with the configured generator command
    /// and loads native libraries.
    pub fn native(config: Arc<ProcessConfig>) -> Result<Self, GenredError> {
        let compiler = CommandCompiler::from_config(&config).ok_or(GenredError::NoCompiler)?;
        Ok(Self::new(config, Arc::new(compiler), Arc::new(NativeLoader)))
    }

    /// Targets `backend` instead of the CPU.
    pub fn with_backend(mut self, backend: BackendId) -> Self {
        self.backend = backend;
        self
    }

    /// The process configuration.
    pub fn config(&self) -> &ProcessConfig {
        &self.config
    }

    /// The target backend.
    pub fn backend(&self) -> &BackendId {
        &self.backend
    }

    /// The build coordinator.
    pub fn coordinator(&self) -> &BuildCoordinator {
        &self.coordinator
    }

    /// The registry of loaded kernels.
    pub fn registry(&self) -> &ArtifactRegistry {
        &self.registry
    }

    /// The fingerprint of `spec` on this runtime's backend.
    pub fn fingerprint(&self, spec: &FormulaSpec) -> Fingerprint {
        fingerprint(spec, &self.backend)
    }

    /// Returns a loaded kernel for `spec`, building it if necessary.
    pub fn load(&self, spec: &FormulaSpec) -> Result<ArtifactHandle, GenredError> {
        let fp = self.fingerprint(spec);
        if let Some(handle) = self.registry.resolve(&fp)? {
            tracing::debug!(fingerprint = %fp, "kernel resolved");
            return Ok(handle);
        }
        let published = self.coordinator.ensure_built(spec, &self.backend, &fp)?;
        Ok(self.registry.install(&published)?)
    }

    /// Rebuilds and reloads the kernel for `spec` unconditionally.
    ///
    /// The recovery path for a [`LoadError`](crate::LoadError). Handles
    /// obtained before the rebuild keep the old kernel.
    pub fn rebuild(&self, spec: &FormulaSpec) -> Result<ArtifactHandle, GenredError> {
        let fp = self.fingerprint(spec);
        self.registry.remove(&fp);
        let published = self
            .coordinator
            .ensure_built_forced(spec, &self.backend, &fp)?;
        Ok(self.registry.install(&published)?)
    }

    /// Prepares a callable reduction for `spec`.
    pub fn genred(&self, spec: FormulaSpec) -> Result<Genred, GenredError> {
        let handle = self.load(&spec)?;
        Ok(Genred {
            dispatcher: ReductionDispatcher::new(
                Arc::new(spec),
                handle,
                self.config.gpu_available,
            ),
        })
    }
}

/// A compiled, loaded reduction, callable any number of times.
#[derive(Debug, Clone)]
pub struct Genred {
    dispatcher: ReductionDispatcher,
}

impl Genred {
    /// The formula.
    pub fn spec(&self) -> &FormulaSpec {
        self.dispatcher.spec()
    }

    /// The fingerprint of the loaded kernel.
    pub fn fingerprint(&self) -> &Fingerprint {
        self.dispatcher.handle().fingerprint()
    }

    /// The loaded kernel.
    pub fn handle(&self) -> &ArtifactHandle {
        self.dispatcher.handle()
    }

    /// Runs the reduction on `arrays`, bound to the aliases in position order.
    pub fn call<T: Scalar>(
        &self,
        arrays: &[Array<'_, T>],
        options: &CallOptions<'_>,
    ) -> Result<ReductionOutput<T>, DispatchError> {
        self.dispatcher.call(arrays, options)
    }
}
