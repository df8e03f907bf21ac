//! Configuration types.

use serde::Deserialize;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;

/// Build policy for the artifact cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BuildMode {
    /// Reuse published artifacts; build each fingerprint at most once.
    #[default]
    Release,
    /// Rebuild on every resolution, even when a cached artifact exists.
    Debug,
}

impl BuildMode {
    /// Returns `true` when every resolution must go through a fresh build.
    pub fn always_rebuild(self) -> bool {
        self == BuildMode::Debug
    }
}

impl FromStr for BuildMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "release" => Ok(BuildMode::Release),
            "debug" => Ok(BuildMode::Debug),
            _ => Err(ConfigError::invalid(
                "build_type",
                s,
                "expected Release or Debug",
            )),
        }
    }
}

impl fmt::Display for BuildMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildMode::Release => f.write_str("Release"),
            BuildMode::Debug => f.write_str("Debug"),
        }
    }
}

/// External generator/toolchain command invoked to build a kernel.
///
/// `program` is run with `args` first, followed by the per-build flags
/// appended by the compiler driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompilerCommand {
    /// Executable name or path.
    pub program: String,
    /// Fixed leading arguments.
    pub args: Vec<String>,
}

impl CompilerCommand {
    /// Splits a whitespace-separated command line into program and arguments.
    pub fn parse(line: &str) -> Option<Self> {
        let mut words = line.split_whitespace().map(str::to_string);
        let program = words.next()?;
        Some(Self {
            program,
            args: words.collect(),
        })
    }
}

/// Immutable process-wide configuration.
///
/// Built once at startup and shared (typically as `Arc<ProcessConfig>`).
/// No component mutates it after construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessConfig {
    /// Log compiler invocations and their output at info level.
    pub verbose: bool,
    /// Cache reuse policy.
    pub build_mode: BuildMode,
    /// Root directory holding one build location per fingerprint.
    pub artifact_root: PathBuf,
    /// Whether a GPU may be targeted when arrays live in host memory.
    pub gpu_available: bool,
    /// Upper bound on waiting for a peer's build lock. `None` waits forever.
    pub lock_timeout: Option<Duration>,
    /// Generator command used by the default compiler driver.
    pub compiler: Option<CompilerCommand>,
}

impl ProcessConfig {
    /// Creates a quiet Release-mode configuration rooted at `artifact_root`.
    pub fn new(artifact_root: impl Into<PathBuf>) -> Self {
        Self {
            verbose: false,
            build_mode: BuildMode::Release,
            artifact_root: artifact_root.into(),
            gpu_available: false,
            lock_timeout: None,
            compiler: None,
        }
    }

    /// Returns a copy with the given build mode.
    pub fn with_build_mode(mut self, build_mode: BuildMode) -> Self {
        self.build_mode = build_mode;
        self
    }

    /// Returns a copy with the given verbosity.
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Returns a copy with the given lock timeout.
    pub fn with_lock_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Returns a copy that may target a GPU for host-resident arrays.
    pub fn with_gpu_available(mut self, gpu_available: bool) -> Self {
        self.gpu_available = gpu_available;
        self
    }
}

/// Settings as written in the `[genred]` table of `genred.toml`.
///
/// Every field is optional; unset fields fall back to environment values
/// and then to built-in defaults.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    /// See [`ProcessConfig::verbose`].
    #[serde(default)]
    pub verbose: Option<bool>,
    /// `"Release"` or `"Debug"`.
    #[serde(default)]
    pub build_type: Option<String>,
    /// See [`ProcessConfig::artifact_root`].
    #[serde(default)]
    pub bin_folder: Option<PathBuf>,
    /// See [`ProcessConfig::gpu_available`].
    #[serde(default)]
    pub gpu_available: Option<bool>,
    /// Lock timeout in whole seconds. `0` means wait forever.
    #[serde(default)]
    pub lock_timeout_secs: Option<u64>,
    /// Generator command as a list: program followed by arguments.
    #[serde(default)]
    pub compiler: Option<Vec<String>>,
}

/// Top-level shape of `genred.toml`.
#[derive(Debug, Default, Deserialize)]
pub struct ConfigFile {
    /// The `[genred]` table.
    #[serde(default)]
    pub genred: Settings,
}
