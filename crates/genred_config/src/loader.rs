//! Resolution of [`ProcessConfig`] from the environment and `genred.toml`.
//!
//! Precedence, highest first: environment variables, the `[genred]` table of
//! a configuration file, built-in defaults (quiet, Release, a versioned
//! folder under the user cache directory).

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;
use crate::types::{BuildMode, CompilerCommand, ConfigFile, ProcessConfig, Settings};

/// Conventional configuration file name.
pub const CONFIG_FILE: &str = "genred.toml";

const ENV_VERBOSE: &str = "GENRED_VERBOSE";
const ENV_BUILD_TYPE: &str = "GENRED_BUILD_TYPE";
const ENV_BIN_FOLDER: &str = "GENRED_BIN_FOLDER";
const ENV_GPU_AVAILABLE: &str = "GENRED_GPU_AVAILABLE";
const ENV_LOCK_TIMEOUT: &str = "GENRED_LOCK_TIMEOUT_SECS";
const ENV_COMPILER: &str = "GENRED_COMPILER";

/// Resolves the configuration from process environment variables only.
pub fn from_env() -> Result<ProcessConfig, ConfigError> {
    from_lookup(|key| std::env::var(key).ok())
}

/// Resolves the configuration from an arbitrary variable lookup.
///
/// Useful for testing without touching the real process environment.
pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<ProcessConfig, ConfigError> {
    resolve(Settings::default(), &lookup)
}

/// Loads `path` as a `genred.toml` file and applies environment overrides.
pub fn load_config(path: &Path) -> Result<ProcessConfig, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let settings = parse_settings(&content)?;
    resolve(settings, &|key: &str| std::env::var(key).ok())
}

/// Parses a `genred.toml` document without consulting the environment.
pub fn load_config_from_str(content: &str) -> Result<ProcessConfig, ConfigError> {
    let settings = parse_settings(content)?;
    resolve(settings, &|_: &str| None)
}

fn parse_settings(content: &str) -> Result<Settings, ConfigError> {
    let file: ConfigFile =
        toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
    Ok(file.genred)
}

fn resolve(
    settings: Settings,
    lookup: &dyn Fn(&str) -> Option<String>,
) -> Result<ProcessConfig, ConfigError> {
    let verbose = match lookup(ENV_VERBOSE) {
        Some(value) => parse_flag(ENV_VERBOSE, &value)?,
        None => settings.verbose.unwrap_or(false),
    };

    let build_mode = match lookup(ENV_BUILD_TYPE).or(settings.build_type) {
        Some(value) => value.parse::<BuildMode>().map_err(|_| {
            ConfigError::invalid(ENV_BUILD_TYPE, &value, "expected Release or Debug")
        })?,
        None => BuildMode::Release,
    };

    let artifact_root = match lookup(ENV_BIN_FOLDER) {
        Some(value) if !value.trim().is_empty() => PathBuf::from(value),
        _ => settings
            .bin_folder
            .unwrap_or_else(|| default_artifact_root(lookup)),
    };

    let gpu_available = match lookup(ENV_GPU_AVAILABLE) {
        Some(value) => parse_flag(ENV_GPU_AVAILABLE, &value)?,
        None => settings.gpu_available.unwrap_or(false),
    };

    let lock_timeout_secs = match lookup(ENV_LOCK_TIMEOUT) {
        Some(value) => Some(value.trim().parse::<u64>().map_err(|_| {
            ConfigError::invalid(ENV_LOCK_TIMEOUT, &value, "expected a whole number of seconds")
        })?),
        None => settings.lock_timeout_secs,
    };
    let lock_timeout = lock_timeout_secs
        .filter(|&secs| secs > 0)
        .map(Duration::from_secs);

    let compiler = match lookup(ENV_COMPILER) {
        Some(line) => Some(CompilerCommand::parse(&line).ok_or_else(|| {
            ConfigError::invalid(ENV_COMPILER, &line, "expected a command line")
        })?),
        None => match settings.compiler {
            Some(words) => {
                let mut words = words.into_iter();
                let program = words.next().ok_or_else(|| {
                    ConfigError::invalid("compiler", "[]", "expected at least a program name")
                })?;
                Some(CompilerCommand {
                    program,
                    args: words.collect(),
                })
            }
            None => None,
        },
    };

    Ok(ProcessConfig {
        verbose,
        build_mode,
        artifact_root,
        gpu_available,
        lock_timeout,
        compiler,
    })
}

fn parse_flag(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(ConfigError::invalid(key, value, "expected 0 or 1")),
    }
}

/// Versioned so that artifacts from an incompatible release are never reused.
fn default_artifact_root(lookup: &dyn Fn(&str) -> Option<String>) -> PathBuf {
    let base = lookup("XDG_CACHE_HOME")
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .or_else(|| {
            lookup("HOME")
                .filter(|v| !v.is_empty())
                .map(|home| Path::new(&home).join(".cache"))
        })
        .unwrap_or_else(std::env::temp_dir);
    base.join(format!("genred-{}", env!("CARGO_PKG_VERSION")))
}
