//! Error types for loading and calling kernels.

use std::path::PathBuf;

use genred_cache::{CacheError, CompileError, Fingerprint};
use genred_common::ContentHash;
use genred_config::ConfigError;
use genred_formula::{FormulaError, Precision};

/// A published artifact that exists on disk but cannot be bound.
///
/// Never retried: reloading a corrupt library cannot fix it. Recover with a
/// forced rebuild ([`Runtime::rebuild`](crate::Runtime::rebuild)).
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    /// The library file named by the manifest could not be read.
    #[error("cannot read kernel library {}: {source}", path.display())]
    Io {
        /// The library path.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// The library no longer matches the checksum recorded at publish time.
    #[error("kernel library {} for {fingerprint} is corrupt: expected checksum {expected}, found {found}", path.display())]
    Corrupt {
        /// Fingerprint of the artifact.
        fingerprint: Fingerprint,
        /// The library path.
        path: PathBuf,
        /// Checksum recorded in the manifest.
        expected: ContentHash,
        /// Checksum of the file on disk.
        found: ContentHash,
    },

    /// The dynamic loader rejected the library.
    #[error("cannot open kernel library {}: {reason}", path.display())]
    Open {
        /// The library path.
        path: PathBuf,
        /// Reason reported by the platform loader.
        reason: String,
    },

    /// A required entry point is missing from the library.
    #[error("kernel library {} does not export '{symbol}': {reason}", path.display())]
    MissingSymbol {
        /// The library path.
        path: PathBuf,
        /// The missing symbol.
        symbol: &'static str,
        /// Reason reported by the platform loader.
        reason: String,
    },

    /// The library was built against a different kernel interface.
    #[error("kernel {fingerprint} is incompatible: {reason}")]
    AbiMismatch {
        /// Fingerprint of the artifact.
        fingerprint: Fingerprint,
        /// What did not match.
        reason: String,
    },
}

/// A call rejected before reaching the native kernel, or a kernel that
/// reported failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    /// The number of arrays does not match the number of aliases.
    #[error("expected {expected} arrays, got {found}")]
    ArgumentCount {
        /// Number of aliases in the formula.
        expected: usize,
        /// Number of arrays supplied.
        found: usize,
    },

    /// An array has the wrong number of dimensions.
    #[error("argument '{alias}' has shape {shape:?}, expected {expected}")]
    Rank {
        /// Alias the array is bound to.
        alias: String,
        /// Description of the expected shape.
        expected: String,
        /// Shape supplied.
        shape: Vec<usize>,
    },

    /// An array's inner dimension does not match its alias.
    #[error("argument '{alias}' has dimension {found}, expected {expected}")]
    Dimension {
        /// Alias the array is bound to.
        alias: String,
        /// Dimension declared by the alias.
        expected: usize,
        /// Dimension supplied.
        found: usize,
    },

    /// An array's data length disagrees with its shape.
    #[error("argument '{alias}' holds {found} values but its shape needs {expected}")]
    DataLength {
        /// Alias the array is bound to.
        alias: String,
        /// Product of the shape.
        expected: usize,
        /// Number of values supplied.
        found: usize,
    },

    /// An array's shape describes more values than fit in memory.
    #[error("argument '{alias}' has shape {shape:?}, whose size overflows")]
    ShapeOverflow {
        /// Alias the array is bound to.
        alias: String,
        /// Shape supplied.
        shape: Vec<usize>,
    },

    /// The output buffer would be larger than addressable memory.
    #[error("output of {rows} rows of {dimout} values overflows")]
    OutputOverflow {
        /// Number of output rows.
        rows: usize,
        /// Scalars per kernel output row.
        dimout: usize,
    },

    /// Arrays indexed by the same axis disagree on its extent.
    #[error("argument '{alias}' has {found} rows along axis {axis}, but earlier arguments have {expected}")]
    Extent {
        /// Alias the array is bound to.
        alias: String,
        /// `i` or `j`.
        axis: char,
        /// Extent established by earlier arrays.
        expected: usize,
        /// Extent of this array.
        found: usize,
    },

    /// The scalar type of the call does not match the compiled precision.
    #[error("kernel was compiled for {expected}, called with {found} data")]
    Precision {
        /// Precision of the formula.
        expected: Precision,
        /// Precision of the supplied arrays.
        found: Precision,
    },

    /// The backend name is not recognized.
    #[error("unknown backend '{0}'")]
    UnknownBackend(String),

    /// Some arrays live in host memory and others on a device.
    #[error("arguments mix host and device memory")]
    MixedStorage,

    /// Arrays live on different devices, or on another device than requested.
    #[error("device mismatch: expected device {expected}, found device {found}")]
    DeviceConflict {
        /// The requested or first-seen device.
        expected: u32,
        /// The conflicting device.
        found: u32,
    },

    /// A host-only backend was requested for device arrays.
    #[error("backend {backend} cannot read device memory")]
    DeviceMemoryOnHostBackend {
        /// The requested backend.
        backend: String,
    },

    /// An explicit memory location contradicts where the arrays live.
    #[error("backend {backend} expects {expected} memory, arguments are in {found} memory")]
    MemoryLocation {
        /// The requested backend.
        backend: String,
        /// Memory location named by the backend.
        expected: String,
        /// Memory location of the arguments.
        found: String,
    },

    /// A GPU backend was requested but no GPU is available.
    #[error("backend {0} requires a GPU, but none is available")]
    GpuUnavailable(String),

    /// The ranges structure is inconsistent or out of bounds.
    #[error("invalid ranges: {0}")]
    InvalidRanges(String),

    /// The loaded kernel does not compute what the formula describes.
    #[error("kernel does not match the formula: {0}")]
    KernelMismatch(String),

    /// The kernel returned a non-zero status.
    #[error("kernel {fingerprint} failed with status {status}")]
    Kernel {
        /// Fingerprint of the kernel.
        fingerprint: Fingerprint,
        /// Status returned by the kernel.
        status: i32,
    },
}

/// Any error surfaced by the [`Runtime`](crate::Runtime) facade.
#[derive(Debug, thiserror::Error)]
pub enum GenredError {
    /// Malformed formula, alias, reduction or precision.
    #[error(transparent)]
    Formula(#[from] FormulaError),

    /// Malformed configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Cache directory or manifest failure.
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// The kernel could not be built.
    #[error(transparent)]
    Compile(#[from] CompileError),

    /// The kernel could not be loaded.
    #[error(transparent)]
    Load(#[from] LoadError),

    /// The call was rejected or the kernel failed.
    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    /// No kernel generator command is configured.
    #[error("no kernel generator configured; set GENRED_COMPILER or `compiler` in genred.toml")]
    NoCompiler,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn corrupt_display() {
        let err = LoadError::Corrupt {
            fingerprint: Fingerprint::from_raw("genred_cpu_float32_ab"),
            path: PathBuf::from("/cache/lib.so"),
            expected: ContentHash::from_bytes(b"a"),
            found: ContentHash::from_bytes(b"b"),
        };
        let msg = err.to_string();
        assert!(msg.contains("/cache/lib.so"));
        assert!(msg.contains("genred_cpu_float32_ab"));
        assert!(msg.contains("corrupt"));
    }

    #[test]
    fn abi_mismatch_display() {
        let err = LoadError::AbiMismatch {
            fingerprint: Fingerprint::from_raw("fp"),
            reason: "ABI version 7, expected 1".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "kernel fp is incompatible: ABI version 7, expected 1"
        );
    }

    #[test]
    fn extent_display() {
        let err = DispatchError::Extent {
            alias: "y".to_string(),
            axis: 'j',
            expected: 50,
            found: 49,
        };
        assert_eq!(
            err.to_string(),
            "argument 'y' has 49 rows along axis j, but earlier arguments have 50"
        );
    }

    #[test]
    fn shape_overflow_display() {
        let err = DispatchError::ShapeOverflow {
            alias: "y".to_string(),
            shape: vec![1 << 62, 4],
        };
        assert_eq!(
            err.to_string(),
            "argument 'y' has shape [4611686018427387904, 4], whose size overflows"
        );
    }

    #[test]
    fn precision_display() {
        let err = DispatchError::Precision {
            expected: Precision::Float64,
            found: Precision::Float32,
        };
        assert_eq!(
            err.to_string(),
            "kernel was compiled for float64, called with float32 data"
        );
    }

    #[test]
    fn genred_error_is_transparent() {
        let err: GenredError = DispatchError::UnknownBackend("TPU".to_string()).into();
        assert_eq!(err.to_string(), "unknown backend 'TPU'");
        let err: GenredError = FormulaError::EmptyFormula.into();
        assert_eq!(err.to_string(), FormulaError::EmptyFormula.to_string());
    }
}
