//! The kernel interface and its native C ABI.
//!
//! A compiled kernel library exports two C symbols:
//!
//! ```c
//! genred_metadata_t genred_metadata(void);
//! int32_t genred_launch(const genred_launch_t *call,
//!                       const void *const *args, size_t nargs,
//!                       void *out, size_t out_len);
//! ```
//!
//! `args` holds one pointer per alias, in position order; `out` is a host
//! buffer with room for `out_len` scalars of the kernel's precision. A zero
//! return means success.

use std::ffi::{c_char, c_void, CStr};
use std::path::Path;

use genred_formula::{Axis, Precision};
use libloading::Library;

use crate::backend::BackendTag;
use crate::error::LoadError;
use crate::ranges::RangesArg;

/// Version of the kernel ABI this crate speaks.
pub const ABI_VERSION: u32 = 1;

/// Name of the metadata entry point.
pub const METADATA_SYMBOL: &str = "genred_metadata";

/// Name of the launch entry point.
pub const LAUNCH_SYMBOL: &str = "genred_launch";

/// Metadata record returned by `genred_metadata`.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RawMetadata {
    /// ABI version the kernel was generated for.
    pub abi_version: u32,
    /// 0 for float32, 1 for float64.
    pub precision: u32,
    /// Number of scalars per output row.
    pub dimout: u32,
    /// 0 if output rows follow `i`, 1 if they follow `j`.
    pub tag_ij: u32,
    /// The compiled reduction formula, NUL-terminated; may be null.
    pub formula: *const c_char,
}

/// One flattened index array.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RawSlice {
    /// First element; null when `len` is 0.
    pub ptr: *const i64,
    /// Number of elements.
    pub len: usize,
}

/// Ranges as passed to `genred_launch`. `count` is 0 when unrestricted,
/// 6 otherwise.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RawRanges {
    /// Number of valid entries in `arrays`.
    pub count: u32,
    /// `ranges_i`, `slices_i`, `redranges_j`, `ranges_j`, `slices_j`, `redranges_i`.
    pub arrays: [RawSlice; 6],
}

/// Call record passed to `genred_launch`.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RawLaunch {
    /// Extent of the `i` axis.
    pub nx: i64,
    /// Extent of the `j` axis.
    pub ny: i64,
    /// 0 for CPU, 1 for GPU.
    pub tag_cpu_gpu: i32,
    /// 0 for the 1D scheme, 1 for 2D.
    pub tag_1d_2d: i32,
    /// 0 for host memory, 1 for device memory.
    pub tag_host_device: i32,
    /// Target device, or -1.
    pub device_id: i32,
    /// Sparse restriction.
    pub ranges: RawRanges,
}

type MetadataFn = unsafe extern "C" fn() -> RawMetadata;
type LaunchFn = unsafe extern "C" fn(
    call: *const RawLaunch,
    args: *const *const c_void,
    nargs: usize,
    out: *mut c_void,
    out_len: usize,
) -> i32;

/// What a loaded kernel reports about itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelInfo {
    /// ABI version.
    pub abi_version: u32,
    /// Scalar precision.
    pub precision: Precision,
    /// Number of scalars per output row.
    pub dimout: usize,
    /// Axis whose extent gives the number of output rows.
    pub output_axis: Axis,
    /// The compiled reduction formula, if the kernel reports it.
    pub formula: Option<String>,
}

/// Parameters of one kernel launch.
#[derive(Debug, Clone, Copy)]
pub struct LaunchParams<'a> {
    /// Extent of the `i` axis.
    pub nx: usize,
    /// Extent of the `j` axis.
    pub ny: usize,
    /// Resolved backend.
    pub backend: BackendTag,
    /// Target device, or -1.
    pub device_id: i32,
    /// Sparse restriction.
    pub ranges: RangesArg<'a>,
}

/// Pointer to one input array.
#[derive(Debug, Clone, Copy)]
pub struct ArgPointer {
    /// First scalar.
    pub ptr: *const c_void,
    /// Number of scalars.
    pub len: usize,
}

/// Pointer to the output buffer.
#[derive(Debug, Clone, Copy)]
pub struct OutPointer {
    /// First scalar.
    pub ptr: *mut c_void,
    /// Capacity in scalars.
    pub len: usize,
}

/// A callable compiled reduction.
pub trait Kernel: Send + Sync {
    /// Metadata of the kernel.
    fn info(&self) -> &KernelInfo;

    /// Runs the reduction and returns the kernel status (0 on success).
    ///
    /// # Safety
    ///
    /// Every argument pointer must be valid for reads of `len` scalars of
    /// the kernel's precision, in the memory named by `params.backend`, and
    /// `out` must be valid for writes of `len` such scalars in host memory.
    unsafe fn launch(
        &self,
        params: &LaunchParams<'_>,
        args: &[ArgPointer],
        out: OutPointer,
    ) -> i32;
}

/// A kernel bound from a shared library.
pub struct NativeKernel {
    launch: LaunchFn,
    info: KernelInfo,
    // Keeps `launch` valid.
    _library: Library,
}

impl NativeKernel {
    /// Opens the library at `path` and reads its metadata.
    ///
    /// # Safety
    ///
    /// Loading a library runs its initializers. `path` must name a kernel
    /// library produced by the kernel generator.
    pub unsafe fn open(path: &Path) -> Result<Self, LoadError> {
        let library = Library::new(path).map_err(|e| LoadError::Open {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let missing = |symbol: &'static str, e: libloading::Error| LoadError::MissingSymbol {
            path: path.to_path_buf(),
            symbol,
            reason: e.to_string(),
        };
        let metadata: MetadataFn = *library
            .get::<MetadataFn>(METADATA_SYMBOL.as_bytes())
            .map_err(|e| missing(METADATA_SYMBOL, e))?;
        let launch: LaunchFn = *library
            .get::<LaunchFn>(LAUNCH_SYMBOL.as_bytes())
            .map_err(|e| missing(LAUNCH_SYMBOL, e))?;

        let raw = metadata();
        let formula = if raw.formula.is_null() {
            None
        } else {
            Some(CStr::from_ptr(raw.formula).to_string_lossy().into_owned())
        };
        let info = KernelInfo {
            abi_version: raw.abi_version,
            precision: Precision::from_code(raw.precision).ok_or_else(|| LoadError::Open {
                path: path.to_path_buf(),
                reason: format!("unknown precision code {}", raw.precision),
            })?,
            dimout: raw.dimout as usize,
            output_axis: if raw.tag_ij == 0 { Axis::I } else { Axis::J },
            formula,
        };

        Ok(Self {
            launch,
            info,
            _library: library,
        })
    }
}

impl Kernel for NativeKernel {
    fn info(&self) -> &KernelInfo {
        &self.info
    }

    unsafe fn launch(
        &self,
        params: &LaunchParams<'_>,
        args: &[ArgPointer],
        out: OutPointer,
    ) -> i32 {
        let call = raw_launch(params);
        let pointers: Vec<*const c_void> = args.iter().map(|a| a.ptr).collect();
        (self.launch)(&call, pointers.as_ptr(), pointers.len(), out.ptr, out.len)
    }
}

fn raw_launch(params: &LaunchParams<'_>) -> RawLaunch {
    let (tag_cpu_gpu, tag_1d_2d, tag_host_device) = params.backend.tags();
    RawLaunch {
        nx: params.nx as i64,
        ny: params.ny as i64,
        tag_cpu_gpu,
        tag_1d_2d,
        tag_host_device,
        device_id: params.device_id,
        ranges: raw_ranges(params.ranges),
    }
}

fn raw_ranges(ranges: RangesArg<'_>) -> RawRanges {
    let empty = RawSlice {
        ptr: std::ptr::null(),
        len: 0,
    };
    match ranges {
        RangesArg::Unrestricted => RawRanges {
            count: 0,
            arrays: [empty; 6],
        },
        RangesArg::Restricted(ranges) => RawRanges {
            count: 6,
            arrays: ranges.arrays().map(|a| RawSlice {
                ptr: if a.is_empty() { std::ptr::null() } else { a.as_ptr() },
                len: a.len(),
            }),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{GpuGrid, MemoryLocation};
    use crate::ranges::Ranges;

    #[test]
    fn launch_record_carries_tags() {
        let params = LaunchParams {
            nx: 100,
            ny: 50,
            backend: BackendTag::gpu(GpuGrid::TwoD, MemoryLocation::Device),
            device_id: 3,
            ranges: RangesArg::Unrestricted,
        };
        let raw = raw_launch(&params);
        assert_eq!((raw.nx, raw.ny), (100, 50));
        assert_eq!(
            (raw.tag_cpu_gpu, raw.tag_1d_2d, raw.tag_host_device),
            (1, 1, 1)
        );
        assert_eq!(raw.device_id, 3);
        assert_eq!(raw.ranges.count, 0);
        assert!(raw.ranges.arrays.iter().all(|a| a.ptr.is_null()));
    }

    #[test]
    fn restricted_ranges_point_at_caller_data() {
        let ranges = Ranges {
            ranges_i: vec![[0, 4]],
            slices_i: vec![1],
            redranges_j: vec![[0, 2]],
            ..Ranges::default()
        };
        let raw = raw_ranges(RangesArg::Restricted(&ranges));
        assert_eq!(raw.count, 6);
        assert_eq!(raw.arrays[0].ptr, ranges.ranges_i.as_flattened().as_ptr());
        assert_eq!(raw.arrays[0].len, 2);
        assert_eq!(raw.arrays[1].len, 1);
        assert_eq!(raw.arrays[3].len, 0);
        assert!(raw.arrays[3].ptr.is_null());
    }

    #[test]
    fn opening_a_non_library_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("not_a_library.so");
        std::fs::write(&path, b"plain text").unwrap();
        let err = match unsafe { NativeKernel::open(&path) } {
            Ok(_) => panic!("expected an error"),
            Err(e) => e,
        };
        assert!(matches!(err, LoadError::Open { .. }));
    }
}
