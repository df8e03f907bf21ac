//! The per-call front end of a loaded kernel.
//!
//! [`ReductionDispatcher::call`] validates everything it can before the
//! native call: argument count, shapes against alias categories, scalar
//! precision, backend and device placement, and ranges. It then launches the
//! kernel and post-processes the output: a LogSumExp kernel returns a
//! `(max, sum)` pair per row, recombined here into `max + ln(sum)`.
//!
//! The dispatcher holds no per-call state and takes no locks.

use std::ffi::c_void;
use std::fmt;
use std::marker::PhantomData;
use std::ops::Add;
use std::sync::Arc;

use genred_formula::{Axis, Category, FormulaSpec, Precision};

use crate::backend::{self, BackendPreference, Storage};
use crate::error::DispatchError;
use crate::kernel::{ArgPointer, LaunchParams, OutPointer};
use crate::loader::ArtifactHandle;
use crate::ranges::{Ranges, RangesArg};

/// Scalar types kernels are compiled for.
pub trait Scalar:
    Copy + Default + PartialEq + fmt::Debug + Add<Output = Self> + Send + Sync + 'static
{
    /// The matching kernel precision.
    const PRECISION: Precision;

    /// Natural logarithm.
    fn ln(self) -> Self;
}

impl Scalar for f32 {
    const PRECISION: Precision = Precision::Float32;

    fn ln(self) -> Self {
        f32::ln(self)
    }
}

impl Scalar for f64 {
    const PRECISION: Precision = Precision::Float64;

    fn ln(self) -> Self {
        f64::ln(self)
    }
}

/// One call argument: a row-major array and where it lives.
///
/// `Vi`/`Vj` aliases take shape `[n, dim]`, or `[n]` when `dim` is 1;
/// `Pm` aliases take shape `[dim]`.
#[derive(Debug, Clone)]
pub struct Array<'a, T> {
    ptr: *const T,
    len: usize,
    shape: Vec<usize>,
    storage: Storage,
    _data: PhantomData<&'a [T]>,
}

impl<'a, T: Scalar> Array<'a, T> {
    /// A host array with an explicit shape.
    pub fn new(data: &'a [T], shape: impl Into<Vec<usize>>) -> Self {
        Self {
            ptr: data.as_ptr(),
            len: data.len(),
            shape: shape.into(),
            storage: Storage::Host,
            _data: PhantomData,
        }
    }

    /// A one-dimensional host array.
    pub fn vector(data: &'a [T]) -> Self {
        Self::new(data, [data.len()])
    }

    /// A device array.
    ///
    /// # Safety
    ///
    /// `ptr` must point to `len` scalars in the memory of `device` that stay
    /// valid and unaliased by writers for `'a`.
    pub unsafe fn device(
        ptr: *const T,
        len: usize,
        shape: impl Into<Vec<usize>>,
        device: u32,
    ) -> Self {
        Self {
            ptr,
            len,
            shape: shape.into(),
            storage: Storage::Device(device),
            _data: PhantomData,
        }
    }

    /// The array shape.
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Number of scalars.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if the array holds no scalars.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Where the array lives.
    pub fn storage(&self) -> Storage {
        self.storage
    }
}

/// Call-time options.
#[derive(Debug, Clone, Copy, Default)]
pub struct CallOptions<'a> {
    /// Backend preference; `auto` by default.
    pub backend: BackendPreference,
    /// Requested device.
    pub device_id: Option<u32>,
    /// Optional block-sparse restriction.
    pub ranges: Option<&'a Ranges>,
}

impl<'a> CallOptions<'a> {
    /// Sets the backend preference.
    pub fn with_backend(mut self, backend: BackendPreference) -> Self {
        self.backend = backend;
        self
    }

    /// Sets the requested device.
    pub fn with_device(mut self, device_id: u32) -> Self {
        self.device_id = Some(device_id);
        self
    }

    /// Restricts the reduction to `ranges`.
    pub fn with_ranges(mut self, ranges: &'a Ranges) -> Self {
        self.ranges = Some(ranges);
        self
    }
}

/// Row-major result of a reduction.
#[derive(Debug, Clone, PartialEq)]
pub struct ReductionOutput<T> {
    /// Number of output rows.
    pub rows: usize,
    /// Scalars per row.
    pub cols: usize,
    /// `rows * cols` values.
    pub data: Vec<T>,
}

impl<T: Scalar> ReductionOutput<T> {
    /// The values of row `i`.
    pub fn row(&self, i: usize) -> &[T] {
        &self.data[i * self.cols..(i + 1) * self.cols]
    }
}

/// Computes the `(nx, ny)` extents of a call from its arrays.
///
/// Arrays bind to aliases in position order. An axis no alias is indexed by
/// has extent 1.
pub fn sizes<T: Scalar>(
    spec: &FormulaSpec,
    arrays: &[Array<'_, T>],
) -> Result<(usize, usize), DispatchError> {
    let aliases = spec.aliases();
    if aliases.len() != arrays.len() {
        return Err(DispatchError::ArgumentCount {
            expected: aliases.len(),
            found: arrays.len(),
        });
    }

    let mut nx = None;
    let mut ny = None;
    for (alias, array) in aliases.iter().zip(arrays) {
        let shape = array.shape();
        let expected_len = shape
            .iter()
            .try_fold(1usize, |acc, &d| acc.checked_mul(d))
            .ok_or_else(|| DispatchError::ShapeOverflow {
                alias: alias.name.clone(),
                shape: shape.to_vec(),
            })?;
        if expected_len != array.len() {
            return Err(DispatchError::DataLength {
                alias: alias.name.clone(),
                expected: expected_len,
                found: array.len(),
            });
        }

        let (extent, axis) = match alias.category {
            Category::Param => {
                let [dim] = shape else {
                    return Err(DispatchError::Rank {
                        alias: alias.name.clone(),
                        expected: format!("[{}]", alias.dim),
                        shape: shape.to_vec(),
                    });
                };
                check_dim(&alias.name, alias.dim, *dim)?;
                continue;
            }
            Category::I => (&mut nx, 'i'),
            Category::J => (&mut ny, 'j'),
        };

        let (n, dim) = match *shape {
            [n, dim] => (n, dim),
            [n] if alias.dim == 1 => (n, 1),
            _ => {
                let expected = if alias.dim == 1 {
                    "[n, 1] or [n]".to_string()
                } else {
                    format!("[n, {}]", alias.dim)
                };
                return Err(DispatchError::Rank {
                    alias: alias.name.clone(),
                    expected,
                    shape: shape.to_vec(),
                });
            }
        };
        check_dim(&alias.name, alias.dim, dim)?;
        match *extent {
            Some(expected) if expected != n => {
                return Err(DispatchError::Extent {
                    alias: alias.name.clone(),
                    axis,
                    expected,
                    found: n,
                })
            }
            _ => *extent = Some(n),
        }
    }
    Ok((nx.unwrap_or(1), ny.unwrap_or(1)))
}

fn check_dim(alias: &str, expected: usize, found: usize) -> Result<(), DispatchError> {
    if expected != found {
        return Err(DispatchError::Dimension {
            alias: alias.to_string(),
            expected,
            found,
        });
    }
    Ok(())
}

/// Calls one loaded kernel.
#[derive(Debug, Clone)]
pub struct ReductionDispatcher {
    spec: Arc<FormulaSpec>,
    handle: ArtifactHandle,
    gpu_available: bool,
}

impl ReductionDispatcher {
    /// Creates a dispatcher for `handle`, which must be the kernel compiled
    /// from `spec`.
    pub fn new(spec: Arc<FormulaSpec>, handle: ArtifactHandle, gpu_available: bool) -> Self {
        Self {
            spec,
            handle,
            gpu_available,
        }
    }

    /// The formula.
    pub fn spec(&self) -> &FormulaSpec {
        &self.spec
    }

    /// The loaded kernel.
    pub fn handle(&self) -> &ArtifactHandle {
        &self.handle
    }

    /// Runs the reduction on `arrays`.
    pub fn call<T: Scalar>(
        &self,
        arrays: &[Array<'_, T>],
        options: &CallOptions<'_>,
    ) -> Result<ReductionOutput<T>, DispatchError> {
        let spec = &*self.spec;
        if T::PRECISION != spec.precision() {
            return Err(DispatchError::Precision {
                expected: spec.precision(),
                found: T::PRECISION,
            });
        }
        let info = self.handle.info();
        if info.precision != T::PRECISION || info.output_axis != spec.axis() {
            return Err(DispatchError::KernelMismatch(format!(
                "kernel is {} with rows along {:?}, formula is {} with rows along {:?}",
                info.precision,
                info.output_axis,
                spec.precision(),
                spec.axis()
            )));
        }
        let log_sum_exp = spec.reduction().is_log_sum_exp();
        if log_sum_exp && info.dimout != 2 {
            return Err(DispatchError::KernelMismatch(format!(
                "LogSumExp kernel returns {} values per row, expected 2",
                info.dimout
            )));
        }

        let (nx, ny) = sizes(spec, arrays)?;
        let storages: Vec<Storage> = arrays.iter().map(Array::storage).collect();
        let (backend, device_id) = backend::select(
            options.backend,
            &storages,
            self.gpu_available,
            options.device_id,
        )?;
        if let Some(ranges) = options.ranges {
            ranges.validate(nx, ny)?;
        }

        let rows = match spec.axis() {
            Axis::I => nx,
            Axis::J => ny,
        };
        let out_len = rows
            .checked_mul(info.dimout)
            .ok_or(DispatchError::OutputOverflow {
                rows,
                dimout: info.dimout,
            })?;
        let mut out = vec![T::default(); out_len];
        let params = LaunchParams {
            nx,
            ny,
            backend,
            device_id,
            ranges: RangesArg::from(options.ranges),
        };
        let args: Vec<ArgPointer> = arrays
            .iter()
            .map(|a| ArgPointer {
                ptr: a.ptr.cast::<c_void>(),
                len: a.len,
            })
            .collect();
        tracing::trace!(
            fingerprint = %self.handle.fingerprint(),
            nx,
            ny,
            ?backend,
            device_id,
            "launching kernel"
        );

        // SAFETY: every array was checked against its alias and holds `len`
        // scalars of the kernel's precision in the memory the backend names;
        // `out` holds `rows * dimout` host scalars.
        let status = unsafe {
            self.handle.kernel().launch(
                &params,
                &args,
                OutPointer {
                    ptr: out.as_mut_ptr().cast::<c_void>(),
                    len: out.len(),
                },
            )
        };
        if status != 0 {
            return Err(DispatchError::Kernel {
                fingerprint: self.handle.fingerprint().clone(),
                status,
            });
        }

        if log_sum_exp {
            let data = out
                .chunks_exact(2)
                .map(|pair| pair[0] + pair[1].ln())
                .collect();
            return Ok(ReductionOutput {
                rows,
                cols: 1,
                data,
            });
        }
        Ok(ReductionOutput {
            rows,
            cols: info.dimout,
            data: out,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendTag, GpuGrid, MemoryLocation};
    use crate::kernel::{Kernel, KernelInfo, ABI_VERSION};
    use crate::loader::LoadedArtifact;
    use genred_cache::Fingerprint;
    use parking_lot::Mutex;
    use std::path::PathBuf;

    #[derive(Debug, Clone, Copy)]
    struct Launch {
        nx: usize,
        ny: usize,
        backend: BackendTag,
        device_id: i32,
        restricted: bool,
    }

    type Launches = Arc<Mutex<Vec<Launch>>>;

    /// Fills each output row with a fixed pattern and records its launches.
    struct PatternKernel {
        info: KernelInfo,
        row: Vec<f32>,
        status: i32,
        launches: Launches,
    }

    impl Kernel for PatternKernel {
        fn info(&self) -> &KernelInfo {
            &self.info
        }

        unsafe fn launch(
            &self,
            params: &LaunchParams<'_>,
            _: &[ArgPointer],
            out: OutPointer,
        ) -> i32 {
            self.launches.lock().push(Launch {
                nx: params.nx,
                ny: params.ny,
                backend: params.backend,
                device_id: params.device_id,
                restricted: matches!(params.ranges, RangesArg::Restricted(_)),
            });
            let out = std::slice::from_raw_parts_mut(out.ptr.cast::<f32>(), out.len);
            for chunk in out.chunks_exact_mut(self.row.len()) {
                chunk.copy_from_slice(&self.row);
            }
            self.status
        }
    }

    fn dispatcher_for(
        spec: FormulaSpec,
        kernel_axis: Axis,
        row: Vec<f32>,
        status: i32,
    ) -> (ReductionDispatcher, Launches) {
        let launches = Launches::default();
        let kernel = PatternKernel {
            info: KernelInfo {
                abi_version: ABI_VERSION,
                precision: Precision::Float32,
                dimout: row.len(),
                output_axis: kernel_axis,
                formula: Some(spec.reduction_formula()),
            },
            row,
            status,
            launches: Arc::clone(&launches),
        };
        let handle = Arc::new(LoadedArtifact::new(
            Fingerprint::from_raw("genred_cpu_float32_test"),
            PathBuf::from("/cache/genred_cpu_float32_test"),
            Box::new(kernel),
        ));
        (
            ReductionDispatcher::new(Arc::new(spec), handle, false),
            launches,
        )
    }

    fn dispatcher(
        formula: &str,
        aliases: &[&str],
        reduction: &str,
        row: Vec<f32>,
        status: i32,
    ) -> (ReductionDispatcher, Launches) {
        let spec = FormulaSpec::parse(formula, aliases, reduction, "float32").unwrap();
        dispatcher_for(spec, Axis::I, row, status)
    }

    fn spec(aliases: &[&str]) -> FormulaSpec {
        FormulaSpec::parse("x", aliases, "Sum", "float32").unwrap()
    }

    #[test]
    fn sizes_from_i_and_j_arrays() {
        let spec =
            FormulaSpec::parse("x*y", &["x=Vi(0,1)", "y=Vj(1,1)"], "Sum", "float32").unwrap();
        let x = vec![0.0f32; 100];
        let y = vec![0.0f32; 50];
        let arrays = [Array::vector(&x), Array::new(&y, [50, 1])];
        assert_eq!(sizes(&spec, &arrays).unwrap(), (100, 50));
    }

    #[test]
    fn missing_axis_has_extent_one() {
        let spec = spec(&["x=Vi(0,3)", "p=Pm(1,2)"]);
        let x = vec![0.0f32; 12];
        let p = vec![0.0f32; 2];
        let arrays = [Array::new(&x, [4, 3]), Array::vector(&p)];
        assert_eq!(sizes(&spec, &arrays).unwrap(), (4, 1));
    }

    #[test]
    fn inconsistent_extents_fail_fast() {
        let spec = spec(&["a=Vj(0,1)", "b=Vj(1,1)"]);
        let a = vec![0.0f32; 50];
        let b = vec![0.0f32; 49];
        let err = sizes(&spec, &[Array::vector(&a), Array::vector(&b)]).unwrap_err();
        assert_eq!(
            err,
            DispatchError::Extent {
                alias: "b".to_string(),
                axis: 'j',
                expected: 50,
                found: 49
            }
        );
    }

    #[test]
    fn shape_errors() {
        let spec = spec(&["x=Vi(0,3)", "p=Pm(1,2)"]);
        let x = vec![0.0f32; 12];
        let p = vec![0.0f32; 2];

        let err = sizes(&spec, &[Array::vector(&x), Array::vector(&p)]).unwrap_err();
        assert!(matches!(err, DispatchError::Rank { ref alias, .. } if alias == "x"));

        let err = sizes(&spec, &[Array::new(&x, [3, 4]), Array::vector(&p)]).unwrap_err();
        assert!(matches!(
            err,
            DispatchError::Dimension {
                expected: 3,
                found: 4,
                ..
            }
        ));

        let err = sizes(&spec, &[Array::new(&x, [5, 3]), Array::vector(&p)]).unwrap_err();
        assert!(matches!(
            err,
            DispatchError::DataLength {
                expected: 15,
                found: 12,
                ..
            }
        ));

        let err = sizes(&spec, &[Array::new(&x, [4, 3]), Array::new(&p, [1, 2])]).unwrap_err();
        assert!(matches!(err, DispatchError::Rank { ref alias, .. } if alias == "p"));

        let err = sizes(&spec, &[Array::new(&x, [4, 3])]).unwrap_err();
        assert_eq!(
            err,
            DispatchError::ArgumentCount {
                expected: 2,
                found: 1
            }
        );
    }

    #[test]
    fn sum_returns_raw_rows() {
        let (dispatcher, launches) =
            dispatcher("x*y", &["x=Vi(0,1)", "y=Vj(1,1)"], "Sum", vec![7.0], 0);
        let x = vec![1.0f32; 100];
        let y = vec![1.0f32; 50];
        let out = dispatcher
            .call(&[Array::vector(&x), Array::vector(&y)], &CallOptions::default())
            .unwrap();
        assert_eq!((out.rows, out.cols), (100, 1));
        assert!(out.data.iter().all(|&v| v == 7.0));

        let launch = launches.lock()[0];
        assert_eq!((launch.nx, launch.ny), (100, 50));
        assert_eq!(launch.backend, BackendTag::CPU);
        assert_eq!(launch.device_id, -1);
    }

    #[test]
    fn log_sum_exp_recombines_pairs() {
        let (dispatcher, _) = dispatcher(
            "x*y",
            &["x=Vi(0,1)", "y=Vj(1,1)"],
            "LogSumExp",
            vec![2.0, 3.0],
            0,
        );
        let x = vec![0.0f32; 4];
        let y = vec![0.0f32; 6];
        let out = dispatcher
            .call(&[Array::vector(&x), Array::vector(&y)], &CallOptions::default())
            .unwrap();
        assert_eq!((out.rows, out.cols), (4, 1));
        for &v in &out.data {
            assert!((v - (2.0 + 3.0f32.ln())).abs() < 1e-6);
        }
        assert!((out.row(0)[0] - 3.098_612_3).abs() < 1e-5);
    }

    #[test]
    fn log_sum_exp_needs_pair_output() {
        let (dispatcher, launches) =
            dispatcher("x", &["x=Vi(0,1)"], "LogSumExp", vec![2.0], 0);
        let x = vec![0.0f32; 4];
        let err = dispatcher
            .call(&[Array::vector(&x)], &CallOptions::default())
            .unwrap_err();
        assert!(matches!(err, DispatchError::KernelMismatch(_)));
        assert!(launches.lock().is_empty());
    }

    #[test]
    fn axis_j_rows_follow_ny() {
        let spec = FormulaSpec::parse("x*y", &["x=Vi(0,1)", "y=Vj(1,1)"], "Sum", "float32")
            .unwrap()
            .with_axis(Axis::J);
        let (dispatcher, _) = dispatcher_for(spec, Axis::J, vec![1.0], 0);
        let x = vec![0.0f32; 3];
        let y = vec![0.0f32; 5];
        let out = dispatcher
            .call(&[Array::vector(&x), Array::vector(&y)], &CallOptions::default())
            .unwrap();
        assert_eq!(out.rows, 5);
    }

    #[test]
    fn overflowing_shape_is_rejected_before_launch() {
        let (dispatcher, launches) =
            dispatcher("x*y", &["x=Vi(0,1)", "y=Vj(1,4)"], "Sum", vec![0.0], 0);
        let x = vec![0.0f32; 3];
        let y: [f32; 0] = [];
        let err = dispatcher
            .call(
                &[Array::vector(&x), Array::new(&y, [1usize << 62, 4])],
                &CallOptions::default(),
            )
            .unwrap_err();
        assert_eq!(
            err,
            DispatchError::ShapeOverflow {
                alias: "y".to_string(),
                shape: vec![1 << 62, 4],
            }
        );
        assert!(launches.lock().is_empty());
    }

    #[test]
    fn oversized_output_is_rejected_before_launch() {
        let (dispatcher, launches) = dispatcher("x", &["x=Vi(0,1)"], "Sum", vec![0.0; 4], 0);
        let n = usize::MAX / 2;
        // Never dereferenced: the call fails while sizing the output.
        let ptr = std::ptr::NonNull::<f32>::dangling().as_ptr();
        let array = unsafe { Array::device(ptr, n, [n], 0) };
        let err = dispatcher.call(&[array], &CallOptions::default()).unwrap_err();
        assert_eq!(err, DispatchError::OutputOverflow { rows: n, dimout: 4 });
        assert!(launches.lock().is_empty());
    }

    #[test]
    fn kernel_axis_must_match_formula() {
        let spec = FormulaSpec::parse("x*y", &["x=Vi(0,1)", "y=Vj(1,1)"], "Sum", "float32")
            .unwrap()
            .with_axis(Axis::J);
        let (dispatcher, launches) = dispatcher_for(spec, Axis::I, vec![1.0], 0);
        let x = vec![0.0f32; 3];
        let y = vec![0.0f32; 5];
        let err = dispatcher
            .call(&[Array::vector(&x), Array::vector(&y)], &CallOptions::default())
            .unwrap_err();
        assert!(matches!(err, DispatchError::KernelMismatch(_)));
        assert!(launches.lock().is_empty());
    }

    #[test]
    fn precision_mismatch_is_rejected_before_launch() {
        let (dispatcher, launches) = dispatcher("x", &["x=Vi(0,1)"], "Sum", vec![0.0], 0);
        let x = vec![0.0f64; 3];
        let err = dispatcher
            .call(&[Array::vector(&x)], &CallOptions::default())
            .unwrap_err();
        assert!(matches!(err, DispatchError::Precision { .. }));
        assert!(launches.lock().is_empty());
    }

    #[test]
    fn backend_errors_are_reported_before_launch() {
        let (dispatcher, launches) = dispatcher("x", &["x=Vi(0,1)"], "Sum", vec![0.0], 0);
        let x = vec![0.0f32; 3];
        let options = CallOptions::default().with_backend("GPU_2D".parse().unwrap());
        let err = dispatcher.call(&[Array::vector(&x)], &options).unwrap_err();
        assert_eq!(err, DispatchError::GpuUnavailable("GPU_2D".to_string()));
        assert!(launches.lock().is_empty());
    }

    #[test]
    fn device_arrays_select_gpu_device() {
        let (dispatcher, launches) = dispatcher("x", &["x=Vi(0,1)"], "Sum", vec![0.0], 0);
        let x = vec![0.0f32; 3];
        // The pattern kernel never reads its arguments.
        let array = unsafe { Array::device(x.as_ptr(), x.len(), [3], 1) };
        dispatcher.call(&[array], &CallOptions::default()).unwrap();
        let launch = launches.lock()[0];
        assert_eq!(
            launch.backend,
            BackendTag::gpu(GpuGrid::OneD, MemoryLocation::Device)
        );
        assert_eq!(launch.device_id, 1);
    }

    #[test]
    fn ranges_are_validated_and_threaded_through() {
        let (dispatcher, launches) =
            dispatcher("x*y", &["x=Vi(0,1)", "y=Vj(1,1)"], "Sum", vec![0.0], 0);
        let x = vec![0.0f32; 4];
        let y = vec![0.0f32; 4];
        let arrays = [Array::vector(&x), Array::vector(&y)];

        let ranges = Ranges {
            ranges_i: vec![[0, 4]],
            slices_i: vec![1],
            redranges_j: vec![[0, 4]],
            ranges_j: vec![[0, 4]],
            slices_j: vec![1],
            redranges_i: vec![[0, 4]],
        };
        dispatcher
            .call(&arrays, &CallOptions::default().with_ranges(&ranges))
            .unwrap();
        dispatcher.call(&arrays, &CallOptions::default()).unwrap();
        {
            let launches = launches.lock();
            assert!(launches[0].restricted);
            assert!(!launches[1].restricted);
        }

        let bad = Ranges {
            ranges_i: vec![[0, 9]],
            ..ranges.clone()
        };
        let err = dispatcher
            .call(&arrays, &CallOptions::default().with_ranges(&bad))
            .unwrap_err();
        assert!(matches!(err, DispatchError::InvalidRanges(_)));
        assert_eq!(launches.lock().len(), 2);
    }

    #[test]
    fn kernel_status_becomes_error() {
        let (dispatcher, _) = dispatcher("x", &["x=Vi(0,1)"], "Sum", vec![0.0], 5);
        let x = vec![0.0f32; 3];
        let err = dispatcher
            .call(&[Array::vector(&x)], &CallOptions::default())
            .unwrap_err();
        assert!(matches!(err, DispatchError::Kernel { status: 5, .. }));
    }
}
