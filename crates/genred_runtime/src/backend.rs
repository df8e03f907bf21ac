//! Backend selection for a kernel call.
//!
//! A [`BackendTag`] tells the kernel where to run (CPU or GPU), which GPU
//! launch scheme to use, and where its arguments live. It is derived from
//! the caller's [`BackendPreference`] and the actual [`Storage`] of the
//! arrays, so that `auto` callers never need to know device placement.

use std::fmt;
use std::str::FromStr;

use crate::error::DispatchError;

/// Where the computation runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComputeTarget {
    /// Host CPU.
    Cpu,
    /// CUDA device.
    Gpu,
}

/// GPU launch scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum GpuGrid {
    /// One thread per output row.
    #[default]
    OneD,
    /// Two-dimensional tiling of the `(i, j)` plane.
    TwoD,
}

/// Where call arguments are stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryLocation {
    /// Host memory.
    Host,
    /// Device memory.
    Device,
}

impl fmt::Display for MemoryLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemoryLocation::Host => f.write_str("host"),
            MemoryLocation::Device => f.write_str("device"),
        }
    }
}

/// Storage of one call argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Storage {
    /// Host memory.
    Host,
    /// Memory of the given device.
    Device(u32),
}

/// The resolved backend of one call, as passed to the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BackendTag {
    /// Where the computation runs.
    pub target: ComputeTarget,
    /// GPU launch scheme; ignored on CPU.
    pub grid: GpuGrid,
    /// Where the arguments live.
    pub memory: MemoryLocation,
}

impl BackendTag {
    /// The CPU backend.
    pub const CPU: BackendTag = BackendTag {
        target: ComputeTarget::Cpu,
        grid: GpuGrid::OneD,
        memory: MemoryLocation::Host,
    };

    /// A GPU backend.
    pub fn gpu(grid: GpuGrid, memory: MemoryLocation) -> Self {
        Self {
            target: ComputeTarget::Gpu,
            grid,
            memory,
        }
    }

    /// Integer tags `(cpu_gpu, grid_1d_2d, host_device)` of the kernel ABI.
    pub fn tags(self) -> (i32, i32, i32) {
        let target = match self.target {
            ComputeTarget::Cpu => 0,
            ComputeTarget::Gpu => 1,
        };
        let grid = match self.grid {
            GpuGrid::OneD => 0,
            GpuGrid::TwoD => 1,
        };
        let memory = match self.memory {
            MemoryLocation::Host => 0,
            MemoryLocation::Device => 1,
        };
        (target, grid, memory)
    }
}

/// The caller's backend choice.
///
/// Parsed from `auto`, `CPU`, `GPU`, `GPU_1D` or `GPU_2D`; the GPU names
/// accept a `_host` or `_device` suffix pinning the memory location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BackendPreference {
    /// Pick the most specific backend implied by the arguments.
    #[default]
    Auto,
    /// Run on the CPU.
    Cpu,
    /// Run on the GPU.
    Gpu {
        /// Launch scheme; 1D when unspecified.
        grid: Option<GpuGrid>,
        /// Memory location; inferred from the arguments when unspecified.
        memory: Option<MemoryLocation>,
    },
}

impl FromStr for BackendPreference {
    type Err = DispatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let unknown = || DispatchError::UnknownBackend(s.to_string());
        match s {
            "auto" => return Ok(BackendPreference::Auto),
            "CPU" => return Ok(BackendPreference::Cpu),
            _ => {}
        }
        let (base, memory) = if let Some(base) = s.strip_suffix("_host") {
            (base, Some(MemoryLocation::Host))
        } else if let Some(base) = s.strip_suffix("_device") {
            (base, Some(MemoryLocation::Device))
        } else {
            (s, None)
        };
        let grid = match base {
            "GPU" => None,
            "GPU_1D" => Some(GpuGrid::OneD),
            "GPU_2D" => Some(GpuGrid::TwoD),
            _ => return Err(unknown()),
        };
        Ok(BackendPreference::Gpu { grid, memory })
    }
}

impl fmt::Display for BackendPreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendPreference::Auto => f.write_str("auto"),
            BackendPreference::Cpu => f.write_str("CPU"),
            BackendPreference::Gpu { grid, memory } => {
                f.write_str(match grid {
                    None => "GPU",
                    Some(GpuGrid::OneD) => "GPU_1D",
                    Some(GpuGrid::TwoD) => "GPU_2D",
                })?;
                match memory {
                    None => Ok(()),
                    Some(memory) => write!(f, "_{memory}"),
                }
            }
        }
    }
}

/// Where a set of arguments lives as a whole.
fn placement(storages: &[Storage]) -> Result<Storage, DispatchError> {
    let mut iter = storages.iter().copied();
    let first = match iter.next() {
        Some(first) => first,
        None => return Ok(Storage::Host),
    };
    for storage in iter {
        match (first, storage) {
            (Storage::Host, Storage::Host) => {}
            (Storage::Device(a), Storage::Device(b)) if a == b => {}
            (Storage::Device(a), Storage::Device(b)) => {
                return Err(DispatchError::DeviceConflict {
                    expected: a,
                    found: b,
                })
            }
            _ => return Err(DispatchError::MixedStorage),
        }
    }
    Ok(first)
}

/// Resolves the backend tag and device id of a call.
///
/// `device_id` is the caller's requested device, if any. The returned
/// device id is `-1` when no device is involved.
pub fn select(
    preference: BackendPreference,
    storages: &[Storage],
    gpu_available: bool,
    device_id: Option<u32>,
) -> Result<(BackendTag, i32), DispatchError> {
    let placement = placement(storages)?;
    let device = match (placement, device_id) {
        (Storage::Device(found), Some(requested)) if found != requested => {
            return Err(DispatchError::DeviceConflict {
                expected: requested,
                found,
            })
        }
        (Storage::Device(found), _) => Some(found),
        (Storage::Host, requested) => requested,
    };
    let memory = match placement {
        Storage::Host => MemoryLocation::Host,
        Storage::Device(_) => MemoryLocation::Device,
    };

    let tag = match preference {
        BackendPreference::Auto => match memory {
            MemoryLocation::Device => BackendTag::gpu(GpuGrid::OneD, MemoryLocation::Device),
            MemoryLocation::Host if gpu_available => {
                BackendTag::gpu(GpuGrid::OneD, MemoryLocation::Host)
            }
            MemoryLocation::Host => BackendTag::CPU,
        },
        BackendPreference::Cpu => {
            if memory == MemoryLocation::Device {
                return Err(DispatchError::DeviceMemoryOnHostBackend {
                    backend: preference.to_string(),
                });
            }
            BackendTag::CPU
        }
        BackendPreference::Gpu {
            grid,
            memory: requested,
        } => {
            if !gpu_available && memory == MemoryLocation::Host {
                return Err(DispatchError::GpuUnavailable(preference.to_string()));
            }
            if let Some(requested) = requested {
                if requested != memory {
                    return Err(DispatchError::MemoryLocation {
                        backend: preference.to_string(),
                        expected: requested.to_string(),
                        found: memory.to_string(),
                    });
                }
            }
            BackendTag::gpu(grid.unwrap_or_default(), memory)
        }
    };

    let device_id = match (tag.target, device) {
        (ComputeTarget::Gpu, Some(device)) => device as i32,
        _ => -1,
    };
    Ok((tag, device_id))
}
