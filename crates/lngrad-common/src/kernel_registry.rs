//! Kernel backend enumeration shared by providers and kernel definitions.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The kernel backend variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[non_exhaustive]
pub enum KernelBackend {
    /// Pure-Rust CPU reference kernels.
    CpuRust,
    /// CUDA GPU kernels via `cudarc`.
    Cuda,
}

impl fmt::Display for KernelBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KernelBackend::CpuRust => write!(f, "cpu-rust"),
            KernelBackend::Cuda => write!(f, "cuda"),
        }
    }
}

impl KernelBackend {
    /// Execution-provider name used in kernel identities.
    pub fn provider_name(self) -> &'static str {
        match self {
            KernelBackend::CpuRust => "CPUExecutionProvider",
            KernelBackend::Cuda => "CUDAExecutionProvider",
        }
    }

    /// Returns true if this backend requires a GPU at runtime.
    pub fn requires_gpu(self) -> bool {
        matches!(self, KernelBackend::Cuda)
    }
}
