//! Device capability snapshot handed to kernel providers

use serde::{Deserialize, Serialize};

/// Properties of the device an invocation runs on.
///
/// Providers use these to size launch grids; the CPU reference ignores them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceProperties {
    pub device_id: usize,
    pub name: String,
    pub warp_size: u32,
    pub max_threads_per_block: u32,
    /// Maximum grid extent in x, y, z.
    pub max_grid_size: [u32; 3],
    pub multiprocessor_count: u32,
    pub max_shared_memory_per_block: usize,
}

impl DeviceProperties {
    /// Properties describing the host CPU.
    pub fn host() -> Self {
        Self {
            device_id: 0,
            name: "host".to_string(),
            warp_size: 1,
            max_threads_per_block: 1,
            max_grid_size: [u32::MAX, u32::MAX, u32::MAX],
            multiprocessor_count: std::thread::available_parallelism()
                .map(|n| n.get() as u32)
                .unwrap_or(1),
            max_shared_memory_per_block: 0,
        }
    }

    /// Conservative CUDA defaults (compute capability 7.x class device).
    pub fn cuda_default(device_id: usize) -> Self {
        Self {
            device_id,
            name: format!("CUDA Device {device_id}"),
            warp_size: 32,
            max_threads_per_block: 1024,
            max_grid_size: [2_147_483_647, 65_535, 65_535],
            multiprocessor_count: 80,
            max_shared_memory_per_block: 48 * 1024,
        }
    }
}

impl Default for DeviceProperties {
    fn default() -> Self {
        Self::host()
    }
}
