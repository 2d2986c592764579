//! Launch geometry for the three backward kernels.

use lngrad_common::{DeviceProperties, KernelError, ceil_div};

/// Rows of warps per block in the input-gradient kernel.
const INPUT_WARPS_PER_BLOCK: u32 = 4;

/// Grid, block and dynamic shared memory of one kernel launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaunchDims {
    pub grid: (u32, u32, u32),
    pub block: (u32, u32, u32),
    pub shared_mem_bytes: u32,
}

/// Launch dimensions for one backward invocation.
///
/// * `part`: one thread per column, one grid row per partial accumulator.
/// * `reduce`: one thread per column folding the `part_size` partials.
/// * `input`: one block per row, grid-striding when `n1` exceeds the
///   device's y-extent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaunchPlan {
    pub part: LaunchDims,
    pub reduce: LaunchDims,
    pub input: LaunchDims,
    /// Rows accumulated by each partial segment.
    pub rows_per_part: usize,
}

impl LaunchPlan {
    /// Plan launches for `(n1, n2)` with `part_size` partial accumulators and a
    /// statistics type of `stat_bytes` bytes.
    pub fn new(
        props: &DeviceProperties,
        n1: usize,
        n2: usize,
        part_size: usize,
        stat_bytes: usize,
    ) -> Result<Self, KernelError> {
        if part_size == 0 {
            return Err(invalid("part_size must be > 0".into()));
        }
        let warp = props.warp_size.max(1);
        let max_grid_y = props.max_grid_size[1].max(1);

        let col_blocks = to_u32("column blocks", ceil_div(n2, warp as usize).max(1))?;
        let parts = to_u32("part_size", part_size)?;
        if parts > max_grid_y {
            return Err(invalid(format!(
                "part_size {part_size} exceeds device grid y-extent {max_grid_y}"
            )));
        }

        let part = LaunchDims { grid: (col_blocks, parts, 1), block: (warp, 1, 1), shared_mem_bytes: 0 };
        let reduce = LaunchDims { grid: (col_blocks, 1, 1), block: (warp, 1, 1), shared_mem_bytes: 0 };

        let threads = floor_pow2((warp * INPUT_WARPS_PER_BLOCK).min(props.max_threads_per_block.max(1)));
        let rows = to_u32("rows", n1.max(1).min(max_grid_y as usize))?;
        let shared = 2 * threads as usize * stat_bytes;
        if props.max_shared_memory_per_block > 0 && shared > props.max_shared_memory_per_block {
            return Err(invalid(format!(
                "input kernel needs {shared} bytes of shared memory, device allows {}",
                props.max_shared_memory_per_block
            )));
        }
        let input = LaunchDims {
            grid: (1, rows, 1),
            block: (threads, 1, 1),
            shared_mem_bytes: to_u32("shared memory", shared)?,
        };

        Ok(Self { part, reduce, input, rows_per_part: ceil_div(n1, part_size) })
    }
}

fn floor_pow2(v: u32) -> u32 {
    if v == 0 { 1 } else { 1 << (31 - v.leading_zeros()) }
}

fn to_u32(what: &str, v: usize) -> Result<u32, KernelError> {
    u32::try_from(v).map_err(|_| invalid(format!("{what} {v} exceeds u32 launch range")))
}

fn invalid(reason: String) -> KernelError {
    KernelError::InvalidArguments { reason }
}
