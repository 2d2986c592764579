//! Layer-norm backward CUDA kernels.
//!
//! # Kernel strategy
//!
//! Three kernels run back to back on one stream:
//!
//! 1. `ln_grad_part_*`: grid `(ceil(n2 / warp), part_size)`. Thread `(col,
//!    part)` walks the rows of its segment and writes one partial
//!    `sum(dy * x_hat)` and `sum(dy)` into the scratch buffers.
//! 2. `ln_grad_reduce_*`: one thread per column folds the `part_size`
//!    partials into `grad_gamma` / `grad_beta`.
//! 3. `ln_grad_input_*`: one block per row (grid-striding over `n1`). A
//!    shared-memory tree reduction produces `sum(dxhat)` and
//!    `sum(dxhat * x_hat)`, then every thread writes its columns of `dx`.
//!
//! Only `T == U` kernels are compiled. The `(f16, f32)` pair widens on the
//! host, runs the `f32` kernels, and narrows the results.

use std::sync::Arc;

use cudarc::driver::{
    CudaContext, CudaFunction, CudaModule, CudaSlice, CudaStream, DeviceRepr, LaunchConfig,
    PushKernelArg, ValidAsZeroBits, sys::CUdevice_attribute,
};
use cudarc::nvrtc::compile_ptx;
use half::f16;
use lngrad_common::{DeviceProperties, GradElement, KernelBackend, KernelError, Result, StatElement};

use crate::LayerNormGradProvider;
use crate::args::{GradArgs, LayerNormGradArgs};
use crate::launch::{LaunchDims, LaunchPlan};

/// CUDA C source for the three backward stages in `float` and `double`.
pub const LAYER_NORM_GRAD_KERNEL_SRC: &str = r#"
template <typename U>
__device__ void part_grad_gamma_beta(
    const U* __restrict__ dy,
    const U* __restrict__ y,
    const U* __restrict__ gamma,
    const U* __restrict__ beta,
    int n1,
    int n2,
    int rows_per_part,
    U* __restrict__ part_gamma,
    U* __restrict__ part_beta
) {
    int col = blockIdx.x * blockDim.x + threadIdx.x;
    int part = blockIdx.y;
    if (col >= n2) return;

    long long begin = (long long)part * rows_per_part;
    if (begin > n1) begin = n1;
    long long end = begin + rows_per_part;
    if (end > n1) end = n1;

    U g = gamma[col];
    U b = beta[col];
    U acc_gamma = 0;
    U acc_beta = 0;
    for (long long row = begin; row < end; ++row) {
        long long idx = row * n2 + col;
        U d = dy[idx];
        acc_gamma += d * ((y[idx] - b) / g);
        acc_beta += d;
    }
    long long out = (long long)part * n2 + col;
    part_gamma[out] = acc_gamma;
    part_beta[out] = acc_beta;
}

template <typename U>
__device__ void grad_gamma_beta(
    const U* __restrict__ part_gamma,
    const U* __restrict__ part_beta,
    int n2,
    int part_size,
    U* __restrict__ grad_gamma,
    U* __restrict__ grad_beta
) {
    int col = blockIdx.x * blockDim.x + threadIdx.x;
    if (col >= n2) return;

    U sum_gamma = 0;
    U sum_beta = 0;
    for (int part = 0; part < part_size; ++part) {
        long long idx = (long long)part * n2 + col;
        sum_gamma += part_gamma[idx];
        sum_beta += part_beta[idx];
    }
    grad_gamma[col] = sum_gamma;
    grad_beta[col] = sum_beta;
}

template <typename U>
__device__ void grad_input(
    const U* __restrict__ dy,
    const U* __restrict__ y,
    const U* __restrict__ gamma,
    const U* __restrict__ beta,
    const U* __restrict__ inv_std_var,
    int n1,
    int n2,
    U* __restrict__ dx
) {
    extern __shared__ __align__(8) unsigned char smem_raw[];
    U* s_dxhat = reinterpret_cast<U*>(smem_raw);
    U* s_dxhat_xhat = s_dxhat + blockDim.x;
    int tid = threadIdx.x;

    for (long long row = blockIdx.y; row < n1; row += gridDim.y) {
        const U* dy_row = dy + row * n2;
        const U* y_row = y + row * n2;

        U a = 0;
        U b = 0;
        for (int j = tid; j < n2; j += blockDim.x) {
            U x_hat = (y_row[j] - beta[j]) / gamma[j];
            U dxhat = dy_row[j] * gamma[j];
            a += dxhat;
            b += dxhat * x_hat;
        }
        s_dxhat[tid] = a;
        s_dxhat_xhat[tid] = b;
        __syncthreads();

        for (int s = blockDim.x / 2; s > 0; s >>= 1) {
            if (tid < s) {
                s_dxhat[tid] += s_dxhat[tid + s];
                s_dxhat_xhat[tid] += s_dxhat_xhat[tid + s];
            }
            __syncthreads();
        }
        U sum_dxhat = s_dxhat[0];
        U sum_dxhat_xhat = s_dxhat_xhat[0];
        U fn2 = (U)n2;
        U term = inv_std_var[row] / fn2;

        U* dx_row = dx + row * n2;
        for (int j = tid; j < n2; j += blockDim.x) {
            U x_hat = (y_row[j] - beta[j]) / gamma[j];
            U dxhat = dy_row[j] * gamma[j];
            dx_row[j] = term * (fn2 * dxhat - sum_dxhat - x_hat * sum_dxhat_xhat);
        }
        __syncthreads();
    }
}

#define LN_GRAD_INSTANTIATE(SUFFIX, U)                                              \
extern "C" __global__ void ln_grad_part_##SUFFIX(                                  \
    const U* dy, const U* y, const U* gamma, const U* beta,                       \
    int n1, int n2, int rows_per_part, U* part_gamma, U* part_beta) {             \
    part_grad_gamma_beta<U>(dy, y, gamma, beta, n1, n2, rows_per_part,            \
                            part_gamma, part_beta);                               \
}                                                                                 \
extern "C" __global__ void ln_grad_reduce_##SUFFIX(                                \
    const U* part_gamma, const U* part_beta, int n2, int part_size,               \
    U* grad_gamma, U* grad_beta) {                                                \
    grad_gamma_beta<U>(part_gamma, part_beta, n2, part_size, grad_gamma, grad_beta); \
}                                                                                 \
extern "C" __global__ void ln_grad_input_##SUFFIX(                                 \
    const U* dy, const U* y, const U* gamma, const U* beta,                       \
    const U* inv_std_var, int n1, int n2, U* dx) {                                \
    grad_input<U>(dy, y, gamma, beta, inv_std_var, n1, n2, dx);                   \
}

LN_GRAD_INSTANTIATE(f32, float)
LN_GRAD_INSTANTIATE(f64, double)
"#;

/// Loaded entry points for one statistics type.
struct StageFunctions {
    part: CudaFunction,
    reduce: CudaFunction,
    input: CudaFunction,
}

impl StageFunctions {
    fn load(module: &Arc<CudaModule>, suffix: &str) -> Result<Self> {
        let load = |stage: &str| {
            let name = format!("ln_grad_{stage}_{suffix}");
            module.load_function(&name).map_err(|e| KernelError::GpuError {
                reason: format!("Failed to load {name}: {e:?}"),
            })
        };
        Ok(Self { part: load("part")?, reduce: load("reduce")?, input: load("input")? })
    }
}

/// CUDA provider for all three type pairs.
pub struct CudaLayerNormGrad {
    _ctx: Arc<CudaContext>,
    stream: Arc<CudaStream>,
    _module: Arc<CudaModule>,
    f32_stages: StageFunctions,
    f64_stages: StageFunctions,
    device: DeviceProperties,
}

impl CudaLayerNormGrad {
    pub fn new() -> Result<Self> {
        Self::new_with_device(0)
    }

    pub fn new_with_device(device_id: usize) -> Result<Self> {
        log::info!("Initializing CUDA layer-norm grad provider on device {device_id}");

        let ctx = CudaContext::new(device_id).map_err(|e| KernelError::GpuError {
            reason: format!("Failed to create CUDA context for device {device_id}: {e:?}"),
        })?;
        let stream = ctx.default_stream();

        let ptx = compile_ptx(LAYER_NORM_GRAD_KERNEL_SRC).map_err(|e| KernelError::GpuError {
            reason: format!("Failed to compile PTX: {e:?}"),
        })?;
        let module = ctx.load_module(ptx).map_err(|e| KernelError::GpuError {
            reason: format!("Failed to load CUDA module: {e:?}"),
        })?;
        let f32_stages = StageFunctions::load(&module, "f32")?;
        let f64_stages = StageFunctions::load(&module, "f64")?;

        let device = Self::query_device_properties(&ctx, device_id)?;
        log::info!("CUDA device properties: {device:?}");

        Ok(Self { _ctx: ctx, stream, _module: module, f32_stages, f64_stages, device })
    }

    fn query_device_properties(ctx: &Arc<CudaContext>, device_id: usize) -> Result<DeviceProperties> {
        let attr = |a: CUdevice_attribute| -> Result<u32> {
            let v = ctx.attribute(a).map_err(|e| KernelError::GpuError {
                reason: format!("Failed to query {a:?}: {e:?}"),
            })?;
            Ok(v.max(0) as u32)
        };
        Ok(DeviceProperties {
            device_id,
            name: format!("CUDA Device {device_id}"),
            warp_size: attr(CUdevice_attribute::CU_DEVICE_ATTRIBUTE_WARP_SIZE)?,
            max_threads_per_block: attr(CUdevice_attribute::CU_DEVICE_ATTRIBUTE_MAX_THREADS_PER_BLOCK)?,
            max_grid_size: [
                attr(CUdevice_attribute::CU_DEVICE_ATTRIBUTE_MAX_GRID_DIM_X)?,
                attr(CUdevice_attribute::CU_DEVICE_ATTRIBUTE_MAX_GRID_DIM_Y)?,
                attr(CUdevice_attribute::CU_DEVICE_ATTRIBUTE_MAX_GRID_DIM_Z)?,
            ],
            multiprocessor_count: attr(CUdevice_attribute::CU_DEVICE_ATTRIBUTE_MULTIPROCESSOR_COUNT)?,
            max_shared_memory_per_block: attr(
                CUdevice_attribute::CU_DEVICE_ATTRIBUTE_MAX_SHARED_MEMORY_PER_BLOCK,
            )? as usize,
        })
    }

    /// Properties queried from the driver at construction.
    pub fn device_properties(&self) -> &DeviceProperties {
        &self.device
    }

    /// Host snapshots (warp size 1) carry no GPU geometry; use the queried one.
    fn launch_properties<'a>(&'a self, device: &'a DeviceProperties) -> &'a DeviceProperties {
        if device.warp_size > 1 { device } else { &self.device }
    }

    fn run<U>(
        &self,
        stages: &StageFunctions,
        device: &DeviceProperties,
        args: LayerNormGradArgs<'_, U, U>,
    ) -> Result<()>
    where
        U: StatElement + GradElement<U> + DeviceRepr + ValidAsZeroBits,
    {
        args.validate()?;
        let LayerNormGradArgs {
            y_grad,
            y,
            scale,
            bias,
            inv_std_var,
            n1,
            n2,
            x_grad,
            scale_grad,
            bias_grad,
            part_grad_gamma,
            part_grad_beta,
            part_size,
        } = args;
        let scratch = part_size * n2;

        if n1 == 0 || n2 == 0 {
            part_grad_gamma[..scratch].fill(U::zero());
            part_grad_beta[..scratch].fill(U::zero());
            scale_grad.fill(U::zero());
            bias_grad.fill(U::zero());
            return Ok(());
        }

        let plan = LaunchPlan::new(self.launch_properties(device), n1, n2, part_size, size_of::<U>())?;
        let n1_arg = to_i32("n1", n1)?;
        let n2_arg = to_i32("n2", n2)?;
        let part_size_arg = to_i32("part_size", part_size)?;
        let rows_arg = to_i32("rows_per_part", plan.rows_per_part)?;
        to_i32("n1 * n2", n1 * n2)?;

        log::debug!(
            "Launching CUDA layer-norm grad: n1={n1}, n2={n2}, part_size={part_size}, part grid={:?}, input grid={:?} block={:?}",
            plan.part.grid,
            plan.input.grid,
            plan.input.block
        );

        let dy_dev = self.upload(y_grad, "y_grad")?;
        let y_dev = self.upload(y, "y")?;
        let gamma_dev = self.upload(scale, "scale")?;
        let beta_dev = self.upload(bias, "bias")?;
        let inv_std_dev = self.upload(inv_std_var, "inv_std_var")?;

        let mut part_gamma_dev: CudaSlice<U> = self.alloc(scratch, "part_grad_gamma")?;
        let mut part_beta_dev: CudaSlice<U> = self.alloc(scratch, "part_grad_beta")?;
        let mut grad_gamma_dev: CudaSlice<U> = self.alloc(n2, "scale_grad")?;
        let mut grad_beta_dev: CudaSlice<U> = self.alloc(n2, "bias_grad")?;
        let mut dx_dev: CudaSlice<U> = self.alloc(n1 * n2, "x_grad")?;

        {
            let mut builder = self.stream.launch_builder(&stages.part);
            builder.arg(&dy_dev);
            builder.arg(&y_dev);
            builder.arg(&gamma_dev);
            builder.arg(&beta_dev);
            builder.arg(&n1_arg);
            builder.arg(&n2_arg);
            builder.arg(&rows_arg);
            builder.arg(&mut part_gamma_dev);
            builder.arg(&mut part_beta_dev);
            unsafe { builder.launch(launch_config(plan.part)) }.map_err(|e| KernelError::GpuError {
                reason: format!("Failed to launch partial gamma/beta kernel: {e:?}"),
            })?;
        }

        {
            let mut builder = self.stream.launch_builder(&stages.reduce);
            builder.arg(&part_gamma_dev);
            builder.arg(&part_beta_dev);
            builder.arg(&n2_arg);
            builder.arg(&part_size_arg);
            builder.arg(&mut grad_gamma_dev);
            builder.arg(&mut grad_beta_dev);
            unsafe { builder.launch(launch_config(plan.reduce)) }.map_err(|e| KernelError::GpuError {
                reason: format!("Failed to launch gamma/beta reduction kernel: {e:?}"),
            })?;
        }

        {
            let mut builder = self.stream.launch_builder(&stages.input);
            builder.arg(&dy_dev);
            builder.arg(&y_dev);
            builder.arg(&gamma_dev);
            builder.arg(&beta_dev);
            builder.arg(&inv_std_dev);
            builder.arg(&n1_arg);
            builder.arg(&n2_arg);
            builder.arg(&mut dx_dev);
            unsafe { builder.launch(launch_config(plan.input)) }.map_err(|e| KernelError::GpuError {
                reason: format!("Failed to launch input gradient kernel: {e:?}"),
            })?;
        }

        self.stream.synchronize().map_err(|e| KernelError::GpuError {
            reason: format!("CUDA stream synchronization failed: {e:?}"),
        })?;

        x_grad.copy_from_slice(&self.download(&dx_dev, "x_grad")?);
        scale_grad.copy_from_slice(&self.download(&grad_gamma_dev, "scale_grad")?);
        bias_grad.copy_from_slice(&self.download(&grad_beta_dev, "bias_grad")?);
        part_grad_gamma[..scratch].copy_from_slice(&self.download(&part_gamma_dev, "part_grad_gamma")?);
        part_grad_beta[..scratch].copy_from_slice(&self.download(&part_beta_dev, "part_grad_beta")?);
        Ok(())
    }

    /// `(f16, f32)`: widen to `f32`, run the `f32` kernels, narrow back.
    fn run_widened(&self, device: &DeviceProperties, args: LayerNormGradArgs<'_, f16, f32>) -> Result<()> {
        args.validate()?;
        let widen = |s: &[f16]| s.iter().map(|v| v.to_f32()).collect::<Vec<f32>>();
        let y_grad = widen(args.y_grad);
        let y = widen(args.y);
        let scale = widen(args.scale);
        let bias = widen(args.bias);
        let mut x_grad = vec![0.0_f32; args.x_grad.len()];
        let mut scale_grad = vec![0.0_f32; args.scale_grad.len()];
        let mut bias_grad = vec![0.0_f32; args.bias_grad.len()];

        self.run(
            &self.f32_stages,
            device,
            LayerNormGradArgs {
                y_grad: &y_grad,
                y: &y,
                scale: &scale,
                bias: &bias,
                inv_std_var: args.inv_std_var,
                n1: args.n1,
                n2: args.n2,
                x_grad: &mut x_grad,
                scale_grad: &mut scale_grad,
                bias_grad: &mut bias_grad,
                part_grad_gamma: args.part_grad_gamma,
                part_grad_beta: args.part_grad_beta,
                part_size: args.part_size,
            },
        )?;

        narrow_into(&x_grad, args.x_grad);
        narrow_into(&scale_grad, args.scale_grad);
        narrow_into(&bias_grad, args.bias_grad);
        Ok(())
    }

    fn upload<U: DeviceRepr>(&self, host: &[U], what: &str) -> Result<CudaSlice<U>> {
        Ok(self.stream.memcpy_stod(host).map_err(|e| KernelError::GpuError {
            reason: format!("Failed to transfer {what} to device: {e:?}"),
        })?)
    }

    fn alloc<U: DeviceRepr + ValidAsZeroBits>(&self, len: usize, what: &str) -> Result<CudaSlice<U>> {
        Ok(self.stream.alloc_zeros(len).map_err(|e| KernelError::GpuError {
            reason: format!("Failed to allocate {what} on device: {e:?}"),
        })?)
    }

    fn download<U: DeviceRepr + Default + Clone>(&self, dev: &CudaSlice<U>, what: &str) -> Result<Vec<U>> {
        Ok(self.stream.memcpy_dtov(dev).map_err(|e| KernelError::GpuError {
            reason: format!("Failed to transfer {what} back: {e:?}"),
        })?)
    }
}

impl LayerNormGradProvider for CudaLayerNormGrad {
    fn name(&self) -> &'static str {
        "cuda"
    }

    fn backend(&self) -> KernelBackend {
        KernelBackend::Cuda
    }

    fn is_available(&self) -> bool {
        true
    }

    fn layer_norm_grad(&self, device: &DeviceProperties, args: GradArgs<'_>) -> Result<()> {
        match args {
            GradArgs::F32F32(a) => self.run(&self.f32_stages, device, a),
            GradArgs::F64F64(a) => self.run(&self.f64_stages, device, a),
            GradArgs::F16F32(a) => self.run_widened(device, a),
        }
    }
}

fn launch_config(dims: LaunchDims) -> LaunchConfig {
    LaunchConfig { grid_dim: dims.grid, block_dim: dims.block, shared_mem_bytes: dims.shared_mem_bytes }
}

fn narrow_into(src: &[f32], dst: &mut [f16]) {
    for (d, &s) in dst.iter_mut().zip(src) {
        *d = f16::from_f32(s);
    }
}

fn to_i32(what: &str, v: usize) -> Result<i32> {
    Ok(i32::try_from(v).map_err(|_| KernelError::InvalidArguments {
        reason: format!("{what} = {v} exceeds the CUDA kernel index range"),
    })?)
}
