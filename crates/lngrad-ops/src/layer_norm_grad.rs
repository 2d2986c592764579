//! `LayerNormalizationGrad` operator adapter.
//!
//! Inputs, bound positionally:
//!
//! | index | name          | type | shape            |
//! |-------|---------------|------|------------------|
//! | 0     | `Y_grad`      | `T`  | shape of `Y`     |
//! | 1     | `Y`           | `T`  | `[.., n2 dims]`  |
//! | 2     | `scale`       | `T`  | `n2` elements    |
//! | 3     | `bias`        | `T`  | `n2` elements    |
//! | 4     | `inv_std_var` | `U`  | `n1` elements    |
//!
//! Outputs: `X_grad` (shape of `Y`), `scale_grad` and `bias_grad` (shape of
//! `scale`).

use std::marker::PhantomData;
use std::sync::Arc;

use lngrad_common::{
    ConfigError, ContextError, GradKernelConfig, KernelBackend, Result, StatElement, Tensor,
    TensorData, TensorElement, TensorShape, TypePair, handle_negative_axis,
};
use lngrad_kernels::{KernelElement, KernelManager, LayerNormGradArgs};

use crate::attributes::OpKernelInfo;
use crate::context::OpKernelContext;

pub const INPUT_Y_GRAD: usize = 0;
pub const INPUT_Y: usize = 1;
pub const INPUT_SCALE: usize = 2;
pub const INPUT_BIAS: usize = 3;
pub const INPUT_INV_STD_VAR: usize = 4;

pub const OUTPUT_X_GRAD: usize = 0;
pub const OUTPUT_SCALE_GRAD: usize = 1;
pub const OUTPUT_BIAS_GRAD: usize = 2;

/// A constructed operator kernel.
pub trait OpKernel: Send + Sync {
    fn type_pair(&self) -> TypePair;
    fn compute(&self, ctx: &mut dyn OpKernelContext) -> Result<()>;
}

/// The `(n1, n2)` split of a tensor around a normalized axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShapeSplit {
    pub axis: usize,
    pub n1: usize,
    pub n2: usize,
}

impl ShapeSplit {
    /// Normalize `axis` against `shape` and split it, rejecting `n2 == 1`.
    pub fn new(shape: &TensorShape, axis: i64) -> std::result::Result<Self, ConfigError> {
        let axis = handle_negative_axis(axis, shape.rank())?;
        let split = Self { axis, n1: shape.size_to_dimension(axis), n2: shape.size_from_dimension(axis) };
        if split.n2 == 1 {
            return Err(ConfigError::DegenerateNormalization { axis, shape: shape.dims().to_vec() });
        }
        Ok(split)
    }
}

/// Layer-norm backward for one `(T, U)` pair.
pub struct LayerNormGrad<T, U> {
    axis: i64,
    part_size: usize,
    backend: Option<KernelBackend>,
    manager: Arc<KernelManager>,
    _types: PhantomData<fn() -> (T, U)>,
}

impl<T: KernelElement<U>, U: StatElement> LayerNormGrad<T, U> {
    /// Build with the default configuration and the process-wide provider set.
    pub fn new(info: &OpKernelInfo) -> Result<Self> {
        Self::with_config(info, &GradKernelConfig::default(), KernelManager::shared())
    }

    /// Build against an explicit configuration and provider manager.
    pub fn with_config(
        info: &OpKernelInfo,
        config: &GradKernelConfig,
        manager: Arc<KernelManager>,
    ) -> Result<Self> {
        let axis = info.attr_i64("axis")?;
        config.validate()?;
        Ok(Self { axis, part_size: config.part_size, backend: None, manager, _types: PhantomData })
    }

    /// Restrict execution to providers on `backend`.
    pub fn on_backend(mut self, backend: KernelBackend) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Backend this kernel is bound to; `None` runs on the best available provider.
    pub fn backend(&self) -> Option<KernelBackend> {
        self.backend
    }

    pub fn axis(&self) -> i64 {
        self.axis
    }

    pub fn part_size(&self) -> usize {
        self.part_size
    }

    fn bind_input<'t, E: TensorElement>(
        ctx: &'t dyn OpKernelContext,
        index: usize,
        name: &'static str,
    ) -> std::result::Result<&'t Tensor, ContextError> {
        let tensor = ctx.input(index)?;
        if tensor.dtype() != E::DTYPE {
            return Err(ContextError::DTypeMismatch { name, expected: E::DTYPE, found: tensor.dtype() });
        }
        Ok(tensor)
    }

    /// Validate the five inputs and derive the split and output shapes.
    fn plan(&self, ctx: &dyn OpKernelContext) -> Result<(ShapeSplit, TensorShape, TensorShape)> {
        let y_grad = Self::bind_input::<T>(ctx, INPUT_Y_GRAD, "Y_grad")?;
        let y = Self::bind_input::<T>(ctx, INPUT_Y, "Y")?;
        let scale = Self::bind_input::<T>(ctx, INPUT_SCALE, "scale")?;
        let bias = Self::bind_input::<T>(ctx, INPUT_BIAS, "bias")?;
        let inv_std_var = Self::bind_input::<U>(ctx, INPUT_INV_STD_VAR, "inv_std_var")?;

        let split = ShapeSplit::new(y.shape(), self.axis)?;

        if y_grad.shape() != y.shape() {
            return Err(shape_mismatch("Y_grad", format!("{} != Y shape {}", y_grad.shape(), y.shape())));
        }
        if scale.len() != split.n2 {
            return Err(shape_mismatch("scale", format!("{} elements, expected n2 = {}", scale.len(), split.n2)));
        }
        if bias.shape() != scale.shape() {
            return Err(shape_mismatch("bias", format!("{} != scale shape {}", bias.shape(), scale.shape())));
        }
        if inv_std_var.len() != split.n1 {
            return Err(shape_mismatch(
                "inv_std_var",
                format!("{} elements, expected n1 = {}", inv_std_var.len(), split.n1),
            ));
        }
        Ok((split, y.shape().clone(), scale.shape().clone()))
    }

    pub fn compute(&self, ctx: &mut dyn OpKernelContext) -> Result<()> {
        let (split, x_shape, param_shape) = self.plan(&*ctx)?;
        let ShapeSplit { n1, n2, .. } = split;

        ctx.allocate_output(OUTPUT_X_GRAD, &x_shape, T::DTYPE)?;
        ctx.allocate_output(OUTPUT_SCALE_GRAD, &param_shape, T::DTYPE)?;
        ctx.allocate_output(OUTPUT_BIAS_GRAD, &param_shape, T::DTYPE)?;

        let scratch_len = self.part_size.checked_mul(n2).ok_or_else(|| ContextError::ScratchAllocation {
            dtype: U::DTYPE,
            len: usize::MAX,
            reason: format!("part_size {} * n2 {n2} overflows", self.part_size),
        })?;
        let mut part_grad_gamma = ctx.allocate_scratch(U::DTYPE, scratch_len)?;
        let mut part_grad_beta = ctx.allocate_scratch(U::DTYPE, scratch_len)?;

        let device = ctx.device_properties().clone();
        let provider = match self.backend {
            Some(backend) => self.manager.select_for_backend(backend, T::type_pair())?,
            None => self.manager.select_for(T::type_pair())?,
        };
        log::debug!(
            "LayerNormGrad[{}] via {}: n1={n1}, n2={n2}, part_size={}",
            T::type_pair(),
            provider.name(),
            self.part_size
        );

        let io = ctx.io();
        let y_grad = io.input(INPUT_Y_GRAD)?.as_slice::<T>("Y_grad")?;
        let y = io.input(INPUT_Y)?.as_slice::<T>("Y")?;
        let scale = io.input(INPUT_SCALE)?.as_slice::<T>("scale")?;
        let bias = io.input(INPUT_BIAS)?.as_slice::<T>("bias")?;
        let inv_std_var = io.input(INPUT_INV_STD_VAR)?.as_slice::<U>("inv_std_var")?;

        let [x_grad, scale_grad, bias_grad] = allocated_outputs(io.outputs)?;
        let args = LayerNormGradArgs {
            y_grad,
            y,
            scale,
            bias,
            inv_std_var,
            n1,
            n2,
            x_grad: x_grad.as_mut_slice::<T>("X_grad")?,
            scale_grad: scale_grad.as_mut_slice::<T>("scale_grad")?,
            bias_grad: bias_grad.as_mut_slice::<T>("bias_grad")?,
            part_grad_gamma: scratch_slice::<U>(&mut part_grad_gamma, scratch_len)?,
            part_grad_beta: scratch_slice::<U>(&mut part_grad_beta, scratch_len)?,
            part_size: self.part_size,
        };
        provider.layer_norm_grad(&device, T::erase(args))
    }
}

impl<T: KernelElement<U>, U: StatElement> OpKernel for LayerNormGrad<T, U> {
    fn type_pair(&self) -> TypePair {
        T::type_pair()
    }

    fn compute(&self, ctx: &mut dyn OpKernelContext) -> Result<()> {
        LayerNormGrad::compute(self, ctx)
    }
}

fn shape_mismatch(name: &'static str, reason: String) -> lngrad_common::LnGradError {
    ContextError::ShapeMismatch { name, reason }.into()
}

fn allocated_outputs(
    outputs: &mut [Option<Tensor>],
) -> std::result::Result<[&mut Tensor; 3], ContextError> {
    let count = outputs.len();
    match outputs {
        [Some(x_grad), Some(scale_grad), Some(bias_grad), ..] => Ok([x_grad, scale_grad, bias_grad]),
        _ if count < 3 => Err(ContextError::OutputOutOfRange { index: count, count }),
        [x_grad, scale_grad, ..] => {
            let index = if x_grad.is_none() {
                OUTPUT_X_GRAD
            } else if scale_grad.is_none() {
                OUTPUT_SCALE_GRAD
            } else {
                OUTPUT_BIAS_GRAD
            };
            Err(ContextError::OutputNotAllocated { index })
        }
        _ => Err(ContextError::OutputOutOfRange { index: count, count }),
    }
}

fn scratch_slice<U: TensorElement>(
    data: &mut TensorData,
    len: usize,
) -> std::result::Result<&mut [U], ContextError> {
    let found = data.dtype();
    let available = data.len();
    match U::slice_mut(data) {
        Some(s) if s.len() >= len => Ok(s),
        Some(_) => Err(ContextError::ScratchAllocation {
            dtype: U::DTYPE,
            len,
            reason: format!("context returned {available} elements"),
        }),
        None => Err(ContextError::ScratchAllocation {
            dtype: U::DTYPE,
            len,
            reason: format!("context returned {found} storage"),
        }),
    }
}
