//! Layer-norm backward pass on the CPU.
//!
//! # Strategy
//!
//! The forward output is inverted per element to recover the normalized
//! value, so the original input is never needed:
//!
//!   `x_hat = (y - beta) / gamma`
//!
//! Scale and bias gradients use the same two-stage reduction as the CUDA
//! kernels. Rows are split into `part_size` contiguous segments; each segment
//! accumulates one row of the scratch buffers (stage 1), and stage 2 folds the
//! `part_size` partial rows into the final per-column gradient.
//!
//! The input gradient needs two row-wide reductions of `dxhat = dy * gamma`:
//!
//!   `dx = inv_std / n2 * (n2 * dxhat - sum(dxhat) - x_hat * sum(dxhat * x_hat))`
//!
//! Every accumulation happens in the statistics type `U`.

use lngrad_common::{GradElement, KernelBackend, Result, StatElement, ceil_div};

use crate::args::{GradArgs, LayerNormGradArgs};
use crate::LayerNormGradProvider;
use lngrad_common::DeviceProperties;

/// Pure-Rust reference provider. Always available.
#[derive(Debug, Clone, Copy, Default)]
pub struct CpuLayerNormGrad;

impl LayerNormGradProvider for CpuLayerNormGrad {
    fn name(&self) -> &'static str {
        "cpu-reference"
    }

    fn backend(&self) -> KernelBackend {
        KernelBackend::CpuRust
    }

    fn is_available(&self) -> bool {
        true
    }

    fn layer_norm_grad(&self, _device: &DeviceProperties, args: GradArgs<'_>) -> Result<()> {
        match args {
            GradArgs::F32F32(a) => layer_norm_grad_cpu(a),
            GradArgs::F64F64(a) => layer_norm_grad_cpu(a),
            GradArgs::F16F32(a) => layer_norm_grad_cpu(a),
        }
    }
}

/// Run the full backward pass for one `(T, U)` pair.
pub fn layer_norm_grad_cpu<T: GradElement<U>, U: StatElement>(
    args: LayerNormGradArgs<'_, T, U>,
) -> Result<()> {
    args.validate()?;
    log::debug!(
        "LayerNormGrad CPU: pair={}, n1={}, n2={}, part_size={}",
        args.type_pair(),
        args.n1,
        args.n2,
        args.part_size
    );

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

    compute_part_grad_gamma_beta(
        y_grad,
        y,
        scale,
        bias,
        n1,
        n2,
        part_size,
        part_grad_gamma,
        part_grad_beta,
    );
    compute_grad_gamma_beta(part_grad_gamma, part_grad_beta, n2, part_size, scale_grad, bias_grad);
    compute_grad_input(y_grad, y, scale, bias, inv_std_var, n1, n2, x_grad);
    Ok(())
}

/// Rows covered by partial-accumulator segment `part`.
#[inline]
pub fn part_rows(n1: usize, part_size: usize, part: usize) -> std::ops::Range<usize> {
    let rows_per_part = ceil_div(n1, part_size);
    let begin = (part * rows_per_part).min(n1);
    let end = (begin + rows_per_part).min(n1);
    begin..end
}

#[inline]
fn x_hat<T: GradElement<U>, U: StatElement>(y: T, beta: T, gamma: T) -> U {
    (y.widen() - beta.widen()) / gamma.widen()
}

/// Stage 1: per-segment partial sums into the scratch buffers.
#[allow(clippy::too_many_arguments)]
pub fn compute_part_grad_gamma_beta<T: GradElement<U>, U: StatElement>(
    y_grad: &[T],
    y: &[T],
    scale: &[T],
    bias: &[T],
    n1: usize,
    n2: usize,
    part_size: usize,
    part_grad_gamma: &mut [U],
    part_grad_beta: &mut [U],
) {
    for part in 0..part_size {
        let part_gamma = &mut part_grad_gamma[part * n2..(part + 1) * n2];
        let part_beta = &mut part_grad_beta[part * n2..(part + 1) * n2];
        part_gamma.fill(U::zero());
        part_beta.fill(U::zero());

        for row in part_rows(n1, part_size, part) {
            let offset = row * n2;
            let dy_row = &y_grad[offset..offset + n2];
            let y_row = &y[offset..offset + n2];
            for j in 0..n2 {
                let dy = dy_row[j].widen();
                part_gamma[j] += dy * x_hat::<T, U>(y_row[j], bias[j], scale[j]);
                part_beta[j] += dy;
            }
        }
    }
}

/// Stage 2: fold the partial rows into the final scale/bias gradients.
pub fn compute_grad_gamma_beta<T: GradElement<U>, U: StatElement>(
    part_grad_gamma: &[U],
    part_grad_beta: &[U],
    n2: usize,
    part_size: usize,
    scale_grad: &mut [T],
    bias_grad: &mut [T],
) {
    for j in 0..n2 {
        let mut sum_gamma = U::zero();
        let mut sum_beta = U::zero();
        for part in 0..part_size {
            sum_gamma += part_grad_gamma[part * n2 + j];
            sum_beta += part_grad_beta[part * n2 + j];
        }
        scale_grad[j] = T::narrow(sum_gamma);
        bias_grad[j] = T::narrow(sum_beta);
    }
}

/// Input gradient, one row at a time.
#[allow(clippy::too_many_arguments)]
pub fn compute_grad_input<T: GradElement<U>, U: StatElement>(
    y_grad: &[T],
    y: &[T],
    scale: &[T],
    bias: &[T],
    inv_std_var: &[U],
    n1: usize,
    n2: usize,
    x_grad: &mut [T],
) {
    let n2_u = U::from_usize(n2);
    for row in 0..n1 {
        let offset = row * n2;
        let dy_row = &y_grad[offset..offset + n2];
        let y_row = &y[offset..offset + n2];

        let mut sum_dxhat = U::zero();
        let mut sum_dxhat_xhat = U::zero();
        for j in 0..n2 {
            let dxhat = dy_row[j].widen() * scale[j].widen();
            sum_dxhat += dxhat;
            sum_dxhat_xhat += dxhat * x_hat::<T, U>(y_row[j], bias[j], scale[j]);
        }

        let term = inv_std_var[row] / n2_u;
        let dx_row = &mut x_grad[offset..offset + n2];
        for j in 0..n2 {
            let dxhat = dy_row[j].widen() * scale[j].widen();
            let xh = x_hat::<T, U>(y_row[j], bias[j], scale[j]);
            dx_row[j] = T::narrow((n2_u * dxhat - sum_dxhat - xh * sum_dxhat_xhat) * term);
        }
    }
}
