//! Layer-norm forward reference producing the statistics the backward pass
//! consumes.

use lngrad_common::{GradElement, KernelError, Result, StatElement};

/// Forward outputs saved for the backward pass.
#[derive(Debug, Clone, PartialEq)]
pub struct LayerNormForward<T, U> {
    /// Normalized, scaled and shifted output, same length as the input.
    pub y: Vec<T>,
    /// Per-row mean.
    pub mean: Vec<U>,
    /// Per-row `1 / sqrt(var + eps)`.
    pub inv_std_var: Vec<U>,
}

/// Full layer normalization over rows of `n2` elements.
///
/// Computes `y = (x - mean) * inv_std * gamma + beta` with statistics in `U`.
///
/// # Errors
///
/// Returns [`KernelError::InvalidArguments`] if `n2` is zero, the input is not
/// a whole number of rows, the affine parameters are not `n2` long, or `eps`
/// is not positive and finite.
pub fn layer_norm_forward_cpu<T: GradElement<U>, U: StatElement>(
    x: &[T],
    gamma: &[T],
    beta: &[T],
    n2: usize,
    eps: f64,
) -> Result<LayerNormForward<T, U>> {
    if n2 == 0 {
        return Err(invalid("n2 must be non-zero".into()));
    }
    if x.len() % n2 != 0 {
        return Err(invalid(format!("input length {} is not a multiple of n2 {n2}", x.len())));
    }
    if gamma.len() != n2 || beta.len() != n2 {
        return Err(invalid(format!(
            "gamma/beta lengths {}/{} != n2 {n2}",
            gamma.len(),
            beta.len()
        )));
    }
    if !eps.is_finite() || eps <= 0.0 {
        return Err(invalid(format!("eps must be positive and finite, got {eps}")));
    }

    let n1 = x.len() / n2;
    let n2_u = U::from_usize(n2);
    let mut y = Vec::with_capacity(x.len());
    let mut mean = Vec::with_capacity(n1);
    let mut inv_std_var = Vec::with_capacity(n1);

    for row in x.chunks_exact(n2) {
        let mut sum = U::zero();
        for &v in row {
            sum += v.widen();
        }
        let mu = sum / n2_u;

        let mut var_sum = U::zero();
        for &v in row {
            let d = v.widen() - mu;
            var_sum += d * d;
        }
        let var = var_sum / n2_u;
        let inv_std = U::from_f64(1.0 / (var.to_f64() + eps).sqrt());

        for j in 0..n2 {
            let normed = (row[j].widen() - mu) * inv_std;
            y.push(T::narrow(normed * gamma[j].widen() + beta[j].widen()));
        }
        mean.push(mu);
        inv_std_var.push(inv_std);
    }

    Ok(LayerNormForward { y, mean, inv_std_var })
}

fn invalid(reason: String) -> lngrad_common::LnGradError {
    KernelError::InvalidArguments { reason }.into()
}
