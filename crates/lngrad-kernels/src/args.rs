//! Typed argument bundles handed to device-math providers.
//!
//! [`LayerNormGradArgs`] carries every slice of one backward invocation for a
//! concrete `(T, U)` pair. Providers are object safe, so the adapter erases the
//! pair into [`GradArgs`], an enumerated dispatch table with one variant per
//! registered specialization.

use half::f16;
use lngrad_common::{GradElement, KernelError, StatElement, TypePair};

/// All buffers and extents of one layer-norm backward invocation.
#[derive(Debug)]
pub struct LayerNormGradArgs<'a, T, U> {
    /// Upstream gradient `dY`, `n1 * n2` elements.
    pub y_grad: &'a [T],
    /// Forward output `Y`, `n1 * n2` elements.
    pub y: &'a [T],
    /// Scale (gamma), `n2` elements.
    pub scale: &'a [T],
    /// Bias (beta), `n2` elements.
    pub bias: &'a [T],
    /// Per-row inverse standard deviation, `n1` elements.
    pub inv_std_var: &'a [U],
    pub n1: usize,
    pub n2: usize,
    /// Gradient with respect to the forward input, `n1 * n2` elements.
    pub x_grad: &'a mut [T],
    pub scale_grad: &'a mut [T],
    pub bias_grad: &'a mut [T],
    /// Stage-one scratch, at least `part_size * n2` elements.
    pub part_grad_gamma: &'a mut [U],
    pub part_grad_beta: &'a mut [U],
    pub part_size: usize,
}

impl<T: GradElement<U>, U: StatElement> LayerNormGradArgs<'_, T, U> {
    pub fn type_pair(&self) -> TypePair {
        T::type_pair()
    }

    /// Check every slice length against `(n1, n2, part_size)`.
    pub fn validate(&self) -> Result<(), KernelError> {
        let elements = self.n1.checked_mul(self.n2).ok_or_else(|| invalid(format!(
            "n1 * n2 overflows: {} * {}",
            self.n1, self.n2
        )))?;
        if self.part_size == 0 {
            return Err(invalid("part_size must be > 0".into()));
        }
        let scratch = self.part_size.checked_mul(self.n2).ok_or_else(|| invalid(format!(
            "part_size * n2 overflows: {} * {}",
            self.part_size, self.n2
        )))?;

        expect_len("y_grad", self.y_grad.len(), elements)?;
        expect_len("y", self.y.len(), elements)?;
        expect_len("x_grad", self.x_grad.len(), elements)?;
        expect_len("scale", self.scale.len(), self.n2)?;
        expect_len("bias", self.bias.len(), self.n2)?;
        expect_len("scale_grad", self.scale_grad.len(), self.n2)?;
        expect_len("bias_grad", self.bias_grad.len(), self.n2)?;
        expect_len("inv_std_var", self.inv_std_var.len(), self.n1)?;
        if self.part_grad_gamma.len() < scratch {
            return Err(invalid(format!(
                "part_grad_gamma length {} < part_size * n2 = {scratch}",
                self.part_grad_gamma.len()
            )));
        }
        if self.part_grad_beta.len() < scratch {
            return Err(invalid(format!(
                "part_grad_beta length {} < part_size * n2 = {scratch}",
                self.part_grad_beta.len()
            )));
        }
        Ok(())
    }
}

fn invalid(reason: String) -> KernelError {
    KernelError::InvalidArguments { reason }
}

fn expect_len(name: &str, actual: usize, expected: usize) -> Result<(), KernelError> {
    if actual != expected {
        return Err(invalid(format!("{name} length {actual} != expected {expected}")));
    }
    Ok(())
}

/// Type-erased invocation, one variant per registered pair.
#[derive(Debug)]
pub enum GradArgs<'a> {
    F32F32(LayerNormGradArgs<'a, f32, f32>),
    F64F64(LayerNormGradArgs<'a, f64, f64>),
    F16F32(LayerNormGradArgs<'a, f16, f32>),
}

impl GradArgs<'_> {
    pub fn type_pair(&self) -> TypePair {
        match self {
            GradArgs::F32F32(_) => TypePair::F32_F32,
            GradArgs::F64F64(_) => TypePair::F64_F64,
            GradArgs::F16F32(_) => TypePair::F16_F32,
        }
    }

    /// `(n1, n2)` split of the invocation.
    pub fn extents(&self) -> (usize, usize) {
        match self {
            GradArgs::F32F32(a) => (a.n1, a.n2),
            GradArgs::F64F64(a) => (a.n1, a.n2),
            GradArgs::F16F32(a) => (a.n1, a.n2),
        }
    }

    pub fn part_size(&self) -> usize {
        match self {
            GradArgs::F32F32(a) => a.part_size,
            GradArgs::F64F64(a) => a.part_size,
            GradArgs::F16F32(a) => a.part_size,
        }
    }

    pub fn validate(&self) -> Result<(), KernelError> {
        match self {
            GradArgs::F32F32(a) => a.validate(),
            GradArgs::F64F64(a) => a.validate(),
            GradArgs::F16F32(a) => a.validate(),
        }
    }
}

/// A `(T, U)` pair that can be erased into [`GradArgs`].
pub trait KernelElement<U: StatElement>: GradElement<U> {
    fn erase(args: LayerNormGradArgs<'_, Self, U>) -> GradArgs<'_>;
}

impl KernelElement<f32> for f32 {
    fn erase(args: LayerNormGradArgs<'_, f32, f32>) -> GradArgs<'_> {
        GradArgs::F32F32(args)
    }
}

impl KernelElement<f64> for f64 {
    fn erase(args: LayerNormGradArgs<'_, f64, f64>) -> GradArgs<'_> {
        GradArgs::F64F64(args)
    }
}

impl KernelElement<f32> for f16 {
    fn erase(args: LayerNormGradArgs<'_, f16, f32>) -> GradArgs<'_> {
        GradArgs::F16F32(args)
    }
}
