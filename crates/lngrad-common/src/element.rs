//! Element types and the `(T, U)` type pairs the operator is registered for.
//!
//! `T` is the primary element type of gradients, activations and affine
//! parameters. `U` is the statistics type used for the cached inverse
//! standard deviation and every accumulation. Only three pairs exist:
//! `(f32, f32)`, `(f64, f64)` and `(f16, f32)`.

use std::fmt;
use std::ops::{Add, AddAssign, Div, Mul, Sub};

use half::f16;
use serde::{Deserialize, Serialize};

use crate::tensor::TensorData;

/// Runtime element type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DType {
    F32,
    F64,
    F16,
}

impl DType {
    /// Canonical type name used in kernel identities.
    pub fn name(self) -> &'static str {
        match self {
            DType::F32 => "float",
            DType::F64 => "double",
            DType::F16 => "MLFloat16",
        }
    }

    pub fn size_in_bytes(self) -> usize {
        match self {
            DType::F32 => 4,
            DType::F64 => 8,
            DType::F16 => 2,
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A `(T, U)` element-type pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TypePair {
    pub t: DType,
    pub u: DType,
}

impl TypePair {
    pub const F32_F32: TypePair = TypePair { t: DType::F32, u: DType::F32 };
    pub const F64_F64: TypePair = TypePair { t: DType::F64, u: DType::F64 };
    pub const F16_F32: TypePair = TypePair { t: DType::F16, u: DType::F32 };

    /// All registered specializations, in registration order.
    pub const SUPPORTED: [TypePair; 3] = [Self::F32_F32, Self::F64_F64, Self::F16_F32];

    pub const fn new(t: DType, u: DType) -> Self {
        TypePair { t, u }
    }

    pub fn is_supported(self) -> bool {
        Self::SUPPORTED.contains(&self)
    }
}

impl fmt::Display for TypePair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.t, self.u)
    }
}

/// A scalar that can live in a [`TensorData`] buffer.
pub trait TensorElement: Copy + Default + Send + Sync + fmt::Debug + 'static {
    const DTYPE: DType;

    fn slice(data: &TensorData) -> Option<&[Self]>;
    fn slice_mut(data: &mut TensorData) -> Option<&mut [Self]>;
    fn into_data(values: Vec<Self>) -> TensorData;
}

macro_rules! impl_tensor_element {
    ($ty:ty, $variant:ident) => {
        impl TensorElement for $ty {
            const DTYPE: DType = DType::$variant;

            fn slice(data: &TensorData) -> Option<&[Self]> {
                match data {
                    TensorData::$variant(v) => Some(v.as_slice()),
                    _ => None,
                }
            }

            fn slice_mut(data: &mut TensorData) -> Option<&mut [Self]> {
                match data {
                    TensorData::$variant(v) => Some(v.as_mut_slice()),
                    _ => None,
                }
            }

            fn into_data(values: Vec<Self>) -> TensorData {
                TensorData::$variant(values)
            }
        }
    };
}

impl_tensor_element!(f32, F32);
impl_tensor_element!(f64, F64);
impl_tensor_element!(f16, F16);

/// Statistics / accumulation type `U`.
pub trait StatElement:
    TensorElement
    + PartialOrd
    + Add<Output = Self>
    + Sub<Output = Self>
    + Mul<Output = Self>
    + Div<Output = Self>
    + AddAssign
{
    fn zero() -> Self;
    fn from_usize(n: usize) -> Self;
    fn from_f64(v: f64) -> Self;
    fn to_f64(self) -> f64;
}

impl StatElement for f32 {
    fn zero() -> Self {
        0.0
    }
    fn from_usize(n: usize) -> Self {
        n as f32
    }
    fn from_f64(v: f64) -> Self {
        v as f32
    }
    fn to_f64(self) -> f64 {
        self as f64
    }
}

impl StatElement for f64 {
    fn zero() -> Self {
        0.0
    }
    fn from_usize(n: usize) -> Self {
        n as f64
    }
    fn from_f64(v: f64) -> Self {
        v
    }
    fn to_f64(self) -> f64 {
        self
    }
}

/// Primary element type `T` paired with statistics type `U`.
///
/// Implemented only for the registered pairs, so `LayerNormGrad<f64, f32>`
/// and friends fail to compile.
pub trait GradElement<U: StatElement>: TensorElement {
    fn widen(self) -> U;
    fn narrow(value: U) -> Self;

    fn type_pair() -> TypePair {
        TypePair::new(Self::DTYPE, U::DTYPE)
    }
}

impl GradElement<f32> for f32 {
    #[inline]
    fn widen(self) -> f32 {
        self
    }
    #[inline]
    fn narrow(value: f32) -> Self {
        value
    }
}

impl GradElement<f64> for f64 {
    #[inline]
    fn widen(self) -> f64 {
        self
    }
    #[inline]
    fn narrow(value: f64) -> Self {
        value
    }
}

impl GradElement<f32> for f16 {
    #[inline]
    fn widen(self) -> f32 {
        self.to_f32()
    }
    #[inline]
    fn narrow(value: f32) -> Self {
        f16::from_f32(value)
    }
}
