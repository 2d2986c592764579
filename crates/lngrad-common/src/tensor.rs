//! Host tensor model: shapes, typed storage, and axis handling

use std::fmt;

use half::f16;

use crate::element::{DType, TensorElement};
use crate::error::{ConfigError, ContextError};

/// Dimensions of a tensor, outermost first.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct TensorShape(Vec<usize>);

impl TensorShape {
    pub fn new(dims: impl Into<Vec<usize>>) -> Self {
        Self(dims.into())
    }

    pub fn dims(&self) -> &[usize] {
        &self.0
    }

    pub fn rank(&self) -> usize {
        self.0.len()
    }

    /// Total element count. A rank-0 shape holds one element.
    pub fn size(&self) -> usize {
        self.0.iter().product()
    }

    /// Product of the dimensions in `[0, dimension)`.
    pub fn size_to_dimension(&self, dimension: usize) -> usize {
        self.0[..dimension.min(self.0.len())].iter().product()
    }

    /// Product of the dimensions in `[dimension, rank)`.
    pub fn size_from_dimension(&self, dimension: usize) -> usize {
        self.0[dimension.min(self.0.len())..].iter().product()
    }
}

impl From<Vec<usize>> for TensorShape {
    fn from(dims: Vec<usize>) -> Self {
        Self(dims)
    }
}

impl From<&[usize]> for TensorShape {
    fn from(dims: &[usize]) -> Self {
        Self(dims.to_vec())
    }
}

impl<const N: usize> From<[usize; N]> for TensorShape {
    fn from(dims: [usize; N]) -> Self {
        Self(dims.to_vec())
    }
}

impl fmt::Display for TensorShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.0)
    }
}

/// Normalize a possibly-negative axis against `rank`.
///
/// Accepts `-rank <= axis < rank`; negative values count from the end.
pub fn handle_negative_axis(axis: i64, rank: usize) -> Result<usize, ConfigError> {
    let rank_i = i64::try_from(rank).map_err(|_| ConfigError::InvalidAxis { axis, rank })?;
    if axis < -rank_i || axis >= rank_i {
        return Err(ConfigError::InvalidAxis { axis, rank });
    }
    let normalized = if axis < 0 { axis + rank_i } else { axis };
    Ok(normalized as usize)
}

/// Typed tensor storage.
#[derive(Debug, Clone, PartialEq)]
pub enum TensorData {
    F32(Vec<f32>),
    F64(Vec<f64>),
    F16(Vec<f16>),
}

impl TensorData {
    /// Zero-filled storage of `len` elements.
    pub fn zeros(dtype: DType, len: usize) -> Self {
        match dtype {
            DType::F32 => TensorData::F32(vec![0.0; len]),
            DType::F64 => TensorData::F64(vec![0.0; len]),
            DType::F16 => TensorData::F16(vec![f16::ZERO; len]),
        }
    }

    pub fn dtype(&self) -> DType {
        match self {
            TensorData::F32(_) => DType::F32,
            TensorData::F64(_) => DType::F64,
            TensorData::F16(_) => DType::F16,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            TensorData::F32(v) => v.len(),
            TensorData::F64(v) => v.len(),
            TensorData::F16(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A shaped, typed host tensor.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    shape: TensorShape,
    data: TensorData,
}

impl Tensor {
    /// Build a tensor, checking the element count against the shape.
    pub fn new(shape: impl Into<TensorShape>, data: TensorData) -> Result<Self, ContextError> {
        let shape = shape.into();
        if shape.size() != data.len() {
            return Err(ContextError::ShapeMismatch {
                name: "tensor",
                reason: format!("shape {shape} holds {} elements, data has {}", shape.size(), data.len()),
            });
        }
        Ok(Self { shape, data })
    }

    pub fn from_vec<E: TensorElement>(
        shape: impl Into<TensorShape>,
        values: Vec<E>,
    ) -> Result<Self, ContextError> {
        Self::new(shape, E::into_data(values))
    }

    pub fn zeros(shape: impl Into<TensorShape>, dtype: DType) -> Self {
        let shape = shape.into();
        let data = TensorData::zeros(dtype, shape.size());
        Self { shape, data }
    }

    pub fn shape(&self) -> &TensorShape {
        &self.shape
    }

    pub fn dtype(&self) -> DType {
        self.data.dtype()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn data(&self) -> &TensorData {
        &self.data
    }

    pub fn into_data(self) -> TensorData {
        self.data
    }

    /// Typed read access; `name` labels the error.
    pub fn as_slice<E: TensorElement>(&self, name: &'static str) -> Result<&[E], ContextError> {
        let found = self.dtype();
        E::slice(&self.data).ok_or(ContextError::DTypeMismatch { name, expected: E::DTYPE, found })
    }

    /// Typed write access; `name` labels the error.
    pub fn as_mut_slice<E: TensorElement>(
        &mut self,
        name: &'static str,
    ) -> Result<&mut [E], ContextError> {
        let found = self.dtype();
        E::slice_mut(&mut self.data)
            .ok_or(ContextError::DTypeMismatch { name, expected: E::DTYPE, found })
    }
}
