//! Common types, errors, and configuration for the layer-norm gradient operator
//!
//! This crate provides the foundational types shared by the kernel providers
//! and the operator adapter: element types and type pairs, the host tensor
//! model, device properties, backend enumeration, and configuration loading.

pub mod config;
pub mod device;
pub mod element;
pub mod error;
pub mod kernel_registry;
pub mod math;
pub mod tensor;

pub use config::{ConfigFileError, GradKernelConfig};
pub use device::DeviceProperties;
pub use element::{DType, GradElement, StatElement, TensorElement, TypePair};
pub use error::*;
pub use kernel_registry::KernelBackend;
pub use math::ceil_div;
pub use tensor::{Tensor, TensorData, TensorShape, handle_negative_axis};
