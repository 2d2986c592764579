//! CUDA providers built on cudarc 0.17

pub mod layer_norm_grad;

pub use layer_norm_grad::{CudaLayerNormGrad, LAYER_NORM_GRAD_KERNEL_SRC};
