//! CPU kernel implementations

pub mod layer_norm;
pub mod layer_norm_grad;

pub use layer_norm::{LayerNormForward, layer_norm_forward_cpu};
pub use layer_norm_grad::{CpuLayerNormGrad, layer_norm_grad_cpu};
