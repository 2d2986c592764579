//! `LayerNormalizationGrad` operator for host execution engines
//!
//! The operator binds five inputs from an [`OpKernelContext`], splits the
//! forward output around the normalized axis, allocates the partial-reduction
//! scratch and hands everything to a [`lngrad_kernels::LayerNormGradProvider`]
//! selected by the [`lngrad_kernels::KernelManager`].
//!
//! ```no_run
//! use lngrad_common::Tensor;
//! use lngrad_ops::{AttributeValue, HostOpContext, LayerNormGrad, OpKernelInfo};
//!
//! # fn main() -> lngrad_common::Result<()> {
//! let info = OpKernelInfo::new().with_attr("axis", AttributeValue::Int(-1));
//! let op = LayerNormGrad::<f32, f32>::new(&info)?;
//!
//! let mut ctx = HostOpContext::with_inputs(
//!     vec![
//!         Tensor::from_vec([1, 4], vec![1.0_f32, 0.0, 0.0, 0.0])?,
//!         Tensor::from_vec([1, 4], vec![-1.3416_f32, -0.4472, 0.4472, 1.3416])?,
//!         Tensor::from_vec([4], vec![1.0_f32; 4])?,
//!         Tensor::from_vec([4], vec![0.0_f32; 4])?,
//!         Tensor::from_vec([1], vec![0.8944_f32])?,
//!     ],
//!     3,
//! );
//! op.compute(&mut ctx)?;
//! # Ok(())
//! # }
//! ```

pub mod attributes;
pub mod context;
pub mod layer_norm_grad;
pub mod registry;

pub use attributes::{AttributeValue, OpKernelInfo};
pub use context::{HostOpContext, KernelIo, OpKernelContext, ScratchRecord};
pub use layer_norm_grad::{LayerNormGrad, OpKernel, ShapeSplit};
pub use registry::{
    KernelCreateFn, KernelDef, KernelKey, KernelRegistry, NodeSpec, register_layer_norm_grad_kernels,
};
