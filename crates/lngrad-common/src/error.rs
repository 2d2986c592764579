//! Error types for the layer-norm gradient operator

use crate::element::DType;
use thiserror::Error;

/// Result alias used across the workspace.
pub type Result<T> = std::result::Result<T, LnGradError>;

/// Top-level error.
#[derive(Error, Debug)]
pub enum LnGradError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("execution context error: {0}")]
    Context(#[from] ContextError),
    #[error("kernel error: {0}")]
    Kernel(#[from] KernelError),
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),
    #[error("config file error: {0}")]
    ConfigFile(#[from] crate::config::ConfigFileError),
}

impl LnGradError {
    /// Configuration errors abort graph construction; they are never retried.
    pub fn is_configuration(&self) -> bool {
        matches!(self, LnGradError::Config(_) | LnGradError::ConfigFile(_))
    }
}

/// Operator build-time and shape-split configuration errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("required attribute '{name}' is missing")]
    MissingAttribute { name: String },
    #[error("attribute '{name}' is malformed: expected {expected}, found {found}")]
    MalformedAttribute { name: String, expected: &'static str, found: String },
    #[error("axis {axis} is out of range for rank {rank}")]
    InvalidAxis { axis: i64, rank: usize },
    #[error("n2 should not be 1 (axis {axis} of shape {shape:?} normalizes a single element)")]
    DegenerateNormalization { axis: usize, shape: Vec<usize> },
}

/// Errors raised while binding tensors from the execution context.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ContextError {
    #[error("input {index} is missing")]
    MissingInput { index: usize },
    #[error("output {index} is out of range ({count} outputs)")]
    OutputOutOfRange { index: usize, count: usize },
    #[error("output {index} was not allocated")]
    OutputNotAllocated { index: usize },
    #[error("output {index} was already allocated")]
    OutputAlreadyAllocated { index: usize },
    #[error("{name}: expected element type {expected}, found {found}")]
    DTypeMismatch { name: &'static str, expected: DType, found: DType },
    #[error("{name}: shape mismatch: {reason}")]
    ShapeMismatch { name: &'static str, reason: String },
    #[error("scratch allocation of {len} {dtype} elements failed: {reason}")]
    ScratchAllocation { dtype: DType, len: usize, reason: String },
}

/// Errors reported by device-math providers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KernelError {
    #[error("invalid kernel arguments: {reason}")]
    InvalidArguments { reason: String },
    #[error("GPU error: {reason}")]
    GpuError { reason: String },
    #[error("kernel execution failed: {reason}")]
    ExecutionFailed { reason: String },
    #[error("no kernel provider available")]
    NoProvider,
}

/// Errors raised by the kernel registry.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("kernel '{name}' is already registered")]
    Duplicate { name: String },
    #[error("no kernel registered for {op_type} (domain '{domain}', version {version}) with {bindings}")]
    NoMatch { op_type: String, domain: String, version: u32, bindings: String },
}
