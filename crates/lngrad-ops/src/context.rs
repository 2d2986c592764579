//! Execution context handed to an operator for one invocation.
//!
//! [`OpKernelContext`] is the seam between an operator and the engine that
//! owns tensor memory. [`HostOpContext`] is the in-memory implementation used
//! by tests and by hosts that run the CPU provider directly.

use lngrad_common::{ContextError, DType, DeviceProperties, Tensor, TensorData, TensorShape};

/// Split borrow of a context's tensors: read-only inputs, writable outputs.
#[derive(Debug)]
pub struct KernelIo<'a> {
    pub inputs: &'a [Option<Tensor>],
    pub outputs: &'a mut [Option<Tensor>],
}

impl<'a> KernelIo<'a> {
    pub fn input(&self, index: usize) -> Result<&'a Tensor, ContextError> {
        self.inputs.get(index).and_then(Option::as_ref).ok_or(ContextError::MissingInput { index })
    }
}

/// Services an operator consumes during `compute`.
pub trait OpKernelContext {
    /// Positional input, or `MissingInput` if absent.
    fn input(&self, index: usize) -> Result<&Tensor, ContextError>;

    fn output_count(&self) -> usize;

    /// Allocate output `index` with the given shape and element type.
    fn allocate_output(
        &mut self,
        index: usize,
        shape: &TensorShape,
        dtype: DType,
    ) -> Result<(), ContextError>;

    /// Per-call transient buffer of `len` elements; dropped by the caller.
    fn allocate_scratch(&mut self, dtype: DType, len: usize) -> Result<TensorData, ContextError>;

    fn io(&mut self) -> KernelIo<'_>;

    fn device_properties(&self) -> &DeviceProperties;
}

/// Record of one scratch allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScratchRecord {
    pub dtype: DType,
    pub len: usize,
}

/// In-memory execution context.
#[derive(Debug, Clone)]
pub struct HostOpContext {
    inputs: Vec<Option<Tensor>>,
    outputs: Vec<Option<Tensor>>,
    device: DeviceProperties,
    scratch: Vec<ScratchRecord>,
    scratch_limit_bytes: Option<usize>,
}

impl HostOpContext {
    /// Context with the given inputs and `output_count` unallocated outputs.
    pub fn new(inputs: Vec<Option<Tensor>>, output_count: usize) -> Self {
        Self {
            inputs,
            outputs: vec![None; output_count],
            device: DeviceProperties::host(),
            scratch: Vec::new(),
            scratch_limit_bytes: None,
        }
    }

    /// Context where every input is present.
    pub fn with_inputs(inputs: Vec<Tensor>, output_count: usize) -> Self {
        Self::new(inputs.into_iter().map(Some).collect(), output_count)
    }

    pub fn with_device(mut self, device: DeviceProperties) -> Self {
        self.device = device;
        self
    }

    /// Fail any single scratch request above `bytes`.
    pub fn with_scratch_limit(mut self, bytes: usize) -> Self {
        self.scratch_limit_bytes = Some(bytes);
        self
    }

    pub fn output(&self, index: usize) -> Result<&Tensor, ContextError> {
        match self.outputs.get(index) {
            Some(Some(t)) => Ok(t),
            Some(None) => Err(ContextError::OutputNotAllocated { index }),
            None => Err(ContextError::OutputOutOfRange { index, count: self.outputs.len() }),
        }
    }

    /// Consume the context, returning the outputs in order.
    pub fn into_outputs(self) -> Vec<Option<Tensor>> {
        self.outputs
    }

    /// Scratch allocations made so far, in request order.
    pub fn scratch_allocations(&self) -> &[ScratchRecord] {
        &self.scratch
    }
}

impl OpKernelContext for HostOpContext {
    fn input(&self, index: usize) -> Result<&Tensor, ContextError> {
        self.inputs.get(index).and_then(Option::as_ref).ok_or(ContextError::MissingInput { index })
    }

    fn output_count(&self) -> usize {
        self.outputs.len()
    }

    fn allocate_output(
        &mut self,
        index: usize,
        shape: &TensorShape,
        dtype: DType,
    ) -> Result<(), ContextError> {
        let count = self.outputs.len();
        let slot = self.outputs.get_mut(index).ok_or(ContextError::OutputOutOfRange { index, count })?;
        if slot.is_some() {
            return Err(ContextError::OutputAlreadyAllocated { index });
        }
        *slot = Some(Tensor::zeros(shape.clone(), dtype));
        Ok(())
    }

    fn allocate_scratch(&mut self, dtype: DType, len: usize) -> Result<TensorData, ContextError> {
        let bytes = len.checked_mul(dtype.size_in_bytes()).ok_or_else(|| ContextError::ScratchAllocation {
            dtype,
            len,
            reason: "size overflows usize".into(),
        })?;
        if let Some(limit) = self.scratch_limit_bytes
            && bytes > limit
        {
            return Err(ContextError::ScratchAllocation {
                dtype,
                len,
                reason: format!("{bytes} bytes exceeds the {limit}-byte limit"),
            });
        }
        self.scratch.push(ScratchRecord { dtype, len });
        Ok(TensorData::zeros(dtype, len))
    }

    fn io(&mut self) -> KernelIo<'_> {
        KernelIo { inputs: &self.inputs, outputs: &mut self.outputs }
    }

    fn device_properties(&self) -> &DeviceProperties {
        &self.device
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_input_is_reported_by_index() {
        let ctx = HostOpContext::new(vec![Some(Tensor::zeros([2], DType::F32)), None], 1);
        assert!(ctx.input(0).is_ok());
        assert_eq!(ctx.input(1).unwrap_err(), ContextError::MissingInput { index: 1 });
        assert_eq!(ctx.input(7).unwrap_err(), ContextError::MissingInput { index: 7 });
    }

    #[test]
    fn outputs_are_allocated_once() {
        let mut ctx = HostOpContext::new(Vec::new(), 2);
        let shape = TensorShape::from([3]);
        ctx.allocate_output(1, &shape, DType::F64).unwrap();
        assert_eq!(ctx.output(1).unwrap().dtype(), DType::F64);
        assert_eq!(ctx.output(0).unwrap_err(), ContextError::OutputNotAllocated { index: 0 });
        assert_eq!(
            ctx.allocate_output(1, &shape, DType::F64).unwrap_err(),
            ContextError::OutputAlreadyAllocated { index: 1 }
        );
        assert_eq!(
            ctx.allocate_output(2, &shape, DType::F64).unwrap_err(),
            ContextError::OutputOutOfRange { index: 2, count: 2 }
        );
    }

    #[test]
    fn scratch_requests_are_recorded() {
        let mut ctx = HostOpContext::new(Vec::new(), 0);
        let data = ctx.allocate_scratch(DType::F32, 64).unwrap();
        assert_eq!(data.len(), 64);
        assert_eq!(ctx.scratch_allocations(), &[ScratchRecord { dtype: DType::F32, len: 64 }]);
    }

    #[test]
    fn scratch_limit_rejects_large_requests() {
        let mut ctx = HostOpContext::new(Vec::new(), 0).with_scratch_limit(100);
        assert!(ctx.allocate_scratch(DType::F32, 25).is_ok());
        let err = ctx.allocate_scratch(DType::F64, 25).unwrap_err();
        assert!(matches!(err, ContextError::ScratchAllocation { len: 25, .. }));
        assert_eq!(ctx.scratch_allocations().len(), 1);
    }
}
