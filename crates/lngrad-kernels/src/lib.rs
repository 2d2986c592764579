//! Device-math providers for the layer-norm backward pass

use lngrad_common::{
    DeviceProperties, GradKernelConfig, KernelBackend, KernelError, LnGradError, Result, TypePair,
};
use std::sync::{Arc, OnceLock};

pub mod args;
pub mod cpu;
#[cfg(feature = "cuda")]
pub mod cuda;
pub mod device_features;
pub mod launch;

pub use args::{GradArgs, KernelElement, LayerNormGradArgs};
pub use cpu::{CpuLayerNormGrad, LayerNormForward, layer_norm_forward_cpu, layer_norm_grad_cpu};
pub use launch::{LaunchDims, LaunchPlan};

/// Layer-norm gradient provider trait
pub trait LayerNormGradProvider: Send + Sync {
    fn name(&self) -> &'static str;
    fn backend(&self) -> KernelBackend;
    fn is_available(&self) -> bool;

    /// Whether this provider implements the given `(T, U)` pair.
    fn supports(&self, pair: TypePair) -> bool {
        pair.is_supported()
    }

    /// Compute `X_grad`, `scale_grad` and `bias_grad` for one invocation.
    ///
    /// The partial buffers inside `args` are scratch: they hold the stage-one
    /// partial sums on return and carry no meaning afterwards.
    fn layer_norm_grad(&self, device: &DeviceProperties, args: GradArgs<'_>) -> Result<()>;
}

/// Provider manager with cached selection
pub struct KernelManager {
    providers: Vec<Box<dyn LayerNormGradProvider>>,
    selected: OnceLock<Option<usize>>,
}

impl KernelManager {
    pub fn new() -> Self {
        Self::from_config(&GradKernelConfig::default())
    }

    /// Process-wide manager built from the default configuration.
    ///
    /// Providers are constructed once, so CUDA modules compile once per process.
    pub fn shared() -> Arc<Self> {
        static SHARED: OnceLock<Arc<KernelManager>> = OnceLock::new();
        SHARED.get_or_init(|| Arc::new(Self::new())).clone()
    }

    /// Build the provider list, CUDA first when compiled, present and preferred.
    pub fn from_config(config: &GradKernelConfig) -> Self {
        let mut providers: Vec<Box<dyn LayerNormGradProvider>> = vec![Box::new(CpuLayerNormGrad)];

        if config.prefer_gpu {
            #[cfg(feature = "cuda")]
            {
                if device_features::gpu_available_runtime_on(config.device_index) {
                    match cuda::CudaLayerNormGrad::new_with_device(config.device_index) {
                        Ok(kernel) => {
                            log::info!("CUDA provider available, adding to providers");
                            providers.insert(0, Box::new(kernel));
                        }
                        Err(e) => log::warn!("CUDA provider unavailable: {e}"),
                    }
                } else {
                    log::warn!("GPU preferred but no CUDA device detected");
                }
            }
            #[cfg(not(feature = "cuda"))]
            {
                log::debug!("GPU preferred but CUDA support not compiled in");
            }
        }

        Self::with_providers(providers)
    }

    /// Use an explicit provider list, highest priority first.
    pub fn with_providers(providers: Vec<Box<dyn LayerNormGradProvider>>) -> Self {
        Self { providers, selected: OnceLock::new() }
    }

    /// Select the best available provider with caching
    pub fn select_best(&self) -> Result<&dyn LayerNormGradProvider> {
        let selected = self.selected.get_or_init(|| {
            let idx = self.providers.iter().position(|p| p.is_available());
            match idx {
                Some(i) => log::info!("Selected layer-norm grad provider: {}", self.providers[i].name()),
                None => log::error!("No available layer-norm grad provider found"),
            }
            idx
        });

        selected
            .and_then(|idx| self.providers.get(idx))
            .map(|p| p.as_ref())
            .ok_or(LnGradError::Kernel(KernelError::NoProvider))
    }

    /// First available provider implementing `pair`.
    ///
    /// Prefers the cached selection when it supports the pair.
    pub fn select_for(&self, pair: TypePair) -> Result<&dyn LayerNormGradProvider> {
        if let Ok(best) = self.select_best()
            && best.supports(pair)
        {
            return Ok(best);
        }
        self.providers
            .iter()
            .find(|p| p.is_available() && p.supports(pair))
            .map(|p| p.as_ref())
            .ok_or(LnGradError::Kernel(KernelError::NoProvider))
    }

    /// First available provider on `backend` implementing `pair`.
    ///
    /// Never crosses backends: a missing backend is `NoProvider`.
    pub fn select_for_backend(
        &self,
        backend: KernelBackend,
        pair: TypePair,
    ) -> Result<&dyn LayerNormGradProvider> {
        if let Ok(best) = self.select_best()
            && best.backend() == backend
            && best.supports(pair)
        {
            return Ok(best);
        }
        self.providers
            .iter()
            .find(|p| p.backend() == backend && p.is_available() && p.supports(pair))
            .map(|p| p.as_ref())
            .ok_or_else(|| {
                log::debug!("No {backend} provider for {pair}");
                LnGradError::Kernel(KernelError::NoProvider)
            })
    }

    /// Get the name of the currently selected provider
    pub fn selected_provider_name(&self) -> Option<&'static str> {
        self.selected
            .get()
            .copied()
            .flatten()
            .and_then(|idx| self.providers.get(idx))
            .map(|p| p.name())
    }

    /// List all available providers
    pub fn list_available_providers(&self) -> Vec<&'static str> {
        self.providers.iter().filter(|p| p.is_available()).map(|p| p.name()).collect()
    }

    /// Force reselection (for testing)
    #[cfg(test)]
    pub fn reset_selection(&mut self) {
        self.selected = OnceLock::new();
    }
}

impl Default for KernelManager {
    fn default() -> Self {
        Self::new()
    }
}
