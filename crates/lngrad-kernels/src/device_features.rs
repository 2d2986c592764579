//! Device feature detection.
//!
//! Combines the compile-time `cuda` feature with runtime probing. The
//! `LNGRAD_GPU_FAKE` variable overrides detection for deterministic tests:
//! `none` hides every GPU, `cuda` reports one without probing. The override
//! only applies to builds with the `cuda` feature; without it no GPU is ever
//! reported.

/// Whether CUDA support was compiled into this binary.
#[inline]
pub fn gpu_compiled() -> bool {
    cfg!(feature = "cuda")
}

#[cfg_attr(not(feature = "cuda"), allow(dead_code))]
fn fake_override() -> Option<bool> {
    match std::env::var("LNGRAD_GPU_FAKE").ok()?.to_lowercase().as_str() {
        "none" | "0" | "false" => Some(false),
        "cuda" | "1" | "true" => Some(true),
        _ => None,
    }
}

/// Whether CUDA device 0 is usable at runtime.
pub fn gpu_available_runtime() -> bool {
    gpu_available_runtime_on(0)
}

/// Whether CUDA device `device_index` is usable at runtime.
#[cfg(feature = "cuda")]
pub fn gpu_available_runtime_on(device_index: usize) -> bool {
    if let Some(fake) = fake_override() {
        return fake;
    }
    match cudarc::driver::CudaContext::new(device_index) {
        Ok(_) => true,
        Err(e) => {
            log::debug!("CUDA device {device_index} probe failed: {e:?}");
            false
        }
    }
}

/// GPU never available if not compiled.
#[cfg(not(feature = "cuda"))]
pub fn gpu_available_runtime_on(_device_index: usize) -> bool {
    false
}

/// Human-readable capability summary for diagnostics.
pub fn device_capability_summary() -> String {
    format!(
        "compiled: cuda={} cpu=true; runtime: cuda={}",
        gpu_compiled(),
        gpu_available_runtime()
    )
}
