//! Kernel registry: routes graph nodes to typed kernel specializations.
//!
//! A [`KernelDef`] names one specialization by op type, domain, opset
//! version, execution backend and type constraints. [`KernelRegistry::create`]
//! finds the definition matching a [`NodeSpec`] and builds the kernel from the
//! node's attributes.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use lngrad_common::{DType, GradKernelConfig, KernelBackend, RegistryError, Result, TypePair};
use lngrad_kernels::KernelManager;

use crate::attributes::OpKernelInfo;
use crate::layer_norm_grad::{LayerNormGrad, OpKernel};

pub const LAYER_NORM_GRAD_OP: &str = "LayerNormalizationGrad";
pub const MS_DOMAIN: &str = "com.microsoft";

/// Identity of one registered kernel specialization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelDef {
    pub op_type: &'static str,
    pub domain: &'static str,
    pub since_version: u32,
    pub provider: KernelBackend,
    /// Type parameter name to concrete element type, in declaration order.
    pub type_constraints: Vec<(&'static str, DType)>,
}

impl KernelDef {
    /// Definition of `LayerNormalizationGrad` for one `(T, U)` pair.
    pub fn layer_norm_grad(pair: TypePair, provider: KernelBackend) -> Self {
        Self {
            op_type: LAYER_NORM_GRAD_OP,
            domain: MS_DOMAIN,
            since_version: 1,
            provider,
            type_constraints: vec![("T", pair.t), ("U", pair.u)],
        }
    }

    /// `<op>_<T>_<U>`, e.g. `LayerNormalizationGrad_MLFloat16_float`.
    pub fn name(&self) -> String {
        let mut name = self.op_type.to_string();
        for (_, dtype) in &self.type_constraints {
            name.push('_');
            name.push_str(dtype.name());
        }
        name
    }

    pub fn key(&self) -> KernelKey {
        KernelKey { provider: self.provider, name: self.name() }
    }

    fn matches(&self, node: &NodeSpec) -> bool {
        self.op_type == node.op_type
            && self.domain == node.domain
            && self.provider == node.provider
            && node.version >= self.since_version
            && self
                .type_constraints
                .iter()
                .all(|(param, dtype)| node.type_bindings.get(*param) == Some(dtype))
    }
}

/// Registry key: backend plus kernel name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KernelKey {
    pub provider: KernelBackend,
    pub name: String,
}

impl fmt::Display for KernelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.provider.provider_name(), self.name)
    }
}

/// A graph node requesting a kernel.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeSpec {
    pub op_type: String,
    pub domain: String,
    pub version: u32,
    pub provider: KernelBackend,
    pub type_bindings: BTreeMap<String, DType>,
    pub info: OpKernelInfo,
}

impl NodeSpec {
    /// A `LayerNormalizationGrad` node bound to `pair`.
    pub fn layer_norm_grad(pair: TypePair, provider: KernelBackend, info: OpKernelInfo) -> Self {
        Self {
            op_type: LAYER_NORM_GRAD_OP.to_string(),
            domain: MS_DOMAIN.to_string(),
            version: 1,
            provider,
            type_bindings: BTreeMap::from([("T".to_string(), pair.t), ("U".to_string(), pair.u)]),
            info,
        }
    }

    fn bindings_display(&self) -> String {
        let parts: Vec<String> = self.type_bindings.iter().map(|(k, v)| format!("{k}={v}")).collect();
        format!("[{}]", parts.join(", "))
    }
}

/// Builds a kernel from node attributes.
pub type KernelCreateFn = Box<dyn Fn(&OpKernelInfo) -> Result<Box<dyn OpKernel>> + Send + Sync>;

struct Registration {
    def: KernelDef,
    create: KernelCreateFn,
}

#[derive(Default)]
pub struct KernelRegistry {
    kernels: HashMap<KernelKey, Registration>,
}

impl KernelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, def: KernelDef, create: KernelCreateFn) -> Result<()> {
        let key = def.key();
        if self.kernels.contains_key(&key) {
            return Err(RegistryError::Duplicate { name: key.to_string() }.into());
        }
        log::debug!("Registered kernel {key}");
        self.kernels.insert(key, Registration { def, create });
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.kernels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kernels.is_empty()
    }

    /// Definition matching `node`, if any.
    pub fn lookup(&self, node: &NodeSpec) -> Option<&KernelDef> {
        self.find(node).map(|r| &r.def)
    }

    /// Build the kernel matching `node`.
    pub fn create(&self, node: &NodeSpec) -> Result<Box<dyn OpKernel>> {
        let registration = self.find(node).ok_or_else(|| RegistryError::NoMatch {
            op_type: node.op_type.clone(),
            domain: node.domain.clone(),
            version: node.version,
            bindings: node.bindings_display(),
        })?;
        (registration.create)(&node.info)
    }

    /// All registered definitions, sorted by key.
    pub fn definitions(&self) -> Vec<&KernelDef> {
        let mut defs: Vec<&KernelDef> = self.kernels.values().map(|r| &r.def).collect();
        defs.sort_by_key(|d| d.key().to_string());
        defs
    }

    // Highest `since_version` wins when several definitions match.
    fn find(&self, node: &NodeSpec) -> Option<&Registration> {
        self.kernels
            .values()
            .filter(|r| r.def.matches(node))
            .max_by_key(|r| r.def.since_version)
    }
}

fn layer_norm_grad_creator<T, U>(
    backend: KernelBackend,
    config: GradKernelConfig,
    manager: Arc<KernelManager>,
) -> KernelCreateFn
where
    T: lngrad_kernels::KernelElement<U>,
    U: lngrad_common::StatElement,
{
    Box::new(move |info: &OpKernelInfo| -> Result<Box<dyn OpKernel>> {
        let kernel = LayerNormGrad::<T, U>::with_config(info, &config, manager.clone())?.on_backend(backend);
        Ok(Box::new(kernel))
    })
}

/// Register the `(f32, f32)`, `(f64, f64)` and `(f16, f32)` specializations for `provider`.
///
/// Kernels created from these registrations only run on `provider`'s backend.
pub fn register_layer_norm_grad_kernels(
    registry: &mut KernelRegistry,
    provider: KernelBackend,
    config: &GradKernelConfig,
    manager: Arc<KernelManager>,
) -> Result<()> {
    registry.register(
        KernelDef::layer_norm_grad(TypePair::F32_F32, provider),
        layer_norm_grad_creator::<f32, f32>(provider, config.clone(), manager.clone()),
    )?;
    registry.register(
        KernelDef::layer_norm_grad(TypePair::F64_F64, provider),
        layer_norm_grad_creator::<f64, f64>(provider, config.clone(), manager.clone()),
    )?;
    registry.register(
        KernelDef::layer_norm_grad(TypePair::F16_F32, provider),
        layer_norm_grad_creator::<half::f16, f32>(provider, config.clone(), manager),
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attributes::AttributeValue;

    fn registry() -> KernelRegistry {
        let mut registry = KernelRegistry::new();
        let manager = Arc::new(KernelManager::with_providers(vec![Box::new(lngrad_kernels::CpuLayerNormGrad)]));
        register_layer_norm_grad_kernels(&mut registry, KernelBackend::CpuRust, &GradKernelConfig::default(), manager)
            .unwrap();
        registry
    }

    fn axis_info() -> OpKernelInfo {
        OpKernelInfo::new().with_attr("axis", AttributeValue::Int(-1))
    }

    #[test]
    fn names_follow_type_pairs() {
        assert_eq!(
            KernelDef::layer_norm_grad(TypePair::F16_F32, KernelBackend::Cuda).name(),
            "LayerNormalizationGrad_MLFloat16_float"
        );
        assert_eq!(
            KernelDef::layer_norm_grad(TypePair::F64_F64, KernelBackend::Cuda).name(),
            "LayerNormalizationGrad_double_double"
        );
    }

    #[test]
    fn three_specializations_are_registered() {
        let registry = registry();
        assert_eq!(registry.len(), 3);
        let names: Vec<String> = registry.definitions().iter().map(|d| d.name()).collect();
        assert!(names.contains(&"LayerNormalizationGrad_float_float".to_string()));
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut registry = registry();
        let manager = Arc::new(KernelManager::with_providers(Vec::new()));
        let err = register_layer_norm_grad_kernels(
            &mut registry,
            KernelBackend::CpuRust,
            &GradKernelConfig::default(),
            manager,
        )
        .unwrap_err();
        assert!(matches!(err, lngrad_common::LnGradError::Registry(RegistryError::Duplicate { .. })));
    }

    #[test]
    fn same_pair_on_another_backend_is_distinct() {
        let mut registry = registry();
        let manager = Arc::new(KernelManager::with_providers(Vec::new()));
        register_layer_norm_grad_kernels(&mut registry, KernelBackend::Cuda, &GradKernelConfig::default(), manager)
            .unwrap();
        assert_eq!(registry.len(), 6);
    }

    #[test]
    fn create_routes_by_type_binding() {
        let registry = registry();
        for pair in TypePair::SUPPORTED {
            let kernel = registry.create(&NodeSpec::layer_norm_grad(pair, KernelBackend::CpuRust, axis_info())).unwrap();
            assert_eq!(kernel.type_pair(), pair);
        }
    }

    #[test]
    fn unregistered_pair_has_no_match() {
        let registry = registry();
        let node = NodeSpec::layer_norm_grad(
            TypePair::new(DType::F16, DType::F16),
            KernelBackend::CpuRust,
            axis_info(),
        );
        assert!(registry.lookup(&node).is_none());
        let err = registry.create(&node).err().unwrap();
        assert!(err.to_string().contains("T=MLFloat16, U=MLFloat16"));
    }

    #[test]
    fn version_and_domain_must_match() {
        let registry = registry();
        let mut node = NodeSpec::layer_norm_grad(TypePair::F32_F32, KernelBackend::CpuRust, axis_info());
        node.version = 0;
        assert!(registry.lookup(&node).is_none());
        node.version = 7;
        assert!(registry.lookup(&node).is_some());
        node.domain = "ai.onnx".into();
        assert!(registry.lookup(&node).is_none());
    }

    #[test]
    fn missing_axis_fails_at_create() {
        let registry = registry();
        let node = NodeSpec::layer_norm_grad(TypePair::F32_F32, KernelBackend::CpuRust, OpKernelInfo::new());
        let err = registry.create(&node).err().unwrap();
        assert!(err.is_configuration());
    }
}
