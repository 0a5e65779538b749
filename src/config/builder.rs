//! Fluent configuration surface, frozen into the immutable registry

use crate::config::{
    ConfigurationRegistry, ContainerFactory, ImplementationSelector, ImplicitDependency,
    InstanceFilter, Overlay, ParameterOverride, ParametersSource, ServiceConfiguration,
    TargetFactory,
};
use crate::core::error::Result;
use crate::core::types::{TypeRef, TypedInstance};
use std::collections::HashMap;
use std::sync::Arc;

struct OverlayDraft {
    required_contracts: Vec<String>,
    config: ServiceConfiguration,
}

/// Builds a [`ConfigurationRegistry`]; one overlay per `(type, contracts)` pair
pub struct ConfigurationBuilder {
    overlays: HashMap<TypeRef, Vec<OverlayDraft>>,
    unions: HashMap<String, Vec<String>>,
}

impl ConfigurationBuilder {
    pub fn new() -> Self {
        Self {
            overlays: HashMap::new(),
            unions: HashMap::new(),
        }
    }

    fn configurator(&mut self, required: Vec<String>, ty: TypeRef) -> ServiceConfigurator<'_> {
        let drafts = self.overlays.entry(ty).or_default();
        if let Some(index) = drafts.iter().position(|d| {
            d.required_contracts.len() == required.len()
                && d.required_contracts
                    .iter()
                    .zip(&required)
                    .all(|(a, b)| a.eq_ignore_ascii_case(b))
        }) {
            return ServiceConfigurator {
                draft: &mut drafts[index],
            };
        }
        drafts.push(OverlayDraft {
            required_contracts: required,
            config: ServiceConfiguration::default(),
        });
        let last = drafts.len() - 1;
        ServiceConfigurator {
            draft: &mut drafts[last],
        }
    }

    /// Configure a type for any contract stack
    pub fn for_type(&mut self, ty: TypeRef) -> ServiceConfigurator<'_> {
        self.configurator(Vec::new(), ty)
    }

    /// Configure a type for stacks carrying all the given contracts
    pub fn scoped(&mut self, contracts: &[&str], ty: TypeRef) -> ServiceConfigurator<'_> {
        self.configurator(contracts.iter().map(|s| s.to_string()).collect(), ty)
    }

    /// Declare a union contract expanding to the given member contracts
    pub fn union_contract(&mut self, name: &str, members: &[&str]) {
        self.unions.insert(
            name.to_ascii_lowercase(),
            members.iter().map(|s| s.to_string()).collect(),
        );
    }

    /// Freeze into the immutable registry
    pub fn build(self) -> ConfigurationRegistry {
        let overlays = self
            .overlays
            .into_iter()
            .map(|(ty, drafts)| {
                let frozen = drafts
                    .into_iter()
                    .map(|draft| Overlay {
                        required_contracts: draft.required_contracts,
                        config: Arc::new(draft.config),
                    })
                    .collect();
                (ty, frozen)
            })
            .collect();
        ConfigurationRegistry::new(overlays, self.unions)
    }
}

impl Default for ConfigurationBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Fluent editor for one configuration overlay
pub struct ServiceConfigurator<'a> {
    draft: &'a mut OverlayDraft,
}

impl<'a> ServiceConfigurator<'a> {
    /// Add an explicit implementation candidate
    pub fn bind(self, implementation: TypeRef) -> Self {
        self.draft
            .config
            .implementation_types
            .get_or_insert_with(Vec::new)
            .push(implementation);
        self
    }

    /// Reuse an already-constructed instance
    pub fn bind_instance(self, instance: TypedInstance) -> Self {
        self.draft.config.implementation_assigned = Some(instance);
        self
    }

    /// Build the instance through a factory closure
    pub fn bind_factory<F>(self, factory: F) -> Self
    where
        F: Fn(&crate::container::Container) -> Result<TypedInstance> + Send + Sync + 'static,
    {
        self.draft.config.factory = Some(Arc::new(factory) as ContainerFactory);
        self
    }

    /// Build the instance through a factory receiving the requesting type;
    /// the produced service's identity gains the requester as a contract
    pub fn bind_factory_with_target<F>(self, factory: F) -> Self
    where
        F: Fn(&crate::container::Container, Option<TypeRef>) -> Result<TypedInstance>
            + Send
            + Sync
            + 'static,
    {
        self.draft.config.factory_with_target = Some(Arc::new(factory) as TargetFactory);
        self
    }

    /// Exclude this type from candidate sets
    pub fn ignored(self) -> Self {
        self.draft.config.ignored_implementation = true;
        self
    }

    /// Keep the type resolvable but refuse to construct it
    pub fn dont_use(self) -> Self {
        self.draft.config.dont_use = true;
        self
    }

    /// Whether the container disposes instances of this service
    pub fn owned_by_container(self, owned: bool) -> Self {
        self.draft.config.container_owns_instance = Some(owned);
        self
    }

    /// Drop constructed instances failing the predicate
    pub fn filter<F>(self, predicate: F) -> Self
    where
        F: Fn(&TypedInstance) -> bool + Send + Sync + 'static,
    {
        self.draft.config.instance_filter = Some(Arc::new(predicate) as InstanceFilter);
        self
    }

    /// Resolve an extra dependency beyond the constructor parameters
    pub fn implicit_dependency(self, ty: TypeRef, contracts: &[&str]) -> Self {
        self.draft.config.implicit_dependencies.push(ImplicitDependency {
            ty,
            contracts: contracts.iter().map(|s| s.to_string()).collect(),
        });
        self
    }

    /// Constant for a named constructor parameter
    pub fn parameter_value(self, name: &str, value: TypedInstance) -> Self {
        self.draft
            .config
            .parameter_overrides
            .insert(name.to_string(), ParameterOverride::Value(value));
        self
    }

    /// Sub-factory for a named constructor parameter
    pub fn parameter_factory<F>(self, name: &str, factory: F) -> Self
    where
        F: Fn(&crate::container::Container) -> Result<TypedInstance> + Send + Sync + 'static,
    {
        self.draft.config.parameter_overrides.insert(
            name.to_string(),
            ParameterOverride::Factory(Arc::new(factory) as ContainerFactory),
        );
        self
    }

    /// Implementation override for a named constructor parameter
    pub fn parameter_implementation(self, name: &str, ty: TypeRef) -> Self {
        self.draft
            .config
            .parameter_overrides
            .insert(name.to_string(), ParameterOverride::Implementation(ty));
        self
    }

    /// External source of parameter constants, consulted before overrides
    pub fn parameters_source(self, source: Arc<dyn ParametersSource>) -> Self {
        self.draft.config.parameters_source = Some(source);
        self
    }

    /// Union the explicit candidate list with scanned inheritors
    pub fn use_autosearch(self) -> Self {
        self.draft.config.use_autosearch = true;
        self
    }

    /// Candidate include/exclude callback with comments
    pub fn selector<F>(self, selector: F) -> Self
    where
        F: Fn(TypeRef, &[TypeRef]) -> Vec<crate::config::SelectionDecision>
            + Send
            + Sync
            + 'static,
    {
        self.draft
            .config
            .selectors
            .push(Arc::new(selector) as ImplementationSelector);
        self
    }
}
