//! Service configuration: the frozen registry the resolution engine consults
//!
//! Configuration is built once through [`builder::ConfigurationBuilder`] and
//! frozen for the lifetime of a container. The engine only ever reads it:
//! `get(type, active contracts)` selects the most specific contract-scoped
//! overlay and reports which contracts the match consumed.

pub mod builder;

pub use builder::{ConfigurationBuilder, ServiceConfigurator};

use crate::core::error::{Error, Result};
use crate::core::types::{TypeRef, TypedInstance};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Factory closure building an instance from the container
pub type ContainerFactory =
    Arc<dyn Fn(&crate::container::Container) -> Result<TypedInstance> + Send + Sync>;

/// Factory closure additionally receiving the requesting parent type
pub type TargetFactory = Arc<
    dyn Fn(&crate::container::Container, Option<TypeRef>) -> Result<TypedInstance> + Send + Sync,
>;

/// Post-construction predicate dropping unwanted instances
pub type InstanceFilter = Arc<dyn Fn(&TypedInstance) -> bool + Send + Sync>;

/// Callback including or excluding implementation candidates
pub type ImplementationSelector =
    Arc<dyn Fn(TypeRef, &[TypeRef]) -> Vec<SelectionDecision> + Send + Sync>;

/// One include/exclude decision produced by an implementation selector
#[derive(Clone)]
pub struct SelectionDecision {
    pub target: TypeRef,
    pub include: bool,
    pub comment: Option<String>,
}

/// External source of constructor-parameter constants
pub trait ParametersSource: Send + Sync {
    fn try_get(&self, name: &str, ty: TypeRef) -> Option<TypedInstance>;
}

/// Override for a single named constructor parameter
#[derive(Clone)]
pub enum ParameterOverride {
    Value(TypedInstance),
    Factory(ContainerFactory),
    Implementation(TypeRef),
}

/// A dependency resolved in addition to constructor parameters
#[derive(Clone)]
pub struct ImplicitDependency {
    pub ty: TypeRef,
    pub contracts: Vec<String>,
}

/// The configuration record for one service, all fields optional
#[derive(Clone, Default)]
pub struct ServiceConfiguration {
    /// Concrete instance to reuse; mutually exclusive with the factories
    pub implementation_assigned: Option<TypedInstance>,
    pub factory: Option<ContainerFactory>,
    pub factory_with_target: Option<TargetFactory>,
    /// Explicit candidate list, overriding the inheritance scan
    pub implementation_types: Option<Vec<TypeRef>>,
    pub ignored_implementation: bool,
    pub dont_use: bool,
    /// `Some(false)` opts container-created instances out of disposal;
    /// `Some(true)` opts assigned instances in
    pub container_owns_instance: Option<bool>,
    pub instance_filter: Option<InstanceFilter>,
    pub implicit_dependencies: Vec<ImplicitDependency>,
    pub parameter_overrides: HashMap<String, ParameterOverride>,
    pub parameters_source: Option<Arc<dyn ParametersSource>>,
    /// Union the explicit candidate list with scanned inheritors
    pub use_autosearch: bool,
    pub selectors: Vec<ImplementationSelector>,
}

pub(crate) struct Overlay {
    pub required_contracts: Vec<String>,
    pub config: Arc<ServiceConfiguration>,
}

/// Result of a configuration lookup: the selected record plus the active
/// contracts the selection consumed (in stack order, stack casing)
pub struct ConfigSelection {
    pub config: Arc<ServiceConfiguration>,
    pub used_contracts: Vec<String>,
}

/// Immutable `(type, contract stack) → ServiceConfiguration?` lookup.
///
/// A cloned container overlays its own registry on top of the parent's;
/// lookups fall through to the parent when the overlay has nothing for a
/// type.
pub struct ConfigurationRegistry {
    overlays: HashMap<TypeRef, Vec<Overlay>>,
    unions: HashMap<String, Vec<String>>,
    parent: Option<Arc<ConfigurationRegistry>>,
}

impl ConfigurationRegistry {
    pub(crate) fn new(
        overlays: HashMap<TypeRef, Vec<Overlay>>,
        unions: HashMap<String, Vec<String>>,
    ) -> Self {
        Self {
            overlays,
            unions,
            parent: None,
        }
    }

    /// Empty registry: every lookup misses
    pub fn empty() -> Self {
        Self {
            overlays: HashMap::new(),
            unions: HashMap::new(),
            parent: None,
        }
    }

    /// Overlay this registry on top of `parent`
    pub fn with_parent(mut self, parent: Arc<ConfigurationRegistry>) -> Self {
        self.parent = Some(parent);
        self
    }

    /// Select the most specific overlay whose required contracts are all on
    /// the active stack. Ambiguous selections (two distinct overlays tied on
    /// specificity) are a configuration error, surfaced as a deferred
    /// configuration exception by the resolver.
    pub fn get(&self, ty: TypeRef, active_contracts: &[String]) -> Result<Option<ConfigSelection>> {
        let overlays = match self.overlays.get(&ty) {
            Some(overlays) => overlays,
            None => {
                return match &self.parent {
                    Some(parent) => parent.get(ty, active_contracts),
                    None => Ok(None),
                }
            }
        };

        let mut best: Option<&Overlay> = None;
        let mut ambiguous: Option<&Overlay> = None;
        for overlay in overlays {
            let matches = overlay
                .required_contracts
                .iter()
                .all(|required| contains_contract(active_contracts, required));
            if !matches {
                continue;
            }
            match best {
                Some(current) => {
                    if overlay.required_contracts.len() > current.required_contracts.len() {
                        best = Some(overlay);
                        ambiguous = None;
                    } else if overlay.required_contracts.len() == current.required_contracts.len() {
                        ambiguous = Some(overlay);
                    }
                }
                None => best = Some(overlay),
            }
        }

        let selected = match best {
            Some(overlay) => overlay,
            None => return Ok(None),
        };
        if let Some(other) = ambiguous {
            return Err(Error::config(format!(
                "ambiguous configurations, contracts [{}] vs [{}]",
                selected.required_contracts.join(","),
                other.required_contracts.join(",")
            )));
        }

        // Report the consumed contracts in stack order with stack casing.
        let used_contracts = active_contracts
            .iter()
            .filter(|active| {
                selected
                    .required_contracts
                    .iter()
                    .any(|required| required.eq_ignore_ascii_case(active))
            })
            .cloned()
            .collect();

        debug!(
            required = ?selected.required_contracts,
            "configuration overlay selected"
        );
        Ok(Some(ConfigSelection {
            config: Arc::clone(&selected.config),
            used_contracts,
        }))
    }

    /// Member contracts of a union contract, if `name` is one
    pub fn union_of(&self, name: &str) -> Option<&[String]> {
        self.unions
            .get(&name.to_ascii_lowercase())
            .map(|members| members.as_slice())
            .or_else(|| self.parent.as_ref().and_then(|p| p.union_of(name)))
    }
}

fn contains_contract(stack: &[String], name: &str) -> bool {
    stack.iter().any(|c| c.eq_ignore_ascii_case(name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::introspection::TypeRegistryBuilder;

    struct ServiceA;
    struct ServiceB;

    fn strings(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_unscoped_overlay_matches_any_stack() {
        let mut types = TypeRegistryBuilder::new();
        let a = types.register::<ServiceA>().done();
        let mut builder = ConfigurationBuilder::new();
        builder.for_type(a).dont_use();
        let registry = builder.build();

        let selection = registry.get(a, &strings(&["c1"])).unwrap().unwrap();
        assert!(selection.config.dont_use);
        assert!(selection.used_contracts.is_empty());
    }

    #[test]
    fn test_contract_scoped_overlay_wins_over_unscoped() {
        let mut types = TypeRegistryBuilder::new();
        let a = types.register::<ServiceA>().done();
        let b = types.register::<ServiceB>().done();
        let mut builder = ConfigurationBuilder::new();
        builder.for_type(a).bind(a);
        builder.scoped(&["c1"], a).bind(b);
        let registry = builder.build();

        let unscoped = registry.get(a, &strings(&[])).unwrap().unwrap();
        assert_eq!(unscoped.config.implementation_types, Some(vec![a]));

        let scoped = registry.get(a, &strings(&["C1"])).unwrap().unwrap();
        assert_eq!(scoped.config.implementation_types, Some(vec![b]));
        assert_eq!(scoped.used_contracts, strings(&["C1"]));
    }

    #[test]
    fn test_missing_configuration_returns_none() {
        let mut types = TypeRegistryBuilder::new();
        let a = types.register::<ServiceA>().done();
        let registry = ConfigurationBuilder::new().build();
        assert!(registry.get(a, &strings(&[])).unwrap().is_none());
    }

    #[test]
    fn test_ambiguous_overlays_error() {
        let mut types = TypeRegistryBuilder::new();
        let a = types.register::<ServiceA>().done();
        let b = types.register::<ServiceB>().done();
        let mut builder = ConfigurationBuilder::new();
        builder.scoped(&["c1"], a).bind(a);
        builder.scoped(&["c2"], a).bind(b);
        let registry = builder.build();

        let result = registry.get(a, &strings(&["c1", "c2"]));
        assert!(result.is_err());
    }

    #[test]
    fn test_union_lookup_is_case_insensitive() {
        let mut builder = ConfigurationBuilder::new();
        builder.union_contract("All", &["c1", "c2"]);
        let registry = builder.build();
        assert_eq!(registry.union_of("all").unwrap(), &strings(&["c1", "c2"]));
        assert!(registry.union_of("other").is_none());
    }
}
