//! Mutable service node under construction and its sealed, immutable form

use crate::core::error::{Error, Result};
use crate::core::types::{Arguments, TypedInstance};
use crate::introspection::CtorArg;
use crate::resolution::cache::CacheSlot;
use crate::resolution::log;
use crate::resolution::name::{ContractName, ServiceName};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Factory compiled for a sealed service; repeat `create` calls go through
/// it and bypass resolution entirely
pub type CompiledFactory =
    Arc<dyn Fn(&crate::container::Container) -> Result<TypedInstance> + Send + Sync>;

/// Per-node state machine. Transitions are monotonic: a terminal state is
/// never revived to `Ok`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceStatus {
    NotResolved,
    Ok,
    Error,
    DependencyError,
}

impl ServiceStatus {
    pub fn is_ok(self) -> bool {
        matches!(self, ServiceStatus::Ok)
    }

    pub fn is_bad(self) -> bool {
        matches!(self, ServiceStatus::Error | ServiceStatus::DependencyError)
    }
}

/// Status of one resolved dependency edge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DependencyStatus {
    Ok,
    NotResolved,
    Error,
    /// The child service itself failed
    ServiceError,
}

/// One dependency edge: a constant, a child service, or a failure record
pub struct ServiceDependency {
    pub name: String,
    pub status: DependencyStatus,
    pub value: Option<CtorArg>,
    pub comment: Option<String>,
    pub service: Option<Arc<ContainerService>>,
    pub error_message: Option<String>,
}

impl ServiceDependency {
    pub fn constant(name: impl Into<String>, value: CtorArg) -> Self {
        Self {
            name: name.into(),
            status: DependencyStatus::Ok,
            value: Some(value),
            comment: None,
            service: None,
            error_message: None,
        }
    }

    pub fn absent(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: DependencyStatus::Ok,
            value: Some(CtorArg::Absent),
            comment: Some("missing, passed as absent".to_string()),
            service: None,
            error_message: None,
        }
    }

    pub fn service(child: Arc<ContainerService>, name: impl Into<String>, value: CtorArg) -> Self {
        Self {
            name: name.into(),
            status: DependencyStatus::Ok,
            value: Some(value),
            comment: None,
            service: Some(child),
            error_message: None,
        }
    }

    /// An `Ok` child linked for its instances rather than a parameter value
    pub fn linked(child: Arc<ContainerService>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: DependencyStatus::Ok,
            value: None,
            comment: None,
            service: Some(child),
            error_message: None,
        }
    }

    pub fn service_error(child: Arc<ContainerService>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: DependencyStatus::ServiceError,
            value: None,
            comment: None,
            service: Some(child),
            error_message: None,
        }
    }

    pub fn not_resolved(
        child: Option<Arc<ContainerService>>,
        name: impl Into<String>,
        comment: Option<String>,
    ) -> Self {
        Self {
            name: name.into(),
            status: DependencyStatus::NotResolved,
            value: None,
            comment,
            service: child,
            error_message: None,
        }
    }

    pub fn error(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: DependencyStatus::Error,
            value: None,
            comment: None,
            service: None,
            error_message: Some(message.into()),
        }
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    pub fn is_ok(&self) -> bool {
        matches!(self.status, DependencyStatus::Ok)
    }
}

pub(crate) struct InstanceEntry {
    pub value: TypedInstance,
    /// Whether this node is responsible for disposing the instance
    pub owned: bool,
    /// Display name of the implementation the instance came from
    pub source: String,
}

/// Mutable node under construction. Created on slot acquisition, sealed on
/// release; at most one builder exists per `ServiceName` at a time.
pub struct ServiceBuilder {
    name: ServiceName,
    type_name: String,
    pub create_new: bool,
    pub arguments: Option<Arc<Arguments>>,
    error_message: Option<String>,
    dependency_failed: bool,
    resolved_ok: bool,
    comment: Option<String>,
    dependencies: Vec<ServiceDependency>,
    instances: Vec<InstanceEntry>,
    used: HashSet<ContractName>,
    compiled_factory: Option<CompiledFactory>,
    /// Final-name slot acquired during cache collapse, released at seal
    pub(crate) final_slot: Option<Arc<CacheSlot>>,
}

impl ServiceBuilder {
    pub fn new(
        name: ServiceName,
        type_name: String,
        create_new: bool,
        arguments: Option<Arc<Arguments>>,
    ) -> Self {
        Self {
            name,
            type_name,
            create_new,
            arguments,
            error_message: None,
            dependency_failed: false,
            resolved_ok: false,
            comment: None,
            dependencies: Vec::new(),
            instances: Vec::new(),
            used: HashSet::new(),
            compiled_factory: None,
            final_slot: None,
        }
    }

    pub fn ty(&self) -> crate::core::types::TypeRef {
        self.name.ty
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn declared_name(&self) -> &ServiceName {
        &self.name
    }

    pub fn declared_contracts(&self) -> &[ContractName] {
        &self.name.contracts
    }

    /// Current status; finalized at seal
    pub fn status(&self) -> ServiceStatus {
        if self.error_message.is_some() {
            ServiceStatus::Error
        } else if self.dependency_failed {
            ServiceStatus::DependencyError
        } else if self.resolved_ok {
            ServiceStatus::Ok
        } else {
            ServiceStatus::NotResolved
        }
    }

    /// Record a contract of the declared stack as consulted
    pub fn mark_used(&mut self, contract: &ContractName) {
        if self.name.contracts.contains(contract) {
            self.used.insert(contract.clone());
        }
    }

    pub fn mark_used_strings(&mut self, contracts: &[String]) {
        for raw in contracts {
            if let Ok(name) = ContractName::new(raw.clone()) {
                self.mark_used(&name);
            }
        }
    }

    /// Union in the contracts a child actually consulted
    pub fn union_used_from(&mut self, child: &ContainerService) {
        for contract in child.final_used_contracts() {
            self.mark_used(contract);
        }
    }

    pub fn add_instance(&mut self, value: TypedInstance, owned: bool, source: impl Into<String>) {
        self.resolved_ok = true;
        self.instances.push(InstanceEntry {
            value,
            owned,
            source: source.into(),
        });
    }

    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }

    /// Status-affecting dependency edge (constructor parameters, implicit
    /// dependencies). A failing edge turns the node into `DependencyError`.
    pub fn add_dependency(&mut self, dependency: ServiceDependency) {
        if !dependency.is_ok() {
            self.dependency_failed = true;
        }
        if let Some(child) = &dependency.service {
            self.union_used_from(child);
        }
        self.dependencies.push(dependency);
    }

    /// Log-only dependency edge (rejected candidates); never affects status
    pub fn record_dependency(&mut self, dependency: ServiceDependency) {
        self.dependencies.push(dependency);
    }

    /// Link a child resolved on this node's behalf (union expansion and the
    /// interface path): instances, used contracts and status union in.
    /// Returns false when the child failed and resolution should stop.
    pub fn link_child(&mut self, child: &Arc<ContainerService>, name: impl Into<String>) -> bool {
        self.union_used_from(child);
        match child.status() {
            ServiceStatus::Ok => {
                for entry in child.instance_entries() {
                    // The child slot owns disposal of its own instances.
                    self.instances.push(InstanceEntry {
                        value: entry.value.clone(),
                        owned: false,
                        source: entry.source.clone(),
                    });
                }
                self.resolved_ok = true;
                self.dependencies
                    .push(ServiceDependency::linked(Arc::clone(child), name));
                true
            }
            ServiceStatus::NotResolved => {
                self.dependencies.push(ServiceDependency::not_resolved(
                    Some(Arc::clone(child)),
                    name,
                    None,
                ));
                true
            }
            ServiceStatus::Error | ServiceStatus::DependencyError => {
                self.dependency_failed = true;
                self.dependencies
                    .push(ServiceDependency::service_error(Arc::clone(child), name));
                false
            }
        }
    }

    /// Share the result of an equivalent service cached under the final name
    pub fn reuse(&mut self, service: &Arc<ContainerService>) {
        for entry in service.instance_entries() {
            self.instances.push(InstanceEntry {
                value: entry.value.clone(),
                owned: false,
                source: entry.source.clone(),
            });
        }
        match service.status() {
            ServiceStatus::Ok => self.resolved_ok = true,
            ServiceStatus::Error | ServiceStatus::DependencyError => self.dependency_failed = true,
            ServiceStatus::NotResolved => {}
        }
        self.compiled_factory = service.compiled_factory();
        self.comment = Some("reused".to_string());
    }

    /// Record a failure. The first error wins; later ones are dropped.
    pub fn set_error(&mut self, message: impl Into<String>) {
        if self.error_message.is_none() {
            self.error_message = Some(message.into());
        }
    }

    pub fn set_comment(&mut self, comment: impl Into<String>) {
        self.comment = Some(comment.into());
    }

    /// Mark successfully resolved without instances (analyze mode)
    pub fn mark_ok(&mut self) {
        self.resolved_ok = true;
    }

    pub fn set_compiled_factory(&mut self, factory: CompiledFactory) {
        self.compiled_factory = Some(factory);
    }

    pub fn compiled_factory(&self) -> Option<CompiledFactory> {
        self.compiled_factory.clone()
    }

    /// Apply the configured post-construction filter; annotates the node
    /// when instances were dropped
    pub fn apply_filter(&mut self, filter: &crate::config::InstanceFilter) {
        let before = self.instances.len();
        self.instances.retain(|entry| filter(&entry.value));
        if self.instances.len() != before {
            self.comment = Some("instance filter".to_string());
        }
    }

    /// Dependency resolution is complete; the final cache identity is fixed
    pub fn end_resolve_dependencies(&mut self) {
        debug!(
            service = %self.type_name,
            used_contracts = self.used.len(),
            "dependencies resolved"
        );
    }

    /// The declared contracts actually consulted, in declared order
    pub fn final_used_contracts(&self) -> Vec<ContractName> {
        self.name
            .contracts
            .iter()
            .filter(|c| self.used.contains(*c))
            .cloned()
            .collect()
    }

    /// Cache identity the sealed service deduplicates under
    pub fn final_name(&self) -> ServiceName {
        ServiceName::new(self.name.ty, self.final_used_contracts())
    }

    /// Seal into the immutable service
    pub fn seal(self, top_sort_index: u64) -> ContainerService {
        let status = self.status();
        debug!(
            service = %self.type_name,
            ?status,
            instances = self.instances.len(),
            "sealing service"
        );
        ContainerService {
            name: ServiceName::new(
                self.name.ty,
                self.name
                    .contracts
                    .iter()
                    .filter(|c| self.used.contains(*c))
                    .cloned()
                    .collect(),
            ),
            type_name: self.type_name,
            declared_contracts: self.name.contracts,
            status,
            error_message: self.error_message,
            comment: self.comment,
            dependencies: self.dependencies,
            instances: self.instances,
            top_sort_index,
            run_state: Mutex::new(false),
            compiled_factory: self.compiled_factory,
        }
    }
}

/// Sealed, immutable resolution node. `final_used_contracts` is frozen and
/// always a subset of the declared contracts.
pub struct ContainerService {
    name: ServiceName,
    type_name: String,
    declared_contracts: Vec<ContractName>,
    status: ServiceStatus,
    error_message: Option<String>,
    comment: Option<String>,
    dependencies: Vec<ServiceDependency>,
    instances: Vec<InstanceEntry>,
    top_sort_index: u64,
    run_state: Mutex<bool>,
    compiled_factory: Option<CompiledFactory>,
}

impl ContainerService {
    /// Final cache identity: `(type, final_used_contracts)`
    pub fn name(&self) -> &ServiceName {
        &self.name
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn status(&self) -> ServiceStatus {
        self.status
    }

    pub fn declared_contracts(&self) -> &[ContractName] {
        &self.declared_contracts
    }

    pub fn final_used_contracts(&self) -> &[ContractName] {
        &self.name.contracts
    }

    pub fn dependencies(&self) -> &[ServiceDependency] {
        &self.dependencies
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    pub fn comment(&self) -> Option<&str> {
        self.comment.as_deref()
    }

    pub fn top_sort_index(&self) -> u64 {
        self.top_sort_index
    }

    pub fn compiled_factory(&self) -> Option<CompiledFactory> {
        self.compiled_factory.clone()
    }

    pub(crate) fn instance_entries(&self) -> &[InstanceEntry] {
        &self.instances
    }

    /// All instances, in resolution order
    pub fn all_values(&self) -> Vec<TypedInstance> {
        self.instances.iter().map(|e| e.value.clone()).collect()
    }

    /// Instances this node owns for disposal purposes
    pub(crate) fn owned_values(&self) -> impl Iterator<Item = &InstanceEntry> {
        self.instances.iter().filter(|e| e.owned)
    }

    /// Run-once guard for the post-construction runner. The guard is held
    /// for the duration of the run so concurrent callers observe completion.
    pub(crate) fn run_guard(&self) -> &Mutex<bool> {
        &self.run_state
    }

    /// Fail unless the node resolved cleanly
    pub fn check_ok(&self) -> Result<()> {
        match self.status {
            ServiceStatus::Ok => Ok(()),
            ServiceStatus::NotResolved => Err(Error::resolution(
                format!("no implementations for {}", self.type_name),
                log::format_construction_log(self),
            )),
            ServiceStatus::Error | ServiceStatus::DependencyError => Err(Error::resolution(
                self.error_summary(),
                log::format_construction_log(self),
            )),
        }
    }

    /// The single instance; errors when there are none or many
    pub fn single_value(&self) -> Result<TypedInstance> {
        self.check_ok()?;
        match self.instances.len() {
            1 => Ok(self.instances[0].value.clone()),
            0 => Err(Error::resolution(
                format!("no implementations for {}", self.type_name),
                log::format_construction_log(self),
            )),
            _ => Err(Error::resolution(
                self.many_implementations_message(),
                log::format_construction_log(self),
            )),
        }
    }

    pub(crate) fn many_implementations_message(&self) -> String {
        let list = self
            .instances
            .iter()
            .map(|e| e.source.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        format!("many implementations for [{}]\n{}", self.type_name, list)
    }

    /// First error message reachable from this node
    pub fn error_summary(&self) -> String {
        if let Some(message) = &self.error_message {
            return message.clone();
        }
        for dependency in &self.dependencies {
            if let Some(message) = &dependency.error_message {
                return message.clone();
            }
            if let Some(child) = &dependency.service {
                if child.status().is_bad() {
                    return child.error_summary();
                }
            }
        }
        format!("can't resolve {}", self.type_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::TypeRef;

    fn builder(contracts: &[&str]) -> ServiceBuilder {
        let name = ServiceName::parse(TypeRef(0), contracts).unwrap();
        ServiceBuilder::new(name, "Widget".to_string(), false, None)
    }

    fn value() -> TypedInstance {
        TypedInstance::new(TypeRef(0), Arc::new(42u32))
    }

    #[test]
    fn test_status_starts_not_resolved() {
        let b = builder(&[]);
        assert_eq!(b.status(), ServiceStatus::NotResolved);
    }

    #[test]
    fn test_first_error_wins() {
        let mut b = builder(&[]);
        b.set_error("first");
        b.set_error("second");
        let sealed = b.seal(0);
        assert_eq!(sealed.status(), ServiceStatus::Error);
        assert_eq!(sealed.error_message(), Some("first"));
    }

    #[test]
    fn test_failed_dependency_is_terminal() {
        let mut b = builder(&[]);
        b.add_dependency(ServiceDependency::error("db", "boom"));
        b.add_instance(value(), true, "Widget");
        assert_eq!(b.status(), ServiceStatus::DependencyError);
    }

    #[test]
    fn test_final_used_contracts_keep_declared_order() {
        let mut b = builder(&["c1", "c2", "c3"]);
        b.mark_used(&ContractName::new("c3").unwrap());
        b.mark_used(&ContractName::new("C1").unwrap());
        b.mark_used(&ContractName::new("other").unwrap());
        let used: Vec<String> = b
            .final_used_contracts()
            .iter()
            .map(|c| c.as_str().to_string())
            .collect();
        assert_eq!(used, vec!["c1", "c3"]);
    }

    #[test]
    fn test_single_value_requires_exactly_one() {
        let mut b = builder(&[]);
        b.add_instance(value(), true, "A");
        b.add_instance(value(), true, "B");
        let sealed = b.seal(0);
        let err = sealed.single_value().unwrap_err();
        assert!(err.to_string().contains("many implementations for [Widget]"));
        assert!(err.to_string().contains('A'));
        assert!(err.to_string().contains('B'));
    }

    #[test]
    fn test_linked_instances_are_not_owned_twice() {
        let mut child = builder(&[]);
        child.add_instance(value(), true, "Impl");
        let child = Arc::new(child.seal(0));

        let mut parent = builder(&[]);
        assert!(parent.link_child(&child, "Impl"));
        let sealed = parent.seal(1);
        assert_eq!(sealed.all_values().len(), 1);
        assert_eq!(sealed.owned_values().count(), 0);
    }
}
