//! Container public surface
//!
//! A `Container` is built from a frozen type registry and a frozen
//! configuration registry; configuration never changes for its lifetime.
//! `resolve` is the singleton-style lookup and never fails eagerly: value
//! access reports errors with the construction log. `create` always builds
//! fresh and is the only aborting path.

pub mod injector;

pub use injector::BuiltUpService;

use crate::config::{ConfigurationBuilder, ConfigurationRegistry};
use crate::core::error::{Error, Result};
use crate::core::types::{Arguments, TypeRef, TypedInstance};
use crate::introspection::{InheritanceIndex, TypeIntrospector, TypeRegistry};
use crate::resolution::builder::{CompiledFactory, ContainerService, ServiceStatus};
use crate::resolution::cache::ServiceCache;
use crate::resolution::context::ResolutionContext;
use crate::resolution::log::format_construction_log;
use crate::resolution::name::ServiceName;
use crate::resolution::resolver::Resolver;
use crate::resolution::runner;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

struct DisposableEntry {
    top_sort_index: u64,
    target: Arc<dyn crate::introspection::Disposable>,
    type_name: String,
}

pub(crate) struct ContainerInner {
    registry: Arc<TypeRegistry>,
    configuration: Arc<ConfigurationRegistry>,
    cache: ServiceCache,
    factory_cache: DashMap<ServiceName, CompiledFactory>,
    disposables: Mutex<Vec<DisposableEntry>>,
    disposed: AtomicBool,
}

/// Reflective dependency-injection container
#[derive(Clone)]
pub struct Container {
    inner: Arc<ContainerInner>,
}

impl Container {
    pub fn new(registry: Arc<TypeRegistry>, configuration: ConfigurationRegistry) -> Self {
        Self {
            inner: Arc::new(ContainerInner {
                registry,
                configuration: Arc::new(configuration),
                cache: ServiceCache::new(),
                factory_cache: DashMap::new(),
                disposables: Mutex::new(Vec::new()),
                disposed: AtomicBool::new(false),
            }),
        }
    }

    pub(crate) fn introspector(&self) -> &dyn TypeIntrospector {
        &*self.inner.registry
    }

    pub(crate) fn inheritance(&self) -> &dyn InheritanceIndex {
        &*self.inner.registry
    }

    pub(crate) fn configuration(&self) -> &ConfigurationRegistry {
        &self.inner.configuration
    }

    pub(crate) fn cache(&self) -> &ServiceCache {
        &self.inner.cache
    }

    /// The frozen type registry this container was built from
    pub fn registry(&self) -> &Arc<TypeRegistry> {
        &self.inner.registry
    }

    pub(crate) fn install_factory(&self, name: ServiceName, factory: CompiledFactory) {
        self.inner.factory_cache.insert(name, factory);
    }

    /// Collect container-owned disposable instances of a freshly sealed
    /// service, in top-sort order for later reverse-order disposal
    pub(crate) fn register_disposables(&self, service: &Arc<ContainerService>) {
        let mut collected = Vec::new();
        for entry in service.owned_values() {
            let descriptor = self.introspector().describe(entry.value.ty);
            if let Some(caster) = &descriptor.disposable_caster {
                if let Some(disposable) = caster(&entry.value.value) {
                    collected.push(DisposableEntry {
                        top_sort_index: service.top_sort_index(),
                        target: disposable,
                        type_name: entry.source.clone(),
                    });
                }
            }
        }
        if collected.is_empty() {
            return;
        }
        if let Ok(mut disposables) = self.inner.disposables.lock() {
            disposables.extend(collected);
        }
    }

    fn check_not_disposed(&self) -> Result<()> {
        if self.inner.disposed.load(Ordering::SeqCst) {
            return Err(Error::Disposed);
        }
        Ok(())
    }

    /// Singleton-style lookup by type handle. Never fails eagerly: a bad
    /// resolution is reported when the value is accessed.
    pub fn resolve_ref(&self, ty: TypeRef, contracts: &[&str]) -> ResolvedService {
        let resolver = Resolver::new(self);
        let (element, enumerable) = self.introspector().unwrap_enumerable(ty);
        let service = if self.inner.disposed.load(Ordering::SeqCst) {
            resolver.error_service(
                &ServiceName::no_contract(element),
                Error::Disposed.to_string(),
            )
        } else {
            match ServiceName::parse(element, contracts) {
                Ok(name) => {
                    let mut ctx = ResolutionContext::new();
                    resolver.resolve_core(&name, false, None, &mut ctx)
                }
                Err(error) => {
                    resolver.error_service(&ServiceName::no_contract(element), error.to_string())
                }
            }
        };
        ResolvedService {
            service,
            container: self.clone(),
            enumerable,
        }
    }

    /// Singleton-style lookup by Rust type
    pub fn resolve<T: ?Sized + 'static>(&self, contracts: &[&str]) -> Result<ResolvedService> {
        let ty = self
            .inner
            .registry
            .type_ref_of::<T>()
            .ok_or_else(|| Error::not_found(std::any::type_name::<T>().to_string()))?;
        Ok(self.resolve_ref(ty, contracts))
    }

    /// Always-fresh construction; the single aborting path. Enumerable
    /// requests surface every instance via [`Self::create_all`].
    pub fn create_one(
        &self,
        ty: TypeRef,
        contracts: &[&str],
        arguments: Option<Arguments>,
    ) -> Result<TypedInstance> {
        let service = self.create_service(ty, contracts, arguments)?;
        service.single_value()
    }

    /// Always-fresh construction of every implementation
    pub fn create_all(
        &self,
        ty: TypeRef,
        contracts: &[&str],
        arguments: Option<Arguments>,
    ) -> Result<Vec<TypedInstance>> {
        let service = self.create_service(ty, contracts, arguments)?;
        service.check_ok()?;
        Ok(service.all_values())
    }

    fn create_service(
        &self,
        ty: TypeRef,
        contracts: &[&str],
        arguments: Option<Arguments>,
    ) -> Result<Arc<ContainerService>> {
        self.check_not_disposed()?;
        let (element, _) = self.introspector().unwrap_enumerable(ty);
        let name = ServiceName::parse(element, contracts)?;

        // Compiled-factory fast path: repeat creates bypass resolution.
        if arguments.is_none() {
            let compiled = self
                .inner
                .factory_cache
                .get(&name)
                .map(|entry| Arc::clone(entry.value()));
            if let Some(factory) = compiled {
                debug!(?name, "create served from compiled factory");
                let value = factory(self)?;
                // Ownership matches what the first, resolved construction
                // was configured with.
                let active = name.contract_strings();
                let selection = self
                    .configuration()
                    .get(element, &active)
                    .ok()
                    .flatten()
                    .or_else(|| {
                        self.introspector()
                            .describe(element)
                            .generic
                            .as_ref()
                            .and_then(|generic| {
                                self.configuration()
                                    .get(generic.definition, &active)
                                    .ok()
                                    .flatten()
                            })
                    });
                let owned = selection
                    .map(|s| s.config.container_owns_instance != Some(false))
                    .unwrap_or(true);
                let mut builder = crate::resolution::builder::ServiceBuilder::new(
                    name.clone(),
                    self.introspector().describe(element).name.clone(),
                    true,
                    None,
                );
                builder.add_instance(
                    value,
                    owned,
                    self.introspector().describe(element).name.clone(),
                );
                let service = Arc::new(builder.seal(self.cache().next_top_sort_index()));
                self.register_disposables(&service);
                return Ok(service);
            }
        }

        let resolver = Resolver::new(self);
        let mut ctx = ResolutionContext::new();
        let service = resolver.resolve_core(&name, true, arguments.map(Arc::new), &mut ctx);
        service.check_ok()?;
        Ok(service)
    }

    /// Registered implementations of an abstract type, configuration
    /// exclusions applied
    pub fn get_implementations_of(&self, iface: TypeRef) -> Vec<TypeRef> {
        self.inheritance()
            .inheritors_of(iface)
            .into_iter()
            .filter(|candidate| {
                match self.configuration().get(*candidate, &[]) {
                    Ok(Some(selection)) => {
                        !selection.config.ignored_implementation && !selection.config.dont_use
                    }
                    _ => true,
                }
            })
            .collect()
    }

    /// Inject an existing instance's declared slots
    pub fn build_up(&self, target: TypedInstance, contracts: &[&str]) -> Result<BuiltUpService> {
        self.check_not_disposed()?;
        injector::DependenciesInjector::new(self).inject(target, contracts)
    }

    /// Resolution that visits the graph and records dependencies without
    /// invoking constructors
    pub fn analyze_ref(&self, ty: TypeRef, contracts: &[&str]) -> ResolvedService {
        let resolver = Resolver::new(self);
        let (element, enumerable) = self.introspector().unwrap_enumerable(ty);
        let service = match ServiceName::parse(element, contracts) {
            Ok(name) => {
                let mut ctx = ResolutionContext::analyze_only();
                resolver.resolve_core(&name, false, None, &mut ctx)
            }
            Err(error) => {
                resolver.error_service(&ServiceName::no_contract(element), error.to_string())
            }
        };
        ResolvedService {
            service,
            container: self.clone(),
            enumerable,
        }
    }

    /// Sibling container sharing the type registry, with overlaid
    /// configuration and a fresh service cache
    pub fn clone_with<F>(&self, configure: F) -> Container
    where
        F: FnOnce(&mut ConfigurationBuilder),
    {
        let mut builder = ConfigurationBuilder::new();
        configure(&mut builder);
        let configuration = builder
            .build()
            .with_parent(Arc::clone(&self.inner.configuration));
        Container::new(Arc::clone(&self.inner.registry), configuration)
    }

    /// Snapshot of every service published in the cache, for diagnostics
    pub fn resolved_services(&self) -> Vec<(ServiceName, Arc<ContainerService>)> {
        self.inner.cache.resolved_services()
    }

    /// Dispose container-owned disposables in reverse top-sort order,
    /// collecting failures into one aggregate. Idempotent.
    pub fn dispose(&self) -> Result<()> {
        if self.inner.disposed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let mut entries = match self.inner.disposables.lock() {
            Ok(mut disposables) => std::mem::take(&mut *disposables),
            Err(_) => return Err(Error::internal("disposables lock poisoned")),
        };
        entries.sort_by(|a, b| b.top_sort_index.cmp(&a.top_sort_index));

        let mut errors = Vec::new();
        for entry in entries {
            debug!(service = %entry.type_name, "disposing");
            match entry.target.dispose() {
                Ok(()) => {}
                Err(Error::Cancelled) => {
                    warn!(service = %entry.type_name, "dispose cancelled, ignored");
                }
                Err(Error::Aggregate(nested)) => errors.extend(nested),
                Err(error) => errors.push(error),
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(Error::Aggregate(errors))
        }
    }
}

/// Result of a `resolve` call. Holds the sealed service; value access
/// checks the status and reports failures with the construction log.
pub struct ResolvedService {
    service: Arc<ContainerService>,
    container: Container,
    enumerable: bool,
}

impl ResolvedService {
    pub fn status(&self) -> ServiceStatus {
        self.service.status()
    }

    pub fn is_ok(&self) -> bool {
        self.service.status().is_ok()
    }

    /// The sealed resolution node
    pub fn service(&self) -> &Arc<ContainerService> {
        &self.service
    }

    pub fn construction_log(&self) -> String {
        format_construction_log(&self.service)
    }

    /// The single instance; errors when the resolution failed or produced
    /// none or many instances
    pub fn single_instance(&self) -> Result<TypedInstance> {
        self.service.single_value()
    }

    /// The single instance, downcast to its concrete type
    pub fn get<T: Send + Sync + 'static>(&self) -> Result<Arc<T>> {
        let instance = self.single_instance()?;
        instance.downcast::<T>().ok_or_else(|| {
            Error::resolution(
                format!(
                    "instance of {} has unexpected runtime type",
                    self.service.type_name()
                ),
                self.construction_log(),
            )
        })
    }

    /// Every instance, in resolution order
    pub fn all_instances(&self) -> Result<Vec<TypedInstance>> {
        self.service.check_ok()?;
        Ok(self.service.all_values())
    }

    /// Whether the original request was for an enumerable type
    pub fn is_enumerable(&self) -> bool {
        self.enumerable
    }

    /// Run components in the dependency closure, children before parents,
    /// each exactly once
    pub fn ensure_run_called(&self) -> Result<()> {
        runner::ensure_run_called(self.container.introspector(), &self.service)
    }
}
