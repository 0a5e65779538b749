//! Instance construction: the dispatch table, the interface and
//! implementation paths and per-parameter dependency resolution

use crate::config::{ParameterOverride, ServiceConfiguration};
use crate::container::Container;
use crate::core::error::Result;
use crate::core::types::{
    Arguments, Instance, Resource, ServiceIdentity, TypeRef, TypedInstance,
};
use crate::introspection::{
    ConstructorInfo, ConstructorLookup, CtorArg, CtorArgs, TypeDescriptor, TypeKind,
};
use crate::resolution::builder::{
    DependencyStatus, ServiceBuilder, ServiceDependency, ServiceStatus,
};
use crate::resolution::context::ResolutionContext;
use crate::resolution::name::ServiceName;
use crate::resolution::resolver::Resolver;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tracing::debug;

impl<'c> Resolver<'c> {
    /// Precondition dispatch, in priority order
    pub(crate) fn instantiate(
        &self,
        builder: &mut ServiceBuilder,
        config: &Arc<ServiceConfiguration>,
        ctx: &mut ResolutionContext,
    ) {
        let descriptor = self.container.introspector().describe(builder.ty());

        if descriptor.simple {
            builder.set_error(format!("can't create simple type [{}]", descriptor.name));
        } else if descriptor.is_container {
            let instance = TypedInstance::new(
                builder.ty(),
                Arc::new(self.container.clone()) as Instance,
            );
            builder.add_instance(instance, false, descriptor.name.clone());
        } else if let Some(assigned) = &config.implementation_assigned {
            builder.add_instance(
                assigned.clone(),
                config.container_owns_instance == Some(true),
                descriptor.name.clone(),
            );
        } else if let Some(factory) = &config.factory {
            if ctx.analyze_dependencies_only {
                builder.mark_ok();
            } else {
                match factory(self.container) {
                    Ok(value) => {
                        builder.add_instance(
                            value,
                            config.container_owns_instance != Some(false),
                            descriptor.name.clone(),
                        );
                        builder.set_compiled_factory(Arc::clone(factory));
                    }
                    Err(error) => builder.set_error(error.to_string()),
                }
            }
        } else if let Some(factory) = &config.factory_with_target {
            // Top-level resolution has no requester; the factory gets None.
            let parent = ctx.parent_of_current();
            if ctx.analyze_dependencies_only {
                builder.mark_ok();
            } else {
                match factory(self.container, parent) {
                    Ok(value) => {
                        builder.add_instance(
                            value,
                            config.container_owns_instance != Some(false),
                            descriptor.name.clone(),
                        );
                        let factory = Arc::clone(factory);
                        builder.set_compiled_factory(Arc::new(move |container: &Container| {
                            factory(container, parent)
                        }));
                    }
                    Err(error) => builder.set_error(error.to_string()),
                }
            }
        } else if descriptor.value_object {
            builder.set_error(format!("can't create value type [{}]", descriptor.name));
        } else if descriptor.open_generic {
            builder.set_error(format!("can't create open generic [{}]", descriptor.name));
        } else if descriptor.per_request && !builder.create_new {
            builder.set_error(format!(
                "can't resolve per request service [{}], use a factory instead",
                descriptor.name
            ));
        } else if matches!(descriptor.kind, TypeKind::Abstract) {
            self.instantiate_interface(builder, config, &descriptor, ctx);
        } else {
            self.instantiate_implementation(builder, config, &descriptor, ctx);
        }

        if let Some(filter) = &config.instance_filter {
            builder.apply_filter(filter);
        }
    }

    /// Resolve an abstract type by resolving its implementation candidates
    fn instantiate_interface(
        &self,
        builder: &mut ServiceBuilder,
        config: &Arc<ServiceConfiguration>,
        descriptor: &Arc<TypeDescriptor>,
        ctx: &mut ResolutionContext,
    ) {
        let ty = builder.ty();

        // 1. Candidate set: the explicit list, optionally unioned with the
        // inheritance scan.
        let mut candidates: Vec<TypeRef> = match &config.implementation_types {
            Some(explicit) => {
                let mut list = explicit.clone();
                if config.use_autosearch {
                    for inheritor in self.container.inheritance().inheritors_of(ty) {
                        if !list.contains(&inheritor) {
                            list.push(inheritor);
                        }
                    }
                }
                list
            }
            None => self.container.inheritance().inheritors_of(ty),
        };

        // 2. Selector callbacks may include or exclude candidates.
        let mut rejected: Vec<(TypeRef, String)> = Vec::new();
        for selector in &config.selectors {
            for decision in selector(ty, &candidates) {
                if decision.include {
                    if !candidates.contains(&decision.target) {
                        candidates.push(decision.target);
                    }
                } else {
                    candidates.retain(|c| *c != decision.target);
                    rejected.push((
                        decision.target,
                        decision
                            .comment
                            .unwrap_or_else(|| "excluded by selector".to_string()),
                    ));
                }
            }
        }

        // 3+4. Close generics, resolve each accepted candidate, link.
        let mut linked_ok = Vec::new();
        for candidate in candidates {
            let active = ctx.contracts.snapshot_strings();
            if let Ok(Some(selection)) = self.container.configuration().get(candidate, &active) {
                if selection.config.ignored_implementation {
                    builder.record_dependency(ServiceDependency::not_resolved(
                        None,
                        self.container.introspector().describe(candidate).name.clone(),
                        Some("IgnoredImplementation".to_string()),
                    ));
                    continue;
                }
            }

            let candidate_descriptor = self.container.introspector().describe(candidate);
            let effective = if candidate_descriptor.open_generic {
                let closed = self
                    .container
                    .introspector()
                    .try_close_by_pattern(candidate, ty, ty)
                    .or_else(|| {
                        builder.arguments.as_ref().and_then(|args| {
                            self.container
                                .introspector()
                                .try_close_by_arguments(candidate, &args.value_types())
                        })
                    });
                match closed {
                    Some(closed) => closed,
                    None => {
                        builder.record_dependency(ServiceDependency::not_resolved(
                            None,
                            candidate_descriptor.name.clone(),
                            Some(format!(
                                "can't close [{}] against [{}]",
                                candidate_descriptor.name, descriptor.name
                            )),
                        ));
                        continue;
                    }
                }
            } else {
                candidate
            };

            let child_name = ServiceName::no_contract(effective);
            let child = self.resolve_core(
                &child_name,
                builder.create_new,
                builder.arguments.clone(),
                ctx,
            );
            let display = self.container.introspector().describe(effective).name.clone();
            let linked = builder.link_child(&child, display);
            if child.status().is_ok() {
                linked_ok.push(child);
            }
            if !linked {
                break;
            }
        }

        // 5. Rejected candidates stay visible in the construction log.
        for (target, comment) in rejected {
            builder.record_dependency(ServiceDependency::not_resolved(
                None,
                self.container.introspector().describe(target).name.clone(),
                Some(comment),
            ));
        }

        // 6.
        builder.end_resolve_dependencies();
        if builder.status() == ServiceStatus::NotResolved && builder.instance_count() == 0 {
            builder.set_comment("has no implementations");
        }

        // 7. Factory cache shortcut: a transient interface resolution with a
        // single compiled implementation reuses its factory.
        if builder.create_new && builder.arguments.is_none() && linked_ok.len() == 1 {
            if let Some(factory) = linked_ok[0].compiled_factory() {
                builder.set_compiled_factory(factory);
            }
        }
    }

    /// Construct a concrete type through its registered constructor
    fn instantiate_implementation(
        &self,
        builder: &mut ServiceBuilder,
        config: &Arc<ServiceConfiguration>,
        descriptor: &Arc<TypeDescriptor>,
        ctx: &mut ResolutionContext,
    ) {
        // 1.
        if config.dont_use {
            builder.set_comment("DontUse");
            return;
        }

        // 2. Function-shaped services are satisfied by plugin values
        // instead of constructor wiring.
        match &descriptor.kind {
            TypeKind::Factory { result } => {
                self.plugin_factory(builder, *result, descriptor);
                return;
            }
            TypeKind::Lazy(inner) => {
                self.plugin_lazy(builder, *inner, descriptor);
                return;
            }
            TypeKind::FactoryWithArg { arg, result } => {
                self.plugin_nested_factory(builder, *arg, *result, descriptor);
                return;
            }
            _ => {}
        }

        // 3.
        if self.container.introspector().is_delegate(builder.ty()) {
            builder.set_error(format!("can't create delegate [{}]", descriptor.name));
            return;
        }

        // 4. Constructor selection; "none" and "many" are distinct errors.
        let ctor = match self.container.introspector().get_constructor(builder.ty()) {
            ConstructorLookup::Found(ctor) => ctor,
            ConstructorLookup::None => {
                builder.set_error(format!("no public ctors for type [{}]", descriptor.name));
                return;
            }
            ConstructorLookup::Many => {
                builder.set_error(format!("many public ctors for type [{}]", descriptor.name));
                return;
            }
        };

        // 5. Resolve each formal parameter; service-name slots are deferred
        // until the final name is known.
        let mut actual: Vec<CtorArg> = Vec::with_capacity(ctor.params.len());
        let mut deferred_identity: Vec<usize> = Vec::new();
        for param in &ctor.params {
            let param_descriptor = self.container.introspector().describe(param.ty);
            if param_descriptor.is_service_name {
                deferred_identity.push(actual.len());
                actual.push(CtorArg::Absent);
                continue;
            }
            let dependency = self.instantiate_dependency(param, builder, config, ctx);
            let ok = dependency.is_ok();
            let value = dependency.value.clone();
            builder.add_dependency(dependency);
            if !ok && !ctx.analyze_dependencies_only {
                return;
            }
            actual.push(value.unwrap_or(CtorArg::Absent));
        }

        // 6. Implicit dependencies, annotated in the log.
        for implicit in &config.implicit_dependencies {
            let display = self.container.introspector().describe(implicit.ty).name.clone();
            let dependency = match ServiceName::parse(implicit.ty, &implicit.contracts) {
                Ok(dep_name) => {
                    let child = self.resolve_core(&dep_name, false, None, ctx);
                    match child.status() {
                        ServiceStatus::Ok => {
                            ServiceDependency::linked(child, display).with_comment("implicit")
                        }
                        ServiceStatus::NotResolved => ServiceDependency::not_resolved(
                            Some(child),
                            display,
                            Some("implicit".to_string()),
                        ),
                        ServiceStatus::Error | ServiceStatus::DependencyError => {
                            ServiceDependency::service_error(child, display)
                                .with_comment("implicit")
                        }
                    }
                }
                Err(error) => ServiceDependency::error(display, error.to_string()),
            };
            let ok = dependency.is_ok();
            builder.add_dependency(dependency);
            if !ok && !ctx.analyze_dependencies_only {
                return;
            }
        }

        // 7.
        builder.end_resolve_dependencies();

        // 8. Configured overrides the constructor never consulted are an
        // error, unless the per-call arguments cover them.
        let param_names: HashSet<&str> = ctor.params.iter().map(|p| p.name.as_str()).collect();
        let mut unused: Vec<&str> = config
            .parameter_overrides
            .keys()
            .map(|k| k.as_str())
            .filter(|k| !param_names.contains(k))
            .filter(|k| {
                builder
                    .arguments
                    .as_ref()
                    .map(|args| !args.contains(k))
                    .unwrap_or(true)
            })
            .collect();
        if !unused.is_empty() {
            unused.sort_unstable();
            builder.set_error(format!(
                "unused dependency configurations [{}]",
                unused.join(",")
            ));
            return;
        }

        // 9. Fill deferred service-name slots with the final identity.
        if !deferred_identity.is_empty() {
            let identity = Arc::new(ServiceIdentity {
                type_name: descriptor.name.clone(),
                contracts: builder.final_name().contract_strings(),
            });
            for index in deferred_identity {
                actual[index] = CtorArg::Identity(Arc::clone(&identity));
            }
        }

        if builder.status().is_bad() {
            return;
        }
        if ctx.analyze_dependencies_only {
            builder.mark_ok();
            return;
        }

        // 10/11. Final-name cache collapse: a node that consulted strictly
        // fewer contracts than declared deduplicates through the final-name
        // slot instead of constructing its own instance.
        let declared_len = builder.declared_contracts().len();
        let used_len = builder.final_used_contracts().len();
        if builder.create_new || declared_len == used_len {
            self.invoke_constructor(builder, &ctor, &actual, config, descriptor);
            if builder.create_new && builder.arguments.is_none() && !builder.status().is_bad() {
                let invoke = Arc::clone(&ctor.invoke);
                let ty = builder.ty();
                let args = actual;
                builder.set_compiled_factory(Arc::new(move |_container: &Container| {
                    invoke(&CtorArgs::new(args.clone()))
                        .map(|instance| TypedInstance::new(ty, instance))
                }));
            }
        } else {
            let final_name = builder.final_name();
            let slot = self.container.cache().get_or_create(&final_name);
            match slot.acquire_instantiate_lock() {
                Ok(crate::resolution::cache::AcquireResult::Acquired) => {
                    self.invoke_constructor(builder, &ctor, &actual, config, descriptor);
                    builder.final_slot = Some(slot);
                }
                Ok(crate::resolution::cache::AcquireResult::AlreadyDone(cached)) => {
                    debug!(service = %descriptor.name, "collapsed onto final-name cache entry");
                    builder.reuse(&cached);
                }
                Err(error) => builder.set_error(error.to_string()),
            }
        }
    }

    fn invoke_constructor(
        &self,
        builder: &mut ServiceBuilder,
        ctor: &Arc<ConstructorInfo>,
        actual: &[CtorArg],
        config: &Arc<ServiceConfiguration>,
        descriptor: &Arc<TypeDescriptor>,
    ) {
        match (ctor.invoke)(&CtorArgs::new(actual.to_vec())) {
            Ok(instance) => {
                debug!(service = %descriptor.name, "instance constructed");
                builder.add_instance(
                    TypedInstance::new(builder.ty(), instance),
                    config.container_owns_instance != Some(false),
                    descriptor.name.clone(),
                );
            }
            Err(error) => {
                builder.set_error(format!(
                    "error constructing [{}]: {}",
                    descriptor.name, error
                ));
            }
        }
    }

    /// Resolve one constructor parameter, first match wins
    pub(crate) fn instantiate_dependency(
        &self,
        param: &crate::introspection::ParameterInfo,
        builder: &ServiceBuilder,
        config: &Arc<ServiceConfiguration>,
        ctx: &mut ResolutionContext,
    ) -> ServiceDependency {
        // 1. Explicit per-call argument.
        if let Some(args) = &builder.arguments {
            if let Some(value) = args.get(param.name.as_str()) {
                return ServiceDependency::constant(param.name.as_str(), CtorArg::Value(value.clone()));
            }
        }

        // 2. External parameters source.
        if let Some(source) = &config.parameters_source {
            if let Some(value) = source.try_get(param.name.as_str(), param.ty) {
                return ServiceDependency::constant(param.name.as_str(), CtorArg::Value(value));
            }
        }

        // 3. Configured override: constant, sub-factory or implementation.
        let mut dependency_ty = param.ty;
        match config.parameter_overrides.get(param.name.as_str()) {
            Some(ParameterOverride::Value(value)) => {
                return ServiceDependency::constant(param.name.as_str(), CtorArg::Value(value.clone()));
            }
            Some(ParameterOverride::Factory(factory)) => {
                if ctx.analyze_dependencies_only {
                    return ServiceDependency::constant(param.name.as_str(), CtorArg::Absent)
                        .with_comment("factory override");
                }
                return match factory(self.container) {
                    Ok(value) => ServiceDependency::constant(param.name.as_str(), CtorArg::Value(value))
                        .with_comment("factory override"),
                    Err(error) => ServiceDependency::error(param.name.as_str(), error.to_string()),
                };
            }
            Some(ParameterOverride::Implementation(ty)) => dependency_ty = *ty,
            None => {}
        }

        // 4. Embedded resource of the declaring type.
        if let Some(resource_name) = &param.attrs.from_resource {
            return match self
                .container
                .introspector()
                .get_manifest_resource_stream(builder.ty(), resource_name)
            {
                Some(bytes) => ServiceDependency::constant(
                    param.name.as_str(),
                    CtorArg::Value(TypedInstance::new(
                        param.ty,
                        Arc::new(Resource::new(bytes)) as Instance,
                    )),
                ),
                None => ServiceDependency::error(
                    param.name.as_str(),
                    format!(
                        "can't find resource [{}] in type [{}]",
                        resource_name,
                        builder.type_name()
                    ),
                ),
            };
        }

        // 5. Compose the dependency identity.
        let (element, enumerable) = self.container.introspector().unwrap_enumerable(dependency_ty);
        let dependency_name = match ServiceName::parse(element, &param.attrs.contracts) {
            Ok(name) => name,
            Err(error) => return ServiceDependency::error(param.name.as_str(), error.to_string()),
        };

        // 6. Simple leaves need configuration or a default.
        if self.container.introspector().is_simple_type(element) {
            return if param.has_default {
                match &param.default_value {
                    Some(value) => {
                        ServiceDependency::constant(param.name.as_str(), CtorArg::Value(value.clone()))
                            .with_comment("default")
                    }
                    None => ServiceDependency::absent(param.name.as_str()),
                }
            } else {
                ServiceDependency::error(
                    param.name.as_str(),
                    format!(
                        "parameter [{}] of service [{}] is not configured",
                        param.name,
                        builder.type_name()
                    ),
                )
            };
        }

        // 7. Recurse. An enumerable request succeeds with however many
        // instances exist, including none; only a failed child propagates.
        let child = self.resolve_core(&dependency_name, false, None, ctx);
        match child.status() {
            ServiceStatus::Error | ServiceStatus::DependencyError => {
                ServiceDependency::service_error(child, param.name.as_str())
            }
            _ if enumerable => {
                let values = child.all_values();
                ServiceDependency::service(child, param.name.as_str(), CtorArg::Sequence(values))
            }
            ServiceStatus::NotResolved => {
                if param.has_default {
                    match &param.default_value {
                        Some(value) => ServiceDependency::service(
                            child,
                            param.name.as_str(),
                            CtorArg::Value(value.clone()),
                        )
                        .with_comment("default"),
                        None => ServiceDependency::absent(param.name.as_str()),
                    }
                } else if param.attrs.optional {
                    ServiceDependency::absent(param.name.as_str())
                } else {
                    ServiceDependency::not_resolved(Some(child), param.name.as_str(), None)
                }
            }
            ServiceStatus::Ok => {
                let values = child.all_values();
                match values.len() {
                    1 => ServiceDependency::service(
                        child,
                        param.name.as_str(),
                        CtorArg::Value(values.into_iter().next().expect("length checked")),
                    ),
                    0 => {
                        if param.has_default {
                            match &param.default_value {
                                Some(value) => ServiceDependency::service(
                                    child,
                                    param.name.as_str(),
                                    CtorArg::Value(value.clone()),
                                )
                                .with_comment("default"),
                                None => ServiceDependency::absent(param.name.as_str()),
                            }
                        } else if param.attrs.optional {
                            ServiceDependency::absent(param.name.as_str())
                        } else {
                            ServiceDependency::not_resolved(Some(child), param.name.as_str(), None)
                        }
                    }
                    _ => {
                        let message = child.many_implementations_message();
                        ServiceDependency {
                            name: param.name.clone(),
                            status: DependencyStatus::Error,
                            value: None,
                            comment: None,
                            service: Some(child),
                            error_message: Some(message),
                        }
                    }
                }
            }
        }
    }

    /// `Func<T>`-shaped service: a value creating fresh results on each call
    fn plugin_factory(
        &self,
        builder: &mut ServiceBuilder,
        result: TypeRef,
        descriptor: &Arc<TypeDescriptor>,
    ) {
        let value = FactoryValue {
            container: self.container.clone(),
            result,
            contracts: builder.declared_name().contract_strings(),
        };
        builder.add_instance(
            TypedInstance::new(builder.ty(), Arc::new(value) as Instance),
            false,
            descriptor.name.clone(),
        );
    }

    /// `Lazy<T>`-shaped service: resolves its inner type once on first access
    fn plugin_lazy(
        &self,
        builder: &mut ServiceBuilder,
        inner: TypeRef,
        descriptor: &Arc<TypeDescriptor>,
    ) {
        let value = LazyValue {
            container: self.container.clone(),
            inner,
            contracts: builder.declared_name().contract_strings(),
            cell: Mutex::new(None),
        };
        builder.add_instance(
            TypedInstance::new(builder.ty(), Arc::new(value) as Instance),
            false,
            descriptor.name.clone(),
        );
    }

    /// `Func<TArg, T>`-shaped service: the argument binds by type to a
    /// constructor parameter of the result type
    fn plugin_nested_factory(
        &self,
        builder: &mut ServiceBuilder,
        arg: TypeRef,
        result: TypeRef,
        descriptor: &Arc<TypeDescriptor>,
    ) {
        let value = ArgumentFactoryValue {
            container: self.container.clone(),
            arg_ty: arg,
            result,
            contracts: builder.declared_name().contract_strings(),
        };
        builder.add_instance(
            TypedInstance::new(builder.ty(), Arc::new(value) as Instance),
            false,
            descriptor.name.clone(),
        );
    }
}

/// Injectable factory creating a fresh result per call.
///
/// Also covers named-argument creation: `create_with` forwards a per-call
/// argument set the way `Container::create` does.
pub struct FactoryValue {
    container: Container,
    result: TypeRef,
    contracts: Vec<String>,
}

impl FactoryValue {
    pub fn create(&self) -> Result<TypedInstance> {
        let contracts: Vec<&str> = self.contracts.iter().map(String::as_str).collect();
        self.container.create_one(self.result, &contracts, None)
    }

    pub fn create_with(&self, arguments: Arguments) -> Result<TypedInstance> {
        let contracts: Vec<&str> = self.contracts.iter().map(String::as_str).collect();
        self.container
            .create_one(self.result, &contracts, Some(arguments))
    }
}

/// Injectable lazy wrapper resolving its inner service on first access
pub struct LazyValue {
    container: Container,
    inner: TypeRef,
    contracts: Vec<String>,
    cell: Mutex<Option<TypedInstance>>,
}

impl LazyValue {
    pub fn get(&self) -> Result<TypedInstance> {
        let mut cell = crate::core::locks::lock_mutex(&self.cell, "LazyValue::get")?;
        if let Some(value) = cell.as_ref() {
            return Ok(value.clone());
        }
        let contracts: Vec<&str> = self.contracts.iter().map(String::as_str).collect();
        let resolved = self
            .container
            .resolve_ref(self.inner, &contracts)
            .single_instance()?;
        *cell = Some(resolved.clone());
        Ok(resolved)
    }
}

/// Injectable one-argument factory; the argument binds by type to a
/// constructor parameter of the result type
pub struct ArgumentFactoryValue {
    container: Container,
    arg_ty: TypeRef,
    result: TypeRef,
    contracts: Vec<String>,
}

impl ArgumentFactoryValue {
    pub fn create(&self, argument: TypedInstance) -> Result<TypedInstance> {
        let introspector = self.container.introspector();
        let ctor = match introspector.get_constructor(self.result) {
            ConstructorLookup::Found(ctor) => ctor,
            _ => {
                return Err(crate::core::error::Error::invalid_argument(format!(
                    "[{}] has no single public constructor to bind an argument to",
                    introspector.describe(self.result).name
                )))
            }
        };
        let param = ctor
            .params
            .iter()
            .find(|p| introspector.is_assignable(self.arg_ty, p.ty))
            .ok_or_else(|| {
                crate::core::error::Error::invalid_argument(format!(
                    "no constructor parameter of [{}] accepts [{}]",
                    introspector.describe(self.result).name,
                    introspector.describe(self.arg_ty).name
                ))
            })?;
        let arguments = Arguments::new().with(param.name.clone(), argument);
        let contracts: Vec<&str> = self.contracts.iter().map(String::as_str).collect();
        self.container
            .create_one(self.result, &contracts, Some(arguments))
    }
}
