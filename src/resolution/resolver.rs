//! The recursive resolution engine
//!
//! `resolve_core` is the single entry for every resolution: it checks for
//! cycles, pushes the requested contracts, consults configuration, claims
//! the cache slot, dispatches to the instantiator and unwinds symmetrically
//! so the context leaves exactly as it entered.

use crate::config::ConfigSelection;
use crate::container::Container;
use crate::core::types::Arguments;
use crate::resolution::builder::{ContainerService, ServiceBuilder};
use crate::resolution::cache::{AcquireResult, CacheSlot};
use crate::resolution::context::{Frame, ResolutionContext};
use crate::resolution::contracts::PushResult;
use crate::resolution::name::{ContractName, ServiceName};
use std::sync::Arc;
use tracing::debug;

pub(crate) struct Resolver<'c> {
    pub container: &'c Container,
}

impl<'c> Resolver<'c> {
    pub fn new(container: &'c Container) -> Self {
        Self { container }
    }

    fn type_name(&self, ty: crate::core::types::TypeRef) -> String {
        self.container.introspector().describe(ty).name.clone()
    }

    /// Build a one-off error service. Never cached.
    pub(crate) fn error_service(&self, name: &ServiceName, message: String) -> Arc<ContainerService> {
        let mut builder = ServiceBuilder::new(name.clone(), self.type_name(name.ty), false, None);
        builder.set_error(message);
        Arc::new(builder.seal(self.container.cache().next_top_sort_index()))
    }

    /// The central resolution algorithm; always returns a sealed service
    /// (error nodes included), and always restores `ctx` to its entry state.
    pub fn resolve_core(
        &self,
        name: &ServiceName,
        create_new: bool,
        arguments: Option<Arc<Arguments>>,
        ctx: &mut ResolutionContext,
    ) -> Arc<ContainerService> {
        // 1. Cycle check. The attempted re-entry is reported, not cached.
        if !ctx.enter(name) {
            let chain = ctx
                .cycle_chain(name)
                .into_iter()
                .map(|ty| self.type_name(ty))
                .collect::<Vec<_>>()
                .join(" -> ");
            return self.error_service(name, format!("cyclic dependency {}", chain));
        }

        // 2. Contract push, all-or-nothing.
        let pushed = match ctx.contracts.push(&name.contracts) {
            PushResult::Pushed { pushed } => pushed,
            PushResult::Duplicate(duplicate) => {
                let message = format!(
                    "contract [{}] already declared, stack [{}]",
                    duplicate,
                    ctx.contracts.snapshot_strings().join(", ")
                );
                ctx.exit(name);
                return self.error_service(name, message);
            }
        };

        // 3. Configuration lookup, generic-definition fallback, exceptions
        // captured and deferred onto the builder.
        let active = ctx.contracts.snapshot_strings();
        let descriptor = self.container.introspector().describe(name.ty);
        let mut configuration_error: Option<String> = None;
        let selection: Option<ConfigSelection> =
            match self.container.configuration().get(name.ty, &active) {
                Ok(Some(selection)) => Some(selection),
                Ok(None) => match &descriptor.generic {
                    Some(generic) => {
                        match self.container.configuration().get(generic.definition, &active) {
                            Ok(selection) => selection,
                            Err(error) => {
                                configuration_error = Some(error.to_string());
                                None
                            }
                        }
                    }
                    None => None,
                },
                Err(error) => {
                    configuration_error = Some(error.to_string());
                    None
                }
            };

        // 4. Declared name: the full stack snapshot, plus the requesting
        // type as an extra contract for factory_with_target services so
        // different callers get distinct cache identities.
        let mut declared_contracts = ctx.contracts.snapshot();
        let mut target_contract: Option<ContractName> = None;
        let has_target_factory = selection
            .as_ref()
            .map(|s| s.config.factory_with_target.is_some())
            .unwrap_or(false);
        if has_target_factory {
            if let Some(parent_ty) = ctx.requesting_type() {
                if let Ok(extra) = ContractName::new(self.type_name(parent_ty)) {
                    if !declared_contracts.contains(&extra) {
                        declared_contracts.push(extra.clone());
                        target_contract = Some(extra);
                    }
                }
            }
        }
        let declared_name = ServiceName::new(name.ty, declared_contracts);

        // 5. Slot acquisition, singleton path only.
        let mut acquired_slot: Option<Arc<CacheSlot>> = None;
        if !create_new {
            let slot = self.container.cache().get_or_create(&declared_name);
            match slot.acquire_instantiate_lock() {
                Ok(AcquireResult::AlreadyDone(service)) => {
                    debug!(service = %service.type_name(), "cache hit");
                    ctx.contracts.pop(pushed);
                    ctx.exit(name);
                    return service;
                }
                Ok(AcquireResult::Acquired) => acquired_slot = Some(slot),
                Err(error) => {
                    ctx.contracts.pop(pushed);
                    ctx.exit(name);
                    return self.error_service(name, error.to_string());
                }
            }
        }

        // 6. Builder setup.
        let mut builder = ServiceBuilder::new(
            declared_name.clone(),
            descriptor.name.clone(),
            create_new,
            arguments.clone(),
        );
        if let Some(extra) = &target_contract {
            builder.mark_used(extra);
        }
        if let Some(selection) = &selection {
            builder.mark_used_strings(&selection.used_contracts);
        }
        ctx.stack.push(Frame {
            ty: name.ty,
            name: declared_name.clone(),
        });

        // 7. Dispatch.
        if let Some(message) = configuration_error {
            builder.set_error(message);
        } else if let Some(expansion) =
            ctx.contracts.try_expand_unions(self.container.configuration())
        {
            let popped = ctx.contracts.pop(expansion.suffix_len);
            for alternative in expansion.alternatives {
                let child_name = ServiceName::new(name.ty, alternative);
                let child =
                    self.resolve_core(&child_name, create_new, arguments.clone(), ctx);
                // A union contract counts as consulted when a child
                // consulted one of its expanded members.
                for contract in &popped {
                    if let Some(members) =
                        self.container.configuration().union_of(contract.as_str())
                    {
                        let consumed = child
                            .final_used_contracts()
                            .iter()
                            .any(|used| members.iter().any(|m| used.matches(m)));
                        if consumed {
                            builder.mark_used(contract);
                        }
                    }
                }
                let display = child
                    .final_used_contracts()
                    .iter()
                    .map(|c| c.as_str().to_string())
                    .collect::<Vec<_>>()
                    .join(",");
                if !builder.link_child(&child, format!("[{}]", display)) {
                    break;
                }
            }
            ctx.contracts.push_restored(popped);
        } else {
            let config = selection.map(|s| s.config).unwrap_or_default();
            self.instantiate(&mut builder, &config, ctx);
        }

        // 8. Unwind. The context leaves exactly as it entered.
        ctx.stack.pop();
        ctx.contracts.pop(pushed);
        ctx.exit(name);

        let final_slot = builder.final_slot.take();
        let service = Arc::new(builder.seal(self.container.cache().next_top_sort_index()));

        if !ctx.analyze_dependencies_only {
            self.container.register_disposables(&service);
            if service.status().is_ok() {
                if let Some(factory) = service.compiled_factory() {
                    self.container
                        .install_factory(service.name().clone(), Arc::clone(&factory));
                    self.container
                        .install_factory(declared_name.clone(), factory);
                }
            }
        }

        // 9. Release the slots, publishing the sealed service and waking
        // every waiter. Analyze mode releases the claim without publishing.
        let published = if ctx.analyze_dependencies_only {
            None
        } else {
            Some(Arc::clone(&service))
        };
        if let Some(slot) = final_slot {
            let _ = slot.release_instantiate_lock(published.clone());
        }
        if let Some(slot) = acquired_slot {
            let _ = slot.release_instantiate_lock(published);
        }
        service
    }
}
