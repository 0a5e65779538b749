//! `build_up`: inject an existing instance's declared slots
//!
//! Build-up never participates in the singleton cache for the target
//! itself; the injected dependencies go through the normal cache.

use crate::container::Container;
use crate::core::error::{Error, Result};
use crate::core::types::TypedInstance;
use crate::introspection::{CtorArg, CtorArgs};
use crate::resolution::builder::{ContainerService, ServiceBuilder};
use crate::resolution::context::ResolutionContext;
use crate::resolution::name::ServiceName;
use crate::resolution::resolver::Resolver;
use std::sync::Arc;
use tracing::debug;

/// Result of a `build_up` call: the target with its slots filled, plus the
/// resolved dependency services for diagnostics
pub struct BuiltUpService {
    target: TypedInstance,
    dependencies: Vec<Arc<ContainerService>>,
}

impl BuiltUpService {
    pub fn target(&self) -> &TypedInstance {
        &self.target
    }

    pub fn dependencies(&self) -> &[Arc<ContainerService>] {
        &self.dependencies
    }
}

pub(crate) struct DependenciesInjector<'c> {
    container: &'c Container,
}

impl<'c> DependenciesInjector<'c> {
    pub fn new(container: &'c Container) -> Self {
        Self { container }
    }

    pub fn inject(&self, target: TypedInstance, contracts: &[&str]) -> Result<BuiltUpService> {
        let descriptor = self.container.introspector().describe(target.ty);
        let injector = match &descriptor.injector {
            Some(injector) => injector.clone(),
            None => {
                return Err(Error::invalid_argument(format!(
                    "type [{}] declares no injectable slots",
                    descriptor.name
                )))
            }
        };

        let name = ServiceName::parse(target.ty, contracts)?;
        let resolver = Resolver::new(self.container);
        let mut ctx = ResolutionContext::new();
        ctx.contracts.push(&name.contracts);

        // A scratch builder stands in for the target; it is never cached.
        let mut scratch = ServiceBuilder::new(name, descriptor.name.clone(), true, None);
        let config = match self
            .container
            .configuration()
            .get(target.ty, &ctx.contracts.snapshot_strings())
        {
            Ok(Some(selection)) => selection.config,
            _ => Arc::new(crate::config::ServiceConfiguration::default()),
        };

        let mut values = Vec::with_capacity(injector.params.len());
        let mut dependencies = Vec::new();
        for param in &injector.params {
            let dependency = resolver.instantiate_dependency(param, &scratch, &config, &mut ctx);
            if !dependency.is_ok() {
                let message = dependency
                    .error_message
                    .clone()
                    .or_else(|| {
                        dependency
                            .service
                            .as_ref()
                            .map(|child| child.error_summary())
                    })
                    .unwrap_or_else(|| {
                        format!("can't resolve injectable slot [{}]", dependency.name)
                    });
                scratch.add_dependency(dependency);
                return Err(Error::resolution(
                    message,
                    crate::resolution::log::format_construction_log(
                        &scratch.seal(self.container.cache().next_top_sort_index()),
                    ),
                ));
            }
            if let Some(child) = &dependency.service {
                dependencies.push(Arc::clone(child));
            }
            values.push(dependency.value.clone().unwrap_or(CtorArg::Absent));
            scratch.add_dependency(dependency);
        }

        (injector.apply)(&target.value, &CtorArgs::new(values))?;
        debug!(target = %descriptor.name, slots = injector.params.len(), "build_up complete");

        Ok(BuiltUpService {
            target,
            dependencies,
        })
    }
}
