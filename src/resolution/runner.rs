//! Post-construction initialization in dependency order

use crate::core::error::Result;
use crate::core::locks::lock_mutex;
use crate::introspection::TypeIntrospector;
use crate::resolution::builder::ContainerService;
use std::sync::Arc;
use tracing::debug;

/// Run every component in the dependency closure of `service` exactly once,
/// children before parents, ordered by top-sort index. The per-service run
/// guard is held for the duration so concurrent callers observe completion.
pub(crate) fn ensure_run_called(
    introspector: &dyn TypeIntrospector,
    service: &Arc<ContainerService>,
) -> Result<()> {
    let mut children: Vec<&Arc<ContainerService>> = service
        .dependencies()
        .iter()
        .filter_map(|dependency| dependency.service.as_ref())
        .collect();
    children.sort_by_key(|child| child.top_sort_index());
    for child in children {
        ensure_run_called(introspector, child)?;
    }

    let mut done = lock_mutex(service.run_guard(), "Runner::ensure_run_called")?;
    if *done {
        return Ok(());
    }
    for entry in service.instance_entries() {
        let descriptor = introspector.describe(entry.value.ty);
        if let Some(caster) = &descriptor.component_caster {
            if let Some(component) = caster(&entry.value.value) {
                debug!(service = %service.type_name(), "running component");
                component.run()?;
            }
        }
    }
    *done = true;
    Ok(())
}
