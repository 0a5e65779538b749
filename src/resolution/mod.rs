//! The resolution engine: names, contracts, cache, builders and the
//! recursive resolver

pub mod builder;
pub mod cache;
pub mod context;
pub mod contracts;
pub mod instantiator;
pub mod log;
pub mod name;
pub mod resolver;
pub mod runner;

pub use builder::{
    CompiledFactory, ContainerService, DependencyStatus, ServiceBuilder, ServiceDependency,
    ServiceStatus,
};
pub use cache::{AcquireResult, CacheSlot, ServiceCache};
pub use context::ResolutionContext;
pub use contracts::{ContractsList, PushResult, UnionExpansion};
pub use instantiator::{ArgumentFactoryValue, FactoryValue, LazyValue};
pub use log::format_construction_log;
pub use name::{ContractName, ServiceName};
