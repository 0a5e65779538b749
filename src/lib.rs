//! Solder - a reflective dependency-injection container
//!
//! Given a registered set of component types, frozen configuration
//! overrides and a request for a service type (optionally qualified by
//! string contracts), the container returns fully-constructed instances
//! whose transitive dependencies have been resolved, cached and wired
//! through constructor parameters.

pub mod config;
pub mod container;
pub mod core;
pub mod introspection;
pub mod resolution;

// Re-export the public surface
pub use container::{BuiltUpService, Container, ResolvedService};

// Re-export configuration
pub use config::{
    ConfigurationBuilder, ConfigurationRegistry, ParameterOverride, ParametersSource,
    SelectionDecision, ServiceConfiguration,
};

// Re-export type registration
pub use introspection::{
    Component, ConstructorLookup, CtorArg, CtorArgs, Disposable, Param, ParameterAttributes,
    ParameterInfo, TypeIntrospector, TypeRegistry, TypeRegistryBuilder,
};

// Re-export resolution primitives
pub use resolution::{
    ArgumentFactoryValue, ContainerService, ContractName, FactoryValue, LazyValue, ServiceName,
    ServiceStatus,
};

pub use crate::core::error::{Error, Result};
pub use crate::core::types::{
    Arguments, Instance, Resource, ServiceIdentity, TypeRef, TypedInstance,
};
