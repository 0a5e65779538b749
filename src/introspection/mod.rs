//! Type introspection consumed by the resolution engine
//!
//! Rust has no runtime reflection, so "introspection" is a data registry
//! populated once at startup: every participating type is registered with a
//! [`TypeDescriptor`] carrying its name, shape, declared constructor and
//! lifecycle hooks. The engine only sees the narrow [`TypeIntrospector`]
//! trait; [`TypeRegistry`] is the default implementation.

pub mod inheritance;
pub mod registry;

pub use inheritance::InheritanceIndex;
pub use registry::{Param, TypeRegistry, TypeRegistryBuilder};

use crate::core::error::{Error, Result};
use crate::core::types::{Instance, ServiceIdentity, TypeRef, TypedInstance};
use std::collections::HashMap;
use std::sync::Arc;

/// Post-construction lifecycle hook, invoked once per service by the runner
pub trait Component: Send + Sync {
    fn run(&self) -> Result<()>;
}

/// Cleanup hook, invoked by `Container::dispose` for container-owned instances
pub trait Disposable: Send + Sync {
    fn dispose(&self) -> Result<()>;
}

/// Casts an erased instance to its `Component` view
pub type ComponentCaster = Arc<dyn Fn(&Instance) -> Option<Arc<dyn Component>> + Send + Sync>;

/// Casts an erased instance to its `Disposable` view
pub type DisposableCaster = Arc<dyn Fn(&Instance) -> Option<Arc<dyn Disposable>> + Send + Sync>;

/// The shape of a registered type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeKind {
    /// Constructible class with a declared constructor
    Concrete,
    /// Interface or abstract base, satisfied by implementations
    Abstract,
    /// `sequence<T>` wrapper around an element type
    Sequence(TypeRef),
    /// Zero-argument factory producing the result type on each call
    Factory { result: TypeRef },
    /// One-argument factory, the argument bound by type at the call site
    FactoryWithArg { arg: TypeRef, result: TypeRef },
    /// Lazily-resolved wrapper, resolving its inner type on first access
    Lazy(TypeRef),
    /// Any other function-shaped type the container refuses to construct
    Delegate,
}

/// Link from a closed generic instantiation back to its definition
#[derive(Debug, Clone)]
pub struct GenericInfo {
    pub definition: TypeRef,
    pub args: Vec<TypeRef>,
}

/// Everything the engine knows about one registered type
pub struct TypeDescriptor {
    pub ty: TypeRef,
    pub name: String,
    pub kind: TypeKind,
    /// Primitive-like value (numbers, strings, bools); never constructed
    pub simple: bool,
    /// Value-semantics record that cannot be realized by the container
    pub value_object: bool,
    /// Must be created per request (via `create` or a factory), never resolved
    pub per_request: bool,
    /// Open generic definition awaiting instantiation
    pub open_generic: bool,
    /// The well-known container type itself
    pub is_container: bool,
    /// The well-known service-name type, deferred during wiring
    pub is_service_name: bool,
    /// Directly declared supertypes (interfaces this type satisfies)
    pub implements: Vec<TypeRef>,
    /// For closed generics, the definition this instantiates
    pub generic: Option<GenericInfo>,
    pub component_caster: Option<ComponentCaster>,
    pub disposable_caster: Option<DisposableCaster>,
    /// Declared injectable slots filled by `build_up`
    pub injector: Option<InjectorInfo>,
    /// Embedded resources addressable from `FromResource` parameters
    pub resources: HashMap<String, Arc<[u8]>>,
    /// False for types only ever referenced, never registered
    pub registered: bool,
}

/// Applies resolved slot values to an existing instance during `build_up`
pub type InjectFn = Arc<dyn Fn(&Instance, &CtorArgs) -> Result<()> + Send + Sync>;

/// Injectable slots a type declares for `build_up`
#[derive(Clone)]
pub struct InjectorInfo {
    pub params: Vec<ParameterInfo>,
    pub apply: InjectFn,
}

impl std::fmt::Debug for TypeDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypeDescriptor")
            .field("ty", &self.ty)
            .field("name", &self.name)
            .field("kind", &self.kind)
            .finish()
    }
}

/// Attributes declared on a constructor parameter
#[derive(Debug, Clone, Default)]
pub struct ParameterAttributes {
    /// Contract tags pushed while resolving this dependency
    pub contracts: Vec<String>,
    /// Missing dependency is passed as an absent value instead of failing
    pub optional: bool,
    /// Resolve from an embedded resource of the declaring type
    pub from_resource: Option<String>,
}

/// One formal constructor parameter
#[derive(Clone)]
pub struct ParameterInfo {
    pub name: String,
    pub ty: TypeRef,
    pub has_default: bool,
    pub default_value: Option<TypedInstance>,
    pub attrs: ParameterAttributes,
}

impl std::fmt::Debug for ParameterInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParameterInfo")
            .field("name", &self.name)
            .field("ty", &self.ty)
            .finish()
    }
}

/// A resolved value for one constructor argument slot
#[derive(Clone)]
pub enum CtorArg {
    Value(TypedInstance),
    Sequence(Vec<TypedInstance>),
    /// Optional dependency that resolved to nothing
    Absent,
    Identity(Arc<ServiceIdentity>),
}

/// Resolved argument list handed to a registered constructor closure
pub struct CtorArgs {
    args: Vec<CtorArg>,
}

impl CtorArgs {
    pub fn new(args: Vec<CtorArg>) -> Self {
        Self { args }
    }

    pub fn len(&self) -> usize {
        self.args.len()
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    fn slot(&self, index: usize) -> Result<&CtorArg> {
        self.args
            .get(index)
            .ok_or_else(|| Error::internal(format!("constructor argument {} missing", index)))
    }

    /// Required dependency, downcast to its concrete type
    pub fn get<T: Send + Sync + 'static>(&self, index: usize) -> Result<Arc<T>> {
        match self.slot(index)? {
            CtorArg::Value(v) => v.downcast::<T>().ok_or_else(|| {
                Error::internal(format!(
                    "constructor argument {} has unexpected runtime type",
                    index
                ))
            }),
            _ => Err(Error::internal(format!(
                "constructor argument {} is not a single value",
                index
            ))),
        }
    }

    /// Enumerable dependency, each element downcast to its concrete type
    pub fn get_seq<T: Send + Sync + 'static>(&self, index: usize) -> Result<Vec<Arc<T>>> {
        match self.slot(index)? {
            CtorArg::Sequence(items) => items
                .iter()
                .map(|v| {
                    v.downcast::<T>().ok_or_else(|| {
                        Error::internal(format!(
                            "constructor argument {} element has unexpected runtime type",
                            index
                        ))
                    })
                })
                .collect(),
            _ => Err(Error::internal(format!(
                "constructor argument {} is not a sequence",
                index
            ))),
        }
    }

    /// Optional dependency; `None` when the slot resolved to nothing
    pub fn get_opt<T: Send + Sync + 'static>(&self, index: usize) -> Result<Option<Arc<T>>> {
        match self.slot(index)? {
            CtorArg::Absent => Ok(None),
            _ => self.get::<T>(index).map(Some),
        }
    }

    /// Erased value for factory-shaped and resource slots
    pub fn raw(&self, index: usize) -> Result<&CtorArg> {
        self.slot(index)
    }

    /// The service identity injected into a service-name parameter
    pub fn identity(&self, index: usize) -> Result<Arc<ServiceIdentity>> {
        match self.slot(index)? {
            CtorArg::Identity(id) => Ok(Arc::clone(id)),
            _ => Err(Error::internal(format!(
                "constructor argument {} is not a service identity",
                index
            ))),
        }
    }
}

/// Constructor invocation closure registered with the type
pub type InvokeFn = Arc<dyn Fn(&CtorArgs) -> Result<Instance> + Send + Sync>;

/// A registered public constructor
#[derive(Clone)]
pub struct ConstructorInfo {
    pub params: Vec<ParameterInfo>,
    pub invoke: InvokeFn,
}

/// Outcome of constructor selection for a type
pub enum ConstructorLookup {
    Found(Arc<ConstructorInfo>),
    /// The type declares no public constructor
    None,
    /// The type declares more than one public constructor
    Many,
}

/// Narrow introspection interface the resolution engine consumes
pub trait TypeIntrospector: Send + Sync {
    /// Descriptor for a type; total over every minted `TypeRef`
    fn describe(&self, ty: TypeRef) -> Arc<TypeDescriptor>;

    /// Select the single public constructor of a concrete type
    fn get_constructor(&self, ty: TypeRef) -> ConstructorLookup;

    fn is_simple_type(&self, ty: TypeRef) -> bool;

    fn is_delegate(&self, ty: TypeRef) -> bool;

    /// `(element, true)` for `sequence<T>`, `(ty, false)` otherwise
    fn unwrap_enumerable(&self, ty: TypeRef) -> (TypeRef, bool);

    /// Close an open generic candidate so it satisfies the requested pattern
    fn try_close_by_pattern(
        &self,
        open_generic: TypeRef,
        pattern: TypeRef,
        concrete: TypeRef,
    ) -> Option<TypeRef>;

    /// Close an open generic candidate by binding argument value types
    fn try_close_by_arguments(&self, open_generic: TypeRef, arg_types: &[TypeRef])
        -> Option<TypeRef>;

    /// Embedded resource bytes declared on the type, if present
    fn get_manifest_resource_stream(&self, ty: TypeRef, name: &str) -> Option<Arc<[u8]>>;

    /// Whether `from` can be wired into a slot expecting `to`
    fn is_assignable(&self, from: TypeRef, to: TypeRef) -> bool;
}
