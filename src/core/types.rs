//! Core value types shared across the container

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

/// Interned handle to a registered type.
///
/// All type identity inside the engine goes through these indices; the
/// backing descriptors live in the [`TypeRegistry`](crate::introspection::TypeRegistry).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeRef(pub(crate) u32);

impl TypeRef {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// A constructed component instance, type-erased
pub type Instance = Arc<dyn Any + Send + Sync>;

/// An instance paired with the type it was constructed as.
///
/// Keeping the `TypeRef` next to the erased pointer lets the engine check
/// wiring compatibility without downcasting.
#[derive(Clone)]
pub struct TypedInstance {
    pub ty: TypeRef,
    pub value: Instance,
}

impl TypedInstance {
    pub fn new(ty: TypeRef, value: Instance) -> Self {
        Self { ty, value }
    }

    /// Downcast to a concrete type
    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.value.clone().downcast::<T>().ok()
    }
}

impl std::fmt::Debug for TypedInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypedInstance").field("ty", &self.ty).finish()
    }
}

/// The identity a service was constructed under, injectable into
/// constructor parameters declared with the service-name type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceIdentity {
    pub type_name: String,
    pub contracts: Vec<String>,
}

/// Embedded resource bytes injected into `FromResource` parameters
pub struct Resource {
    bytes: Arc<[u8]>,
}

impl Resource {
    pub fn new(bytes: Arc<[u8]>) -> Self {
        Self { bytes }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn reader(&self) -> impl std::io::Read + '_ {
        self.bytes()
    }
}

/// Named constructor-argument constants supplied to a single `create` call
#[derive(Default, Clone)]
pub struct Arguments {
    values: HashMap<String, TypedInstance>,
}

impl Arguments {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: TypedInstance) -> Self {
        self.values.insert(name.into(), value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&TypedInstance> {
        self.values.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Types of the supplied values, used to bind generic parameters
    pub fn value_types(&self) -> Vec<TypeRef> {
        self.values.values().map(|v| v.ty).collect()
    }
}

impl std::fmt::Debug for Arguments {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.values.keys()).finish()
    }
}
