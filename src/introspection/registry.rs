//! Default `TypeIntrospector` backed by a registration-time type registry
//!
//! Types are registered once through [`TypeRegistryBuilder`], then the
//! builder freezes into an immutable [`TypeRegistry`] shared by every
//! container cloned from the same index.

use crate::core::error::Result;
use crate::core::types::{Instance, TypeRef, TypedInstance};
use crate::introspection::inheritance::InheritanceIndex;
use crate::introspection::{
    Component, ConstructorInfo, ConstructorLookup, CtorArgs, Disposable, GenericInfo,
    InjectorInfo, ParameterAttributes, ParameterInfo, TypeDescriptor, TypeIntrospector, TypeKind,
};
use std::any::TypeId;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

/// Key a descriptor is interned under.
///
/// Real Rust types intern by `TypeId`; engine-minted shapes (sequences,
/// factories, open generics) intern by a synthetic name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum InternKey {
    Id(TypeId),
    Synthetic(String),
}

struct DescriptorDraft {
    name: String,
    kind: TypeKind,
    simple: bool,
    value_object: bool,
    per_request: bool,
    open_generic: bool,
    is_container: bool,
    is_service_name: bool,
    implements: Vec<TypeRef>,
    generic: Option<GenericInfo>,
    constructors: Vec<ConstructorInfo>,
    component_caster: Option<super::ComponentCaster>,
    disposable_caster: Option<super::DisposableCaster>,
    injector: Option<InjectorInfo>,
    resources: HashMap<String, Arc<[u8]>>,
    registered: bool,
}

impl DescriptorDraft {
    fn referenced(name: String) -> Self {
        Self {
            name,
            kind: TypeKind::Concrete,
            simple: false,
            value_object: false,
            per_request: false,
            open_generic: false,
            is_container: false,
            is_service_name: false,
            implements: Vec::new(),
            generic: None,
            constructors: Vec::new(),
            component_caster: None,
            disposable_caster: None,
            injector: None,
            resources: HashMap::new(),
            registered: false,
        }
    }
}

/// One formal parameter declaration for a registered constructor
#[derive(Clone)]
pub struct Param {
    pub(crate) info: ParameterInfo,
}

impl Param {
    pub fn new(name: impl Into<String>, ty: TypeRef) -> Self {
        Self {
            info: ParameterInfo {
                name: name.into(),
                ty,
                has_default: false,
                default_value: None,
                attrs: ParameterAttributes::default(),
            },
        }
    }

    /// Default used when the dependency is not configured or not resolved
    pub fn with_default(mut self, value: TypedInstance) -> Self {
        self.info.has_default = true;
        self.info.default_value = Some(value);
        self
    }

    /// Missing dependency is passed as an absent value instead of failing
    pub fn optional(mut self) -> Self {
        self.info.attrs.optional = true;
        self
    }

    /// Contracts pushed onto the stack while resolving this dependency
    pub fn contracts<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.info.attrs.contracts = names.into_iter().map(Into::into).collect();
        self
    }

    /// Fill the slot from an embedded resource of the declaring type
    pub fn from_resource(mut self, name: impl Into<String>) -> Self {
        self.info.attrs.from_resource = Some(name.into());
        self
    }
}

/// Mutable registration surface; freezes into [`TypeRegistry`]
pub struct TypeRegistryBuilder {
    drafts: Vec<DescriptorDraft>,
    interned: HashMap<InternKey, TypeRef>,
    container_ty: TypeRef,
    service_name_ty: TypeRef,
}

impl TypeRegistryBuilder {
    pub fn new() -> Self {
        let mut builder = Self {
            drafts: Vec::new(),
            interned: HashMap::new(),
            container_ty: TypeRef(0),
            service_name_ty: TypeRef(0),
        };
        let container_ty = builder.intern_synthetic("Container");
        builder.drafts[container_ty.index()].is_container = true;
        builder.drafts[container_ty.index()].registered = true;
        let service_name_ty = builder.intern_synthetic("ServiceName");
        builder.drafts[service_name_ty.index()].is_service_name = true;
        builder.drafts[service_name_ty.index()].registered = true;
        builder.container_ty = container_ty;
        builder.service_name_ty = service_name_ty;
        builder
    }

    fn intern(&mut self, key: InternKey, name: String) -> TypeRef {
        if let Some(ty) = self.interned.get(&key) {
            return *ty;
        }
        let ty = TypeRef(self.drafts.len() as u32);
        self.drafts.push(DescriptorDraft::referenced(name));
        self.interned.insert(key, ty);
        ty
    }

    fn intern_synthetic(&mut self, name: &str) -> TypeRef {
        self.intern(InternKey::Synthetic(name.to_string()), name.to_string())
    }

    /// Handle for a Rust type, registering it lazily as a bare reference
    pub fn of<T: ?Sized + 'static>(&mut self) -> TypeRef {
        let name = short_type_name(std::any::type_name::<T>());
        self.intern(InternKey::Id(TypeId::of::<T>()), name)
    }

    /// The well-known type under which the container injects itself
    pub fn container_type(&self) -> TypeRef {
        self.container_ty
    }

    /// The well-known type for service-name constructor parameters
    pub fn service_name_type(&self) -> TypeRef {
        self.service_name_ty
    }

    /// Register a concrete constructible type
    pub fn register<T: Send + Sync + 'static>(&mut self) -> Registration<'_, T> {
        let ty = self.of::<T>();
        self.drafts[ty.index()].registered = true;
        self.drafts[ty.index()].kind = TypeKind::Concrete;
        debug!(type_name = %self.drafts[ty.index()].name, "registered concrete type");
        Registration {
            builder: self,
            ty,
            _marker: std::marker::PhantomData,
        }
    }

    /// Register an interface (trait object or marker) satisfied by implementations
    pub fn register_interface<T: ?Sized + 'static>(&mut self) -> TypeRef {
        let ty = self.of::<T>();
        self.drafts[ty.index()].registered = true;
        self.drafts[ty.index()].kind = TypeKind::Abstract;
        ty
    }

    /// Register an interface known only by name (no backing Rust type)
    pub fn register_named_interface(&mut self, name: &str) -> TypeRef {
        let ty = self.intern_synthetic(name);
        self.drafts[ty.index()].registered = true;
        self.drafts[ty.index()].kind = TypeKind::Abstract;
        ty
    }

    /// Register a primitive-like value type the container never constructs
    pub fn simple_type<T: Send + Sync + 'static>(&mut self) -> TypeRef {
        let ty = self.of::<T>();
        self.drafts[ty.index()].registered = true;
        self.drafts[ty.index()].simple = true;
        ty
    }

    /// Wrap a value of a simple type into a typed constant
    pub fn value_of<T: Send + Sync + 'static>(&mut self, value: T) -> TypedInstance {
        let ty = self.simple_type::<T>();
        TypedInstance::new(ty, Arc::new(value))
    }

    /// `sequence<elem>` shape for enumerable constructor parameters
    pub fn sequence_of(&mut self, elem: TypeRef) -> TypeRef {
        let name = format!("sequence<{}>", self.drafts[elem.index()].name);
        let ty = self.intern_synthetic(&format!("seq#{}", elem.index()));
        let draft = &mut self.drafts[ty.index()];
        draft.name = name;
        draft.kind = TypeKind::Sequence(elem);
        draft.registered = true;
        ty
    }

    /// Zero-argument factory shape producing `result`
    pub fn factory_of(&mut self, result: TypeRef) -> TypeRef {
        let name = format!("Func<{}>", self.drafts[result.index()].name);
        let ty = self.intern_synthetic(&format!("fn#{}", result.index()));
        let draft = &mut self.drafts[ty.index()];
        draft.name = name;
        draft.kind = TypeKind::Factory { result };
        draft.registered = true;
        ty
    }

    /// One-argument factory shape; the argument binds by type at call time
    pub fn factory_with_arg(&mut self, arg: TypeRef, result: TypeRef) -> TypeRef {
        let name = format!(
            "Func<{}, {}>",
            self.drafts[arg.index()].name,
            self.drafts[result.index()].name
        );
        let ty = self.intern_synthetic(&format!("fn#{}#{}", arg.index(), result.index()));
        let draft = &mut self.drafts[ty.index()];
        draft.name = name;
        draft.kind = TypeKind::FactoryWithArg { arg, result };
        draft.registered = true;
        ty
    }

    /// Lazily-resolved wrapper shape around `inner`
    pub fn lazy_of(&mut self, inner: TypeRef) -> TypeRef {
        let name = format!("Lazy<{}>", self.drafts[inner.index()].name);
        let ty = self.intern_synthetic(&format!("lazy#{}", inner.index()));
        let draft = &mut self.drafts[ty.index()];
        draft.name = name;
        draft.kind = TypeKind::Lazy(inner);
        draft.registered = true;
        ty
    }

    /// A function-shaped type the container refuses to construct
    pub fn register_delegate(&mut self, name: &str) -> TypeRef {
        let ty = self.intern_synthetic(name);
        let draft = &mut self.drafts[ty.index()];
        draft.kind = TypeKind::Delegate;
        draft.registered = true;
        ty
    }

    /// Declare that one interface extends another
    pub fn interface_extends(&mut self, iface: TypeRef, base: TypeRef) {
        self.drafts[iface.index()].implements.push(base);
    }

    /// Open generic definition, instantiable via [`Self::generic_instance`]
    pub fn open_generic(&mut self, name: &str) -> TypeRef {
        let ty = self.intern_synthetic(name);
        let draft = &mut self.drafts[ty.index()];
        draft.open_generic = true;
        draft.registered = true;
        ty
    }

    /// Register a concrete closed instantiation of an open generic definition
    pub fn generic_instance<T: Send + Sync + 'static>(
        &mut self,
        definition: TypeRef,
        args: Vec<TypeRef>,
    ) -> Registration<'_, T> {
        let reg = self.register::<T>();
        let ty = reg.ty;
        reg.builder.drafts[ty.index()].generic = Some(GenericInfo { definition, args });
        Registration {
            builder: reg.builder,
            ty,
            _marker: std::marker::PhantomData,
        }
    }

    /// Freeze into the immutable registry
    pub fn build(self) -> Arc<TypeRegistry> {
        let Self {
            drafts,
            interned,
            container_ty,
            service_name_ty,
        } = self;
        let count = drafts.len();
        let mut descriptors = Vec::with_capacity(count);
        let mut constructors = Vec::with_capacity(count);
        let mut inheritors: HashMap<TypeRef, Vec<TypeRef>> = HashMap::new();
        let mut instantiations: HashMap<TypeRef, Vec<TypeRef>> = HashMap::new();

        for (index, draft) in drafts.into_iter().enumerate() {
            let ty = TypeRef(index as u32);
            for iface in &draft.implements {
                inheritors.entry(*iface).or_default().push(ty);
            }
            if let Some(generic) = &draft.generic {
                instantiations.entry(generic.definition).or_default().push(ty);
            }
            constructors.push(match draft.constructors.len() {
                0 => CtorSlot::None,
                1 => CtorSlot::One(Arc::new(draft.constructors.into_iter().next().expect(
                    "length checked",
                ))),
                _ => CtorSlot::Many,
            });
            descriptors.push(Arc::new(TypeDescriptor {
                ty,
                name: draft.name,
                kind: draft.kind,
                simple: draft.simple,
                value_object: draft.value_object,
                per_request: draft.per_request,
                open_generic: draft.open_generic,
                is_container: draft.is_container,
                is_service_name: draft.is_service_name,
                implements: draft.implements,
                generic: draft.generic,
                component_caster: draft.component_caster,
                disposable_caster: draft.disposable_caster,
                injector: draft.injector,
                resources: draft.resources,
                registered: draft.registered,
            }));
        }

        // Transitive assignability closure over the implements edges.
        let mut assignable: Vec<HashSet<TypeRef>> = Vec::with_capacity(count);
        for index in 0..count {
            let mut closure = HashSet::new();
            let mut pending = vec![TypeRef(index as u32)];
            while let Some(current) = pending.pop() {
                if closure.insert(current) {
                    pending.extend(descriptors[current.index()].implements.iter().copied());
                }
            }
            assignable.push(closure);
        }

        debug!(types = count, "type registry frozen");
        Arc::new(TypeRegistry {
            descriptors,
            constructors,
            inheritors,
            instantiations,
            assignable,
            interned,
            container_ty,
            service_name_ty,
        })
    }
}

impl Default for TypeRegistryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Fluent registration handle for one concrete type
pub struct Registration<'a, T: ?Sized> {
    builder: &'a mut TypeRegistryBuilder,
    ty: TypeRef,
    _marker: std::marker::PhantomData<fn() -> Box<T>>,
}

impl<'a, T: Send + Sync + 'static> Registration<'a, T> {
    fn draft(&mut self) -> &mut DescriptorDraft {
        &mut self.builder.drafts[self.ty.index()]
    }

    /// Declare an interface this type satisfies
    pub fn implements(mut self, iface: TypeRef) -> Self {
        self.draft().implements.push(iface);
        self
    }

    /// Mark as value-semantics record the container refuses to realize
    pub fn value_object(mut self) -> Self {
        self.draft().value_object = true;
        self
    }

    /// Mark with the per-request lifestyle: `resolve` refuses it
    pub fn per_request(mut self) -> Self {
        self.draft().per_request = true;
        self
    }

    /// Declare the single public constructor
    pub fn constructor<F>(mut self, params: Vec<Param>, invoke: F) -> Self
    where
        F: Fn(&CtorArgs) -> Result<T> + Send + Sync + 'static,
    {
        let info = ConstructorInfo {
            params: params.into_iter().map(|p| p.info).collect(),
            invoke: Arc::new(move |args| Ok(Arc::new(invoke(args)?) as Instance)),
        };
        self.draft().constructors.push(info);
        self
    }

    /// Expose instances through the `Component` run hook
    pub fn as_component(mut self) -> Self
    where
        T: Component,
    {
        self.draft().component_caster = Some(Arc::new(|instance: &Instance| {
            instance
                .clone()
                .downcast::<T>()
                .ok()
                .map(|typed| typed as Arc<dyn Component>)
        }));
        self
    }

    /// Expose instances through the `Disposable` cleanup hook
    pub fn as_disposable(mut self) -> Self
    where
        T: Disposable,
    {
        self.draft().disposable_caster = Some(Arc::new(|instance: &Instance| {
            instance
                .clone()
                .downcast::<T>()
                .ok()
                .map(|typed| typed as Arc<dyn Disposable>)
        }));
        self
    }

    /// Declare injectable slots filled into existing instances by `build_up`
    pub fn injector<F>(mut self, params: Vec<Param>, apply: F) -> Self
    where
        F: Fn(&T, &CtorArgs) -> Result<()> + Send + Sync + 'static,
    {
        self.draft().injector = Some(InjectorInfo {
            params: params.into_iter().map(|p| p.info).collect(),
            apply: Arc::new(move |instance: &Instance, args: &CtorArgs| {
                let typed = instance
                    .clone()
                    .downcast::<T>()
                    .map_err(|_| crate::core::error::Error::internal("build_up target has unexpected runtime type"))?;
                apply(&typed, args)
            }),
        });
        self
    }

    /// Attach embedded resource bytes addressable from parameters
    pub fn resource(mut self, name: impl Into<String>, bytes: impl Into<Arc<[u8]>>) -> Self {
        let name = name.into();
        let bytes = bytes.into();
        self.draft().resources.insert(name, bytes);
        self
    }

    /// Finish, yielding the type handle
    pub fn done(self) -> TypeRef {
        self.ty
    }
}

enum CtorSlot {
    None,
    One(Arc<ConstructorInfo>),
    Many,
}

/// Immutable registry: the default `TypeIntrospector` and `InheritanceIndex`
pub struct TypeRegistry {
    descriptors: Vec<Arc<TypeDescriptor>>,
    constructors: Vec<CtorSlot>,
    inheritors: HashMap<TypeRef, Vec<TypeRef>>,
    instantiations: HashMap<TypeRef, Vec<TypeRef>>,
    assignable: Vec<HashSet<TypeRef>>,
    interned: HashMap<InternKey, TypeRef>,
    container_ty: TypeRef,
    service_name_ty: TypeRef,
}

impl TypeRegistry {
    pub fn builder() -> TypeRegistryBuilder {
        TypeRegistryBuilder::new()
    }

    pub fn container_type(&self) -> TypeRef {
        self.container_ty
    }

    pub fn service_name_type(&self) -> TypeRef {
        self.service_name_ty
    }

    pub fn name_of(&self, ty: TypeRef) -> &str {
        &self.descriptors[ty.index()].name
    }

    /// Handle previously interned for a Rust type
    pub fn type_ref_of<T: ?Sized + 'static>(&self) -> Option<TypeRef> {
        self.interned.get(&InternKey::Id(TypeId::of::<T>())).copied()
    }
}

impl TypeIntrospector for TypeRegistry {
    fn describe(&self, ty: TypeRef) -> Arc<TypeDescriptor> {
        Arc::clone(&self.descriptors[ty.index()])
    }

    fn get_constructor(&self, ty: TypeRef) -> ConstructorLookup {
        match &self.constructors[ty.index()] {
            CtorSlot::One(info) => ConstructorLookup::Found(Arc::clone(info)),
            CtorSlot::None => ConstructorLookup::None,
            CtorSlot::Many => ConstructorLookup::Many,
        }
    }

    fn is_simple_type(&self, ty: TypeRef) -> bool {
        self.descriptors[ty.index()].simple
    }

    fn is_delegate(&self, ty: TypeRef) -> bool {
        matches!(self.descriptors[ty.index()].kind, TypeKind::Delegate)
    }

    fn unwrap_enumerable(&self, ty: TypeRef) -> (TypeRef, bool) {
        match self.descriptors[ty.index()].kind {
            TypeKind::Sequence(elem) => (elem, true),
            _ => (ty, false),
        }
    }

    fn try_close_by_pattern(
        &self,
        open_generic: TypeRef,
        _pattern: TypeRef,
        concrete: TypeRef,
    ) -> Option<TypeRef> {
        self.instantiations
            .get(&open_generic)?
            .iter()
            .copied()
            .find(|closed| self.is_assignable(*closed, concrete))
    }

    fn try_close_by_arguments(
        &self,
        open_generic: TypeRef,
        arg_types: &[TypeRef],
    ) -> Option<TypeRef> {
        let closed_types = self.instantiations.get(&open_generic)?;
        closed_types.iter().copied().find(|closed| {
            let params = match &self.constructors[closed.index()] {
                CtorSlot::One(info) => &info.params,
                _ => return false,
            };
            arg_types.iter().all(|arg| {
                params
                    .iter()
                    .any(|param| self.is_assignable(*arg, param.ty))
            })
        })
    }

    fn get_manifest_resource_stream(&self, ty: TypeRef, name: &str) -> Option<Arc<[u8]>> {
        self.descriptors[ty.index()].resources.get(name).cloned()
    }

    fn is_assignable(&self, from: TypeRef, to: TypeRef) -> bool {
        self.assignable[from.index()].contains(&to)
    }
}

impl InheritanceIndex for TypeRegistry {
    fn inheritors_of(&self, ty: TypeRef) -> Vec<TypeRef> {
        self.inheritors.get(&ty).cloned().unwrap_or_default()
    }
}

/// Strip module paths from a fully-qualified Rust type name
fn short_type_name(full: &str) -> String {
    let mut out = String::new();
    let mut segment = String::new();
    for c in full.chars() {
        match c {
            ':' => segment.clear(),
            '<' | '>' | ',' | ' ' | '(' | ')' | '[' | ']' | '&' => {
                out.push_str(&segment);
                segment.clear();
                out.push(c);
            }
            _ => segment.push(c),
        }
    }
    out.push_str(&segment);
    out
}
