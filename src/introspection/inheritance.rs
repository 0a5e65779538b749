//! Inheritance-hierarchy index consumed by the interface instantiation path

use crate::core::types::TypeRef;

/// Lookup of the registered implementations of an abstract type.
///
/// Order is registration order; enumerable resolutions surface instances in
/// this order.
pub trait InheritanceIndex: Send + Sync {
    fn inheritors_of(&self, ty: TypeRef) -> Vec<TypeRef>;
}
