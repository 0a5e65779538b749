//! Per-request resolution scratch state
//!
//! Context is passed explicitly through every engine call; nothing is
//! process-global. One context belongs to exactly one thread for the
//! duration of one public call.

use crate::core::types::TypeRef;
use crate::resolution::contracts::ContractsList;
use crate::resolution::name::ServiceName;
use std::collections::HashSet;

/// A service currently on the resolution stack
pub struct Frame {
    pub ty: TypeRef,
    pub name: ServiceName,
}

/// Scratch state of one resolution request
pub struct ResolutionContext {
    /// Names currently being resolved: the cycle detector
    constructing: HashSet<ServiceName>,
    /// Same names in entry order, for cycle messages
    constructing_order: Vec<ServiceName>,
    /// Active service frames, outermost first
    pub stack: Vec<Frame>,
    /// Active contract stack
    pub contracts: ContractsList,
    /// Visit the graph and record dependencies without invoking constructors
    pub analyze_dependencies_only: bool,
}

impl ResolutionContext {
    pub fn new() -> Self {
        Self {
            constructing: HashSet::new(),
            constructing_order: Vec::new(),
            stack: Vec::new(),
            contracts: ContractsList::new(),
            analyze_dependencies_only: false,
        }
    }

    pub fn analyze_only() -> Self {
        let mut ctx = Self::new();
        ctx.analyze_dependencies_only = true;
        ctx
    }

    /// Enter a resolution; false means the name is already on the stack
    pub fn enter(&mut self, name: &ServiceName) -> bool {
        if !self.constructing.insert(name.clone()) {
            return false;
        }
        self.constructing_order.push(name.clone());
        true
    }

    pub fn exit(&mut self, name: &ServiceName) {
        self.constructing.remove(name);
        if let Some(position) = self.constructing_order.iter().rposition(|n| n == name) {
            self.constructing_order.remove(position);
        }
    }

    /// Chain of type handles from the first occurrence of `name` to the
    /// attempted re-entry, for the cycle error message
    pub fn cycle_chain(&self, name: &ServiceName) -> Vec<TypeRef> {
        let start = self
            .constructing_order
            .iter()
            .position(|n| n == name)
            .unwrap_or(0);
        let mut chain: Vec<TypeRef> = self.constructing_order[start..]
            .iter()
            .map(|n| n.ty)
            .collect();
        chain.push(name.ty);
        chain
    }

    /// Type of the service requesting the one currently being resolved
    pub fn requesting_type(&self) -> Option<TypeRef> {
        self.stack.last().map(|frame| frame.ty)
    }

    /// Parent of the service whose frame is on top of the stack
    pub fn parent_of_current(&self) -> Option<TypeRef> {
        if self.stack.len() < 2 {
            return None;
        }
        Some(self.stack[self.stack.len() - 2].ty)
    }
}

impl Default for ResolutionContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(index: u32) -> ServiceName {
        ServiceName::no_contract(TypeRef(index))
    }

    #[test]
    fn test_reentry_is_detected() {
        let mut ctx = ResolutionContext::new();
        assert!(ctx.enter(&name(1)));
        assert!(ctx.enter(&name(2)));
        assert!(!ctx.enter(&name(1)));
    }

    #[test]
    fn test_cycle_chain_starts_at_first_occurrence() {
        let mut ctx = ResolutionContext::new();
        ctx.enter(&name(1));
        ctx.enter(&name(2));
        ctx.enter(&name(3));
        let chain = ctx.cycle_chain(&name(2));
        assert_eq!(chain, vec![TypeRef(2), TypeRef(3), TypeRef(2)]);
    }

    #[test]
    fn test_exit_restores_entry() {
        let mut ctx = ResolutionContext::new();
        ctx.enter(&name(1));
        ctx.exit(&name(1));
        assert!(ctx.enter(&name(1)));
    }
}
