//! The active contract stack of one resolution request

use crate::config::ConfigurationRegistry;
use crate::resolution::name::ContractName;

/// Outcome of pushing contracts onto the stack
pub enum PushResult {
    /// All names pushed; `pushed` must be popped on unwind
    Pushed { pushed: usize },
    /// A name was already on the stack; nothing was pushed
    Duplicate(ContractName),
}

/// Active contract stack. Pushed on entry to a resolution, popped on exit;
/// the stack is restored to its entry state after any resolve.
#[derive(Default)]
pub struct ContractsList {
    stack: Vec<ContractName>,
}

/// Replacement suffixes produced by expanding union contracts
pub struct UnionExpansion {
    /// How many trailing entries to pop before resolving each alternative
    pub suffix_len: usize,
    /// One full replacement suffix per element of the Cartesian product
    pub alternatives: Vec<Vec<ContractName>>,
}

impl ContractsList {
    pub fn new() -> Self {
        Self::default()
    }

    /// All-or-nothing push with duplicate detection
    pub fn push(&mut self, names: &[ContractName]) -> PushResult {
        for (offset, name) in names.iter().enumerate() {
            if self.stack.contains(name) || names[..offset].contains(name) {
                return PushResult::Duplicate(name.clone());
            }
        }
        self.stack.extend(names.iter().cloned());
        PushResult::Pushed {
            pushed: names.len(),
        }
    }

    /// Push entries previously removed by [`Self::pop`]
    pub fn push_restored(&mut self, names: Vec<ContractName>) {
        self.stack.extend(names);
    }

    /// Remove and return the last `n` entries
    pub fn pop(&mut self, n: usize) -> Vec<ContractName> {
        self.stack.split_off(self.stack.len() - n)
    }

    pub fn snapshot(&self) -> Vec<ContractName> {
        self.stack.clone()
    }

    pub fn snapshot_strings(&self) -> Vec<String> {
        self.stack.iter().map(|c| c.as_str().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.stack.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }

    /// If any contract on the stack is a registered union, compute the
    /// replacement suffixes: the suffix from the first union position is
    /// removed and the Cartesian product over the per-position alternatives
    /// (union members, or the contract itself) is returned.
    pub fn try_expand_unions(&self, registry: &ConfigurationRegistry) -> Option<UnionExpansion> {
        let first_union = self
            .stack
            .iter()
            .position(|c| registry.union_of(c.as_str()).is_some())?;

        let suffix = &self.stack[first_union..];
        let mut alternatives: Vec<Vec<ContractName>> = vec![Vec::new()];
        for contract in suffix {
            let options: Vec<ContractName> = match registry.union_of(contract.as_str()) {
                Some(members) => members
                    .iter()
                    .filter_map(|m| ContractName::new(m.clone()).ok())
                    .collect(),
                None => vec![contract.clone()],
            };
            let mut expanded = Vec::with_capacity(alternatives.len() * options.len());
            for prefix in &alternatives {
                for option in &options {
                    let mut next = prefix.clone();
                    next.push(option.clone());
                    expanded.push(next);
                }
            }
            alternatives = expanded;
        }

        Some(UnionExpansion {
            suffix_len: suffix.len(),
            alternatives,
        })
    }
}
