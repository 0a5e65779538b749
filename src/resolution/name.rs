//! Service identity: a type plus its ordered contract list

use crate::core::error::{Error, Result};
use crate::core::types::TypeRef;
use std::hash::{Hash, Hasher};

/// A contract tag. Compared and hashed case-insensitively, original casing
/// preserved for display.
#[derive(Debug, Clone)]
pub struct ContractName(String);

impl ContractName {
    /// Reject empty names
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(Error::invalid_argument("contract name can't be empty"));
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn matches(&self, other: &str) -> bool {
        self.0.eq_ignore_ascii_case(other)
    }
}

impl PartialEq for ContractName {
    fn eq(&self, other: &Self) -> bool {
        self.0.eq_ignore_ascii_case(&other.0)
    }
}

impl Eq for ContractName {}

impl Hash for ContractName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for byte in self.0.bytes() {
            state.write_u8(byte.to_ascii_lowercase());
        }
    }
}

impl std::fmt::Display for ContractName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity of one resolution request and of one cached service:
/// `(type, ordered contract list)`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServiceName {
    pub ty: TypeRef,
    pub contracts: Vec<ContractName>,
}

impl ServiceName {
    /// Contract-free identity
    pub fn no_contract(ty: TypeRef) -> Self {
        Self {
            ty,
            contracts: Vec::new(),
        }
    }

    pub fn new(ty: TypeRef, contracts: Vec<ContractName>) -> Self {
        Self { ty, contracts }
    }

    /// Normalize raw contract strings: reject empty names and duplicates
    /// under case-insensitive compare.
    pub fn parse<S: AsRef<str>>(ty: TypeRef, contracts: &[S]) -> Result<Self> {
        let mut parsed: Vec<ContractName> = Vec::with_capacity(contracts.len());
        for raw in contracts {
            let name = ContractName::new(raw.as_ref().to_string())?;
            if parsed.contains(&name) {
                return Err(Error::invalid_argument(format!(
                    "invalid contracts [{}] - duplicates found",
                    contracts
                        .iter()
                        .map(|c| c.as_ref())
                        .collect::<Vec<_>>()
                        .join(",")
                )));
            }
            parsed.push(name);
        }
        Ok(Self {
            ty,
            contracts: parsed,
        })
    }

    /// Contract list as plain strings
    pub fn contract_strings(&self) -> Vec<String> {
        self.contracts.iter().map(|c| c.0.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::hash_map::DefaultHasher;

    fn hash_of<T: Hash>(value: &T) -> u64 {
        let mut hasher = DefaultHasher::new();
        value.hash(&mut hasher);
        hasher.finish()
    }

    #[test]
    fn test_contract_equality_ignores_case() {
        let a = ContractName::new("Primary").unwrap();
        let b = ContractName::new("PRIMARY").unwrap();
        assert_eq!(a, b);
        assert_eq!(hash_of(&a), hash_of(&b));
    }

    #[test]
    fn test_empty_contract_rejected() {
        assert!(ContractName::new("").is_err());
    }

    #[test]
    fn test_parse_rejects_duplicates() {
        let err = ServiceName::parse(TypeRef(0), &["c1", "C1"]).unwrap_err();
        assert!(err.to_string().contains("invalid contracts [c1,C1] - duplicates found"));
    }

    #[test]
    fn test_names_with_same_contracts_are_equal() {
        let a = ServiceName::parse(TypeRef(3), &["x", "y"]).unwrap();
        let b = ServiceName::parse(TypeRef(3), &["X", "Y"]).unwrap();
        assert_eq!(a, b);
        assert_eq!(hash_of(&a), hash_of(&b));
        assert_ne!(a, ServiceName::parse(TypeRef(3), &["y", "x"]).unwrap());
    }
}
