//! Named type variables used in patterns.

use crate::ndtype::{NdType, TypeVarMap};
use crate::{DTypeError, Result};

/// `$Name`: matches any concrete type, binding it to `Name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TypeVarType {
    name: String,
}

impl TypeVarType {
    pub fn new(name: &str) -> Result<Self> {
        let valid = name.chars().next().is_some_and(|c| c.is_ascii_uppercase())
            && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !valid {
            return Err(DTypeError::InvalidArgument(format!(
                "type variable name {name:?} must start with an uppercase letter"
            )));
        }
        Ok(TypeVarType {
            name: name.to_string(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Bind or check the binding of this variable.
    pub(crate) fn matches(&self, candidate: &NdType, tvars: &mut TypeVarMap) -> bool {
        if candidate.is_symbolic() {
            return false;
        }
        match tvars.get(&self.name) {
            Some(bound) => bound == candidate,
            None => {
                tvars.insert(self.name.clone(), candidate.clone());
                true
            }
        }
    }
}
