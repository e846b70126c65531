//! Expression types: a value type presented over an operand (storage) type.
//!
//! An expression type stores its data as its operand does (same data size,
//! alignment and arrmeta) but reads and writes as its value type. Operands may
//! themselves be expressions, forming a chain that ends at the storage type.

use crate::config::AssignErrorMode;
use crate::ndtype::NdType;
use crate::type_id::TypeId;
use crate::{DTypeError, Result};
use std::fmt;

fn check_value(kind: &str, value: &NdType) -> Result<()> {
    if value.is_expression() {
        return Err(DTypeError::InvalidArgument(format!(
            "{kind} value type {value} must not be an expression"
        )));
    }
    if value.arrmeta_size() > 0 {
        return Err(DTypeError::InvalidArgument(format!(
            "{kind} value type {value} must not require arrmeta"
        )));
    }
    Ok(())
}

// ============================================================================
// Conversion
// ============================================================================

/// `convert[to=V, from=O]`: reads `O` and converts to `V` with `errmode`.
#[derive(Debug, Clone, PartialEq)]
pub struct ConvertType {
    value: NdType,
    operand: NdType,
    errmode: AssignErrorMode,
}

impl ConvertType {
    pub fn new(value: NdType, operand: NdType, errmode: AssignErrorMode) -> Result<Self> {
        check_value("convert", &value)?;
        Ok(ConvertType {
            value,
            operand,
            errmode,
        })
    }

    #[inline]
    pub fn value_type(&self) -> &NdType {
        &self.value
    }

    #[inline]
    pub fn operand_type(&self) -> &NdType {
        &self.operand
    }

    #[inline]
    pub fn errmode(&self) -> AssignErrorMode {
        self.errmode
    }

    pub(crate) fn with_operand(&self, operand: NdType) -> Result<Self> {
        ConvertType::new(self.value.clone(), operand, self.errmode)
    }
}

impl fmt::Display for ConvertType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "convert[to={}, from={}", self.value, self.operand)?;
        if self.errmode != AssignErrorMode::default() {
            write!(f, ", errmode={}", self.errmode)?;
        }
        f.write_str("]")
    }
}

// ============================================================================
// Byte swap
// ============================================================================

/// `byteswap[V]`: a builtin stored with reversed byte order.
///
/// Complex values swap each component separately.
#[derive(Debug, Clone, PartialEq)]
pub struct ByteswapType {
    value: NdType,
    operand: NdType,
}

impl ByteswapType {
    /// Byte-swapped `value` stored as plain bytes of the same size.
    pub fn new(value: NdType) -> Result<Self> {
        let size = value.data_size();
        let operand = match value.builtin_id() {
            Some(_) => NdType::fixed_bytes(size, value.alignment())?,
            None => {
                return Err(DTypeError::InvalidArgument(format!(
                    "byteswap value type {value} is not a builtin scalar"
                )))
            }
        };
        ByteswapType::with_operand(value, operand)
    }

    /// Byte-swapped `value` stored as `operand`, which must have the same size.
    pub fn with_operand(value: NdType, operand: NdType) -> Result<Self> {
        if value.builtin_id().is_none() {
            return Err(DTypeError::InvalidArgument(format!(
                "byteswap value type {value} is not a builtin scalar"
            )));
        }
        let storage_value = operand.value_type();
        if storage_value.data_size() != value.data_size() || storage_value.arrmeta_size() > 0 {
            return Err(DTypeError::InvalidArgument(format!(
                "byteswap operand {operand} does not match the size of {value}"
            )));
        }
        Ok(ByteswapType { value, operand })
    }

    #[inline]
    pub fn value_type(&self) -> &NdType {
        &self.value
    }

    #[inline]
    pub fn operand_type(&self) -> &NdType {
        &self.operand
    }

    /// Size of each independently swapped component.
    pub(crate) fn swap_width(&self) -> usize {
        match self.value.type_id() {
            TypeId::ComplexFloat32 | TypeId::ComplexFloat64 => self.value.data_size() / 2,
            _ => self.value.data_size(),
        }
    }

    pub(crate) fn with_replaced_operand(&self, operand: NdType) -> Result<Self> {
        ByteswapType::with_operand(self.value.clone(), operand)
    }

    fn has_default_operand(&self) -> bool {
        self.operand.type_id() == TypeId::FixedBytes
            && self.operand.alignment() == self.value.alignment()
    }
}

impl fmt::Display for ByteswapType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.has_default_operand() {
            write!(f, "byteswap[{}]", self.value)
        } else {
            write!(f, "byteswap[{}, operand={}]", self.value, self.operand)
        }
    }
}

// ============================================================================
// Property
// ============================================================================

/// `property[name=P, operand=O]`: the elementwise property `P` of `O`'s value.
///
/// Properties are read-only; assigning into one fails.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyType {
    operand: NdType,
    name: String,
    index: usize,
    value: NdType,
}

impl PropertyType {
    pub fn new(operand: NdType, name: &str) -> Result<Self> {
        let base = operand.value_type();
        let index = base.elwise_property_index(name)?;
        let value = base.elwise_property_type(index).ok_or_else(|| {
            DTypeError::UnknownProperty {
                tp: base.to_string(),
                name: name.to_string(),
            }
        })?;
        Ok(PropertyType {
            operand,
            name: name.to_string(),
            index,
            value,
        })
    }

    #[inline]
    pub fn value_type(&self) -> &NdType {
        &self.value
    }

    #[inline]
    pub fn operand_type(&self) -> &NdType {
        &self.operand
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Index of the property within the operand value type's property list.
    #[inline]
    pub fn index(&self) -> usize {
        self.index
    }

    pub(crate) fn with_operand(&self, operand: NdType) -> Result<Self> {
        PropertyType::new(operand, &self.name)
    }
}

impl fmt::Display for PropertyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "property[name={}, operand={}]", self.name, self.operand)
    }
}
