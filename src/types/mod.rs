//! Type descriptor families.
//!
//! Builtin scalars are identified by their [`TypeId`] alone; every other
//! family carries a payload in [`ExtendedType`].

pub mod builtin;
pub mod date;
pub mod dim;
pub mod expr;
pub mod fixedbytes;
pub mod string;
pub mod struct_type;
pub mod tuple;
pub mod type_type;
pub mod typevar;

use crate::ndtype::NdType;
use crate::type_id::{TypeFlags, TypeId};
use crate::Result;
use std::fmt;

use date::DateType;
use dim::{FixedDimType, StridedDimType, VarDimType};
use expr::{ByteswapType, ConvertType, PropertyType};
use fixedbytes::FixedBytesType;
use string::StringType;
use struct_type::StructType;
use tuple::TupleType;
use type_type::TypeType;
use typevar::TypeVarType;

/// Payload of a non-builtin type descriptor.
#[derive(Debug, Clone, PartialEq)]
pub enum ExtendedType {
    FixedBytes(FixedBytesType),
    String(StringType),
    Date(DateType),
    FixedDim(FixedDimType),
    StridedDim(StridedDimType),
    VarDim(VarDimType),
    Tuple(TupleType),
    Struct(StructType),
    Convert(ConvertType),
    Byteswap(ByteswapType),
    Property(PropertyType),
    TypeVar(TypeVarType),
    Type(TypeType),
}

impl ExtendedType {
    pub fn type_id(&self) -> TypeId {
        match self {
            ExtendedType::FixedBytes(_) => TypeId::FixedBytes,
            ExtendedType::String(_) => TypeId::String,
            ExtendedType::Date(_) => TypeId::Date,
            ExtendedType::FixedDim(_) => TypeId::FixedDim,
            ExtendedType::StridedDim(_) => TypeId::StridedDim,
            ExtendedType::VarDim(_) => TypeId::VarDim,
            ExtendedType::Tuple(_) => TypeId::Tuple,
            ExtendedType::Struct(_) => TypeId::Struct,
            ExtendedType::Convert(_) => TypeId::Convert,
            ExtendedType::Byteswap(_) => TypeId::Byteswap,
            ExtendedType::Property(_) => TypeId::Property,
            ExtendedType::TypeVar(_) => TypeId::TypeVar,
            ExtendedType::Type(_) => TypeId::Type,
        }
    }

    /// Operand of an expression type.
    pub(crate) fn operand(&self) -> Option<&NdType> {
        match self {
            ExtendedType::Convert(t) => Some(t.operand_type()),
            ExtendedType::Byteswap(t) => Some(t.operand_type()),
            ExtendedType::Property(t) => Some(t.operand_type()),
            _ => None,
        }
    }

    /// Value of an expression type.
    pub(crate) fn value(&self) -> Option<&NdType> {
        match self {
            ExtendedType::Convert(t) => Some(t.value_type()),
            ExtendedType::Byteswap(t) => Some(t.value_type()),
            ExtendedType::Property(t) => Some(t.value_type()),
            _ => None,
        }
    }

    pub fn data_size(&self) -> usize {
        match self {
            ExtendedType::FixedBytes(t) => t.data_size(),
            ExtendedType::String(_) => StringType::DATA_SIZE,
            ExtendedType::Date(_) => 4,
            ExtendedType::FixedDim(t) => t.data_size(),
            ExtendedType::StridedDim(_) | ExtendedType::TypeVar(_) => 0,
            ExtendedType::VarDim(_) => VarDimType::DATA_SIZE,
            ExtendedType::Type(_) => TypeType::DATA_SIZE,
            ExtendedType::Tuple(t) => t.data_size(),
            ExtendedType::Struct(t) => t.tuple().data_size(),
            ExtendedType::Convert(_) | ExtendedType::Byteswap(_) | ExtendedType::Property(_) => {
                self.operand().map_or(0, NdType::data_size)
            }
        }
    }

    pub fn alignment(&self) -> usize {
        match self {
            ExtendedType::FixedBytes(t) => t.alignment(),
            ExtendedType::String(_) | ExtendedType::VarDim(_) | ExtendedType::Type(_) => {
                std::mem::align_of::<usize>()
            }
            ExtendedType::Date(_) => 4,
            ExtendedType::FixedDim(t) => t.element_type().alignment(),
            ExtendedType::StridedDim(t) => t.element_type().alignment(),
            ExtendedType::Tuple(t) => t.alignment(),
            ExtendedType::Struct(t) => t.tuple().alignment(),
            ExtendedType::TypeVar(_) => 1,
            ExtendedType::Convert(_) | ExtendedType::Byteswap(_) | ExtendedType::Property(_) => {
                self.operand().map_or(1, NdType::alignment)
            }
        }
    }

    pub fn arrmeta_size(&self) -> usize {
        match self {
            ExtendedType::FixedBytes(_)
            | ExtendedType::Date(_)
            | ExtendedType::TypeVar(_)
            | ExtendedType::Type(_) => 0,
            ExtendedType::String(_) => StringType::ARRMETA_SIZE,
            ExtendedType::FixedDim(t) => t.arrmeta_size(),
            ExtendedType::StridedDim(t) => t.arrmeta_size(),
            ExtendedType::VarDim(t) => t.arrmeta_size(),
            ExtendedType::Tuple(t) => t.arrmeta_size(),
            ExtendedType::Struct(t) => t.tuple().arrmeta_size(),
            ExtendedType::Convert(_) | ExtendedType::Byteswap(_) | ExtendedType::Property(_) => {
                self.operand().map_or(0, NdType::arrmeta_size)
            }
        }
    }

    pub fn flags(&self) -> TypeFlags {
        match self {
            ExtendedType::FixedBytes(_) | ExtendedType::Date(_) => TypeFlags::SCALAR,
            ExtendedType::String(_) => {
                TypeFlags::SCALAR | TypeFlags::BLOCKREF | TypeFlags::ZEROINIT
            }
            ExtendedType::Type(_) => {
                TypeFlags::SCALAR | TypeFlags::ZEROINIT | TypeFlags::DESTRUCTOR
            }
            ExtendedType::FixedDim(t) => t.element_type().flags().inherited(),
            ExtendedType::StridedDim(t) => t.element_type().flags().inherited(),
            ExtendedType::VarDim(t) => {
                t.element_type().flags().inherited() | TypeFlags::BLOCKREF | TypeFlags::ZEROINIT
            }
            ExtendedType::Tuple(t) => t.flags(),
            ExtendedType::Struct(t) => t.tuple().flags(),
            ExtendedType::TypeVar(_) => TypeFlags::SYMBOLIC,
            ExtendedType::Convert(_) | ExtendedType::Byteswap(_) | ExtendedType::Property(_) => {
                let operand = self.operand().map_or(TypeFlags::empty(), |t| t.flags());
                let value = self.value().map_or(TypeFlags::empty(), |t| t.flags());
                operand.inherited() | (value & TypeFlags::SCALAR)
            }
        }
    }
}

impl fmt::Display for ExtendedType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExtendedType::FixedBytes(t) => {
                write!(f, "fixedbytes[{}, align={}]", t.data_size(), t.alignment())
            }
            ExtendedType::String(_) => f.write_str("string"),
            ExtendedType::Date(t) => write!(f, "{t}"),
            ExtendedType::FixedDim(t) => write!(f, "{t}"),
            ExtendedType::StridedDim(t) => write!(f, "{t}"),
            ExtendedType::VarDim(t) => write!(f, "{t}"),
            ExtendedType::Tuple(t) => t.fmt_fields(f),
            ExtendedType::Struct(t) => write!(f, "{t}"),
            ExtendedType::Convert(t) => write!(f, "{t}"),
            ExtendedType::Byteswap(t) => write!(f, "{t}"),
            ExtendedType::Property(t) => write!(f, "{t}"),
            ExtendedType::TypeVar(t) => write!(f, "{}", t.name()),
            ExtendedType::Type(_) => f.write_str("type"),
        }
    }
}

// ============================================================================
// Type-level properties
// ============================================================================

/// Value of a type-level property.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    Str(String),
    Names(Vec<String>),
    Types(Vec<NdType>),
    Offsets(Vec<usize>),
}

/// A named, read-only property of a type descriptor.
#[derive(Clone, Copy)]
pub struct TypeProperty {
    pub name: &'static str,
    pub getter: fn(&NdType) -> Result<PropertyValue>,
}

impl fmt::Debug for TypeProperty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeProperty")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

fn date_unit_property(tp: &NdType) -> Result<PropertyValue> {
    match tp.as_date() {
        Some(d) => Ok(PropertyValue::Str(d.unit().to_string())),
        None => Err(crate::DTypeError::InvalidArgument(format!(
            "{tp} is not a date"
        ))),
    }
}

pub(crate) const DATE_TYPE_PROPERTIES: [TypeProperty; 1] = [TypeProperty {
    name: "unit",
    getter: date_unit_property,
}];
