//! Type identifiers, kinds and capability flags.

use crate::{DTypeError, Result};
use std::fmt;

/// Stable identifier of a type family.
///
/// The builtin scalar ids occupy `0..BUILTIN_TYPE_ID_COUNT` contiguously so
/// they can index the builtin conversion tables directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u32)]
pub enum TypeId {
    Bool = 0,
    Int8 = 1,
    Int16 = 2,
    Int32 = 3,
    Int64 = 4,
    UInt8 = 5,
    UInt16 = 6,
    UInt32 = 7,
    UInt64 = 8,
    Float32 = 9,
    Float64 = 10,
    ComplexFloat32 = 11,
    ComplexFloat64 = 12,
    FixedBytes = 13,
    String = 14,
    Date = 15,
    FixedDim = 16,
    StridedDim = 17,
    VarDim = 18,
    Tuple = 19,
    Struct = 20,
    Convert = 21,
    Byteswap = 22,
    Property = 23,
    TypeVar = 24,
    Type = 25,
}

/// Number of builtin scalar type ids.
pub(crate) const BUILTIN_TYPE_ID_COUNT: usize = 13;

const ALL_TYPE_IDS: [TypeId; 26] = [
    TypeId::Bool,
    TypeId::Int8,
    TypeId::Int16,
    TypeId::Int32,
    TypeId::Int64,
    TypeId::UInt8,
    TypeId::UInt16,
    TypeId::UInt32,
    TypeId::UInt64,
    TypeId::Float32,
    TypeId::Float64,
    TypeId::ComplexFloat32,
    TypeId::ComplexFloat64,
    TypeId::FixedBytes,
    TypeId::String,
    TypeId::Date,
    TypeId::FixedDim,
    TypeId::StridedDim,
    TypeId::VarDim,
    TypeId::Tuple,
    TypeId::Struct,
    TypeId::Convert,
    TypeId::Byteswap,
    TypeId::Property,
    TypeId::TypeVar,
    TypeId::Type,
];

impl TypeId {
    /// The builtin scalar ids in table order.
    pub const BUILTINS: [TypeId; BUILTIN_TYPE_ID_COUNT] = [
        TypeId::Bool,
        TypeId::Int8,
        TypeId::Int16,
        TypeId::Int32,
        TypeId::Int64,
        TypeId::UInt8,
        TypeId::UInt16,
        TypeId::UInt32,
        TypeId::UInt64,
        TypeId::Float32,
        TypeId::Float64,
        TypeId::ComplexFloat32,
        TypeId::ComplexFloat64,
    ];

    /// Decode a raw id, rejecting values that name no type family.
    pub fn from_raw(raw: u32) -> Result<TypeId> {
        ALL_TYPE_IDS
            .get(raw as usize)
            .copied()
            .ok_or(DTypeError::InvalidTypeId(raw))
    }

    #[inline]
    pub fn is_builtin(self) -> bool {
        (self as usize) < BUILTIN_TYPE_ID_COUNT
    }

    /// Kind of a builtin id; extended ids report the kind of their family.
    pub fn kind(self) -> TypeKind {
        match self {
            TypeId::Bool => TypeKind::Bool,
            TypeId::Int8 | TypeId::Int16 | TypeId::Int32 | TypeId::Int64 => TypeKind::Int,
            TypeId::UInt8 | TypeId::UInt16 | TypeId::UInt32 | TypeId::UInt64 => TypeKind::UInt,
            TypeId::Float32 | TypeId::Float64 => TypeKind::Real,
            TypeId::ComplexFloat32 | TypeId::ComplexFloat64 => TypeKind::Complex,
            TypeId::FixedBytes => TypeKind::Bytes,
            TypeId::String => TypeKind::String,
            TypeId::Date => TypeKind::Datetime,
            TypeId::FixedDim | TypeId::StridedDim | TypeId::VarDim => TypeKind::Dim,
            TypeId::Tuple | TypeId::Struct => TypeKind::Composite,
            TypeId::Convert | TypeId::Byteswap | TypeId::Property => TypeKind::Expression,
            TypeId::TypeVar => TypeKind::Pattern,
            TypeId::Type => TypeKind::Type,
        }
    }

    /// Short lowercase name of the builtin scalar, or of the family.
    pub fn name(self) -> &'static str {
        match self {
            TypeId::Bool => "bool",
            TypeId::Int8 => "int8",
            TypeId::Int16 => "int16",
            TypeId::Int32 => "int32",
            TypeId::Int64 => "int64",
            TypeId::UInt8 => "uint8",
            TypeId::UInt16 => "uint16",
            TypeId::UInt32 => "uint32",
            TypeId::UInt64 => "uint64",
            TypeId::Float32 => "float32",
            TypeId::Float64 => "float64",
            TypeId::ComplexFloat32 => "complex[float32]",
            TypeId::ComplexFloat64 => "complex[float64]",
            TypeId::FixedBytes => "fixedbytes",
            TypeId::String => "string",
            TypeId::Date => "date",
            TypeId::FixedDim => "fixed_dim",
            TypeId::StridedDim => "strided_dim",
            TypeId::VarDim => "var_dim",
            TypeId::Tuple => "tuple",
            TypeId::Struct => "struct",
            TypeId::Convert => "convert",
            TypeId::Byteswap => "byteswap",
            TypeId::Property => "property",
            TypeId::TypeVar => "typevar",
            TypeId::Type => "type",
        }
    }
}

impl fmt::Display for TypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Broad classification of a type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeKind {
    Bool,
    Int,
    UInt,
    Real,
    Complex,
    Bytes,
    String,
    Datetime,
    Dim,
    Composite,
    Expression,
    /// Symbolic types that only take part in matching.
    Pattern,
    /// Values that are themselves type descriptors.
    Type,
}

bitflags::bitflags! {
    /// Capability flags of a type descriptor.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TypeFlags: u32 {
        /// A single element with no dimensions.
        const SCALAR = 1 << 0;
        /// Freshly allocated data must be zeroed before use.
        const ZEROINIT = 1 << 1;
        /// Data or arrmeta references memory blocks.
        const BLOCKREF = 1 << 2;
        /// The type is a pattern and cannot be instantiated.
        const SYMBOLIC = 1 << 3;
        /// Data holds references that must be released when destroyed.
        const DESTRUCTOR = 1 << 4;
    }
}

impl TypeFlags {
    /// Flags a composite inherits from its children.
    pub(crate) fn inherited(self) -> TypeFlags {
        self & (TypeFlags::ZEROINIT
            | TypeFlags::BLOCKREF
            | TypeFlags::SYMBOLIC
            | TypeFlags::DESTRUCTOR)
    }
}
