//! The shared type descriptor handle.

use crate::arrmeta::read_record;
use crate::config::AssignErrorMode;
use crate::shape::IndexRange;
use crate::type_id::{TypeFlags, TypeId, TypeKind};
use crate::types::builtin::{builtin_alignment, builtin_data_size, BuiltinScalar};
use crate::types::date::{DateType, DateUnit};
use crate::types::dim::{
    dim_apply_linear_index_arrmeta, dim_arrmeta_copy_construct, dim_arrmeta_debug_print,
    dim_data_destruct, DimArrmeta, FixedDimType, StridedDimType, VarDimData, VarDimType, DIM_ARRMETA_SIZE,
    VAR_DIM_ARRMETA_SIZE,
};
use crate::types::expr::{ByteswapType, ConvertType, PropertyType};
use crate::types::fixedbytes::FixedBytesType;
use crate::types::string::StringType;
use crate::types::struct_type::{StructType, STRUCT_TYPE_PROPERTIES};
use crate::types::tuple::TupleType;
use crate::types::type_type::{type_release, TypeType};
use crate::types::typevar::TypeVarType;
use crate::types::{ExtendedType, TypeProperty, DATE_TYPE_PROPERTIES};
use crate::{DTypeError, Result};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Bindings of type variables collected while matching a pattern.
pub type TypeVarMap = HashMap<String, NdType>;

/// An immutable, cheaply cloneable type descriptor.
///
/// Builtin scalars are stored inline; every other family is shared behind an
/// [`Arc`]. Equality is structural.
#[derive(Clone)]
pub struct NdType(Repr);

#[derive(Clone)]
enum Repr {
    Builtin(TypeId),
    Extended(Arc<ExtendedType>),
}

impl NdType {
    // ------------------------------------------------------------------------
    // Factories
    // ------------------------------------------------------------------------

    /// The builtin scalar type `id`.
    ///
    /// # Panics
    /// Panics if `id` is not a builtin id; use [`NdType::from_type_id`] for
    /// unchecked input.
    pub fn builtin(id: TypeId) -> NdType {
        assert!(id.is_builtin(), "{id} is not a builtin type id");
        NdType(Repr::Builtin(id))
    }

    /// The builtin type corresponding to `T`.
    pub fn of<T: BuiltinScalar>() -> NdType {
        NdType(Repr::Builtin(T::TYPE_ID))
    }

    /// The default type of a family that needs no parameters.
    pub fn from_type_id(id: TypeId) -> Result<NdType> {
        match id {
            id if id.is_builtin() => Ok(NdType(Repr::Builtin(id))),
            TypeId::String => Ok(NdType::string()),
            TypeId::Date => Ok(NdType::date(DateUnit::Day)),
            TypeId::Type => Ok(NdType::type_type()),
            other => Err(DTypeError::InvalidArgument(format!(
                "type family {other} needs parameters"
            ))),
        }
    }

    fn extended(ext: ExtendedType) -> NdType {
        NdType(Repr::Extended(Arc::new(ext)))
    }

    pub fn fixed_bytes(data_size: usize, alignment: usize) -> Result<NdType> {
        Ok(NdType::extended(ExtendedType::FixedBytes(
            FixedBytesType::new(data_size, alignment)?,
        )))
    }

    pub fn string() -> NdType {
        NdType::extended(ExtendedType::String(StringType))
    }

    pub fn date(unit: DateUnit) -> NdType {
        NdType::extended(ExtendedType::Date(DateType::new(unit)))
    }

    pub fn fixed_dim(dim_size: usize, elem: NdType) -> Result<NdType> {
        Ok(NdType::extended(ExtendedType::FixedDim(FixedDimType::new(
            dim_size, elem,
        )?)))
    }

    pub fn strided_dim(elem: NdType) -> Result<NdType> {
        Ok(NdType::extended(ExtendedType::StridedDim(
            StridedDimType::new(elem)?,
        )))
    }

    pub fn var_dim(elem: NdType) -> Result<NdType> {
        Ok(NdType::extended(ExtendedType::VarDim(VarDimType::new(elem)?)))
    }

    pub fn tuple(fields: Vec<NdType>) -> Result<NdType> {
        Ok(NdType::extended(ExtendedType::Tuple(TupleType::new(
            fields, false,
        )?)))
    }

    /// A tuple pattern matching tuples that start with `fields`.
    pub fn variadic_tuple(fields: Vec<NdType>) -> Result<NdType> {
        Ok(NdType::extended(ExtendedType::Tuple(TupleType::new(
            fields, true,
        )?)))
    }

    pub fn tuple_with_layout(
        fields: Vec<NdType>,
        offsets: Vec<usize>,
        data_size: usize,
        alignment: usize,
    ) -> Result<NdType> {
        Ok(NdType::extended(ExtendedType::Tuple(
            TupleType::with_layout(fields, offsets, data_size, alignment)?,
        )))
    }

    pub fn struct_type(names: Vec<String>, fields: Vec<NdType>) -> Result<NdType> {
        Ok(NdType::extended(ExtendedType::Struct(StructType::new(
            names, fields, false,
        )?)))
    }

    /// A struct pattern matching structs that start with these fields.
    pub fn variadic_struct(names: Vec<String>, fields: Vec<NdType>) -> Result<NdType> {
        Ok(NdType::extended(ExtendedType::Struct(StructType::new(
            names, fields, true,
        )?)))
    }

    pub fn struct_with_layout(
        names: Vec<String>,
        fields: Vec<NdType>,
        offsets: Vec<usize>,
        data_size: usize,
        alignment: usize,
    ) -> Result<NdType> {
        Ok(NdType::extended(ExtendedType::Struct(
            StructType::with_layout(names, fields, offsets, data_size, alignment)?,
        )))
    }

    pub fn convert(value: NdType, operand: NdType, errmode: AssignErrorMode) -> Result<NdType> {
        Ok(NdType::extended(ExtendedType::Convert(ConvertType::new(
            value, operand, errmode,
        )?)))
    }

    pub fn byteswap(value: NdType) -> Result<NdType> {
        Ok(NdType::extended(ExtendedType::Byteswap(ByteswapType::new(
            value,
        )?)))
    }

    pub fn byteswap_with_operand(value: NdType, operand: NdType) -> Result<NdType> {
        Ok(NdType::extended(ExtendedType::Byteswap(
            ByteswapType::with_operand(value, operand)?,
        )))
    }

    pub fn property(operand: NdType, name: &str) -> Result<NdType> {
        Ok(NdType::extended(ExtendedType::Property(PropertyType::new(
            operand, name,
        )?)))
    }

    /// `type`, whose elements are type descriptors.
    pub fn type_type() -> NdType {
        NdType::extended(ExtendedType::Type(TypeType))
    }

    pub fn typevar(name: &str) -> Result<NdType> {
        Ok(NdType::extended(ExtendedType::TypeVar(TypeVarType::new(
            name,
        )?)))
    }

    // ------------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------------

    #[inline]
    pub fn type_id(&self) -> TypeId {
        match &self.0 {
            Repr::Builtin(id) => *id,
            Repr::Extended(ext) => ext.type_id(),
        }
    }

    #[inline]
    pub fn kind(&self) -> TypeKind {
        self.type_id().kind()
    }

    /// The builtin id, if this is a builtin scalar.
    #[inline]
    pub fn builtin_id(&self) -> Option<TypeId> {
        match &self.0 {
            Repr::Builtin(id) => Some(*id),
            Repr::Extended(_) => None,
        }
    }

    #[inline]
    pub fn is_builtin(&self) -> bool {
        matches!(self.0, Repr::Builtin(_))
    }

    /// The payload of a non-builtin type.
    #[inline]
    pub fn as_extended(&self) -> Option<&ExtendedType> {
        match &self.0 {
            Repr::Builtin(_) => None,
            Repr::Extended(ext) => Some(ext),
        }
    }

    /// Bytes occupied by one element; 0 when the size lives in arrmeta.
    pub fn data_size(&self) -> usize {
        match &self.0 {
            Repr::Builtin(id) => builtin_data_size(*id),
            Repr::Extended(ext) => ext.data_size(),
        }
    }

    pub fn alignment(&self) -> usize {
        match &self.0 {
            Repr::Builtin(id) => builtin_alignment(*id),
            Repr::Extended(ext) => ext.alignment(),
        }
    }

    pub fn arrmeta_size(&self) -> usize {
        match &self.0 {
            Repr::Builtin(_) => 0,
            Repr::Extended(ext) => ext.arrmeta_size(),
        }
    }

    pub fn flags(&self) -> TypeFlags {
        match &self.0 {
            Repr::Builtin(_) => TypeFlags::SCALAR,
            Repr::Extended(ext) => ext.flags(),
        }
    }

    #[inline]
    pub fn is_scalar(&self) -> bool {
        self.flags().contains(TypeFlags::SCALAR)
    }

    /// Number of handles sharing this descriptor; `None` for builtins.
    pub fn use_count(&self) -> Option<usize> {
        match &self.0 {
            Repr::Builtin(_) => None,
            Repr::Extended(ext) => Some(Arc::strong_count(ext)),
        }
    }

    #[inline]
    pub fn is_symbolic(&self) -> bool {
        self.flags().contains(TypeFlags::SYMBOLIC)
    }

    #[inline]
    pub fn is_expression(&self) -> bool {
        matches!(
            self.type_id(),
            TypeId::Convert | TypeId::Byteswap | TypeId::Property
        )
    }

    /// Whether instances can be copied bytewise.
    pub fn is_pod(&self) -> bool {
        !self.is_expression()
            && self.data_size() > 0
            && !self
                .flags()
                .intersects(TypeFlags::BLOCKREF | TypeFlags::SYMBOLIC | TypeFlags::DESTRUCTOR)
    }

    /// Number of leading dimensions.
    pub fn ndim(&self) -> usize {
        match self.dim_element_type() {
            Some(elem) => 1 + elem.ndim(),
            None => 0,
        }
    }

    // ------------------------------------------------------------------------
    // Family accessors
    // ------------------------------------------------------------------------

    pub fn as_fixed_bytes(&self) -> Option<&FixedBytesType> {
        match self.as_extended()? {
            ExtendedType::FixedBytes(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<&DateType> {
        match self.as_extended()? {
            ExtendedType::Date(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_fixed_dim(&self) -> Option<&FixedDimType> {
        match self.as_extended()? {
            ExtendedType::FixedDim(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_strided_dim(&self) -> Option<&StridedDimType> {
        match self.as_extended()? {
            ExtendedType::StridedDim(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_var_dim(&self) -> Option<&VarDimType> {
        match self.as_extended()? {
            ExtendedType::VarDim(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_tuple(&self) -> Option<&TupleType> {
        match self.as_extended()? {
            ExtendedType::Tuple(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_struct(&self) -> Option<&StructType> {
        match self.as_extended()? {
            ExtendedType::Struct(t) => Some(t),
            _ => None,
        }
    }

    /// The positional layout of a tuple or struct.
    pub fn composite(&self) -> Option<&TupleType> {
        match self.as_extended()? {
            ExtendedType::Tuple(t) => Some(t),
            ExtendedType::Struct(t) => Some(t.tuple()),
            _ => None,
        }
    }

    pub fn as_convert(&self) -> Option<&ConvertType> {
        match self.as_extended()? {
            ExtendedType::Convert(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_byteswap(&self) -> Option<&ByteswapType> {
        match self.as_extended()? {
            ExtendedType::Byteswap(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_property(&self) -> Option<&PropertyType> {
        match self.as_extended()? {
            ExtendedType::Property(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_typevar(&self) -> Option<&TypeVarType> {
        match self.as_extended()? {
            ExtendedType::TypeVar(t) => Some(t),
            _ => None,
        }
    }

    /// Element type of a fixed, strided or var dimension.
    pub fn dim_element_type(&self) -> Option<&NdType> {
        match self.as_extended()? {
            ExtendedType::FixedDim(t) => Some(t.element_type()),
            ExtendedType::StridedDim(t) => Some(t.element_type()),
            ExtendedType::VarDim(t) => Some(t.element_type()),
            _ => None,
        }
    }

    // ------------------------------------------------------------------------
    // Expression chains
    // ------------------------------------------------------------------------

    /// The type values are presented as; `self` for non-expressions.
    pub fn value_type(&self) -> NdType {
        match self.as_extended().and_then(ExtendedType::value) {
            Some(value) => value.clone(),
            None => self.clone(),
        }
    }

    /// The immediate operand of an expression; `self` for non-expressions.
    pub fn operand_type(&self) -> NdType {
        match self.as_extended().and_then(ExtendedType::operand) {
            Some(operand) => operand.clone(),
            None => self.clone(),
        }
    }

    /// The innermost operand of an expression chain.
    pub fn storage_type(&self) -> NdType {
        match self.as_extended().and_then(ExtendedType::operand) {
            Some(operand) => operand.storage_type(),
            None => self.clone(),
        }
    }

    /// The type with every expression replaced by its value type.
    pub fn canonical_type(&self) -> NdType {
        let Some(ext) = self.as_extended() else {
            return self.clone();
        };
        let rebuilt = match ext {
            ExtendedType::Convert(_) | ExtendedType::Byteswap(_) | ExtendedType::Property(_) => {
                return self.value_type().canonical_type()
            }
            ExtendedType::FixedDim(t) => {
                let elem = t.element_type().canonical_type();
                if elem == *t.element_type() {
                    return self.clone();
                }
                NdType::fixed_dim(t.dim_size(), elem)
            }
            ExtendedType::StridedDim(t) => {
                let elem = t.element_type().canonical_type();
                if elem == *t.element_type() {
                    return self.clone();
                }
                NdType::strided_dim(elem)
            }
            ExtendedType::VarDim(t) => {
                let elem = t.element_type().canonical_type();
                if elem == *t.element_type() {
                    return self.clone();
                }
                NdType::var_dim(elem)
            }
            ExtendedType::Tuple(t) => match t.canonical_fields() {
                Some(fields) => NdType::tuple(fields),
                None => return self.clone(),
            },
            ExtendedType::Struct(s) => match s.tuple().canonical_fields() {
                Some(fields) => NdType::struct_type(s.field_names().to_vec(), fields),
                None => return self.clone(),
            },
            _ => return self.clone(),
        };
        rebuilt.unwrap_or_else(|_| self.clone())
    }

    /// Replace the storage at the bottom of this expression chain.
    ///
    /// The replacement's value type must equal the storage type being
    /// replaced; this is how a view of a view is built.
    pub fn with_replaced_storage_type(&self, replacement: &NdType) -> Result<NdType> {
        let Some(operand) = self.as_extended().and_then(ExtendedType::operand) else {
            if replacement.value_type() != *self {
                return Err(DTypeError::InvalidArgument(format!(
                    "cannot replace storage {self} with {replacement}: value type differs"
                )));
            }
            return Ok(replacement.clone());
        };
        let new_operand = if operand.is_expression() {
            operand.with_replaced_storage_type(replacement)?
        } else if replacement.value_type() == *operand {
            replacement.clone()
        } else {
            return Err(DTypeError::InvalidArgument(format!(
                "cannot replace storage {operand} of {self} with {replacement}: value type differs"
            )));
        };
        let ext = match self.as_extended() {
            Some(ExtendedType::Convert(t)) => ExtendedType::Convert(t.with_operand(new_operand)?),
            Some(ExtendedType::Byteswap(t)) => {
                ExtendedType::Byteswap(t.with_replaced_operand(new_operand)?)
            }
            Some(ExtendedType::Property(t)) => {
                ExtendedType::Property(t.with_operand(new_operand)?)
            }
            _ => unreachable!("only expression types have operands"),
        };
        Ok(NdType::extended(ext))
    }

    // ------------------------------------------------------------------------
    // Pattern matching
    // ------------------------------------------------------------------------

    /// Whether `candidate` is an instance of this pattern, binding type
    /// variables into `tvars`.
    pub fn matches(&self, candidate: &NdType, tvars: &mut TypeVarMap) -> bool {
        match self.as_extended() {
            Some(ExtendedType::TypeVar(t)) => t.matches(candidate, tvars),
            Some(ExtendedType::FixedDim(t)) => t.matches(candidate, tvars),
            Some(ExtendedType::StridedDim(t)) => t.matches(candidate, tvars),
            Some(ExtendedType::VarDim(t)) => t.matches(candidate, tvars),
            Some(ExtendedType::Struct(s)) => candidate
                .as_struct()
                .is_some_and(|c| s.matches(c, tvars)),
            Some(ExtendedType::Tuple(t)) => candidate
                .as_tuple()
                .is_some_and(|c| t.matches_fields(c, tvars)),
            _ => self == candidate,
        }
    }

    // ------------------------------------------------------------------------
    // Indexing and shape
    // ------------------------------------------------------------------------

    /// Result type of indexing this type with `indices`.
    pub fn index(&self, indices: &[IndexRange]) -> Result<NdType> {
        self.apply_linear_index(indices, 0, self)
    }

    /// Type-level indexing starting at axis `current_i` of `root`.
    pub fn apply_linear_index(
        &self,
        indices: &[IndexRange],
        current_i: usize,
        root: &NdType,
    ) -> Result<NdType> {
        if indices.is_empty() {
            return Ok(self.clone());
        }
        match self.as_extended() {
            Some(ExtendedType::FixedDim(t)) => t.apply_linear_index(indices, current_i, root),
            Some(ExtendedType::StridedDim(t)) => t.apply_linear_index(indices, current_i, root),
            Some(ExtendedType::VarDim(_)) => Err(var_dim_index_error(self)),
            Some(ExtendedType::Tuple(t)) => {
                t.apply_linear_index(self, indices, current_i, root, |_, fields| {
                    NdType::tuple(fields)
                })
            }
            Some(ExtendedType::Struct(s)) => s.apply_linear_index(self, indices, current_i, root),
            _ => Err(too_many_indices(root, indices, current_i)),
        }
    }

    /// Arrmeta-level indexing.
    ///
    /// Constructs `out_meta` for `result_tp` (the type returned by
    /// [`NdType::apply_linear_index`]) and returns the byte offset to add to
    /// the data pointer.
    pub fn apply_linear_index_arrmeta(
        &self,
        indices: &[IndexRange],
        meta: &[u8],
        result_tp: &NdType,
        out_meta: &mut [u8],
        current_i: usize,
        root: &NdType,
    ) -> Result<isize> {
        if indices.is_empty() {
            self.arrmeta_copy_construct(out_meta, meta);
            return Ok(0);
        }
        match self.as_extended() {
            Some(ExtendedType::FixedDim(t)) => dim_apply_linear_index_arrmeta(
                t.element_type(),
                indices,
                meta,
                result_tp,
                out_meta,
                current_i,
                root,
            ),
            Some(ExtendedType::StridedDim(t)) => dim_apply_linear_index_arrmeta(
                t.element_type(),
                indices,
                meta,
                result_tp,
                out_meta,
                current_i,
                root,
            ),
            Some(ExtendedType::VarDim(_)) => Err(var_dim_index_error(self)),
            Some(ExtendedType::Tuple(t)) => {
                t.apply_linear_index_arrmeta(indices, meta, result_tp, out_meta, current_i, root)
            }
            Some(ExtendedType::Struct(s)) => s.tuple().apply_linear_index_arrmeta(
                indices, meta, result_tp, out_meta, current_i, root,
            ),
            _ => Err(too_many_indices(root, indices, current_i)),
        }
    }

    /// Sizes of the leading dimensions; `-1` where a size is unknown.
    ///
    /// Strided sizes come from `meta`. A var dimension's size comes from
    /// `data` (the element bytes) when it is the outermost dimension.
    pub fn get_shape(&self, meta: Option<&[u8]>, data: Option<&[u8]>) -> Vec<isize> {
        let mut shape = Vec::with_capacity(self.ndim());
        self.push_shape(meta, data, &mut shape);
        shape
    }

    fn push_shape(&self, meta: Option<&[u8]>, data: Option<&[u8]>, shape: &mut Vec<isize>) {
        match self.as_extended() {
            Some(ExtendedType::FixedDim(t)) => {
                shape.push(t.dim_size() as isize);
                let data = data.filter(|_| t.dim_size() > 0);
                t.element_type()
                    .push_shape(meta.map(|m| &m[DIM_ARRMETA_SIZE..]), data, shape);
            }
            Some(ExtendedType::StridedDim(t)) => {
                let size = meta.map_or(-1, |m| read_record::<DimArrmeta>(m).dim_size);
                shape.push(size);
                let data = data.filter(|_| size > 0);
                t.element_type()
                    .push_shape(meta.map(|m| &m[DIM_ARRMETA_SIZE..]), data, shape);
            }
            Some(ExtendedType::VarDim(t)) => {
                let size = data.map_or(-1, |d| read_record::<VarDimData>(d).size as isize);
                shape.push(size);
                t.element_type()
                    .push_shape(meta.map(|m| &m[VAR_DIM_ARRMETA_SIZE..]), None, shape);
            }
            _ => {}
        }
    }

    // ------------------------------------------------------------------------
    // Arrmeta lifecycle
    // ------------------------------------------------------------------------

    /// Construct default arrmeta in `meta` (exactly `arrmeta_size` bytes).
    ///
    /// On error nothing is left constructed.
    pub fn arrmeta_default_construct(&self, meta: &mut [u8], shape: &[isize]) -> Result<()> {
        match self.as_extended() {
            None => Ok(()),
            Some(ExtendedType::String(t)) => {
                t.arrmeta_default_construct(meta);
                Ok(())
            }
            Some(ExtendedType::FixedDim(t)) => t.arrmeta_default_construct(meta, shape),
            Some(ExtendedType::StridedDim(t)) => t.arrmeta_default_construct(meta, shape),
            Some(ExtendedType::VarDim(t)) => t.arrmeta_default_construct(meta, shape),
            Some(ExtendedType::Tuple(t)) => t.arrmeta_default_construct(meta),
            Some(ExtendedType::Struct(s)) => s.tuple().arrmeta_default_construct(meta),
            Some(ExtendedType::TypeVar(_)) => Err(DTypeError::InvalidArgument(format!(
                "cannot construct arrmeta for symbolic type {self}"
            ))),
            Some(ext) => match ext.operand() {
                Some(operand) => operand.arrmeta_default_construct(meta, shape),
                None => Ok(()),
            },
        }
    }

    /// Copy-construct `dst` from a constructed `src` region.
    pub fn arrmeta_copy_construct(&self, dst: &mut [u8], src: &[u8]) {
        match self.as_extended() {
            None => {}
            Some(ExtendedType::String(t)) => t.arrmeta_copy_construct(dst, src),
            Some(ExtendedType::FixedDim(t)) => dim_arrmeta_copy_construct(t.element_type(), dst, src),
            Some(ExtendedType::StridedDim(t)) => {
                dim_arrmeta_copy_construct(t.element_type(), dst, src)
            }
            Some(ExtendedType::VarDim(t)) => t.arrmeta_copy_construct(dst, src),
            Some(ExtendedType::Tuple(t)) => t.arrmeta_copy_construct(dst, src),
            Some(ExtendedType::Struct(s)) => s.tuple().arrmeta_copy_construct(dst, src),
            Some(ext) => {
                if let Some(operand) = ext.operand() {
                    operand.arrmeta_copy_construct(dst, src);
                }
            }
        }
    }

    /// Release whatever a constructed region holds.
    pub fn arrmeta_destruct(&self, meta: &mut [u8]) {
        match self.as_extended() {
            None => {}
            Some(ExtendedType::String(t)) => t.arrmeta_destruct(meta),
            Some(ExtendedType::FixedDim(t)) => {
                t.element_type().arrmeta_destruct(&mut meta[DIM_ARRMETA_SIZE..])
            }
            Some(ExtendedType::StridedDim(t)) => {
                t.element_type().arrmeta_destruct(&mut meta[DIM_ARRMETA_SIZE..])
            }
            Some(ExtendedType::VarDim(t)) => t.arrmeta_destruct(meta),
            Some(ExtendedType::Tuple(t)) => t.arrmeta_destruct(meta),
            Some(ExtendedType::Struct(s)) => s.tuple().arrmeta_destruct(meta),
            Some(ext) => {
                if let Some(operand) = ext.operand() {
                    operand.arrmeta_destruct(meta);
                }
            }
        }
    }

    /// Write a readable dump of `meta` to `out`.
    pub fn arrmeta_debug_print(
        &self,
        meta: &[u8],
        out: &mut dyn fmt::Write,
        indent: &str,
    ) -> fmt::Result {
        match self.as_extended() {
            None => Ok(()),
            Some(ExtendedType::String(t)) => t.arrmeta_debug_print(meta, out, indent),
            Some(ExtendedType::FixedDim(t)) => {
                dim_arrmeta_debug_print("fixed_dim", t.element_type(), meta, out, indent)
            }
            Some(ExtendedType::StridedDim(t)) => {
                dim_arrmeta_debug_print("strided_dim", t.element_type(), meta, out, indent)
            }
            Some(ExtendedType::VarDim(t)) => t.arrmeta_debug_print(meta, out, indent),
            Some(ExtendedType::Tuple(t)) => t.arrmeta_debug_print("tuple", None, meta, out, indent),
            Some(ExtendedType::Struct(s)) => s.arrmeta_debug_print(meta, out, indent),
            Some(ext) => match ext.operand() {
                Some(operand) => operand.arrmeta_debug_print(meta, out, indent),
                None => Ok(()),
            },
        }
    }

    // ------------------------------------------------------------------------
    // Data lifecycle
    // ------------------------------------------------------------------------

    /// Release the references held by one element at `data`.
    ///
    /// Only types flagged [`TypeFlags::DESTRUCTOR`] hold any. Elements of a
    /// var dimension belong to its memory block and are released with it.
    ///
    /// # Safety
    /// `data` must address a constructed element laid out by `meta`, and
    /// the element must not be used again except to be overwritten.
    pub unsafe fn data_destruct(&self, meta: &[u8], data: *mut u8) {
        if !self.flags().contains(TypeFlags::DESTRUCTOR) {
            return;
        }
        match self.as_extended() {
            Some(ExtendedType::Type(_)) => type_release(data),
            Some(ExtendedType::FixedDim(t)) => dim_data_destruct(t.element_type(), meta, data),
            Some(ExtendedType::StridedDim(t)) => dim_data_destruct(t.element_type(), meta, data),
            Some(ExtendedType::Tuple(t)) => t.data_destruct(meta, data),
            Some(ExtendedType::Struct(s)) => s.tuple().data_destruct(meta, data),
            Some(ext) => {
                if let Some(operand) = ext.operand() {
                    operand.data_destruct(meta, data);
                }
            }
            None => {}
        }
    }

    /// Move this handle into a data word of a `type` element.
    ///
    /// Builtins are tagged in the low bit; extended types store their
    /// shared pointer, which is at least word aligned.
    pub(crate) fn into_word(self) -> usize {
        match self.0 {
            Repr::Builtin(id) => ((id as usize) << 1) | 1,
            Repr::Extended(ext) => Arc::into_raw(ext) as usize,
        }
    }

    /// A new handle for the descriptor in `word`; `None` for zero.
    ///
    /// # Safety
    /// `word` must be zero or come from [`NdType::into_word`] without having
    /// been released.
    pub(crate) unsafe fn clone_from_word(word: usize) -> Option<NdType> {
        if word == 0 {
            return None;
        }
        if word & 1 == 1 {
            let id = TypeId::from_raw((word >> 1) as u32).ok()?;
            return Some(NdType(Repr::Builtin(id)));
        }
        let ptr = word as *const ExtendedType;
        Arc::increment_strong_count(ptr);
        Some(NdType(Repr::Extended(Arc::from_raw(ptr))))
    }

    /// Drop the reference owned by `word`.
    ///
    /// # Safety
    /// Same as [`NdType::clone_from_word`]; `word` must not be used after.
    pub(crate) unsafe fn release_word(word: usize) {
        if word != 0 && word & 1 == 0 {
            drop(Arc::from_raw(word as *const ExtendedType));
        }
    }

    // ------------------------------------------------------------------------
    // Properties
    // ------------------------------------------------------------------------

    /// Index of the elementwise property `name`.
    pub fn elwise_property_index(&self, name: &str) -> Result<usize> {
        match self.as_extended() {
            Some(ExtendedType::Date(d)) => d.elwise_property_index(self, name),
            Some(ExtendedType::Struct(s)) => s.elwise_property_index(self, name),
            _ => Err(DTypeError::UnknownProperty {
                tp: self.to_string(),
                name: name.to_string(),
            }),
        }
    }

    /// Value type of the elementwise property at `index`.
    pub fn elwise_property_type(&self, index: usize) -> Option<NdType> {
        match self.as_extended()? {
            ExtendedType::Date(d) => d.elwise_property_type(index),
            ExtendedType::Struct(s) => s.elwise_property_type(index),
            _ => None,
        }
    }

    /// Named type-level properties.
    pub fn type_properties(&self) -> &'static [TypeProperty] {
        match self.as_extended() {
            Some(ExtendedType::Struct(_)) => &STRUCT_TYPE_PROPERTIES,
            Some(ExtendedType::Date(_)) => &DATE_TYPE_PROPERTIES,
            _ => &[],
        }
    }

    /// Elementwise properties reachable from arrays of this type.
    pub fn array_property_names(&self) -> Vec<String> {
        let mut tp = self;
        while let Some(elem) = tp.dim_element_type() {
            tp = elem;
        }
        let value = tp.value_type();
        match value.as_extended() {
            Some(ExtendedType::Date(d)) => {
                d.property_names().iter().map(|s| s.to_string()).collect()
            }
            Some(ExtendedType::Struct(s)) => s.field_names().to_vec(),
            _ => Vec::new(),
        }
    }
}

fn too_many_indices(root: &NdType, indices: &[IndexRange], current_i: usize) -> DTypeError {
    DTypeError::TooManyIndices {
        tp: root.to_string(),
        nindices: current_i + indices.len(),
        ndim: current_i,
    }
}

fn var_dim_index_error(tp: &NdType) -> DTypeError {
    DTypeError::InvalidArgument(format!("indexing into {tp} is not supported"))
}

impl PartialEq for NdType {
    fn eq(&self, other: &Self) -> bool {
        match (&self.0, &other.0) {
            (Repr::Builtin(a), Repr::Builtin(b)) => a == b,
            (Repr::Extended(a), Repr::Extended(b)) => Arc::ptr_eq(a, b) || **a == **b,
            _ => false,
        }
    }
}

impl fmt::Display for NdType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Repr::Builtin(id) => f.write_str(id.name()),
            Repr::Extended(ext) => write!(f, "{ext}"),
        }
    }
}

impl fmt::Debug for NdType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NdType({self})")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arrmeta::Arrmeta;

    fn i32_tp() -> NdType {
        NdType::builtin(TypeId::Int32)
    }

    #[test]
    fn test_builtin_basics() {
        let tp = NdType::of::<f64>();
        assert_eq!(tp, NdType::builtin(TypeId::Float64));
        assert_eq!(tp.data_size(), 8);
        assert_eq!(tp.kind(), TypeKind::Real);
        assert!(tp.is_scalar() && tp.is_pod());
        assert_eq!(format!("{tp:?}"), "NdType(float64)");
        assert_eq!(NdType::of::<num_complex::Complex32>().alignment(), 4);
    }

    #[test]
    fn test_from_type_id() {
        assert_eq!(NdType::from_type_id(TypeId::UInt16).unwrap().data_size(), 2);
        assert_eq!(NdType::from_type_id(TypeId::Date).unwrap().to_string(), "date");
        assert!(NdType::from_type_id(TypeId::FixedDim).is_err());
    }

    #[test]
    fn test_structural_equality() {
        let a = NdType::fixed_dim(3, NdType::string()).unwrap();
        let b = NdType::fixed_dim(3, NdType::string()).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, NdType::fixed_dim(4, NdType::string()).unwrap());
        assert_ne!(NdType::string(), i32_tp());
    }

    #[test]
    fn test_display_nested() {
        let tp = NdType::strided_dim(
            NdType::fixed_dim(
                2,
                NdType::struct_type(
                    vec!["x".into(), "when".into()],
                    vec![i32_tp(), NdType::date(DateUnit::Month)],
                )
                .unwrap(),
            )
            .unwrap(),
        )
        .unwrap();
        assert_eq!(tp.to_string(), "strided * 2 * {x : int32, when : date[month]}");
        assert_eq!(tp.ndim(), 2);
        let bytes = NdType::fixed_bytes(6, 2).unwrap();
        assert_eq!(bytes.to_string(), "fixedbytes[6, align=2]");
    }

    #[test]
    fn test_flags_propagate() {
        let tp = NdType::var_dim(NdType::string()).unwrap();
        assert!(tp.flags().contains(TypeFlags::BLOCKREF));
        assert!(!tp.is_scalar());
        let pattern = NdType::fixed_dim(2, NdType::typevar("T").unwrap()).unwrap();
        assert!(pattern.is_symbolic());
        assert!(!NdType::fixed_dim(2, i32_tp()).unwrap().is_symbolic());
    }

    #[test]
    fn test_view_of_view() {
        let outer =
            NdType::convert(NdType::of::<f64>(), i32_tp(), AssignErrorMode::default()).unwrap();
        let inner = NdType::byteswap(i32_tp()).unwrap();
        let combined = outer.with_replaced_storage_type(&inner).unwrap();
        assert_eq!(combined.value_type(), NdType::of::<f64>());
        assert_eq!(combined.operand_type(), inner);
        assert_eq!(combined.storage_type(), NdType::fixed_bytes(4, 4).unwrap());
        assert_eq!(combined.data_size(), 4);

        let wrong = NdType::byteswap(NdType::of::<i64>()).unwrap();
        assert!(outer.with_replaced_storage_type(&wrong).is_err());
        assert_eq!(i32_tp().with_replaced_storage_type(&inner).unwrap(), inner);
    }

    #[test]
    fn test_canonical_type() {
        let conv =
            NdType::convert(NdType::of::<f64>(), NdType::of::<i16>(), AssignErrorMode::None)
                .unwrap();
        let tp = NdType::fixed_dim(3, conv).unwrap();
        assert_eq!(tp.data_size(), 6);
        let canon = tp.canonical_type();
        assert_eq!(canon, NdType::fixed_dim(3, NdType::of::<f64>()).unwrap());
        assert_eq!(canon.data_size(), 24);
        assert_eq!(NdType::string().canonical_type(), NdType::string());
    }

    #[test]
    fn test_index_types() {
        let tp = NdType::fixed_dim(4, NdType::fixed_dim(3, i32_tp()).unwrap()).unwrap();
        let row = tp.index(&[IndexRange::index(1)]).unwrap();
        assert_eq!(row, NdType::fixed_dim(3, i32_tp()).unwrap());
        let sliced = tp.index(&[IndexRange::range(1, 3), IndexRange::all()]).unwrap();
        assert_eq!(sliced.to_string(), "strided * 3 * int32");
        assert_eq!(tp.index(&[IndexRange::all()]).unwrap(), tp);

        let err = tp
            .index(&[IndexRange::index(0), IndexRange::index(0), IndexRange::index(0)])
            .unwrap_err();
        assert_eq!(
            err,
            DTypeError::TooManyIndices {
                tp: tp.to_string(),
                nindices: 3,
                ndim: 2,
            }
        );
        assert!(matches!(
            tp.index(&[IndexRange::index(4)]),
            Err(DTypeError::IndexOutOfBounds { .. })
        ));
    }

    #[test]
    fn test_index_arrmeta_strides() {
        let tp = NdType::strided_dim(NdType::strided_dim(i32_tp()).unwrap()).unwrap();
        let meta = Arrmeta::default_for(&tp, &[4, 5]).unwrap();
        let indices = [IndexRange::all().with_step(-2), IndexRange::index(3)];
        let result = tp.index(&indices).unwrap();
        assert_eq!(result, NdType::strided_dim(i32_tp()).unwrap());
        let out = Arrmeta::construct_with(&result, |out| {
            let off = tp.apply_linear_index_arrmeta(&indices, meta.as_bytes(), &result, out, 0, &tp)?;
            assert_eq!(off, 3 * 20 + 3 * 4);
            Ok(())
        })
        .unwrap();
        let rec: DimArrmeta = read_record(out.as_bytes());
        assert_eq!(rec, DimArrmeta { dim_size: 2, stride: -40 });
    }

    #[test]
    fn test_var_dim_rejects_indexing() {
        let tp = NdType::var_dim(i32_tp()).unwrap();
        assert!(tp.index(&[IndexRange::index(0)]).is_err());
        assert_eq!(tp.get_shape(None, None), vec![-1]);
        let data = VarDimData { begin: 0, size: 7 };
        assert_eq!(
            tp.get_shape(None, Some(bytemuck::bytes_of(&data))),
            vec![7]
        );
    }

    #[test]
    fn test_array_property_names() {
        let tp = NdType::strided_dim(NdType::date(DateUnit::Month)).unwrap();
        assert_eq!(tp.array_property_names(), vec!["year", "month"]);
        let st = NdType::struct_type(vec!["p".into()], vec![i32_tp()]).unwrap();
        assert_eq!(st.array_property_names(), vec!["p"]);
        assert!(i32_tp().array_property_names().is_empty());
        assert_eq!(
            (NdType::date(DateUnit::Year).type_properties()[0].getter)(&NdType::date(DateUnit::Year))
                .unwrap(),
            crate::PropertyValue::Str("year".into())
        );
    }
}
