//! Dimension types: `N * T`, `strided * T` and `var * T`.

use crate::arrmeta::{read_record, write_record, Arrmeta};
use crate::memblock::{BlockRef, MemoryBlock};
use crate::ndtype::{NdType, TypeVarMap};
use crate::shape::{apply_single_index, IndexRange};
use crate::type_id::{TypeFlags, TypeId};
use crate::{DTypeError, Result};
use bytemuck::{Pod, Zeroable};
use std::fmt;

/// Arrmeta of a fixed or strided dimension.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Zeroable, Pod)]
pub struct DimArrmeta {
    pub dim_size: isize,
    pub stride: isize,
}

/// Arrmeta of a var dimension.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Zeroable, Pod)]
pub struct VarDimArrmeta {
    /// Memory block that new elements are allocated from.
    pub blockref: usize,
    pub stride: isize,
    /// Byte offset applied to `begin` when reading elements.
    pub offset: isize,
}

/// Data of a var dimension element.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Zeroable, Pod)]
pub struct VarDimData {
    /// Start of the element storage; 0 while unallocated.
    pub begin: usize,
    pub size: usize,
}

pub(crate) const DIM_ARRMETA_SIZE: usize = std::mem::size_of::<DimArrmeta>();
pub(crate) const VAR_DIM_ARRMETA_SIZE: usize = std::mem::size_of::<VarDimArrmeta>();

fn check_element(kind: &str, elem: &NdType) -> Result<()> {
    if elem.data_size() == 0 && !elem.is_symbolic() {
        return Err(DTypeError::InvalidArgument(format!(
            "{kind} element type {elem} has no fixed data size"
        )));
    }
    if elem.is_expression() && elem.arrmeta_size() > 0 {
        return Err(DTypeError::InvalidArgument(format!(
            "{kind} element type {elem} is an expression with arrmeta"
        )));
    }
    Ok(())
}

/// Bytes spanned by one element of `tp` laid out with default arrmeta.
pub(crate) fn element_extent(tp: &NdType, meta: &[u8]) -> isize {
    if tp.data_size() > 0 {
        return tp.data_size() as isize;
    }
    match tp.type_id() {
        TypeId::StridedDim => {
            let rec: DimArrmeta = read_record(meta);
            rec.dim_size * rec.stride
        }
        _ => 0,
    }
}

fn shape_tail(shape: &[isize]) -> &[isize] {
    shape.get(1..).unwrap_or(&[])
}

// ============================================================================
// Fixed dimension
// ============================================================================

/// `N * T`: `N` elements stored inline.
#[derive(Debug, Clone, PartialEq)]
pub struct FixedDimType {
    dim_size: usize,
    elem: NdType,
}

impl FixedDimType {
    pub fn new(dim_size: usize, elem: NdType) -> Result<Self> {
        check_element("fixed dimension", &elem)?;
        Ok(FixedDimType { dim_size, elem })
    }

    #[inline]
    pub fn dim_size(&self) -> usize {
        self.dim_size
    }

    #[inline]
    pub fn element_type(&self) -> &NdType {
        &self.elem
    }

    pub fn data_size(&self) -> usize {
        self.dim_size * self.elem.data_size()
    }

    pub fn arrmeta_size(&self) -> usize {
        DIM_ARRMETA_SIZE + self.elem.arrmeta_size()
    }

    pub(crate) fn arrmeta_default_construct(&self, meta: &mut [u8], shape: &[isize]) -> Result<()> {
        self.elem
            .arrmeta_default_construct(&mut meta[DIM_ARRMETA_SIZE..], shape_tail(shape))?;
        let rec = DimArrmeta {
            dim_size: self.dim_size as isize,
            stride: self.elem.data_size() as isize,
        };
        write_record(meta, &rec);
        Ok(())
    }

    pub(crate) fn matches(&self, candidate: &NdType, tvars: &mut TypeVarMap) -> bool {
        match candidate.as_fixed_dim() {
            Some(c) => c.dim_size == self.dim_size && self.elem.matches(&c.elem, tvars),
            None => false,
        }
    }

    pub(crate) fn apply_linear_index(
        &self,
        indices: &[IndexRange],
        current_i: usize,
        root: &NdType,
    ) -> Result<NdType> {
        let r = apply_single_index(&indices[0], self.dim_size as isize, current_i)?;
        let elem = self
            .elem
            .apply_linear_index(&indices[1..], current_i + 1, root)?;
        if r.remove_dim {
            Ok(elem)
        } else if indices[0].is_nop(self.dim_size as isize) {
            NdType::fixed_dim(self.dim_size, elem)
        } else {
            NdType::strided_dim(elem)
        }
    }
}

impl fmt::Display for FixedDimType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} * {}", self.dim_size, self.elem)
    }
}

// ============================================================================
// Strided dimension
// ============================================================================

/// `strided * T`: size and stride come from arrmeta.
#[derive(Debug, Clone, PartialEq)]
pub struct StridedDimType {
    elem: NdType,
}

impl StridedDimType {
    pub fn new(elem: NdType) -> Result<Self> {
        if elem.data_size() == 0 && elem.type_id() != TypeId::StridedDim && !elem.is_symbolic() {
            return Err(DTypeError::InvalidArgument(format!(
                "strided dimension element type {elem} has no fixed data size"
            )));
        }
        Ok(StridedDimType { elem })
    }

    #[inline]
    pub fn element_type(&self) -> &NdType {
        &self.elem
    }

    pub fn arrmeta_size(&self) -> usize {
        DIM_ARRMETA_SIZE + self.elem.arrmeta_size()
    }

    pub(crate) fn arrmeta_default_construct(&self, meta: &mut [u8], shape: &[isize]) -> Result<()> {
        let dim_size = shape.first().copied().unwrap_or(0);
        if dim_size < 0 {
            return Err(DTypeError::InvalidArgument(format!(
                "negative dimension size {dim_size} for {self}"
            )));
        }
        let elem_meta = &mut meta[DIM_ARRMETA_SIZE..];
        self.elem
            .arrmeta_default_construct(elem_meta, shape_tail(shape))?;
        let stride = element_extent(&self.elem, elem_meta);
        write_record(meta, &DimArrmeta { dim_size, stride });
        Ok(())
    }

    pub(crate) fn matches(&self, candidate: &NdType, tvars: &mut TypeVarMap) -> bool {
        match candidate.type_id() {
            TypeId::FixedDim | TypeId::StridedDim => candidate
                .dim_element_type()
                .is_some_and(|e| self.elem.matches(e, tvars)),
            _ => false,
        }
    }

    pub(crate) fn apply_linear_index(
        &self,
        indices: &[IndexRange],
        current_i: usize,
        root: &NdType,
    ) -> Result<NdType> {
        let elem = self
            .elem
            .apply_linear_index(&indices[1..], current_i + 1, root)?;
        if indices[0].is_single() {
            Ok(elem)
        } else {
            NdType::strided_dim(elem)
        }
    }
}

impl fmt::Display for StridedDimType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "strided * {}", self.elem)
    }
}

/// Shared arrmeta-level indexing of fixed and strided dimensions.
pub(crate) fn dim_apply_linear_index_arrmeta(
    elem: &NdType,
    indices: &[IndexRange],
    meta: &[u8],
    result_tp: &NdType,
    out_meta: &mut [u8],
    current_i: usize,
    root: &NdType,
) -> Result<isize> {
    let rec: DimArrmeta = read_record(meta);
    let r = apply_single_index(&indices[0], rec.dim_size, current_i)?;
    let elem_meta = &meta[DIM_ARRMETA_SIZE..];
    let base = r.start * rec.stride;
    if r.remove_dim {
        let off = elem.apply_linear_index_arrmeta(
            &indices[1..],
            elem_meta,
            result_tp,
            out_meta,
            current_i + 1,
            root,
        )?;
        return Ok(base + off);
    }
    let result_elem = result_tp.dim_element_type().ok_or_else(|| {
        DTypeError::InvalidArgument(format!("index result {result_tp} is not a dimension"))
    })?;
    let off = elem.apply_linear_index_arrmeta(
        &indices[1..],
        elem_meta,
        result_elem,
        &mut out_meta[DIM_ARRMETA_SIZE..],
        current_i + 1,
        root,
    )?;
    let out_rec = DimArrmeta {
        dim_size: r.count,
        stride: rec.stride * r.step,
    };
    write_record(out_meta, &out_rec);
    Ok(base + off)
}

pub(crate) fn dim_arrmeta_copy_construct(elem: &NdType, dst: &mut [u8], src: &[u8]) {
    let rec: DimArrmeta = read_record(src);
    write_record(dst, &rec);
    elem.arrmeta_copy_construct(&mut dst[DIM_ARRMETA_SIZE..], &src[DIM_ARRMETA_SIZE..]);
}

/// Destruct every element of a fixed or strided dimension.
///
/// # Safety
/// See [`NdType::data_destruct`].
pub(crate) unsafe fn dim_data_destruct(elem: &NdType, meta: &[u8], data: *mut u8) {
    let rec: DimArrmeta = read_record(meta);
    let elem_meta = &meta[DIM_ARRMETA_SIZE..];
    for i in 0..rec.dim_size.max(0) {
        elem.data_destruct(elem_meta, data.wrapping_offset(i * rec.stride));
    }
}

pub(crate) fn dim_arrmeta_debug_print(
    name: &str,
    elem: &NdType,
    meta: &[u8],
    out: &mut dyn fmt::Write,
    indent: &str,
) -> fmt::Result {
    let rec: DimArrmeta = read_record(meta);
    writeln!(out, "{indent}{name} arrmeta")?;
    writeln!(out, "{indent} size: {}", rec.dim_size)?;
    writeln!(out, "{indent} stride: {}", rec.stride)?;
    elem.arrmeta_debug_print(&meta[DIM_ARRMETA_SIZE..], out, &format!("{indent}  "))
}

// ============================================================================
// Var dimension
// ============================================================================

/// `var * T`: each element owns a separately allocated run of `T`.
#[derive(Debug, Clone, PartialEq)]
pub struct VarDimType {
    elem: NdType,
}

impl VarDimType {
    pub const DATA_SIZE: usize = std::mem::size_of::<VarDimData>();

    pub fn new(elem: NdType) -> Result<Self> {
        check_element("var dimension", &elem)?;
        Ok(VarDimType { elem })
    }

    #[inline]
    pub fn element_type(&self) -> &NdType {
        &self.elem
    }

    pub fn arrmeta_size(&self) -> usize {
        VAR_DIM_ARRMETA_SIZE + self.elem.arrmeta_size()
    }

    pub(crate) fn arrmeta_default_construct(&self, meta: &mut [u8], shape: &[isize]) -> Result<()> {
        let elem_meta = &mut meta[VAR_DIM_ARRMETA_SIZE..];
        self.elem.arrmeta_default_construct(elem_meta, shape_tail(shape))?;
        let block = if self.elem.flags().contains(TypeFlags::DESTRUCTOR) {
            match Arrmeta::copy_of(&self.elem, elem_meta) {
                Ok(owned) => MemoryBlock::owning(self.elem.clone(), owned),
                Err(e) => {
                    self.elem.arrmeta_destruct(elem_meta);
                    return Err(e);
                }
            }
        } else {
            MemoryBlock::new()
        };
        let rec = VarDimArrmeta {
            blockref: BlockRef::into_word(block),
            stride: self.elem.data_size() as isize,
            offset: 0,
        };
        write_record(meta, &rec);
        Ok(())
    }

    pub(crate) fn arrmeta_copy_construct(&self, dst: &mut [u8], src: &[u8]) {
        let rec: VarDimArrmeta = read_record(src);
        unsafe { BlockRef::retain(rec.blockref) };
        write_record(dst, &rec);
        self.elem.arrmeta_copy_construct(
            &mut dst[VAR_DIM_ARRMETA_SIZE..],
            &src[VAR_DIM_ARRMETA_SIZE..],
        );
    }

    pub(crate) fn arrmeta_destruct(&self, meta: &mut [u8]) {
        self.elem.arrmeta_destruct(&mut meta[VAR_DIM_ARRMETA_SIZE..]);
        let rec: VarDimArrmeta = read_record(meta);
        unsafe { BlockRef::release(rec.blockref) };
        write_record(
            meta,
            &VarDimArrmeta {
                blockref: 0,
                ..rec
            },
        );
    }

    pub(crate) fn arrmeta_debug_print(
        &self,
        meta: &[u8],
        out: &mut dyn fmt::Write,
        indent: &str,
    ) -> fmt::Result {
        let rec: VarDimArrmeta = read_record(meta);
        writeln!(out, "{indent}var_dim arrmeta")?;
        writeln!(out, "{indent} blockref: {:#x}", rec.blockref)?;
        writeln!(out, "{indent} stride: {}", rec.stride)?;
        writeln!(out, "{indent} offset: {}", rec.offset)?;
        self.elem.arrmeta_debug_print(
            &meta[VAR_DIM_ARRMETA_SIZE..],
            out,
            &format!("{indent}  "),
        )
    }

    pub(crate) fn matches(&self, candidate: &NdType, tvars: &mut TypeVarMap) -> bool {
        match candidate.as_var_dim() {
            Some(c) => self.elem.matches(&c.elem, tvars),
            None => false,
        }
    }
}

impl fmt::Display for VarDimType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "var * {}", self.elem)
    }
}
