//! Positional composite layout shared by tuples and structs.
//!
//! Arrmeta layout of a composite with `n` fields:
//!
//! ```text
//! [data offset 0] .. [data offset n-1] [field 0 arrmeta] .. [field n-1 arrmeta]
//! ```
//!
//! The data offsets are per instance so that slicing fields or indexing into
//! a field's dimensions can shift each field independently. Default
//! construction writes the type's own layout.

use crate::arrmeta::{read_word, write_word, WORD};
use crate::ndtype::{NdType, TypeVarMap};
use crate::shape::{apply_single_index, IndexRange};
use crate::type_id::TypeFlags;
use crate::{DTypeError, Result};
use std::fmt;

/// Field types plus their layout.
#[derive(Debug, Clone, PartialEq)]
pub struct TupleType {
    fields: Vec<NdType>,
    data_offsets: Vec<usize>,
    arrmeta_offsets: Vec<usize>,
    data_size: usize,
    alignment: usize,
    arrmeta_size: usize,
    standard_layout: bool,
    variadic: bool,
    flags: TypeFlags,
}

#[inline]
fn align_up(offset: usize, alignment: usize) -> usize {
    offset.div_ceil(alignment) * alignment
}

/// Natural offsets, size and alignment of `fields`.
pub(crate) fn standard_layout(fields: &[NdType]) -> (Vec<usize>, usize, usize) {
    let mut offsets = Vec::with_capacity(fields.len());
    let mut end = 0usize;
    let mut alignment = 1usize;
    for field in fields {
        let a = field.alignment().max(1);
        let off = align_up(end, a);
        offsets.push(off);
        end = off + field.data_size();
        alignment = alignment.max(a);
    }
    (offsets, align_up(end, alignment), alignment)
}

fn check_fields(fields: &[NdType]) -> Result<()> {
    for (i, field) in fields.iter().enumerate() {
        if field.data_size() == 0 && !field.is_symbolic() {
            return Err(DTypeError::InvalidArgument(format!(
                "field {i} of type {field} has no fixed data size"
            )));
        }
    }
    Ok(())
}

impl TupleType {
    /// A tuple with the standard layout.
    pub fn new(fields: Vec<NdType>, variadic: bool) -> Result<Self> {
        check_fields(&fields)?;
        let (offsets, data_size, alignment) = standard_layout(&fields);
        Ok(TupleType::build(fields, offsets, data_size, alignment, variadic))
    }

    /// A tuple with caller-supplied field offsets, size and alignment.
    pub fn with_layout(
        fields: Vec<NdType>,
        offsets: Vec<usize>,
        data_size: usize,
        alignment: usize,
    ) -> Result<Self> {
        check_fields(&fields)?;
        if offsets.len() != fields.len() {
            return Err(DTypeError::InvalidArgument(format!(
                "{} offsets given for {} fields",
                offsets.len(),
                fields.len()
            )));
        }
        if !alignment.is_power_of_two() {
            return Err(DTypeError::InvalidArgument(format!(
                "alignment {alignment} is not a power of two"
            )));
        }
        if data_size % alignment != 0 {
            return Err(DTypeError::InvalidArgument(format!(
                "data size {data_size} is not a multiple of alignment {alignment}"
            )));
        }
        for (i, (field, &off)) in fields.iter().zip(&offsets).enumerate() {
            if off + field.data_size() > data_size {
                return Err(DTypeError::InvalidArgument(format!(
                    "field {i} of type {field} at offset {off} overruns data size {data_size}"
                )));
            }
        }
        Ok(TupleType::build(fields, offsets, data_size, alignment, false))
    }

    fn build(
        fields: Vec<NdType>,
        data_offsets: Vec<usize>,
        data_size: usize,
        alignment: usize,
        variadic: bool,
    ) -> Self {
        let (std_offsets, std_size, std_alignment) = standard_layout(&fields);
        let standard_layout =
            std_offsets == data_offsets && std_size == data_size && std_alignment == alignment;

        let mut arrmeta_offsets = Vec::with_capacity(fields.len());
        let mut arrmeta_size = fields.len() * WORD;
        let mut flags = TypeFlags::empty();
        for field in &fields {
            arrmeta_offsets.push(arrmeta_size);
            arrmeta_size += field.arrmeta_size();
            flags |= field.flags().inherited();
        }
        if variadic {
            flags |= TypeFlags::SYMBOLIC;
        }

        TupleType {
            fields,
            data_offsets,
            arrmeta_offsets,
            data_size,
            alignment,
            arrmeta_size,
            standard_layout,
            variadic,
            flags,
        }
    }

    #[inline]
    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    #[inline]
    pub fn fields(&self) -> &[NdType] {
        &self.fields
    }

    #[inline]
    pub fn field_type(&self, i: usize) -> Option<&NdType> {
        self.fields.get(i)
    }

    /// Default data offsets of the fields.
    #[inline]
    pub fn data_offsets(&self) -> &[usize] {
        &self.data_offsets
    }

    /// Offsets of each field's arrmeta region within this type's arrmeta.
    #[inline]
    pub fn arrmeta_offsets(&self) -> &[usize] {
        &self.arrmeta_offsets
    }

    #[inline]
    pub fn data_size(&self) -> usize {
        self.data_size
    }

    #[inline]
    pub fn alignment(&self) -> usize {
        self.alignment
    }

    #[inline]
    pub fn arrmeta_size(&self) -> usize {
        self.arrmeta_size
    }

    #[inline]
    pub fn flags(&self) -> TypeFlags {
        self.flags
    }

    #[inline]
    pub fn is_standard_layout(&self) -> bool {
        self.standard_layout
    }

    #[inline]
    pub fn is_variadic(&self) -> bool {
        self.variadic
    }

    /// Data offset of field `i` recorded in an instance's arrmeta.
    #[inline]
    pub fn instance_data_offset(&self, meta: &[u8], i: usize) -> usize {
        read_word(meta, i)
    }

    /// Field `i`'s arrmeta region within `meta`.
    #[inline]
    pub fn field_arrmeta<'a>(&self, meta: &'a [u8], i: usize) -> &'a [u8] {
        let start = self.arrmeta_offsets[i];
        &meta[start..start + self.fields[i].arrmeta_size()]
    }

    #[inline]
    pub(crate) fn field_arrmeta_mut<'a>(&self, meta: &'a mut [u8], i: usize) -> &'a mut [u8] {
        let start = self.arrmeta_offsets[i];
        &mut meta[start..start + self.fields[i].arrmeta_size()]
    }

    /// Same fields with canonical field types (standard layout if any changed).
    pub(crate) fn canonical_fields(&self) -> Option<Vec<NdType>> {
        let canonical: Vec<NdType> = self.fields.iter().map(|f| f.canonical_type()).collect();
        (canonical != self.fields).then_some(canonical)
    }

    // ------------------------------------------------------------------------
    // Arrmeta lifecycle
    // ------------------------------------------------------------------------

    pub(crate) fn arrmeta_default_construct(&self, meta: &mut [u8]) -> Result<()> {
        for (i, &off) in self.data_offsets.iter().enumerate() {
            write_word(meta, i, off);
        }
        for (i, field) in self.fields.iter().enumerate() {
            if let Err(err) = field.arrmeta_default_construct(self.field_arrmeta_mut(meta, i), &[]) {
                self.destruct_fields(meta, i);
                return Err(err);
            }
        }
        Ok(())
    }

    pub(crate) fn arrmeta_copy_construct(&self, dst: &mut [u8], src: &[u8]) {
        for i in 0..self.fields.len() {
            write_word(dst, i, read_word(src, i));
        }
        for (i, field) in self.fields.iter().enumerate() {
            field.arrmeta_copy_construct(self.field_arrmeta_mut(dst, i), self.field_arrmeta(src, i));
        }
    }

    /// Destruct the data of every field of one instance.
    ///
    /// # Safety
    /// See [`NdType::data_destruct`].
    pub(crate) unsafe fn data_destruct(&self, meta: &[u8], data: *mut u8) {
        for (i, field) in self.fields.iter().enumerate() {
            field.data_destruct(
                self.field_arrmeta(meta, i),
                data.add(self.instance_data_offset(meta, i)),
            );
        }
    }

    pub(crate) fn arrmeta_destruct(&self, meta: &mut [u8]) {
        self.destruct_fields(meta, self.fields.len());
    }

    /// Destruct the arrmeta of fields `0..count`, last first.
    pub(crate) fn destruct_fields(&self, meta: &mut [u8], count: usize) {
        for i in (0..count).rev() {
            self.fields[i].arrmeta_destruct(self.field_arrmeta_mut(meta, i));
        }
    }

    pub(crate) fn arrmeta_debug_print(
        &self,
        label: &str,
        names: Option<&[String]>,
        meta: &[u8],
        out: &mut dyn fmt::Write,
        indent: &str,
    ) -> fmt::Result {
        writeln!(out, "{indent}{label} arrmeta")?;
        let offsets: Vec<String> = (0..self.fields.len())
            .map(|i| read_word(meta, i).to_string())
            .collect();
        writeln!(out, "{indent} field offsets: {}", offsets.join(", "))?;
        let child_indent = format!("{indent}  ");
        for (i, field) in self.fields.iter().enumerate() {
            if field.arrmeta_size() == 0 {
                continue;
            }
            match names {
                Some(names) => writeln!(out, "{indent} field {i} ({}) arrmeta:", names[i])?,
                None => writeln!(out, "{indent} field {i} arrmeta:")?,
            }
            field.arrmeta_debug_print(self.field_arrmeta(meta, i), out, &child_indent)?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Matching and indexing
    // ------------------------------------------------------------------------

    /// Field-count and field-type part of structural matching.
    pub(crate) fn matches_fields(&self, candidate: &TupleType, tvars: &mut TypeVarMap) -> bool {
        if candidate.variadic && !self.variadic {
            return false;
        }
        let n = self.fields.len();
        let count_ok = if self.variadic {
            candidate.fields.len() >= n
        } else {
            candidate.fields.len() == n
        };
        count_ok
            && self
                .fields
                .iter()
                .zip(&candidate.fields)
                .all(|(p, c)| p.matches(c, tvars))
    }

    /// Type-level indexing; `rebuild` makes the composite for a field subset.
    pub(crate) fn apply_linear_index<F>(
        &self,
        this: &NdType,
        indices: &[IndexRange],
        current_i: usize,
        root: &NdType,
        rebuild: F,
    ) -> Result<NdType>
    where
        F: FnOnce(&[usize], Vec<NdType>) -> Result<NdType>,
    {
        let n = self.fields.len() as isize;
        let r = apply_single_index(&indices[0], n, current_i)?;
        if r.remove_dim {
            return self.fields[r.start as usize].apply_linear_index(
                &indices[1..],
                current_i + 1,
                root,
            );
        }
        if indices.len() == 1 && indices[0].is_nop(n) {
            return Ok(this.clone());
        }
        let selected: Vec<usize> = (0..r.count).map(|k| (r.start + k * r.step) as usize).collect();
        let mut fields = Vec::with_capacity(selected.len());
        for &i in &selected {
            fields.push(
                self.fields[i].apply_linear_index(&indices[1..], current_i + 1, root)?,
            );
        }
        rebuild(&selected, fields)
    }

    /// Arrmeta-level indexing; constructs `out_meta` for `result_tp`.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn apply_linear_index_arrmeta(
        &self,
        indices: &[IndexRange],
        meta: &[u8],
        result_tp: &NdType,
        out_meta: &mut [u8],
        current_i: usize,
        root: &NdType,
    ) -> Result<isize> {
        let n = self.fields.len() as isize;
        let r = apply_single_index(&indices[0], n, current_i)?;
        if r.remove_dim {
            let i = r.start as usize;
            let child_off = self.fields[i].apply_linear_index_arrmeta(
                &indices[1..],
                self.field_arrmeta(meta, i),
                result_tp,
                out_meta,
                current_i + 1,
                root,
            )?;
            return Ok(read_word(meta, i) as isize + child_off);
        }
        if indices.len() == 1 && indices[0].is_nop(n) {
            self.arrmeta_copy_construct(out_meta, meta);
            return Ok(0);
        }
        let result = result_tp.composite().ok_or_else(|| {
            DTypeError::InvalidArgument(format!("index result {result_tp} is not a composite"))
        })?;
        for k in 0..r.count as usize {
            let i = (r.start + k as isize * r.step) as usize;
            let child = self.fields[i].apply_linear_index_arrmeta(
                &indices[1..],
                self.field_arrmeta(meta, i),
                &result.fields[k],
                result.field_arrmeta_mut(out_meta, k),
                current_i + 1,
                root,
            );
            match child {
                Ok(child_off) => {
                    let off = read_word(meta, i) as isize + child_off;
                    write_word(out_meta, k, off as usize);
                }
                Err(err) => {
                    result.destruct_fields(out_meta, k);
                    return Err(err);
                }
            }
        }
        Ok(0)
    }

    /// Positional display `(T0, T1, ...)`.
    pub(crate) fn fmt_fields(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for (i, field) in self.fields.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{field}")?;
        }
        if self.variadic {
            f.write_str(if self.fields.is_empty() { "..." } else { ", ..." })?;
        }
        f.write_str(")")
    }
}
