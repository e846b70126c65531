//! A minimal owning container: type, arrmeta and a zeroed data buffer.
//!
//! [`NdValue`] exists so the core operations (casts, element copies,
//! comparisons, struct concatenation) can be driven end to end without an
//! external array layer.

use crate::arrmeta::Arrmeta;
use crate::config::{AssignErrorMode, EvalContext};
use crate::iter::ElwiseIter2;
use crate::kernel::assignment::make_kernel;
use crate::kernel::comparison::{make_comparison, ComparisonType};
use crate::ndtype::NdType;
use crate::shape::IndexRange;
use crate::type_id::{TypeFlags, TypeId};
use crate::types::builtin::{BuiltinScalar, Sealed};
use crate::types::dim::element_extent;
use crate::types::string::{string_bytes, string_store};
use crate::types::type_type::{type_load, type_store};
use crate::{DTypeError, Result};
use std::fmt;
use std::str::FromStr;
use tracing::trace;

/// An owned value of any concrete type.
pub struct NdValue {
    meta: Arrmeta,
    data: Box<[u64]>,
    len: usize,
}

impl NdValue {
    fn with_arrmeta(meta: Arrmeta) -> NdValue {
        let len = element_extent(meta.tp(), meta.as_bytes()).max(0) as usize;
        let data = vec![0u64; len.div_ceil(8).max(1)].into_boxed_slice();
        NdValue { meta, data, len }
    }

    /// A zeroed value of `tp` with default arrmeta.
    pub fn empty(tp: &NdType) -> Result<NdValue> {
        NdValue::empty_with_shape(tp, &[])
    }

    /// A zeroed value of `tp`; `shape` sizes its strided dimensions.
    pub fn empty_with_shape(tp: &NdType, shape: &[isize]) -> Result<NdValue> {
        Ok(NdValue::with_arrmeta(Arrmeta::default_for(tp, shape)?))
    }

    pub fn from_scalar<T: BuiltinScalar>(value: T) -> NdValue {
        let mut out = NdValue::with_arrmeta(Arrmeta::empty(&NdType::of::<T>()));
        unsafe { value.store(out.data_ptr_mut()) };
        out
    }

    /// A `type` value holding `tp`.
    pub fn from_type(tp: &NdType) -> NdValue {
        let mut out = NdValue::with_arrmeta(Arrmeta::empty(&NdType::type_type()));
        unsafe { type_store(out.data_ptr_mut(), Some(tp)) };
        out
    }

    #[inline]
    pub fn tp(&self) -> &NdType {
        self.meta.tp()
    }

    #[inline]
    pub fn arrmeta(&self) -> &[u8] {
        self.meta.as_bytes()
    }

    /// The data bytes of the value.
    #[inline]
    pub fn data(&self) -> &[u8] {
        &bytemuck::cast_slice::<u64, u8>(&self.data)[..self.len]
    }

    #[inline]
    pub fn data_ptr(&self) -> *const u8 {
        self.data.as_ptr() as *const u8
    }

    #[inline]
    pub fn data_ptr_mut(&mut self) -> *mut u8 {
        self.data.as_mut_ptr() as *mut u8
    }

    pub fn shape(&self) -> Vec<isize> {
        self.tp().get_shape(Some(self.arrmeta()), Some(self.data()))
    }

    /// Read the value as a builtin scalar, converting under the default
    /// error mode when the stored type differs.
    pub fn as_scalar<T: BuiltinScalar>(&self) -> Result<T> {
        if self.tp().builtin_id() == Some(T::TYPE_ID) {
            return Ok(unsafe { T::load(self.data_ptr()) });
        }
        let converted = self.cast(&NdType::of::<T>(), AssignErrorMode::default())?;
        Ok(unsafe { T::load(converted.data_ptr()) })
    }

    /// Read a string value.
    pub fn as_str(&self) -> Result<String> {
        if self.tp().type_id() != TypeId::String {
            return Err(DTypeError::InvalidArgument(format!(
                "value of type {} is not a string",
                self.tp()
            )));
        }
        let bytes = unsafe { string_bytes(self.data_ptr()) };
        String::from_utf8(bytes.to_vec())
            .map_err(|e| DTypeError::InvalidArgument(format!("string is not valid UTF-8: {e}")))
    }

    /// Read a `type` value; `None` when no descriptor was stored.
    pub fn as_type(&self) -> Result<Option<NdType>> {
        if self.tp().type_id() != TypeId::Type {
            return Err(DTypeError::InvalidArgument(format!(
                "value of type {} is not a type",
                self.tp()
            )));
        }
        Ok(unsafe { type_load(self.data_ptr()) })
    }

    fn field_index(&self, name: &str) -> Result<usize> {
        let st = self.tp().as_struct().ok_or_else(|| {
            DTypeError::InvalidArgument(format!("value of type {} is not a struct", self.tp()))
        })?;
        st.field_index(name).ok_or_else(|| {
            DTypeError::InvalidArgument(format!("type {} has no field named {name:?}", self.tp()))
        })
    }

    /// Copy out the struct field called `name`.
    pub fn field(&self, name: &str) -> Result<NdValue> {
        let i = self.field_index(name)?;
        let tuple = self.tp().composite().ok_or_else(|| {
            DTypeError::InvalidArgument(format!("value of type {} is not a struct", self.tp()))
        })?;
        let field_tp = &tuple.fields()[i];
        let field_meta = tuple.field_arrmeta(self.arrmeta(), i);
        let offset = tuple.instance_data_offset(self.arrmeta(), i);
        let mut out = NdValue::empty_with_shape(field_tp, &field_tp.get_shape(Some(field_meta), None))?;
        let kernel = make_kernel(
            field_tp,
            out.arrmeta(),
            field_tp,
            field_meta,
            AssignErrorMode::None,
            &EvalContext::default(),
        )?;
        let dst = out.data_ptr_mut();
        unsafe { kernel.single(dst, &[self.data_ptr().add(offset)])? };
        Ok(out)
    }

    /// Assign `value` into the struct field called `name`.
    pub fn set_field(&mut self, name: &str, value: &NdValue, errmode: AssignErrorMode) -> Result<()> {
        let i = self.field_index(name)?;
        let tuple = self.tp().composite().ok_or_else(|| {
            DTypeError::InvalidArgument(format!("value of type {} is not a struct", self.tp()))
        })?;
        let kernel = make_kernel(
            &tuple.fields()[i],
            tuple.field_arrmeta(self.arrmeta(), i),
            value.tp(),
            value.arrmeta(),
            errmode,
            &EvalContext::default(),
        )?;
        let offset = tuple.instance_data_offset(self.arrmeta(), i);
        let dst = self.data_ptr_mut().wrapping_add(offset);
        unsafe { kernel.single(dst, &[value.data_ptr()]) }
    }

    /// Copy out the part selected by `indices`.
    pub fn index(&self, indices: &[IndexRange]) -> Result<NdValue> {
        let tp = self.tp();
        let result_tp = tp.index(indices)?;
        let mut offset = 0isize;
        let view_meta = Arrmeta::construct_with(&result_tp, |out| {
            offset = tp.apply_linear_index_arrmeta(indices, self.arrmeta(), &result_tp, out, 0, tp)?;
            Ok(())
        })?;
        let view_data = self.data_ptr().wrapping_offset(offset);
        let shape = result_tp.get_shape(Some(view_meta.as_bytes()), None);
        trace!(tp = %tp, result = %result_tp, offset, "indexing value");

        let mut out = NdValue::empty_with_shape(&result_tp, &shape)?;
        let kernel = make_kernel(
            &result_tp,
            out.arrmeta(),
            &result_tp,
            view_meta.as_bytes(),
            AssignErrorMode::None,
            &EvalContext::default(),
        )?;
        let dst = out.data_ptr_mut();
        unsafe { kernel.single(dst, &[view_data])? };
        Ok(out)
    }

    /// Assign `src` into this value, broadcasting as needed.
    pub fn assign(&mut self, src: &NdValue, errmode: AssignErrorMode) -> Result<()> {
        self.assign_with(src, errmode, &EvalContext::default())
    }

    pub fn assign_with(&mut self, src: &NdValue, errmode: AssignErrorMode, ectx: &EvalContext) -> Result<()> {
        let kernel = make_kernel(self.tp(), self.arrmeta(), src.tp(), src.arrmeta(), errmode, ectx)?;
        let dst = self.data_ptr_mut();
        unsafe { kernel.single(dst, &[src.data_ptr()]) }
    }

    /// Assign `src` into the part of this value selected by `indices`.
    pub fn assign_at(&mut self, indices: &[IndexRange], src: &NdValue, errmode: AssignErrorMode) -> Result<()> {
        let tp = self.tp().clone();
        let result_tp = tp.index(indices)?;
        let mut offset = 0isize;
        let view_meta = Arrmeta::construct_with(&result_tp, |out| {
            offset = tp.apply_linear_index_arrmeta(indices, self.arrmeta(), &result_tp, out, 0, &tp)?;
            Ok(())
        })?;
        let kernel = make_kernel(
            &result_tp,
            view_meta.as_bytes(),
            src.tp(),
            src.arrmeta(),
            errmode,
            &EvalContext::default(),
        )?;
        let dst = self.data_ptr_mut().wrapping_offset(offset);
        unsafe { kernel.single(dst, &[src.data_ptr()]) }
    }

    /// A new value of type `tp` converted from this one.
    pub fn cast(&self, tp: &NdType, errmode: AssignErrorMode) -> Result<NdValue> {
        let shape: Vec<isize> = self.shape().into_iter().map(|n| n.max(0)).collect();
        let mut out = NdValue::empty_with_shape(tp, &shape)?;
        out.assign(self, errmode)?;
        Ok(out)
    }

    /// Copy of the arrmeta and the data bytes.
    ///
    /// Variable-length data stays shared with the original through the
    /// memory blocks the copied arrmeta references. Types that hold
    /// references are copied element by element instead.
    pub fn try_clone(&self) -> Result<NdValue> {
        if self.tp().flags().contains(TypeFlags::DESTRUCTOR) {
            let shape: Vec<isize> = self.shape().into_iter().map(|n| n.max(0)).collect();
            let mut out = NdValue::empty_with_shape(self.tp(), &shape)?;
            out.assign(self, AssignErrorMode::None)?;
            return Ok(out);
        }
        let meta = Arrmeta::copy_of(self.tp(), self.arrmeta())?;
        Ok(NdValue {
            meta,
            data: self.data.clone(),
            len: self.len,
        })
    }

    /// Whether every element equals the matching (broadcast) element of
    /// `other`.
    pub fn all_equal(&self, other: &NdValue) -> Result<bool> {
        let it = ElwiseIter2::new(
            self.tp(),
            self.arrmeta(),
            self.data_ptr() as *mut u8,
            other.tp(),
            other.arrmeta(),
            other.data_ptr(),
        )?;
        let kernel = make_comparison(
            it.dst_element_type(),
            it.dst_element_arrmeta(),
            it.src_element_type(),
            it.src_element_arrmeta(),
            ComparisonType::Equal,
            &EvalContext::default(),
        )?;
        let mut flag = 0u8;
        for (a, b) in it {
            unsafe { kernel.single(&mut flag, &[a as *const u8, b])? };
            if flag == 0 {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Evaluate the element property `name` into a new value.
    pub fn elwise_property(&self, name: &str) -> Result<NdValue> {
        let tp = self.tp();
        let view_tp = map_element(tp, &|elem| NdType::property(elem.clone(), name))?;
        let value_tp = map_element(tp, &|elem| {
            Ok(NdType::property(elem.clone(), name)?.value_type())
        })?;
        let shape: Vec<isize> = self.shape().into_iter().map(|n| n.max(0)).collect();
        let mut out = NdValue::empty_with_shape(&value_tp, &shape)?;
        let kernel = make_kernel(
            &value_tp,
            out.arrmeta(),
            &view_tp,
            self.arrmeta(),
            AssignErrorMode::None,
            &EvalContext::default(),
        )?;
        let dst = out.data_ptr_mut();
        unsafe { kernel.single(dst, &[self.data_ptr()])? };
        Ok(out)
    }
}

/// Rebuild `tp` with `f` applied to its innermost element type.
fn map_element(tp: &NdType, f: &dyn Fn(&NdType) -> Result<NdType>) -> Result<NdType> {
    if let Some(t) = tp.as_fixed_dim() {
        return NdType::fixed_dim(t.dim_size(), map_element(t.element_type(), f)?);
    }
    if let Some(t) = tp.as_strided_dim() {
        return NdType::strided_dim(map_element(t.element_type(), f)?);
    }
    if let Some(t) = tp.as_var_dim() {
        return NdType::var_dim(map_element(t.element_type(), f)?);
    }
    f(tp)
}

impl FromStr for NdValue {
    type Err = DTypeError;

    /// A `string` value holding a copy of `s`.
    fn from_str(s: &str) -> Result<NdValue> {
        let mut out = NdValue::empty(&NdType::string())?;
        let dst = out.data_ptr_mut();
        unsafe { string_store(out.arrmeta(), dst, s.as_bytes())? };
        Ok(out)
    }
}

impl Drop for NdValue {
    fn drop(&mut self) {
        let data = self.data.as_mut_ptr() as *mut u8;
        unsafe { self.meta.tp().data_destruct(self.meta.as_bytes(), data) };
    }
}

impl fmt::Debug for NdValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NdValue")
            .field("tp", &self.tp().to_string())
            .field("shape", &self.shape())
            .field("data_len", &self.len)
            .finish()
    }
}

/// Copy one element of `tp` from `src` to `dst`.
///
/// Variable-length data is copied into the blocks referenced by `dst_meta`.
///
/// # Safety
/// `dst` and `src` must address valid elements of `tp` laid out by the
/// given arrmeta regions.
pub unsafe fn typed_data_copy(
    tp: &NdType,
    dst_meta: &[u8],
    dst: *mut u8,
    src_meta: &[u8],
    src: *const u8,
) -> Result<()> {
    // Arrmeta may relocate fields or elements, so only arrmeta-free data is
    // copied as raw bytes.
    if tp.is_pod() && tp.arrmeta_size() == 0 {
        std::ptr::copy(src, dst, tp.data_size());
        return Ok(());
    }
    let kernel = make_kernel(tp, dst_meta, tp, src_meta, AssignErrorMode::None, &EvalContext::default())?;
    kernel.single(dst, &[src])
}

/// Concatenate the fields of two struct (or two tuple) values.
///
/// A missing operand is the identity: the other operand is returned as a
/// copy.
pub fn struct_concat(lhs: Option<&NdValue>, rhs: Option<&NdValue>) -> Result<Option<NdValue>> {
    let (lhs, rhs) = match (lhs, rhs) {
        (None, None) => return Ok(None),
        (Some(v), None) | (None, Some(v)) => return v.try_clone().map(Some),
        (Some(l), Some(r)) => (l, r),
    };
    let not_composite = |v: &NdValue| {
        DTypeError::InvalidArgument(format!("cannot concatenate fields of type {}", v.tp()))
    };
    let lt = lhs.tp().composite().ok_or_else(|| not_composite(lhs))?;
    let rt = rhs.tp().composite().ok_or_else(|| not_composite(rhs))?;

    let fields: Vec<NdType> = lt.fields().iter().chain(rt.fields()).cloned().collect();
    let tp = match (lhs.tp().as_struct(), rhs.tp().as_struct()) {
        (Some(ls), Some(rs)) => {
            let names = ls.field_names().iter().chain(rs.field_names()).cloned().collect();
            NdType::struct_type(names, fields)?
        }
        (None, None) => NdType::tuple(fields)?,
        _ => {
            return Err(DTypeError::InvalidArgument(format!(
                "cannot concatenate {} with {}",
                lhs.tp(),
                rhs.tp()
            )))
        }
    };
    trace!(lhs = %lhs.tp(), rhs = %rhs.tp(), result = %tp, "concatenating fields");

    let mut out = NdValue::empty(&tp)?;
    let out_tuple = tp
        .composite()
        .ok_or_else(|| DTypeError::InvalidArgument(format!("{tp} is not a composite type")))?;
    let sources = (0..lt.field_count())
        .map(|i| (lhs, lt, i))
        .chain((0..rt.field_count()).map(|i| (rhs, rt, i)));
    for (k, (value, t, i)) in sources.enumerate() {
        let dst_offset = out_tuple.instance_data_offset(out.arrmeta(), k);
        let src_offset = t.instance_data_offset(value.arrmeta(), i);
        let dst = out.data_ptr_mut().wrapping_add(dst_offset);
        unsafe {
            typed_data_copy(
                &t.fields()[i],
                out_tuple.field_arrmeta(out.arrmeta(), k),
                dst,
                t.field_arrmeta(value.arrmeta(), i),
                value.data_ptr().add(src_offset),
            )?;
        }
    }
    Ok(Some(out))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::date::DateUnit;
    use approx::assert_relative_eq;

    #[test]
    fn test_scalar_roundtrip_and_cast() {
        let v = NdValue::from_scalar(3.5f64);
        assert_relative_eq!(v.as_scalar::<f64>().unwrap(), 3.5);
        let f = v.cast(&NdType::of::<f32>(), AssignErrorMode::Inexact).unwrap();
        assert_relative_eq!(f.as_scalar::<f32>().unwrap(), 3.5f32);
        assert!(matches!(
            v.as_scalar::<i32>(),
            Err(DTypeError::Fractional { .. })
        ));
    }

    #[test]
    fn test_typed_data_copy_follows_view_offsets() {
        let i32_tp = NdType::of::<i32>();
        let tp = NdType::tuple(vec![i32_tp.clone(); 3]).unwrap();
        let mut value = NdValue::empty(&tp).unwrap();
        for (i, v) in [10i32, 20, 30].into_iter().enumerate() {
            unsafe { v.store(value.data_ptr_mut().add(4 * i)) };
        }

        let indices = [IndexRange::from(1)];
        let view_tp = tp.index(&indices).unwrap();
        let mut offset = 0isize;
        let view_meta = Arrmeta::construct_with(&view_tp, |out| {
            offset = tp.apply_linear_index_arrmeta(&indices, value.arrmeta(), &view_tp, out, 0, &tp)?;
            Ok(())
        })
        .unwrap();

        let mut out = NdValue::empty(&view_tp).unwrap();
        let dst_meta = Arrmeta::copy_of(&view_tp, out.arrmeta()).unwrap();
        unsafe {
            typed_data_copy(
                &view_tp,
                dst_meta.as_bytes(),
                out.data_ptr_mut(),
                view_meta.as_bytes(),
                value.data_ptr().wrapping_offset(offset),
            )
            .unwrap();
        }
        let read = |i: usize| unsafe { i32::load(out.data_ptr().add(4 * i)) };
        assert_eq!((read(0), read(1)), (20, 30));

        // Arrmeta-free types take the raw copy.
        let mut x = 0i64;
        let y = -7i64;
        unsafe {
            typed_data_copy(
                &NdType::of::<i64>(),
                &[],
                &mut x as *mut i64 as *mut u8,
                &[],
                &y as *const i64 as *const u8,
            )
            .unwrap();
        }
        assert_eq!(x, -7);
    }

    #[test]
    fn test_string_value() {
        let s: NdValue = "hello".parse().unwrap();
        assert_eq!(s.as_str().unwrap(), "hello");
        let copy = s.cast(&NdType::string(), AssignErrorMode::None).unwrap();
        assert_eq!(copy.as_str().unwrap(), "hello");
        assert!(NdValue::from_scalar(1u8).as_str().is_err());
    }

    #[test]
    fn test_struct_fields() {
        let tp = NdType::struct_type(
            vec!["id".into(), "name".into()],
            vec![NdType::of::<i64>(), NdType::string()],
        )
        .unwrap();
        let mut v = NdValue::empty(&tp).unwrap();
        v.set_field("id", &NdValue::from_scalar(42i32), AssignErrorMode::default())
            .unwrap();
        v.set_field("name", &"ada".parse().unwrap(), AssignErrorMode::default())
            .unwrap();
        assert_eq!(v.field("id").unwrap().as_scalar::<i64>().unwrap(), 42);
        assert_eq!(v.field("name").unwrap().as_str().unwrap(), "ada");
        assert!(v.field("missing").is_err());
    }

    #[test]
    fn test_index_copies_selection() {
        let tp = NdType::fixed_dim(4, NdType::of::<i32>()).unwrap();
        let mut v = NdValue::empty(&tp).unwrap();
        let src: Vec<i32> = vec![10, 20, 30, 40];
        unsafe { std::ptr::copy_nonoverlapping(src.as_ptr() as *const u8, v.data_ptr_mut(), 16) };

        let one = v.index(&[IndexRange::index(-1)]).unwrap();
        assert_eq!(one.as_scalar::<i32>().unwrap(), 40);

        let part = v.index(&[IndexRange::range(1, 3)]).unwrap();
        assert_eq!(part.shape(), vec![2]);
        let expected: Vec<u8> = [20i32, 30].iter().flat_map(|x| x.to_ne_bytes()).collect();
        assert_eq!(&part.data()[..8], &expected[..]);
    }

    #[test]
    fn test_assign_broadcast_and_all_equal() {
        let tp = NdType::fixed_dim(3, NdType::of::<f32>()).unwrap();
        let mut v = NdValue::empty(&tp).unwrap();
        v.assign(&NdValue::from_scalar(2i16), AssignErrorMode::default())
            .unwrap();
        assert!(v.all_equal(&NdValue::from_scalar(2.0f32)).unwrap());
        assert!(!v.all_equal(&NdValue::from_scalar(3.0f32)).unwrap());
    }

    #[test]
    fn test_try_clone_is_independent() {
        let mut v = NdValue::from_scalar(5u16);
        let c = v.try_clone().unwrap();
        v.assign(&NdValue::from_scalar(6u16), AssignErrorMode::None).unwrap();
        assert_eq!(c.as_scalar::<u16>().unwrap(), 5);
        assert_eq!(v.as_scalar::<u16>().unwrap(), 6);
    }

    #[test]
    fn test_date_property() {
        let tp = NdType::date(DateUnit::Day);
        let mut v = NdValue::empty(&tp).unwrap();
        let raw = tp.as_date().unwrap().encode(2012, 2, 29).unwrap();
        unsafe { raw.store(v.data_ptr_mut()) };
        assert_eq!(v.elwise_property("year").unwrap().as_scalar::<i32>().unwrap(), 2012);
        assert_eq!(v.elwise_property("day").unwrap().as_scalar::<i32>().unwrap(), 29);
        assert!(matches!(
            v.elwise_property("hour"),
            Err(DTypeError::UnknownProperty { .. })
        ));
    }

    #[test]
    fn test_struct_concat() {
        let a_tp = NdType::struct_type(vec!["x".into()], vec![NdType::of::<i32>()]).unwrap();
        let b_tp = NdType::struct_type(vec!["s".into()], vec![NdType::string()]).unwrap();
        let mut a = NdValue::empty(&a_tp).unwrap();
        a.set_field("x", &NdValue::from_scalar(9i32), AssignErrorMode::None).unwrap();
        let mut b = NdValue::empty(&b_tp).unwrap();
        b.set_field("s", &"tail".parse().unwrap(), AssignErrorMode::None).unwrap();

        assert!(struct_concat(None, None).unwrap().is_none());
        let same = struct_concat(Some(&a), None).unwrap().unwrap();
        assert_eq!(same.tp(), a.tp());
        assert!(same.all_equal(&a).unwrap());

        let ab = struct_concat(Some(&a), Some(&b)).unwrap().unwrap();
        assert_eq!(ab.tp().to_string(), "{x : int32, s : string}");
        assert_eq!(ab.field("x").unwrap().as_scalar::<i32>().unwrap(), 9);
        assert_eq!(ab.field("s").unwrap().as_str().unwrap(), "tail");
    }
}
