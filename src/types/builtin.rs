//! Builtin scalar types: layout facts, value conversion and promotion.

use crate::config::AssignErrorMode;
use crate::ndtype::NdType;
use crate::type_id::{TypeId, TypeKind};
use crate::{DTypeError, Result};
use num_complex::{Complex32, Complex64};
use num_traits::{AsPrimitive, NumCast};
use std::fmt;

pub(crate) use private::{Loss, ScalarValue, Sealed};

mod private {
    use super::*;

    /// A builtin value widened to a common representation.
    ///
    /// `Int` covers every integer type, `Float` holds `f32` exactly.
    #[derive(Debug, Clone, Copy, PartialEq)]
    pub enum ScalarValue {
        Bool(bool),
        Int(i128),
        Float(f64),
        Complex(Complex64),
    }

    /// Why a checked conversion refused a value.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum Loss {
        Overflow,
        Fractional,
        Inexact,
        Imaginary,
    }

    pub trait Sealed: Copy {
        fn into_value(self) -> ScalarValue;
        fn from_value(v: ScalarValue, mode: AssignErrorMode) -> std::result::Result<Self, Loss>;

        /// # Safety
        /// `src` must point to `size_of::<Self>()` readable bytes.
        #[inline]
        unsafe fn load(src: *const u8) -> Self {
            std::ptr::read_unaligned(src as *const Self)
        }

        /// # Safety
        /// `dst` must point to `size_of::<Self>()` writable bytes.
        #[inline]
        unsafe fn store(self, dst: *mut u8) {
            std::ptr::write_unaligned(dst as *mut Self, self)
        }
    }
}

/// A Rust scalar that corresponds to one builtin [`TypeId`].
///
/// This trait is sealed; it is implemented for `bool`, the fixed-width
/// integers, `f32`, `f64`, [`Complex32`] and [`Complex64`].
pub trait BuiltinScalar:
    Sealed + fmt::Display + fmt::Debug + PartialEq + Send + Sync + 'static
{
    const TYPE_ID: TypeId;
}

impl Loss {
    /// Turn a refused conversion into the matching error.
    pub(crate) fn into_error(self, src: TypeId, dst: TypeId, value: String) -> DTypeError {
        let (src_type, dst_type) = (src.name().to_string(), dst.name().to_string());
        match self {
            Loss::Overflow => DTypeError::Overflow {
                src_type,
                dst_type,
                value,
            },
            Loss::Fractional => DTypeError::Fractional {
                src_type,
                dst_type,
                value,
            },
            Loss::Inexact => DTypeError::Inexact {
                src_type,
                dst_type,
                value,
            },
            Loss::Imaginary => DTypeError::ImaginaryLoss {
                src_type,
                dst_type,
                value,
            },
        }
    }
}

// ============================================================================
// Conversion helpers
// ============================================================================

#[inline]
fn float_to_int<T>(f: f64, mode: AssignErrorMode) -> std::result::Result<T, Loss>
where
    T: NumCast + Copy + 'static,
    f64: AsPrimitive<T>,
{
    if mode == AssignErrorMode::None {
        return Ok(f.as_());
    }
    let v = <T as NumCast>::from(f).ok_or(Loss::Overflow)?;
    if mode >= AssignErrorMode::Fractional && f.fract() != 0.0 {
        return Err(Loss::Fractional);
    }
    Ok(v)
}

#[inline]
fn f64_to_f32(f: f64, mode: AssignErrorMode) -> std::result::Result<f32, Loss> {
    let r = f as f32;
    if mode == AssignErrorMode::None {
        return Ok(r);
    }
    if f.is_finite() && r.is_infinite() {
        return Err(Loss::Overflow);
    }
    if mode == AssignErrorMode::Inexact && !f.is_nan() && r as f64 != f {
        return Err(Loss::Inexact);
    }
    Ok(r)
}

#[inline]
fn int_to_f32(i: i128, mode: AssignErrorMode) -> std::result::Result<f32, Loss> {
    let r = i as f32;
    if mode == AssignErrorMode::Inexact && r as i128 != i {
        return Err(Loss::Inexact);
    }
    Ok(r)
}

#[inline]
fn int_to_f64(i: i128, mode: AssignErrorMode) -> std::result::Result<f64, Loss> {
    let r = i as f64;
    if mode == AssignErrorMode::Inexact && r as i128 != i {
        return Err(Loss::Inexact);
    }
    Ok(r)
}

#[inline]
fn real_part(c: Complex64, mode: AssignErrorMode) -> std::result::Result<f64, Loss> {
    if mode != AssignErrorMode::None && c.im != 0.0 {
        return Err(Loss::Imaginary);
    }
    Ok(c.re)
}

macro_rules! impl_builtin_int {
    ($($t:ty => $id:ident),* $(,)?) => {$(
        impl Sealed for $t {
            #[inline]
            fn into_value(self) -> ScalarValue {
                ScalarValue::Int(self as i128)
            }

            #[inline]
            fn from_value(v: ScalarValue, mode: AssignErrorMode) -> std::result::Result<Self, Loss> {
                match v {
                    ScalarValue::Bool(b) => Ok(b as $t),
                    ScalarValue::Int(i) => {
                        if mode == AssignErrorMode::None {
                            Ok(i.as_())
                        } else {
                            <$t as NumCast>::from(i).ok_or(Loss::Overflow)
                        }
                    }
                    ScalarValue::Float(f) => float_to_int::<$t>(f, mode),
                    ScalarValue::Complex(c) => float_to_int::<$t>(real_part(c, mode)?, mode),
                }
            }
        }

        impl BuiltinScalar for $t {
            const TYPE_ID: TypeId = TypeId::$id;
        }
    )*};
}

impl_builtin_int!(
    i8 => Int8,
    i16 => Int16,
    i32 => Int32,
    i64 => Int64,
    u8 => UInt8,
    u16 => UInt16,
    u32 => UInt32,
    u64 => UInt64,
);

impl Sealed for bool {
    #[inline]
    fn into_value(self) -> ScalarValue {
        ScalarValue::Bool(self)
    }

    fn from_value(v: ScalarValue, mode: AssignErrorMode) -> std::result::Result<Self, Loss> {
        let f = match v {
            ScalarValue::Bool(b) => return Ok(b),
            ScalarValue::Int(i) => {
                if mode == AssignErrorMode::None || i == 0 || i == 1 {
                    return Ok(i != 0);
                }
                return Err(Loss::Overflow);
            }
            ScalarValue::Float(f) => f,
            ScalarValue::Complex(c) => real_part(c, mode)?,
        };
        if mode == AssignErrorMode::None {
            return Ok(f != 0.0);
        }
        if f.is_nan() || !(0.0..=1.0).contains(&f) {
            return Err(Loss::Overflow);
        }
        if f != 0.0 && f != 1.0 && mode >= AssignErrorMode::Fractional {
            return Err(Loss::Fractional);
        }
        Ok(f != 0.0)
    }

    // Stored as one byte; any nonzero byte reads as true.
    #[inline]
    unsafe fn load(src: *const u8) -> Self {
        src.read() != 0
    }

    #[inline]
    unsafe fn store(self, dst: *mut u8) {
        dst.write(self as u8)
    }
}

impl BuiltinScalar for bool {
    const TYPE_ID: TypeId = TypeId::Bool;
}

impl Sealed for f32 {
    #[inline]
    fn into_value(self) -> ScalarValue {
        ScalarValue::Float(self as f64)
    }

    #[inline]
    fn from_value(v: ScalarValue, mode: AssignErrorMode) -> std::result::Result<Self, Loss> {
        match v {
            ScalarValue::Bool(b) => Ok(if b { 1.0 } else { 0.0 }),
            ScalarValue::Int(i) => int_to_f32(i, mode),
            ScalarValue::Float(f) => f64_to_f32(f, mode),
            ScalarValue::Complex(c) => f64_to_f32(real_part(c, mode)?, mode),
        }
    }
}

impl BuiltinScalar for f32 {
    const TYPE_ID: TypeId = TypeId::Float32;
}

impl Sealed for f64 {
    #[inline]
    fn into_value(self) -> ScalarValue {
        ScalarValue::Float(self)
    }

    #[inline]
    fn from_value(v: ScalarValue, mode: AssignErrorMode) -> std::result::Result<Self, Loss> {
        match v {
            ScalarValue::Bool(b) => Ok(if b { 1.0 } else { 0.0 }),
            ScalarValue::Int(i) => int_to_f64(i, mode),
            ScalarValue::Float(f) => Ok(f),
            ScalarValue::Complex(c) => real_part(c, mode),
        }
    }
}

impl BuiltinScalar for f64 {
    const TYPE_ID: TypeId = TypeId::Float64;
}

impl Sealed for Complex32 {
    #[inline]
    fn into_value(self) -> ScalarValue {
        ScalarValue::Complex(Complex64::new(self.re as f64, self.im as f64))
    }

    #[inline]
    fn from_value(v: ScalarValue, mode: AssignErrorMode) -> std::result::Result<Self, Loss> {
        match v {
            ScalarValue::Bool(b) => Ok(Complex32::new(if b { 1.0 } else { 0.0 }, 0.0)),
            ScalarValue::Int(i) => Ok(Complex32::new(int_to_f32(i, mode)?, 0.0)),
            ScalarValue::Float(f) => Ok(Complex32::new(f64_to_f32(f, mode)?, 0.0)),
            ScalarValue::Complex(c) => Ok(Complex32::new(
                f64_to_f32(c.re, mode)?,
                f64_to_f32(c.im, mode)?,
            )),
        }
    }
}

impl BuiltinScalar for Complex32 {
    const TYPE_ID: TypeId = TypeId::ComplexFloat32;
}

impl Sealed for Complex64 {
    #[inline]
    fn into_value(self) -> ScalarValue {
        ScalarValue::Complex(self)
    }

    #[inline]
    fn from_value(v: ScalarValue, mode: AssignErrorMode) -> std::result::Result<Self, Loss> {
        match v {
            ScalarValue::Bool(b) => Ok(Complex64::new(if b { 1.0 } else { 0.0 }, 0.0)),
            ScalarValue::Int(i) => Ok(Complex64::new(int_to_f64(i, mode)?, 0.0)),
            ScalarValue::Float(f) => Ok(Complex64::new(f, 0.0)),
            ScalarValue::Complex(c) => Ok(c),
        }
    }
}

impl BuiltinScalar for Complex64 {
    const TYPE_ID: TypeId = TypeId::ComplexFloat64;
}

// ============================================================================
// Layout and losslessness
// ============================================================================

pub(crate) fn builtin_data_size(id: TypeId) -> usize {
    match id {
        TypeId::Bool | TypeId::Int8 | TypeId::UInt8 => 1,
        TypeId::Int16 | TypeId::UInt16 => 2,
        TypeId::Int32 | TypeId::UInt32 | TypeId::Float32 => 4,
        TypeId::Int64 | TypeId::UInt64 | TypeId::Float64 | TypeId::ComplexFloat32 => 8,
        TypeId::ComplexFloat64 => 16,
        _ => 0,
    }
}

pub(crate) fn builtin_alignment(id: TypeId) -> usize {
    match id {
        TypeId::ComplexFloat32 => 4,
        TypeId::ComplexFloat64 => 8,
        _ => builtin_data_size(id).max(1),
    }
}

/// Significand bits of a floating or complex id (including the implicit bit).
fn precision_bits(id: TypeId) -> u32 {
    match id {
        TypeId::Float32 | TypeId::ComplexFloat32 => 24,
        _ => 53,
    }
}

/// Magnitude bits of an integer id.
fn magnitude_bits(id: TypeId) -> u32 {
    let bits = builtin_data_size(id) as u32 * 8;
    if id.kind() == TypeKind::Int {
        bits - 1
    } else {
        bits
    }
}

/// Whether every `src` value converts to an exactly equal `dst` value.
pub(crate) fn builtin_is_lossless(dst: TypeId, src: TypeId) -> bool {
    if dst == src {
        return true;
    }
    let (ds, ss) = (builtin_data_size(dst), builtin_data_size(src));
    match (dst.kind(), src.kind()) {
        (_, TypeKind::Bool) => true,
        (TypeKind::Bool, _) => false,
        (TypeKind::Int, TypeKind::Int) | (TypeKind::UInt, TypeKind::UInt) => ds > ss,
        (TypeKind::Int, TypeKind::UInt) => ds > ss,
        (TypeKind::Real | TypeKind::Complex, TypeKind::Int | TypeKind::UInt) => {
            magnitude_bits(src) <= precision_bits(dst)
        }
        (TypeKind::Real, TypeKind::Real) => ds > ss,
        (TypeKind::Complex, TypeKind::Real) => ds / 2 >= ss,
        (TypeKind::Complex, TypeKind::Complex) => ds > ss,
        _ => false,
    }
}

// ============================================================================
// Arithmetic promotion
// ============================================================================

fn integer_promote(id: TypeId) -> TypeId {
    match id {
        TypeId::Bool | TypeId::Int8 | TypeId::Int16 | TypeId::UInt8 | TypeId::UInt16 => {
            TypeId::Int32
        }
        other => other,
    }
}

/// Result type of a binary arithmetic operation, following C arithmetic
/// conversions.
///
/// Integer operands narrower than 32 bits promote to `int32`; any float
/// operand makes the result floating; complex absorbs real operands with the
/// wider of the two precisions. Non-builtin types only promote with
/// themselves.
pub fn promote_types(a: &NdType, b: &NdType) -> Result<NdType> {
    let (Some(ai), Some(bi)) = (a.builtin_id(), b.builtin_id()) else {
        if a == b {
            return Ok(a.clone());
        }
        return Err(DTypeError::InvalidArgument(format!(
            "no arithmetic promotion between {a} and {b}"
        )));
    };

    let wide = |id: TypeId| matches!(id, TypeId::Float64 | TypeId::ComplexFloat64);
    let is_complex = |id: TypeId| id.kind() == TypeKind::Complex;
    let is_real = |id: TypeId| id.kind() == TypeKind::Real;

    let id = if is_complex(ai) || is_complex(bi) {
        if wide(ai) || wide(bi) {
            TypeId::ComplexFloat64
        } else {
            TypeId::ComplexFloat32
        }
    } else if is_real(ai) || is_real(bi) {
        if wide(ai) || wide(bi) {
            TypeId::Float64
        } else {
            TypeId::Float32
        }
    } else {
        let (pa, pb) = (integer_promote(ai), integer_promote(bi));
        let (sa, sb) = (builtin_data_size(pa), builtin_data_size(pb));
        if pa == pb {
            pa
        } else if pa.kind() == pb.kind() {
            if sa >= sb {
                pa
            } else {
                pb
            }
        } else {
            let ((s, ss), (u, us)) = if pa.kind() == TypeKind::Int {
                ((pa, sa), (pb, sb))
            } else {
                ((pb, sb), (pa, sa))
            };
            if us >= ss {
                u
            } else {
                s
            }
        }
    };
    Ok(NdType::builtin(id))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conv<D: BuiltinScalar, S: BuiltinScalar>(
        s: S,
        mode: AssignErrorMode,
    ) -> std::result::Result<D, Loss> {
        D::from_value(s.into_value(), mode)
    }

    #[test]
    fn test_int_wrap_and_overflow() {
        assert_eq!(conv::<i8, i32>(300, AssignErrorMode::None), Ok(44));
        assert_eq!(
            conv::<i8, i32>(300, AssignErrorMode::Overflow),
            Err(Loss::Overflow)
        );
        assert_eq!(conv::<u8, i32>(-1, AssignErrorMode::None), Ok(255));
        assert_eq!(conv::<u8, i32>(-1, AssignErrorMode::Inexact), Err(Loss::Overflow));
        assert_eq!(conv::<i8, i32>(3, AssignErrorMode::Fractional), Ok(3));
    }

    #[test]
    fn test_float_to_int_checks() {
        assert_eq!(conv::<i32, f64>(3.5, AssignErrorMode::None), Ok(3));
        assert_eq!(conv::<i32, f64>(3.5, AssignErrorMode::Overflow), Ok(3));
        assert_eq!(
            conv::<i32, f64>(3.5, AssignErrorMode::Fractional),
            Err(Loss::Fractional)
        );
        assert_eq!(conv::<i32, f64>(3.0, AssignErrorMode::Fractional), Ok(3));
        assert_eq!(
            conv::<u8, f64>(256.0, AssignErrorMode::Overflow),
            Err(Loss::Overflow)
        );
        assert_eq!(
            conv::<i64, f64>(f64::NAN, AssignErrorMode::Overflow),
            Err(Loss::Overflow)
        );
    }

    #[test]
    fn test_float_narrowing() {
        assert_eq!(conv::<f32, f64>(3.5, AssignErrorMode::Inexact), Ok(3.5f32));
        assert_eq!(conv::<f32, f64>(0.1, AssignErrorMode::Fractional), Ok(0.1f32));
        assert_eq!(conv::<f32, f64>(0.1, AssignErrorMode::Inexact), Err(Loss::Inexact));
        assert_eq!(conv::<f32, f64>(1e300, AssignErrorMode::Overflow), Err(Loss::Overflow));
        assert!(conv::<f32, f64>(1e300, AssignErrorMode::None).unwrap().is_infinite());
        assert_eq!(
            conv::<f64, i64>(i64::MAX, AssignErrorMode::Inexact),
            Err(Loss::Inexact)
        );
        assert_eq!(conv::<f64, i64>(1 << 40, AssignErrorMode::Inexact), Ok((1u64 << 40) as f64));
    }

    #[test]
    fn test_bool_conversions() {
        assert_eq!(conv::<bool, i32>(2, AssignErrorMode::None), Ok(true));
        assert_eq!(conv::<bool, i32>(2, AssignErrorMode::Overflow), Err(Loss::Overflow));
        assert_eq!(conv::<bool, f64>(0.5, AssignErrorMode::Overflow), Ok(true));
        assert_eq!(
            conv::<bool, f64>(0.5, AssignErrorMode::Fractional),
            Err(Loss::Fractional)
        );
        assert_eq!(conv::<u64, bool>(true, AssignErrorMode::Inexact), Ok(1));
    }

    #[test]
    fn test_complex_conversions() {
        let c = Complex64::new(2.0, 1.0);
        assert_eq!(conv::<f64, Complex64>(c, AssignErrorMode::None), Ok(2.0));
        assert_eq!(
            conv::<f64, Complex64>(c, AssignErrorMode::Overflow),
            Err(Loss::Imaginary)
        );
        assert_eq!(
            conv::<Complex32, i16>(7, AssignErrorMode::Inexact),
            Ok(Complex32::new(7.0, 0.0))
        );
    }

    #[test]
    fn test_lossless_table() {
        use TypeId::*;
        assert!(builtin_is_lossless(Int32, Int16));
        assert!(!builtin_is_lossless(Int16, Int32));
        assert!(builtin_is_lossless(Int32, UInt16));
        assert!(!builtin_is_lossless(Int32, UInt32));
        assert!(!builtin_is_lossless(UInt32, Int8));
        assert!(builtin_is_lossless(Float64, Int32));
        assert!(!builtin_is_lossless(Float64, Int64));
        assert!(builtin_is_lossless(Float32, UInt16));
        assert!(!builtin_is_lossless(Float32, Int32));
        assert!(builtin_is_lossless(ComplexFloat32, Float32));
        assert!(!builtin_is_lossless(ComplexFloat32, Float64));
        assert!(builtin_is_lossless(ComplexFloat64, ComplexFloat32));
        assert!(builtin_is_lossless(Int8, Bool));
        assert!(!builtin_is_lossless(Bool, Int8));
        assert!(!builtin_is_lossless(Int64, Float32));
    }

    #[test]
    fn test_promotion_matches_c() {
        use TypeId::*;
        let p = |a, b| promote_types(&NdType::builtin(a), &NdType::builtin(b)).unwrap();
        assert_eq!(p(Bool, Bool), NdType::builtin(Int32));
        assert_eq!(p(Int8, UInt8), NdType::builtin(Int32));
        assert_eq!(p(Int32, UInt32), NdType::builtin(UInt32));
        assert_eq!(p(Int64, UInt32), NdType::builtin(Int64));
        assert_eq!(p(Int32, UInt64), NdType::builtin(UInt64));
        assert_eq!(p(Int64, Float32), NdType::builtin(Float32));
        assert_eq!(p(Float32, Float64), NdType::builtin(Float64));
    }

    #[test]
    fn test_promotion_with_complex() {
        use TypeId::*;
        let p = |a, b| promote_types(&NdType::builtin(a), &NdType::builtin(b)).unwrap();
        for int in [Int8, Int16, Int32, Int64, UInt8, UInt16, UInt32, UInt64] {
            assert_eq!(p(int, ComplexFloat32), NdType::builtin(ComplexFloat32));
            assert_eq!(p(int, ComplexFloat64), NdType::builtin(ComplexFloat64));
        }
        assert_eq!(p(Float64, ComplexFloat32), NdType::builtin(ComplexFloat64));
        assert_eq!(p(ComplexFloat32, Float32), NdType::builtin(ComplexFloat32));
        assert_eq!(p(ComplexFloat32, ComplexFloat64), NdType::builtin(ComplexFloat64));
    }

    #[test]
    fn test_promotion_non_builtin() {
        let s = NdType::string();
        assert_eq!(promote_types(&s, &s).unwrap(), s);
        assert!(promote_types(&s, &NdType::builtin(TypeId::Int32)).is_err());
    }
}
