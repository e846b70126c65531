//! Builtin-to-builtin assignment kernels.
//!
//! A static table indexed by type id and mode hands out node constructors.
//! The unchecked and fractional modes get a stride-specialized node per
//! `(dst, src)` pair; the overflow and inexact modes share one generic loop
//! that calls a typed per-element function. Identical types copy bits.

use super::leaf::PodCopy;
use super::{KernelBuilder, KernelNode};
use crate::config::AssignErrorMode;
use crate::type_id::{TypeId, BUILTIN_TYPE_ID_COUNT};
use crate::types::builtin::{builtin_data_size, BuiltinScalar};
use crate::Result;
use num_complex::{Complex32, Complex64};
use std::marker::PhantomData;

/// Node converting `S` elements into `D` elements under error mode `MODE`.
pub(crate) struct BuiltinAssign<D, S, const MODE: u8> {
    _marker: PhantomData<fn(S) -> D>,
}

impl<D: BuiltinScalar, S: BuiltinScalar, const MODE: u8> BuiltinAssign<D, S, MODE> {
    fn new() -> Self {
        BuiltinAssign {
            _marker: PhantomData,
        }
    }

    #[inline(always)]
    fn convert(s: S) -> Result<D> {
        D::from_value(s.into_value(), AssignErrorMode::from_u8(MODE))
            .map_err(|loss| loss.into_error(S::TYPE_ID, D::TYPE_ID, format!("{s}")))
    }

    unsafe fn assign_one(dst: *mut u8, src: *const u8) -> Result<()> {
        Self::convert(S::load(src))?.store(dst);
        Ok(())
    }

    fn boxed() -> Box<dyn KernelNode> {
        Box::new(Self::new())
    }

    fn checked() -> Box<dyn KernelNode> {
        Box::new(CheckedAssign {
            func: Self::assign_one,
        })
    }
}

impl<D: BuiltinScalar, S: BuiltinScalar, const MODE: u8> KernelNode
    for BuiltinAssign<D, S, MODE>
{
    #[inline]
    unsafe fn single(&self, _ckb: &KernelBuilder, dst: *mut u8, src: &[*const u8]) -> Result<()> {
        Self::convert(S::load(src[0]))?.store(dst);
        Ok(())
    }

    unsafe fn strided(
        &self,
        _ckb: &KernelBuilder,
        dst: *mut u8,
        dst_stride: isize,
        src: &[*const u8],
        src_stride: &[isize],
        count: usize,
    ) -> Result<()> {
        if count == 0 {
            return Ok(());
        }
        let (s, ss) = (src[0], src_stride[0]);
        let dsize = std::mem::size_of::<D>() as isize;
        let ssize = std::mem::size_of::<S>() as isize;

        if ss == 0 {
            // Broadcast source: convert once.
            let v = Self::convert(S::load(s))?;
            let mut d = dst;
            for _ in 0..count {
                v.store(d);
                d = d.wrapping_offset(dst_stride);
            }
        } else if dst_stride == dsize && ss == ssize {
            for i in 0..count {
                let v = Self::convert(S::load(s.add(i * ssize as usize)))?;
                v.store(dst.add(i * dsize as usize));
            }
        } else {
            let (mut d, mut p) = (dst, s);
            for _ in 0..count {
                Self::convert(S::load(p))?.store(d);
                d = d.wrapping_offset(dst_stride);
                p = p.wrapping_offset(ss);
            }
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "builtin_assign"
    }
}

/// Converts the element at `src` into the element at `dst`.
type AssignFn = unsafe fn(*mut u8, *const u8) -> Result<()>;

/// Generic elementwise loop for the checking modes.
struct CheckedAssign {
    func: AssignFn,
}

impl KernelNode for CheckedAssign {
    #[inline]
    unsafe fn single(&self, _ckb: &KernelBuilder, dst: *mut u8, src: &[*const u8]) -> Result<()> {
        (self.func)(dst, src[0])
    }

    unsafe fn strided(
        &self,
        _ckb: &KernelBuilder,
        dst: *mut u8,
        dst_stride: isize,
        src: &[*const u8],
        src_stride: &[isize],
        count: usize,
    ) -> Result<()> {
        let (mut d, mut s) = (dst, src[0]);
        for _ in 0..count {
            (self.func)(d, s)?;
            d = d.wrapping_offset(dst_stride);
            s = s.wrapping_offset(src_stride[0]);
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "builtin_assign_checked"
    }
}

type NodeCtor = fn() -> Box<dyn KernelNode>;

// Indexed by `AssignErrorMode as usize`.
macro_rules! modes {
    ($d:ty, $s:ty) => {
        [
            BuiltinAssign::<$d, $s, 0>::boxed as NodeCtor,
            BuiltinAssign::<$d, $s, 1>::checked as NodeCtor,
            BuiltinAssign::<$d, $s, 2>::boxed as NodeCtor,
            BuiltinAssign::<$d, $s, 3>::checked as NodeCtor,
        ]
    };
}

// Column order must follow the builtin `TypeId` order.
macro_rules! row {
    ($d:ty) => {
        [
            modes!($d, bool),
            modes!($d, i8),
            modes!($d, i16),
            modes!($d, i32),
            modes!($d, i64),
            modes!($d, u8),
            modes!($d, u16),
            modes!($d, u32),
            modes!($d, u64),
            modes!($d, f32),
            modes!($d, f64),
            modes!($d, Complex32),
            modes!($d, Complex64),
        ]
    };
}

/// `[dst][src][mode]` node constructors.
static ASSIGN_TABLE: [[[NodeCtor; 4]; BUILTIN_TYPE_ID_COUNT]; BUILTIN_TYPE_ID_COUNT] = [
    row!(bool),
    row!(i8),
    row!(i16),
    row!(i32),
    row!(i64),
    row!(u8),
    row!(u16),
    row!(u32),
    row!(u64),
    row!(f32),
    row!(f64),
    row!(Complex32),
    row!(Complex64),
];

/// Push the builtin conversion node for `src -> dst` under `errmode`.
pub(crate) fn make_builtin_assignment(
    ckb: &mut KernelBuilder,
    dst: TypeId,
    src: TypeId,
    errmode: AssignErrorMode,
) -> usize {
    if dst == src {
        return ckb.push(PodCopy {
            size: builtin_data_size(dst),
        });
    }
    let ctor = ASSIGN_TABLE[dst as usize][src as usize][errmode as usize];
    ckb.push_boxed(ctor())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DTypeError;

    fn run_single<D: BuiltinScalar + Default, S: BuiltinScalar>(
        s: S,
        mode: AssignErrorMode,
    ) -> Result<D> {
        let mut ckb = KernelBuilder::new();
        let k = make_builtin_assignment(&mut ckb, D::TYPE_ID, S::TYPE_ID, mode);
        let mut out = D::default();
        unsafe {
            ckb.call_single(
                k,
                &mut out as *mut D as *mut u8,
                &[&s as *const S as *const u8],
            )?;
        }
        Ok(out)
    }

    #[test]
    fn test_table_order_matches_type_ids() {
        for (i, id) in TypeId::BUILTINS.iter().enumerate() {
            assert_eq!(*id as usize, i);
        }
    }

    #[test]
    fn test_int32_to_int8() {
        assert_eq!(run_single::<i8, i32>(300, AssignErrorMode::None).unwrap(), 44);
        assert!(matches!(
            run_single::<i8, i32>(300, AssignErrorMode::Overflow),
            Err(DTypeError::Overflow { .. })
        ));
        assert_eq!(run_single::<i8, i32>(-5, AssignErrorMode::Fractional).unwrap(), -5);
    }

    #[test]
    fn test_identity_keeps_nan_payloads() {
        let snan = f32::from_bits(0x7f80_0001);
        for mode in AssignErrorMode::ALL {
            let out = run_single::<f32, f32>(snan, mode).unwrap();
            assert_eq!(out.to_bits(), 0x7f80_0001);
        }
        let c = Complex32::new(f32::from_bits(0xff80_0002), 1.5);
        let out = run_single::<Complex32, Complex32>(c, AssignErrorMode::None).unwrap();
        assert_eq!((out.re.to_bits(), out.im), (0xff80_0002, 1.5));
    }

    #[test]
    fn test_node_kind_follows_mode() {
        let describe = |mode| {
            let mut ckb = KernelBuilder::new();
            let k = make_builtin_assignment(&mut ckb, TypeId::Int8, TypeId::Float64, mode);
            ckb.describe(k)
        };
        assert_eq!(describe(AssignErrorMode::None), "builtin_assign #0\n");
        assert_eq!(describe(AssignErrorMode::Fractional), "builtin_assign #0\n");
        assert_eq!(describe(AssignErrorMode::Overflow), "builtin_assign_checked #0\n");
        assert_eq!(describe(AssignErrorMode::Inexact), "builtin_assign_checked #0\n");

        let mut ckb = KernelBuilder::new();
        let k = make_builtin_assignment(&mut ckb, TypeId::Float64, TypeId::Float64, AssignErrorMode::Inexact);
        assert_eq!(ckb.describe(k), "pod_copy #0\n");
    }

    #[test]
    fn test_checked_loop_strided() {
        let mut ckb = KernelBuilder::new();
        let k = make_builtin_assignment(&mut ckb, TypeId::Int16, TypeId::Float64, AssignErrorMode::Inexact);
        let src = [1.0f64, 9.0, -2.0, 9.0, 300.0];
        let mut dst = [0i16; 3];
        unsafe {
            ckb.call_strided(k, dst.as_mut_ptr() as *mut u8, 2, &[src.as_ptr() as *const u8], &[16], 3)
                .unwrap();
        }
        assert_eq!(dst, [1, -2, 300]);
        unsafe {
            ckb.call_strided(k, dst.as_mut_ptr() as *mut u8, 2, &[src[2..].as_ptr() as *const u8], &[0], 3)
                .unwrap();
        }
        assert_eq!(dst, [-2; 3]);
    }

    #[test]
    fn test_float_to_int_fraction() {
        assert_eq!(run_single::<i32, f64>(2.5, AssignErrorMode::None).unwrap(), 2);
        assert_eq!(run_single::<i32, f64>(2.5, AssignErrorMode::Overflow).unwrap(), 2);
        assert!(matches!(
            run_single::<i32, f64>(2.5, AssignErrorMode::Fractional),
            Err(DTypeError::Fractional { .. })
        ));
    }

    #[test]
    fn test_strided_paths() {
        let mut ckb = KernelBuilder::new();
        let k = make_builtin_assignment(&mut ckb, TypeId::Int64, TypeId::Int16, AssignErrorMode::None);
        let src = [1i16, 2, 3, 4, 5, 6];
        let mut dst = [0i64; 3];
        unsafe {
            // Every other source element.
            ckb.call_strided(k, dst.as_mut_ptr() as *mut u8, 8, &[src.as_ptr() as *const u8], &[4], 3)
                .unwrap();
        }
        assert_eq!(dst, [1, 3, 5]);
        unsafe {
            ckb.call_strided(k, dst.as_mut_ptr() as *mut u8, 8, &[src[5..].as_ptr() as *const u8], &[0], 3)
                .unwrap();
        }
        assert_eq!(dst, [6, 6, 6]);
        unsafe {
            ckb.call_strided(k, dst.as_mut_ptr() as *mut u8, 8, &[src.as_ptr() as *const u8], &[2], 3)
                .unwrap();
        }
        assert_eq!(dst, [1, 2, 3]);
    }

    #[test]
    fn test_strided_error_stops() {
        let mut ckb = KernelBuilder::new();
        let k = make_builtin_assignment(&mut ckb, TypeId::UInt8, TypeId::Int32, AssignErrorMode::Overflow);
        let src = [1i32, 2, -3, 4];
        let mut dst = [0u8; 4];
        let err = unsafe {
            ckb.call_strided(k, dst.as_mut_ptr(), 1, &[src.as_ptr() as *const u8], &[4], 4)
        };
        assert!(matches!(err, Err(DTypeError::Overflow { ref value, .. }) if value == "-3"));
        assert_eq!(dst[..2], [1, 2]);
    }
}
