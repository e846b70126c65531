//! Comparison kernel synthesis.
//!
//! A comparison node reads `src[0]` (left) and `src[1]` (right) and writes a
//! single `bool` byte to `dst`. Only identical builtins, strings, dates of
//! one unit and composites of one type are comparable; expression operands
//! are first evaluated into buffers of their value type.

use super::assignment::make_assignment_kernel;
use super::{Children, Kernel, KernelBuilder, KernelNode};
use crate::config::{AssignErrorMode, EvalContext};
use crate::ndtype::NdType;
use crate::type_id::{TypeFlags, TypeId};
use crate::types::builtin::Sealed;
use crate::types::string::string_bytes;
use crate::types::type_type::type_load;
use crate::types::ExtendedType;
use crate::{DTypeError, Result};
use num_complex::{Complex32, Complex64};
use smallvec::SmallVec;
use std::cmp::Ordering;
use std::fmt;
use std::marker::PhantomData;
use tracing::{debug, trace};

/// The relation a comparison kernel evaluates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComparisonType {
    Less,
    LessEqual,
    Equal,
    NotEqual,
    GreaterEqual,
    Greater,
}

impl ComparisonType {
    pub const ALL: [ComparisonType; 6] = [
        ComparisonType::Less,
        ComparisonType::LessEqual,
        ComparisonType::Equal,
        ComparisonType::NotEqual,
        ComparisonType::GreaterEqual,
        ComparisonType::Greater,
    ];

    /// Whether this comparison only asks about equality.
    #[inline]
    pub fn is_equality(self) -> bool {
        matches!(self, ComparisonType::Equal | ComparisonType::NotEqual)
    }

    /// Evaluate against the ordering of the left operand to the right one.
    /// `None` (unordered) satisfies only `NotEqual`.
    #[inline]
    pub fn holds(self, ord: Option<Ordering>) -> bool {
        match ord {
            None => self == ComparisonType::NotEqual,
            Some(ord) => match self {
                ComparisonType::Less => ord == Ordering::Less,
                ComparisonType::LessEqual => ord != Ordering::Greater,
                ComparisonType::Equal => ord == Ordering::Equal,
                ComparisonType::NotEqual => ord != Ordering::Equal,
                ComparisonType::GreaterEqual => ord != Ordering::Less,
                ComparisonType::Greater => ord == Ordering::Greater,
            },
        }
    }

    /// The strict part of an ordering comparison.
    fn strict(self) -> ComparisonType {
        match self {
            ComparisonType::Less | ComparisonType::LessEqual => ComparisonType::Less,
            _ => ComparisonType::Greater,
        }
    }
}

impl fmt::Display for ComparisonType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ComparisonType::Less => "less",
            ComparisonType::LessEqual => "less_equal",
            ComparisonType::Equal => "equal",
            ComparisonType::NotEqual => "not_equal",
            ComparisonType::GreaterEqual => "greater_equal",
            ComparisonType::Greater => "greater",
        };
        f.write_str(name)
    }
}

#[inline]
unsafe fn write_bool(dst: *mut u8, v: bool) {
    *dst = v as u8;
}

#[inline]
unsafe fn read_bool(p: *const u8) -> bool {
    *p != 0
}

// ============================================================================
// Leaf nodes
// ============================================================================

/// Ordered builtin scalars.
struct OrderedCompare<T> {
    op: ComparisonType,
    _marker: PhantomData<fn(T)>,
}

impl<T: Sealed + PartialOrd + Send + Sync + 'static> OrderedCompare<T> {
    fn boxed(op: ComparisonType) -> Box<dyn KernelNode> {
        Box::new(OrderedCompare::<T> {
            op,
            _marker: PhantomData,
        })
    }
}

impl<T: Sealed + PartialOrd + Send + Sync> KernelNode for OrderedCompare<T> {
    #[inline]
    unsafe fn single(&self, _ckb: &KernelBuilder, dst: *mut u8, src: &[*const u8]) -> Result<()> {
        let (a, b) = (T::load(src[0]), T::load(src[1]));
        write_bool(dst, self.op.holds(a.partial_cmp(&b)));
        Ok(())
    }

    fn name(&self) -> &'static str {
        "builtin_compare"
    }
}

/// Complex scalars, which only support equality.
struct EqualityCompare<T> {
    negate: bool,
    _marker: PhantomData<fn(T)>,
}

impl<T: Sealed + PartialEq + Send + Sync + 'static> EqualityCompare<T> {
    fn boxed(negate: bool) -> Box<dyn KernelNode> {
        Box::new(EqualityCompare::<T> {
            negate,
            _marker: PhantomData,
        })
    }
}

impl<T: Sealed + PartialEq + Send + Sync> KernelNode for EqualityCompare<T> {
    #[inline]
    unsafe fn single(&self, _ckb: &KernelBuilder, dst: *mut u8, src: &[*const u8]) -> Result<()> {
        let eq = T::load(src[0]) == T::load(src[1]);
        write_bool(dst, eq != self.negate);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "complex_compare"
    }
}

/// Bytewise string ordering.
struct StringCompare {
    op: ComparisonType,
}

impl KernelNode for StringCompare {
    unsafe fn single(&self, _ckb: &KernelBuilder, dst: *mut u8, src: &[*const u8]) -> Result<()> {
        let ord = string_bytes(src[0]).cmp(string_bytes(src[1]));
        write_bool(dst, self.op.holds(Some(ord)));
        Ok(())
    }

    fn name(&self) -> &'static str {
        "string_compare"
    }
}

/// Dates of one unit compare by their encoded value.
struct DateCompare {
    op: ComparisonType,
}

impl KernelNode for DateCompare {
    unsafe fn single(&self, _ckb: &KernelBuilder, dst: *mut u8, src: &[*const u8]) -> Result<()> {
        let a = std::ptr::read_unaligned(src[0] as *const i32);
        let b = std::ptr::read_unaligned(src[1] as *const i32);
        write_bool(dst, self.op.holds(Some(a.cmp(&b))));
        Ok(())
    }

    fn name(&self) -> &'static str {
        "date_compare"
    }
}

/// Stored descriptors, which only support equality.
struct TypeCompare {
    negate: bool,
}

impl KernelNode for TypeCompare {
    unsafe fn single(&self, _ckb: &KernelBuilder, dst: *mut u8, src: &[*const u8]) -> Result<()> {
        let eq = type_load(src[0]) == type_load(src[1]);
        write_bool(dst, eq != self.negate);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "type_compare"
    }
}

// ============================================================================
// Composite and buffered nodes
// ============================================================================

struct FieldCompare {
    lhs_offset: usize,
    rhs_offset: usize,
    equal: usize,
    /// Strict ordering child; absent for equality comparisons.
    strict: Option<usize>,
}

/// Lexicographic comparison of tuple or struct fields.
struct CompositeCompare {
    op: ComparisonType,
    fields: Vec<FieldCompare>,
}

impl KernelNode for CompositeCompare {
    unsafe fn single(&self, ckb: &KernelBuilder, dst: *mut u8, src: &[*const u8]) -> Result<()> {
        let mut flag = 0u8;
        for field in &self.fields {
            let operands = [src[0].add(field.lhs_offset), src[1].add(field.rhs_offset)];
            ckb.call_single(field.equal, &mut flag, &operands)?;
            if read_bool(&flag) {
                continue;
            }
            let result = match field.strict {
                Some(strict) => {
                    ckb.call_single(strict, &mut flag, &operands)?;
                    read_bool(&flag)
                }
                None => self.op == ComparisonType::NotEqual,
            };
            write_bool(dst, result);
            return Ok(());
        }
        let all_equal = matches!(
            self.op,
            ComparisonType::Equal | ComparisonType::LessEqual | ComparisonType::GreaterEqual
        );
        write_bool(dst, all_equal);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "composite_compare"
    }

    fn children(&self) -> Children {
        self.fields
            .iter()
            .flat_map(|f| std::iter::once(f.equal).chain(f.strict))
            .collect()
    }
}

/// Evaluates expression operands into value buffers before comparing.
struct BufferedCompare {
    lhs: Option<(usize, usize)>,
    rhs: Option<(usize, usize)>,
    compare: usize,
}

impl BufferedCompare {
    unsafe fn stage(
        ckb: &KernelBuilder,
        link: Option<(usize, usize)>,
        src: *const u8,
        buf: &mut SmallVec<[u64; 4]>,
    ) -> Result<*const u8> {
        match link {
            None => Ok(src),
            Some((child, size)) => {
                buf.resize(size.div_ceil(8).max(1), 0);
                let mid = buf.as_mut_ptr() as *mut u8;
                ckb.call_single(child, mid, &[src])?;
                Ok(mid as *const u8)
            }
        }
    }
}

impl KernelNode for BufferedCompare {
    unsafe fn single(&self, ckb: &KernelBuilder, dst: *mut u8, src: &[*const u8]) -> Result<()> {
        let (mut lbuf, mut rbuf) = (SmallVec::new(), SmallVec::new());
        let l = Self::stage(ckb, self.lhs, src[0], &mut lbuf)?;
        let r = Self::stage(ckb, self.rhs, src[1], &mut rbuf)?;
        ckb.call_single(self.compare, dst, &[l, r])
    }

    fn name(&self) -> &'static str {
        "buffered_compare"
    }

    fn children(&self) -> Children {
        self.lhs
            .map(|(c, _)| c)
            .into_iter()
            .chain(self.rhs.map(|(c, _)| c))
            .chain(std::iter::once(self.compare))
            .collect()
    }
}

// ============================================================================
// Synthesis
// ============================================================================

fn not_comparable(lhs_tp: &NdType, rhs_tp: &NdType, comptype: ComparisonType) -> DTypeError {
    DTypeError::NotComparable {
        lhs: lhs_tp.to_string(),
        rhs: rhs_tp.to_string(),
        comparison: comptype.to_string(),
    }
}

fn builtin_compare(id: TypeId, op: ComparisonType) -> Option<Box<dyn KernelNode>> {
    let node = match id {
        TypeId::Bool => OrderedCompare::<bool>::boxed(op),
        TypeId::Int8 => OrderedCompare::<i8>::boxed(op),
        TypeId::Int16 => OrderedCompare::<i16>::boxed(op),
        TypeId::Int32 => OrderedCompare::<i32>::boxed(op),
        TypeId::Int64 => OrderedCompare::<i64>::boxed(op),
        TypeId::UInt8 => OrderedCompare::<u8>::boxed(op),
        TypeId::UInt16 => OrderedCompare::<u16>::boxed(op),
        TypeId::UInt32 => OrderedCompare::<u32>::boxed(op),
        TypeId::UInt64 => OrderedCompare::<u64>::boxed(op),
        TypeId::Float32 => OrderedCompare::<f32>::boxed(op),
        TypeId::Float64 => OrderedCompare::<f64>::boxed(op),
        TypeId::ComplexFloat32 if op.is_equality() => {
            EqualityCompare::<Complex32>::boxed(op == ComparisonType::NotEqual)
        }
        TypeId::ComplexFloat64 if op.is_equality() => {
            EqualityCompare::<Complex64>::boxed(op == ComparisonType::NotEqual)
        }
        _ => return None,
    };
    Some(node)
}

/// Evaluate an expression operand into its value type, if it is one.
fn make_value_link(
    ckb: &mut KernelBuilder,
    tp: &NdType,
    meta: &[u8],
    ectx: &EvalContext,
) -> Result<Option<(usize, usize, NdType)>> {
    if !tp.is_expression() {
        return Ok(None);
    }
    let value = tp.value_type();
    if value.arrmeta_size() > 0
        || value.data_size() == 0
        || value.flags().contains(TypeFlags::DESTRUCTOR)
    {
        return Err(DTypeError::AssignmentNotSupported {
            src: tp.to_string(),
            dst: value.to_string(),
        });
    }
    let child = make_assignment_kernel(ckb, &value, &[], tp, meta, AssignErrorMode::None, ectx)?;
    Ok(Some((child, value.data_size(), value)))
}

/// Build a kernel comparing `lhs_tp` and `rhs_tp` elements.
///
/// The kernel reads the left operand from `src[0]` and the right operand
/// from `src[1]` and writes `0` or `1` into the byte at `dst`.
pub fn make_comparison_kernel(
    ckb: &mut KernelBuilder,
    lhs_tp: &NdType,
    lhs_meta: &[u8],
    rhs_tp: &NdType,
    rhs_meta: &[u8],
    comptype: ComparisonType,
    ectx: &EvalContext,
) -> Result<usize> {
    trace!(lhs = %lhs_tp, rhs = %rhs_tp, %comptype, "building comparison kernel");

    if lhs_tp.is_expression() || rhs_tp.is_expression() {
        let lhs = make_value_link(ckb, lhs_tp, lhs_meta, ectx)?;
        let rhs = make_value_link(ckb, rhs_tp, rhs_meta, ectx)?;
        let (lv, lm) = match &lhs {
            Some((_, _, v)) => (v.clone(), &[][..]),
            None => (lhs_tp.clone(), lhs_meta),
        };
        let (rv, rm) = match &rhs {
            Some((_, _, v)) => (v.clone(), &[][..]),
            None => (rhs_tp.clone(), rhs_meta),
        };
        let compare = make_comparison_kernel(ckb, &lv, lm, &rv, rm, comptype, ectx)?;
        return Ok(ckb.push(BufferedCompare {
            lhs: lhs.map(|(c, size, _)| (c, size)),
            rhs: rhs.map(|(c, size, _)| (c, size)),
            compare,
        }));
    }

    if let (Some(l), Some(r)) = (lhs_tp.builtin_id(), rhs_tp.builtin_id()) {
        if l == r {
            if let Some(node) = builtin_compare(l, comptype) {
                return Ok(ckb.push_boxed(node));
            }
        }
        return Err(not_comparable(lhs_tp, rhs_tp, comptype));
    }

    match (lhs_tp.as_extended(), rhs_tp.as_extended()) {
        (Some(ExtendedType::String(_)), Some(ExtendedType::String(_))) => {
            Ok(ckb.push(StringCompare { op: comptype }))
        }
        (Some(ExtendedType::Type(_)), Some(ExtendedType::Type(_))) if comptype.is_equality() => {
            Ok(ckb.push(TypeCompare {
                negate: comptype == ComparisonType::NotEqual,
            }))
        }
        (Some(ExtendedType::Date(l)), Some(ExtendedType::Date(r))) if l.unit() == r.unit() => {
            Ok(ckb.push(DateCompare { op: comptype }))
        }
        (Some(ExtendedType::Tuple(_) | ExtendedType::Struct(_)), _) if lhs_tp == rhs_tp => {
            make_composite_comparison(ckb, lhs_tp, lhs_meta, rhs_meta, comptype, ectx)
        }
        _ => Err(not_comparable(lhs_tp, rhs_tp, comptype)),
    }
}

fn make_composite_comparison(
    ckb: &mut KernelBuilder,
    tp: &NdType,
    lhs_meta: &[u8],
    rhs_meta: &[u8],
    comptype: ComparisonType,
    ectx: &EvalContext,
) -> Result<usize> {
    let tuple = tp
        .composite()
        .ok_or_else(|| not_comparable(tp, tp, comptype))?;
    let mut fields = Vec::with_capacity(tuple.field_count());
    for (i, field) in tuple.fields().iter().enumerate() {
        let lm = tuple.field_arrmeta(lhs_meta, i);
        let rm = tuple.field_arrmeta(rhs_meta, i);
        let equal = make_comparison_kernel(ckb, field, lm, field, rm, ComparisonType::Equal, ectx)?;
        let strict = if comptype.is_equality() {
            None
        } else {
            Some(make_comparison_kernel(ckb, field, lm, field, rm, comptype.strict(), ectx)?)
        };
        fields.push(FieldCompare {
            lhs_offset: tuple.instance_data_offset(lhs_meta, i),
            rhs_offset: tuple.instance_data_offset(rhs_meta, i),
            equal,
            strict,
        });
    }
    Ok(ckb.push(CompositeCompare {
        op: comptype,
        fields,
    }))
}

/// Build a finished comparison kernel.
pub fn make_comparison(
    lhs_tp: &NdType,
    lhs_meta: &[u8],
    rhs_tp: &NdType,
    rhs_meta: &[u8],
    comptype: ComparisonType,
    ectx: &EvalContext,
) -> Result<Kernel> {
    let mut ckb = KernelBuilder::new();
    let root =
        make_comparison_kernel(&mut ckb, lhs_tp, lhs_meta, rhs_tp, rhs_meta, comptype, ectx)?;
    let kernel = Kernel::new(ckb, root);
    if ectx.trace {
        debug!(lhs = %lhs_tp, rhs = %rhs_tp, %comptype, nodes = kernel.builder().len(), "comparison kernel:\n{}", kernel.describe());
    }
    Ok(kernel)
}
